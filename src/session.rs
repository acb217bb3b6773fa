//! Session controller - the repair loop
//!
//! Drives one file from "unknown number of defects" to a terminal state
//! under a bounded number of model calls: analyze, synthesize, apply,
//! re-analyze, and repeat until clean or the attempt budget runs out. The
//! collaborators it calls are stateless request/response services; all loop
//! state - the attempt history in particular - lives here.
//!
//! A note on multi-defect attempts: the synthesizer returns one patch per
//! defect and each patch carries complete replacement content, so when an
//! attempt addresses several defects the patches are applied in order and
//! the last one's content is what the next analysis pass sees. Earlier
//! patches in the same attempt survive as audit trail in the progress
//! output and the attempt log.

use crate::analyzer::Analyzer;
use crate::defect::DefectSet;
use crate::error::CoreError;
use crate::escalation;
use crate::patch::{self, Patch};
use crate::reference::{derive_query, ReferenceProvider};
use crate::report::Reporter;
use crate::synthesize::Synthesizer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Per-run knobs the loop needs
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_attempts: u32,
    pub enable_search: bool,
    pub num_search_results: usize,
    pub search_threshold: u32,
}

/// One completed loop iteration. Append-only; the ordered sequence of these
/// is the file's repair history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub defects_before: DefectSet,
    /// The last patch applied in this attempt (the one whose content the
    /// next analysis pass saw)
    pub patch: Patch,
    pub defects_after: DefectSet,
    pub used_search: bool,
}

/// Terminal state of a file's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The first analysis pass found nothing to fix
    NoErrorsFound,
    /// All defects resolved within the attempt budget
    Resolved,
    /// Budget exhausted with defects remaining
    AttemptsExhausted,
    /// The run was interrupted before this session finished
    Cancelled,
    /// The synthesizer could not produce patches
    SynthesisFailed,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::NoErrorsFound => "no errors found",
            SessionStatus::Resolved => "resolved",
            SessionStatus::AttemptsExhausted => "attempts exhausted",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::SynthesisFailed => "synthesis failed",
        }
    }

    /// True for outcomes that left the file clean
    pub fn is_clean(&self) -> bool {
        matches!(self, SessionStatus::NoErrorsFound | SessionStatus::Resolved)
    }
}

/// Everything a session produced, reported per file at the end of a run
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub file: PathBuf,
    pub final_content: String,
    pub remaining: DefectSet,
    pub attempts: Vec<AttemptRecord>,
    pub status: SessionStatus,
}

/// Receives every committed AttemptRecord in creation order. The on-disk
/// layout is the sink's concern, not the loop's.
pub trait AttemptSink: Send + Sync {
    fn record(&self, file: &Path, record: &AttemptRecord);
}

/// A sink that drops everything, for runs where logging is disabled
pub struct NullSink;

impl AttemptSink for NullSink {
    fn record(&self, _file: &Path, _record: &AttemptRecord) {}
}

/// The stateless services a session calls into
pub struct Collaborators {
    pub analyzer: Arc<dyn Analyzer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Absent when reference search is disabled by configuration
    pub references: Option<Arc<dyn ReferenceProvider>>,
    pub sink: Arc<dyn AttemptSink>,
}

/// Run the repair loop for one file to a terminal state.
pub async fn repair_file(
    file: &Path,
    source: String,
    deps: &Collaborators,
    opts: &SessionOptions,
    cancel: &watch::Receiver<bool>,
    reporter: &Reporter,
) -> SessionResult {
    let mut source = source;

    reporter.scanning(file);
    let mut defects = deps.analyzer.analyze(&source).await;

    if defects.is_empty() {
        reporter.clean(file);
        return finish(file, source, defects, Vec::new(), SessionStatus::NoErrorsFound, reporter);
    }

    reporter.defects_found(file, &defects);

    let mut history: Vec<AttemptRecord> = Vec::new();

    while !defects.is_empty() && (history.len() as u32) < opts.max_attempts {
        if *cancel.borrow() {
            return finish(file, source, defects, history, SessionStatus::Cancelled, reporter);
        }

        let attempt = history.len() as u32 + 1;

        // Escalate to reference search when the same defect identity has
        // survived enough consecutive attempts.
        let mut references = Vec::new();
        let mut used_search = false;
        if opts.enable_search && escalation::should_search(&history, opts.search_threshold) {
            if let Some(provider) = &deps.references {
                // Query derives from the defect the loop is stuck on
                if let Some(stuck) = defects.lead() {
                    let query = derive_query(stuck);
                    reporter.searching(&query);
                    references = provider.search(&query, opts.num_search_results).await;
                    used_search = true;
                }
            }
        }

        let patches = match deps
            .synthesizer
            .synthesize(&source, &defects, &references)
            .await
        {
            Ok(patches) => patches,
            Err(CoreError::SynthesisUnavailable { reason }) => {
                reporter.warning(&format!("{}: synthesis unavailable: {}", file.display(), reason));
                return finish(file, source, defects, history, SessionStatus::SynthesisFailed, reporter);
            }
            Err(other) => {
                reporter.warning(&format!("{}: {}", file.display(), other));
                return finish(file, source, defects, history, SessionStatus::SynthesisFailed, reporter);
            }
        };

        // Apply in order; each patch replaces the file wholesale, so the
        // last one is the attempt's outcome.
        let mut last_applied: Option<Patch> = None;
        for proposed in patches {
            let applied = patch::apply(&proposed);
            reporter.fix_applied(attempt, &applied.explanation);
            source = applied.content;
            last_applied = Some(proposed);
        }

        let Some(last_patch) = last_applied else {
            // Contract violation the synthesizer should have caught
            reporter.warning(&format!("{}: synthesizer returned no patches", file.display()));
            return finish(file, source, defects, history, SessionStatus::SynthesisFailed, reporter);
        };

        let after = deps.analyzer.analyze(&source).await;
        reporter.attempt_outcome(attempt, &after);

        let record = AttemptRecord {
            attempt,
            defects_before: defects,
            patch: last_patch,
            defects_after: after.clone(),
            used_search,
        };
        deps.sink.record(file, &record);
        history.push(record);

        defects = after;
    }

    let status = if defects.is_empty() {
        SessionStatus::Resolved
    } else {
        SessionStatus::AttemptsExhausted
    };
    finish(file, source, defects, history, status, reporter)
}

fn finish(
    file: &Path,
    final_content: String,
    remaining: DefectSet,
    attempts: Vec<AttemptRecord>,
    status: SessionStatus,
    reporter: &Reporter,
) -> SessionResult {
    let result = SessionResult {
        file: file.to_path_buf(),
        final_content,
        remaining,
        attempts,
        status,
    };
    reporter.terminal(&result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::defect::{Defect, DefectKind};
    use crate::synthesize::Synthesizer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns scripted defect sets pass by pass; the last entry repeats
    /// once the script runs out.
    struct ScriptedAnalyzer {
        script: Vec<DefectSet>,
        calls: AtomicUsize,
    }

    impl ScriptedAnalyzer {
        fn new(script: Vec<DefectSet>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Analyzer for ScriptedAnalyzer {
        async fn analyze(&self, _source: &str) -> DefectSet {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script[i.min(self.script.len() - 1)].clone()
        }
    }

    /// One patch per defect, recording the references each call received.
    struct ScriptedSynthesizer {
        fail: bool,
        calls: AtomicUsize,
        references_seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedSynthesizer {
        fn new() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
                references_seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        async fn synthesize(
            &self,
            _source: &str,
            defects: &DefectSet,
            references: &[String],
        ) -> Result<Vec<Patch>, CoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.references_seen
                .lock()
                .unwrap()
                .push(references.to_vec());
            if self.fail {
                return Err(CoreError::synthesis("backend unreachable"));
            }
            Ok(defects
                .iter()
                .map(|d| {
                    Patch::new(
                        d.clone(),
                        format!("attempt {} fix", call),
                        format!("content after call {}\n", call),
                    )
                })
                .collect())
        }
    }

    struct StaticProvider;

    #[async_trait]
    impl ReferenceProvider for StaticProvider {
        async fn search(&self, _query: &str, max_results: usize) -> Vec<String> {
            vec!["reference snippet".to_string(); max_results.min(1)]
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<AttemptRecord>>,
    }

    impl AttemptSink for CollectingSink {
        fn record(&self, _file: &Path, record: &AttemptRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn syntax_set() -> DefectSet {
        DefectSet::new(vec![Defect::new(
            DefectKind::Syntax,
            "unexpected EOF while parsing",
        )])
    }

    fn name_set() -> DefectSet {
        DefectSet::new(vec![Defect::new(DefectKind::Name, "name 'x' is not defined")])
    }

    fn options(max_attempts: u32) -> SessionOptions {
        SessionOptions {
            max_attempts,
            enable_search: false,
            num_search_results: 5,
            search_threshold: 5,
        }
    }

    fn deps(
        analyzer: ScriptedAnalyzer,
        synthesizer: Arc<ScriptedSynthesizer>,
        provider: Option<Arc<dyn ReferenceProvider>>,
        sink: Arc<dyn AttemptSink>,
    ) -> Collaborators {
        Collaborators {
            analyzer: Arc::new(analyzer),
            synthesizer,
            references: provider,
            sink,
        }
    }

    async fn run(
        deps: &Collaborators,
        opts: &SessionOptions,
    ) -> SessionResult {
        let (_tx, rx) = watch::channel(false);
        repair_file(
            Path::new("example.py"),
            "print(".to_string(),
            deps,
            opts,
            &rx,
            &Reporter::new(true),
        )
        .await
    }

    #[tokio::test]
    async fn test_clean_file_terminates_immediately() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![DefectSet::empty()]),
            synth.clone(),
            None,
            Arc::new(NullSink),
        );
        let result = run(&deps, &options(3)).await;

        assert_eq!(result.status, SessionStatus::NoErrorsFound);
        assert!(result.attempts.is_empty());
        assert_eq!(synth.call_count(), 0, "no synthesis after a clean scan");
    }

    #[tokio::test]
    async fn test_scenario_a_resolved_in_one_attempt() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![syntax_set(), DefectSet::empty()]),
            synth,
            None,
            Arc::new(NullSink),
        );
        let result = run(&deps, &options(3)).await;

        assert_eq!(result.status, SessionStatus::Resolved);
        assert_eq!(result.attempts.len(), 1);
        assert!(result.remaining.is_empty());
        assert_eq!(result.final_content, "content after call 1\n");
    }

    #[tokio::test]
    async fn test_scenario_b_search_on_fifth_call() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![name_set()]),
            synth.clone(),
            Some(Arc::new(StaticProvider)),
            Arc::new(NullSink),
        );
        let mut opts = options(6);
        opts.enable_search = true;
        opts.search_threshold = 5;
        let result = run(&deps, &opts).await;

        assert_eq!(result.status, SessionStatus::AttemptsExhausted);
        let seen = synth.references_seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        for call in &seen[..4] {
            assert!(call.is_empty(), "no references before the threshold");
        }
        assert!(!seen[4].is_empty(), "5th call must carry references");
        assert!(!seen[5].is_empty());
        drop(seen);

        assert!(!result.attempts[3].used_search);
        assert!(result.attempts[4].used_search);
    }

    #[tokio::test]
    async fn test_scenario_c_attempts_exhausted() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![syntax_set()]),
            synth,
            None,
            Arc::new(NullSink),
        );
        let result = run(&deps, &options(2)).await;

        assert_eq!(result.status, SessionStatus::AttemptsExhausted);
        assert_eq!(result.attempts.len(), 2);
        assert!(!result.remaining.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_d_synthesis_failure_commits_nothing() {
        let synth = Arc::new(ScriptedSynthesizer::failing());
        let sink = Arc::new(CollectingSink::default());
        let deps = deps(
            ScriptedAnalyzer::new(vec![syntax_set()]),
            synth,
            None,
            sink.clone(),
        );
        let result = run(&deps, &options(3)).await;

        assert_eq!(result.status, SessionStatus::SynthesisFailed);
        assert!(result.attempts.is_empty());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_chain_continuity() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![
                syntax_set(),
                name_set(),
                syntax_set(),
                DefectSet::empty(),
            ]),
            synth,
            None,
            Arc::new(NullSink),
        );
        let result = run(&deps, &options(5)).await;

        assert_eq!(result.status, SessionStatus::Resolved);
        assert_eq!(result.attempts.len(), 3);
        for pair in result.attempts.windows(2) {
            assert_eq!(pair[0].defects_after, pair[1].defects_before);
        }
        assert_eq!(
            result.attempts[0].defects_before,
            syntax_set(),
            "first record starts from the initial scan"
        );
    }

    #[tokio::test]
    async fn test_records_reach_sink_in_order() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let sink = Arc::new(CollectingSink::default());
        let deps = deps(
            ScriptedAnalyzer::new(vec![syntax_set()]),
            synth,
            None,
            sink.clone(),
        );
        let result = run(&deps, &options(3)).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), result.attempts.len());
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.attempt, i as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_a_distinct_terminal() {
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![syntax_set()]),
            synth.clone(),
            None,
            Arc::new(NullSink),
        );
        let (tx, rx) = watch::channel(true);
        let result = repair_file(
            Path::new("example.py"),
            "print(".to_string(),
            &deps,
            &options(3),
            &rx,
            &Reporter::new(true),
        )
        .await;
        drop(tx);

        assert_eq!(result.status, SessionStatus::Cancelled);
        assert!(result.attempts.is_empty());
        assert_eq!(synth.call_count(), 0);
    }

    #[tokio::test]
    async fn test_multi_defect_attempt_keeps_last_patch_content() {
        let two_defects = DefectSet::new(vec![
            Defect::new(DefectKind::Syntax, "unexpected EOF while parsing"),
            Defect::new(DefectKind::Name, "name 'x' is not defined"),
        ]);
        let synth = Arc::new(ScriptedSynthesizer::new());
        let deps = deps(
            ScriptedAnalyzer::new(vec![two_defects, DefectSet::empty()]),
            synth,
            None,
            Arc::new(NullSink),
        );
        let result = run(&deps, &options(3)).await;

        assert_eq!(result.status, SessionStatus::Resolved);
        // Both patches share the call's content; the record keeps the last
        assert_eq!(result.attempts[0].patch.target.kind, DefectKind::Name);
        assert_eq!(result.final_content, "content after call 1\n");
    }
}
