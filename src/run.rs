//! Run driver
//!
//! Builds the collaborators from a validated configuration, fans the target
//! files out as independent sessions, and gathers one SessionResult per
//! file. Sessions share nothing mutable; the only process-wide resource is
//! the model backend, and the synthesizer's semaphore keeps in-flight
//! completions bounded.

use crate::analyzer::PythonAnalyzer;
use crate::config::RunConfig;
use crate::error::CoreError;
use crate::logbook::Logbook;
use crate::reference::{DuckDuckGoProvider, ReferenceProvider};
use crate::report::Reporter;
use crate::scan;
use crate::session::{self, AttemptSink, Collaborators, NullSink, SessionOptions, SessionResult};
use crate::synthesize::FixSynthesizer;
use futures::future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Upper bound on concurrent model calls across all file sessions
const MAX_IN_FLIGHT_COMPLETIONS: usize = 4;

pub struct RunSummary {
    /// One result per targeted file, in input order
    pub results: Vec<SessionResult>,
    pub log_path: Option<PathBuf>,
}

impl RunSummary {
    /// The run's failure signal: true only when files were targeted and
    /// none of them ended clean.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| !r.status.is_clean())
    }
}

/// Execute a full repair run to completion or cancellation.
pub async fn run(
    config: RunConfig,
    reporter: Reporter,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary, CoreError> {
    config.validate()?;
    let backend = config.backend.build()?;
    reporter.backend(backend.name(), backend.model());

    let files = scan::discover_files(&config.code_dir, config.files_to_debug.as_deref());
    if files.is_empty() {
        reporter.warning(&format!(
            "no source files found under {}",
            config.code_dir.display()
        ));
    }

    // The attempt log is best-effort; a run without one still repairs
    let mut log_path = None;
    let sink: Arc<dyn AttemptSink> = match Logbook::open(&config.code_dir) {
        Ok(logbook) => {
            log_path = Some(logbook.path().to_path_buf());
            Arc::new(logbook)
        }
        Err(e) => {
            reporter.warning(&format!("attempt log disabled: {}", e));
            Arc::new(NullSink)
        }
    };

    let references: Option<Arc<dyn ReferenceProvider>> = if config.enable_internet_search {
        Some(Arc::new(DuckDuckGoProvider::new()))
    } else {
        None
    };

    let deps = Arc::new(Collaborators {
        analyzer: Arc::new(PythonAnalyzer::new()),
        synthesizer: Arc::new(FixSynthesizer::new(backend, MAX_IN_FLIGHT_COMPLETIONS)),
        references,
        sink,
    });

    let opts = SessionOptions {
        max_attempts: config.max_attempts,
        enable_search: config.enable_internet_search,
        num_search_results: config.num_search_urls,
        search_threshold: config.internet_search_threshold,
    };

    // Unreadable discovered files are skipped with a warning; explicitly
    // listed files were already checked by validation
    let mut targets = Vec::new();
    for file in files {
        match std::fs::read_to_string(config.code_dir.join(&file)) {
            Ok(source) => targets.push((file, source)),
            Err(e) => reporter.warning(&format!("skipping {}: {}", file.display(), e)),
        }
    }

    let results = run_sessions(targets, deps, opts, cancel, reporter).await;
    Ok(RunSummary { results, log_path })
}

/// Drive one independent session per target and collect results in input
/// order. Split out from `run` so tests can inject collaborators.
async fn run_sessions(
    targets: Vec<(PathBuf, String)>,
    deps: Arc<Collaborators>,
    opts: SessionOptions,
    cancel: watch::Receiver<bool>,
    reporter: Reporter,
) -> Vec<SessionResult> {
    let mut tasks = Vec::new();

    for (file, source) in targets {
        let deps = deps.clone();
        let opts = opts.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            session::repair_file(&file, source, &deps, &opts, &cancel, &reporter).await
        }));
    }

    future::join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok())
        .collect()
}
