//! Append-only attempt log
//!
//! Persists every committed AttemptRecord as one JSONL line under
//! `<code_dir>/.remedy/`, one file per run, named after the run's start
//! time. Writes take an advisory lock so concurrent file sessions interleave
//! whole lines. Log failures are reported but never interrupt a repair -
//! the audit trail is best-effort, the loop is not.

use crate::session::{AttemptRecord, AttemptSink};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LOG_DIR: &str = ".remedy";

/// One logged attempt, in creation order
#[derive(Debug, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub session: Uuid,
    pub file: PathBuf,
    #[serde(flatten)]
    pub record: AttemptRecord,
}

pub struct Logbook {
    path: PathBuf,
    session: Uuid,
}

impl Logbook {
    /// Create the log directory and pick this run's log file name.
    pub fn open(code_dir: &Path) -> anyhow::Result<Self> {
        let dir = code_dir.join(LOG_DIR);
        fs::create_dir_all(&dir)?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("session-{}.jsonl", stamp));

        Ok(Self {
            path,
            session: Uuid::new_v4(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, file: &Path, record: &AttemptRecord) -> anyhow::Result<()> {
        let line = LogLine {
            timestamp: Utc::now(),
            session: self.session,
            file: file.to_path_buf(),
            record: record.clone(),
        };

        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        out.lock_exclusive()?;
        let written = writeln!(out, "{}", serde_json::to_string(&line)?);
        let _ = fs2::FileExt::unlock(&out);
        written?;
        Ok(())
    }
}

impl AttemptSink for Logbook {
    fn record(&self, file: &Path, record: &AttemptRecord) {
        if let Err(e) = self.append(file, record) {
            eprintln!("  Warning: failed to write attempt log: {}", e);
        }
    }
}
