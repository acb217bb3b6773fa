//! Human-readable progress output
//!
//! Every observable step of a repair session goes through here: defects
//! found, fixes applied with their explanations, attempt outcomes, and the
//! terminal status per file. Output is plain lines on stdout so runs are
//! easy to tee into CI logs.

use crate::defect::DefectSet;
use crate::session::{SessionResult, SessionStatus};
use std::path::Path;

impl SessionStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            SessionStatus::NoErrorsFound | SessionStatus::Resolved => "+",
            SessionStatus::AttemptsExhausted | SessionStatus::SynthesisFailed => "●",
            SessionStatus::Cancelled => "·",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    pub quiet: bool,
}

impl Reporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn emit(&self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    pub fn backend(&self, name: &str, model: &str) {
        self.emit(&format!("Using {} backend (model: {})", name, model));
    }

    pub fn scanning(&self, file: &Path) {
        self.emit(&format!("Scanning {} for errors...", file.display()));
    }

    pub fn clean(&self, file: &Path) {
        self.emit(&format!("  + {}: no errors found", file.display()));
    }

    pub fn defects_found(&self, file: &Path, defects: &DefectSet) {
        self.emit(&format!(
            "  {} error(s) in {}:",
            defects.len(),
            file.display()
        ));
        for defect in defects {
            self.emit(&format!("    - {}", defect));
        }
    }

    pub fn searching(&self, query: &str) {
        self.emit(&format!("  Searching references: {}", query));
    }

    pub fn fix_applied(&self, attempt: u32, explanation: &str) {
        self.emit(&format!("  [attempt {}] {}", attempt, explanation));
    }

    pub fn attempt_outcome(&self, attempt: u32, remaining: &DefectSet) {
        if remaining.is_empty() {
            self.emit(&format!("  [attempt {}] clean", attempt));
        } else {
            self.emit(&format!(
                "  [attempt {}] {} error(s) remain",
                attempt,
                remaining.len()
            ));
        }
    }

    pub fn terminal(&self, result: &SessionResult) {
        self.emit(&format!(
            "  {} {}: {} ({} attempt(s))",
            result.status.icon(),
            result.file.display(),
            result.status.label(),
            result.attempts.len()
        ));
    }

    pub fn warning(&self, message: &str) {
        eprintln!("  Warning: {}", message);
    }
}
