//! Error taxonomy for the repair loop
//!
//! Only two failures escape the data model: a synthesis call that cannot
//! produce patches (fatal to the file's session) and invalid run
//! configuration (fatal to the whole run). Analyzer degradation is expressed
//! as a `Defect` and reference-search failure as an empty result set, so
//! neither appears here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The model backend was unreachable or returned an unusable response.
    /// Ends the current file's session; other files continue.
    #[error("synthesis unavailable: {reason}")]
    SynthesisUnavailable { reason: String },

    /// Invalid run configuration. Reported before any file is processed.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl CoreError {
    pub fn synthesis(reason: impl Into<String>) -> Self {
        CoreError::SynthesisUnavailable {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        CoreError::Configuration {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn test_display_includes_reason() {
        let err = CoreError::synthesis("backend returned 401");
        assert_eq!(err.to_string(), "synthesis unavailable: backend returned 401");

        let err = CoreError::config("code_dir does not exist");
        assert!(err.to_string().contains("code_dir does not exist"));
    }
}
