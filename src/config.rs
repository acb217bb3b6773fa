//! Run configuration
//!
//! Everything the core needs arrives here as already-resolved values: the
//! target directory, the loop budgets, and which model backend to build.
//! Validation happens once, before any file is processed - a bad
//! configuration fails the whole run up front. API keys resolve from the
//! environment first, then from `~/.config/remedy/config.json`.

use crate::backend::{GeminiBackend, ModelBackend, OllamaBackend, OpenAiBackend};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_NUM_SEARCH_URLS: usize = 5;
pub const DEFAULT_SEARCH_THRESHOLD: u32 = 5;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Which model backend family to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Ollama,
    Gemini,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(BackendKind::OpenAi),
            "ollama" => Ok(BackendKind::Ollama),
            "gemini" => Ok(BackendKind::Gemini),
            other => Err(CoreError::config(format!(
                "unsupported backend '{}' (expected openai, ollama, or gemini)",
                other
            ))),
        }
    }
}

/// Backend selection plus the vendor-specific knobs it needs
#[derive(Debug, Clone)]
pub enum BackendChoice {
    OpenAi { model: String, base_url: String },
    Ollama { model: String, base_url: String },
    Gemini { model: String },
}

impl BackendChoice {
    /// Construct the backend, resolving any credential it requires.
    /// A missing credential is a configuration error - the run must fail
    /// before any file is processed, not on the first synthesis call.
    pub fn build(&self) -> Result<Arc<dyn ModelBackend>, CoreError> {
        match self {
            BackendChoice::OpenAi { model, base_url } => {
                let key = resolve_api_key(
                    std::env::var("OPENAI_API_KEY").ok(),
                    AppConfig::load().openai_api_key,
                )
                .ok_or_else(|| {
                    CoreError::config(
                        "OPENAI_API_KEY not set and no key in the remedy config file",
                    )
                })?;
                Ok(Arc::new(OpenAiBackend::new(
                    model.clone(),
                    base_url.clone(),
                    key,
                )))
            }
            BackendChoice::Ollama { model, base_url } => {
                Ok(Arc::new(OllamaBackend::new(model.clone(), base_url.clone())))
            }
            BackendChoice::Gemini { model } => {
                let key = resolve_api_key(
                    std::env::var("GEMINI_API_KEY").ok(),
                    AppConfig::load().gemini_api_key,
                )
                .ok_or_else(|| {
                    CoreError::config(
                        "GEMINI_API_KEY not set and no key in the remedy config file",
                    )
                })?;
                Ok(Arc::new(GeminiBackend::new(model.clone(), key)))
            }
        }
    }
}

/// Environment wins over the config file; empty strings count as unset.
fn resolve_api_key(env_value: Option<String>, file_value: Option<String>) -> Option<String> {
    env_value
        .filter(|k| !k.trim().is_empty())
        .or_else(|| file_value.filter(|k| !k.trim().is_empty()))
}

/// One run's worth of settings, fully resolved before the loop starts
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub code_dir: PathBuf,
    pub max_attempts: u32,
    /// Explicit targets relative to `code_dir`; `None` means discover all
    pub files_to_debug: Option<Vec<PathBuf>>,
    pub enable_internet_search: bool,
    pub num_search_urls: usize,
    pub internet_search_threshold: u32,
    pub backend: BackendChoice,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.code_dir.is_dir() {
            return Err(CoreError::config(format!(
                "code_dir does not exist or is not a directory: {}",
                self.code_dir.display()
            )));
        }

        if self.max_attempts < 1 {
            return Err(CoreError::config("max_attempts must be at least 1"));
        }

        if self.internet_search_threshold < 1 {
            return Err(CoreError::config(
                "internet_search_threshold must be at least 1",
            ));
        }

        if let Some(files) = &self.files_to_debug {
            if files.is_empty() {
                return Err(CoreError::config("files_to_debug given but empty"));
            }
            for file in files {
                check_target_path(&self.code_dir, file)?;
            }
        }

        Ok(())
    }
}

/// Explicit targets must be relative, traversal-free, and present.
fn check_target_path(code_dir: &Path, candidate: &Path) -> Result<(), CoreError> {
    if candidate.is_absolute() {
        return Err(CoreError::config(format!(
            "files_to_debug entries must be relative to code_dir: {}",
            candidate.display()
        )));
    }

    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(CoreError::config(format!(
            "parent traversal is not allowed: {}",
            candidate.display()
        )));
    }

    if !code_dir.join(candidate).is_file() {
        return Err(CoreError::config(format!(
            "file not found under code_dir: {}",
            candidate.display()
        )));
    }

    Ok(())
}

/// Persistent user settings (API keys only, for now).
/// Stored in ~/.config/remedy/config.json.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl AppConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remedy").join("config.json"))
    }

    /// Load from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        eprintln!(
                            "  Warning: config file was corrupted ({}). Using defaults.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }
}
