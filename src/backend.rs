//! Model backends
//!
//! One capability behind one trait: text completion given a system and user
//! prompt. Three implementations - an OpenAI-style chat-completions endpoint
//! (works for OpenAI proper and compatible gateways via `base_url`), a
//! local-hosted Ollama server, and vendor-hosted Gemini. The session
//! controller never knows which one it is talking to.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Completion budget for repair prompts, shared by all backends
const MAX_COMPLETION_TOKENS: u32 = 8192;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000; // 2 seconds
const BACKOFF_MULTIPLIER: u64 = 2; // Exponential backoff

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short backend name for progress output and error messages
    fn name(&self) -> &'static str;

    /// The model this backend is configured to call
    fn model(&self) -> &str;

    /// Send one prompt pair and return the completion text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

// ─── OpenAI-style chat completions ──────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Deserialize)]
struct ChatMessageContent {
    content: String,
}

pub struct OpenAiBackend {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("failed to parse chat completion response: {}", e)
                })?;
                return parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .ok_or_else(|| anyhow::anyhow!("empty chat completion response"));
            }

            // Rate limits get retried with backoff; everything else is final
            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                eprintln!(
                    "  {} rate limited. Retrying in {}s (attempt {}/{})",
                    self.name(),
                    retry_after,
                    retry_count,
                    MAX_RETRIES
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(status_error(self.name(), status.as_u16(), retry_count, &text));
        }
    }
}

// ─── Local-hosted Ollama ────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaBackend {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: user.to_string(),
            system: system.to_string(),
            stream: false,
        };

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            anyhow::anyhow!("ollama server unreachable at {}: {}", self.base_url, e)
        })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(self.name(), status.as_u16(), 0, &text));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse ollama response: {}", e))?;
        Ok(parsed.response)
    }
}

// ─── Vendor-hosted Gemini ───────────────────────────────────────────────────

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Serialize)]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

pub struct GeminiBackend {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model, self.api_key
        );
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(self.name(), status.as_u16(), 0, &text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse gemini response: {}", e))?;
        let content = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(anyhow::anyhow!("empty gemini response"));
        }
        Ok(content)
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────────

/// Extract a retry-after hint from a rate-limit response body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    // Look for patterns like "retry after X seconds" or "wait X seconds"
    let text_lower = text.to_lowercase();
    if let Some(pos) = text_lower.find("retry") {
        let after_retry = &text_lower[pos..];
        for word in after_retry.split_whitespace().skip(1).take(5) {
            if let Ok(secs) = word
                .trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
            {
                if secs > 0 && secs < 300 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

fn status_error(backend: &str, status: u16, retries: u32, body: &str) -> anyhow::Error {
    let message = match status {
        401 | 403 => format!("{}: invalid or missing API key", backend),
        429 => format!(
            "{}: rate limited after {} retries. Try again in a few minutes.",
            backend, retries
        ),
        500..=599 => format!(
            "{}: server error ({}). The service may be temporarily unavailable.",
            backend, status
        ),
        _ => format!(
            "{}: API error {}: {}",
            backend,
            status,
            crate::util::truncate(body, 200)
        ),
    };
    anyhow::anyhow!("{}", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_finds_seconds() {
        assert_eq!(parse_retry_after("please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("Retry-After: 5"), Some(5));
    }

    #[test]
    fn test_parse_retry_after_ignores_noise() {
        assert_eq!(parse_retry_after("rate limit exceeded"), None);
        assert_eq!(parse_retry_after("retry after 900 seconds"), None);
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"fixed"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "fixed");
    }

    #[test]
    fn test_gemini_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let joined: String = parsed.candidates[0]
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(joined, "ab");
    }

    #[test]
    fn test_ollama_response_parsing() {
        let raw = r#"{"model":"llama3","response":"done","done":true}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.response, "done");
    }

    #[test]
    fn test_status_error_maps_auth() {
        let err = status_error("openai", 401, 0, "");
        assert!(err.to_string().contains("API key"));
    }
}
