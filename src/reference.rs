//! Reference search
//!
//! Best-effort context enrichment for a stuck repair: a recurring defect is
//! turned into a query, and a handful of short snippets come back to be
//! appended to the next synthesis prompt. Search is never a correctness
//! dependency - every failure path, including a disabled or unreachable
//! provider, is an empty result set.

use crate::defect::Defect;
use crate::util::{collapse_whitespace, truncate};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const SEARCH_URL: &str = "https://api.duckduckgo.com/";
const MAX_QUERY_CHARS: usize = 180;
const MAX_SNIPPET_CHARS: usize = 300;

#[async_trait]
pub trait ReferenceProvider: Send + Sync {
    /// Fetch up to `max_results` short textual snippets for a query.
    /// Returns an empty vec on any provider error.
    async fn search(&self, query: &str, max_results: usize) -> Vec<String>;
}

/// Build a search query from the defect the loop is stuck on.
pub fn derive_query(defect: &Defect) -> String {
    truncate(
        &format!("python {}", collapse_whitespace(&defect.raw)),
        MAX_QUERY_CHARS,
    )
}

/// DuckDuckGo instant-answer client. No API key, JSON over GET.
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReferenceProvider for DuckDuckGoProvider {
    async fn search(&self, query: &str, max_results: usize) -> Vec<String> {
        if max_results == 0 {
            return Vec::new();
        }

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };

        match response.json::<InstantAnswer>().await {
            Ok(answer) => answer.snippets(max_results),
            Err(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
    /// Disambiguation groups nest one level deeper
    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

impl InstantAnswer {
    fn snippets(&self, max_results: usize) -> Vec<String> {
        let mut out = Vec::new();

        if !self.abstract_text.trim().is_empty() {
            out.push(truncate(self.abstract_text.trim(), MAX_SNIPPET_CHARS));
        }

        collect_topics(&self.related_topics, &mut out, max_results);
        out.truncate(max_results);
        out
    }
}

fn collect_topics(topics: &[RelatedTopic], out: &mut Vec<String>, max_results: usize) {
    for topic in topics {
        if out.len() >= max_results {
            return;
        }
        if !topic.text.trim().is_empty() {
            let snippet = match Url::parse(&topic.first_url) {
                Ok(link) => format!("{} ({})", topic.text.trim(), link),
                Err(_) => topic.text.trim().to_string(),
            };
            out.push(truncate(&snippet, MAX_SNIPPET_CHARS));
        }
        collect_topics(&topic.topics, out, max_results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::DefectKind;

    #[test]
    fn test_derive_query_is_bounded_and_flat() {
        let defect = Defect::new(DefectKind::Name, "name  'x'\nis not defined");
        let query = derive_query(&defect);
        assert_eq!(query, "python NameError: name 'x' is not defined");
        assert!(query.chars().count() <= MAX_QUERY_CHARS);
    }

    #[test]
    fn test_snippets_flatten_nested_topics() {
        let raw = r#"{
            "AbstractText": "Parentheses must balance.",
            "RelatedTopics": [
                {"Text": "SyntaxError basics", "FirstURL": "https://example.com/a"},
                {"Topics": [{"Text": "Nested answer", "FirstURL": "not a url"}]}
            ]
        }"#;
        let answer: InstantAnswer = serde_json::from_str(raw).unwrap();
        let snippets = answer.snippets(5);
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0], "Parentheses must balance.");
        assert!(snippets[1].contains("https://example.com/a"));
        assert_eq!(snippets[2], "Nested answer");
    }

    #[test]
    fn test_snippets_respect_max_results() {
        let raw = r#"{
            "RelatedTopics": [
                {"Text": "one"}, {"Text": "two"}, {"Text": "three"}
            ]
        }"#;
        let answer: InstantAnswer = serde_json::from_str(raw).unwrap();
        assert_eq!(answer.snippets(2).len(), 2);
    }

    #[test]
    fn test_empty_answer_yields_no_snippets() {
        let answer: InstantAnswer = serde_json::from_str("{}").unwrap();
        assert!(answer.snippets(5).is_empty());
    }
}
