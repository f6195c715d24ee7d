//! Web search: lookup query → filtered [`SearchResultSet`].
//!
//! [`SearchClient`] returns the raw provider payload; [`filter_results`]
//! keeps only what the code-selection prompt needs (the answer box, plus an
//! allow-listed subset of each organic result in rank order). The filtered
//! set is transient and never written anywhere.

use crate::error::{CallError, SummaryError};
use crate::output::{OrganicResult, SearchResultSet};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the SerpAPI credential.
pub const SERPAPI_KEY_ENV: &str = "SERPAPI_API_KEY";

const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";

/// A web search endpoint.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run `query`, asking for up to `num_results` organic results.
    async fn search(&self, query: &str, num_results: usize) -> Result<Value, CallError>;
}

/// Google search through SerpAPI.
pub struct SerpApiClient {
    http_client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerpApiClient {
    pub fn new(api_key: impl Into<String>, timeout_secs: Option<u64>) -> Result<Self, SummaryError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http_client = builder
            .build()
            .map_err(|e| SummaryError::Internal(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            endpoint: SERPAPI_ENDPOINT.to_string(),
        })
    }

    /// Read the credential from [`SERPAPI_KEY_ENV`].
    pub fn from_env(timeout_secs: Option<u64>) -> Result<Self, SummaryError> {
        Self::from_key(std::env::var(SERPAPI_KEY_ENV).ok(), timeout_secs)
    }

    /// Build from an optional key; absent or blank means not configured.
    pub fn from_key(key: Option<String>, timeout_secs: Option<u64>) -> Result<Self, SummaryError> {
        match key {
            Some(key) if !key.trim().is_empty() => Self::new(key.trim(), timeout_secs),
            _ => Err(SummaryError::SearchNotConfigured {
                env_var: SERPAPI_KEY_ENV,
            }),
        }
    }
}

#[async_trait]
impl SearchClient for SerpApiClient {
    async fn search(&self, query: &str, num_results: usize) -> Result<Value, CallError> {
        debug!("Searching: {:?}", query);
        let num = num_results.to_string();

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout {
                        detail: e.to_string(),
                    }
                } else {
                    CallError::Connection {
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CallError::Connection {
            detail: e.to_string(),
        })?;

        if status.as_u16() == 429 {
            return Err(CallError::RateLimited { detail: body });
        }
        if !status.is_success() {
            return Err(CallError::Status {
                status: status.as_u16(),
                detail: body,
            });
        }

        let payload: Value = serde_json::from_str(&body).map_err(|e| CallError::Malformed {
            detail: format!("search payload is not JSON: {e}"),
        })?;

        match payload.get("error").and_then(Value::as_str) {
            // SerpAPI reports a query with no hits as an error.
            Some(msg) if msg.contains("hasn't returned any results") => {
                Ok(Value::Object(Default::default()))
            }
            Some(msg) => Err(CallError::Provider {
                detail: msg.to_string(),
            }),
            None => Ok(payload),
        }
    }
}

/// Keep the answer box and the allow-listed organic-result fields.
///
/// Organic results are ordered by `position` when present; results without
/// one keep their payload order after the ranked ones.
pub fn filter_results(payload: &Value) -> SearchResultSet {
    let answer_box = payload
        .get("answer_box")
        .filter(|v| !v.is_null())
        .cloned();

    let mut organic_results: Vec<OrganicResult> = payload
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|results| results.iter().map(organic_result).collect())
        .unwrap_or_default();
    organic_results.sort_by_key(|r| r.position.unwrap_or(u32::MAX));

    SearchResultSet {
        answer_box,
        organic_results,
    }
}

fn organic_result(v: &Value) -> OrganicResult {
    let text = |key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
    OrganicResult {
        position: v
            .get("position")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok()),
        title: text("title"),
        link: text("link"),
        snippet: text("snippet"),
        snippet_highlighted_words: v
            .get("snippet_highlighted_words")
            .and_then(Value::as_array)
            .map(|words| {
                words
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        cached_page_link: text("cached_page_link"),
        source: text("source"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_only_allow_listed_fields_in_rank_order() {
        let payload = json!({
            "search_metadata": {"id": "abc"},
            "answer_box": {"type": "organic_result", "title": "M54.2 Cervicalgia"},
            "organic_results": [
                {"position": 2, "title": "B", "link": "https://b", "thumbnail": "x", "snippet": "S13.4"},
                {"position": 1, "title": "A", "link": "https://a", "snippet": "M54.2",
                 "snippet_highlighted_words": ["M54.2"], "source": "icd10data", "rich_snippet": {}}
            ],
            "related_questions": []
        });
        let set = filter_results(&payload);
        assert!(set.answer_box.is_some());
        assert_eq!(set.organic_results.len(), 2);
        assert_eq!(set.organic_results[0].title.as_deref(), Some("A"));
        assert_eq!(set.organic_results[0].snippet_highlighted_words, vec!["M54.2"]);

        let serialised = serde_json::to_value(&set).unwrap();
        assert!(serialised["organic_results"][1].get("thumbnail").is_none());
        assert!(serialised.get("search_metadata").is_none());
    }

    #[test]
    fn empty_payload_is_empty_set() {
        assert!(filter_results(&json!({})).is_empty());
        assert!(filter_results(&json!({"answer_box": null, "organic_results": []})).is_empty());
    }

    #[test]
    fn missing_or_blank_key_is_not_configured() {
        for key in [None, Some("   ".to_string())] {
            assert!(matches!(
                SerpApiClient::from_key(key, None),
                Err(SummaryError::SearchNotConfigured { .. })
            ));
        }
        assert!(SerpApiClient::from_key(Some("k".to_string()), Some(5)).is_ok());
    }
}
