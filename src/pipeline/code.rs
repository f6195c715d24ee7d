//! Code resolution: lookup query → search → one ICD-10 code.
//!
//! Two sub-steps, both of which must succeed for a record to exist:
//!
//! 1. [`CodeResolver::search`] runs the query and filters the payload.
//! 2. [`CodeResolver::select`] asks the query model to pick the code.
//!
//! The model's pick is validated against the code pattern; an invalid pick
//! counts as no pick, and no pick stays empty. When the model did pick, an
//! answer-box field that names the diagnosis next to exactly one code
//! outranks a different pick. An empty result set yields an empty code
//! without calling the model.

use crate::config::RetryPolicy;
use crate::error::{CallError, Stage};
use crate::output::{SearchResultSet, TokenUsage};
use crate::pipeline::llm::{call_json, InferenceClient, InferenceRequest};
use crate::pipeline::search::{filter_results, SearchClient};
use crate::prompts::{code_user_message, CODE_SYSTEM_PROMPT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One letter, two or more digits, optional decimal part.
static RE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]\d{2,}(\.\d+)?$").unwrap());

/// Same shape, found inside free text.
static RE_CODE_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]\d{2,}(?:\.\d+)?)\b").unwrap());

#[derive(Debug, Deserialize)]
struct CodeAnswer {
    #[serde(default)]
    code: String,
}

/// Whether `code` has the classification-code shape.
pub fn is_valid_code(code: &str) -> bool {
    RE_CODE.is_match(code)
}

/// The code an answer-box field gives for `diagnosis`, if any.
///
/// Only a string field that contains the diagnosis text (ASCII
/// case-insensitive) counts, and only when exactly one distinct code
/// appears in it outside the diagnosis text itself. "Vitamin B12
/// deficiency anemia is coded D51.9" yields `D51.9`, not `B12`.
pub fn answer_box_code(answer_box: &Value, diagnosis: &str) -> Option<String> {
    let needle = diagnosis.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    walk_answer_box(answer_box, &needle)
}

fn walk_answer_box(v: &Value, needle: &str) -> Option<String> {
    match v {
        Value::String(s) => code_beside_diagnosis(s, needle),
        Value::Array(items) => items.iter().find_map(|item| walk_answer_box(item, needle)),
        Value::Object(map) => {
            // Headline fields first; they name the code rather than mention it.
            for key in ["answer", "title", "snippet"] {
                if let Some(code) = map.get(key).and_then(|f| walk_answer_box(f, needle)) {
                    return Some(code);
                }
            }
            map.values().find_map(|f| walk_answer_box(f, needle))
        }
        _ => None,
    }
}

fn code_beside_diagnosis(field: &str, needle: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `field`.
    let lower = field.to_ascii_lowercase();
    if !lower.contains(needle) {
        return None;
    }
    let mut rest = String::with_capacity(field.len());
    let mut last = 0;
    for (start, _) in lower.match_indices(needle) {
        rest.push_str(&field[last..start]);
        rest.push(' ');
        last = start + needle.len();
    }
    rest.push_str(&field[last..]);

    let mut codes: Vec<&str> = RE_CODE_IN_TEXT
        .captures_iter(&rest)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    codes.sort_unstable();
    codes.dedup();
    match codes.as_slice() {
        [one] => Some(one.to_string()),
        _ => None,
    }
}

/// Searches for and selects the classification code.
#[derive(Clone)]
pub struct CodeResolver {
    search: Arc<dyn SearchClient>,
    client: Arc<dyn InferenceClient>,
    model: String,
    num_results: usize,
    temperature: f32,
    max_tokens: usize,
    policy: RetryPolicy,
}

impl CodeResolver {
    pub fn new(
        search: Arc<dyn SearchClient>,
        client: Arc<dyn InferenceClient>,
        model: impl Into<String>,
        num_results: usize,
        temperature: f32,
        max_tokens: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            search,
            client,
            model: model.into(),
            num_results,
            temperature,
            max_tokens,
            policy,
        }
    }

    /// Run the lookup query and filter the payload.
    pub async fn search(&self, query: &str) -> Result<SearchResultSet, CallError> {
        let payload = self.search.search(query, self.num_results).await?;
        let results = filter_results(&payload);
        debug!(
            "Search returned {} organic results{}",
            results.organic_results.len(),
            if results.answer_box.is_some() { " + answer box" } else { "" }
        );
        Ok(results)
    }

    /// Pick the code for `diagnosis` (searched as `query`) from `results`.
    ///
    /// Returns an empty string when no code qualifies.
    pub async fn select(
        &self,
        query: &str,
        diagnosis: &str,
        results: &SearchResultSet,
    ) -> Result<(String, TokenUsage), CallError> {
        if results.is_empty() {
            debug!("No search results; skipping code selection");
            return Ok((String::new(), TokenUsage::default()));
        }

        let results_json = serde_json::to_string_pretty(results).map_err(|e| CallError::Provider {
            detail: format!("cannot serialise search results: {e}"),
        })?;

        let request = InferenceRequest {
            stage: Stage::CodeResolution,
            model: self.model.clone(),
            system_prompt: CODE_SYSTEM_PROMPT.to_string(),
            user_messages: vec![code_user_message(query, &results_json)],
            image: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output: true,
        };

        let (answer, usage): (CodeAnswer, TokenUsage) =
            call_json(self.client.as_ref(), &request, &self.policy).await?;

        let mut code = answer.code.trim().to_uppercase();
        if !code.is_empty() && !is_valid_code(&code) {
            warn!("Discarding malformed code {:?}", code);
            code.clear();
        }

        if code.is_empty() {
            return Ok((code, usage));
        }
        let boxed = results
            .answer_box
            .as_ref()
            .and_then(|ab| answer_box_code(ab, diagnosis));
        if let Some(boxed) = boxed {
            if boxed != code {
                warn!("Answer box code {} overrides model pick {}", boxed, code);
                code = boxed;
            }
        }

        Ok((code, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OrganicResult;
    use crate::pipeline::llm::InferenceResponse;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Picks {
        answer: &'static str,
        calls: AtomicUsize,
    }

    impl Picks {
        fn new(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl InferenceClient for Picks {
        async fn complete(&self, r: &InferenceRequest) -> Result<InferenceResponse, CallError> {
            assert_eq!(r.stage, Stage::CodeResolution);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InferenceResponse {
                content: self.answer.to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct NoSearch;

    #[async_trait::async_trait]
    impl SearchClient for NoSearch {
        async fn search(&self, _q: &str, _n: usize) -> Result<Value, CallError> {
            Ok(json!({}))
        }
    }

    fn resolver(client: Arc<Picks>) -> CodeResolver {
        CodeResolver::new(Arc::new(NoSearch), client, "q", 10, 0.0, 256, RetryPolicy::NONE)
    }

    fn organic(position: u32, snippet: &str) -> OrganicResult {
        OrganicResult {
            position: Some(position),
            snippet: Some(snippet.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn code_pattern() {
        for ok in ["M54.2", "J20.9", "S13.4", "R51", "T14.90"] {
            assert!(is_valid_code(ok), "{ok}");
        }
        for bad in ["", "M5", "54.2", "m54.2", "M54.", "ICD M54.2"] {
            assert!(!is_valid_code(bad), "{bad}");
        }
    }

    #[tokio::test]
    async fn empty_results_skip_inference() {
        let client = Picks::new(r#"{"code": "J20.9"}"#);
        let (code, _) = resolver(client.clone())
            .select("ICD-10 code for x", "x", &SearchResultSet::default())
            .await
            .unwrap();
        assert_eq!(code, "");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answer_box_wins_over_model_pick() {
        let client = Picks::new(r#"{"code": "J40"}"#);
        let results = SearchResultSet {
            answer_box: Some(json!({"title": "ICD-10-CM Code J20.9 Acute bronchitis, unspecified"})),
            organic_results: vec![organic(1, "J40 Bronchitis, not specified")],
        };
        let (code, _) = resolver(client)
            .select("ICD-10 code for Acute bronchitis", "Acute bronchitis", &results)
            .await
            .unwrap();
        assert_eq!(code, "J20.9");
    }

    #[tokio::test]
    async fn malformed_pick_becomes_empty() {
        let client = Picks::new(r#"{"code": "probably bronchitis"}"#);
        let results = SearchResultSet {
            answer_box: None,
            organic_results: vec![organic(1, "nothing useful")],
        };
        let (code, _) = resolver(client).select("q", "Cervicalgia", &results).await.unwrap();
        assert_eq!(code, "");
    }

    #[tokio::test]
    async fn lowercase_pick_is_normalised() {
        let client = Picks::new(r#"{"code": " m54.2 "}"#);
        let results = SearchResultSet {
            answer_box: None,
            organic_results: vec![organic(1, "M54.2 Cervicalgia")],
        };
        let (code, _) = resolver(client).select("q", "Cervicalgia", &results).await.unwrap();
        assert_eq!(code, "M54.2");
    }

    #[tokio::test]
    async fn empty_pick_is_not_filled_from_answer_box() {
        let client = Picks::new(r#"{"code": ""}"#);
        let results = SearchResultSet {
            answer_box: Some(json!({"title": "ICD-10-CM Code M54.2 Cervicalgia"})),
            organic_results: vec![organic(1, "M54.2 Cervicalgia")],
        };
        let (code, _) = resolver(client)
            .select("ICD-10 code for Acute bronchitis", "Acute bronchitis", &results)
            .await
            .unwrap();
        assert_eq!(code, "");
    }

    #[tokio::test]
    async fn code_inside_diagnosis_text_does_not_override() {
        let client = Picks::new(r#"{"code": "D51.9"}"#);
        let results = SearchResultSet {
            answer_box: Some(json!({"answer": "Vitamin B12 deficiency anemia is coded D51.9"})),
            organic_results: vec![organic(1, "D51.9 Vitamin B12 deficiency anemia, unspecified")],
        };
        let (code, _) = resolver(client)
            .select(
                "ICD-10 code for Vitamin B12 deficiency anemia",
                "Vitamin B12 deficiency anemia",
                &results,
            )
            .await
            .unwrap();
        assert_eq!(code, "D51.9");
    }

    #[tokio::test]
    async fn unrelated_answer_box_keeps_model_pick() {
        let client = Picks::new(r#"{"code": "J20.9"}"#);
        let results = SearchResultSet {
            answer_box: Some(json!({"title": "M54.2 Cervicalgia"})),
            organic_results: vec![organic(1, "J20.9 Acute bronchitis, unspecified")],
        };
        let (code, _) = resolver(client)
            .select("ICD-10 code for Acute bronchitis", "Acute bronchitis", &results)
            .await
            .unwrap();
        assert_eq!(code, "J20.9");
    }

    #[test]
    fn answer_box_code_needs_the_diagnosis() {
        let ab = json!({"type": "organic", "snippet": "see also R05", "title": "M54.2 Cervicalgia"});
        assert_eq!(answer_box_code(&ab, "cervicalgia").as_deref(), Some("M54.2"));
        assert_eq!(answer_box_code(&ab, "Acute bronchitis"), None);
        assert_eq!(answer_box_code(&json!({"title": "Cervicalgia"}), "Cervicalgia"), None);
        let two = json!({"answer": "Cervicalgia: M54.2 (was M54.1)"});
        assert_eq!(answer_box_code(&two, "Cervicalgia"), None);
    }
}
