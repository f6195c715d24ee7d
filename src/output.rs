//! Data model shared by the pipeline stages and the batch output.
//!
//! Every type here is immutable once produced: stages take ownership of
//! their input and hand a new value to the next stage.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured content of one page, as returned by the page extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    /// Page header text, if the page has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Main text; hierarchy is expressed with leading dashes.
    pub content: String,
    /// Page footer text, if the page has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    /// 1-based page number in the source PDF.
    pub page_number: usize,
}

/// One document's pages reconciled into a single markdown text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedDocument {
    pub markdown: String,
}

/// Fields the metadata extractor pulls from a combined document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitMetadata {
    #[serde(default)]
    pub date_of_visit: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub query: String,
}

/// One row of the injury summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjuryRecord {
    /// `YYYY-MM-DD`.
    pub date_of_visit: String,
    pub diagnosis: String,
    /// `<document-name> - p. <page>`.
    pub reference: String,
    pub icd10_code: String,
}

/// Filtered web search payload handed to the code selector.
///
/// Only the answer box and an allow-listed subset of each organic result
/// survive; everything else in the raw payload is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResultSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_box: Option<Value>,
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
}

impl SearchResultSet {
    /// True when there is nothing to select a code from.
    pub fn is_empty(&self) -> bool {
        self.answer_box.is_none() && self.organic_results.is_empty()
    }
}

/// Allow-listed fields of one organic search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganicResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippet_highlighted_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_page_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Token counts reported by the inference provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A document that made it all the way to RECORDED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    /// Display name (file stem).
    pub document: String,
    pub record: InjuryRecord,
    pub combined: CombinedDocument,
    /// Pages handed to extraction.
    pub pages_attempted: usize,
    /// Pages that produced valid content.
    pub pages_extracted: usize,
    pub usage: TokenUsage,
}

/// Outcome of one document in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Recorded {
        document: String,
        record: InjuryRecord,
        pages_attempted: usize,
        pages_extracted: usize,
    },
    Failed {
        #[serde(flatten)]
        error: DocumentError,
    },
}

impl DocumentOutcome {
    pub fn document(&self) -> &str {
        match self {
            DocumentOutcome::Recorded { document, .. } => document,
            DocumentOutcome::Failed { error } => &error.document,
        }
    }
}

/// Aggregate statistics for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub documents: usize,
    pub recorded: usize,
    pub failed: usize,
    pub pages_attempted: usize,
    pub pages_extracted: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// Records sorted by date of visit, newest first.
    pub records: Vec<InjuryRecord>,
    /// One entry per input PDF, in input order.
    pub outcomes: Vec<DocumentOutcome>,
    /// Rendered summary table.
    pub summary_markdown: String,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureCause, Stage};

    #[test]
    fn page_content_parses_without_optional_fields() {
        let page: PageContent =
            serde_json::from_str(r#"{"content": "Diagnosis\n- Acute bronchitis", "page_number": 1}"#)
                .unwrap();
        assert!(page.header.is_none());
        assert!(page.footer.is_none());
        assert_eq!(page.page_number, 1);
    }

    #[test]
    fn page_content_serialisation_skips_missing_header() {
        let page = PageContent {
            header: None,
            content: "Plan".into(),
            footer: Some("Page 2 of 2".into()),
            page_number: 2,
        };
        let json = serde_json::to_string(&page).unwrap();
        assert!(!json.contains("header"), "got: {json}");
        assert!(json.contains("\"page_number\":2"));
    }

    #[test]
    fn visit_metadata_defaults_missing_keys() {
        let meta: VisitMetadata = serde_json::from_str(r#"{"diagnosis": "Cervicalgia"}"#).unwrap();
        assert_eq!(meta.diagnosis, "Cervicalgia");
        assert!(meta.date_of_visit.is_empty());
        assert!(meta.query.is_empty());
    }

    #[test]
    fn empty_result_set() {
        assert!(SearchResultSet::default().is_empty());
        let set = SearchResultSet {
            answer_box: Some(serde_json::json!({"title": "M54.2"})),
            organic_results: vec![],
        };
        assert!(!set.is_empty());
    }

    #[test]
    fn failed_outcome_serialises_stage() {
        let outcome = DocumentOutcome::Failed {
            error: DocumentError::new("visit", Stage::Search, FailureCause::NoCode),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "search");
        assert_eq!(outcome.document(), "visit");
    }
}
