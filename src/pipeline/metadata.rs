//! Metadata extraction: combined markdown → date, diagnosis, reference, query.
//!
//! One call to the query model, then a deterministic normalisation pass so
//! the record format holds even when the model drifts:
//!
//! | Field           | Guarantee after normalisation                        |
//! |-----------------|------------------------------------------------------|
//! | `date_of_visit` | `YYYY-MM-DD` when any known clinical format parses   |
//! | `reference`     | `<document> - p. <n>`, page taken from the markers   |
//! | `query`         | contains `ICD-10 code` and the diagnosis verbatim    |
//!
//! Absent keys deserialise to empty strings. An empty `diagnosis` or
//! `query` fails the stage; an empty date or reference is kept and logged.

use crate::config::RetryPolicy;
use crate::error::{FailureCause, Stage};
use crate::output::{TokenUsage, VisitMetadata};
use crate::pipeline::llm::{call_json, InferenceClient, InferenceRequest};
use crate::prompts::{metadata_user_message, METADATA_SYSTEM_PROMPT, PAGE_MARKER_PREFIX, QUERY_TRIGGER};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

static RE_ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static RE_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.+ - p\. \d+$").unwrap());

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!-- BEGIN PAGE: p\. (\d+) -->").unwrap());

/// Date layouts seen on clinic paperwork, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
];

/// Extracts visit metadata with the query model.
#[derive(Clone)]
pub struct MetadataExtractor {
    client: Arc<dyn InferenceClient>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    policy: RetryPolicy,
}

impl MetadataExtractor {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
            max_tokens,
            policy,
        }
    }

    pub async fn extract(
        &self,
        document_name: &str,
        markdown: &str,
    ) -> Result<(VisitMetadata, TokenUsage), FailureCause> {
        let request = InferenceRequest {
            stage: Stage::Metadata,
            model: self.model.clone(),
            system_prompt: METADATA_SYSTEM_PROMPT.to_string(),
            user_messages: vec![metadata_user_message(document_name, markdown)],
            image: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output: true,
        };

        let (raw, usage): (VisitMetadata, TokenUsage) =
            call_json(self.client.as_ref(), &request, &self.policy)
                .await
                .map_err(FailureCause::from)?;

        let metadata = normalise(raw, document_name, markdown)?;
        Ok((metadata, usage))
    }
}

/// Apply the field guarantees to a raw model answer.
pub fn normalise(
    raw: VisitMetadata,
    document_name: &str,
    markdown: &str,
) -> Result<VisitMetadata, FailureCause> {
    let diagnosis = raw.diagnosis.trim().to_string();
    if diagnosis.is_empty() {
        return Err(FailureCause::MissingField("diagnosis".to_string()));
    }
    if raw.query.trim().is_empty() {
        return Err(FailureCause::MissingField("query".to_string()));
    }

    let date_of_visit = normalise_date(raw.date_of_visit.trim());
    if date_of_visit.is_empty() {
        warn!("{}: no date of visit found", document_name);
    }

    let query = if raw.query.contains(QUERY_TRIGGER) && raw.query.contains(&diagnosis) {
        raw.query.trim().to_string()
    } else {
        warn!("{}: rebuilding lookup query around the diagnosis", document_name);
        format!("{QUERY_TRIGGER} for {diagnosis}")
    };

    let reference = raw.reference.trim();
    let reference = if RE_REFERENCE.is_match(reference) {
        reference.to_string()
    } else {
        match locate_page(markdown, &diagnosis) {
            Some(page) => {
                let rebuilt = format!("{document_name} - p. {page}");
                warn!("{}: reference {:?} rebuilt as {:?}", document_name, reference, rebuilt);
                rebuilt
            }
            None => {
                warn!("{}: cannot place the diagnosis on a page", document_name);
                reference.to_string()
            }
        }
    };

    Ok(VisitMetadata {
        date_of_visit,
        diagnosis,
        reference,
        query,
    })
}

/// Rewrite a date as `YYYY-MM-DD`; unparseable input is returned unchanged.
pub fn normalise_date(raw: &str) -> String {
    if raw.is_empty() || RE_ISO_DATE.is_match(raw) {
        return raw.to_string();
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    warn!("unrecognised date format: {:?}", raw);
    raw.to_string()
}

/// Page whose marker most closely precedes `needle` in `markdown`.
///
/// Runs of whitespace compare equal, so a diagnosis the combiner wrapped
/// across lines is still found. Returns `None` when `markdown` has no page
/// markers or does not contain `needle`.
pub fn locate_page(markdown: &str, needle: &str) -> Option<usize> {
    if !markdown.contains(PAGE_MARKER_PREFIX) {
        return None;
    }
    let (needle, _) = collapse_whitespace(needle.trim());
    if needle.is_empty() {
        return None;
    }
    let (flat, offsets) = collapse_whitespace(markdown);
    let pos = offsets[flat.find(&needle)?];

    let markers: Vec<(usize, usize)> = RE_PAGE_MARKER
        .captures_iter(markdown)
        .filter_map(|c| {
            let offset = c.get(0)?.start();
            let page = c[1].parse().ok()?;
            Some((offset, page))
        })
        .collect();

    markers
        .iter()
        .take_while(|(offset, _)| *offset <= pos)
        .last()
        .or_else(|| markers.first())
        .map(|(_, page)| *page)
}

/// `text` with every whitespace run replaced by one space, plus the byte
/// offset in `text` of each byte of the result.
fn collapse_whitespace(text: &str) -> (String, Vec<usize>) {
    let mut flat = String::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len());
    let mut in_space = false;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if !in_space {
                flat.push(' ');
                offsets.push(i);
            }
            in_space = true;
        } else {
            flat.push(ch);
            offsets.extend(std::iter::repeat(i).take(ch.len_utf8()));
            in_space = false;
        }
    }
    (flat, offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::pipeline::llm::InferenceResponse;
    use async_trait::async_trait;

    const MD: &str = "<!-- BEGIN PAGE: p. 1 -->\n# Visit\n- Date: 04/05/2023\n<!-- BEGIN PAGE: p. 2 -->\n## Diagnosis\n- Acute bronchitis";

    fn raw(date: &str, diagnosis: &str, reference: &str, query: &str) -> VisitMetadata {
        VisitMetadata {
            date_of_visit: date.into(),
            diagnosis: diagnosis.into(),
            reference: reference.into(),
            query: query.into(),
        }
    }

    #[test]
    fn well_formed_answer_passes_through() {
        let m = normalise(
            raw(
                "2023-04-05",
                "Acute bronchitis",
                "Visit - p. 2",
                "ICD-10 code for Acute bronchitis",
            ),
            "Visit",
            MD,
        )
        .unwrap();
        assert_eq!(m.date_of_visit, "2023-04-05");
        assert_eq!(m.reference, "Visit - p. 2");
        assert_eq!(m.query, "ICD-10 code for Acute bronchitis");
    }

    #[test]
    fn dates_are_normalised() {
        assert_eq!(normalise_date("04/05/2023"), "2023-04-05");
        assert_eq!(normalise_date("April 5, 2023"), "2023-04-05");
        assert_eq!(normalise_date("Apr 5, 2023"), "2023-04-05");
        assert_eq!(normalise_date("5 April 2023"), "2023-04-05");
        assert_eq!(normalise_date("2023/04/05"), "2023-04-05");
        assert_eq!(normalise_date("sometime in spring"), "sometime in spring");
    }

    #[test]
    fn query_rebuilt_when_diagnosis_altered() {
        let m = normalise(
            raw("2023-04-05", "Acute bronchitis", "Visit - p. 2", "ICD-10 code bronchitis"),
            "Visit",
            MD,
        )
        .unwrap();
        assert_eq!(m.query, "ICD-10 code for Acute bronchitis");
    }

    #[test]
    fn reference_rebuilt_from_markers() {
        let m = normalise(
            raw("2023-04-05", "Acute bronchitis", "page two", "ICD-10 code for Acute bronchitis"),
            "Visit",
            MD,
        )
        .unwrap();
        assert_eq!(m.reference, "Visit - p. 2");
    }

    #[test]
    fn missing_diagnosis_fails() {
        let err = normalise(raw("2023-04-05", "", "", ""), "Visit", MD).unwrap_err();
        assert_eq!(err, FailureCause::MissingField("diagnosis".into()));
    }

    #[test]
    fn locate_page_uses_preceding_marker() {
        assert_eq!(locate_page(MD, "Acute bronchitis"), Some(2));
        assert_eq!(locate_page(MD, "Date:"), Some(1));
        assert_eq!(locate_page(MD, "not present"), None);
        assert_eq!(locate_page("# no markers", "x"), None);
    }

    #[test]
    fn locate_page_finds_wrapped_text() {
        let md = "<!-- BEGIN PAGE: p. 1 -->\n# Visit\n<!-- BEGIN PAGE: p. 2 -->\n## Diagnosis\n- Acute\n  bronchitis";
        assert_eq!(locate_page(md, "Acute bronchitis"), Some(2));
    }

    #[test]
    fn unplaceable_diagnosis_gets_no_invented_page() {
        let m = normalise(
            raw("2023-04-05", "Pleurisy", "", "ICD-10 code for Pleurisy"),
            "Visit",
            MD,
        )
        .unwrap();
        assert_eq!(m.reference, "");
    }

    #[test]
    fn normalisation_is_idempotent() {
        let first = normalise(
            raw("April 5, 2023", "Acute bronchitis", "", "Acute bronchitis"),
            "Visit",
            MD,
        )
        .unwrap();
        let second = normalise(first.clone(), "Visit", MD).unwrap();
        assert_eq!(first, second);
        assert!(RE_ISO_DATE.is_match(&second.date_of_visit));
        assert!(RE_REFERENCE.is_match(&second.reference));
    }

    struct Partial;

    #[async_trait]
    impl InferenceClient for Partial {
        async fn complete(&self, r: &InferenceRequest) -> Result<InferenceResponse, CallError> {
            assert!(r.user_messages[0].starts_with("Document name: Visit\n"));
            Ok(InferenceResponse {
                content: r#"{"diagnosis": "Acute bronchitis", "query": "ICD-10 code for Acute bronchitis"}"#
                    .into(),
                usage: TokenUsage::default(),
            })
        }
    }

    #[tokio::test]
    async fn absent_keys_default_to_empty() {
        let ex = MetadataExtractor::new(Arc::new(Partial), "q", 0.0, 1024, RetryPolicy::NONE);
        let (m, _) = ex.extract("Visit", MD).await.unwrap();
        assert_eq!(m.date_of_visit, "");
        assert_eq!(m.reference, "Visit - p. 2");
    }
}
