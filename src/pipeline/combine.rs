//! Content combination: ordered pages → one markdown document.
//!
//! The whole ordered page list goes to the combination model in a single
//! call. The model turns dash hierarchy into headings and lists and opens
//! each page with a `<!-- BEGIN PAGE: p. N -->` marker; the markers are
//! what later lets the metadata stage cite a page.

use crate::config::RetryPolicy;
use crate::error::{CallError, Stage};
use crate::output::{CombinedDocument, PageContent, TokenUsage};
use crate::pipeline::llm::{call_json, InferenceClient, InferenceRequest};
use crate::prompts::{page_marker, COMBINE_SYSTEM_PROMPT, COMBINE_USER_MESSAGE, PAGE_MARKER_PREFIX};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct CombinedAnswer {
    markdown: String,
}

/// Merges per-page content with the combination model.
#[derive(Clone)]
pub struct ContentCombiner {
    client: Arc<dyn InferenceClient>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    policy: RetryPolicy,
}

impl ContentCombiner {
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

    /// Combine `pages` (already in page order) into one markdown document.
    pub async fn combine(
        &self,
        pages: &[PageContent],
    ) -> Result<(CombinedDocument, TokenUsage), CallError> {
        let payload = serde_json::to_string_pretty(pages).map_err(|e| CallError::Provider {
            detail: format!("cannot serialise pages: {e}"),
        })?;

        let request = InferenceRequest {
            stage: Stage::Combination,
            model: self.model.clone(),
            system_prompt: COMBINE_SYSTEM_PROMPT.to_string(),
            user_messages: vec![COMBINE_USER_MESSAGE.to_string(), payload],
            image: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output: true,
        };

        let (answer, usage): (CombinedAnswer, TokenUsage) =
            call_json(self.client.as_ref(), &request, &self.policy).await?;

        if answer.markdown.trim().is_empty() {
            return Err(CallError::Malformed {
                detail: "combined markdown is empty".to_string(),
            });
        }

        let markdown = ensure_page_markers(answer.markdown, pages);
        Ok((CombinedDocument { markdown }, usage))
    }
}

/// Check the page markers the model emitted.
///
/// A single-page document whose answer carries no marker gets one
/// prepended, since its only possible citation is that page. Any other
/// mismatch is logged and left alone: rewriting multi-page text would mean
/// guessing where pages begin.
fn ensure_page_markers(markdown: String, pages: &[PageContent]) -> String {
    let found = markdown.matches(PAGE_MARKER_PREFIX).count();
    if found == pages.len() {
        return markdown;
    }
    if found == 0 {
        if let [only] = pages {
            warn!("combined markdown lacks its page marker; adding p. {}", only.page_number);
            return format!("{}\n{}", page_marker(only.page_number), markdown);
        }
    }
    warn!(
        "combined markdown has {} page markers for {} pages",
        found,
        pages.len()
    );
    markdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::InferenceResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        answer: String,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InferenceClient for Recording {
        async fn complete(&self, r: &InferenceRequest) -> Result<InferenceResponse, CallError> {
            self.seen.lock().unwrap().extend(r.user_messages.iter().cloned());
            Ok(InferenceResponse {
                content: self.answer.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn page(n: usize, text: &str) -> PageContent {
        PageContent {
            header: None,
            content: text.to_string(),
            footer: None,
            page_number: n,
        }
    }

    #[tokio::test]
    async fn sends_pages_in_order_and_returns_markdown() {
        let client = Arc::new(Recording {
            answer: r##"{"markdown": "<!-- BEGIN PAGE: p. 1 -->\n# A\n<!-- BEGIN PAGE: p. 3 -->\n# C"}"##
                .to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let combiner = ContentCombiner::new(client.clone(), "big", 0.0, 4096, RetryPolicy::NONE);
        let (doc, _) = combiner
            .combine(&[page(1, "A"), page(3, "C")])
            .await
            .unwrap();
        assert!(doc.markdown.contains("p. 3"));

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0], COMBINE_USER_MESSAGE);
        let sent: Vec<PageContent> = serde_json::from_str(&seen[1]).unwrap();
        assert_eq!(sent.iter().map(|p| p.page_number).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn non_object_answer_fails() {
        let client = Arc::new(Recording {
            answer: "# Just markdown".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let combiner = ContentCombiner::new(client, "big", 0.0, 4096, RetryPolicy::NONE);
        let err = combiner.combine(&[page(1, "A")]).await.unwrap_err();
        assert!(matches!(err, CallError::Malformed { .. }));
    }

    #[test]
    fn single_page_gets_missing_marker() {
        let md = ensure_page_markers("# Visit".to_string(), &[page(4, "Visit")]);
        assert!(md.starts_with("<!-- BEGIN PAGE: p. 4 -->\n"));
    }

    #[test]
    fn multi_page_mismatch_left_alone() {
        let md = ensure_page_markers("# Visit".to_string(), &[page(1, "a"), page(2, "b")]);
        assert_eq!(md, "# Visit");
    }
}
