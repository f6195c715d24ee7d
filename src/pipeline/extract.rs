//! Page extraction: one rendered page → one [`PageContent`].
//!
//! A single vision call per page at temperature 0 with a JSON-object
//! response constraint. The answer must carry a `content` string; `header`
//! and `footer` are optional. The page number always comes from the caller,
//! never from the model.

use crate::config::RetryPolicy;
use crate::error::{CallError, Stage};
use crate::output::{PageContent, TokenUsage};
use crate::pipeline::llm::{call_json, InferenceClient, InferenceRequest};
use crate::pipeline::render::RenderedPage;
use crate::prompts::{extraction_user_message, EXTRACTION_SYSTEM_PROMPT};
use serde::Deserialize;
use std::sync::Arc;

/// Shape the extraction prompt asks for.
#[derive(Debug, Deserialize)]
struct ExtractedPage {
    #[serde(default)]
    header: Option<String>,
    content: String,
    #[serde(default)]
    footer: Option<String>,
}

/// Sends page images to the vision model.
#[derive(Clone)]
pub struct PageExtractor {
    client: Arc<dyn InferenceClient>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    policy: RetryPolicy,
}

impl PageExtractor {
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

    /// Extract one page.
    ///
    /// Empty `header`/`footer` strings are normalised to `None`. A blank
    /// `content` counts as malformed output: an empty page carries nothing
    /// the combiner could use.
    pub async fn extract(&self, page: &RenderedPage) -> Result<(PageContent, TokenUsage), CallError> {
        let request = InferenceRequest {
            stage: Stage::Extraction,
            model: self.model.clone(),
            system_prompt: EXTRACTION_SYSTEM_PROMPT.to_string(),
            user_messages: vec![extraction_user_message(page.page_number)],
            image: Some(page.image.clone()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output: true,
        };

        let (extracted, usage): (ExtractedPage, TokenUsage) =
            call_json(self.client.as_ref(), &request, &self.policy).await?;

        if extracted.content.trim().is_empty() {
            return Err(CallError::Malformed {
                detail: format!("page {} has empty content", page.page_number),
            });
        }

        Ok((
            PageContent {
                header: non_blank(extracted.header),
                content: extracted.content,
                footer: non_blank(extracted.footer),
                page_number: page.page_number,
            },
            usage,
        ))
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}
