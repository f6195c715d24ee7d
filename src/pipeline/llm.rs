//! Inference interaction: the [`InferenceClient`] seam and the call wrapper.
//!
//! Every stage that talks to a model builds an [`InferenceRequest`] and goes
//! through [`call_json`], which owns the cross-cutting concerns: timeout,
//! optional retry with exponential backoff, and strict JSON parsing. Prompt
//! text lives in [`crate::prompts`]; stages only choose which prompt to send.
//!
//! ## Retry Strategy
//!
//! With the default `max_retries = 0` each call is attempted once. When
//! retries are enabled only retryable kinds (connection, 429, timeout, 5xx)
//! are repeated, waiting `backoff_ms * 2^(attempt-1)` before each retry.

use crate::config::RetryPolicy;
use crate::error::{CallError, SummaryError, Stage};
use crate::output::TokenUsage;
use crate::pipeline::response::parse_json_object;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One inference call, independent of any provider SDK.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Stage issuing the call; used for logging and by test fakes.
    pub stage: Stage,
    pub model: String,
    pub system_prompt: String,
    /// User turns, in order.
    pub user_messages: Vec<String>,
    /// Image attached to the last user turn.
    pub image: Option<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Constrain output to a single JSON object.
    pub json_output: bool,
}

/// Raw model answer.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// A text/vision model endpoint.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, CallError>;
}

/// Run `request` under `policy` and parse the answer into `T`.
pub async fn call_json<T: DeserializeOwned>(
    client: &dyn InferenceClient,
    request: &InferenceRequest,
    policy: &RetryPolicy,
) -> Result<(T, TokenUsage), CallError> {
    let response = call_with_retry(client, request, policy).await?;
    let value = parse_json_object::<T>(&response.content)?;
    Ok((value, response.usage))
}

async fn call_with_retry(
    client: &dyn InferenceClient,
    request: &InferenceRequest,
    policy: &RetryPolicy,
) -> Result<InferenceResponse, CallError> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        let result = match policy.timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), client.complete(request)).await {
                Ok(r) => r,
                Err(_) => Err(CallError::Timeout {
                    detail: format!("no response within {secs}s"),
                }),
            },
            None => client.complete(request).await,
        };

        match result {
            Ok(response) => {
                debug!(
                    "{} call ({}): {} input tokens, {} output tokens, {:?}",
                    request.stage,
                    request.model,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                    start.elapsed()
                );
                return Ok(response);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let backoff = policy.backoff_for(attempt);
                warn!(
                    "{} call: retry {}/{} after {}ms: {}",
                    request.stage, attempt, policy.max_retries, backoff, e
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`InferenceClient`] backed by edgequake-llm providers.
///
/// Providers are bound to one model each, so one is created per model
/// identifier on first use and reused afterwards.
pub struct ProviderInference {
    provider_name: String,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderInference {
    /// Use the named provider ("openai", "anthropic", …).
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the provider name, from most-specific to least-specific:
    ///
    /// 1. explicit `provider_name`
    /// 2. `EDGEQUAKE_LLM_PROVIDER`
    /// 3. `openai` when `OPENAI_API_KEY` is set
    ///
    /// `model` is instantiated once here so a missing credential fails the
    /// run at start-up rather than on the first page.
    pub fn from_env(provider_name: Option<&str>, model: &str) -> Result<Self, SummaryError> {
        let name = match provider_name {
            Some(name) => name.to_string(),
            None => match std::env::var("EDGEQUAKE_LLM_PROVIDER") {
                Ok(p) if !p.is_empty() => p,
                _ => match std::env::var("OPENAI_API_KEY") {
                    Ok(key) if !key.is_empty() => "openai".to_string(),
                    _ => {
                        return Err(SummaryError::ProviderNotConfigured {
                            provider: "auto".to_string(),
                            hint: "Set OPENAI_API_KEY (or EDGEQUAKE_LLM_PROVIDER plus that \
                                   provider's API key) in the environment or .env file."
                                .to_string(),
                        })
                    }
                },
            },
        };

        let inference = Self::new(name);
        inference
            .provider_for(model)
            .map_err(|e| SummaryError::ProviderNotConfigured {
                provider: inference.provider_name.clone(),
                hint: e.to_string(),
            })?;
        Ok(inference)
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, CallError> {
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| CallError::Provider {
                detail: "provider cache poisoned".to_string(),
            })?;
        if let Some(p) = providers.get(model) {
            return Ok(Arc::clone(p));
        }
        let provider = ProviderFactory::create_llm_provider(&self.provider_name, model).map_err(
            |e| CallError::Provider {
                detail: format!("cannot create {} provider for {model}: {e}", self.provider_name),
            },
        )?;
        providers.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

/// Build the provider message list for a request.
///
/// The image rides on the last user turn; an image-only request still gets
/// one (empty) user turn because chat APIs require one to respond to.
fn build_messages(request: &InferenceRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(request.system_prompt.as_str())];
    let last = request.user_messages.len().saturating_sub(1);

    if request.user_messages.is_empty() {
        if let Some(ref image) = request.image {
            messages.push(ChatMessage::user_with_images("", vec![image.clone()]));
        }
        return messages;
    }

    for (i, text) in request.user_messages.iter().enumerate() {
        match (&request.image, i == last) {
            (Some(image), true) => {
                messages.push(ChatMessage::user_with_images(text.as_str(), vec![image.clone()]))
            }
            _ => messages.push(ChatMessage::user(text.as_str())),
        }
    }
    messages
}

/// Build `CompletionOptions` from the request.
fn build_options(request: &InferenceRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        response_format: request.json_output.then(|| "json_object".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl InferenceClient for ProviderInference {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, CallError> {
        let provider = self.provider_for(&request.model)?;
        let messages = build_messages(request);
        let options = build_options(request);

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| CallError::classify(e.to_string()))?;

        Ok(InferenceResponse {
            content: response.content,
            usage: TokenUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        })
    }
}
