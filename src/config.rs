//! Configuration types for the injury-summary pipeline.
//!
//! All pipeline behaviour is controlled through [`SummaryConfig`], built via
//! its [`SummaryConfigBuilder`]. Collaborator handles (renderer, inference,
//! search) are not part of the config; they are passed to
//! [`crate::Pipeline::new`] explicitly.

use crate::error::SummaryError;
use crate::progress::ProgressCallback;
use std::fmt;

/// Configuration for a summary run.
///
/// # Example
/// ```rust
/// use injury_summary::SummaryConfig;
///
/// let config = SummaryConfig::builder()
///     .concurrency(5)
///     .extraction_model("gpt-4o-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 5);
/// ```
#[derive(Clone)]
pub struct SummaryConfig {
    /// Maximum in-flight page extraction calls per document. Default: 5.
    pub concurrency: usize,

    /// Documents processed at the same time. Default: 1 (sequential).
    ///
    /// Documents share no mutable state, so raising this is safe; total
    /// in-flight extraction calls become `concurrency × document_concurrency`.
    pub document_concurrency: usize,

    /// Vision model used for per-page extraction. Default: "gpt-4o-mini".
    pub extraction_model: String,

    /// Model used to reconcile pages into one markdown document. Default: "gpt-4o".
    ///
    /// Reconciling hierarchy across page boundaries without rewording the
    /// text is the hardest prompt in the pipeline, so it gets the larger model.
    pub combination_model: String,

    /// Model used for metadata extraction and code selection. Default: "gpt-4o".
    pub query_model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Sampling temperature for every inference call. Default: 0.0.
    pub temperature: f32,

    /// Maximum output tokens per inference call. Default: 16384.
    pub max_tokens: usize,

    /// Organic results requested from the search service. Default: 10.
    pub search_results: usize,

    /// Retries per call on a retryable failure. Default: 0.
    ///
    /// With 0 every call is attempted exactly once. Malformed output is
    /// never retried because temperature-0 calls are deterministic.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: None (client default).
    pub api_timeout_secs: Option<u64>,

    /// Longest rendered image edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Write `<stem>_summary.md` for every recorded document. Default: true.
    pub save_markdown: bool,

    /// Receives batch, document and page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            document_concurrency: 1,
            extraction_model: "gpt-4o-mini".to_string(),
            combination_model: "gpt-4o".to_string(),
            query_model: "gpt-4o".to_string(),
            provider_name: None,
            temperature: 0.0,
            max_tokens: 16384,
            search_results: 10,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: None,
            max_rendered_pixels: 2000,
            save_markdown: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SummaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryConfig")
            .field("concurrency", &self.concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("extraction_model", &self.extraction_model)
            .field("combination_model", &self.combination_model)
            .field("query_model", &self.query_model)
            .field("provider_name", &self.provider_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("search_results", &self.search_results)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("save_markdown", &self.save_markdown)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SummaryProgressCallback>"),
            )
            .finish()
    }
}

impl SummaryConfig {
    /// Create a new builder for `SummaryConfig`.
    pub fn builder() -> SummaryConfigBuilder {
        SummaryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry settings shared by every external call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
            timeout_secs: self.api_timeout_secs,
        }
    }
}

/// Retry and timeout settings applied around each external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: Option<u64>,
}

impl RetryPolicy {
    /// Single attempt, no timeout.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff_ms: 0,
        timeout_secs: None,
    };

    /// Delay before retry number `attempt` (1-based): `backoff_ms * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> u64 {
        self.backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Builder for [`SummaryConfig`].
#[derive(Debug)]
pub struct SummaryConfigBuilder {
    config: SummaryConfig,
}

impl SummaryConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n;
        self
    }

    pub fn extraction_model(mut self, model: impl Into<String>) -> Self {
        self.config.extraction_model = model.into();
        self
    }

    pub fn combination_model(mut self, model: impl Into<String>) -> Self {
        self.config.combination_model = model.into();
        self
    }

    pub fn query_model(mut self, model: impl Into<String>) -> Self {
        self.config.query_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn search_results(mut self, n: usize) -> Self {
        self.config.search_results = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn save_markdown(mut self, v: bool) -> Self {
        self.config.save_markdown = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SummaryConfig, SummaryError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(SummaryError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.document_concurrency == 0 {
            return Err(SummaryError::InvalidConfig(
                "document concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(SummaryError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        if c.search_results == 0 {
            return Err(SummaryError::InvalidConfig(
                "search result count must be ≥ 1".into(),
            ));
        }
        for (name, model) in [
            ("extraction", &c.extraction_model),
            ("combination", &c.combination_model),
            ("query", &c.query_model),
        ] {
            if model.trim().is_empty() {
                return Err(SummaryError::InvalidConfig(format!(
                    "{name} model must not be empty"
                )));
            }
        }
        if c.api_timeout_secs == Some(0) {
            return Err(SummaryError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SummaryConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.document_concurrency, 1);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 16384);
        assert_eq!(config.max_retries, 0);
        assert!(config.api_timeout_secs.is_none());
        assert!(config.save_markdown);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = SummaryConfig::builder().concurrency(0).build().unwrap_err();
        assert!(err.to_string().contains("concurrency"), "got: {err}");
    }

    #[test]
    fn empty_model_rejected() {
        let err = SummaryConfig::builder()
            .combination_model("  ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("combination"), "got: {err}");
    }

    #[test]
    fn temperature_is_clamped() {
        let config = SummaryConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
            timeout_secs: None,
        };
        assert_eq!(policy.backoff_for(1), 500);
        assert_eq!(policy.backoff_for(2), 1000);
        assert_eq!(policy.backoff_for(3), 2000);
    }
}
