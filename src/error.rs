//! Error types for the injury-summary library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`SummaryError`] — **Fatal**: the run cannot proceed at all (input
//!   folder missing, no PDFs, output folder not writable, provider not
//!   configured). Returned as `Err(SummaryError)` from the batch entry points.
//!
//! * [`DocumentError`] — **Per document**: one stage of one document failed.
//!   The document is skipped and the batch continues. The error records the
//!   [`Stage`] that failed and a [`FailureCause`].
//!
//! * [`CallError`] — **Per external call**: the tagged outcome of a single
//!   inference or search call. Page-level call errors only drop that page;
//!   any other call error becomes the cause of a [`DocumentError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the injury-summary library.
#[derive(Debug, Error)]
pub enum SummaryError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input folder does not exist.
    #[error("Input folder '{path}' does not exist.")]
    InputFolderNotFound { path: PathBuf },

    /// The input path exists but is not a directory.
    #[error("Input path '{path}' is not a folder.")]
    NotAFolder { path: PathBuf },

    /// The input folder holds no `*.pdf` files.
    #[error("No PDF files found in the input folder '{path}'.")]
    NoPdfFiles { path: PathBuf },

    /// Listing the input folder failed.
    #[error("Failed to read input folder '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create the output folder or write the summary table.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The inference provider could not be initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The search provider credential is absent.
    #[error("Search provider is not configured: set {env_var} in the environment or .env file.")]
    SearchNotConfigured { env_var: &'static str },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Tagged outcome of a failed external call (inference or search).
///
/// The variant is the error kind: callers branch on it directly instead of
/// inspecting provider-specific error types.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallError {
    /// The service could not be reached.
    #[error("connection failed: {detail}")]
    Connection { detail: String },

    /// The service answered HTTP 429.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// Any other non-2xx status.
    #[error("service returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The call did not finish in time.
    #[error("timed out: {detail}")]
    Timeout { detail: String },

    /// The service answered but the output is not the expected object.
    #[error("malformed response: {detail}")]
    Malformed { detail: String },

    /// Provider-side failure that fits none of the above.
    #[error("provider error: {detail}")]
    Provider { detail: String },
}

impl CallError {
    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Connection { .. } | CallError::RateLimited { .. } | CallError::Timeout { .. } => {
                true
            }
            CallError::Status { status, .. } => *status >= 500,
            CallError::Malformed { .. } | CallError::Provider { .. } => false,
        }
    }

    /// Classify a provider error from its rendered message.
    ///
    /// Provider crates surface HTTP failures as formatted strings, so the kind
    /// is recovered from well-known markers in the text.
    pub fn classify(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();

        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            return CallError::RateLimited { detail };
        }
        if lower.contains("timed out") || lower.contains("timeout") {
            return CallError::Timeout { detail };
        }
        if lower.contains("connect") || lower.contains("network") || lower.contains("dns") {
            return CallError::Connection { detail };
        }
        if let Some(status) = find_status_code(&lower) {
            return CallError::Status { status, detail };
        }
        CallError::Provider { detail }
    }
}

/// Find a 4xx/5xx status code mentioned in an error message.
fn find_status_code(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (400..600).contains(code))
}

/// PDF rasterisation failure for a whole document.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The file exists and was read, but is not a PDF.
    #[error("not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The file could not be read at all.
    #[error("unreadable: {detail}")]
    Unreadable { detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("corrupt PDF: {detail}")]
    Corrupt { detail: String },

    /// PDF requires a password.
    #[error("encrypted PDF requires a password")]
    PasswordRequired,

    /// Every page failed to rasterise or the document has no pages.
    #[error("no renderable pages")]
    NoPages,

    /// Could not bind to a pdfium library.
    #[error(
        "failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBinding(String),

    /// The blocking render task panicked or was cancelled.
    #[error("render task failed: {0}")]
    Internal(String),
}

/// Pipeline stage of a single document, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Render,
    Extraction,
    Combination,
    Metadata,
    Search,
    CodeResolution,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Render => "render",
            Stage::Extraction => "extraction",
            Stage::Combination => "combination",
            Stage::Metadata => "metadata",
            Stage::Search => "search",
            Stage::CodeResolution => "code-resolution",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FailureCause {
    /// An external call failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The PDF could not be rasterised.
    #[error("{0}")]
    Render(String),

    /// Not a single page produced structured content.
    #[error("none of {attempted} pages produced valid content")]
    NoContent { attempted: usize },

    /// A required field came back empty.
    #[error("response is missing '{0}'")]
    MissingField(String),

    /// The search results held no confident classification code.
    #[error("no confident ICD-10 code in search results")]
    NoCode,

    /// Writing the per-document markdown failed.
    #[error("could not write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },
}

impl From<RenderError> for FailureCause {
    fn from(e: RenderError) -> Self {
        FailureCause::Render(e.to_string())
    }
}

/// A document was skipped because one of its stages failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("'{document}' skipped at {stage} stage: {cause}")]
pub struct DocumentError {
    /// Display name of the document (file stem).
    pub document: String,
    /// Stage that failed.
    pub stage: Stage,
    /// What went wrong.
    pub cause: FailureCause,
}

impl DocumentError {
    pub fn new(document: impl Into<String>, stage: Stage, cause: impl Into<FailureCause>) -> Self {
        Self {
            document: document.into(),
            stage,
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pdf_files_display() {
        let e = SummaryError::NoPdfFiles {
            path: PathBuf::from("/scans"),
        };
        assert!(e.to_string().contains("/scans"), "got: {e}");
    }

    #[test]
    fn classify_rate_limit() {
        let e = CallError::classify("API error: 429 Too Many Requests");
        assert!(matches!(e, CallError::RateLimited { .. }), "got: {e:?}");
        assert!(e.is_retryable());
    }

    #[test]
    fn classify_connection() {
        let e = CallError::classify("error sending request: connection refused");
        assert!(matches!(e, CallError::Connection { .. }), "got: {e:?}");
    }

    #[test]
    fn classify_status_code() {
        let e = CallError::classify("API error: status 503 service unavailable");
        assert_eq!(
            e,
            CallError::Status {
                status: 503,
                detail: "API error: status 503 service unavailable".into()
            }
        );
        assert!(e.is_retryable());

        let e = CallError::classify("API error: status 401 invalid key");
        assert!(!e.is_retryable());
    }

    #[test]
    fn classify_unknown_is_provider() {
        let e = CallError::classify("model refused the request");
        assert!(matches!(e, CallError::Provider { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn malformed_is_not_retryable() {
        let e = CallError::Malformed {
            detail: "expected value at line 1".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn document_error_display_names_stage() {
        let e = DocumentError::new("visit_1", Stage::CodeResolution, FailureCause::NoCode);
        let msg = e.to_string();
        assert!(msg.contains("visit_1"), "got: {msg}");
        assert!(msg.contains("code-resolution"), "got: {msg}");
    }

    #[test]
    fn render_error_converts_to_cause() {
        let cause: FailureCause = RenderError::PasswordRequired.into();
        assert!(cause.to_string().contains("password"));
    }
}
