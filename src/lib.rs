//! # injury-summary
//!
//! Turn a folder of scanned clinic-visit PDFs into per-visit markdown
//! transcripts and one dated table of injuries with their ICD-10 codes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folder of PDFs
//!  │
//!  ├─ 1. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 2. Extract    one vision call per page, ≤ N in flight, reassembled in page order
//!  ├─ 3. Combine    merge pages into markdown with <!-- BEGIN PAGE: p. N --> markers
//!  ├─ 4. Metadata   date of visit, diagnosis, page reference, lookup query
//!  ├─ 5. Code       web search + model pick of the ICD-10 code
//!  └─ 6. Summary    records sorted newest first → summary_of_injuries.md
//! ```
//!
//! A document that fails at any stage is logged and skipped; the rest of
//! the batch still produces records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use injury_summary::{summarize, SummaryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // OPENAI_API_KEY and SERPAPI_API_KEY from the environment or .env
//!     let config = SummaryConfig::default();
//!     let output = summarize("scans/", "out/", config).await?;
//!     print!("{}", output.summary_markdown);
//!     eprintln!("{}/{} documents recorded",
//!         output.stats.recorded,
//!         output.stats.documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Injecting Collaborators
//!
//! Rendering, inference and search are traits ([`PageRenderer`],
//! [`InferenceClient`], [`SearchClient`]). [`Pipeline::new`] accepts any
//! implementation, which is how the tests drive the whole pipeline without
//! pdfium or network access; [`Pipeline::from_env`] wires up the
//! production trio.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `summarize-injuries` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod summarize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RetryPolicy, SummaryConfig, SummaryConfigBuilder};
pub use document::{DocumentState, Pipeline};
pub use error::{CallError, DocumentError, FailureCause, RenderError, Stage, SummaryError};
pub use output::{
    BatchOutput, BatchStats, CombinedDocument, DocumentOutcome, InjuryRecord, OrganicResult,
    PageContent, ProcessedDocument, SearchResultSet, TokenUsage, VisitMetadata,
};
pub use pipeline::input::InputDocument;
pub use pipeline::llm::{InferenceClient, InferenceRequest, InferenceResponse, ProviderInference};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderedPage};
pub use pipeline::search::{SearchClient, SerpApiClient};
pub use progress::{NoopProgressCallback, ProgressCallback, SummaryProgressCallback};
pub use report::{render_summary_table, sort_records, SUMMARY_FILE_NAME};
pub use summarize::{
    summarize, summarize_documents, summarize_folder, summarize_sync, summarize_to_dir,
};
