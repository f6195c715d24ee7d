//! Per-document orchestration.
//!
//! A document moves through a linear state machine:
//!
//! ```text
//! Pending ─render─▶ Rendered ─extract─▶ Extracted ─combine─▶ Combined
//!   ─metadata─▶ MetadataExtracted ─search─▶ Searched ─code─▶ Coded
//!   ─persist─▶ Recorded
//! ```
//!
//! Any failing step moves the document to `Failed(stage)` and the remaining
//! steps are skipped. Nothing is retried here; the call wrapper in
//! [`crate::pipeline::llm`] owns retry. Nothing is written for a document
//! until it has a record, so a skipped document leaves no files behind.

use crate::config::SummaryConfig;
use crate::error::{DocumentError, FailureCause, RenderError, Stage, SummaryError};
use crate::output::{InjuryRecord, ProcessedDocument, TokenUsage};
use crate::pipeline::aggregate::aggregate_pages;
use crate::pipeline::code::CodeResolver;
use crate::pipeline::combine::ContentCombiner;
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::input::InputDocument;
use crate::pipeline::llm::{InferenceClient, ProviderInference};
use crate::pipeline::metadata::MetadataExtractor;
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::pipeline::search::{SearchClient, SerpApiClient};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Where a document is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Rendered,
    Extracted,
    Combined,
    MetadataExtracted,
    Searched,
    Coded,
    Recorded,
    Failed(Stage),
}

impl DocumentState {
    /// Stage that leads out of this state. For a terminal state, the stage
    /// that ended it.
    pub fn next_stage(self) -> Stage {
        match self {
            DocumentState::Pending => Stage::Render,
            DocumentState::Rendered => Stage::Extraction,
            DocumentState::Extracted => Stage::Combination,
            DocumentState::Combined => Stage::Metadata,
            DocumentState::MetadataExtracted => Stage::Search,
            DocumentState::Searched => Stage::CodeResolution,
            DocumentState::Coded | DocumentState::Recorded => Stage::Persist,
            DocumentState::Failed(stage) => stage,
        }
    }

    /// State reached when [`next_stage`](Self::next_stage) succeeds.
    /// Terminal states map to themselves.
    pub fn next(self) -> DocumentState {
        match self {
            DocumentState::Pending => DocumentState::Rendered,
            DocumentState::Rendered => DocumentState::Extracted,
            DocumentState::Extracted => DocumentState::Combined,
            DocumentState::Combined => DocumentState::MetadataExtracted,
            DocumentState::MetadataExtracted => DocumentState::Searched,
            DocumentState::Searched => DocumentState::Coded,
            DocumentState::Coded => DocumentState::Recorded,
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Recorded | DocumentState::Failed(_))
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentState::Pending => f.write_str("PENDING"),
            DocumentState::Rendered => f.write_str("RENDERED"),
            DocumentState::Extracted => f.write_str("EXTRACTED"),
            DocumentState::Combined => f.write_str("COMBINED"),
            DocumentState::MetadataExtracted => f.write_str("METADATA_EXTRACTED"),
            DocumentState::Searched => f.write_str("SEARCHED"),
            DocumentState::Coded => f.write_str("CODED"),
            DocumentState::Recorded => f.write_str("RECORDED"),
            DocumentState::Failed(stage) => write!(f, "FAILED({stage})"),
        }
    }
}

/// Tracks one document's state and builds its error on failure.
struct Progression<'a> {
    document: &'a str,
    state: DocumentState,
}

impl<'a> Progression<'a> {
    fn new(document: &'a str) -> Self {
        Self {
            document,
            state: DocumentState::Pending,
        }
    }

    fn advance(&mut self) {
        let next = self.state.next();
        debug!("{}: {} → {}", self.document, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, cause: impl Into<FailureCause>) -> DocumentError {
        let stage = self.state.next_stage();
        self.state = DocumentState::Failed(stage);
        let err = DocumentError::new(self.document, stage, cause);
        error!("{}", err);
        err
    }
}

/// The per-document pipeline, holding its injected collaborators.
#[derive(Clone)]
pub struct Pipeline {
    config: SummaryConfig,
    renderer: Arc<dyn PageRenderer>,
    extractor: PageExtractor,
    combiner: ContentCombiner,
    metadata: MetadataExtractor,
    resolver: CodeResolver,
}

impl Pipeline {
    /// Build a pipeline over explicit collaborators.
    pub fn new(
        config: SummaryConfig,
        renderer: Arc<dyn PageRenderer>,
        inference: Arc<dyn InferenceClient>,
        search: Arc<dyn SearchClient>,
    ) -> Self {
        let policy = config.retry_policy();
        let extractor = PageExtractor::new(
            Arc::clone(&inference),
            config.extraction_model.clone(),
            config.temperature,
            config.max_tokens,
            policy,
        );
        let combiner = ContentCombiner::new(
            Arc::clone(&inference),
            config.combination_model.clone(),
            config.temperature,
            config.max_tokens,
            policy,
        );
        let metadata = MetadataExtractor::new(
            Arc::clone(&inference),
            config.query_model.clone(),
            config.temperature,
            config.max_tokens,
            policy,
        );
        let resolver = CodeResolver::new(
            search,
            inference,
            config.query_model.clone(),
            config.search_results,
            config.temperature,
            config.max_tokens,
            policy,
        );

        Self {
            config,
            renderer,
            extractor,
            combiner,
            metadata,
            resolver,
        }
    }

    /// Build the production pipeline: pdfium rendering, edgequake-llm
    /// inference and SerpAPI search, with credentials from the environment
    /// (a `.env` file in the working directory is loaded first).
    ///
    /// # Errors
    /// [`SummaryError::ProviderNotConfigured`] or
    /// [`SummaryError::SearchNotConfigured`] when a credential is missing.
    pub fn from_env(config: SummaryConfig) -> Result<Self, SummaryError> {
        dotenvy::dotenv().ok();

        let renderer = Arc::new(PdfiumRenderer::new(config.max_rendered_pixels));
        let inference = Arc::new(ProviderInference::from_env(
            config.provider_name.as_deref(),
            &config.extraction_model,
        )?);
        let search = Arc::new(SerpApiClient::from_env(config.api_timeout_secs)?);

        Ok(Self::new(config, renderer, inference, search))
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Run one document through every stage.
    ///
    /// When `output_dir` is given and markdown saving is enabled, the
    /// combined markdown is written there as `<stem>_summary.md` once the
    /// record exists.
    pub async fn process_document(
        &self,
        document: &InputDocument,
        output_dir: Option<&Path>,
    ) -> Result<ProcessedDocument, DocumentError> {
        let start = Instant::now();
        let name = document.name.as_str();
        let mut run = Progression::new(name);
        let mut usage = TokenUsage::default();
        info!("Processing {}", document.path.display());

        // ── Render ───────────────────────────────────────────────────────
        let pages = self
            .renderer
            .render(&document.path)
            .await
            .map_err(|e| run.fail(e))?;
        if pages.is_empty() {
            return Err(run.fail(RenderError::NoPages));
        }
        run.advance();

        // ── Extract ──────────────────────────────────────────────────────
        let aggregated = aggregate_pages(
            &self.extractor,
            name,
            pages,
            self.config.concurrency,
            self.config.progress_callback.as_ref(),
        )
        .await
        .map_err(|c| run.fail(c))?;
        usage.add(aggregated.usage);
        run.advance();

        // ── Combine ──────────────────────────────────────────────────────
        let (combined, call_usage) = self
            .combiner
            .combine(&aggregated.pages)
            .await
            .map_err(|e| run.fail(e))?;
        usage.add(call_usage);
        run.advance();

        // ── Metadata ─────────────────────────────────────────────────────
        let (metadata, call_usage) = self
            .metadata
            .extract(name, &combined.markdown)
            .await
            .map_err(|c| run.fail(c))?;
        usage.add(call_usage);
        run.advance();

        // ── Search ───────────────────────────────────────────────────────
        let results = self
            .resolver
            .search(&metadata.query)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance();

        // ── Code ─────────────────────────────────────────────────────────
        let (code, call_usage) = self
            .resolver
            .select(&metadata.query, &metadata.diagnosis, &results)
            .await
            .map_err(|e| run.fail(e))?;
        usage.add(call_usage);
        if code.is_empty() {
            return Err(run.fail(FailureCause::NoCode));
        }
        run.advance();

        let record = InjuryRecord {
            date_of_visit: metadata.date_of_visit,
            diagnosis: metadata.diagnosis,
            reference: metadata.reference,
            icd10_code: code,
        };

        // ── Persist ──────────────────────────────────────────────────────
        if let (Some(dir), true) = (output_dir, self.config.save_markdown) {
            let path = dir.join(document.markdown_file_name());
            write_atomic(&path, &combined.markdown)
                .await
                .map_err(|e| {
                    run.fail(FailureCause::Write {
                        path: path.clone(),
                        detail: e.to_string(),
                    })
                })?;
            debug!("{}: wrote {}", name, path.display());
        }
        run.advance();

        info!(
            "{}: {} {} ({}/{} pages, {}ms)",
            name,
            record.icd10_code,
            record.date_of_visit,
            aggregated.pages.len(),
            aggregated.attempted,
            start.elapsed().as_millis()
        );

        Ok(ProcessedDocument {
            document: name.to_string(),
            record,
            combined,
            pages_attempted: aggregated.attempted,
            pages_extracted: aggregated.pages.len(),
            usage,
        })
    }
}

/// Write `contents` to `path` via a temporary sibling and a rename, so a
/// reader never sees a partial file.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
