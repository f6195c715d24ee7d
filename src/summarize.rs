//! Batch entry points: a folder of clinic PDFs → injury summary.
//!
//! Documents are independent: a failing document is logged and skipped and
//! the batch carries on. Only an unusable input folder, an output folder
//! that cannot be created, or a summary table that cannot be written ends
//! the run with an error.

use crate::config::SummaryConfig;
use crate::document::{write_atomic, Pipeline};
use crate::error::SummaryError;
use crate::output::{BatchOutput, BatchStats, DocumentOutcome, InjuryRecord};
use crate::pipeline::input::{discover_pdfs, InputDocument};
use crate::report::{render_summary_table, sort_records, SUMMARY_FILE_NAME};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Summarise every PDF in `input_dir`, writing results to `output_dir`.
///
/// The input folder is checked before the production pipeline is built from
/// `config` and the environment, so a bad folder is reported as such even
/// when credentials are missing too.
///
/// # Errors
/// Returns `Err(SummaryError)` only for run-level failures:
/// - input folder missing, not a folder, or holding no PDFs
/// - inference or search credentials not configured
/// - output folder or summary table not writable
pub async fn summarize(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: SummaryConfig,
) -> Result<BatchOutput, SummaryError> {
    let documents = discover_pdfs(input_dir.as_ref()).await?;
    let pipeline = Pipeline::from_env(config)?;
    summarize_to_dir(&pipeline, &documents, output_dir.as_ref()).await
}

/// Synchronous wrapper around [`summarize`].
///
/// Creates a temporary tokio runtime internally.
pub fn summarize_sync(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: SummaryConfig,
) -> Result<BatchOutput, SummaryError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SummaryError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(summarize(input_dir, output_dir, config))
}

/// Summarise every PDF in `input_dir` with an existing pipeline.
///
/// Writes `<stem>_summary.md` per recorded document (unless disabled) and
/// always writes `summary_of_injuries.md`, even when no document produced a
/// record.
pub async fn summarize_folder(
    pipeline: &Pipeline,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<BatchOutput, SummaryError> {
    let documents = discover_pdfs(input_dir).await?;
    summarize_to_dir(pipeline, &documents, output_dir).await
}

/// Run already discovered `documents` and write their files to `output_dir`.
pub async fn summarize_to_dir(
    pipeline: &Pipeline,
    documents: &[InputDocument],
    output_dir: &Path,
) -> Result<BatchOutput, SummaryError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| SummaryError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let output = summarize_documents(pipeline, documents, Some(output_dir)).await;

    let summary_path = output_dir.join(SUMMARY_FILE_NAME);
    write_atomic(&summary_path, &output.summary_markdown)
        .await
        .map_err(|source| SummaryError::OutputWriteFailed {
            path: summary_path.clone(),
            source,
        })?;
    info!("Wrote {}", summary_path.display());

    Ok(output)
}

/// Run `documents` through the pipeline and assemble the batch output.
///
/// Up to `document_concurrency` documents are in flight at once; outcomes
/// are reported in input order either way.
pub async fn summarize_documents(
    pipeline: &Pipeline,
    documents: &[InputDocument],
    output_dir: Option<&Path>,
) -> BatchOutput {
    let start = Instant::now();
    let config = pipeline.config();
    let callback = config.progress_callback.as_ref();

    if let Some(cb) = callback {
        cb.on_batch_start(documents.len());
    }
    info!("Summarising {} documents", documents.len());

    let results: Vec<_> = stream::iter(documents.iter().map(|document| async move {
        if let Some(cb) = callback {
            cb.on_document_start(&document.name);
        }
        let result = pipeline.process_document(document, output_dir).await;
        if let Some(cb) = callback {
            match &result {
                Ok(processed) => cb.on_document_recorded(&processed.document, &processed.record),
                Err(e) => cb.on_document_failed(e),
            }
        }
        result
    }))
    .buffered(config.document_concurrency.max(1))
    .collect()
    .await;

    let mut stats = BatchStats {
        documents: documents.len(),
        ..Default::default()
    };
    let mut records: Vec<InjuryRecord> = Vec::new();
    let mut outcomes = Vec::with_capacity(results.len());

    for result in results {
        match result {
            Ok(processed) => {
                stats.recorded += 1;
                stats.pages_attempted += processed.pages_attempted;
                stats.pages_extracted += processed.pages_extracted;
                stats.total_input_tokens += processed.usage.input_tokens;
                stats.total_output_tokens += processed.usage.output_tokens;
                records.push(processed.record.clone());
                outcomes.push(DocumentOutcome::Recorded {
                    document: processed.document,
                    record: processed.record,
                    pages_attempted: processed.pages_attempted,
                    pages_extracted: processed.pages_extracted,
                });
            }
            Err(error) => {
                stats.failed += 1;
                outcomes.push(DocumentOutcome::Failed { error });
            }
        }
    }

    sort_records(&mut records);
    let summary_markdown = render_summary_table(&records);
    stats.total_duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Batch complete: {}/{} documents recorded, {}ms",
        stats.recorded, stats.documents, stats.total_duration_ms
    );
    if let Some(cb) = callback {
        cb.on_batch_complete(stats.documents, stats.recorded);
    }

    BatchOutput {
        records,
        outcomes,
        summary_markdown,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_input_folder_reported_before_credentials() {
        let out = tempfile::tempdir().unwrap();
        let err = summarize("/no/such/clinic/folder", out.path(), SummaryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::InputFolderNotFound { .. }), "got {err}");
    }

    #[tokio::test]
    async fn folder_without_pdfs_reported_before_credentials() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("notes.txt"), b"x").unwrap();
        let err = summarize(input.path(), input.path().join("out"), SummaryConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::NoPdfFiles { .. }), "got {err}");
        assert!(!input.path().join("out").exists());
    }
}
