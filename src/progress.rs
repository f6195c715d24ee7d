//! Progress-callback trait for batch, document and page events.
//!
//! Inject an [`Arc<dyn SummaryProgressCallback>`] via
//! [`crate::config::SummaryConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a folder.
//!
//! The trait is `Send + Sync`: page events arrive from concurrently running
//! extraction tasks and, with `document_concurrency > 1`, document events
//! may interleave as well.
//!
//! # Example
//!
//! ```rust
//! use injury_summary::{SummaryConfig, SummaryProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl SummaryProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _document: &str, _page_num: usize, _total_pages: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = SummaryConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::DocumentError;
use crate::output::InjuryRecord;
use std::sync::Arc;

/// Called by the pipeline as it processes a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait SummaryProgressCallback: Send + Sync {
    /// Called once before the first document starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the render stage.
    fn on_document_start(&self, document: &str) {
        let _ = document;
    }

    /// Called when a page's extraction call returns valid content.
    fn on_page_complete(&self, document: &str, page_num: usize, total_pages: usize) {
        let _ = (document, page_num, total_pages);
    }

    /// Called when a page is dropped because extraction failed.
    fn on_page_error(&self, document: &str, page_num: usize, total_pages: usize, error: &str) {
        let _ = (document, page_num, total_pages, error);
    }

    /// Called when a document produced its injury record.
    fn on_document_recorded(&self, document: &str, record: &InjuryRecord) {
        let _ = (document, record);
    }

    /// Called when a document was skipped.
    fn on_document_failed(&self, error: &DocumentError) {
        let _ = error;
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, recorded: usize) {
        let _ = (total_documents, recorded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SummaryProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SummaryConfig`].
pub type ProgressCallback = Arc<dyn SummaryProgressCallback>;
