//! Page aggregation: concurrent extraction with ordered reassembly.
//!
//! Every page becomes its own Tokio task, but a task only starts its call
//! after acquiring a permit from a semaphore sized to `concurrency`, so at
//! most that many extraction calls are in flight per document. Tasks finish
//! in any order; results are keyed by page number in a `BTreeMap`, which
//! yields them back in page order regardless of completion order.
//!
//! A failed page is logged and left out. It is never replaced by a
//! placeholder, and it never cancels sibling calls already in flight.

use crate::error::FailureCause;
use crate::output::{PageContent, TokenUsage};
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::render::RenderedPage;
use crate::progress::ProgressCallback;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Ordered, failure-filtered extraction result for one document.
#[derive(Debug, Clone)]
pub struct AggregatedPages {
    /// Successfully extracted pages, strictly ascending by page number.
    pub pages: Vec<PageContent>,
    /// Pages handed to the extractor.
    pub attempted: usize,
    pub usage: TokenUsage,
}

/// Extract all `pages` with at most `concurrency` calls in flight.
///
/// Returns [`FailureCause::NoContent`] when no page survives.
pub async fn aggregate_pages(
    extractor: &PageExtractor,
    document: &str,
    pages: Vec<RenderedPage>,
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> Result<AggregatedPages, FailureCause> {
    let total_pages = pages.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for page in pages {
        let semaphore = Arc::clone(&semaphore);
        let extractor = extractor.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = extractor.extract(&page).await;
            (page.page_number, result)
        });
    }

    let mut collected: BTreeMap<usize, PageContent> = BTreeMap::new();
    let mut usage = TokenUsage::default();

    while let Some(joined) = tasks.join_next().await {
        let (page_number, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                error!("{}: extraction task failed: {}", document, e);
                continue;
            }
        };
        match result {
            Ok((content, call_usage)) => {
                usage.add(call_usage);
                if let Some(cb) = progress {
                    cb.on_page_complete(document, page_number, total_pages);
                }
                collected.insert(page_number, content);
            }
            Err(e) => {
                warn!("{}: page {} dropped: {}", document, page_number, e);
                if let Some(cb) = progress {
                    cb.on_page_error(document, page_number, total_pages, &e.to_string());
                }
            }
        }
    }

    debug!(
        "{}: {}/{} pages extracted",
        document,
        collected.len(),
        total_pages
    );

    if collected.is_empty() {
        return Err(FailureCause::NoContent {
            attempted: total_pages,
        });
    }

    Ok(AggregatedPages {
        pages: collected.into_values().collect(),
        attempted: total_pages,
        usage,
    })
}
