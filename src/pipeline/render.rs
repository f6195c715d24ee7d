//! PDF rasterisation: turn one PDF into an ordered list of page images.
//!
//! The renderer is an injected collaborator ([`PageRenderer`]); the
//! production implementation, [`PdfiumRenderer`], wraps pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which uses thread-local
//! state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves rendering and PNG encoding onto the
//! blocking pool so the Tokio workers keep driving in-flight API calls.

use crate::error::RenderError;
use crate::pipeline::encode;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One rendered page, ready for the extractor.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page_number: usize,
    /// Base64-encoded page image.
    pub image: ImageData,
}

/// Converts a PDF into page images in page order.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render every page of `pdf_path`.
    ///
    /// Pages that fail individually are dropped; an `Err` means the document
    /// as a whole could not be rendered (or no page could).
    async fn render(&self, pdf_path: &Path) -> Result<Vec<RenderedPage>, RenderError>;
}

/// pdfium-backed renderer.
///
/// Binds to `PDFIUM_LIB_PATH` when set, otherwise to the system library.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_rendered_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(max_rendered_pixels: u32) -> Self {
        Self {
            max_rendered_pixels,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, pdf_path: &Path) -> Result<Vec<RenderedPage>, RenderError> {
        let path = pdf_path.to_path_buf();
        let max_pixels = self.max_rendered_pixels;

        tokio::task::spawn_blocking(move || render_blocking(&path, max_pixels))
            .await
            .map_err(|e| RenderError::Internal(format!("render task panicked: {e}")))?
    }
}

/// Verify the `%PDF` magic bytes so non-PDFs get a clear error instead of a
/// pdfium failure.
fn check_magic(pdf_path: &Path) -> Result<(), RenderError> {
    let mut file = std::fs::File::open(pdf_path).map_err(|e| RenderError::Unreadable {
        detail: e.to_string(),
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|e| RenderError::Unreadable {
        detail: e.to_string(),
    })?;
    if &magic != b"%PDF" {
        return Err(RenderError::NotAPdf { magic });
    }
    Ok(())
}

fn bind_pdfium() -> Result<Pdfium, RenderError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(PathBuf::from(lib))
            .or_else(|_| Pdfium::bind_to_system_library()),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::PdfiumBinding(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn render_blocking(pdf_path: &Path, max_pixels: u32) -> Result<Vec<RenderedPage>, RenderError> {
    check_magic(pdf_path)?;
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.to_lowercase().contains("password") {
            RenderError::PasswordRequired
        } else {
            RenderError::Corrupt { detail: err_str }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("{}: {} pages", pdf_path.display(), total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;

        let bitmap = match page.render_with_config(&render_config) {
            Ok(b) => b,
            Err(e) => {
                warn!("Page {}: rasterisation failed: {:?}", page_number, e);
                continue;
            }
        };
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );

        match encode::encode_page(page_number, &image) {
            Ok(data) => results.push(RenderedPage {
                page_number,
                image: data,
            }),
            Err(e) => warn!("Page {}: image encoding failed: {}", page_number, e),
        }
    }

    if results.is_empty() {
        return Err(RenderError::NoPages);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_check_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"GIF89a...").unwrap();
        let err = check_magic(&path).unwrap_err();
        assert!(matches!(err, RenderError::NotAPdf { magic } if &magic == b"GIF8"));
    }

    #[test]
    fn magic_check_accepts_pdf_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        assert!(check_magic(&path).is_ok());
    }

    #[test]
    fn magic_check_reports_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            check_magic(&path).unwrap_err(),
            RenderError::Unreadable { .. }
        ));
    }
}
