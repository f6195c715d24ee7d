//! Input discovery: list the PDFs directly under the input folder.
//!
//! Only the top level is scanned and the extension check is
//! case-insensitive (`visit.PDF` counts). Files are returned sorted by name
//! so batch output is stable across runs and platforms.

use crate::error::SummaryError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A PDF selected for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDocument {
    /// Full path to the PDF.
    pub path: PathBuf,
    /// Display name used in references and output file names (file stem).
    pub name: String,
}

impl InputDocument {
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    /// `<stem>_summary.md`
    pub fn markdown_file_name(&self) -> String {
        format!("{}_summary.md", self.name)
    }
}

/// Whether a path names a PDF by extension.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// List the PDFs directly under `folder`.
///
/// # Errors
/// - [`SummaryError::InputFolderNotFound`] if `folder` does not exist
/// - [`SummaryError::NotAFolder`] if it is a file
/// - [`SummaryError::NoPdfFiles`] if it holds no PDFs
pub async fn discover_pdfs(folder: &Path) -> Result<Vec<InputDocument>, SummaryError> {
    let metadata = match tokio::fs::metadata(folder).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SummaryError::InputFolderNotFound {
                path: folder.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(SummaryError::InputReadFailed {
                path: folder.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.is_dir() {
        return Err(SummaryError::NotAFolder {
            path: folder.to_path_buf(),
        });
    }

    let read_err = |source| SummaryError::InputReadFailed {
        path: folder.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(folder).await.map_err(read_err)?;
    let mut pdfs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_pdf(&path) {
            pdfs.push(path);
        }
    }

    if pdfs.is_empty() {
        return Err(SummaryError::NoPdfFiles {
            path: folder.to_path_buf(),
        });
    }

    pdfs.sort();
    debug!("Found {} PDFs in {}", pdfs.len(), folder.display());
    Ok(pdfs.into_iter().map(InputDocument::from_path).collect())
}
