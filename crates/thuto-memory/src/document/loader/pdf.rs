use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use super::super::{
    DEFAULT_MAX_FILE_SIZE, DocumentLoader, FileType, LoadedDocument, PAGE_BREAK,
    StructuralMetadata,
};
use super::{count_paragraphs, ensure_text, read_bounded};
use crate::error::{MemoryError, Result};

pub struct PdfLoader {
    pub max_file_size: u64,
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Trim each page and join them with [`PAGE_BREAK`].
fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}

impl DocumentLoader for PdfLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<LoadedDocument>> + Send + '_>> {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let (path, bytes) = read_bounded(&path, max_size).await?;
            let byte_len = bytes.len() as u64;

            // The parser may panic on malformed input; the join error carries it.
            let pages = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| MemoryError::corrupt_file(&path, format!("PDF parser aborted: {e}")))?
            .map_err(|e| MemoryError::corrupt_file(&path, e))?;

            let text = join_pages(&pages);
            ensure_text(&path, &text)?;

            tracing::debug!(path = %path.display(), pages = pages.len(), "extracted PDF");

            let metadata = StructuralMetadata {
                file_type: FileType::Pdf,
                page_count: Some(pages.len()),
                paragraph_count: count_paragraphs(&text),
                byte_len,
            };
            Ok(LoadedDocument {
                path,
                text,
                metadata,
            })
        })
    }

    fn file_type(&self) -> FileType {
        FileType::Pdf
    }
}
