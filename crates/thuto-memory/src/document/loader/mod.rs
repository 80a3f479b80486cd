mod docx;
mod pdf;
mod text;

pub use docx::DocxLoader;
pub use pdf::PdfLoader;
pub use text::{TextEncoding, TextLoader};

use std::path::{Path, PathBuf};

use super::{DEFAULT_MAX_FILE_SIZE, DocumentLoader, FileType, LoadedDocument};
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub max_file_size: u64,
    /// Encoding for plain-text files without a byte-order mark; UTF-8 when `None`.
    pub encoding: Option<TextEncoding>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            encoding: None,
        }
    }
}

/// Load `path` as `file_type`.
///
/// # Errors
///
/// Returns `FileTooLarge` before parsing oversized files, `CorruptFile` when no text can be
/// extracted, `Encoding` for undecodable text files, or `Io` if the file cannot be read.
pub async fn load(
    path: &Path,
    file_type: FileType,
    options: &LoaderOptions,
) -> Result<LoadedDocument> {
    match file_type {
        FileType::Pdf => {
            PdfLoader {
                max_file_size: options.max_file_size,
            }
            .load(path)
            .await
        }
        FileType::Docx => {
            DocxLoader {
                max_file_size: options.max_file_size,
            }
            .load(path)
            .await
        }
        FileType::Txt => {
            TextLoader {
                max_file_size: options.max_file_size,
                encoding: options.encoding,
            }
            .load(path)
            .await
        }
    }
}

/// List the supported files directly inside `dir`, sorted by file name.
///
/// # Errors
///
/// Returns `Io` if the directory cannot be read.
pub async fn discover(dir: &Path) -> Result<Vec<(PathBuf, FileType)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match FileType::from_path(&path) {
            Ok(file_type) => found.push((path, file_type)),
            Err(_) => tracing::debug!(path = %path.display(), "skipping unsupported file"),
        }
    }
    found.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(found)
}

/// Load every supported file in `dir`. Files that fail to load are logged and skipped.
///
/// # Errors
///
/// Returns `Io` if the directory cannot be read.
pub async fn load_directory(dir: &Path, options: &LoaderOptions) -> Result<Vec<LoadedDocument>> {
    let mut documents = Vec::new();
    for (path, file_type) in discover(dir).await? {
        match load(&path, file_type, options).await {
            Ok(doc) => documents.push(doc),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load document"),
        }
    }
    tracing::info!(dir = %dir.display(), count = documents.len(), "loaded directory");
    Ok(documents)
}

/// Canonicalize `path`, enforce the size limit and read the whole file.
pub(crate) async fn read_bounded(path: &Path, max_size: u64) -> Result<(PathBuf, Vec<u8>)> {
    let path = tokio::fs::canonicalize(path).await?;
    let meta = tokio::fs::metadata(&path).await?;
    if meta.len() > max_size {
        return Err(MemoryError::FileTooLarge {
            size: meta.len(),
            limit: max_size,
        });
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok((path, bytes))
}

pub(crate) fn count_paragraphs(text: &str) -> usize {
    text.split(super::PAGE_BREAK)
        .flat_map(|page| page.split("\n\n"))
        .filter(|p| !p.trim().is_empty())
        .count()
}

/// Fail with `CorruptFile` when nothing but whitespace was extracted.
pub(crate) fn ensure_text(path: &Path, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(MemoryError::corrupt_file(path, "no extractable text"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.TXT"), "a").unwrap();
        std::fs::write(dir.path().join("c.xlsx"), "c").unwrap();
        std::fs::create_dir(dir.path().join("d.txt")).unwrap();

        let found = discover(dir.path()).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.txt"]);
    }

    #[tokio::test]
    async fn load_directory_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.txt"), "photosynthesis").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        std::fs::write(dir.path().join("broken.docx"), "not a zip").unwrap();

        let docs = load_directory(dir.path(), &LoaderOptions::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "photosynthesis");
    }

    #[tokio::test]
    async fn dispatch_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.bin");
        std::fs::write(&file, "plain words").unwrap();

        let doc = load(&file, FileType::Txt, &LoaderOptions::default())
            .await
            .unwrap();
        assert_eq!(doc.metadata.file_type, FileType::Txt);

        let err = load(&file, FileType::Pdf, &LoaderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::CorruptFile { .. }));
    }

    #[test]
    fn paragraphs_counted_across_pages() {
        let text = format!("one\n\ntwo{}three", super::super::PAGE_BREAK);
        assert_eq!(count_paragraphs(&text), 3);
    }
}
