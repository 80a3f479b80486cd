use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
}

impl FileType {
    pub const ALL: [Self; 3] = [Self::Pdf, Self::Docx, Self::Txt];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }

    /// Infer the type from a file extension, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` for missing or unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self, MemoryError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| MemoryError::UnsupportedFormat(path.display().to_string()))?;
        ext.parse()
    }
}

impl FromStr for FileType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" | "text" => Ok(Self::Txt),
            other => Err(MemoryError::UnsupportedFormat(other.to_owned())),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page/section facts recovered while extracting text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMetadata {
    pub file_type: FileType,
    /// Number of pages for PDFs; `None` for formats without pages.
    pub page_count: Option<usize>,
    pub paragraph_count: usize,
    /// Size of the source file in bytes.
    pub byte_len: u64,
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub text: String,
    pub metadata: StructuralMetadata,
}

impl LoadedDocument {
    /// File name used for citations.
    #[must_use]
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// A contiguous span of a document, sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub word_count: usize,
    pub char_len: usize,
}

/// What the caller knows about a document it wants indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: String,
    pub subject: String,
    pub path: PathBuf,
    pub file_type: FileType,
}

impl DocumentRecord {
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` if the type cannot be inferred from the extension.
    pub fn from_path(
        id: impl Into<String>,
        subject: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, MemoryError> {
        let path = path.into();
        let file_type = FileType::from_path(&path)?;
        Ok(Self {
            id: id.into(),
            subject: subject.into(),
            path,
            file_type,
        })
    }
}
