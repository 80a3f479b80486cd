use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::super::{
    DEFAULT_MAX_FILE_SIZE, DocumentLoader, FileType, LoadedDocument, StructuralMetadata,
};
use super::{count_paragraphs, ensure_text, read_bounded};
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl std::str::FromStr for TextEncoding {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf-16-le" | "utf16le" => Ok(Self::Utf16Le),
            "utf-16be" | "utf-16-be" | "utf16be" => Ok(Self::Utf16Be),
            other => Err(MemoryError::InvalidArgument(format!(
                "unsupported text encoding: {other}"
            ))),
        }
    }
}

pub struct TextLoader {
    pub max_file_size: u64,
    pub encoding: Option<TextEncoding>,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            encoding: None,
        }
    }
}

/// Strip a byte-order mark, returning the encoding it announces.
fn sniff_bom(bytes: &[u8]) -> Option<(TextEncoding, &[u8])> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        Some((TextEncoding::Utf8, rest))
    } else if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        Some((TextEncoding::Utf16Le, rest))
    } else if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some((TextEncoding::Utf16Be, rest))
    } else {
        None
    }
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> std::result::Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err("odd number of bytes in UTF-16 input".into());
    }
    let units = bytes.chunks_exact(2).map(|pair| from_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| e.to_string())
}

pub(crate) fn decode(bytes: &[u8], declared: Option<TextEncoding>) -> std::result::Result<String, String> {
    let (encoding, body) = match sniff_bom(bytes) {
        Some(found) => found,
        None => (declared.unwrap_or(TextEncoding::Utf8), bytes),
    };
    let text = match encoding {
        TextEncoding::Utf8 => std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|e| e.to_string())?,
        TextEncoding::Utf16Le => decode_utf16(body, u16::from_le_bytes)?,
        TextEncoding::Utf16Be => decode_utf16(body, u16::from_be_bytes)?,
    };
    Ok(text.replace("\r\n", "\n"))
}

impl DocumentLoader for TextLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<LoadedDocument>> + Send + '_>> {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        let declared = self.encoding;
        Box::pin(async move {
            let (path, bytes) = read_bounded(&path, max_size).await?;

            let text = decode(&bytes, declared).map_err(|reason| MemoryError::Encoding {
                path: path.display().to_string(),
                reason,
            })?;
            ensure_text(&path, &text)?;

            let metadata = StructuralMetadata {
                file_type: FileType::Txt,
                page_count: None,
                paragraph_count: count_paragraphs(&text),
                byte_len: bytes.len() as u64,
            };
            Ok(LoadedDocument {
                path,
                text,
                metadata,
            })
        })
    }

    fn file_type(&self) -> FileType {
        FileType::Txt
    }
}
