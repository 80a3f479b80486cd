use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::super::{
    DEFAULT_MAX_FILE_SIZE, DocumentLoader, FileType, LoadedDocument, StructuralMetadata,
};
use super::{ensure_text, read_bounded};
use crate::error::{MemoryError, Result};

/// Maximum decompressed size of `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

pub struct DocxLoader {
    pub max_file_size: u64,
}

impl Default for DocxLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

fn read_document_xml(bytes: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("word/document.xml: {e}"))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".into());
    }
    Ok(xml)
}

/// Collect the text of every non-empty `<w:p>` paragraph, in document order.
fn extract_paragraphs(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_owned());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

impl DocumentLoader for DocxLoader {
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<LoadedDocument>> + Send + '_>> {
        let path = path.to_path_buf();
        let max_size = self.max_file_size;
        Box::pin(async move {
            let (path, bytes) = read_bounded(&path, max_size).await?;
            let byte_len = bytes.len() as u64;

            let paragraphs = tokio::task::spawn_blocking(move || {
                read_document_xml(&bytes).and_then(|xml| extract_paragraphs(&xml))
            })
            .await
            .map_err(|e| MemoryError::corrupt_file(&path, format!("DOCX parser aborted: {e}")))?
            .map_err(|e| MemoryError::corrupt_file(&path, e))?;

            let text = paragraphs.join("\n\n");
            ensure_text(&path, &text)?;

            let metadata = StructuralMetadata {
                file_type: FileType::Docx,
                page_count: None,
                paragraph_count: paragraphs.len(),
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
        FileType::Docx
    }
}
