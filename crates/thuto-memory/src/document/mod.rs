pub mod loader;
pub mod splitter;
pub mod types;

pub use loader::{DocxLoader, LoaderOptions, PdfLoader, TextEncoding, TextLoader, discover, load, load_directory};
pub use splitter::{ChunkConfig, Chunker, chunk};
pub use types::{Chunk, DocumentRecord, FileType, LoadedDocument, StructuralMetadata};

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::Result;

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Separator placed between PDF pages in extracted text.
pub const PAGE_BREAK: &str = "\n\x0C\n";

pub trait DocumentLoader: Send + Sync {
    /// Extract the text of the file at `path` without modifying it.
    fn load(
        &self,
        path: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<LoadedDocument>> + Send + '_>>;

    fn file_type(&self) -> FileType;
}
