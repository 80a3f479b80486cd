//! Subject-scoped retrieval core: document loading, chunking, per-subject vector stores,
//! ingestion and retrieval.

pub mod document;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod retriever;
pub mod store;

pub use document::{
    Chunk, ChunkConfig, Chunker, DocumentRecord, FileType, LoadedDocument, LoaderOptions,
    StructuralMetadata, TextEncoding,
};
pub use error::{ErrorKind, MemoryError, Result};
pub use manager::{StoreConfig, VectorStoreManager};
pub use pipeline::{IngestReport, IngestionPipeline};
pub use retriever::{
    RetrievalConfig, RetrievedChunk, RetrievedContext, Retriever, SourceRef, score_from_distance,
};
pub use store::{ChunkRecord, SearchHit, StoreStats, SubjectStore};
