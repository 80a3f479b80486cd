use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thuto_embed::EmbedServiceConfig;
use thuto_embed::openai::DEFAULT_OPENAI_BASE_URL;
use thuto_memory::document::DEFAULT_MAX_FILE_SIZE;
use thuto_memory::document::splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use thuto_memory::retriever::{DEFAULT_K, DEFAULT_SCORE_THRESHOLD};
use thuto_memory::store::DEFAULT_COMPACTION_THRESHOLD;
use thuto_memory::{ChunkConfig, LoaderOptions, RetrievalConfig, StoreConfig, TextEncoding};

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Wrapper for sensitive strings with redacted Debug/Display.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Offline feature-hashing embedder.
    #[default]
    Hash,
    OpenAi,
    Candle,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::OpenAi => "openai",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.into()
}

fn default_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.into()
}

fn default_batch_size() -> usize {
    thuto_embed::service::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Expected output dimension. The hash provider uses it as its dimension; other
    /// providers fail at startup when the model disagrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Only ever set from `THUTO_EMBEDDING_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<Secret>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            dimensions: None,
            batch_size: default_batch_size(),
            api_key: None,
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn service_config(&self) -> EmbedServiceConfig {
        EmbedServiceConfig {
            batch_size: self.batch_size,
            expected_dim: self.dimensions,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Maximum words per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words repeated from the end of one chunk at the start of the next.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub respect_pages: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            respect_pages: false,
        }
    }
}

impl From<ChunkingConfig> for ChunkConfig {
    fn from(c: ChunkingConfig) -> Self {
        Self {
            chunk_size: c.chunk_size,
            overlap: c.overlap,
            respect_pages: c.respect_pages,
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_score_threshold() -> f32 {
    DEFAULT_SCORE_THRESHOLD
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RetrievalSection {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Minimum `1 / (1 + distance)` score for a chunk to be returned.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

impl From<RetrievalSection> for RetrievalConfig {
    fn from(r: RetrievalSection) -> Self {
        Self {
            k: r.k,
            score_threshold: r.score_threshold,
        }
    }
}

fn default_data_dir() -> String {
    "./data/subjects".into()
}

fn default_compaction_threshold() -> f32 {
    DEFAULT_COMPACTION_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Tombstone ratio that triggers compaction after a delete.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: PathBuf::from(&self.data_dir),
            compaction_threshold: self.compaction_threshold,
        }
    }
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Upper bound on loading, chunking and embedding one document.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Encoding of plain-text files without a byte-order mark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<TextEncoding>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            encoding: None,
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            max_file_size: self.max_file_size,
            encoding: self.encoding,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
