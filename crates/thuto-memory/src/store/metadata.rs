use serde::{Deserialize, Serialize};

/// Attribution attached to one indexed vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    /// Source file name, for citations.
    pub source: String,
    pub chunk_ordinal: usize,
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub tombstoned: bool,
}

/// Current on-disk metadata format.
pub(crate) const METADATA_FORMAT_VERSION: u32 = 1;

/// The structured half of a persisted generation.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetadataFile {
    pub format_version: u32,
    pub subject: String,
    pub generation: u64,
    pub dim: usize,
    pub count: usize,
    /// blake3 of `index.bin`, hex encoded.
    pub index_checksum: String,
    pub records: Vec<ChunkRecord>,
}
