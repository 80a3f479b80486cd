//! Offline feature-hashing embedder.
//!
//! Every lowercase alphanumeric token is hashed with blake3 into one of `dim` buckets with a
//! sign taken from the hash, and the resulting bag-of-words vector is L2-normalized. Texts that
//! share vocabulary land close together, which is enough for tests and air-gapped use, and the
//! output depends only on the input string.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, l2_normalize};

pub const DEFAULT_HASH_DIM: usize = 384;

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dim: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIM)
    }
}

impl HashEmbedder {
    /// A zero dimension is bumped to 1.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&bytes[..8]);
            let bucket = u64::from_le_bytes(head) % self.dim as u64;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            #[allow(clippy::cast_possible_truncation)]
            {
                v[bucket as usize] += sign;
            }
        }
        l2_normalize(&mut v);
        v
    }
}

impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}
