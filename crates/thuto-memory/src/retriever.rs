//! Query-time retrieval: embed, search one subject, convert distances to scores, filter.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use serde::Serialize;
use thuto_embed::{EmbedError, EmbeddingService};

use crate::error::{MemoryError, Result};
use crate::manager::VectorStoreManager;
use crate::store::SearchHit;

pub const DEFAULT_K: usize = 5;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.0;

/// Similarity score for an L2 distance: 1 for identical vectors, falling towards 0.
#[must_use]
pub fn score_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Number of neighbours requested when the caller gives none.
    pub k: usize,
    /// Minimum score a result must reach; results with `score >= threshold` are kept.
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl RetrievalConfig {
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `k == 0` or a threshold outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        validate_k(self.k)?;
        validate_threshold(self.score_threshold)
    }
}

fn validate_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(MemoryError::InvalidArgument("k must be positive".into()));
    }
    Ok(())
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(MemoryError::InvalidArgument(format!(
            "score threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

/// Where a retrieved chunk came from; enough to build a citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
    pub chunk_ordinal: usize,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_text: String,
    pub source: SourceRef,
    pub score: f32,
    pub distance: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

impl RetrievedChunk {
    fn from_hit(hit: SearchHit, rank: usize) -> Self {
        let record = hit.record;
        Self {
            chunk_text: record.text,
            source: SourceRef {
                document_id: record.document_id,
                filename: record.source,
                chunk_ordinal: record.chunk_ordinal,
                subject: record.subject,
            },
            score: score_from_distance(hit.distance),
            distance: hit.distance,
            rank,
        }
    }
}

/// Retrieved chunks rendered as one labelled block for a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub context: String,
    pub sources: Vec<SourceRef>,
    pub chunks: Vec<RetrievedChunk>,
}

/// Render chunks as `[Document i] (Source: file, chunk n)` sections separated by blank lines.
#[must_use]
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = writeln!(
            out,
            "[Document {}] (Source: {}, chunk {})",
            i + 1,
            chunk.source.filename,
            chunk.source.chunk_ordinal
        );
        out.push_str(&chunk.chunk_text);
    }
    out
}

/// The single query entry point over the subject stores.
pub struct Retriever {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<EmbeddingService>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `config` is invalid, and `Embedding` if the embedder's
    /// dimension differs from the manager's.
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<EmbeddingService>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dim() != manager.dim() {
            return Err(EmbedError::DimensionMismatch {
                expected: manager.dim(),
                actual: embedder.dim(),
            }
            .into());
        }
        Ok(Self {
            manager,
            embedder,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> RetrievalConfig {
        self.config
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidArgument("query must not be blank".into()));
        }
        Ok(self.embedder.embed(query).await?)
    }

    async fn search_scored(
        &self,
        subject: &str,
        vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let hits = self.manager.search(subject, vector, k).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| score_from_distance(hit.distance) >= threshold)
            .enumerate()
            .map(|(i, hit)| RetrievedChunk::from_hit(hit, i + 1))
            .collect())
    }

    /// Up to `k` chunks of `subject` relevant to `query`, best first, with `score >= threshold`.
    /// An empty result means nothing relevant was found.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject` if the subject has no store (checked before embedding),
    /// `InvalidArgument` for `k == 0`, a blank query or a threshold outside `[0, 1]`, and
    /// `Embedding` if the query cannot be embedded.
    pub async fn retrieve(
        &self,
        subject: &str,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        validate_k(k)?;
        validate_threshold(threshold)?;
        self.manager.store(subject).await?;

        let vector = self.embed_query(query).await?;
        let chunks = self.search_scored(subject, &vector, k, threshold).await?;
        tracing::debug!(subject, k, threshold, results = chunks.len(), "retrieved");
        Ok(chunks)
    }

    /// [`Self::retrieve`] with `k` and the threshold taken from the configuration.
    ///
    /// # Errors
    ///
    /// As [`Self::retrieve`].
    pub async fn retrieve_default(&self, subject: &str, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retrieve(subject, query, self.config.k, self.config.score_threshold)
            .await
    }

    /// Retrieve and render the result as a labelled context block.
    ///
    /// # Errors
    ///
    /// As [`Self::retrieve`].
    pub async fn retrieve_with_context(
        &self,
        subject: &str,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<RetrievedContext> {
        let chunks = self.retrieve(subject, query, k, threshold).await?;
        Ok(RetrievedContext {
            context: format_context(&chunks),
            sources: chunks.iter().map(|c| c.source.clone()).collect(),
            chunks,
        })
    }

    /// Search several subjects with one embedded query. Each subject is searched in its own
    /// store and reported under its own key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject` if any subject has no store; nothing is searched in that case.
    pub async fn retrieve_multi_subject(
        &self,
        subjects: &[&str],
        query: &str,
        k_per_subject: usize,
    ) -> Result<BTreeMap<String, Vec<RetrievedChunk>>> {
        validate_k(k_per_subject)?;
        for subject in subjects {
            self.manager.store(subject).await?;
        }

        let vector = self.embed_query(query).await?;
        let mut out = BTreeMap::new();
        for subject in subjects {
            let chunks = self
                .search_scored(subject, &vector, k_per_subject, self.config.score_threshold)
                .await?;
            out.insert((*subject).to_owned(), chunks);
        }
        Ok(out)
    }

    /// Chunks of `subject` whose embeddings are closest to `text`, skipping chunks with the
    /// same text.
    ///
    /// # Errors
    ///
    /// As [`Self::retrieve`].
    pub async fn similar_chunks(
        &self,
        subject: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        validate_k(k)?;
        self.manager.store(subject).await?;

        let vector = self.embed_query(text).await?;
        let wanted = text.trim();
        let hits = self
            .manager
            .search(subject, &vector, k.saturating_mul(2).max(k.saturating_add(1)))
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.record.text.trim() != wanted)
            .take(k)
            .enumerate()
            .map(|(i, hit)| RetrievedChunk::from_hit(hit, i + 1))
            .collect())
    }
}
