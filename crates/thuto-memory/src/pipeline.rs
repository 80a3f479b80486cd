//! Write path: load a document, chunk it, embed the chunks and commit them to the subject.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thuto_embed::EmbeddingService;

use crate::document::{self, Chunker, DocumentRecord, LoaderOptions};
use crate::error::{MemoryError, Result};
use crate::manager::VectorStoreManager;
use crate::store::{ChunkRecord, validate_subject};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub subject: String,
    pub chunk_count: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Vectors and records for one document, ready to commit.
struct Prepared {
    vectors: Vec<Vec<f32>>,
    records: Vec<ChunkRecord>,
}

pub struct IngestionPipeline {
    manager: Arc<VectorStoreManager>,
    embedder: Arc<EmbeddingService>,
    chunker: Chunker,
    loader: LoaderOptions,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunker", &self.chunker.config())
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        manager: Arc<VectorStoreManager>,
        embedder: Arc<EmbeddingService>,
        chunker: Chunker,
        loader: LoaderOptions,
    ) -> Self {
        Self {
            manager,
            embedder,
            chunker,
            loader,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<VectorStoreManager> {
        &self.manager
    }

    async fn prepare(&self, doc: &DocumentRecord) -> Result<Prepared> {
        validate_subject(&doc.subject)?;
        let loaded = document::load(&doc.path, doc.file_type, &self.loader).await?;
        let chunks = self.chunker.chunk_document(&doc.id, &loaded.text);
        if chunks.is_empty() {
            return Err(MemoryError::corrupt_file(&doc.path, "no chunks produced"));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let source = loaded.filename();
        let records = chunks
            .into_iter()
            .map(|c| ChunkRecord {
                document_id: c.document_id,
                source: source.clone(),
                chunk_ordinal: c.ordinal,
                subject: doc.subject.clone(),
                text: c.text,
                tombstoned: false,
            })
            .collect();
        Ok(Prepared { vectors, records })
    }

    async fn commit(&self, doc: &DocumentRecord, prepared: Prepared, started: Instant) -> Result<IngestReport> {
        let chunk_count = self
            .manager
            .upsert_document(&doc.subject, &doc.id, prepared.vectors, prepared.records)
            .await?;
        let elapsed = started.elapsed();
        tracing::info!(
            subject = %doc.subject,
            document_id = %doc.id,
            chunks = chunk_count,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "document ingested"
        );
        Ok(IngestReport {
            document_id: doc.id.clone(),
            subject: doc.subject.clone(),
            chunk_count,
            elapsed,
        })
    }

    /// Index `doc` into its subject, replacing any chunks previously indexed under its id.
    /// All-or-nothing: on error the subject is left as it was and the call can be retried.
    ///
    /// # Errors
    ///
    /// Returns loader errors (`UnsupportedFormat`, `CorruptFile`, `Encoding`, `FileTooLarge`),
    /// `Embedding` if the backend fails, and store errors from the commit.
    pub async fn ingest(&self, doc: &DocumentRecord) -> Result<IngestReport> {
        let started = Instant::now();
        let prepared = self.prepare(doc).await?;
        self.commit(doc, prepared, started).await
    }

    /// [`Self::ingest`] with loading, chunking and embedding bounded by `limit`. The commit
    /// is not cancelled once it has started.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if preparation exceeds `limit`, otherwise as [`Self::ingest`].
    pub async fn ingest_with_timeout(&self, doc: &DocumentRecord, limit: Duration) -> Result<IngestReport> {
        let started = Instant::now();
        let prepared = tokio::time::timeout(limit, self.prepare(doc))
            .await
            .map_err(|_| {
                tracing::warn!(subject = %doc.subject, document_id = %doc.id, ?limit, "ingestion timed out");
                MemoryError::Timeout(limit)
            })??;
        self.commit(doc, prepared, started).await
    }

    /// Ingest every supported file directly inside `dir`, using each file name as the
    /// document id. Failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad subject name or `Io` if `dir` cannot be listed.
    pub async fn ingest_directory(&self, subject: &str, dir: &Path) -> Result<Vec<IngestReport>> {
        validate_subject(subject)?;
        let mut reports = Vec::new();
        for (path, file_type) in document::discover(dir).await? {
            let id = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            let doc = DocumentRecord {
                id,
                subject: subject.to_owned(),
                path,
                file_type,
            };
            match self.ingest(&doc).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::warn!(path = %doc.path.display(), error = %e, "skipping document");
                }
            }
        }
        Ok(reports)
    }

    /// Re-embed every live chunk of `subject` from its stored texts and rebuild the index.
    /// Recovers a subject whose index file is corrupt or was built with another model.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject` if nothing is persisted for `subject`, `CorruptIndex` if its
    /// metadata is unreadable, or `Embedding` if the backend fails.
    pub async fn reindex(&self, subject: &str) -> Result<usize> {
        validate_subject(subject)?;
        let records: Vec<ChunkRecord> = self
            .manager
            .persisted_records(subject)
            .await?
            .ok_or_else(|| MemoryError::UnknownSubject(subject.to_owned()))?
            .into_iter()
            .filter(|r| !r.tombstoned)
            .collect();

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };
        let count = records.len();
        self.manager.rebuild(subject, vectors, records).await?;
        tracing::info!(subject, chunks = count, "subject reindexed");
        Ok(count)
    }
}
