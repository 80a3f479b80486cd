//! One subject's vector index plus its metadata records.
//!
//! Position `i` in the index always corresponds to `records[i]`. Deletion tombstones records;
//! tombstoned positions are skipped by search and physically dropped by compaction.

pub mod index;
pub mod metadata;
mod persist;

pub use index::{FlatIndex, l2_distance};
pub use metadata::ChunkRecord;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{MemoryError, Result};

/// Tombstone ratio above which a store compacts itself after a delete.
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.3;
pub const MAX_SUBJECT_LEN: usize = 64;

/// Subject names double as directory names.
///
/// # Errors
///
/// Returns `InvalidArgument` unless the name is 1-64 ASCII letters, digits, `-` or `_`.
pub fn validate_subject(subject: &str) -> Result<()> {
    let valid = !subject.is_empty()
        && subject.len() <= MAX_SUBJECT_LEN
        && subject
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(MemoryError::InvalidArgument(format!(
            "invalid subject name {subject:?}: use 1-{MAX_SUBJECT_LEN} letters, digits, '-' or '_'"
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: ChunkRecord,
    pub distance: f32,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub subject: String,
    pub dim: usize,
    pub total_vectors: usize,
    pub live_vectors: usize,
    pub tombstones: usize,
    pub tombstone_ratio: f32,
    pub documents: usize,
    pub generation: u64,
    pub halted: Option<String>,
}

#[derive(Debug)]
pub struct SubjectStore {
    subject: String,
    dir: PathBuf,
    index: FlatIndex,
    records: Vec<ChunkRecord>,
    generation: u64,
    compaction_threshold: f32,
    halted: Option<String>,
    retired: bool,
}

impl SubjectStore {
    /// An empty in-memory store. If the subject directory already holds a (possibly damaged)
    /// generation, the next persist writes the generation after it. An unreadable `CURRENT`
    /// pointer is logged and the newest `gen-<n>` directory on disk is used instead, so no
    /// existing generation is overwritten in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad subject name or a zero dimension.
    pub fn create(root: &Path, subject: &str, dim: usize, compaction_threshold: f32) -> Result<Self> {
        validate_subject(subject)?;
        if dim == 0 {
            return Err(MemoryError::InvalidArgument("index dimension must be positive".into()));
        }
        let dir = root.join(subject);
        let generation = match persist::read_current(&dir) {
            Ok(current) => current.map_or(0, |(generation, _)| generation),
            Err(e) => {
                let latest = persist::latest_generation_on_disk(&dir);
                tracing::warn!(
                    subject,
                    error = %e,
                    latest,
                    "unreadable CURRENT pointer, continuing after the newest generation on disk"
                );
                latest
            }
        };
        Ok(Self {
            subject: subject.to_owned(),
            dir,
            index: FlatIndex::new(dim),
            records: Vec::new(),
            generation,
            compaction_threshold,
            halted: None,
            retired: false,
        })
    }

    /// Load the persisted store for `subject`, or `None` if it was never persisted.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if the persisted index and metadata disagree.
    pub fn open(root: &Path, subject: &str, compaction_threshold: f32) -> Result<Option<Self>> {
        validate_subject(subject)?;
        let dir = root.join(subject);
        let Some(loaded) = persist::load_generation(subject, &dir)? else {
            return Ok(None);
        };
        tracing::debug!(subject, generation = loaded.generation, vectors = loaded.index.len(), "loaded subject store");
        Ok(Some(Self {
            subject: subject.to_owned(),
            dir,
            index: loaded.index,
            records: loaded.records,
            generation: loaded.generation,
            compaction_threshold,
            halted: None,
            retired: false,
        }))
    }

    /// Records of the persisted generation, readable even when its index file is damaged.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if the metadata itself is unreadable.
    pub fn persisted_records(root: &Path, subject: &str) -> Result<Option<Vec<ChunkRecord>>> {
        validate_subject(subject)?;
        persist::load_records(subject, &root.join(subject))
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.index.dim()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn live_len(&self) -> usize {
        self.records.iter().filter(|r| !r.tombstoned).count()
    }

    #[must_use]
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn halted_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    fn tombstone_ratio(&self) -> f32 {
        if self.records.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = (self.len() - self.live_len()) as f32 / self.len() as f32;
        ratio
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.retired {
            return Err(MemoryError::UnknownSubject(self.subject.clone()));
        }
        match &self.halted {
            Some(reason) => Err(MemoryError::WritesHalted {
                subject: self.subject.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Detach the store from its directory after the subject was cleared. Every later write
    /// fails with `UnknownSubject` and leaves the store unchanged.
    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    fn halt(&mut self, reason: String) {
        tracing::error!(subject = %self.subject, %reason, "halting writes to subject");
        self.halted = Some(reason);
    }

    /// Validate a batch without modifying anything except the halt flag.
    fn check_batch(&mut self, vectors: &[Vec<f32>], records: &[ChunkRecord]) -> Result<()> {
        if vectors.len() != records.len() {
            return Err(MemoryError::InvalidArgument(format!(
                "{} vectors but {} metadata records",
                vectors.len(),
                records.len()
            )));
        }
        if let Some(r) = records.iter().find(|r| r.subject != self.subject) {
            return Err(MemoryError::InvalidArgument(format!(
                "record for subject {:?} added to subject {:?}",
                r.subject, self.subject
            )));
        }
        if let Some(pos) = self.index.first_mismatch(vectors) {
            let actual = vectors[pos].len();
            let expected = self.index.dim();
            self.halt(format!("vector of dimension {actual} offered to a {expected}-dimensional index"));
            return Err(MemoryError::DimensionMismatch {
                subject: self.subject.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Append vectors and their records in memory. All-or-nothing: on error nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `WritesHalted` after a consistency error, `InvalidArgument` if the slices differ
    /// in length, or `DimensionMismatch` (which halts further writes).
    pub fn add(&mut self, vectors: &[Vec<f32>], records: Vec<ChunkRecord>) -> Result<()> {
        self.ensure_writable()?;
        self.check_batch(vectors, &records)?;
        self.push_unchecked(vectors, records);
        Ok(())
    }

    fn push_unchecked(&mut self, vectors: &[Vec<f32>], records: Vec<ChunkRecord>) {
        self.index.add(vectors);
        self.records.extend(records.into_iter().map(|mut r| {
            r.tombstoned = false;
            r
        }));
    }

    /// Write the current state as a new generation.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the generation cannot be written; the previous generation stays live.
    /// Returns `UnknownSubject` once the subject has been cleared.
    pub fn persist(&mut self) -> Result<()> {
        if self.retired {
            return Err(MemoryError::UnknownSubject(self.subject.clone()));
        }
        let next = self.generation + 1;
        persist::write_generation(&self.dir, &self.subject, next, &self.index, &self.records)?;
        self.generation = next;
        tracing::debug!(subject = %self.subject, generation = next, vectors = self.len(), "persisted subject store");
        Ok(())
    }

    fn live_positions_of(&self, document_id: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.tombstoned && r.document_id == document_id)
            .map(|(i, _)| i)
            .collect()
    }

    fn set_tombstones(&mut self, positions: &[usize], value: bool) {
        for &i in positions {
            self.records[i].tombstoned = value;
        }
    }

    /// Append a batch and persist it as one unit.
    ///
    /// # Errors
    ///
    /// See [`Self::add`] and [`Self::persist`]; on error the store is unchanged.
    pub fn append(&mut self, vectors: &[Vec<f32>], records: Vec<ChunkRecord>) -> Result<usize> {
        self.commit(None, vectors, records)
    }

    /// Replace every chunk of `document_id` with the given ones and persist.
    ///
    /// Previous chunks of the document are tombstoned, the new ones appended, and the result
    /// persisted; if any step fails all in-memory changes are undone.
    ///
    /// # Errors
    ///
    /// See [`Self::add`] and [`Self::persist`].
    pub fn upsert_document(
        &mut self,
        document_id: &str,
        vectors: &[Vec<f32>],
        records: Vec<ChunkRecord>,
    ) -> Result<usize> {
        if let Some(r) = records.iter().find(|r| r.document_id != document_id) {
            return Err(MemoryError::InvalidArgument(format!(
                "record of document {:?} in batch for {document_id:?}",
                r.document_id
            )));
        }
        self.commit(Some(document_id), vectors, records)
    }

    fn commit(
        &mut self,
        replace: Option<&str>,
        vectors: &[Vec<f32>],
        records: Vec<ChunkRecord>,
    ) -> Result<usize> {
        self.ensure_writable()?;
        self.check_batch(vectors, &records)?;

        let base = self.len();
        let replaced = replace.map(|id| self.live_positions_of(id)).unwrap_or_default();
        let count = records.len();

        self.set_tombstones(&replaced, true);
        self.push_unchecked(vectors, records);

        if let Err(e) = self.persist() {
            self.index.truncate(base);
            self.records.truncate(base);
            self.set_tombstones(&replaced, false);
            tracing::warn!(subject = %self.subject, error = %e, "rolled back batch");
            return Err(e);
        }

        tracing::info!(
            subject = %self.subject,
            document_id = replace.unwrap_or_default(),
            chunks = count,
            replaced = replaced.len(),
            "indexed batch"
        );
        if !replaced.is_empty() {
            self.maybe_compact();
        }
        Ok(count)
    }

    /// Tombstone every chunk of `document_id` and persist. Returns the number tombstoned.
    ///
    /// # Errors
    ///
    /// Returns `WritesHalted` after a consistency error or `Io` if persisting fails, in which
    /// case the tombstones are undone.
    pub fn remove_document(&mut self, document_id: &str) -> Result<usize> {
        self.ensure_writable()?;
        let positions = self.live_positions_of(document_id);
        if positions.is_empty() {
            return Ok(0);
        }
        self.set_tombstones(&positions, true);
        if let Err(e) = self.persist() {
            self.set_tombstones(&positions, false);
            return Err(e);
        }
        tracing::info!(subject = %self.subject, document_id, tombstoned = positions.len(), "removed document");
        self.maybe_compact();
        Ok(positions.len())
    }

    fn maybe_compact(&mut self) {
        let ratio = self.tombstone_ratio();
        if ratio > self.compaction_threshold {
            tracing::debug!(subject = %self.subject, ratio, "tombstone ratio over threshold");
            if let Err(e) = self.compact() {
                tracing::warn!(subject = %self.subject, error = %e, "compaction failed");
            }
        }
    }

    fn swap_in(&mut self, index: FlatIndex, records: Vec<ChunkRecord>) -> Result<()> {
        let old_index = std::mem::replace(&mut self.index, index);
        let old_records = std::mem::replace(&mut self.records, records);
        if let Err(e) = self.persist() {
            self.index = old_index;
            self.records = old_records;
            return Err(e);
        }
        self.halted = None;
        Ok(())
    }

    /// Rebuild the index from the live vectors it already holds. Returns the number of
    /// tombstoned vectors dropped. Clears a write halt.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the compacted store cannot be persisted; the store is left as it was.
    pub fn compact(&mut self) -> Result<usize> {
        let mut index = FlatIndex::new(self.index.dim());
        let mut records = Vec::with_capacity(self.live_len());
        let mut vectors = Vec::with_capacity(self.live_len());
        for (i, record) in self.records.iter().enumerate() {
            if record.tombstoned {
                continue;
            }
            if let Some(v) = self.index.vector(i) {
                vectors.push(v.to_vec());
                records.push(record.clone());
            }
        }
        index.add(&vectors);
        let dropped = self.len() - records.len();
        self.swap_in(index, records)?;
        tracing::info!(subject = %self.subject, dropped, live = self.len(), "compacted subject store");
        Ok(dropped)
    }

    /// Replace the whole store with `vectors` and `records`. The dimension is taken from the
    /// vectors, so a rebuild can also migrate the store to a new embedding model.
    /// Clears a write halt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the batch is malformed and `Io` if persisting fails; the
    /// store is left as it was in both cases.
    pub fn rebuild(&mut self, vectors: &[Vec<f32>], records: Vec<ChunkRecord>) -> Result<()> {
        if vectors.len() != records.len() {
            return Err(MemoryError::InvalidArgument(format!(
                "{} vectors but {} metadata records",
                vectors.len(),
                records.len()
            )));
        }
        if records.iter().any(|r| r.subject != self.subject) {
            return Err(MemoryError::InvalidArgument(format!(
                "rebuild of {:?} contains records of another subject",
                self.subject
            )));
        }
        let dim = vectors.first().map_or(self.index.dim(), Vec::len);
        if dim == 0 {
            return Err(MemoryError::InvalidArgument("index dimension must be positive".into()));
        }
        let mut index = FlatIndex::new(dim);
        if !index.add(vectors) {
            return Err(MemoryError::InvalidArgument(
                "rebuild vectors have differing dimensions".into(),
            ));
        }
        let records = records
            .into_iter()
            .map(|mut r| {
                r.tombstoned = false;
                r
            })
            .collect();
        self.swap_in(index, records)?;
        tracing::info!(subject = %self.subject, vectors = self.len(), dim, "rebuilt subject store");
        Ok(())
    }

    /// Up to `k` live records nearest to `query` by L2 distance, closest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `k` is zero and `DimensionMismatch` for a query of the
    /// wrong dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(MemoryError::InvalidArgument("k must be positive".into()));
        }
        if query.len() != self.index.dim() {
            return Err(MemoryError::DimensionMismatch {
                subject: self.subject.clone(),
                expected: self.index.dim(),
                actual: query.len(),
            });
        }
        let hits = self
            .index
            .search_filtered(query, k, |i| self.records.get(i).is_some_and(|r| !r.tombstoned));
        Ok(hits
            .into_iter()
            .filter_map(|(position, distance)| {
                self.records.get(position).map(|record| SearchHit {
                    record: record.clone(),
                    distance,
                    position,
                })
            })
            .collect())
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let live = self.live_len();
        let mut documents: Vec<&str> = self
            .records
            .iter()
            .filter(|r| !r.tombstoned)
            .map(|r| r.document_id.as_str())
            .collect();
        documents.sort_unstable();
        documents.dedup();
        StoreStats {
            subject: self.subject.clone(),
            dim: self.index.dim(),
            total_vectors: self.len(),
            live_vectors: live,
            tombstones: self.len() - live,
            tombstone_ratio: self.tombstone_ratio(),
            documents: documents.len(),
            generation: self.generation,
            halted: self.halted.clone(),
        }
    }
}
