//! Registry of per-subject stores and the locking discipline around them.
//!
//! Every subject store sits behind its own `tokio::sync::RwLock`: writers (insert, persist,
//! delete, rebuild, compact) hold the write lock for the whole operation including the disk
//! write, searches share the read lock. A search therefore waits for an in-flight write on the
//! same subject and never observes a half-applied batch.
//!
//! The registry itself only maps names to slots and is never held across I/O or a subject
//! lock. Loading, creating and clearing a subject happen under that subject's slot mutex, so
//! work on different subjects proceeds in parallel.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{MemoryError, Result};
use crate::store::{
    ChunkRecord, DEFAULT_COMPACTION_THRESHOLD, SearchHit, StoreStats, SubjectStore,
    validate_subject,
};

pub type SharedStore = Arc<RwLock<SubjectStore>>;

#[derive(Default)]
enum SlotState {
    #[default]
    Empty,
    Loaded(SharedStore),
    /// Replaced in the registry; holders must look the subject up again.
    Retired,
}

type Slot = Arc<Mutex<SlotState>>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Tombstone ratio in (0, 1] that triggers compaction after a delete.
    pub compaction_threshold: f32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/subjects"),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

pub struct VectorStoreManager {
    config: StoreConfig,
    dim: usize,
    stores: RwLock<HashMap<String, Slot>>,
}

impl std::fmt::Debug for VectorStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreManager")
            .field("data_dir", &self.config.data_dir)
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

fn join_error(e: tokio::task::JoinError) -> MemoryError {
    MemoryError::Io(std::io::Error::other(format!("store task failed: {e}")))
}

impl VectorStoreManager {
    /// `dim` is the embedding dimension new subjects are created with.
    #[must_use]
    pub fn new(config: StoreConfig, dim: usize) -> Self {
        Self {
            config,
            dim,
            stores: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn data_dir(&self) -> &std::path::Path {
        &self.config.data_dir
    }

    async fn open_persisted(&self, subject: &str) -> Result<Option<SubjectStore>> {
        let root = self.config.data_dir.clone();
        let subject = subject.to_owned();
        let threshold = self.config.compaction_threshold;
        tokio::task::spawn_blocking(move || SubjectStore::open(&root, &subject, threshold))
            .await
            .map_err(join_error)?
    }

    async fn create_store(&self, subject: &str, dim: usize) -> Result<SubjectStore> {
        let root = self.config.data_dir.clone();
        let subject = subject.to_owned();
        let threshold = self.config.compaction_threshold;
        tokio::task::spawn_blocking(move || SubjectStore::create(&root, &subject, dim, threshold))
            .await
            .map_err(join_error)?
    }

    /// Lock the registered slot of `subject`, registering an empty one if needed. Slots
    /// retired while waiting are skipped.
    async fn lock_slot(&self, subject: &str) -> (Slot, OwnedMutexGuard<SlotState>) {
        loop {
            let registered = self.stores.read().await.get(subject).cloned();
            let slot = match registered {
                Some(slot) => slot,
                None => Arc::clone(
                    self.stores
                        .write()
                        .await
                        .entry(subject.to_owned())
                        .or_default(),
                ),
            };
            let state = Arc::clone(&slot).lock_owned().await;
            if !matches!(*state, SlotState::Retired) {
                return (slot, state);
            }
        }
    }

    /// Unregister `slot` if it is still the registered one and either holds nothing or holds
    /// only `store`, unpersisted and referenced by nobody but the caller.
    async fn retire_slot(&self, subject: &str, slot: &Slot, store: Option<&SharedStore>) {
        let mut stores = self.stores.write().await;
        if !stores.get(subject).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            return;
        }
        let Ok(mut state) = slot.try_lock() else {
            return;
        };
        let retire = match (&*state, store) {
            (SlotState::Empty, None) => true,
            // The slot and the caller hold the only references.
            (SlotState::Loaded(held), Some(ours)) => {
                Arc::ptr_eq(held, ours)
                    && Arc::strong_count(ours) == 2
                    && ours.try_read().is_ok_and(|s| s.generation() == 0)
            }
            _ => false,
        };
        if retire {
            *state = SlotState::Retired;
            drop(state);
            stores.remove(subject);
        }
    }

    /// The store for `subject`, loading it from disk on first use.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject` if the subject has neither an in-memory nor a persisted store,
    /// and `CorruptIndex` if the persisted store fails validation.
    pub async fn store(&self, subject: &str) -> Result<SharedStore> {
        validate_subject(subject)?;
        let (slot, mut state) = self.lock_slot(subject).await;
        if let SlotState::Loaded(store) = &*state {
            return Ok(Arc::clone(store));
        }
        let opened = match self.open_persisted(subject).await {
            Ok(Some(store)) => {
                let shared = Arc::new(RwLock::new(store));
                *state = SlotState::Loaded(Arc::clone(&shared));
                return Ok(shared);
            }
            Ok(None) => MemoryError::UnknownSubject(subject.to_owned()),
            Err(e) => e,
        };
        drop(state);
        self.retire_slot(subject, &slot, None).await;
        Err(opened)
    }

    /// Like [`Self::store`], but creates an empty store for a new subject. The flag is `true`
    /// when the store was created by this call.
    async fn get_or_create(&self, subject: &str) -> Result<(SharedStore, Slot, bool)> {
        validate_subject(subject)?;
        let (slot, mut state) = self.lock_slot(subject).await;
        if let SlotState::Loaded(store) = &*state {
            let store = Arc::clone(store);
            return Ok((store, slot, false));
        }
        let loaded: Result<(SubjectStore, bool)> = async {
            match self.open_persisted(subject).await? {
                Some(store) => Ok((store, false)),
                None => Ok((self.create_store(subject, self.dim).await?, true)),
            }
        }
        .await;
        let (store, created) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                drop(state);
                self.retire_slot(subject, &slot, None).await;
                return Err(e);
            }
        };
        if created {
            tracing::info!(subject, dim = self.dim, "created subject store");
        }
        let shared = Arc::new(RwLock::new(store));
        *state = SlotState::Loaded(Arc::clone(&shared));
        Ok((shared, slot, created))
    }

    /// Run `op` under the subject's write lock on a blocking thread.
    async fn write<T, F>(store: SharedStore, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SubjectStore) -> Result<T> + Send + 'static,
    {
        let mut guard = store.write_owned().await;
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(join_error)?
    }

    /// Write to `subject`, creating it on first use. A store created here whose first write
    /// fails is unregistered again, so the subject stays unknown.
    async fn write_creating<T, F>(&self, subject: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SubjectStore) -> Result<T> + Send + 'static,
    {
        let (store, slot, created) = self.get_or_create(subject).await?;
        let result = Self::write(Arc::clone(&store), op).await;
        if result.is_err() && created {
            self.retire_slot(subject, &slot, Some(&store)).await;
        }
        result
    }

    /// Append vectors with their records to `subject` (created on first use) and persist.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` (halting the subject), `WritesHalted`, `InvalidArgument`
    /// or `Io`; on error the subject's contents are unchanged.
    pub async fn add(
        &self,
        subject: &str,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<usize> {
        self.write_creating(subject, move |s| s.append(&vectors, records))
            .await
    }

    /// Replace all chunks of `document_id` in `subject` (created on first use) and persist.
    ///
    /// # Errors
    ///
    /// As [`Self::add`].
    pub async fn upsert_document(
        &self,
        subject: &str,
        document_id: &str,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<usize> {
        let document_id = document_id.to_owned();
        self.write_creating(subject, move |s| {
            s.upsert_document(&document_id, &vectors, records)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `UnknownSubject` or `Io`.
    pub async fn persist(&self, subject: &str) -> Result<()> {
        let store = self.store(subject).await?;
        Self::write(store, SubjectStore::persist).await
    }

    /// Persist every store currently held in memory. Returns how many were written; failures
    /// are logged and the first one is returned after all stores were attempted.
    ///
    /// # Errors
    ///
    /// Returns the first `Io` error encountered.
    pub async fn persist_all(&self) -> Result<usize> {
        let mut written = 0;
        let mut first_error = None;
        for (subject, store) in self.loaded_stores().await {
            match Self::write(store, SubjectStore::persist).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(subject, error = %e, "failed to persist subject");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        tracing::info!(written, "persisted loaded subjects");
        first_error.map_or(Ok(written), Err)
    }

    /// Up to `k` nearest live chunks of `subject`, closest first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject`, `InvalidArgument` for `k == 0`, or `DimensionMismatch` for a
    /// query of the wrong dimension.
    pub async fn search(&self, subject: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let store = self.store(subject).await?;
        let guard = store.read().await;
        guard.search(query, k)
    }

    /// Search every known subject separately, for comparing subjects side by side. Results
    /// never mix: each subject's hits come from its own store. Subjects that cannot be
    /// searched are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `k == 0` and `Io` if the data directory cannot be listed.
    pub async fn search_all_subjects(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<BTreeMap<String, Vec<SearchHit>>> {
        if k == 0 {
            return Err(MemoryError::InvalidArgument("k must be positive".into()));
        }
        let mut out = BTreeMap::new();
        for subject in self.subjects().await? {
            match self.search(&subject, query, k).await {
                Ok(hits) => {
                    out.insert(subject, hits);
                }
                Err(e) => tracing::warn!(subject, error = %e, "skipping subject in search"),
            }
        }
        Ok(out)
    }

    /// Tombstone every chunk of `document_id`. Returns how many were tombstoned.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject`, `WritesHalted` or `Io`.
    pub async fn remove_document(&self, subject: &str, document_id: &str) -> Result<usize> {
        let store = self.store(subject).await?;
        let document_id = document_id.to_owned();
        Self::write(store, move |s| s.remove_document(&document_id)).await
    }

    /// Replace the subject's contents from scratch. Works on subjects whose persisted index
    /// is corrupt, replacing it with a fresh generation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed input or `Io`.
    pub async fn rebuild(
        &self,
        subject: &str,
        vectors: Vec<Vec<f32>>,
        records: Vec<ChunkRecord>,
    ) -> Result<()> {
        validate_subject(subject)?;
        let (slot, mut state) = self.lock_slot(subject).await;
        let loaded = match &*state {
            SlotState::Loaded(store) => Some(Arc::clone(store)),
            _ => None,
        };
        let store = match loaded {
            Some(store) => store,
            None => {
                let dim = vectors.first().map_or(self.dim, Vec::len);
                match self.create_store(subject, dim).await {
                    Ok(fresh) => {
                        let shared = Arc::new(RwLock::new(fresh));
                        *state = SlotState::Loaded(Arc::clone(&shared));
                        shared
                    }
                    Err(e) => {
                        drop(state);
                        self.retire_slot(subject, &slot, None).await;
                        return Err(e);
                    }
                }
            }
        };
        drop(state);
        Self::write(store, move |s| s.rebuild(&vectors, records)).await
    }

    /// Physically drop tombstoned vectors. Returns how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSubject`, `CorruptIndex` or `Io`.
    pub async fn compact(&self, subject: &str) -> Result<usize> {
        let store = self.store(subject).await?;
        Self::write(store, SubjectStore::compact).await
    }

    /// # Errors
    ///
    /// Returns `UnknownSubject` or `CorruptIndex`.
    pub async fn stats(&self, subject: &str) -> Result<StoreStats> {
        let store = self.store(subject).await?;
        let guard = store.read().await;
        Ok(guard.stats())
    }

    /// Whether `subject` has a store in memory or on disk.
    pub async fn has_subject(&self, subject: &str) -> bool {
        if validate_subject(subject).is_err() {
            return false;
        }
        let slot = self.stores.read().await.get(subject).cloned();
        if let Some(slot) = slot {
            let loaded = slot
                .try_lock()
                .is_ok_and(|state| matches!(*state, SlotState::Loaded(_)));
            if loaded {
                return true;
            }
        }
        self.config.data_dir.join(subject).join("CURRENT").is_file()
    }

    /// Stores currently held in memory, sorted by subject.
    async fn loaded_stores(&self) -> Vec<(String, SharedStore)> {
        let slots: Vec<(String, Slot)> = self
            .stores
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        let mut out = Vec::with_capacity(slots.len());
        for (name, slot) in slots {
            let state = slot.lock().await;
            if let SlotState::Loaded(store) = &*state {
                out.push((name, Arc::clone(store)));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Every known subject, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the data directory exists but cannot be read.
    pub async fn subjects(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .loaded_stores()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        match tokio::fs::read_dir(&self.config.data_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if validate_subject(&name).is_ok()
                        && tokio::fs::try_exists(entry.path().join("CURRENT"))
                            .await
                            .unwrap_or(false)
                    {
                        names.push(name);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Statistics for every subject that can be loaded. Subjects failing to load are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the data directory cannot be listed.
    pub async fn all_stats(&self) -> Result<Vec<StoreStats>> {
        let mut out = Vec::new();
        for subject in self.subjects().await? {
            match self.stats(&subject).await {
                Ok(stats) => out.push(stats),
                Err(e) => tracing::warn!(subject, error = %e, "skipping subject in stats"),
            }
        }
        Ok(out)
    }

    /// Remove the subject from memory and delete its persisted files. Returns whether
    /// anything existed.
    ///
    /// Only this subject waits: callers reaching it meanwhile queue on the fresh slot that
    /// replaces it, and find it empty once the files are gone. A writer that already held the
    /// old store fails with `UnknownSubject` instead of recreating files.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad name or `Io` if the files cannot be deleted.
    pub async fn clear_subject(&self, subject: &str) -> Result<bool> {
        validate_subject(subject)?;
        let fresh: Slot = Arc::default();
        let _clearing = Arc::clone(&fresh).lock_owned().await;
        let previous = self.stores.write().await.insert(subject.to_owned(), fresh);

        let mut in_memory = false;
        if let Some(slot) = previous {
            let held = std::mem::replace(&mut *slot.lock().await, SlotState::Retired);
            if let SlotState::Loaded(store) = held {
                // Waits for an in-flight writer on this subject only.
                store.write().await.retire();
                in_memory = true;
            }
        }

        let dir = self.config.data_dir.join(subject);
        let on_disk = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if in_memory || on_disk {
            tracing::info!(subject, "cleared subject");
        }
        Ok(in_memory || on_disk)
    }

    /// Records of the persisted generation of `subject`, readable even when its index file is
    /// corrupt. Used to re-embed a subject from its stored chunk texts.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if the metadata is unreadable.
    pub async fn persisted_records(&self, subject: &str) -> Result<Option<Vec<ChunkRecord>>> {
        let root = self.config.data_dir.clone();
        let subject = subject.to_owned();
        tokio::task::spawn_blocking(move || SubjectStore::persisted_records(&root, &subject))
            .await
            .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: &str, doc: &str, ordinal: usize) -> ChunkRecord {
        ChunkRecord {
            document_id: doc.into(),
            source: format!("{doc}.txt"),
            chunk_ordinal: ordinal,
            subject: subject.into(),
            text: format!("{subject} {doc} {ordinal}"),
            tombstoned: false,
        }
    }

    fn batch(subject: &str, doc: &str, n: usize) -> (Vec<Vec<f32>>, Vec<ChunkRecord>) {
        #[allow(clippy::cast_precision_loss)]
        let vectors = (0..n).map(|i| vec![i as f32, 1.0]).collect();
        (vectors, (0..n).map(|i| record(subject, doc, i)).collect())
    }

    fn manager(dir: &std::path::Path) -> VectorStoreManager {
        VectorStoreManager::new(
            StoreConfig {
                data_dir: dir.to_path_buf(),
                compaction_threshold: 0.5,
            },
            2,
        )
    }

    #[tokio::test]
    async fn unknown_subject_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(matches!(
            m.search("art", &[0.0, 0.0], 3).await,
            Err(MemoryError::UnknownSubject(_))
        ));
        assert!(!m.has_subject("art").await);
    }

    #[tokio::test]
    async fn subject_created_lazily_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = manager(dir.path());
            let (v, r) = batch("math", "d1", 3);
            assert_eq!(m.upsert_document("math", "d1", v, r).await.unwrap(), 3);
        }
        let m = manager(dir.path());
        assert!(m.has_subject("math").await);
        assert_eq!(m.search("math", &[0.0, 1.0], 10).await.unwrap().len(), 3);
        assert_eq!(m.subjects().await.unwrap(), vec!["math"]);
    }

    #[tokio::test]
    async fn failed_first_write_leaves_subject_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let err = m
            .add("math", vec![vec![1.0, 2.0, 3.0]], vec![record("math", "d", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
        assert!(!m.has_subject("math").await);
    }

    #[tokio::test]
    async fn clear_subject_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("bio", "d1", 2);
        m.add("bio", v, r).await.unwrap();

        assert!(m.clear_subject("bio").await.unwrap());
        assert!(!m.has_subject("bio").await);
        assert!(!dir.path().join("bio").exists());
        assert!(!m.clear_subject("bio").await.unwrap());
    }

    #[tokio::test]
    async fn rebuild_replaces_corrupt_subject() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = manager(dir.path());
            let (v, r) = batch("math", "d1", 2);
            m.add("math", v, r).await.unwrap();
        }
        let index = dir.path().join("math").join("gen-1").join("index.bin");
        let mut bytes = std::fs::read(&index).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&index, bytes).unwrap();

        let m = manager(dir.path());
        assert!(matches!(
            m.store("math").await,
            Err(MemoryError::CorruptIndex { .. })
        ));
        let recovered = m.persisted_records("math").await.unwrap().unwrap();
        assert_eq!(recovered.len(), 2);

        let (v, r) = batch("math", "d1", 2);
        m.rebuild("math", v, r).await.unwrap();
        assert_eq!(m.stats("math").await.unwrap().live_vectors, 2);

        let reopened = manager(dir.path());
        assert_eq!(reopened.stats("math").await.unwrap().live_vectors, 2);
    }

    #[tokio::test]
    async fn all_stats_lists_each_subject() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("math", "a", 2);
        m.add("math", v, r).await.unwrap();
        let (v, r) = batch("physics", "b", 1);
        m.add("physics", v, r).await.unwrap();

        let stats = m.all_stats().await.unwrap();
        let names: Vec<_> = stats.iter().map(|s| s.subject.as_str()).collect();
        assert_eq!(names, vec!["math", "physics"]);
    }

    #[tokio::test]
    async fn concurrent_writers_on_one_subject_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(manager(dir.path()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let m = Arc::clone(&m);
            handles.push(tokio::spawn(async move {
                let doc = format!("d{i}");
                let (v, r) = batch("math", &doc, 3);
                m.upsert_document("math", &doc, v, r).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let stats = m.stats("math").await.unwrap();
        assert_eq!(stats.live_vectors, 24);
        assert_eq!(stats.generation, 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clearing_a_busy_subject_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let m = Arc::new(manager(dir.path()));
        let (v, r) = batch("math", "a", 2);
        m.add("math", v, r).await.unwrap();
        let (v, r) = batch("physics", "b", 2);
        m.add("physics", v, r).await.unwrap();

        let busy = m.store("math").await.unwrap().write_owned().await;
        let clearing = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.clear_subject("math").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let hits = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            m.search("physics", &[0.0, 1.0], 5),
        )
        .await
        .expect("physics blocked by math")
        .unwrap();
        assert_eq!(hits.len(), 2);
        let (v, r) = batch("physics", "c", 1);
        tokio::time::timeout(std::time::Duration::from_millis(500), m.add("physics", v, r))
            .await
            .expect("physics write blocked by math")
            .unwrap();
        assert!(!clearing.is_finished());

        drop(busy);
        assert!(clearing.await.unwrap().unwrap());
        assert!(!m.has_subject("math").await);
        assert_eq!(m.stats("physics").await.unwrap().live_vectors, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loading_one_subject_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("physics", "b", 1);
        m.add("physics", v, r).await.unwrap();

        let (_slot, loading) = m.lock_slot("math").await;
        let hits = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            m.search("physics", &[0.0, 1.0], 5),
        )
        .await
        .expect("physics blocked while math was loading")
        .unwrap();
        assert_eq!(hits.len(), 1);
        drop(loading);
    }

    #[tokio::test]
    async fn failed_creation_keeps_store_shared_with_another_writer() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (store, slot, created) = m.get_or_create("math").await.unwrap();
        assert!(created);
        let other_writer = Arc::clone(&store);

        m.retire_slot("math", &slot, Some(&store)).await;
        assert!(m.stores.read().await.contains_key("math"));

        let (v, r) = batch("math", "d", 2);
        VectorStoreManager::write(other_writer, move |s| s.append(&v, r))
            .await
            .unwrap();
        m.retire_slot("math", &slot, Some(&store)).await;
        assert!(m.stores.read().await.contains_key("math"));
        drop(store);

        let again = m.store("math").await.unwrap();
        assert_eq!(again.read().await.live_len(), 2);
        assert_eq!(again.read().await.generation(), 1);
    }

    #[tokio::test]
    async fn unpersisted_store_of_failed_creation_is_retired() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (store, slot, _) = m.get_or_create("math").await.unwrap();
        m.retire_slot("math", &slot, Some(&store)).await;
        assert!(!m.stores.read().await.contains_key("math"));
        assert!(matches!(*slot.lock().await, SlotState::Retired));
    }

    #[tokio::test]
    async fn writer_holding_cleared_store_cannot_recreate_files() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("math", "a", 2);
        m.add("math", v, r).await.unwrap();
        let stale = m.store("math").await.unwrap();

        assert!(m.clear_subject("math").await.unwrap());
        let (v, r) = batch("math", "b", 1);
        let err = VectorStoreManager::write(stale, move |s| s.append(&v, r))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnknownSubject(_)));
        assert!(!dir.path().join("math").exists());

        let (v, r) = batch("math", "c", 1);
        m.add("math", v, r).await.unwrap();
        let stats = m.stats("math").await.unwrap();
        assert_eq!((stats.live_vectors, stats.generation), (1, 1));
    }

    #[tokio::test]
    async fn unknown_lookups_leave_no_registry_entries() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        for _ in 0..3 {
            assert!(m.store("ghost").await.is_err());
        }
        assert!(m.stores.read().await.is_empty());
    }

    #[tokio::test]
    async fn search_all_subjects_keeps_results_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("math", "a", 3);
        m.add("math", v, r).await.unwrap();
        let (v, r) = batch("physics", "b", 1);
        m.add("physics", v, r).await.unwrap();

        let all = m.search_all_subjects(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["math", "physics"]);
        assert_eq!(all["math"].len(), 2);
        assert!(all["math"].iter().all(|h| h.record.subject == "math"));
        assert_eq!(all["physics"].len(), 1);
        assert!(matches!(
            m.search_all_subjects(&[0.0, 1.0], 0).await,
            Err(MemoryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn persist_all_writes_each_loaded_subject() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let (v, r) = batch("math", "a", 1);
        m.add("math", v, r).await.unwrap();
        let (v, r) = batch("physics", "b", 1);
        m.add("physics", v, r).await.unwrap();

        assert_eq!(m.persist_all().await.unwrap(), 2);
        assert_eq!(m.stats("math").await.unwrap().generation, 2);
        assert_eq!(m.stats("physics").await.unwrap().generation, 2);
    }
}
