use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use thuto_embed::{EmbedServiceConfig, EmbeddingService, HashEmbedder};
use thuto_memory::{
    ChunkConfig, ChunkRecord, Chunker, DocumentRecord, FileType, IngestionPipeline, LoaderOptions,
    MemoryError, RetrievalConfig, Retriever, StoreConfig, SubjectStore, VectorStoreManager,
};

const DIM: usize = 64;

struct Harness {
    manager: Arc<VectorStoreManager>,
    pipeline: IngestionPipeline,
    retriever: Retriever,
}

async fn harness(dir: &Path, chunk_size: usize, overlap: usize) -> Harness {
    let embedder = Arc::new(
        EmbeddingService::connect(HashEmbedder::new(DIM), EmbedServiceConfig::default())
            .await
            .unwrap(),
    );
    let manager = Arc::new(VectorStoreManager::new(
        StoreConfig {
            data_dir: dir.join("subjects"),
            compaction_threshold: 0.9,
        },
        DIM,
    ));
    let chunker = Chunker::new(ChunkConfig {
        chunk_size,
        overlap,
        respect_pages: false,
    })
    .unwrap();
    let pipeline = IngestionPipeline::new(
        Arc::clone(&manager),
        Arc::clone(&embedder),
        chunker,
        LoaderOptions::default(),
    );
    let retriever = Retriever::new(Arc::clone(&manager), embedder, RetrievalConfig::default()).unwrap();
    Harness {
        manager,
        pipeline,
        retriever,
    }
}

fn paragraph(topic: &str, words: usize) -> String {
    (0..words)
        .map(|i| format!("{topic}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_txt(dir: &Path, name: &str, text: &str) -> DocumentRecord {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    DocumentRecord {
        id: name.trim_end_matches(".txt").to_owned(),
        subject: String::new(),
        path,
        file_type: FileType::Txt,
    }
}

fn in_subject(mut doc: DocumentRecord, subject: &str) -> DocumentRecord {
    doc.subject = subject.to_owned();
    doc
}

fn records(subject: &str, doc: &str, n: usize) -> Vec<ChunkRecord> {
    (0..n)
        .map(|i| ChunkRecord {
            document_id: doc.into(),
            source: format!("{doc}.txt"),
            chunk_ordinal: i,
            subject: subject.into(),
            text: format!("{doc} chunk {i}"),
            tombstoned: false,
        })
        .collect()
}

#[tokio::test]
async fn scenario_a_three_paragraph_document() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 60, 10).await;
    let text = [paragraph("alpha", 50), paragraph("beta", 50), paragraph("gamma", 50)].join("\n\n");
    let doc = in_subject(write_txt(dir.path(), "three.txt", &text), "math");

    let report = h.pipeline.ingest(&doc).await.unwrap();
    assert!((2..=3).contains(&report.chunk_count), "got {}", report.chunk_count);

    let stored = h.manager.store("math").await.unwrap();
    let guard = stored.read().await;
    let chunks: Vec<&str> = guard.records().iter().map(|r| r.text.as_str()).collect();
    for c in &chunks {
        assert!(c.split_whitespace().count() <= 60);
    }
    for pair in chunks.windows(2) {
        let prev: Vec<&str> = pair[0].split_whitespace().collect();
        let next: Vec<&str> = pair[1].split_whitespace().collect();
        assert_eq!(&next[..10], &prev[prev.len() - 10..]);
    }
}

#[tokio::test]
async fn scenario_b_empty_store_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SubjectStore::create(dir.path(), "math", DIM, 0.3).unwrap();
    store.persist().unwrap();

    let manager = VectorStoreManager::new(
        StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        },
        DIM,
    );
    assert!(manager.search("math", &vec![0.0; DIM], 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_c_subjects_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 20, 0).await;
    let math = in_subject(write_txt(dir.path(), "calc.txt", &paragraph("integral", 100)), "math");
    let physics = in_subject(write_txt(dir.path(), "mech.txt", &paragraph("force", 60)), "physics");

    assert_eq!(h.pipeline.ingest(&math).await.unwrap().chunk_count, 5);
    assert_eq!(h.pipeline.ingest(&physics).await.unwrap().chunk_count, 3);

    let hits = h
        .retriever
        .retrieve("math", "force0 force1 force2", 10, 0.0)
        .await
        .unwrap();
    assert_eq!(hits.len(), 5);
    assert!(hits.iter().all(|c| c.source.subject == "math" && c.source.document_id == "calc"));
}

#[tokio::test]
async fn scenario_d_removed_chunks_never_return() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 10, 0).await;
    let keep = in_subject(write_txt(dir.path(), "keep.txt", &paragraph("cell", 20)), "bio");
    let gone = in_subject(write_txt(dir.path(), "gone.txt", &paragraph("gene", 40)), "bio");
    h.pipeline.ingest(&keep).await.unwrap();
    assert_eq!(h.pipeline.ingest(&gone).await.unwrap().chunk_count, 4);

    assert_eq!(h.manager.remove_document("bio", "gone").await.unwrap(), 4);
    let hits = h.retriever.retrieve("bio", "gene0 gene1", 10, 0.0).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|c| c.source.document_id != "gone"));

    let stats = h.manager.stats("bio").await.unwrap();
    assert_eq!(stats.tombstones, 4);
    assert_eq!(stats.live_vectors, 2);
}

#[tokio::test]
async fn scenario_e_wrong_dimension_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 20, 0).await;
    h.manager
        .add("chem", vec![vec![0.5; DIM]; 2], records("chem", "a", 2))
        .await
        .unwrap();

    let err = h
        .manager
        .add("chem", vec![vec![0.5; DIM], vec![0.5; DIM - 1]], records("chem", "b", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { .. }));

    let stats = h.manager.stats("chem").await.unwrap();
    assert_eq!(stats.total_vectors, 2);
    assert!(stats.halted.is_some());

    // Reads still work while writes are halted.
    assert_eq!(h.manager.search("chem", &vec![0.5; DIM], 5).await.unwrap().len(), 2);
    assert!(matches!(
        h.manager.add("chem", vec![vec![0.5; DIM]], records("chem", "c", 1)).await,
        Err(MemoryError::WritesHalted { .. })
    ));

    h.manager.compact("chem").await.unwrap();
    h.manager
        .add("chem", vec![vec![0.5; DIM]], records("chem", "c", 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn persist_then_load_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let before = {
        let h = harness(dir.path(), 15, 3).await;
        let doc = in_subject(write_txt(dir.path(), "notes.txt", &paragraph("atom", 80)), "chem");
        h.pipeline.ingest(&doc).await.unwrap();
        h.retriever.retrieve("chem", "atom7 atom8", 5, 0.0).await.unwrap()
    };

    let h = harness(dir.path(), 15, 3).await;
    let after = h.retriever.retrieve("chem", "atom7 atom8", 5, 0.0).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn unknown_subject_is_never_created_by_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 20, 0).await;
    let err = h.retriever.retrieve("art", "colour", 3, 0.0).await.unwrap_err();
    assert!(matches!(err, MemoryError::UnknownSubject(ref s) if s == "art"));
    assert!(h.manager.subjects().await.unwrap().is_empty());
}

#[tokio::test]
async fn docx_documents_are_ingested() {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lesson.docx");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Photosynthesis converts light</w:t></w:r></w:p><w:p><w:r><w:t>Chlorophyll absorbs red light</w:t></w:r></w:p></w:body></w:document>"#,
    )
    .unwrap();
    zip.finish().unwrap();

    let h = harness(dir.path(), 50, 5).await;
    let doc = DocumentRecord::from_path("lesson", "bio", &path).unwrap();
    assert_eq!(doc.file_type, FileType::Docx);
    assert_eq!(h.pipeline.ingest(&doc).await.unwrap().chunk_count, 1);

    let hits = h.retriever.retrieve("bio", "chlorophyll", 1, 0.0).await.unwrap();
    assert_eq!(hits[0].source.filename, "lesson.docx");
    assert!(hits[0].chunk_text.contains("Photosynthesis converts light\n\nChlorophyll"));
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn search_distances_never_decrease(
        points in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 1..60),
        query in prop::collection::vec(-10.0f32..10.0, 3),
        k in 1usize..80,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SubjectStore::create(dir.path(), "geo", 3, 0.3).unwrap();
        store.add(&points, records("geo", "d", points.len())).unwrap();

        let hits = store.search(&query, k).unwrap();
        prop_assert_eq!(hits.len(), k.min(points.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn raising_threshold_never_adds_results(
        low in 0.0f32..1.0,
        delta in 0.0f32..1.0,
        query in "[a-e]{1,3}( [a-e]{1,3}){0,4}",
    ) {
        let high = (low + delta).min(1.0);
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        let (low_hits, high_hits) = rt.block_on(async {
            let h = harness(dir.path(), 4, 1).await;
            let doc = in_subject(
                write_txt(dir.path(), "words.txt", "a b c d e ab bc cd de abc bcd cde"),
                "letters",
            );
            h.pipeline.ingest(&doc).await.unwrap();
            let low_hits = h.retriever.retrieve("letters", &query, 10, low).await.unwrap();
            let high_hits = h.retriever.retrieve("letters", &query, 10, high).await.unwrap();
            (low_hits, high_hits)
        });
        prop_assert!(high_hits.len() <= low_hits.len());
        prop_assert!(high_hits.iter().all(|c| c.score >= high));
    }
}
