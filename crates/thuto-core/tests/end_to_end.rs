use thuto_core::answer::{AnswerOutcome, ask};
use thuto_core::{Answer, AnswerGenerator, AnswerRequest, AppServices, Config, GenerationError, IngestEvent};
use thuto_memory::{DocumentRecord, FileType};
use tokio_util::sync::CancellationToken;

struct OfflineGenerator;

impl AnswerGenerator for OfflineGenerator {
    async fn generate(&self, _request: &AnswerRequest) -> Result<Answer, GenerationError> {
        Err(GenerationError::Unavailable("no network".into()))
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

struct FirstChunkGenerator;

impl AnswerGenerator for FirstChunkGenerator {
    async fn generate(&self, request: &AnswerRequest) -> Result<Answer, GenerationError> {
        let first = request
            .chunks
            .first()
            .ok_or_else(|| GenerationError::InvalidResponse("nothing to cite".into()))?;
        Ok(Answer {
            text: first.chunk_text.clone(),
            citations: request.citations(),
        })
    }

    fn name(&self) -> &'static str {
        "first-chunk"
    }
}

async fn services(dir: &std::path::Path) -> AppServices {
    let mut config = Config::default();
    config.storage.data_dir = dir.join("subjects").display().to_string();
    config.embedding.dimensions = Some(128);
    config.chunking.chunk_size = 40;
    config.chunking.overlap = 5;
    AppServices::init(config).await.unwrap()
}

async fn ingest(services: &AppServices, dir: &std::path::Path, docs: &[(&str, &str, &str)]) {
    let (handle, mut events, task) = services.spawn_worker(CancellationToken::new());
    for (id, subject, text) in docs {
        let path = dir.join(format!("{id}.txt"));
        std::fs::write(&path, text).unwrap();
        handle
            .submit(DocumentRecord {
                id: (*id).to_owned(),
                subject: (*subject).to_owned(),
                path,
                file_type: FileType::Txt,
            })
            .await
            .unwrap();
    }
    drop(handle);
    while let Some(event) = events.recv().await {
        assert!(matches!(event, IngestEvent::Completed(_)), "{event:?}");
    }
    task.await.unwrap();
}

#[tokio::test]
async fn answers_cite_only_the_asked_subject() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(dir.path()).await;
    ingest(
        &services,
        dir.path(),
        &[
            ("photo", "biology", "Photosynthesis turns light energy into chemical energy in chloroplasts."),
            ("newton", "physics", "Newton's second law relates force, mass and acceleration."),
        ],
    )
    .await;

    let outcome = ask(services.retriever(), &FirstChunkGenerator, "biology", "light energy chloroplasts")
        .await
        .unwrap();
    let answer = outcome.answer.unwrap();
    assert!(answer.text.contains("Photosynthesis"));
    assert!(answer.citations.iter().all(|c| c.document_id == "photo"));
}

#[tokio::test]
async fn retrieval_survives_generator_failure() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(dir.path()).await;
    ingest(&services, dir.path(), &[("atoms", "chemistry", "Atoms bond to form molecules.")]).await;

    let AnswerOutcome { request, answer } =
        ask(services.retriever(), &OfflineGenerator, "chemistry", "molecules")
            .await
            .unwrap();
    assert!(matches!(answer, Err(GenerationError::Unavailable(_))));
    assert!(request.has_context());
    assert!(request.prompt.user.contains("[Document 1] (Source: atoms.txt, chunk 0)"));
}

#[tokio::test]
async fn unknown_subject_stops_before_generation() {
    let dir = tempfile::tempdir().unwrap();
    let services = services(dir.path()).await;
    let err = ask(services.retriever(), &FirstChunkGenerator, "history", "rome")
        .await
        .unwrap_err();
    assert!(matches!(err, thuto_memory::MemoryError::UnknownSubject(_)));
}
