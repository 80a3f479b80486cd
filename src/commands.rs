use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use thuto_core::{AppServices, IngestEvent, build_prompt};
use thuto_memory::document::discover;
use thuto_memory::{DocumentRecord, FileType, RetrievedChunk, StoreStats};
use tokio_util::sync::CancellationToken;

use crate::Command;

pub(crate) async fn run(services: &AppServices, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            subject,
            id,
            file_type,
            file,
        } => ingest(services, subject, id, file_type.as_deref(), &file).await,
        Command::IngestDir { subject, dir } => ingest_dir(services, &subject, &dir).await,
        Command::Query {
            subject,
            k,
            threshold,
            json,
            text,
        } => query(services, &subject, &text, k, threshold, json).await,
        Command::Prompt { subject, text } => {
            let chunks = services.retriever().retrieve_default(&subject, &text).await?;
            let prompt = build_prompt(&subject, &text, &chunks);
            println!("--- system ---\n{}\n\n--- user ---\n{}", prompt.system, prompt.user);
            Ok(())
        }
        Command::Remove { subject, id } => {
            let removed = services.manager().remove_document(&subject, &id).await?;
            println!("removed {removed} chunks of {id} from {subject}");
            Ok(())
        }
        Command::Rebuild { subject } => {
            let count = services.pipeline().reindex(&subject).await?;
            println!("rebuilt {subject} with {count} chunks");
            Ok(())
        }
        Command::Compact { subject } => {
            let dropped = services.manager().compact(&subject).await?;
            println!("dropped {dropped} tombstoned vectors from {subject}");
            Ok(())
        }
        Command::Stats { subject } => {
            let stats = match subject {
                Some(subject) => vec![services.manager().stats(&subject).await?],
                None => services.manager().all_stats().await?,
            };
            print_stats(&stats);
            Ok(())
        }
        Command::Clear { subject } => {
            if services.manager().clear_subject(&subject).await? {
                println!("cleared {subject}");
            } else {
                println!("{subject} has no index");
            }
            Ok(())
        }
    }
}

async fn ingest(
    services: &AppServices,
    subject: String,
    id: String,
    file_type: Option<&str>,
    file: &Path,
) -> anyhow::Result<()> {
    let file_type = match file_type {
        Some(t) => FileType::from_str(t)?,
        None => FileType::from_path(file)?,
    };
    let doc = DocumentRecord {
        id,
        subject,
        path: file.to_path_buf(),
        file_type,
    };
    let timeout = services.config().ingest.timeout();
    let report = services
        .pipeline()
        .ingest_with_timeout(&doc, timeout)
        .await
        .with_context(|| format!("failed to ingest {}", file.display()))?;
    println!(
        "indexed {} into {} ({} chunks, {} ms)",
        report.document_id,
        report.subject,
        report.chunk_count,
        report.elapsed.as_millis()
    );
    Ok(())
}

/// Queue every supported file of `dir` on the background worker; Ctrl-C stops after the
/// documents already in progress.
async fn ingest_dir(services: &AppServices, subject: &str, dir: &Path) -> anyhow::Result<()> {
    let files = discover(dir).await?;
    if files.is_empty() {
        println!("no supported files in {}", dir.display());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (handle, mut events, task) = services.spawn_worker(cancel.clone());
    let total = files.len();

    let submit = {
        let cancel = cancel.clone();
        async move {
            for (path, file_type) in files {
                let id = path.file_name().map_or_else(
                    || path.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
                let doc = DocumentRecord {
                    id,
                    subject: subject.to_owned(),
                    path,
                    file_type,
                };
                if cancel.is_cancelled() || handle.submit(doc).await.is_err() {
                    break;
                }
            }
        }
    };

    let report = async {
        let (mut done, mut failed) = (0usize, 0usize);
        while let Some(event) = events.recv().await {
            match event {
                IngestEvent::Completed(r) => {
                    done += 1;
                    println!("indexed {} ({} chunks)", r.document_id, r.chunk_count);
                }
                IngestEvent::Failed {
                    document_id, error, ..
                } => {
                    failed += 1;
                    eprintln!("failed {document_id}: {error}");
                }
            }
        }
        (done, failed)
    };

    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing documents in progress");
            interrupt.cancel();
        }
    });

    let ((), (done, failed)) = tokio::join!(submit, report);
    watcher.abort();
    task.await.context("ingest worker panicked")?;

    println!("{done} of {total} documents indexed, {failed} failed");
    Ok(())
}

async fn query(
    services: &AppServices,
    subject: &str,
    text: &str,
    k: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> anyhow::Result<()> {
    let defaults = services.retriever().config();
    let chunks = services
        .retriever()
        .retrieve(
            subject,
            text,
            k.unwrap_or(defaults.k),
            threshold.unwrap_or(defaults.score_threshold),
        )
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
    } else {
        print_chunks(&chunks);
    }
    Ok(())
}

fn print_chunks(chunks: &[RetrievedChunk]) {
    if chunks.is_empty() {
        println!("no relevant context found");
        return;
    }
    for c in chunks {
        println!(
            "#{} score {:.3} {} chunk {}\n{}\n",
            c.rank, c.score, c.source.filename, c.source.chunk_ordinal, c.chunk_text
        );
    }
}

fn print_stats(stats: &[StoreStats]) {
    if stats.is_empty() {
        println!("no subjects indexed");
        return;
    }
    for s in stats {
        println!(
            "{}: {} live / {} total vectors ({} tombstoned, ratio {:.2}), {} documents, dim {}, generation {}{}",
            s.subject,
            s.live_vectors,
            s.total_vectors,
            s.tombstones,
            s.tombstone_ratio,
            s.documents,
            s.dim,
            s.generation,
            s.halted
                .as_ref()
                .map_or_else(String::new, |r| format!(", writes halted: {r}"))
        );
    }
}
