//! Background ingestion: a bounded job queue drained by a worker that runs a limited number of
//! documents at once and reports each outcome on an event channel.

use std::sync::Arc;
use std::time::Duration;

use thuto_memory::{DocumentRecord, ErrorKind, IngestReport, IngestionPipeline};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Outcome of one queued document. The receiver marks the document processed and records its
/// chunk count on `Completed`, and leaves it unprocessed on `Failed`.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Completed(IngestReport),
    Failed {
        document_id: String,
        subject: String,
        error: String,
        kind: ErrorKind,
    },
}

impl IngestEvent {
    #[must_use]
    pub fn document_id(&self) -> &str {
        match self {
            Self::Completed(report) => &report.document_id,
            Self::Failed { document_id, .. } => document_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("ingest queue is full")]
    QueueFull(DocumentRecord),
    #[error("ingest worker has stopped")]
    Closed(DocumentRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
    pub timeout: Duration,
}

impl From<&crate::config::IngestConfig> for WorkerConfig {
    fn from(c: &crate::config::IngestConfig) -> Self {
        Self {
            queue_capacity: c.queue_capacity,
            max_concurrent: c.max_concurrent,
            timeout: c.timeout(),
        }
    }
}

/// Cloneable handle for queueing documents.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    jobs: mpsc::Sender<DocumentRecord>,
}

impl IngestHandle {
    /// Queue `doc`, waiting for space when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Closed` with the document if the worker has stopped.
    pub async fn submit(&self, doc: DocumentRecord) -> Result<(), SubmitError> {
        self.jobs
            .send(doc)
            .await
            .map_err(|e| SubmitError::Closed(e.0))
    }

    /// Queue `doc` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `Closed` with the document.
    pub fn try_submit(&self, doc: DocumentRecord) -> Result<(), SubmitError> {
        self.jobs.try_send(doc).map_err(|e| match e {
            mpsc::error::TrySendError::Full(doc) => SubmitError::QueueFull(doc),
            mpsc::error::TrySendError::Closed(doc) => SubmitError::Closed(doc),
        })
    }
}

pub struct IngestWorker {
    pipeline: Arc<IngestionPipeline>,
    jobs: mpsc::Receiver<DocumentRecord>,
    events: mpsc::Sender<IngestEvent>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl IngestWorker {
    /// Start a worker. Returns the submit handle, the event receiver and the worker task.
    ///
    /// The worker stops when `cancel` fires or every handle is dropped. Documents already
    /// being ingested run to completion; queued ones are dropped on cancellation.
    #[must_use]
    pub fn spawn(
        pipeline: Arc<IngestionPipeline>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> (IngestHandle, mpsc::Receiver<IngestEvent>, JoinHandle<()>) {
        let (job_tx, job_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = Self {
            pipeline,
            jobs: job_rx,
            events: event_tx,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            timeout: config.timeout,
            cancel,
        };
        let task = tokio::spawn(worker.run());
        (IngestHandle { jobs: job_tx }, event_rx, task)
    }

    async fn run(mut self) {
        let mut in_flight = JoinSet::new();
        loop {
            let doc = tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!(queued = self.jobs.len(), "ingest worker cancelled");
                    break;
                }
                job = self.jobs.recv() => match job {
                    Some(doc) => doc,
                    None => break,
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!("ingest task failed: {e}");
                    }
                    continue;
                }
            };

            let permit = tokio::select! {
                () = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pipeline = Arc::clone(&self.pipeline);
            let events = self.events.clone();
            let timeout = self.timeout;
            in_flight.spawn(async move {
                let _permit = permit;
                let event = match pipeline.ingest_with_timeout(&doc, timeout).await {
                    Ok(report) => IngestEvent::Completed(report),
                    Err(e) => {
                        tracing::warn!(
                            subject = %doc.subject,
                            document_id = %doc.id,
                            error = %e,
                            "ingestion failed"
                        );
                        IngestEvent::Failed {
                            document_id: doc.id,
                            subject: doc.subject,
                            kind: e.kind(),
                            error: e.to_string(),
                        }
                    }
                };
                if events.send(event).await.is_err() {
                    tracing::debug!("ingest event receiver dropped");
                }
            });
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                tracing::error!("ingest task failed: {e}");
            }
        }
        tracing::debug!("ingest worker stopped");
    }
}
