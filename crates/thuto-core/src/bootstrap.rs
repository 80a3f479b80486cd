//! Service construction and teardown: one embedding service, one store manager, and the
//! pipeline and retriever built on them.

use std::sync::Arc;

#[cfg(not(feature = "candle"))]
use anyhow::bail;
use anyhow::Context;
use thuto_embed::hash::DEFAULT_HASH_DIM;
use thuto_embed::{AnyEmbedder, EmbeddingService, HashEmbedder, OpenAiEmbedder};
use thuto_memory::{Chunker, IngestionPipeline, Retriever, VectorStoreManager};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EmbeddingConfig, EmbeddingProviderKind};
use crate::worker::{IngestEvent, IngestHandle, IngestWorker, WorkerConfig};

/// Build the configured embedding backend. Loading a local model blocks, so it runs on a
/// blocking thread.
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed or the model cannot be loaded.
pub async fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<AnyEmbedder> {
    match config.provider {
        EmbeddingProviderKind::Hash => {
            let dim = config.dimensions.unwrap_or(DEFAULT_HASH_DIM);
            Ok(HashEmbedder::new(dim).into())
        }
        EmbeddingProviderKind::OpenAi => {
            let mut embedder = OpenAiEmbedder::new(
                config.api_key.as_ref().map(|k| k.expose().to_owned()),
                config.base_url.clone(),
                config.model.clone(),
            )
            .context("failed to build embedding HTTP client")?;
            if let Some(dim) = config.dimensions {
                embedder = embedder.with_dimensions(dim);
            }
            Ok(embedder.into())
        }
        #[cfg(feature = "candle")]
        EmbeddingProviderKind::Candle => {
            use thuto_embed::candle::{CandleEmbedder, default_device};

            let model = config.model.clone();
            let embedder = tokio::task::spawn_blocking(move || {
                CandleEmbedder::load(&model, &default_device())
            })
            .await
            .context("model loading task failed")?
            .with_context(|| format!("failed to load embedding model {}", config.model))?;
            Ok(embedder.into())
        }
        #[cfg(not(feature = "candle"))]
        EmbeddingProviderKind::Candle => {
            bail!("embedding provider `candle` requires building with the `candle` feature")
        }
    }
}

pub struct AppServices {
    config: Config,
    embedder: Arc<EmbeddingService>,
    manager: Arc<VectorStoreManager>,
    pipeline: Arc<IngestionPipeline>,
    retriever: Arc<Retriever>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("provider", &self.embedder.provider_name())
            .field("dim", &self.embedder.dim())
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Validate `config`, connect the configured embedding backend and build every service.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the embedding backend is unavailable.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding).await?;
        Self::with_embedder(config, embedder).await
    }

    /// Like [`Self::init`] with an already constructed embedding backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the backend fails its probe.
    pub async fn with_embedder(config: Config, embedder: impl Into<AnyEmbedder>) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = EmbeddingService::connect(embedder, config.embedding.service_config())
            .await
            .context("embedding backend unavailable")?;
        let embedder = Arc::new(embedder);
        tracing::info!(
            provider = embedder.provider_name(),
            dim = embedder.dim(),
            "embedding service ready"
        );

        let manager = Arc::new(VectorStoreManager::new(
            config.storage.store_config(),
            embedder.dim(),
        ));
        let chunker = Chunker::new(config.chunking.into()).context("invalid chunking config")?;
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&manager),
            Arc::clone(&embedder),
            chunker,
            config.ingest.loader_options(),
        ));
        let retriever = Arc::new(
            Retriever::new(
                Arc::clone(&manager),
                Arc::clone(&embedder),
                config.retrieval.into(),
            )
            .context("invalid retrieval config")?,
        );

        Ok(Self {
            config,
            embedder,
            manager,
            pipeline,
            retriever,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<VectorStoreManager> {
        &self.manager
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// Start a background ingestion worker configured from `[ingest]`.
    #[must_use]
    pub fn spawn_worker(
        &self,
        cancel: CancellationToken,
    ) -> (IngestHandle, mpsc::Receiver<IngestEvent>, JoinHandle<()>) {
        IngestWorker::spawn(
            Arc::clone(&self.pipeline),
            WorkerConfig::from(&self.config.ingest),
            cancel,
        )
    }

    /// Release the embedding backend. Later embedding calls fail with `ShutDown`.
    pub fn shutdown(&self) {
        self.embedder.shutdown();
        tracing::info!("services shut down");
    }
}
