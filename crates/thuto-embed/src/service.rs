//! The process-wide embedding service.
//!
//! Built once at startup around one backend. Construction probes the backend to fix the output
//! dimension, every later call is checked against it, and `shutdown` releases the backend.

use std::sync::{Arc, Mutex};

use crate::any::AnyEmbedder;
use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

pub const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedServiceConfig {
    /// Maximum number of texts sent to the backend per call.
    pub batch_size: usize,
    /// Dimension the caller expects; a different probe result fails construction.
    pub expected_dim: Option<usize>,
}

impl Default for EmbedServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            expected_dim: None,
        }
    }
}

#[derive(Debug)]
pub struct EmbeddingService {
    provider: Mutex<Option<Arc<AnyEmbedder>>>,
    name: &'static str,
    dim: usize,
    batch_size: usize,
}

impl EmbeddingService {
    /// Probe `provider` once and build a service around it.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the probe fails and `DimensionMismatch` if the probed
    /// dimension differs from `config.expected_dim`.
    pub async fn connect(
        provider: impl Into<AnyEmbedder>,
        config: EmbedServiceConfig,
    ) -> Result<Self> {
        let provider = provider.into();
        let name = provider.name();

        let probe = provider.embed_batch(&["probe".to_owned()]).await?;
        let dim = probe
            .first()
            .map(Vec::len)
            .filter(|d| *d > 0)
            .ok_or(EmbedError::EmptyResponse { provider: name })?;

        if let Some(expected) = config.expected_dim
            && expected != dim
        {
            tracing::error!(provider = name, expected, actual = dim, "embedding dimension mismatch");
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: dim,
            });
        }

        tracing::info!(provider = name, dim, batch_size = config.batch_size, "embedding service ready");

        Ok(Self {
            provider: Mutex::new(Some(Arc::new(provider))),
            name,
            dim,
            batch_size: config.batch_size.max(1),
        })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn provider(&self) -> Result<Arc<AnyEmbedder>> {
        self.provider
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(EmbedError::ShutDown)
    }

    /// # Errors
    ///
    /// See [`Self::embed_batch`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_owned()]).await?;
        out.pop().ok_or(EmbedError::EmptyResponse {
            provider: self.name,
        })
    }

    /// Embed `texts` in slices of at most `batch_size`, preserving order and length.
    ///
    /// # Errors
    ///
    /// Returns the backend's error, `CountMismatch` if a slice comes back short, or
    /// `DimensionMismatch` if any vector has the wrong length.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let provider = self.provider()?;
        let mut out = Vec::with_capacity(texts.len());

        for slice in texts.chunks(self.batch_size) {
            let vectors = provider.embed_batch(slice).await?;
            if vectors.len() != slice.len() {
                return Err(EmbedError::CountMismatch {
                    provider: self.name,
                    expected: slice.len(),
                    actual: vectors.len(),
                });
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dim,
                    actual: bad.len(),
                });
            }
            out.extend(vectors);
        }

        tracing::debug!(provider = self.name, count = out.len(), "embedded batch");
        Ok(out)
    }

    /// Release the backend. Subsequent calls fail with `ShutDown`.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.provider.lock()
            && guard.take().is_some()
        {
            tracing::info!(provider = self.name, "embedding service shut down");
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        !matches!(self.provider.lock().as_deref(), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashEmbedder;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("passage number {i}")).collect()
    }

    #[tokio::test]
    async fn connect_probes_dimension() {
        let svc = EmbeddingService::connect(HashEmbedder::new(24), EmbedServiceConfig::default())
            .await
            .unwrap();
        assert_eq!(svc.dim(), 24);
        assert_eq!(svc.provider_name(), "hash");
    }

    #[tokio::test]
    async fn connect_rejects_unexpected_dimension() {
        let config = EmbedServiceConfig {
            expected_dim: Some(768),
            ..EmbedServiceConfig::default()
        };
        let err = EmbeddingService::connect(HashEmbedder::new(384), config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 768,
                actual: 384
            }
        ));
    }

    #[tokio::test]
    async fn batching_preserves_order_and_length() {
        let config = EmbedServiceConfig {
            batch_size: 3,
            ..EmbedServiceConfig::default()
        };
        let svc = EmbeddingService::connect(HashEmbedder::new(16), config)
            .await
            .unwrap();
        let input = texts(10);
        let out = svc.embed_batch(&input).await.unwrap();
        assert_eq!(out.len(), 10);
        for (text, v) in input.iter().zip(&out) {
            assert_eq!(&svc.embed(text).await.unwrap(), v);
        }
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let svc = EmbeddingService::connect(HashEmbedder::new(4), EmbedServiceConfig::default())
            .await
            .unwrap();
        assert!(svc.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_provider() {
        let svc = EmbeddingService::connect(HashEmbedder::new(4), EmbedServiceConfig::default())
            .await
            .unwrap();
        svc.shutdown();
        assert!(svc.is_shut_down());
        assert!(matches!(
            svc.embed("x").await.unwrap_err(),
            EmbedError::ShutDown
        ));
    }

    #[tokio::test]
    async fn zero_batch_size_is_clamped() {
        let config = EmbedServiceConfig {
            batch_size: 0,
            expected_dim: None,
        };
        let svc = EmbeddingService::connect(HashEmbedder::new(4), config)
            .await
            .unwrap();
        assert_eq!(svc.batch_size(), 1);
        assert_eq!(svc.embed_batch(&texts(3)).await.unwrap().len(), 3);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn batch_slicing_does_not_change_vectors(
            items in proptest::collection::vec("[a-z ]{0,40}", 1..20),
            batch_size in 1usize..6,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (batched, single) = rt.block_on(async {
                let config = EmbedServiceConfig { batch_size, expected_dim: None };
                let svc = EmbeddingService::connect(HashEmbedder::new(16), config).await.unwrap();
                let batched = svc.embed_batch(&items).await.unwrap();
                let mut single = Vec::with_capacity(items.len());
                for item in &items {
                    single.push(svc.embed(item).await.unwrap());
                }
                (batched, single)
            });
            proptest::prop_assert_eq!(batched, single);
        }
    }
}
