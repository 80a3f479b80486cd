//! Test-only mock embedder with failure injection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{EmbedError, Result};
use crate::hash::HashEmbedder;
use crate::provider::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    inner: HashEmbedder,
    /// Every call fails with `ModelUnavailable`.
    pub fail: bool,
    /// Calls after the first `n` fail with `ModelUnavailable`.
    pub fail_after: Option<usize>,
    /// Vectors are truncated or zero-padded to this length.
    pub output_dim: Option<usize>,
    /// Milliseconds to sleep before returning.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dim),
            fail: false,
            fail_after: None,
            output_dim: None,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    #[must_use]
    pub fn with_output_dim(mut self, dim: usize) -> Self {
        self.output_dim = Some(dim);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of `embed_batch` calls made so far, shared across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail || self.fail_after.is_some_and(|n| call >= n) {
            return Err(EmbedError::ModelUnavailable("mock embedder failure".into()));
        }
        let mut out = self.inner.embed_batch(texts).await?;
        if let Some(dim) = self.output_dim {
            for v in &mut out {
                v.resize(dim, 0.0);
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
