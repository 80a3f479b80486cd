#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend could not be reached or loaded.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("{provider} returned {actual} vectors for {expected} inputs")]
    CountMismatch {
        provider: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[cfg(feature = "candle")]
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("embedding service has been shut down")]
    ShutDown,
}

impl EmbedError {
    /// Whether retrying later (or fixing configuration) may succeed.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable(_) | Self::ModelLoad(_) | Self::Http(_) | Self::ShutDown
        )
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;
