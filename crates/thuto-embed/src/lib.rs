//! Sentence-embedding backends and the lifetime-scoped service that owns one of them.

pub mod any;
#[cfg(feature = "candle")]
pub mod candle;
pub mod error;
pub mod hash;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod service;

pub use any::AnyEmbedder;
pub use error::{EmbedError, Result};
pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;
pub use provider::EmbeddingProvider;
pub use service::{EmbedServiceConfig, EmbeddingService};
