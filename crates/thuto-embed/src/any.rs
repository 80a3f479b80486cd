#[cfg(feature = "candle")]
use crate::candle::CandleEmbedder;
use crate::error::Result;
use crate::hash::HashEmbedder;
#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::EmbeddingProvider;

/// Generates a match over all `AnyEmbedder` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Hash($p) => $expr,
            AnyEmbedder::OpenAi($p) => $expr,
            #[cfg(feature = "candle")]
            AnyEmbedder::Candle($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "candle")]
    Candle(CandleEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl EmbeddingProvider for AnyEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        delegate_embedder!(self, |p| p.embed_batch(texts).await)
    }

    fn name(&self) -> &'static str {
        delegate_embedder!(self, |p| p.name())
    }
}

impl From<HashEmbedder> for AnyEmbedder {
    fn from(p: HashEmbedder) -> Self {
        Self::Hash(p)
    }
}

impl From<OpenAiEmbedder> for AnyEmbedder {
    fn from(p: OpenAiEmbedder) -> Self {
        Self::OpenAi(p)
    }
}

#[cfg(feature = "candle")]
impl From<CandleEmbedder> for AnyEmbedder {
    fn from(p: CandleEmbedder) -> Self {
        Self::Candle(p)
    }
}

#[cfg(feature = "mock")]
impl From<MockEmbedder> for AnyEmbedder {
    fn from(p: MockEmbedder) -> Self {
        Self::Mock(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delegates_to_inner_provider() {
        let any = AnyEmbedder::from(HashEmbedder::new(8));
        assert_eq!(any.name(), "hash");
        let out = any.embed_batch(&["hello".to_owned()]).await.unwrap();
        assert_eq!(out[0], HashEmbedder::new(8).embed_one("hello"));
    }
}
