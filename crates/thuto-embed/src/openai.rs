use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any backend exposing the OpenAI `POST /embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimensions: Option<usize>,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if the HTTP client cannot be built.
    pub fn new(api_key: Option<String>, mut base_url: String, model: String) -> Result<Self> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: crate::http::default_client()?,
            api_key,
            base_url,
            model,
            dimensions: None,
        })
    }

    /// Ask the backend for shortened vectors (text-embedding-3 models).
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
            dimensions: self.dimensions,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            EmbedError::ModelUnavailable(format!("{} unreachable: {e}", self.base_url))
        })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!(%status, body = %text, "embedding API error");
            return Err(EmbedError::ModelUnavailable(format!(
                "embedding request to {} failed (status {status})",
                self.base_url
            )));
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        if resp.data.is_empty() {
            return Err(EmbedError::EmptyResponse { provider: "openai" });
        }
        if resp.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                provider: "openai",
                expected: texts.len(),
                actual: resp.data.len(),
            });
        }

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);
        if data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(EmbedError::Inference(
                "embedding response indices are not a permutation of the inputs".into(),
            ));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn inputs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn reorders_response_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            Some("sk-test".into()),
            format!("{}/v1/", server.uri()),
            "text-embedding-3-small".into(),
        )
        .unwrap();

        let out = embedder.embed_batch(&inputs(&["a", "b"])).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn server_error_is_model_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(None, server.uri(), "m".into()).unwrap();
        let err = embedder.embed_batch(&inputs(&["x"])).await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable(_)));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn unreachable_backend_is_model_unavailable() {
        let embedder =
            OpenAiEmbedder::new(None, "http://127.0.0.1:9".into(), "m".into()).unwrap();
        let err = embedder.embed_batch(&inputs(&["x"])).await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn short_response_is_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(None, server.uri(), "m".into()).unwrap();
        let err = embedder
            .embed_batch(&inputs(&["x", "y"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::CountMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_input_skips_request() {
        let embedder = OpenAiEmbedder::new(None, "http://127.0.0.1:9".into(), "m".into()).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn debug_redacts_key() {
        let embedder =
            OpenAiEmbedder::new(Some("secret".into()), "http://x".into(), "m".into()).unwrap();
        let dbg = format!("{embedder:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
