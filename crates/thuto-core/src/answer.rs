//! Contract towards the external answer generator: the prompt it receives, the answer it
//! returns, and the citations derived from retrieved chunks.

use std::future::Future;

use serde::Serialize;
use thuto_memory::retriever::format_context;
use thuto_memory::{RetrievedChunk, Retriever};

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("answer generator unavailable: {0}")]
    Unavailable(String),
    #[error("invalid generator response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// One source an answer may cite, numbered as in the prompt's `[Document i]` labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub label: usize,
    pub document_id: String,
    pub filename: String,
    pub chunk_ordinal: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRequest {
    pub subject: String,
    pub query: String,
    pub prompt: Prompt,
    /// Ordered by descending relevance. Empty when nothing cleared the score threshold.
    pub chunks: Vec<RetrievedChunk>,
}

impl AnswerRequest {
    #[must_use]
    pub fn new(subject: &str, query: &str, chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            subject: subject.to_owned(),
            query: query.to_owned(),
            prompt: build_prompt(subject, query, &chunks),
            chunks,
        }
    }

    #[must_use]
    pub fn has_context(&self) -> bool {
        !self.chunks.is_empty()
    }

    #[must_use]
    pub fn citations(&self) -> Vec<Citation> {
        citations(&self.chunks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

pub trait AnswerGenerator: Send + Sync {
    fn generate(
        &self,
        request: &AnswerRequest,
    ) -> impl Future<Output = Result<Answer, GenerationError>> + Send;

    fn name(&self) -> &'static str;
}

#[must_use]
pub fn citations(chunks: &[RetrievedChunk]) -> Vec<Citation> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| Citation {
            label: i + 1,
            document_id: c.source.document_id.clone(),
            filename: c.source.filename.clone(),
            chunk_ordinal: c.source.chunk_ordinal,
            score: c.score,
        })
        .collect()
}

fn system_prompt(subject: &str) -> String {
    format!(
        "You are an expert {subject} tutor helping students understand {subject} concepts.\n\
         Base your answers only on the provided context documents.\n\
         If the context does not contain enough information, say so explicitly.\n\
         Cite the documents you use by their [Document i] label.\n\
         Never make up information that is not in the context."
    )
}

/// Build the generator prompt for `query` from the retrieved `chunks`.
#[must_use]
pub fn build_prompt(subject: &str, query: &str, chunks: &[RetrievedChunk]) -> Prompt {
    let user = if chunks.is_empty() {
        format!(
            "Question: {query}\n\n\
             No relevant context documents were found. Do not answer from general knowledge. \
             Explain that specific {subject} course materials are needed, and ask the student to \
             rephrase the question or check that the materials have been uploaded."
        )
    } else {
        format!(
            "Using the following context from {subject} course materials, answer the student's \
             question.\n\nContext:\n{}\n\nQuestion: {query}\n\n\
             Give a clear, educational answer based on the context above.",
            format_context(chunks)
        )
    };
    Prompt {
        system: system_prompt(subject),
        user,
    }
}

/// Retrieved context plus the generator's result. The context stays usable when generation
/// fails.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub request: AnswerRequest,
    pub answer: Result<Answer, GenerationError>,
}

/// Retrieve context for `query` with the retriever's defaults and hand it to `generator`.
///
/// # Errors
///
/// Returns retrieval errors; generation errors are reported inside the outcome.
pub async fn ask<G: AnswerGenerator>(
    retriever: &Retriever,
    generator: &G,
    subject: &str,
    query: &str,
) -> thuto_memory::Result<AnswerOutcome> {
    let chunks = retriever.retrieve_default(subject, query).await?;
    let request = AnswerRequest::new(subject, query, chunks);
    let answer = generator.generate(&request).await;
    if let Err(e) = &answer {
        tracing::warn!(subject, generator = generator.name(), error = %e, "answer generation failed");
    }
    Ok(AnswerOutcome { request, answer })
}
