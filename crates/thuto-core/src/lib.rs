//! Application layer: configuration, service bootstrap, background ingestion and the
//! answer-generator contract.

pub mod answer;
pub mod bootstrap;
pub mod config;
pub mod worker;

pub use answer::{Answer, AnswerGenerator, AnswerRequest, Citation, GenerationError, Prompt, build_prompt};
pub use bootstrap::AppServices;
pub use config::Config;
pub use worker::{IngestEvent, IngestHandle, IngestWorker, SubmitError, WorkerConfig};
