//! Gapfinder Embed: embedding service seam, retry policy, batch generator.
//!
//! `EmbeddingService` abstracts the external embedding API. The shipped
//! implementation is `OpenAiEmbeddingService` for OpenAI-compatible
//! endpoints; tests plug in in-process fakes. `EmbeddingGenerator` drives a
//! service over pending chunks with bounded concurrency and bounded retries.

pub mod generator;
pub mod openai;
pub mod retry;
pub mod service;

pub use generator::{BatchOutcome, BatchResult, EmbeddingGenerator, GenerationReport};
pub use openai::OpenAiEmbeddingService;
pub use retry::{RetryOutcome, RetryPolicy};
pub use service::{EmbeddingService, ServiceError};

use std::sync::Arc;

use gapfinder_core::{EmbeddingConfig, Result};

/// Create the embedding service described by `config`.
pub fn create_service(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingService>> {
    let service = OpenAiEmbeddingService::from_config(config)?;
    tracing::info!(
        "Using OpenAI-compatible embedder at {} (model={})",
        service.endpoint(),
        config.model_id
    );
    Ok(Arc::new(service))
}
