//! The external embedding service seam.

use std::time::Duration;

use async_trait::async_trait;

/// Failure reported by an embedding service call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Network hiccup, 5xx, timeout. Worth retrying.
    #[error("transient service error: {0}")]
    Transient(String),

    /// The service asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Bad request, auth failure, unknown model. Retrying will not help.
    #[error("permanent service error: {0}")]
    Permanent(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

impl From<ServiceError> for gapfinder_core::Error {
    fn from(e: ServiceError) -> Self {
        gapfinder_core::Error::Service(e.to_string())
    }
}

/// Turns an ordered batch of texts into one vector per text.
///
/// Implementations must return vectors in input order. The generator checks
/// count and dimensionality before anything is stored.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "embedding-service"
    }
}
