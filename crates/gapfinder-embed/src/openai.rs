//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use gapfinder_core::{EmbeddingConfig, Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::{EmbeddingService, ServiceError};

/// Async embeddings client for OpenAI-compatible endpoints.
///
/// Performs a single request per call; retries belong to the caller's
/// [`RetryPolicy`](crate::RetryPolicy).
#[derive(Clone)]
pub struct OpenAiEmbeddingService {
    client: Client,
    endpoint: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbeddingService {
    pub fn new(
        api_key: &str,
        base_url: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing embedding API key".into()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| Error::Config(format!("invalid API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            dimensions,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            Error::Config("embedding.api_key not set (or OPENAI_API_KEY)".into())
        })?;
        Self::new(
            api_key,
            &config.base_url,
            config.dimensions,
            config.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, model_id: &str, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: model_id,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, retry_after, &body));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Transient(format!("bad embedding response: {}", e)))?;
        parsed.data.sort_by_key(|entry| entry.index);
        debug!("Embedded {} texts with {}", parsed.data.len(), model_id);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ServiceError {
    let message = format!("embeddings request failed ({}): {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        ServiceError::RateLimited {
            retry_after,
            message,
        }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ServiceError::Transient(message)
    } else {
        ServiceError::Permanent(message)
    }
}

fn classify_transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ServiceError::Transient(err.to_string())
    } else {
        ServiceError::Permanent(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
/// Delta-seconds `Retry-After`. Values too large for a `Duration` saturate;
/// the retry policy caps them anyway.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)
        .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), ""),
            ServiceError::RateLimited { retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, ""),
            ServiceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            ServiceError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, ""),
            ServiceError::Permanent(_)
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e300"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::MAX));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("NaN"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_requires_api_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAiEmbeddingService::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let service = OpenAiEmbeddingService::new(
            "sk-test",
            "http://localhost:8080/v1/",
            Some(256),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(service.endpoint(), "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn test_request_shape() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let req = EmbeddingRequest {
            model: "m",
            input: &texts,
            dimensions: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["input"][1], "b");
        assert!(json.get("dimensions").is_none());
    }
}
