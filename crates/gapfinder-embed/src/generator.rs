//! Batch embedding generator.
//!
//! Splits pending chunks into batches of `batch_size`, runs each batch on its
//! own tokio task behind a semaphore of `concurrency` permits, and collects
//! the per-batch results through one channel. [`EmbeddingGenerator::generate`]
//! resolves only after every task has reported or gone away, so callers can
//! treat its return as the embedding barrier.

use std::sync::Arc;

use gapfinder_core::EmbeddingConfig;
use gapfinder_store::{Chunk, EmbeddingEntry};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::retry::{RetryOutcome, RetryPolicy};
use crate::service::{EmbeddingService, ServiceError};

/// What happened to one batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// One validated vector per chunk, in chunk order.
    Embedded { vectors: Vec<Vec<f32>>, attempts: u32 },
    /// Transient or rate-limit failures on every attempt.
    RetriesExhausted { error: ServiceError, attempts: u32 },
    /// Permanent failure; the batch was abandoned.
    Rejected { error: ServiceError, attempts: u32 },
    /// The service answered, but the answer failed validation.
    Invalid(String),
}

#[derive(Debug)]
pub struct BatchResult {
    pub batch_index: usize,
    pub chunk_ids: Vec<i64>,
    pub outcome: BatchOutcome,
}

impl BatchResult {
    /// Store-ready entries, if the batch succeeded.
    pub fn entries(&self) -> Option<Vec<EmbeddingEntry>> {
        match &self.outcome {
            BatchOutcome::Embedded { vectors, .. } => Some(
                self.chunk_ids
                    .iter()
                    .zip(vectors.iter())
                    .map(|(&chunk_id, vector)| EmbeddingEntry {
                        chunk_id,
                        vector: vector.clone(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Everything `generate` produced, batches sorted by index.
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub batches: Vec<BatchResult>,
    /// Chunks never sent because their text was blank.
    pub skipped_blank: usize,
    /// Batches whose task ended without reporting.
    pub lost_batches: usize,
}

pub struct EmbeddingGenerator {
    service: Arc<dyn EmbeddingService>,
    policy: RetryPolicy,
    model_id: String,
    batch_size: usize,
    concurrency: usize,
    expected_dimension: Option<usize>,
}

impl EmbeddingGenerator {
    pub fn new(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
        Self {
            service,
            policy: RetryPolicy::from_config(config),
            model_id: config.model_id.clone(),
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            expected_dimension: config.dimensions,
        }
    }

    /// Dimensionality every returned vector must have. `None` lets the first
    /// vector of each batch decide.
    pub fn with_expected_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Embed `chunks` and return one result per batch.
    pub async fn generate(&self, chunks: Vec<Chunk>) -> GenerationReport {
        let total_chunks = chunks.len();
        let (pending, blank): (Vec<Chunk>, Vec<Chunk>) =
            chunks.into_iter().partition(|c| !c.text.trim().is_empty());
        if !blank.is_empty() {
            warn!("Skipping {} blank chunks", blank.len());
        }

        let batches: Vec<Vec<Chunk>> = pending
            .chunks(self.batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        let total_batches = batches.len();
        info!(
            "Embedding {} chunks in {} batches (model={}, service={}, concurrency={})",
            total_chunks - blank.len(),
            total_batches,
            self.model_id,
            self.service.name(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchResult>();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                warn!("Semaphore closed; {} batches not started", total_batches - batch_index);
                break;
            };
            let tx = tx.clone();
            let service = self.service.clone();
            let policy = self.policy.clone();
            let model_id = self.model_id.clone();
            let expected = self.expected_dimension;

            tokio::spawn(async move {
                let _permit = permit;
                let chunk_ids: Vec<i64> = batch.iter().map(|c| c.id).collect();
                let texts: Vec<String> = batch.into_iter().map(|c| c.text).collect();
                let outcome = embed_batch(service.as_ref(), &policy, &model_id, &texts, expected).await;
                debug!("Batch {} finished: {}", batch_index, describe(&outcome));
                let _ = tx.send(BatchResult {
                    batch_index,
                    chunk_ids,
                    outcome,
                });
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total_batches);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results.sort_by_key(|r| r.batch_index);

        let lost_batches = total_batches - results.len();
        if lost_batches > 0 {
            warn!("{} embedding batches ended without reporting", lost_batches);
        }

        GenerationReport {
            batches: results,
            skipped_blank: blank.len(),
            lost_batches,
        }
    }
}

async fn embed_batch(
    service: &dyn EmbeddingService,
    policy: &RetryPolicy,
    model_id: &str,
    texts: &[String],
    expected: Option<usize>,
) -> BatchOutcome {
    match policy.run(move || service.embed(model_id, texts)).await {
        RetryOutcome::Success { value, attempts } => match validate(&value, texts.len(), expected) {
            Ok(()) => BatchOutcome::Embedded {
                vectors: value,
                attempts,
            },
            Err(reason) => BatchOutcome::Invalid(reason),
        },
        RetryOutcome::Exhausted { error, attempts } => {
            BatchOutcome::RetriesExhausted { error, attempts }
        }
        RetryOutcome::Permanent { error, attempts } => BatchOutcome::Rejected { error, attempts },
    }
}

/// Count, dimensionality and finiteness checks on a service response.
fn validate(vectors: &[Vec<f32>], expected_count: usize, expected_dim: Option<usize>) -> Result<(), String> {
    if vectors.len() != expected_count {
        return Err(format!(
            "service returned {} vectors for {} texts",
            vectors.len(),
            expected_count
        ));
    }
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let dim = expected_dim.unwrap_or(first.len());
    if dim == 0 {
        return Err("service returned empty vectors".into());
    }
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != dim {
            return Err(format!("vector {} has dimensionality {}, expected {}", i, v.len(), dim));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(format!("vector {} contains non-finite values", i));
        }
    }
    Ok(())
}

fn describe(outcome: &BatchOutcome) -> String {
    match outcome {
        BatchOutcome::Embedded { vectors, attempts } => {
            format!("{} vectors after {} attempt(s)", vectors.len(), attempts)
        }
        BatchOutcome::RetriesExhausted { error, attempts } => {
            format!("gave up after {} attempt(s): {}", attempts, error)
        }
        BatchOutcome::Rejected { error, .. } => format!("rejected: {}", error),
        BatchOutcome::Invalid(reason) => format!("invalid response: {}", reason),
    }
}
