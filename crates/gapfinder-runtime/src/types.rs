//! Runtime report types.

use chrono::{DateTime, Utc};
use gapfinder_analysis::{RankedGap, RecommendationSummary};
use serde::Serialize;
use uuid::Uuid;

/// A page rejected at ingest time.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedPage {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub pages_ingested: usize,
    /// Pages whose chunk set changed (old embeddings dropped).
    pub pages_rechunked: usize,
    pub rejected: Vec<RejectedPage>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedReport {
    pub chunks_embedded: usize,
    /// Already embedded for this model; not requested again.
    pub chunks_skipped_existing: usize,
    pub chunks_skipped_blank: usize,
    pub chunks_failed: usize,
    pub batches_failed_transient: usize,
    pub batches_failed_permanent: usize,
    pub batches_invalid: usize,
    pub batches_lost: usize,
    /// Batches the store refused (dimension mismatch, missing chunk).
    pub integrity_errors: usize,
    /// Stored vectors dropped as undecodable; their chunks were re-queued.
    pub corrupt_vectors: usize,
}

/// Counters for everything a run did, skipped or degraded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub pages_ingested: usize,
    pub pages_rejected: usize,
    pub chunks_embedded: usize,
    pub chunks_skipped_existing: usize,
    pub chunks_skipped_blank: usize,
    pub chunks_failed: usize,
    pub batches_failed_transient: usize,
    pub batches_failed_permanent: usize,
    pub batches_invalid: usize,
    pub batches_lost: usize,
    pub integrity_errors: usize,
    pub corrupt_vectors: usize,
    pub insufficient_data_pages: usize,
    pub clusters: usize,
    pub topic_gaps: usize,
    pub gaps_written: usize,
}

impl RunSummary {
    pub fn record_ingest(&mut self, report: &IngestReport) {
        self.pages_ingested += report.pages_ingested;
        self.pages_rejected += report.rejected.len();
    }

    pub fn record_embed(&mut self, report: &EmbedReport) {
        self.chunks_embedded += report.chunks_embedded;
        self.chunks_skipped_existing += report.chunks_skipped_existing;
        self.chunks_skipped_blank += report.chunks_skipped_blank;
        self.chunks_failed += report.chunks_failed;
        self.batches_failed_transient += report.batches_failed_transient;
        self.batches_failed_permanent += report.batches_failed_permanent;
        self.batches_invalid += report.batches_invalid;
        self.batches_lost += report.batches_lost;
        self.integrity_errors += report.integrity_errors;
        self.corrupt_vectors += report.corrupt_vectors;
    }
}

/// A competitor-only cluster, with pages resolved to URLs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicGapReport {
    pub label: i64,
    pub competitor_urls: Vec<String>,
    pub chunk_count: usize,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub model_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ranked action plan, one entry per gap.
    pub gaps: Vec<RankedGap>,
    pub quick_wins: Vec<RankedGap>,
    pub recommendation_summary: RecommendationSummary,
    pub topic_gaps: Vec<TopicGapReport>,
    /// Competitor pages excluded for lack of embeddings.
    pub insufficient_data: Vec<String>,
    pub summary: RunSummary,
}
