//! Orchestrator: ingest, embed, analyze, report.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use gapfinder_analysis::{Analysis, Clustering};
use gapfinder_core::{EngineConfig, Error, Result};
use gapfinder_embed::{BatchOutcome, EmbeddingGenerator, EmbeddingService};
use gapfinder_store::{NewPage, Page, SqliteStore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ingest::PageIngester;
use crate::types::*;

/// Everything a run needs, passed explicitly.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<SqliteStore>,
    pub service: Arc<dyn EmbeddingService>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(store: Arc<SqliteStore>, service: Arc<dyn EmbeddingService>, config: EngineConfig) -> Self {
        Self {
            store,
            service,
            config,
        }
    }

    /// Open the store named by `config.database_path`.
    pub fn open(config: EngineConfig, service: Arc<dyn EmbeddingService>) -> Result<Self> {
        let store = SqliteStore::open(&config.database_path)?;
        Ok(Self::new(Arc::new(store), service, config))
    }
}

/// Top-level orchestrator for gap-analysis runs.
pub struct Orchestrator {
    ctx: EngineContext,
}

impl Orchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        info!(
            "Orchestrator initialized: model={}, db={}",
            ctx.config.embedding.model_id,
            ctx.store.db_path().display()
        );
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn store(&self) -> &SqliteStore {
        &self.ctx.store
    }

    fn model_id(&self) -> &str {
        &self.ctx.config.embedding.model_id
    }

    /// Store pages and their chunks.
    pub fn ingest(&self, pages: &[NewPage]) -> Result<IngestReport> {
        PageIngester::new(&self.ctx.store).ingest_all(pages)
    }

    /// Embed every chunk that has no vector for the configured model yet.
    ///
    /// Resolves only after every batch has settled. Failed batches are
    /// counted and never abort; only store failures other than integrity
    /// violations are returned as errors.
    pub async fn embed_pending(&self) -> Result<EmbedReport> {
        let store = &self.ctx.store;
        let model_id = self.model_id();

        let corrupt_vectors = self.purge_corrupt()?;
        let total_chunks = store.count_chunks()? as usize;
        let pending = store.chunks_without_embedding(model_id)?;
        let pending_count = pending.len();
        let mut report = EmbedReport {
            chunks_skipped_existing: total_chunks.saturating_sub(pending_count),
            corrupt_vectors,
            ..EmbedReport::default()
        };
        if pending.is_empty() {
            info!("No chunks pending embedding for {}", model_id);
            return Ok(report);
        }

        let expected = match self.ctx.config.embedding.dimensions {
            Some(d) => Some(d),
            None => store.model_dimension(model_id)?,
        };
        let generator = EmbeddingGenerator::new(self.ctx.service.clone(), &self.ctx.config.embedding)
            .with_expected_dimension(expected);
        let generated = generator.generate(pending).await;
        report.chunks_skipped_blank = generated.skipped_blank;
        report.batches_lost = generated.lost_batches;

        for batch in &generated.batches {
            match &batch.outcome {
                BatchOutcome::Embedded { .. } => {
                    let entries = batch.entries().unwrap_or_default();
                    match store.batch_put(model_id, &entries) {
                        Ok(n) => report.chunks_embedded += n,
                        Err(Error::DataIntegrity(msg)) => {
                            warn!("Batch {} not stored: {}", batch.batch_index, msg);
                            report.integrity_errors += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                BatchOutcome::RetriesExhausted { error, attempts } => {
                    warn!(
                        "Batch {} failed after {} attempts: {}",
                        batch.batch_index, attempts, error
                    );
                    report.batches_failed_transient += 1;
                }
                BatchOutcome::Rejected { error, .. } => {
                    error!("Batch {} rejected: {}", batch.batch_index, error);
                    report.batches_failed_permanent += 1;
                }
                BatchOutcome::Invalid(reason) => {
                    warn!("Batch {} returned invalid vectors: {}", batch.batch_index, reason);
                    report.batches_invalid += 1;
                }
            }
        }

        report.chunks_failed = pending_count
            .saturating_sub(report.chunks_skipped_blank)
            .saturating_sub(report.chunks_embedded);
        info!(
            "Embedding complete: {} embedded, {} already present, {} blank, {} failed",
            report.chunks_embedded,
            report.chunks_skipped_existing,
            report.chunks_skipped_blank,
            report.chunks_failed
        );
        Ok(report)
    }

    /// Drop undecodable vectors of the configured model so their chunks
    /// count as pending again. Returns how many were dropped.
    pub fn purge_corrupt(&self) -> Result<usize> {
        let purged = self.ctx.store.purge_corrupt_embeddings(self.model_id())?;
        if !purged.is_empty() {
            warn!(
                "Dropped {} corrupt vectors for {}: chunks {:?}",
                purged.len(),
                self.model_id(),
                purged
            );
        }
        Ok(purged.len())
    }

    /// Run the analysis on a blocking thread and replace the stored gaps.
    /// Returns the analysis and the number of gap rows written.
    pub async fn analyze(&self) -> Result<(Analysis, usize)> {
        let store = self.ctx.store.clone();
        let model_id = self.model_id().to_string();
        let thresholds = self.ctx.config.thresholds.clone();
        let ranking = self.ctx.config.ranking.clone();

        tokio::task::spawn_blocking(move || {
            let analysis = gapfinder_analysis::analyze(&store, &model_id, &thresholds, &ranking)?;
            let written = store.replace_gaps(&analysis.detection.gaps)?;
            Ok::<_, Error>((analysis, written))
        })
        .await
        .map_err(|e| Error::Internal(format!("analysis task failed: {}", e)))?
    }

    /// Full run: ingest → embed (barrier) → analyze → report.
    pub async fn run(&self, pages: &[NewPage]) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!("Run {} started with {} pages", run_id, pages.len());

        let mut summary = RunSummary::default();
        let ingest = self.ingest(pages)?;
        summary.record_ingest(&ingest);

        let embed = self.embed_pending().await?;
        summary.record_embed(&embed);

        let report = self.finish(run_id, started_at, summary).await?;
        info!(
            "Run {} finished: {} gaps, {} topic gaps",
            run_id,
            report.gaps.len(),
            report.topic_gaps.len()
        );
        Ok(report)
    }

    /// Analysis-only run over the vectors already in the store.
    ///
    /// Corrupt vectors are dropped and counted first; their chunks stay
    /// unembedded until the next full run.
    pub async fn analyze_only(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let summary = RunSummary {
            corrupt_vectors: self.purge_corrupt()?,
            ..RunSummary::default()
        };
        self.finish(Uuid::new_v4(), started_at, summary).await
    }

    async fn finish(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        mut summary: RunSummary,
    ) -> Result<RunReport> {
        let (analysis, gaps_written) = self.analyze().await?;

        let topic_gaps = topic_gap_reports(&analysis.clustering, &analysis.competitor_pages);
        summary.insufficient_data_pages = analysis.detection.insufficient_data.len();
        summary.clusters = analysis.clustering.cluster_count;
        summary.topic_gaps = topic_gaps.len();
        summary.gaps_written = gaps_written;

        let recommendations = analysis.recommendations;
        Ok(RunReport {
            run_id,
            model_id: self.model_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            gaps: recommendations.actions,
            quick_wins: recommendations.quick_wins,
            recommendation_summary: recommendations.summary,
            topic_gaps,
            insufficient_data: analysis.detection.insufficient_data,
            summary,
        })
    }
}

fn topic_gap_reports(clustering: &Clustering, competitor_pages: &[Page]) -> Vec<TopicGapReport> {
    let urls: HashMap<i64, &str> = competitor_pages
        .iter()
        .map(|p| (p.id, p.url.as_str()))
        .collect();
    clustering
        .topic_gaps
        .iter()
        .map(|gap| TopicGapReport {
            label: gap.label,
            competitor_urls: gap
                .competitor_page_ids
                .iter()
                .filter_map(|id| urls.get(id).map(|u| u.to_string()))
                .collect(),
            chunk_count: gap.chunk_ids.len(),
        })
        .collect()
}
