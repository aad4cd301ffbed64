//! Gapfinder Analysis: page matching, topic clustering, gap detection, ranking.
//!
//! Everything here is synchronous and deterministic for a fixed store
//! snapshot. [`analyze`] loads one model's vectors from the store and runs the
//! full pipeline; callers decide where (and whether) to persist the gaps.

pub mod clustering;
pub mod detector;
pub mod recommender;
pub mod similarity;

pub use clustering::{cluster, ClusterParams, Clustering, TopicGap, NOISE};
pub use detector::{Detection, GapDetector};
pub use recommender::{
    ActionKind, Effort, RankedGap, RecommendationSummary, Recommendations, Recommender,
};
pub use similarity::{match_competitor_pages, PageMatch};

use std::collections::BTreeMap;

use gapfinder_core::{RankingConfig, Result, SiteRole, Thresholds};
use gapfinder_store::{Page, SqliteStore};
use tracing::info;

/// Result of one analysis pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub competitor_pages: Vec<Page>,
    pub matches: BTreeMap<i64, PageMatch>,
    pub detection: Detection,
    pub clustering: Clustering,
    pub recommendations: Recommendations,
}

/// Run similarity, clustering, detection and ranking over the store's
/// current contents for `model_id`.
pub fn analyze(
    store: &SqliteStore,
    model_id: &str,
    thresholds: &Thresholds,
    ranking: &RankingConfig,
) -> Result<Analysis> {
    let primary_pages = store.get_pages(SiteRole::Primary)?;
    let competitor_pages = store.get_pages(SiteRole::Competitor)?;
    let primary_vectors = store.get_vectors(SiteRole::Primary, model_id)?;
    let competitor_vectors = store.get_vectors(SiteRole::Competitor, model_id)?;
    info!(
        "Analyzing {} primary pages ({} vectors) against {} competitor pages ({} vectors)",
        primary_pages.len(),
        primary_vectors.len(),
        competitor_pages.len(),
        competitor_vectors.len()
    );

    let matches = match_competitor_pages(&primary_vectors, &competitor_vectors)?;
    let clustering = cluster(
        &primary_vectors,
        &competitor_vectors,
        ClusterParams::from_thresholds(thresholds),
    )?;
    let detection =
        GapDetector::new(thresholds.clone()).detect(&primary_pages, &competitor_pages, &matches);
    let recommendations = Recommender::new(thresholds, ranking).rank(detection.gaps.clone());

    Ok(Analysis {
        competitor_pages,
        matches,
        detection,
        clustering,
        recommendations,
    })
}
