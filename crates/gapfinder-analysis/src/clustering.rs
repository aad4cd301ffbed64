//! DBSCAN over primary and competitor chunk vectors.
//!
//! Distance is `1 − cos`, so two chunks are neighbours when their cosine
//! similarity is at least `1 − eps`. A point's neighbourhood includes the
//! point itself. Points are visited in input order (primary first, then
//! competitor, each by page then chunk index), which fixes the labels.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use gapfinder_core::{Result, SiteRole, Thresholds};
use gapfinder_store::StoredVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::{common_dimension, normalized_matrix};

/// Label of points that belong to no cluster.
pub const NOISE: i64 = -1;

const BLOCK_ROWS: usize = 512;

/// A cluster made only of competitor chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGap {
    pub label: i64,
    pub competitor_page_ids: Vec<i64>,
    pub chunk_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clustering {
    /// chunk_id → cluster label (`NOISE` for noise).
    pub labels: BTreeMap<i64, i64>,
    pub cluster_count: usize,
    pub topic_gaps: Vec<TopicGap>,
}

/// DBSCAN parameters derived from the thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    pub eps: f32,
    pub min_samples: usize,
}

impl ClusterParams {
    pub fn from_thresholds(thresholds: &Thresholds) -> Self {
        Self {
            eps: 1.0 - thresholds.similarity_threshold,
            min_samples: thresholds.cluster_min_samples.max(1),
        }
    }
}

/// Cluster the combined vectors and report competitor-only clusters.
pub fn cluster(
    primary: &[StoredVector],
    competitor: &[StoredVector],
    params: ClusterParams,
) -> Result<Clustering> {
    let Some(dim) = common_dimension(&[primary, competitor])? else {
        return Ok(Clustering::default());
    };

    let points: Vec<(SiteRole, &StoredVector)> = primary
        .iter()
        .map(|v| (SiteRole::Primary, v))
        .chain(competitor.iter().map(|v| (SiteRole::Competitor, v)))
        .collect();
    let matrix = normalized_matrix(points.iter().map(|(_, v)| *v), dim);

    let neighbours = neighbourhoods(&matrix, params.eps);
    let labels = dbscan(&neighbours, params.min_samples);
    let cluster_count = labels.iter().filter(|&&l| l != NOISE).max().map_or(0, |&m| m as usize + 1);

    let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label != NOISE {
            members.entry(label).or_default().push(i);
        }
    }

    let topic_gaps: Vec<TopicGap> = members
        .into_iter()
        .filter(|(_, idx)| idx.iter().all(|&i| points[i].0 == SiteRole::Competitor))
        .map(|(label, idx)| {
            let pages: BTreeSet<i64> = idx.iter().map(|&i| points[i].1.page_id).collect();
            TopicGap {
                label,
                competitor_page_ids: pages.into_iter().collect(),
                chunk_ids: idx.iter().map(|&i| points[i].1.chunk_id).collect(),
            }
        })
        .collect();

    debug!(
        "Clustered {} points into {} clusters ({} topic gaps)",
        points.len(),
        cluster_count,
        topic_gaps.len()
    );

    Ok(Clustering {
        labels: points
            .iter()
            .zip(labels.iter())
            .map(|((_, v), &label)| (v.chunk_id, label))
            .collect(),
        cluster_count,
        topic_gaps,
    })
}

/// Neighbour indices (self included) for every row of a normalized matrix.
fn neighbourhoods(matrix: &ndarray::Array2<f32>, eps: f32) -> Vec<Vec<usize>> {
    let n = matrix.nrows();
    let mut out = Vec::with_capacity(n);
    let matrix_t = matrix.t();
    for start in (0..n).step_by(BLOCK_ROWS) {
        let end = (start + BLOCK_ROWS).min(n);
        let sims = matrix.slice(ndarray::s![start..end, ..]).dot(&matrix_t);
        for (offset, row) in sims.outer_iter().enumerate() {
            let i = start + offset;
            let list: Vec<usize> = row
                .iter()
                .enumerate()
                .filter(|&(j, &sim)| j == i || 1.0 - sim <= eps)
                .map(|(j, _)| j)
                .collect();
            out.push(list);
        }
    }
    out
}

fn dbscan(neighbours: &[Vec<usize>], min_samples: usize) -> Vec<i64> {
    let mut labels: Vec<Option<i64>> = vec![None; neighbours.len()];
    let mut next_label = 0i64;

    for i in 0..neighbours.len() {
        if labels[i].is_some() {
            continue;
        }
        if neighbours[i].len() < min_samples {
            labels[i] = Some(NOISE);
            continue;
        }

        labels[i] = Some(next_label);
        let mut queue: VecDeque<usize> = neighbours[i].iter().copied().collect();
        while let Some(j) = queue.pop_front() {
            match labels[j] {
                // Border point previously marked as noise.
                Some(NOISE) => labels[j] = Some(next_label),
                Some(_) => continue,
                None => {
                    labels[j] = Some(next_label);
                    if neighbours[j].len() >= min_samples {
                        queue.extend(neighbours[j].iter().copied());
                    }
                }
            }
        }
        next_label += 1;
    }

    labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn sv(page_id: i64, chunk_id: i64, v: &[f32]) -> StoredVector {
        StoredVector {
            page_id,
            chunk_id,
            chunk_index: 0,
            vector: Array1::from(v.to_vec()),
        }
    }

    fn params() -> ClusterParams {
        ClusterParams {
            eps: 0.55,
            min_samples: 2,
        }
    }

    #[test]
    fn test_competitor_only_cluster_is_topic_gap() {
        let primary = vec![sv(1, 1, &[1.0, 0.0, 0.0]), sv(1, 2, &[0.95, 0.05, 0.0])];
        let competitor = vec![
            sv(10, 10, &[0.9, 0.1, 0.0]),
            sv(20, 20, &[0.0, 0.0, 1.0]),
            sv(21, 21, &[0.0, 0.1, 0.95]),
        ];
        let result = cluster(&primary, &competitor, params()).unwrap();

        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.labels[&1], 0);
        assert_eq!(result.labels[&10], 0);
        assert_eq!(result.labels[&20], 1);
        assert_eq!(result.topic_gaps.len(), 1);
        assert_eq!(result.topic_gaps[0].competitor_page_ids, vec![20, 21]);
        assert_eq!(result.topic_gaps[0].chunk_ids, vec![20, 21]);
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let primary = vec![sv(1, 1, &[1.0, 0.0])];
        let competitor = vec![sv(10, 10, &[0.0, 1.0])];
        let result = cluster(&primary, &competitor, params()).unwrap();
        assert_eq!(result.labels[&1], NOISE);
        assert_eq!(result.labels[&10], NOISE);
        assert_eq!(result.cluster_count, 0);
        assert!(result.topic_gaps.is_empty());
    }

    #[test]
    fn test_min_samples_one_makes_singletons() {
        let competitor = vec![sv(10, 10, &[0.0, 1.0]), sv(11, 11, &[1.0, 0.0])];
        let result = cluster(
            &[],
            &competitor,
            ClusterParams {
                eps: 0.1,
                min_samples: 1,
            },
        )
        .unwrap();
        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.topic_gaps.len(), 2);
    }

    #[test]
    fn test_labels_deterministic() {
        let competitor: Vec<StoredVector> = (0..20)
            .map(|i| {
                let angle = i as f32 * 0.3;
                sv(i, i, &[angle.cos(), angle.sin()])
            })
            .collect();
        let a = cluster(&[], &competitor, params()).unwrap();
        let b = cluster(&[], &competitor, params()).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.topic_gaps, b.topic_gaps);
    }

    #[test]
    fn test_empty_input() {
        let result = cluster(&[], &[], params()).unwrap();
        assert!(result.labels.is_empty());
        assert_eq!(result.cluster_count, 0);
    }

    #[test]
    fn test_params_from_thresholds() {
        let p = ClusterParams::from_thresholds(&Thresholds::default());
        assert!((p.eps - 0.55).abs() < 1e-6);
        assert_eq!(p.min_samples, 2);
    }
}
