//! Competitor-to-primary page matching by cosine similarity.
//!
//! Vectors are row-normalized into matrices so cosine similarity becomes a
//! dot product. Each competitor chunk takes its best primary chunk; each
//! competitor page takes the best of its chunks.

use std::collections::BTreeMap;

use gapfinder_core::{clamp_similarity, Error, Result};
use gapfinder_store::StoredVector;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Competitor rows scored against the primary matrix per step.
const BLOCK_ROWS: usize = 512;

/// Best primary counterpart for one competitor page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageMatch {
    pub best_primary_page: Option<i64>,
    /// Clamped into [0, 1].
    pub similarity: f32,
}

/// Shared dimensionality of every vector in `sets`, or `None` if all are empty.
pub(crate) fn common_dimension(sets: &[&[StoredVector]]) -> Result<Option<usize>> {
    let mut dim: Option<usize> = None;
    for v in sets.iter().flat_map(|set| set.iter()) {
        match dim {
            None => dim = Some(v.vector.len()),
            Some(d) if d != v.vector.len() => {
                return Err(Error::DataIntegrity(format!(
                    "chunk {} has dimensionality {}, expected {}",
                    v.chunk_id,
                    v.vector.len(),
                    d
                )));
            }
            Some(_) => {}
        }
    }
    Ok(dim)
}

/// Stack vectors into an (N, dim) matrix with unit-length rows.
/// Zero vectors stay zero and score 0 against everything.
pub(crate) fn normalized_matrix<'a>(
    vectors: impl ExactSizeIterator<Item = &'a StoredVector>,
    dim: usize,
) -> Array2<f32> {
    let mut matrix = Array2::zeros((vectors.len(), dim));
    for (i, v) in vectors.enumerate() {
        let mut row = matrix.row_mut(i);
        row.assign(&v.vector);
        let norm = row.dot(&row).sqrt();
        if norm > 1e-9 {
            row /= norm;
        }
    }
    matrix
}

/// Map every embedded competitor page to its most similar primary page.
///
/// Ties at the same maximal similarity go to the lowest primary page id.
/// Competitor pages without vectors are absent from the result. With no
/// primary vectors at all, every competitor page maps to `(None, 0.0)`.
pub fn match_competitor_pages(
    primary: &[StoredVector],
    competitor: &[StoredVector],
) -> Result<BTreeMap<i64, PageMatch>> {
    let mut matches: BTreeMap<i64, PageMatch> = BTreeMap::new();
    let Some(dim) = common_dimension(&[primary, competitor])? else {
        return Ok(matches);
    };

    if primary.is_empty() {
        for v in competitor {
            matches.entry(v.page_id).or_insert(PageMatch {
                best_primary_page: None,
                similarity: 0.0,
            });
        }
        return Ok(matches);
    }

    let primary_matrix = normalized_matrix(primary.iter(), dim);
    let competitor_matrix = normalized_matrix(competitor.iter(), dim);
    let primary_t = primary_matrix.t();

    for start in (0..competitor.len()).step_by(BLOCK_ROWS) {
        let end = (start + BLOCK_ROWS).min(competitor.len());
        let scores = competitor_matrix.slice(s![start..end, ..]).dot(&primary_t);

        for (offset, row) in scores.outer_iter().enumerate() {
            let chunk = &competitor[start + offset];

            let mut best_page = primary[0].page_id;
            let mut best_sim = f32::NEG_INFINITY;
            for (j, &raw) in row.iter().enumerate() {
                let sim = clamp_similarity(raw);
                let page = primary[j].page_id;
                if sim > best_sim || (sim == best_sim && page < best_page) {
                    best_sim = sim;
                    best_page = page;
                }
            }

            let candidate = PageMatch {
                best_primary_page: Some(best_page),
                similarity: best_sim,
            };
            matches
                .entry(chunk.page_id)
                .and_modify(|current| {
                    if better_match(&candidate, current) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    debug!(
        "Matched {} competitor pages against {} primary chunks",
        matches.len(),
        primary.len()
    );
    Ok(matches)
}

fn better_match(candidate: &PageMatch, current: &PageMatch) -> bool {
    if candidate.similarity != current.similarity {
        return candidate.similarity > current.similarity;
    }
    match (candidate.best_primary_page, current.best_primary_page) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        _ => false,
    }
}
