//! Gap classification of competitor pages against their matched primary page.
//!
//! A competitor page whose best similarity is below the threshold (or that
//! has no primary counterpart) is missing content, and nothing else is
//! checked for it. Otherwise the matched pair is checked for thin content,
//! metadata parity and structured data.

use std::collections::{BTreeMap, HashMap};

use gapfinder_core::{
    GapDetails, GapRecord, GapType, MetadataElement, Priority, Thresholds,
};
use gapfinder_store::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::similarity::PageMatch;

/// Detector output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    /// Deduplicated gaps ordered by gap type then dedup key.
    pub gaps: Vec<GapRecord>,
    /// Competitor pages with no embedded chunks.
    pub insufficient_data: Vec<String>,
    /// Competitor pages that were classified.
    pub pages_classified: usize,
}

pub fn missing_priority(similarity: f32) -> Priority {
    if similarity < 0.2 {
        Priority::High
    } else if similarity < 0.35 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub fn thin_priority(ratio: f64) -> Priority {
    if ratio > 5.0 {
        Priority::High
    } else if ratio > 4.0 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub fn metadata_priority(missing: &[MetadataElement]) -> Priority {
    if missing.contains(&MetadataElement::Title) || missing.len() >= 2 {
        Priority::High
    } else {
        Priority::Medium
    }
}

pub fn schema_priority(similarity: f32) -> Priority {
    if similarity > 0.7 {
        Priority::High
    } else if similarity > 0.5 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub struct GapDetector {
    thresholds: Thresholds,
}

impl GapDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Classify every competitor page. Pure: the same inputs always give
    /// the same output.
    pub fn detect(
        &self,
        primary_pages: &[Page],
        competitor_pages: &[Page],
        matches: &BTreeMap<i64, PageMatch>,
    ) -> Detection {
        let primary_by_id: HashMap<i64, &Page> =
            primary_pages.iter().map(|p| (p.id, p)).collect();
        let mut competitors: Vec<&Page> = competitor_pages.iter().collect();
        competitors.sort_by_key(|p| p.id);

        let mut kept: BTreeMap<(GapType, String), GapRecord> = BTreeMap::new();
        let mut insufficient_data = Vec::new();
        let mut pages_classified = 0;

        for competitor in competitors {
            let Some(m) = matches.get(&competitor.id) else {
                insufficient_data.push(competitor.url.clone());
                if self.thresholds.treat_unembedded_as_missing {
                    keep_worst(&mut kept, unembedded_record(competitor));
                }
                continue;
            };
            pages_classified += 1;

            let primary = m.best_primary_page.and_then(|id| primary_by_id.get(&id).copied());
            for record in self.classify(competitor, primary, m.similarity) {
                keep_worst(&mut kept, record);
            }
        }

        let gaps: Vec<GapRecord> = kept.into_values().collect();
        info!(
            "Gap detection: {} gaps from {} competitor pages ({} without embeddings)",
            gaps.len(),
            pages_classified,
            insufficient_data.len()
        );

        Detection {
            gaps,
            insufficient_data,
            pages_classified,
        }
    }

    fn classify(&self, competitor: &Page, primary: Option<&Page>, similarity: f32) -> Vec<GapRecord> {
        let primary = match primary {
            Some(p) if similarity >= self.thresholds.similarity_threshold => p,
            closest => {
                return vec![GapRecord {
                    gap_type: GapType::MissingContent,
                    primary_url: None,
                    competitor_url: competitor.url.clone(),
                    similarity_score: similarity,
                    priority: missing_priority(similarity),
                    details: GapDetails::MissingContent {
                        closest_match_url: closest.map(|p| p.url.clone()),
                        unembedded: false,
                    },
                }];
            }
        };

        let mut records = Vec::new();
        let pair = |gap_type, priority, details| GapRecord {
            gap_type,
            primary_url: Some(primary.url.clone()),
            competitor_url: competitor.url.clone(),
            similarity_score: similarity,
            priority,
            details,
        };

        if primary.word_count > 0 {
            let ratio = competitor.word_count as f64 / primary.word_count as f64;
            if ratio >= self.thresholds.thin_ratio {
                records.push(pair(
                    GapType::ThinContent,
                    thin_priority(ratio),
                    GapDetails::ThinContent {
                        primary_word_count: primary.word_count,
                        competitor_word_count: competitor.word_count,
                        ratio,
                        word_difference: competitor.word_count - primary.word_count,
                    },
                ));
            }
        }

        let mut missing = Vec::new();
        if competitor.has_title() && !primary.has_title() {
            missing.push(MetadataElement::Title);
        }
        if competitor.has_description() && !primary.has_description() {
            missing.push(MetadataElement::Description);
        }
        if competitor.has_h1() && !primary.has_h1() {
            missing.push(MetadataElement::H1);
        }
        if !missing.is_empty() {
            records.push(pair(
                GapType::MetadataGap,
                metadata_priority(&missing),
                GapDetails::MetadataGap {
                    missing_elements: missing,
                },
            ));
        }

        if competitor.has_schema && !primary.has_schema {
            records.push(pair(
                GapType::SchemaGap,
                schema_priority(similarity),
                GapDetails::SchemaGap {},
            ));
        }

        records
    }
}

fn unembedded_record(competitor: &Page) -> GapRecord {
    GapRecord {
        gap_type: GapType::MissingContent,
        primary_url: None,
        competitor_url: competitor.url.clone(),
        similarity_score: 0.0,
        priority: Priority::High,
        details: GapDetails::MissingContent {
            closest_match_url: None,
            unembedded: true,
        },
    }
}

fn keep_worst(kept: &mut BTreeMap<(GapType, String), GapRecord>, record: GapRecord) {
    let key = (record.gap_type, record.dedup_key().to_string());
    match kept.get(&key) {
        Some(existing) if !record.is_worse_than(existing) => {
            debug!("Dropping duplicate {} gap for {}", key.0, key.1);
        }
        _ => {
            kept.insert(key, record);
        }
    }
}
