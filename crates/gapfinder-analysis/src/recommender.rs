//! Impact ranking, action plan and quick wins.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use gapfinder_core::{
    GapDetails, GapRecord, GapType, MetadataElement, Priority, RankingConfig, Thresholds,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreatePage,
    ExpandContent,
    FixMetadata,
    AddSchema,
}

impl ActionKind {
    pub fn for_gap(gap_type: GapType) -> Self {
        match gap_type {
            GapType::MissingContent => Self::CreatePage,
            GapType::ThinContent => Self::ExpandContent,
            GapType::MetadataGap => Self::FixMetadata,
            GapType::SchemaGap => Self::AddSchema,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    #[default]
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn for_gap_count(total: usize) -> Self {
        if total > 50 {
            Self::High
        } else if total > 20 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One entry of the action plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedGap {
    /// 1-based position in the plan.
    pub rank: usize,
    pub impact_score: f64,
    pub action: ActionKind,
    pub description: String,
    /// Low-effort gap at medium priority or above. Set on every such entry;
    /// only the `quick_win_limit` cap applies to `Recommendations::quick_wins`.
    pub quick_win: bool,
    pub gap: GapRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub total_gaps: usize,
    pub by_type: BTreeMap<GapType, usize>,
    pub high_priority: usize,
    pub quick_wins: usize,
    pub estimated_effort: Effort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub actions: Vec<RankedGap>,
    pub quick_wins: Vec<RankedGap>,
    pub summary: RecommendationSummary,
}

fn type_weight(gap_type: GapType) -> f64 {
    match gap_type {
        GapType::MissingContent => 4.0,
        GapType::ThinContent => 3.0,
        GapType::MetadataGap | GapType::SchemaGap => 2.0,
    }
}

fn priority_weight(priority: Priority) -> f64 {
    priority.rank() as f64
}

pub struct Recommender {
    thin_ratio: f64,
    quick_win_limit: Option<usize>,
}

impl Recommender {
    pub fn new(thresholds: &Thresholds, ranking: &RankingConfig) -> Self {
        Self {
            thin_ratio: thresholds.thin_ratio,
            quick_win_limit: ranking.quick_win_limit,
        }
    }

    /// Type weight + priority weight + a type-specific magnitude term.
    pub fn impact_score(&self, gap: &GapRecord) -> f64 {
        let magnitude = match &gap.details {
            GapDetails::MissingContent { .. } => 2.0 * (1.0 - gap.similarity_score as f64),
            GapDetails::ThinContent { ratio, .. } => (ratio / self.thin_ratio).min(2.0),
            GapDetails::MetadataGap { missing_elements } => missing_elements.len() as f64,
            GapDetails::SchemaGap {} => 0.0,
        };
        type_weight(gap.gap_type) + priority_weight(gap.priority) + magnitude
    }

    /// Order gaps by impact and derive quick wins and the summary.
    pub fn rank(&self, gaps: Vec<GapRecord>) -> Recommendations {
        let mut scored: Vec<(f64, GapRecord)> = gaps
            .into_iter()
            .map(|g| (self.impact_score(&g), g))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    type_weight(b.gap_type)
                        .partial_cmp(&type_weight(a.gap_type))
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.dedup_key().cmp(b.dedup_key()))
                .then_with(|| a.gap_type.cmp(&b.gap_type))
        });

        let actions: Vec<RankedGap> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (impact_score, gap))| {
                let quick_win = gap.gap_type.is_low_effort() && gap.priority >= Priority::Medium;
                RankedGap {
                    rank: i + 1,
                    impact_score,
                    action: ActionKind::for_gap(gap.gap_type),
                    description: describe(&gap),
                    quick_win,
                    gap,
                }
            })
            .collect();

        let limit = self.quick_win_limit.unwrap_or(usize::MAX);
        let quick_wins: Vec<RankedGap> = actions
            .iter()
            .filter(|a| a.quick_win)
            .take(limit)
            .cloned()
            .collect();

        let mut by_type: BTreeMap<GapType, usize> =
            GapType::all().iter().map(|t| (*t, 0)).collect();
        for a in &actions {
            *by_type.entry(a.gap.gap_type).or_default() += 1;
        }
        let summary = RecommendationSummary {
            total_gaps: actions.len(),
            by_type,
            high_priority: actions.iter().filter(|a| a.gap.priority == Priority::High).count(),
            quick_wins: quick_wins.len(),
            estimated_effort: Effort::for_gap_count(actions.len()),
        };

        info!(
            "Ranked {} gaps ({} high priority, {} quick wins)",
            summary.total_gaps, summary.high_priority, summary.quick_wins
        );

        Recommendations {
            actions,
            quick_wins,
            summary,
        }
    }
}

fn describe(gap: &GapRecord) -> String {
    let target = gap.primary_url.as_deref().unwrap_or(&gap.competitor_url);
    match &gap.details {
        GapDetails::MissingContent {
            unembedded: true, ..
        } => format!(
            "Review {}: no comparable content could be embedded",
            gap.competitor_url
        ),
        GapDetails::MissingContent {
            closest_match_url, ..
        } => {
            let mut text = format!(
                "Create content covering {} ({:.1}% similar to anything on the site)",
                gap.competitor_url,
                gap.similarity_score * 100.0
            );
            if let Some(closest) = closest_match_url {
                text.push_str(&format!("; closest existing page is {}", closest));
            }
            text
        }
        GapDetails::ThinContent {
            primary_word_count,
            competitor_word_count,
            ..
        } => format!(
            "Expand {} from {} to ~{} words",
            target, primary_word_count, competitor_word_count
        ),
        GapDetails::MetadataGap { missing_elements } => {
            let names: Vec<&str> = missing_elements
                .iter()
                .map(|e| match e {
                    MetadataElement::Title => "title",
                    MetadataElement::Description => "meta description",
                    MetadataElement::H1 => "H1",
                })
                .collect();
            format!("Add missing {} to {}", names.join(", "), target)
        }
        GapDetails::SchemaGap {} => format!("Implement structured data on {}", target),
    }
}
