//! Site roles and gap records shared across the workspace.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which side of the comparison a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteRole {
    Primary,
    Competitor,
}

impl SiteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Competitor => "competitor",
        }
    }
}

impl fmt::Display for SiteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "competitor" => Ok(Self::Competitor),
            other => Err(Error::InvalidInput(format!("unknown site role: {}", other))),
        }
    }
}

/// Kind of content gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    MissingContent,
    ThinContent,
    MetadataGap,
    SchemaGap,
}

impl GapType {
    pub fn all() -> &'static [GapType] {
        &[
            Self::MissingContent,
            Self::ThinContent,
            Self::MetadataGap,
            Self::SchemaGap,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingContent => "missing_content",
            Self::ThinContent => "thin_content",
            Self::MetadataGap => "metadata_gap",
            Self::SchemaGap => "schema_gap",
        }
    }

    /// Metadata and schema fixes are cheap to implement.
    pub fn is_low_effort(&self) -> bool {
        matches!(self, Self::MetadataGap | Self::SchemaGap)
    }
}

impl fmt::Display for GapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GapType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown gap type: {}", s)))
    }
}

/// Priority tier. Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Numeric rank persisted alongside gap rows (low=1, medium=2, high=3).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

/// On-page metadata element checked for parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataElement {
    Title,
    Description,
    H1,
}

/// Type-specific payload of a gap record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapDetails {
    MissingContent {
        /// Nearest primary page, even though it is not close enough.
        #[serde(skip_serializing_if = "Option::is_none")]
        closest_match_url: Option<String>,
        /// Set when the competitor page had no usable embeddings.
        #[serde(default)]
        unembedded: bool,
    },
    ThinContent {
        primary_word_count: i64,
        competitor_word_count: i64,
        ratio: f64,
        word_difference: i64,
    },
    MetadataGap {
        missing_elements: Vec<MetadataElement>,
    },
    SchemaGap {},
}

/// A single detected gap, keyed by URL rather than by live page reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    pub gap_type: GapType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_url: Option<String>,
    pub competitor_url: String,
    /// Cosine similarity clamped into [0, 1].
    pub similarity_score: f32,
    pub priority: Priority,
    pub details: GapDetails,
}

impl GapRecord {
    /// Deduplication key: the primary URL, or the competitor URL when there
    /// is no primary counterpart.
    pub fn dedup_key(&self) -> &str {
        self.primary_url.as_deref().unwrap_or(&self.competitor_url)
    }

    /// Type-specific size of the gap; larger is worse.
    pub fn magnitude(&self) -> f64 {
        match &self.details {
            GapDetails::MissingContent { .. } => 1.0 - self.similarity_score as f64,
            GapDetails::ThinContent { ratio, .. } => *ratio,
            GapDetails::MetadataGap { missing_elements } => missing_elements.len() as f64,
            GapDetails::SchemaGap {} => self.similarity_score as f64,
        }
    }

    /// Compare severity: priority first, then magnitude, then the lexically
    /// smaller competitor URL wins so the outcome is order-independent.
    pub fn severity_cmp(&self, other: &GapRecord) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| {
                self.magnitude()
                    .partial_cmp(&other.magnitude())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| other.competitor_url.cmp(&self.competitor_url))
    }

    /// Whether `self` should replace `other` under the keep-worst rule.
    pub fn is_worse_than(&self, other: &GapRecord) -> bool {
        self.severity_cmp(other) == Ordering::Greater
    }
}

/// Clamp a raw cosine value into [0, 1].
pub fn clamp_similarity(raw: f32) -> f32 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}
