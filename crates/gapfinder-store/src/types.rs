//! Row types for pages, chunks and embeddings.

use std::collections::BTreeMap;

use gapfinder_core::{Error, Result, SiteRole};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A page row from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub url: String,
    pub site_role: SiteRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitor_id: Option<String>,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h1: Option<String>,
    pub has_schema: bool,
    pub crawled_at: i64,
}

impl Page {
    pub fn has_title(&self) -> bool {
        non_blank(&self.title)
    }

    pub fn has_description(&self) -> bool {
        non_blank(&self.description)
    }

    pub fn has_h1(&self) -> bool {
        non_blank(&self.h1)
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// A chunk row from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub page_id: i64,
    pub chunk_index: i64,
    pub token_count: i64,
    pub text: String,
}

/// Chunk as handed over by the processing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChunk {
    pub index: i64,
    #[serde(default)]
    pub token_count: i64,
    pub text: String,
}

/// Page as handed over by the crawl/processing stage, with its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPage {
    pub url: String,
    pub site_role: SiteRole,
    #[serde(default)]
    pub competitor_id: Option<String>,
    #[serde(default)]
    pub word_count: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub h1: Option<String>,
    #[serde(default)]
    pub has_schema: bool,
    #[serde(default)]
    pub chunks: Vec<NewChunk>,
}

impl NewPage {
    /// Validate URL, word count and chunk text.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "URL must start with http:// or https://: {}",
                self.url
            )));
        }
        if self.word_count < 0 {
            return Err(Error::InvalidInput(format!(
                "negative word count for {}",
                self.url
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for chunk in &self.chunks {
            if chunk.text.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "empty chunk {} on {}",
                    chunk.index, self.url
                )));
            }
            if !seen.insert(chunk.index) {
                return Err(Error::InvalidInput(format!(
                    "duplicate chunk index {} on {}",
                    chunk.index, self.url
                )));
            }
        }
        Ok(())
    }

    /// Competitor identifier, defaulting to the URL host for competitor pages.
    pub fn resolved_competitor_id(&self) -> Option<String> {
        match self.site_role {
            SiteRole::Primary => None,
            SiteRole::Competitor => self
                .competitor_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .or_else(|| url_host(&self.url).map(str::to_string)),
        }
    }
}

/// Host portion of an http(s) URL.
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// One embedding to store.
#[derive(Debug, Clone)]
pub struct EmbeddingEntry {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
}

/// An embedding read back for analysis, ordered by page then chunk index.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub page_id: i64,
    pub chunk_id: i64,
    pub chunk_index: i64,
    pub vector: Array1<f32>,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub primary_pages: i64,
    pub competitor_pages: i64,
    pub total_chunks: i64,
    /// Embedding count per model id.
    pub embeddings_by_model: BTreeMap<String, i64>,
    pub total_gaps: i64,
    pub db_path: String,
    pub db_size_mb: f64,
}
