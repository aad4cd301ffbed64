//! Page ingestion: validated pages and chunks → store.

use std::path::Path;

use gapfinder_core::{Error, Result};
use gapfinder_store::{NewPage, SqliteStore};
use tracing::{debug, info, warn};

use crate::types::{IngestReport, RejectedPage};

/// Read a JSON array of pages.
pub fn load_pages(path: &Path) -> Result<Vec<NewPage>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;
    let pages: Vec<NewPage> = serde_json::from_str(&raw)?;
    info!("Loaded {} pages from {}", pages.len(), path.display());
    Ok(pages)
}

/// Writes crawled pages and their chunks into the store.
pub struct PageIngester<'a> {
    store: &'a SqliteStore,
}

impl<'a> PageIngester<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Validate and store one page. Returns the page ID and whether its
    /// chunks were replaced.
    pub fn ingest_page(&self, page: &NewPage) -> Result<(i64, bool)> {
        page.validate()?;
        let (page_id, replaced) = self.store.store_page(page)?;
        debug!(
            "Ingested {} as page {} ({} chunks, replaced={})",
            page.url,
            page_id,
            page.chunks.len(),
            replaced
        );
        Ok((page_id, replaced))
    }

    /// Store every page. Invalid pages are rejected and counted; store
    /// failures abort.
    pub fn ingest_all(&self, pages: &[NewPage]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for page in pages {
            match self.ingest_page(page) {
                Ok((_, replaced)) => {
                    report.pages_ingested += 1;
                    if replaced {
                        report.pages_rechunked += 1;
                    }
                }
                Err(Error::InvalidInput(reason)) => {
                    warn!("Rejected page {}: {}", page.url, reason);
                    report.rejected.push(RejectedPage {
                        url: page.url.clone(),
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Ingest complete: {} pages stored, {} rechunked, {} rejected",
            report.pages_ingested,
            report.pages_rechunked,
            report.rejected.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapfinder_core::SiteRole;
    use gapfinder_store::NewChunk;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("ingest.db")).unwrap();
        (store, dir)
    }

    fn page(url: &str, texts: &[&str]) -> NewPage {
        NewPage {
            url: url.into(),
            site_role: SiteRole::Competitor,
            competitor_id: None,
            word_count: 100,
            title: None,
            description: None,
            h1: None,
            has_schema: false,
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, t)| NewChunk {
                    index: i as i64,
                    token_count: 3,
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_invalid_pages_rejected_and_counted() {
        let (store, _dir) = test_store();
        let pages = vec![
            page("https://rival.example/a", &["one"]),
            page("not-a-url", &["two"]),
            page("https://rival.example/b", &["three", " "]),
        ];
        let report = PageIngester::new(&store).ingest_all(&pages).unwrap();

        assert_eq!(report.pages_ingested, 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].url, "not-a-url");
        assert_eq!(store.count_pages(None).unwrap(), 1);
    }

    #[test]
    fn test_reingest_same_page_keeps_chunks() {
        let (store, _dir) = test_store();
        let ingester = PageIngester::new(&store);
        let p = page("https://rival.example/a", &["one", "two"]);

        let (id, replaced) = ingester.ingest_page(&p).unwrap();
        assert!(replaced);
        let before = store.get_chunks_for_page(id).unwrap();

        let (id2, replaced) = ingester.ingest_page(&p).unwrap();
        assert_eq!(id, id2);
        assert!(!replaced);
        assert_eq!(store.get_chunks_for_page(id).unwrap(), before);
    }

    #[test]
    fn test_load_pages_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"url": "https://mine.example/", "site_role": "primary", "word_count": 10,
                 "chunks": [{{"index": 0, "text": "hello"}}]}}]"#
        )
        .unwrap();
        let pages = load_pages(file.path()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].site_role, SiteRole::Primary);
        assert_eq!(pages[0].chunks[0].text, "hello");
    }
}
