//! SQLite store for crawled pages, their chunks, chunk embeddings and the
//! gap records produced by analysis.
//!
//! Foreign keys are enforced and deletes cascade page → chunk → embedding.
//! Every multi-row write runs in its own transaction so a failing batch rolls
//! back alone. Reads that feed the analysis are ordered by page id then chunk
//! index so downstream tie-breaks are reproducible.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gapfinder_core::{Error, GapDetails, GapRecord, GapType, Priority, Result, SiteRole};
use ndarray::Array1;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, warn};

use crate::schema::{GAPS_SCHEMA_SQL, SCHEMA_SQL};
use crate::types::*;
use crate::vector::{decode_vector, encode_vector};

/// SQLite-backed vector and gap store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteStore {
    /// Open or create the database file at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteStore initialized: {} pages, {} chunks, path={}",
            store.count_pages(None)?,
            store.count_chunks()?,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}", SCHEMA_SQL, GAPS_SCHEMA_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Pages
    // ---------------------------------------------------------------

    /// Insert a page or overwrite the existing row with the same URL.
    /// Returns the page ID.
    pub fn upsert_page(&self, page: &NewPage) -> Result<i64> {
        let conn = self.conn.lock();
        Self::upsert_page_in(&conn, page)
    }

    /// Upsert a page and replace its chunk set in one transaction.
    /// Returns the page ID and whether the chunks changed.
    pub fn store_page(&self, page: &NewPage) -> Result<(i64, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let page_id = Self::upsert_page_in(&tx, page)?;
        let replaced = Self::replace_chunks_in(&tx, page_id, &page.chunks)?;
        tx.commit().map_err(db_err)?;
        Ok((page_id, replaced))
    }

    fn upsert_page_in(conn: &Connection, page: &NewPage) -> Result<i64> {
        let competitor_id = page.resolved_competitor_id();
        let id = conn
            .prepare_cached(
                "INSERT INTO pages (url, site_role, competitor_id, word_count, title, \
                 description, h1, has_schema, crawled_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(url) DO UPDATE SET \
                   site_role = excluded.site_role, \
                   competitor_id = excluded.competitor_id, \
                   word_count = excluded.word_count, \
                   title = excluded.title, \
                   description = excluded.description, \
                   h1 = excluded.h1, \
                   has_schema = excluded.has_schema, \
                   crawled_at = excluded.crawled_at \
                 RETURNING id",
            )
            .map_err(db_err)?
            .query_row(
                params![
                    page.url,
                    page.site_role.as_str(),
                    competitor_id,
                    page.word_count,
                    page.title,
                    page.description,
                    page.h1,
                    page.has_schema,
                    now_millis(),
                ],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(id)
    }

    /// Get a page by ID.
    pub fn get_page(&self, page_id: i64) -> Result<Option<Page>> {
        let conn = self.conn.lock();
        let page = conn
            .prepare_cached("SELECT * FROM pages WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![page_id], Self::row_to_page)
            .optional()
            .map_err(db_err)?;
        Ok(page)
    }

    /// Get a page by URL.
    pub fn get_page_by_url(&self, url: &str) -> Result<Option<Page>> {
        let conn = self.conn.lock();
        let page = conn
            .prepare_cached("SELECT * FROM pages WHERE url = ?1")
            .map_err(db_err)?
            .query_row(params![url], Self::row_to_page)
            .optional()
            .map_err(db_err)?;
        Ok(page)
    }

    /// All pages of one role, ordered by ID.
    pub fn get_pages(&self, role: SiteRole) -> Result<Vec<Page>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM pages WHERE site_role = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![role.as_str()], Self::row_to_page)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Delete a page together with its chunks and embeddings (cascade).
    pub fn delete_page(&self, page_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM pages WHERE id = ?1", params![page_id])
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Count pages, optionally filtered by role.
    pub fn count_pages(&self, role: Option<SiteRole>) -> Result<i64> {
        let conn = self.conn.lock();
        match role {
            Some(r) => conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE site_role = ?1",
                params![r.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0)),
        }
        .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Chunks
    // ---------------------------------------------------------------

    /// Make the page's chunk set equal to `chunks`.
    ///
    /// An identical chunk set is left untouched so existing embeddings
    /// survive a re-crawl. Otherwise the old chunks are deleted (cascading
    /// to their embeddings) and the new ones inserted in one transaction.
    /// Returns `true` if the chunks were replaced.
    pub fn replace_chunks(&self, page_id: i64, chunks: &[NewChunk]) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let replaced = Self::replace_chunks_in(&tx, page_id, chunks)?;
        tx.commit().map_err(db_err)?;
        Ok(replaced)
    }

    fn replace_chunks_in(tx: &Connection, page_id: i64, chunks: &[NewChunk]) -> Result<bool> {
        let existing: Vec<(i64, String)> = {
            let mut stmt = tx
                .prepare_cached(
                    "SELECT chunk_index, text FROM chunks WHERE page_id = ?1 ORDER BY chunk_index",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![page_id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
        };

        let mut incoming: Vec<(i64, &str)> =
            chunks.iter().map(|c| (c.index, c.text.as_str())).collect();
        incoming.sort_by_key(|(index, _)| *index);

        let unchanged = existing.len() == incoming.len()
            && existing
                .iter()
                .zip(incoming.iter())
                .all(|((ei, et), (ni, nt))| ei == ni && et == nt);
        if unchanged {
            return Ok(false);
        }

        tx.execute("DELETE FROM chunks WHERE page_id = ?1", params![page_id])
            .map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO chunks (page_id, chunk_index, token_count, text) \
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| Self::write_err(e, page_id))?;
            for chunk in chunks {
                stmt.execute(params![page_id, chunk.index, chunk.token_count, chunk.text])
                    .map_err(|e| Self::write_err(e, page_id))?;
            }
        }
        debug!("Replaced chunks for page {} ({} chunks)", page_id, chunks.len());
        Ok(true)
    }

    /// All chunks of a page in index order.
    pub fn get_chunks_for_page(&self, page_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM chunks WHERE page_id = ?1 ORDER BY chunk_index")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![page_id], Self::row_to_chunk)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Count all chunks.
    pub fn count_chunks(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Chunks that have no embedding for `model_id` yet, ordered by page
    /// then chunk index.
    pub fn chunks_without_embedding(&self, model_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT c.* FROM chunks c \
                 LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_id = ?1 \
                 WHERE e.id IS NULL \
                 ORDER BY c.page_id, c.chunk_index",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![model_id], Self::row_to_chunk)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Embeddings
    // ---------------------------------------------------------------

    /// Dimensionality already established for `model_id`, if any.
    pub fn model_dimension(&self, model_id: &str) -> Result<Option<usize>> {
        let conn = self.conn.lock();
        Self::dimension_in(&conn, model_id)
    }

    fn dimension_in(conn: &Connection, model_id: &str) -> Result<Option<usize>> {
        let dim: Option<i64> = conn
            .prepare_cached("SELECT dimensionality FROM embeddings WHERE model_id = ?1 LIMIT 1")
            .map_err(db_err)?
            .query_row(params![model_id], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        Ok(dim.map(|d| d as usize))
    }

    /// Upsert one embedding.
    pub fn put(&self, chunk_id: i64, model_id: &str, vector: &[f32]) -> Result<()> {
        self.batch_put(
            model_id,
            &[EmbeddingEntry {
                chunk_id,
                vector: vector.to_vec(),
            }],
        )?;
        Ok(())
    }

    /// Upsert many embeddings in one transaction, all or nothing.
    ///
    /// Every vector must match the model's established dimensionality (or,
    /// for a model with no rows yet, the first vector of the batch).
    /// A mismatch or a missing chunk fails the whole batch with
    /// [`Error::DataIntegrity`] and leaves earlier rows untouched.
    pub fn batch_put(&self, model_id: &str, entries: &[EmbeddingEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let expected = match Self::dimension_in(&tx, model_id)? {
            Some(d) => d,
            None => entries[0].vector.len(),
        };
        if expected == 0 {
            return Err(Error::DataIntegrity(format!(
                "empty vector for chunk {}",
                entries[0].chunk_id
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Err(Error::DataIntegrity(format!(
                "chunk {}: dimensionality {} does not match {} for model {}",
                bad.chunk_id,
                bad.vector.len(),
                expected,
                model_id
            )));
        }

        let now = now_millis();
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO embeddings (chunk_id, model_id, dimensionality, vector, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(chunk_id, model_id) DO UPDATE SET \
                       dimensionality = excluded.dimensionality, \
                       vector = excluded.vector, \
                       created_at = excluded.created_at",
                )
                .map_err(db_err)?;
            for entry in entries {
                stmt.execute(params![
                    entry.chunk_id,
                    model_id,
                    expected as i64,
                    encode_vector(&entry.vector),
                    now,
                ])
                .map_err(|e| Self::write_err(e, entry.chunk_id))?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!("Stored {} embeddings for model {}", entries.len(), model_id);
        Ok(entries.len())
    }

    /// Read back one embedding.
    pub fn get_embedding(&self, chunk_id: i64, model_id: &str) -> Result<Option<Array1<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .prepare_cached("SELECT vector FROM embeddings WHERE chunk_id = ?1 AND model_id = ?2")
            .map_err(db_err)?
            .query_row(params![chunk_id, model_id], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        match blob {
            Some(bytes) => decode_vector(&bytes).map(Some).ok_or_else(|| {
                Error::DataIntegrity(format!("corrupt vector blob for chunk {}", chunk_id))
            }),
            None => Ok(None),
        }
    }

    /// Count embeddings stored for one model.
    pub fn count_embeddings(&self, model_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE model_id = ?1",
            params![model_id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    /// All vectors of one role and model, ordered by page ID then chunk index.
    pub fn get_vectors(&self, role: SiteRole, model_id: &str) -> Result<Vec<StoredVector>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT c.page_id, e.chunk_id, c.chunk_index, e.dimensionality, e.vector \
                 FROM embeddings e \
                 JOIN chunks c ON c.id = e.chunk_id \
                 JOIN pages p ON p.id = c.page_id \
                 WHERE p.site_role = ?1 AND e.model_id = ?2 \
                 ORDER BY c.page_id, c.chunk_index",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![role.as_str(), model_id], |row| {
                let page_id: i64 = row.get(0)?;
                let chunk_id: i64 = row.get(1)?;
                let chunk_index: i64 = row.get(2)?;
                let dim: i64 = row.get(3)?;
                let blob: Vec<u8> = row.get(4)?;
                Ok((page_id, chunk_id, chunk_index, dim, blob))
            })
            .map_err(db_err)?;

        let mut vectors = Vec::new();
        for row in rows {
            let (page_id, chunk_id, chunk_index, dim, blob) = row.map_err(db_err)?;
            match decode_vector(&blob) {
                Some(vector) if vector.len() == dim as usize => vectors.push(StoredVector {
                    page_id,
                    chunk_id,
                    chunk_index,
                    vector,
                }),
                _ => {
                    return Err(Error::DataIntegrity(format!(
                        "corrupt vector blob for chunk {} (model {})",
                        chunk_id, model_id
                    )))
                }
            }
        }
        Ok(vectors)
    }

    /// Delete embeddings of `model_id` whose blob does not decode to its
    /// recorded dimensionality. The affected chunks become pending again.
    /// Returns their chunk IDs.
    pub fn purge_corrupt_embeddings(&self, model_id: &str) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let corrupt: Vec<(i64, i64)> = {
            let mut stmt = tx
                .prepare_cached(
                    "SELECT id, chunk_id, dimensionality, vector FROM embeddings \
                     WHERE model_id = ?1 ORDER BY chunk_id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![model_id], |row| {
                    let id: i64 = row.get(0)?;
                    let chunk_id: i64 = row.get(1)?;
                    let dim: i64 = row.get(2)?;
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((id, chunk_id, dim, blob))
                })
                .map_err(db_err)?;
            let mut corrupt = Vec::new();
            for row in rows {
                let (id, chunk_id, dim, blob) = row.map_err(db_err)?;
                let intact = decode_vector(&blob).is_some_and(|v| v.len() == dim as usize && dim > 0);
                if !intact {
                    corrupt.push((id, chunk_id));
                }
            }
            corrupt
        };
        for (id, chunk_id) in &corrupt {
            warn!("Dropping corrupt vector blob for chunk {} (model {})", chunk_id, model_id);
            tx.execute("DELETE FROM embeddings WHERE id = ?1", params![id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(corrupt.into_iter().map(|(_, chunk_id)| chunk_id).collect())
    }

    // ---------------------------------------------------------------
    // Gaps
    // ---------------------------------------------------------------

    /// Upsert gap records, keeping the worst record per `(gap_type, dedup_key)`.
    /// Returns the number of rows inserted or replaced.
    pub fn write_gaps(&self, records: &[GapRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let written = Self::upsert_gaps(&tx, records)?;
        tx.commit().map_err(db_err)?;
        Ok(written)
    }

    /// Clear the gaps table and write `records` in one transaction.
    pub fn replace_gaps(&self, records: &[GapRecord]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM gaps", []).map_err(db_err)?;
        let written = Self::upsert_gaps(&tx, records)?;
        tx.commit().map_err(db_err)?;
        Ok(written)
    }

    fn upsert_gaps(tx: &Transaction<'_>, records: &[GapRecord]) -> Result<usize> {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO gaps (gap_type, dedup_key, primary_url, competitor_url, \
                 similarity_score, priority, priority_rank, magnitude, details_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(gap_type, dedup_key) DO UPDATE SET \
                   primary_url = excluded.primary_url, \
                   competitor_url = excluded.competitor_url, \
                   similarity_score = excluded.similarity_score, \
                   priority = excluded.priority, \
                   priority_rank = excluded.priority_rank, \
                   magnitude = excluded.magnitude, \
                   details_json = excluded.details_json, \
                   created_at = excluded.created_at \
                 WHERE excluded.priority_rank > gaps.priority_rank \
                    OR (excluded.priority_rank = gaps.priority_rank \
                        AND excluded.magnitude > gaps.magnitude) \
                    OR (excluded.priority_rank = gaps.priority_rank \
                        AND excluded.magnitude = gaps.magnitude \
                        AND excluded.competitor_url < gaps.competitor_url)",
            )
            .map_err(db_err)?;

        let now = now_millis();
        let mut written = 0;
        for record in records {
            let details = serde_json::to_string(&record.details)?;
            written += stmt
                .execute(params![
                    record.gap_type.as_str(),
                    record.dedup_key(),
                    record.primary_url,
                    record.competitor_url,
                    record.similarity_score as f64,
                    record.priority.as_str(),
                    record.priority.rank(),
                    record.magnitude(),
                    details,
                    now,
                ])
                .map_err(db_err)?;
        }
        Ok(written)
    }

    /// All stored gaps ordered by type then dedup key.
    pub fn get_gaps(&self) -> Result<Vec<GapRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT gap_type, primary_url, competitor_url, similarity_score, priority, \
                 details_json FROM gaps ORDER BY gap_type, dedup_key",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let gap_type: String = row.get(0)?;
                let primary_url: Option<String> = row.get(1)?;
                let competitor_url: String = row.get(2)?;
                let similarity: f64 = row.get(3)?;
                let priority: String = row.get(4)?;
                let details: String = row.get(5)?;
                Ok((gap_type, primary_url, competitor_url, similarity, priority, details))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (gap_type, primary_url, competitor_url, similarity, priority, details) =
                row.map_err(db_err)?;
            let details: GapDetails = serde_json::from_str(&details).map_err(|e| {
                Error::DataIntegrity(format!("bad gap details for {}: {}", competitor_url, e))
            })?;
            records.push(GapRecord {
                gap_type: gap_type.parse::<GapType>()?,
                primary_url,
                competitor_url,
                similarity_score: similarity as f32,
                priority: priority.parse::<Priority>()?,
                details,
            });
        }
        Ok(records)
    }

    /// Count stored gaps.
    pub fn count_gaps(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM gaps", [], |row| row.get(0))
            .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Get store statistics.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let primary_pages = self.count_pages(Some(SiteRole::Primary))?;
        let competitor_pages = self.count_pages(Some(SiteRole::Competitor))?;
        let total_chunks = self.count_chunks()?;
        let total_gaps = self.count_gaps()?;

        let embeddings_by_model = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare_cached(
                    "SELECT model_id, COUNT(*) FROM embeddings GROUP BY model_id ORDER BY model_id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
                .map_err(db_err)?
        };

        let db_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            primary_pages,
            competitor_pages,
            total_chunks,
            embeddings_by_model,
            total_gaps,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn write_err(e: rusqlite::Error, id: i64) -> Error {
        let msg = e.to_string();
        if msg.contains("FOREIGN KEY constraint") {
            Error::DataIntegrity(format!("referenced row {} does not exist", id))
        } else {
            Error::Database(msg)
        }
    }

    fn row_to_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
        let role: String = row.get("site_role")?;
        let site_role = role.parse::<SiteRole>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Page {
            id: row.get("id")?,
            url: row.get("url")?,
            site_role,
            competitor_id: row.get("competitor_id")?,
            word_count: row.get("word_count")?,
            title: row.get("title")?,
            description: row.get("description")?,
            h1: row.get("h1")?,
            has_schema: row.get("has_schema")?,
            crawled_at: row.get("crawled_at")?,
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        Ok(Chunk {
            id: row.get("id")?,
            page_id: row.get("page_id")?,
            chunk_index: row.get("chunk_index")?,
            token_count: row.get("token_count")?,
            text: row.get("text")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MODEL: &str = "test-model";

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("gaps.db")).unwrap();
        (store, dir)
    }

    fn new_page(url: &str, role: SiteRole, chunks: &[&str]) -> NewPage {
        NewPage {
            url: url.into(),
            site_role: role,
            competitor_id: None,
            word_count: 500,
            title: Some("Title".into()),
            description: None,
            h1: None,
            has_schema: false,
            chunks: chunks
                .iter()
                .enumerate()
                .map(|(i, t)| NewChunk {
                    index: i as i64,
                    token_count: 5,
                    text: t.to_string(),
                })
                .collect(),
        }
    }

    fn add_page(store: &SqliteStore, url: &str, role: SiteRole, chunks: &[&str]) -> i64 {
        let page = new_page(url, role, chunks);
        let id = store.upsert_page(&page).unwrap();
        store.replace_chunks(id, &page.chunks).unwrap();
        id
    }

    fn gap(gap_type: GapType, primary: Option<&str>, competitor: &str, priority: Priority, sim: f32) -> GapRecord {
        let details = match gap_type {
            GapType::MissingContent => GapDetails::MissingContent {
                closest_match_url: None,
                unembedded: false,
            },
            GapType::SchemaGap => GapDetails::SchemaGap {},
            GapType::MetadataGap => GapDetails::MetadataGap {
                missing_elements: vec![gapfinder_core::MetadataElement::H1],
            },
            GapType::ThinContent => GapDetails::ThinContent {
                primary_word_count: 100,
                competitor_word_count: 400,
                ratio: 4.0,
                word_difference: 300,
            },
        };
        GapRecord {
            gap_type,
            primary_url: primary.map(str::to_string),
            competitor_url: competitor.into(),
            similarity_score: sim,
            priority,
            details,
        }
    }

    #[test]
    fn test_upsert_page_overwrites_by_url() {
        let (store, _dir) = test_store();
        let mut page = new_page("https://mine.example/a", SiteRole::Primary, &["one"]);
        let id = store.upsert_page(&page).unwrap();

        page.title = Some("New title".into());
        page.word_count = 900;
        let id2 = store.upsert_page(&page).unwrap();
        assert_eq!(id, id2);

        let stored = store.get_page(id).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("New title"));
        assert_eq!(stored.word_count, 900);
        assert_eq!(store.count_pages(None).unwrap(), 1);
    }

    #[test]
    fn test_competitor_id_recorded() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://rival.example/x", SiteRole::Competitor, &["a"]);
        let page = store.get_page(id).unwrap().unwrap();
        assert_eq!(page.competitor_id.as_deref(), Some("rival.example"));
        assert_eq!(page.site_role, SiteRole::Competitor);
    }

    #[test]
    fn test_replace_chunks_keeps_identical_set() {
        let (store, _dir) = test_store();
        let page = new_page("https://mine.example/a", SiteRole::Primary, &["one", "two"]);
        let id = store.upsert_page(&page).unwrap();
        assert!(store.replace_chunks(id, &page.chunks).unwrap());

        let chunks = store.get_chunks_for_page(id).unwrap();
        store.put(chunks[0].id, MODEL, &[1.0, 0.0]).unwrap();

        assert!(!store.replace_chunks(id, &page.chunks).unwrap());
        assert_eq!(store.count_embeddings(MODEL).unwrap(), 1);

        let changed = new_page("https://mine.example/a", SiteRole::Primary, &["one", "three"]);
        assert!(store.replace_chunks(id, &changed.chunks).unwrap());
        assert_eq!(store.count_embeddings(MODEL).unwrap(), 0);
        let texts: Vec<String> = store
            .get_chunks_for_page(id)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["one", "three"]);
    }

    #[test]
    fn test_delete_page_cascades() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["one", "two"]);
        let chunk_ids: Vec<i64> = store
            .get_chunks_for_page(id)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        store.put(chunk_ids[0], MODEL, &[0.5, 0.5]).unwrap();

        assert!(store.delete_page(id).unwrap());
        assert_eq!(store.count_chunks().unwrap(), 0);
        assert_eq!(store.count_embeddings(MODEL).unwrap(), 0);
        assert!(store.get_page(id).unwrap().is_none());
    }

    #[test]
    fn test_vector_roundtrip() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["one"]);
        let chunk = &store.get_chunks_for_page(id).unwrap()[0];

        let original = vec![0.123_456_7f32, -0.987_654_3, 0.0, 42.5];
        store.put(chunk.id, MODEL, &original).unwrap();

        let loaded = store.get_embedding(chunk.id, MODEL).unwrap().unwrap();
        for (a, b) in original.iter().zip(loaded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(store.get_embedding(chunk.id, "other-model").unwrap().is_none());
    }

    #[test]
    fn test_dimension_mismatch_rejected_without_corruption() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["one", "two", "three"]);
        let chunks = store.get_chunks_for_page(id).unwrap();

        store.put(chunks[0].id, MODEL, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(store.model_dimension(MODEL).unwrap(), Some(3));

        let result = store.batch_put(
            MODEL,
            &[
                EmbeddingEntry {
                    chunk_id: chunks[1].id,
                    vector: vec![1.0, 2.0, 3.0],
                },
                EmbeddingEntry {
                    chunk_id: chunks[2].id,
                    vector: vec![1.0, 2.0],
                },
            ],
        );
        assert!(matches!(result, Err(Error::DataIntegrity(_))));

        // Whole batch rolled back; the earlier row is intact.
        assert_eq!(store.count_embeddings(MODEL).unwrap(), 1);
        let kept = store.get_embedding(chunks[0].id, MODEL).unwrap().unwrap();
        assert_eq!(kept.to_vec(), vec![1.0, 2.0, 3.0]);

        // A different model may use a different dimensionality.
        store.put(chunks[1].id, "small-model", &[1.0]).unwrap();
        assert_eq!(store.model_dimension("small-model").unwrap(), Some(1));
    }

    #[test]
    fn test_missing_chunk_is_integrity_error() {
        let (store, _dir) = test_store();
        let result = store.put(9999, MODEL, &[1.0, 2.0]);
        assert!(matches!(result, Err(Error::DataIntegrity(_))));
    }

    #[test]
    fn test_chunks_without_embedding_is_per_model() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["one", "two"]);
        let chunks = store.get_chunks_for_page(id).unwrap();
        store.put(chunks[0].id, MODEL, &[1.0]).unwrap();

        let pending = store.chunks_without_embedding(MODEL).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, chunks[1].id);
        assert_eq!(store.chunks_without_embedding("other").unwrap().len(), 2);
    }

    #[test]
    fn test_get_vectors_ordered_by_page_then_chunk() {
        let (store, _dir) = test_store();
        let p1 = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["a0", "a1"]);
        let p2 = add_page(&store, "https://mine.example/b", SiteRole::Primary, &["b0"]);
        let c1 = add_page(&store, "https://rival.example/a", SiteRole::Competitor, &["c0"]);

        let mut entries = Vec::new();
        for page_id in [p2, c1, p1] {
            for chunk in store.get_chunks_for_page(page_id).unwrap().iter().rev() {
                entries.push(EmbeddingEntry {
                    chunk_id: chunk.id,
                    vector: vec![chunk.id as f32, 1.0],
                });
            }
        }
        store.batch_put(MODEL, &entries).unwrap();

        let primary = store.get_vectors(SiteRole::Primary, MODEL).unwrap();
        let order: Vec<(i64, i64)> = primary.iter().map(|v| (v.page_id, v.chunk_index)).collect();
        assert_eq!(order, vec![(p1, 0), (p1, 1), (p2, 0)]);

        let competitor = store.get_vectors(SiteRole::Competitor, MODEL).unwrap();
        assert_eq!(competitor.len(), 1);
        assert_eq!(competitor[0].page_id, c1);
        assert!(store.get_vectors(SiteRole::Primary, "other").unwrap().is_empty());
    }

    #[test]
    fn test_write_gaps_keeps_worst_per_key() {
        let (store, _dir) = test_store();
        let p = Some("https://mine.example/a");

        store
            .write_gaps(&[gap(GapType::SchemaGap, p, "https://rival.example/1", Priority::Low, 0.46)])
            .unwrap();
        // Worse record replaces.
        store
            .write_gaps(&[gap(GapType::SchemaGap, p, "https://rival.example/2", Priority::High, 0.8)])
            .unwrap();
        // Weaker record is dropped.
        let written = store
            .write_gaps(&[gap(GapType::SchemaGap, p, "https://rival.example/3", Priority::Medium, 0.6)])
            .unwrap();
        assert_eq!(written, 0);

        let gaps = store.get_gaps().unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].competitor_url, "https://rival.example/2");
        assert_eq!(gaps[0].priority, Priority::High);
    }

    #[test]
    fn test_missing_content_dedups_by_competitor_url() {
        let (store, _dir) = test_store();
        store
            .write_gaps(&[
                gap(GapType::MissingContent, None, "https://rival.example/1", Priority::High, 0.1),
                gap(GapType::MissingContent, None, "https://rival.example/2", Priority::Medium, 0.3),
                gap(GapType::MissingContent, None, "https://rival.example/1", Priority::High, 0.15),
            ])
            .unwrap();

        let gaps = store.get_gaps().unwrap();
        assert_eq!(gaps.len(), 2);
        let first = gaps
            .iter()
            .find(|g| g.competitor_url == "https://rival.example/1")
            .unwrap();
        assert!((first.similarity_score - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_replace_gaps_clears_previous_run() {
        let (store, _dir) = test_store();
        store
            .write_gaps(&[gap(GapType::MissingContent, None, "https://rival.example/old", Priority::High, 0.1)])
            .unwrap();
        store
            .replace_gaps(&[gap(GapType::MissingContent, None, "https://rival.example/new", Priority::Low, 0.4)])
            .unwrap();

        let gaps = store.get_gaps().unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].competitor_url, "https://rival.example/new");
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();
        let p = add_page(&store, "https://mine.example/a", SiteRole::Primary, &["one", "two"]);
        add_page(&store, "https://rival.example/a", SiteRole::Competitor, &["x"]);
        let chunk = &store.get_chunks_for_page(p).unwrap()[0];
        store.put(chunk.id, MODEL, &[1.0, 2.0]).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.primary_pages, 1);
        assert_eq!(stats.competitor_pages, 1);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.embeddings_by_model.get(MODEL), Some(&1));
        assert_eq!(stats.total_gaps, 0);
    }

    #[test]
    fn test_corrupt_blob_is_reported_then_purged() {
        let (store, _dir) = test_store();
        let id = add_page(&store, "https://rival.example/x", SiteRole::Competitor, &["a", "b"]);
        let chunks = store.get_chunks_for_page(id).unwrap();
        store.put(chunks[0].id, MODEL, &[1.0, 0.0]).unwrap();
        store.put(chunks[1].id, MODEL, &[0.0, 1.0]).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE embeddings SET vector = X'0000' WHERE chunk_id = ?1",
                params![chunks[1].id],
            )
            .unwrap();

        assert!(matches!(
            store.get_vectors(SiteRole::Competitor, MODEL),
            Err(Error::DataIntegrity(_))
        ));

        let purged = store.purge_corrupt_embeddings(MODEL).unwrap();
        assert_eq!(purged, vec![chunks[1].id]);
        let pending = store.chunks_without_embedding(MODEL).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, chunks[1].id);

        let vectors = store.get_vectors(SiteRole::Competitor, MODEL).unwrap();
        assert_eq!(vectors.len(), 1);
        assert!(store.purge_corrupt_embeddings(MODEL).unwrap().is_empty());
    }

    #[test]
    fn test_store_page_writes_page_and_chunks_together() {
        let (store, _dir) = test_store();
        let mut page = new_page("https://mine.example/a", SiteRole::Primary, &["one", "two"]);
        let (id, replaced) = store.store_page(&page).unwrap();
        assert!(replaced);
        assert_eq!(store.get_chunks_for_page(id).unwrap().len(), 2);

        // A rejected chunk set rolls the metadata update back with it.
        page.title = Some("Changed".into());
        page.chunks.push(NewChunk {
            index: 0,
            token_count: 1,
            text: "duplicate index".into(),
        });
        assert!(store.store_page(&page).is_err());
        let stored = store.get_page(id).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Title"));
        assert_eq!(store.get_chunks_for_page(id).unwrap().len(), 2);
    }
}
