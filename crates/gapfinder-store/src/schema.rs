//! Database schema SQL.

/// Core tables: pages, chunks, embeddings.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    site_role TEXT NOT NULL CHECK (site_role IN ('primary', 'competitor')),
    competitor_id TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    title TEXT,
    description TEXT,
    h1 TEXT,
    has_schema INTEGER NOT NULL DEFAULT 0,
    crawled_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    text TEXT NOT NULL,
    UNIQUE (page_id, chunk_index)
);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    model_id TEXT NOT NULL,
    dimensionality INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (chunk_id, model_id)
);

CREATE INDEX IF NOT EXISTS idx_pages_role ON pages(site_role);
CREATE INDEX IF NOT EXISTS idx_chunks_page_id ON chunks(page_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_id);
"#;

/// Gap records. `dedup_key` is the primary URL, or the competitor URL when a
/// record has no primary counterpart.
pub const GAPS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS gaps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    gap_type TEXT NOT NULL,
    dedup_key TEXT NOT NULL,
    primary_url TEXT,
    competitor_url TEXT NOT NULL,
    similarity_score REAL NOT NULL,
    priority TEXT NOT NULL,
    priority_rank INTEGER NOT NULL,
    magnitude REAL NOT NULL,
    details_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (gap_type, dedup_key)
);

CREATE INDEX IF NOT EXISTS idx_gaps_type ON gaps(gap_type);
"#;
