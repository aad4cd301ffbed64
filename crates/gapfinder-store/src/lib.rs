//! gapfinder store: SQLite tables for pages, chunks, embeddings and gaps.

pub mod schema;
pub mod sqlite;
pub mod types;
pub mod vector;

pub use sqlite::SqliteStore;
pub use types::*;
