//! Runtime orchestrator: ingest pages, embed pending chunks, analyze, report.
//!
//! The embedding step is the barrier: analysis only starts once every batch
//! has settled, and it runs on a blocking thread.

pub mod engine;
pub mod ingest;
pub mod types;

pub use engine::{EngineContext, Orchestrator};
pub use ingest::{load_pages, PageIngester};
pub use types::*;
