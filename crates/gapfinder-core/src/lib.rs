//! gapfinder core: shared error type, engine configuration and gap records.

pub mod config;
pub mod error;
pub mod types;

pub use config::{EmbeddingConfig, EngineConfig, RankingConfig, Thresholds};
pub use error::{Error, Result};
pub use types::*;
