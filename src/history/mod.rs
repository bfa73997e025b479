//! Analysis history persistence.
//!
//! Rows are append-only and scoped by user id.  `HistoryStore` is the seam
//! the HTTP layer depends on; `ConvexHistoryStore` talks to the hosted
//! database and `MemoryHistoryStore` keeps rows in process for development
//! and tests.

use thiserror::Error;

use crate::model::{AnalysisHistoryItem, AnalysisResult};

pub mod convex;
pub mod memory;

pub use self::convex::{ConvexConfig, ConvexHistoryStore};
pub use self::memory::MemoryHistoryStore;

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("history store request failed: {0}")]
    Transport(String),
    #[error("history store rejected the call: {0}")]
    Rejected(String),
    #[error("history store returned unexpected data: {0}")]
    Malformed(String),
}

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Short label for logs and `/healthz`.
    fn kind(&self) -> &str;

    /// Append one record; the store assigns id and creation time.
    async fn save(
        &self,
        user_id: &str,
        file_names: &[String],
        analysis: &AnalysisResult,
    ) -> Result<String, PersistenceError>;

    /// Newest-first records for `user_id`.  `limit` is clamped with
    /// [`clamp_limit`] whatever the caller asked for.
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AnalysisHistoryItem>, PersistenceError>;
}

/// Default to 20 and bound to `[1, 50]`.
pub fn clamp_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}
