use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

use super::{clamp_limit, HistoryStore, PersistenceError};
use crate::model::{AnalysisHistoryItem, AnalysisResult};

/// In-process history keyed by user id.  Each user's rows are kept in
/// insertion order, which is also `created_at` order.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rows: DashMap<String, Vec<AnalysisHistoryItem>>,
    next_id: AtomicU64,
    last_created_at: AtomicI64,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all users.
    pub fn len(&self) -> usize {
        self.rows.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wall-clock millis, never earlier than a previously issued timestamp.
    fn next_created_at(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self.last_created_at.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn save(
        &self,
        user_id: &str,
        file_names: &[String],
        analysis: &AnalysisResult,
    ) -> Result<String, PersistenceError> {
        let id = format!("mem_{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        // Hold the user's shard while stamping so rows stay ordered.
        let mut rows = self.rows.entry(user_id.to_string()).or_default();
        rows.push(AnalysisHistoryItem {
            id: id.clone(),
            created_at: self.next_created_at(),
            file_names: file_names.to_vec(),
            result: analysis.clone(),
        });
        Ok(id)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<AnalysisHistoryItem>, PersistenceError> {
        let limit = clamp_limit(limit) as usize;
        Ok(self
            .rows
            .get(user_id)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionSummary;

    fn analysis(address: &str) -> AnalysisResult {
        AnalysisResult {
            summary: TransactionSummary {
                property_address: address.into(),
                ..TransactionSummary::default()
            },
            checklist: Vec::new(),
            missing_items_email_draft: String::new(),
        }
    }

    #[tokio::test]
    async fn lists_newest_first_with_non_decreasing_timestamps() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            store
                .save("alice", &[format!("{i}.pdf")], &analysis(&format!("{i} Main St")))
                .await
                .unwrap();
        }
        let rows = store.list_for_user("alice", None).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].file_names, vec!["4.pdf".to_string()]);
        assert_eq!(rows[4].result.summary.property_address, "0 Main St");
        assert!(rows.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        let mut ids: Vec<_> = rows.iter().map(|r| r.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn scoping_and_clamping() {
        let store = MemoryHistoryStore::new();
        for _ in 0..60 {
            store.save("alice", &[], &analysis("a")).await.unwrap();
        }
        store.save("bob", &[], &analysis("b")).await.unwrap();

        assert_eq!(store.list_for_user("alice", Some(0)).await.unwrap().len(), 1);
        assert_eq!(store.list_for_user("alice", Some(1000)).await.unwrap().len(), 50);
        let bob = store.list_for_user("bob", Some(1000)).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].result.summary.property_address, "b");
        assert!(store.list_for_user("carol", None).await.unwrap().is_empty());
        assert_eq!(store.len(), 61);
    }
}
