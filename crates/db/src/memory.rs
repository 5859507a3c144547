use anyhow::Result;
use async_trait::async_trait;
use ci_insight_core::models::{AnalysisRecord, NewAnalysisRecord};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::AnalysisStore;

/// Process-local store. Records are lost on restart.
///
/// The id is derived from the list length, so it is computed and pushed under one lock.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AnalysisRecord>>,
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn append(&self, record: NewAnalysisRecord) -> Result<AnalysisRecord> {
        let mut records = self.records.lock().await;
        let id = records.len() as u64 + 1;
        let record = record.into_record(id, OffsetDateTime::now_utc());
        records.push(record.clone());
        Ok(record)
    }

    async fn query_by_repo(&self, repo_id: u64) -> Result<Vec<AnalysisRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().filter(|r| r.repo_id == repo_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::tests::{check_store_contract, new_record};

    #[tokio::test]
    async fn memory_store_contract() { check_store_contract(&MemoryStore::default()).await }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_unique_ids() {
        let store = Arc::new(MemoryStore::default());
        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(new_record(1, i, "parallel")).await.unwrap().id
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 64);
        let stored = store.query_by_repo(1).await.unwrap();
        assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
    }
}
