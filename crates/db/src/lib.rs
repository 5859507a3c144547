mod memory;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use ci_insight_core::models::{AnalysisRecord, NewAnalysisRecord};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Append-only storage for analysis records.
///
/// Ids are unique and strictly increasing per store. `query_by_repo` returns records in
/// insertion order; callers sort by `created_at` themselves if they need to.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Assign the next id and a creation timestamp, store the record and return it.
    async fn append(&self, record: NewAnalysisRecord) -> Result<AnalysisRecord>;

    /// All records for `repo_id`, oldest first. Unknown repositories yield an empty list.
    async fn query_by_repo(&self, repo_id: u64) -> Result<Vec<AnalysisRecord>>;
}
