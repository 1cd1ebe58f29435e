mod error;
mod models;
mod sqlite;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use models::{ProducedVideoRecord, StoredVideo};
pub use sqlite::{SqliteVideoStore, SqliteVideoStoreBuilder};

/// Destination for finished video records. The pipeline only ever writes.
#[async_trait]
pub trait VideoSink: Send + Sync {
    async fn record(&self, video: &ProducedVideoRecord) -> StoreResult<()>;
}
