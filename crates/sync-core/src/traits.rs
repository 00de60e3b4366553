//! The five collaborator traits every pipeline is built from (§4 of the
//! design). Each is a narrow, async seam so that Postgres/Elasticsearch/
//! Redis implementations live in `sync-io` while `sync-core` stays free
//! of any concrete backend dependency.

use crate::error::Result;
use crate::model::{Document, Row};
use async_trait::async_trait;

/// Durable `key -> value` mapping used to track how far each pipeline
/// has progressed. Two interchangeable implementations are expected:
/// a KV-server (Redis hash) backend and a local JSON file backend.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Returns the persisted value for `key`, or `None` if it has never
    /// been written. Implementations must not substitute a default here
    /// — bootstrap substitution is the caller's responsibility.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically persists `key -> value`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Executes a pipeline's parameterized query against the relational
/// source and returns an ordered batch of rows.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Reads up to `batch_size` rows with `modified > watermark`,
    /// ordered strictly ascending by `modified`.
    async fn read(&self, watermark: &str, batch_size: u32) -> Result<Vec<Row>>;
}

/// Pure mapping from source rows to destination documents.
///
/// Implementations must be side-effect free: given the same rows they
/// always produce the same documents. The engine treats the result as a
/// lazy, finite, single-use iterator — it is not restartable.
pub trait Transformer: Send + Sync {
    fn transform(&self, rows: Vec<Row>) -> Box<dyn Iterator<Item = Document> + Send>;
}

/// Performs a bulk upsert into the search backend.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Writes `documents` in a single bulk request. Returns
    /// `(success_count, failed_count)` and must not raise on
    /// per-document failures — only on transport-level failure of the
    /// whole batch. An empty `documents` is a no-op returning `(0, 0)`.
    async fn bulk_write(&self, documents: &[Document]) -> Result<(u64, u64)>;
}

/// Ensures a destination index exists with the required mapping before
/// a pipeline's first iteration.
#[async_trait]
pub trait SchemaProvisioner: Send + Sync {
    /// Creates the index if absent. If present, compares the live
    /// mapping to `mapping` field-for-field: equal is a no-op, different
    /// triggers a destructive delete-and-recreate. Returns `true` if a
    /// destructive recreate happened, so the caller can reset the
    /// pipeline's watermark.
    async fn ensure_index(&self, index_name: &str, mapping: &serde_json::Value) -> Result<bool>;
}
