//! # sync-io
//!
//! Concrete connectors implementing `sync-core`'s traits against real
//! external systems.
//!
//! ## Source
//! - **Postgres** (`postgres`): `SourceReader` over `tokio-postgres`, one
//!   reader per entity query, wrapped in the shared retry policy.
//!
//! ## Sink
//! - **Elasticsearch** (`elasticsearch_sink`): `SinkWriter` and
//!   `SchemaProvisioner` over the official `elasticsearch` crate's bulk
//!   and indices APIs.
//!
//! ## Watermark Store
//! - **Redis** (`redis_store`): `WatermarkStore` backed by a single hash
//!   named `state`.
//! - **File** (`file_store`): `WatermarkStore` backed by a local JSON
//!   file, serialized with a mutex for in-process concurrent pipelines.

/// Elasticsearch bulk sink and schema provisioner.
pub mod elasticsearch_sink;

/// Local JSON file watermark store.
pub mod file_store;

/// Postgres source reader and connector.
pub mod postgres;

/// Redis-backed watermark store.
pub mod redis_store;
