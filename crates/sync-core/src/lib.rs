//! # sync-core
//!
//! Foundational types, traits, and abstractions for the incremental
//! search-index synchronization engine. This crate defines the
//! component seams (watermark store, source reader, transformer, sink
//! writer, schema provisioner), the per-pipeline state machine, the
//! retry/backoff utility shared by every external connector, and the
//! driver that runs pipelines concurrently.
//!
//! ## Key Components
//!
//! - **Watermark Store**: durable `key -> timestamp` mapping, two backends
//! - **Pipeline traits**: `SourceReader`, `Transformer`, `SinkWriter`, `SchemaProvisioner`
//! - **Pipeline**: the per-entity state machine (read watermark -> query -> transform -> write -> advance)
//! - **Driver**: launches all pipelines concurrently and isolates failures
//! - **Retry**: exponential backoff with jitter, one shared utility per connector kind
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sync_core::{Pipeline, PipelineConfig};
//!
//! # async fn example(config: PipelineConfig,
//! #     store: impl sync_core::WatermarkStore + 'static,
//! #     reader: impl sync_core::SourceReader + 'static,
//! #     transformer: impl sync_core::Transformer + 'static,
//! #     writer: impl sync_core::SinkWriter + 'static,
//! #     provisioner: impl sync_core::SchemaProvisioner + 'static) -> anyhow::Result<()> {
//! let mut pipeline = Pipeline::new(config, store, reader, transformer, writer, provisioner);
//! pipeline.provision().await?;
//! // pipeline.run(cancel).await
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod traits;

pub use config::Settings;
pub use driver::Driver;
pub use error::{Result, SyncError};
pub use model::{Document, Row};
pub use pipeline::{Pipeline, PipelineConfig, StepOutcome};
pub use traits::{SchemaProvisioner, SinkWriter, SourceReader, Transformer, WatermarkStore};
