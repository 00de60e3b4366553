//! Elasticsearch-backed [`SinkWriter`] and [`SchemaProvisioner`].
//!
//! Bulk upserts use the official client's bulk API; the per-document
//! failure count is read out of the response body rather than
//! surfaced as an error, per §4.4 — only a transport-level failure of
//! the whole batch is treated as an error here.

use async_trait::async_trait;
use elasticsearch::http::transport::Transport;
use elasticsearch::indices::{
    IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesGetMappingParts,
};
use elasticsearch::{BulkOperation, BulkParts, Elasticsearch};
use serde_json::Value;
use sync_core::retry::retry_connect;
use sync_core::{Document, Result, SchemaProvisioner, SinkWriter, SyncError};
use tracing::{error, info, warn};

/// Connects (with the shared retry policy, retrying connection and
/// timeout errors only) and returns a ready-to-use client.
pub struct EsConnector {
    base_url: String,
}

impl EsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub async fn connect(&self) -> Result<Elasticsearch> {
        retry_connect("elasticsearch", is_retryable_es_error, || async {
            let transport = Transport::single_node(&self.base_url).map_err(anyhow::Error::from)?;
            Ok(Elasticsearch::new(transport))
        })
        .await
    }
}

fn is_retryable_es_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("connect") || msg.contains("timeout") || msg.contains("timed out")
}

/// Bulk-upserts documents into Elasticsearch. One pipeline owns one
/// writer; every document it's handed targets that pipeline's index.
pub struct EsSinkWriter {
    client: Elasticsearch,
}

impl EsSinkWriter {
    pub fn new(client: Elasticsearch) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SinkWriter for EsSinkWriter {
    async fn bulk_write(&self, documents: &[Document]) -> Result<(u64, u64)> {
        if documents.is_empty() {
            return Ok((0, 0));
        }

        let body: Vec<BulkOperation<Value>> = documents
            .iter()
            .map(|doc| {
                BulkOperation::index(doc.source.clone())
                    .id(&doc.id)
                    .index(&doc.index)
                    .into()
            })
            .collect();

        let attempted = body.len() as u64;
        let response = sync_core::retry::retry_bounded(
            "elasticsearch-bulk",
            5,
            is_retryable_es_error,
            || async {
                self.client
                    .bulk(BulkParts::None)
                    .body(body.clone())
                    .send()
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Sink(anyhow::Error::from(e)))?;

        let mut success = 0u64;
        let mut failed = 0u64;
        if let Some(items) = body.get("items").and_then(Value::as_array) {
            for item in items {
                let has_error = item
                    .values()
                    .next()
                    .and_then(|action| action.get("error"))
                    .is_some();
                if has_error {
                    failed += 1;
                } else {
                    success += 1;
                }
            }
        } else {
            // No item-level breakdown available; trust the attempted count.
            success = attempted;
        }

        if failed > 0 {
            error!(failed, success, "per-document bulk indexing failures");
        } else {
            info!(success, "bulk indexed documents");
        }

        Ok((success, failed))
    }
}

/// Ensures an index exists with the required mapping, destructively
/// recreating it when the live mapping differs (§4.5).
pub struct EsSchemaProvisioner {
    client: Elasticsearch,
}

impl EsSchemaProvisioner {
    pub fn new(client: Elasticsearch) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaProvisioner for EsSchemaProvisioner {
    async fn ensure_index(&self, index_name: &str, mapping: &Value) -> Result<bool> {
        let exists = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index_name]))
            .send()
            .await
            .map_err(|e| SyncError::Schema(anyhow::Error::from(e)))?
            .status_code()
            .is_success();

        if !exists {
            self.create_index(index_name, mapping).await?;
            info!(index = index_name, "index created with mapping");
            return Ok(false);
        }

        let response = self
            .client
            .indices()
            .get_mapping(IndicesGetMappingParts::Index(&[index_name]))
            .send()
            .await
            .map_err(|e| SyncError::Schema(anyhow::Error::from(e)))?;

        let live: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Schema(anyhow::Error::from(e)))?;

        let live_mappings = live
            .get(index_name)
            .and_then(|v| v.get("mappings"))
            .cloned()
            .unwrap_or(Value::Null);
        let requested_mappings = mapping.get("mappings").cloned().unwrap_or(Value::Null);

        if live_mappings == requested_mappings {
            info!(index = index_name, "index already matches requested mapping");
            return Ok(false);
        }

        warn!(index = index_name, "index mapping differs; recreating destructively");
        self.client
            .indices()
            .delete(IndicesDeleteParts::Index(&[index_name]))
            .send()
            .await
            .map_err(|e| SyncError::Schema(anyhow::Error::from(e)))?;

        self.create_index(index_name, mapping).await?;
        Ok(true)
    }
}

impl EsSchemaProvisioner {
    async fn create_index(&self, index_name: &str, mapping: &Value) -> Result<()> {
        self.client
            .indices()
            .create(IndicesCreateParts::Index(index_name))
            .body(mapping.clone())
            .send()
            .await
            .map_err(|e| SyncError::Schema(anyhow::Error::from(e)))?;
        Ok(())
    }
}
