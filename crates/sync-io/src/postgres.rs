//! Postgres-backed [`SourceReader`] and connection management.
//!
//! One query per entity kind is supplied by `sync-pipelines`; this
//! module only knows how to connect (with the shared retry policy),
//! execute a parameterized query, and turn `tokio_postgres::Row`s into
//! [`sync_core::Row`]s addressed purely by column name.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sync_core::retry::retry_connect;
use sync_core::{Result, Row, SourceReader, SyncError};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

/// Owns a live `tokio_postgres::Client`, reconnecting transparently
/// (through the shared retry policy) on transient operational errors.
pub struct PgConnector {
    dsn: String,
}

impl PgConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }

    /// Connects to Postgres, retrying indefinitely on transient
    /// operational-connection errors only (§5): a syntax error or
    /// authentication failure surfaces immediately instead of looping.
    pub async fn connect(&self) -> Result<Client> {
        retry_connect("postgres", is_retryable_connect_error, || async {
            let (client, connection) =
                tokio_postgres::connect(&self.dsn, NoTls)
                    .await
                    .map_err(anyhow::Error::from)?;

            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    warn!(error = %err, "postgres connection task ended with an error");
                }
            });

            Ok(client)
        })
        .await
    }
}

fn is_retryable_connect_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tokio_postgres::Error>()
        .map(is_connection_gone)
        .unwrap_or(true)
}

/// Whether a `tokio_postgres::Error` indicates the connection itself is
/// gone (closed, reset, I/O failure) rather than a statement/syntax or
/// constraint error reported by the server. Shared by the connector's
/// initial-connect predicate and by `PgSourceReader::read`'s
/// reconnect-beneath-the-query-call logic, since both need to tell
/// "the link died" apart from "the query was rejected".
fn is_connection_gone(err: &tokio_postgres::Error) -> bool {
    err.is_closed() || err.as_db_error().is_none()
}

/// A fixed, parameterized query against Postgres for one entity kind.
/// The query MUST select only rows with `modified > $1`, order strictly
/// ascending by `modified`, and limit to `$2` — aggregation of related
/// rows (persons/genres/movies) happens server-side so one returned row
/// is one complete document (§4.2).
///
/// Holds the DSN alongside the live client so a connection-level query
/// failure can transparently reconnect (through the same retrying
/// `PgConnector::connect`, beneath the query call) and retry once,
/// rather than surfacing a dead-connection error that a fresh connect
/// would have avoided (§4.2 failure semantics).
pub struct PgSourceReader {
    dsn: String,
    client: Mutex<Client>,
    query: &'static str,
}

impl PgSourceReader {
    pub fn new(dsn: impl Into<String>, client: Client, query: &'static str) -> Self {
        Self {
            dsn: dsn.into(),
            client: Mutex::new(client),
            query,
        }
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    async fn read(&self, watermark: &str, batch_size: u32) -> Result<Vec<Row>> {
        let first_attempt = {
            let client = self.client.lock().await;
            client
                .query(self.query, &[&watermark, &(batch_size as i64)])
                .await
        };

        let rows = match first_attempt {
            Ok(rows) => rows,
            Err(err) if is_connection_gone(&err) => {
                warn!(error = %err, "postgres connection gone; reconnecting beneath the query call");
                let fresh = PgConnector::new(self.dsn.clone()).connect().await?;
                let mut client = self.client.lock().await;
                *client = fresh;
                client
                    .query(self.query, &[&watermark, &(batch_size as i64)])
                    .await
                    .map_err(|e| SyncError::Source(anyhow::Error::from(e)))?
            }
            Err(err) => return Err(SyncError::Source(anyhow::Error::from(err))),
        };

        info!(rows = rows.len(), "read batch from postgres");
        rows.into_iter().map(pg_row_to_row).collect()
    }
}

/// Converts a `tokio_postgres::Row` into a [`Row`] by walking its
/// column metadata and reading each value as JSON, using whichever
/// concrete type the column reports. Aggregate columns (e.g. `persons`,
/// `genres`, `movies`) are expected to already be JSON/JSONB from the
/// source-side `json_agg`, so they decode directly into arrays.
fn pg_row_to_row(row: tokio_postgres::Row) -> Result<Row> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = pg_value_to_json(&row, idx, column.type_())
            .map_err(|e| SyncError::Source(anyhow::anyhow!("column {name}: {e}")))?;
        map.insert(name, value);
    }
    Ok(Row::new(map))
}

fn pg_value_to_json(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &tokio_postgres::types::Type,
) -> anyhow::Result<Value> {
    use tokio_postgres::types::Type;

    let value = match *ty {
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<Value>>(idx)?
            .unwrap_or(Value::Null),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => row
            .try_get::<_, Option<f64>>(idx)?
            .map(|f| serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        Type::INT2 | Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)?
            .map(|i| Value::Number(i.into()))
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}
