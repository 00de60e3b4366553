//! The per-entity pipeline state machine (§4.6):
//!
//! ```text
//! INIT -> PROVISION -> READ_WATERMARK -> QUERY --(empty)--> SLEEP --> QUERY
//!                                            \--(rows)--> TRANSFORM -> WRITE -> ADVANCE -> READ_WATERMARK
//! ANY STATE -> ERROR (logged; iteration aborts; loop retries next pass, per §7 kinds 3/5)
//! ```
//!
//! `Pipeline` owns one instance of each of the five collaborators and
//! drives them through this loop. A single iteration is exposed as
//! [`Pipeline::run_once`] so the state machine's boundary behaviors can
//! be exercised directly in tests without an infinite loop or real
//! sleeps. [`Pipeline::run`] never lets a recoverable iteration error
//! unwind the whole loop — only cancellation, or a provisioning
//! failure at startup, stops it.

use crate::error::Result;
use crate::traits::{SchemaProvisioner, SinkWriter, SourceReader, Transformer, WatermarkStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Static configuration for one pipeline: which watermark key it owns,
/// which index it writes to, the watermark column name, and the
/// tunables that come from [`crate::Settings`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Human-readable pipeline name, used in logs ("filmwork", "genres", "persons").
    pub name: String,
    /// Watermark store key, e.g. `last_synced_time_filmwork`.
    pub watermark_key: String,
    /// Destination index name.
    pub index_name: String,
    /// Index mapping handed to the schema provisioner at startup.
    pub index_mapping: serde_json::Value,
    /// Bootstrap watermark value used when none is persisted.
    pub default_sync_time: String,
    /// Idle wait after an empty batch.
    pub default_sleep_time: Duration,
    /// Rows requested per query iteration.
    pub batch_size: u32,
}

/// Outcome of a single pipeline iteration, used by tests to assert the
/// boundary behaviors in §8 without looping forever.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The batch was empty; the pipeline would now sleep.
    Idle,
    /// `count` documents were written and the watermark advanced to `watermark`.
    Advanced { count: usize, watermark: String },
    /// The batch produced one or more per-document indexing failures;
    /// the watermark was held (§7 resolution of the open question).
    Held { failed: u64 },
}

/// One running instance of the pipeline state machine, generic over its
/// five collaborators so entity-specific wiring happens in
/// `sync-pipelines` while the loop itself lives here, once.
pub struct Pipeline<S, R, T, W, P> {
    config: PipelineConfig,
    store: S,
    reader: R,
    transformer: T,
    writer: W,
    provisioner: P,
}

impl<S, R, T, W, P> Pipeline<S, R, T, W, P>
where
    S: WatermarkStore,
    R: SourceReader,
    T: Transformer,
    W: SinkWriter,
    P: SchemaProvisioner,
{
    pub fn new(
        config: PipelineConfig,
        store: S,
        reader: R,
        transformer: T,
        writer: W,
        provisioner: P,
    ) -> Self {
        Self {
            config,
            store,
            reader,
            transformer,
            writer,
            provisioner,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// PROVISION: ensures the destination index exists with the
    /// required mapping. If a destructive recreate happened, resets
    /// this pipeline's watermark to bootstrap (§9 resolution) so the
    /// next iteration reseeds the index from the beginning.
    #[instrument(skip(self), fields(pipeline = %self.config.name))]
    pub async fn provision(&self) -> Result<()> {
        let recreated = self
            .provisioner
            .ensure_index(&self.config.index_name, &self.config.index_mapping)
            .await?;
        if recreated {
            warn!(
                pipeline = %self.config.name,
                watermark_key = %self.config.watermark_key,
                "index recreated with new mapping; resetting watermark to bootstrap"
            );
            self.store
                .set(&self.config.watermark_key, &self.config.default_sync_time)
                .await?;
        }
        Ok(())
    }

    /// READ_WATERMARK: fetches the persisted watermark, substituting
    /// the bootstrap value when absent.
    async fn read_watermark(&self) -> Result<String> {
        match self.store.get(&self.config.watermark_key).await? {
            Some(value) => Ok(value),
            None => Ok(self.config.default_sync_time.clone()),
        }
    }

    /// Runs QUERY -> (SLEEP | TRANSFORM -> WRITE -> ADVANCE) exactly
    /// once and returns what happened, without sleeping on an idle
    /// batch (the caller decides whether/how long to wait).
    #[instrument(skip(self), fields(pipeline = %self.config.name))]
    pub async fn run_once(&self) -> Result<StepOutcome> {
        let watermark = self.read_watermark().await?;
        let rows = self
            .reader
            .read(&watermark, self.config.batch_size)
            .await?;

        if rows.is_empty() {
            return Ok(StepOutcome::Idle);
        }

        let tail_watermark = rows
            .last()
            .and_then(|r| r.get_str("modified"))
            .map(|s| s.to_string())
            .unwrap_or(watermark);

        let documents: Vec<_> = self.transformer.transform(rows).collect();
        let (success, failed) = self.writer.bulk_write(&documents).await?;

        if failed > 0 {
            warn!(
                pipeline = %self.config.name,
                failed,
                success,
                "per-document indexing failures; holding watermark for reprocessing"
            );
            return Ok(StepOutcome::Held { failed });
        }

        // ADVANCE: the commit point. Only reached once the write is
        // known to have fully succeeded.
        self.store
            .set(&self.config.watermark_key, &tail_watermark)
            .await?;

        info!(
            pipeline = %self.config.name,
            count = documents.len(),
            watermark = %tail_watermark,
            "advanced watermark"
        );

        Ok(StepOutcome::Advanced {
            count: documents.len(),
            watermark: tail_watermark,
        })
    }

    /// Runs the pipeline forever: PROVISION once, then READ_WATERMARK
    /// -> QUERY -> ... in a loop, sleeping on idle batches. A failed
    /// iteration (source-query error, watermark write failure, etc.)
    /// is logged and the loop retries on the next pass rather than
    /// terminating the pipeline (§7 kinds 3 and 5): these are safe to
    /// re-attempt because nothing commits until ADVANCE. Returns only
    /// on cancellation or a provisioning failure at startup.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.provision().await?;

        loop {
            if cancel.is_cancelled() {
                info!(pipeline = %self.config.name, "cancellation requested; stopping");
                return Ok(());
            }

            match self.run_once().await {
                Ok(StepOutcome::Idle) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.default_sleep_time) => {}
                        _ = cancel.cancelled() => {
                            info!(pipeline = %self.config.name, "cancelled during idle sleep");
                            return Ok(());
                        }
                    }
                }
                Ok(StepOutcome::Advanced { .. }) | Ok(StepOutcome::Held { .. }) => {
                    // Loop immediately; there may be more rows behind this batch.
                }
                Err(err) => {
                    warn!(pipeline = %self.config.name, error = %err, "iteration failed; retrying next loop");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.default_sleep_time) => {}
                        _ = cancel.cancelled() => {
                            info!(pipeline = %self.config.name, "cancelled after iteration failure");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result as SyncResult, SyncError};
    use crate::model::{Document, Row};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeStore(Arc<Mutex<std::collections::HashMap<String, String>>>);

    #[async_trait]
    impl WatermarkStore for FakeStore {
        async fn get(&self, key: &str) -> SyncResult<Option<String>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
            self.0
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    struct FakeReader {
        batches: Mutex<Vec<Vec<Row>>>,
    }

    impl FakeReader {
        fn new(batches: Vec<Vec<Row>>) -> Self {
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl SourceReader for FakeReader {
        async fn read(&self, _watermark: &str, _batch_size: u32) -> SyncResult<Vec<Row>> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(vec![])
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    /// A reader that replays a fixed scripted sequence of outcomes, one
    /// per call: `Err(())` injects a recoverable iteration failure,
    /// `Ok(rows)` returns a batch. Once the script is exhausted it
    /// behaves like an up-to-date source (empty batches forever).
    struct FlakyReader {
        steps: Mutex<Vec<std::result::Result<Vec<Row>, ()>>>,
    }

    impl FlakyReader {
        fn new(steps: Vec<std::result::Result<Vec<Row>, ()>>) -> Self {
            Self {
                steps: Mutex::new(steps),
            }
        }
    }

    #[async_trait]
    impl SourceReader for FlakyReader {
        async fn read(&self, _watermark: &str, _batch_size: u32) -> SyncResult<Vec<Row>> {
            let mut steps = self.steps.lock().unwrap();
            if steps.is_empty() {
                return Ok(vec![]);
            }
            match steps.remove(0) {
                Ok(rows) => Ok(rows),
                Err(()) => Err(SyncError::Source(anyhow::anyhow!(
                    "injected transient query failure"
                ))),
            }
        }
    }

    struct PassthroughTransformer;

    impl Transformer for PassthroughTransformer {
        fn transform(&self, rows: Vec<Row>) -> Box<dyn Iterator<Item = Document> + Send> {
            Box::new(rows.into_iter().map(|row| {
                let id = row.get_str("id").unwrap_or_default().to_string();
                Document::new("test-index", id, Value::Object(row.into_inner()))
            }))
        }
    }

    struct FakeWriter {
        fail_next: bool,
    }

    #[async_trait]
    impl SinkWriter for FakeWriter {
        async fn bulk_write(&self, documents: &[Document]) -> SyncResult<(u64, u64)> {
            if documents.is_empty() {
                return Ok((0, 0));
            }
            if self.fail_next {
                Ok((0, documents.len() as u64))
            } else {
                Ok((documents.len() as u64, 0))
            }
        }
    }

    struct NoopProvisioner;

    #[async_trait]
    impl SchemaProvisioner for NoopProvisioner {
        async fn ensure_index(&self, _index_name: &str, _mapping: &Value) -> SyncResult<bool> {
            Ok(false)
        }
    }

    fn row(id: &str, modified: &str) -> Row {
        let Value::Object(map) = json!({"id": id, "modified": modified}) else {
            unreachable!()
        };
        Row::new(map)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            name: "test".to_string(),
            watermark_key: "last_synced_time_test".to_string(),
            index_name: "test-index".to_string(),
            index_mapping: json!({"mappings": {}}),
            default_sync_time: "1970-01-01T00:00:00+00:00".to_string(),
            default_sleep_time: Duration::from_millis(1),
            batch_size: 100,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_idle_and_leaves_watermark_untouched() {
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );
        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(outcome, StepOutcome::Idle);
        assert_eq!(pipeline.read_watermark().await.unwrap(), "1970-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn bootstrap_watermark_used_on_cold_start() {
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![vec![row("A", "2024-01-01T00:00:00+00:00")]]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );
        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                count: 1,
                watermark: "2024-01-01T00:00:00+00:00".to_string()
            }
        );
    }

    #[tokio::test]
    async fn watermark_advances_to_tail_row_timestamp() {
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![vec![
                row("A", "2024-01-01T00:00:00+00:00"),
                row("B", "2024-01-02T00:00:00+00:00"),
            ]]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );
        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                count: 2,
                watermark: "2024-01-02T00:00:00+00:00".to_string()
            }
        );
        assert_eq!(
            pipeline.read_watermark().await.unwrap(),
            "2024-01-02T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn equal_timestamp_batch_writes_all_and_advances_once() {
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![vec![
                row("A", "2024-01-01T00:00:00+00:00"),
                row("B", "2024-01-01T00:00:00+00:00"),
                row("C", "2024-01-01T00:00:00+00:00"),
            ]]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );
        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                count: 3,
                watermark: "2024-01-01T00:00:00+00:00".to_string()
            }
        );
    }

    #[tokio::test]
    async fn per_document_failures_hold_the_watermark() {
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![vec![row("A", "2024-01-01T00:00:00+00:00")]]),
            PassthroughTransformer,
            FakeWriter { fail_next: true },
            NoopProvisioner,
        );
        let outcome = pipeline.run_once().await.unwrap();
        assert_eq!(outcome, StepOutcome::Held { failed: 1 });
        assert_eq!(pipeline.read_watermark().await.unwrap(), "1970-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn reprocessing_same_batch_twice_commits_watermark_once() {
        // Same batch fed to two successive run_once calls, as would
        // happen if a watermark write failed and the loop retried: the
        // resulting watermark is unchanged by the second, redundant
        // commit.
        let pipeline = Pipeline::new(
            config(),
            FakeStore::default(),
            FakeReader::new(vec![
                vec![row("A", "2024-01-01T00:00:00+00:00")],
                vec![row("A", "2024-01-01T00:00:00+00:00")],
            ]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );
        let first = pipeline.run_once().await.unwrap();
        let second = pipeline.run_once().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn run_survives_a_failed_iteration_and_advances_on_the_next_pass() {
        // A recoverable iteration error (source-query failure, watermark
        // write failure, ...) must not terminate the pipeline's `run`
        // loop: it should be logged and retried on the next pass. This
        // exercises `run()` itself, not `run_once()`, so a regression
        // that turns the error branch back into a `return Err(err)`
        // fails this test instead of only being caught in integration.
        let watermarks = Arc::new(Mutex::new(std::collections::HashMap::new()));
        let pipeline = Pipeline::new(
            config(),
            FakeStore(watermarks.clone()),
            FlakyReader::new(vec![
                Err(()),
                Ok(vec![row("A", "2024-01-01T00:00:00+00:00")]),
            ]),
            PassthroughTransformer,
            FakeWriter { fail_next: false },
            NoopProvisioner,
        );

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { pipeline.run(run_cancel).await });

        // `default_sleep_time` in `config()` is 1ms, so a handful of
        // loop passes comfortably fit in this window: the first consumes
        // the injected error, the second writes and advances the
        // watermark, and the rest see an empty batch and idle.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();

        assert_eq!(
            watermarks.lock().unwrap().get("last_synced_time_test").cloned(),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
    }
}
