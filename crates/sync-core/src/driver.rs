//! The pipeline driver: launches every pipeline as an independent
//! async task, waits for all of them, and isolates failures so that one
//! pipeline erroring never stops its siblings (§4.6, §5).

use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A boxed future representing one running pipeline's `run` loop.
type PipelineFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Collects named pipeline futures and runs them concurrently.
#[derive(Default)]
pub struct Driver {
    pipelines: Vec<(String, PipelineFuture)>,
}

/// Whether a given pipeline task completed cleanly or with an error.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub name: String,
    pub result: anyhow::Result<()>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline to be run when [`Driver::run_all`] is
    /// called. `name` is used only for logging and outcome reporting.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        fut: impl Future<Output = anyhow::Result<()>> + Send + 'static,
    ) {
        self.pipelines.push((name.into(), Box::pin(fut)));
    }

    /// Spawns every registered pipeline as its own task, then waits for
    /// all of them to finish. A pipeline erroring (or panicking) is
    /// logged and reported in the returned outcomes; it does not abort
    /// the others.
    pub async fn run_all(self) -> Vec<PipelineOutcome> {
        let handles: Vec<_> = self
            .pipelines
            .into_iter()
            .map(|(name, fut)| {
                let task_name = name.clone();
                let handle = tokio::spawn(fut);
                (task_name, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(inner) => inner,
                Err(join_err) => Err(anyhow::anyhow!("pipeline task panicked: {join_err}")),
            };
            if let Err(ref err) = result {
                error!(pipeline = %name, error = %err, "pipeline terminated with an error");
            } else {
                info!(pipeline = %name, "pipeline terminated cleanly");
            }
            outcomes.push(PipelineOutcome { name, result });
        }
        outcomes
    }
}

/// Installs a Ctrl-C / SIGTERM-style handler that cancels `token` once
/// triggered, so every pipeline's idle sleep and in-flight iteration
/// unwind without advancing a watermark.
pub async fn wait_for_shutdown_signal(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received shutdown signal; cancelling all pipelines");
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_failing_pipeline_does_not_stop_the_others() {
        let mut driver = Driver::new();
        driver.add("ok", async { Ok(()) });
        driver.add("bad", async { Err(anyhow::anyhow!("boom")) });

        let outcomes = driver.run_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().find(|o| o.name == "ok").unwrap().result.is_ok());
        assert!(outcomes.iter().find(|o| o.name == "bad").unwrap().result.is_err());
    }
}
