//! # sync-engine
//!
//! Runs the three sync pipelines — filmwork, genres, persons —
//! concurrently until Ctrl-C, then waits for each to unwind cleanly
//! without advancing a watermark mid-batch (§4.6, §6).
//!
//! ```bash
//! sync-engine
//! RUST_LOG=debug sync-engine
//! ```
//!
//! No flags: configuration is read entirely from the environment (and
//! an optional `.env` file) per §6.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use sync_core::config::WatermarkBackend;
use sync_core::driver::wait_for_shutdown_signal;
use sync_core::{Driver, Pipeline, Result as SyncResult, Settings, WatermarkStore};
use sync_io::elasticsearch_sink::{EsConnector, EsSchemaProvisioner, EsSinkWriter};
use sync_io::file_store::FileWatermarkStore;
use sync_io::postgres::{PgConnector, PgSourceReader};
use sync_io::redis_store::{RedisConnector, RedisWatermarkStore};
use sync_pipelines::{filmwork, genre, person};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sync-engine")]
#[command(about = "Incremental search-index synchronization engine")]
struct Args;

/// Dispatches to whichever watermark backend `WATERMARK_BACKEND` selects,
/// without forcing the pipeline state machine to be generic over it.
enum AnyWatermarkStore {
    Kv(RedisWatermarkStore),
    File(Arc<FileWatermarkStore>),
}

#[async_trait]
impl WatermarkStore for AnyWatermarkStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        match self {
            AnyWatermarkStore::Kv(store) => store.get(key).await,
            AnyWatermarkStore::File(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        match self {
            AnyWatermarkStore::Kv(store) => store.set(key, value).await,
            AnyWatermarkStore::File(store) => store.set(key, value).await,
        }
    }
}

/// Builds one entity's pipeline: its own Postgres connection, its own
/// pair of Elasticsearch connections (sink + schema), and a fresh
/// watermark-store handle from `new_store` (§5: source/sink handles are
/// never shared across pipelines; the watermark store may be).
async fn build_pipeline<T: sync_core::Transformer>(
    settings: &Settings,
    new_store: &(dyn Fn() -> AnyWatermarkStore + Send + Sync),
    query: &'static str,
    transformer: T,
    config: sync_core::PipelineConfig,
) -> Result<Pipeline<AnyWatermarkStore, PgSourceReader, T, EsSinkWriter, EsSchemaProvisioner>> {
    let pg_client = PgConnector::new(settings.postgres_dsn())
        .connect()
        .await
        .context("connecting to postgres")?;
    let reader = PgSourceReader::new(settings.postgres_dsn(), pg_client, query);

    let sink_client = EsConnector::new(settings.es_base_url())
        .connect()
        .await
        .context("connecting sink client to elasticsearch")?;
    let writer = EsSinkWriter::new(sink_client);

    let schema_client = EsConnector::new(settings.es_base_url())
        .connect()
        .await
        .context("connecting schema client to elasticsearch")?;
    let provisioner = EsSchemaProvisioner::new(schema_client);

    Ok(Pipeline::new(
        config,
        new_store(),
        reader,
        transformer,
        writer,
        provisioner,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = Args::parse();

    let settings = Settings::load().context("loading configuration")?;

    let new_store: Box<dyn Fn() -> AnyWatermarkStore + Send + Sync> = match settings.watermark_backend
    {
        WatermarkBackend::Kv => {
            let connection = RedisConnector::new(settings.redis_url())
                .connect()
                .await
                .context("connecting to redis")?;
            Box::new(move || AnyWatermarkStore::Kv(RedisWatermarkStore::new(connection.clone())))
        }
        WatermarkBackend::File => {
            let store = Arc::new(FileWatermarkStore::new(settings.state_file_path.clone()));
            Box::new(move || AnyWatermarkStore::File(store.clone()))
        }
    };

    let cancel = CancellationToken::new();
    let mut driver = Driver::new();

    let filmwork_pipeline = build_pipeline(
        &settings,
        new_store.as_ref(),
        filmwork::QUERY,
        filmwork::FilmWorkTransformer::new(settings.filmwork_index_name.clone()),
        filmwork::pipeline_config(
            settings.filmwork_index_name.clone(),
            settings.default_sync_time.clone(),
            settings.default_sleep_time,
            settings.batch_size,
        ),
    )
    .await
    .context("starting filmwork pipeline")?;

    let genre_pipeline = build_pipeline(
        &settings,
        new_store.as_ref(),
        genre::QUERY,
        genre::GenreTransformer::new(settings.genres_index_name.clone()),
        genre::pipeline_config(
            settings.genres_index_name.clone(),
            settings.default_sync_time.clone(),
            settings.default_sleep_time,
            settings.batch_size,
        ),
    )
    .await
    .context("starting genres pipeline")?;

    let person_pipeline = build_pipeline(
        &settings,
        new_store.as_ref(),
        person::QUERY,
        person::PersonTransformer::new(settings.persons_index_name.clone()),
        person::pipeline_config(
            settings.persons_index_name.clone(),
            settings.default_sync_time.clone(),
            settings.default_sleep_time,
            settings.batch_size,
        ),
    )
    .await
    .context("starting persons pipeline")?;

    {
        let cancel = cancel.clone();
        driver.add("filmwork", async move { filmwork_pipeline.run(cancel).await.map_err(Into::into) });
    }
    {
        let cancel = cancel.clone();
        driver.add("genres", async move { genre_pipeline.run(cancel).await.map_err(Into::into) });
    }
    {
        let cancel = cancel.clone();
        driver.add("persons", async move { person_pipeline.run(cancel).await.map_err(Into::into) });
    }

    tokio::spawn(wait_for_shutdown_signal(cancel.clone()));

    info!("sync-engine started; running filmwork, genres, persons pipelines");
    let outcomes = driver.run_all().await;

    let mut exit_code = 0;
    for outcome in outcomes {
        if let Err(err) = outcome.result {
            error!(pipeline = %outcome.name, error = %err, "pipeline exited with an error");
            exit_code = 1;
        }
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
