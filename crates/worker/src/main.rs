//! `vitals-worker`: vital-sign stream processing service.
//!
//! See [`WorkerConfig::from_env`] for the environment variables it reads.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vitals_core::repository::{AlertRepository, ObservationRepository};
use vitals_core::stream::{AlertPublisher, MessageSource};
use vitals_core::AnomalyDetector;
use vitals_db::{InfluxClient, InfluxConfig, PgAlertRepository};
use vitals_events::{MemoryBroker, RedisPublisher, RedisStreamConfig, RedisStreamSource};
use vitals_worker::{
    shutdown_signal, window_sweep, AlertSink, Consumer, LogFormat, MetricsSink,
    ObservationProcessor, ShutdownCoordinator, StreamBackend, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        backend = ?config.stream_backend,
        topic = %config.observation_topic,
        group = %config.group_id,
        workers = config.consumer_workers,
        scope = %config.detector_scope,
        consumer = %config.consumer_name,
        delivery_order = %config.delivery_order,
        "Starting vitals-worker"
    );

    // --- Storage ---
    let pool = vitals_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    vitals_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database connection established");

    let alert_repo: Arc<dyn AlertRepository> = Arc::new(PgAlertRepository::new(pool.clone()));
    let observation_repo: Arc<dyn ObservationRepository> =
        Arc::new(InfluxClient::new(InfluxConfig {
            addr: config.influx_addr.clone(),
            database: config.influx_db.clone(),
            username: config.influx_user.clone(),
            password: config.influx_pass.clone(),
        })?);

    // --- Stream transport ---
    let (publisher, sources) = connect_stream(&config).await?;

    // --- Processing ---
    let thresholds = config.load_thresholds()?;
    tracing::info!(rules = thresholds.rules().len(), "Threshold rules loaded");

    let processor = ObservationProcessor::new(
        thresholds,
        AnomalyDetector::new(config.detector, config.detector_scope),
        AlertSink::new(publisher, alert_repo, config.delivery_order),
        MetricsSink::new(observation_repo),
    )
    .into_shared();

    let coordinator = ShutdownCoordinator::new(config.shutdown_grace);

    let sweep = config.detector_idle.map(|max_idle| {
        tokio::spawn(window_sweep::run(
            Arc::clone(&processor),
            max_idle,
            coordinator.token(),
        ))
    });

    let handles: Vec<_> = sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            let consumer = Consumer::new(
                format!("{}-{index}", config.consumer_name),
                source,
                Arc::clone(&processor),
            )
            .with_backoff(config.read_backoff);
            tokio::spawn(consumer.run(coordinator.token()))
        })
        .collect();

    shutdown_signal().await;

    let report = coordinator.shutdown(handles).await;
    if let Some(sweep) = sweep {
        if let Err(e) = sweep.await {
            tracing::error!(error = %e, "Detector window sweep failed");
        }
    }
    let processed: u64 = report.finished.iter().map(|s| s.processed).sum();
    let alerts: u64 = report.finished.iter().map(|s| s.alerts).sum();
    tracing::info!(
        processed,
        alerts,
        failed = report.failed,
        aborted = report.aborted,
        "Graceful shutdown complete"
    );

    pool.close().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vitals_worker=info,vitals_events=info,vitals_db=info".into());

    let (pretty, json) = match format {
        LogFormat::Pretty => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

/// Build the alert publisher and one message source per worker.
async fn connect_stream(
    config: &WorkerConfig,
) -> anyhow::Result<(Arc<dyn AlertPublisher>, Vec<Box<dyn MessageSource>>)> {
    match config.stream_backend {
        StreamBackend::Redis => {
            let publisher =
                RedisPublisher::connect(&config.stream_url, &config.alert_topic, &config.observation_topic)
                    .await
                    .context("Failed to connect alert publisher")?;

            let mut sources: Vec<Box<dyn MessageSource>> = Vec::new();
            for index in 0..config.consumer_workers {
                let mut stream_config = RedisStreamConfig::new(
                    &config.stream_url,
                    &config.observation_topic,
                    &config.group_id,
                    format!("{}-{index}", config.consumer_name),
                );
                stream_config.block = config.read_block;
                stream_config.batch_size = config.read_batch;
                stream_config.claim_idle = config.claim_idle;
                let source = RedisStreamSource::connect(stream_config)
                    .await
                    .context("Failed to connect stream source")?;
                sources.push(Box::new(source));
            }
            let publisher: Arc<dyn AlertPublisher> = Arc::new(publisher);
            Ok((publisher, sources))
        }
        StreamBackend::Memory => {
            tracing::warn!("Using in-memory stream backend; only in-process producers can reach it");
            let broker = MemoryBroker::new();
            let sources = (0..config.consumer_workers)
                .map(|_| Box::new(broker.source()) as Box<dyn MessageSource>)
                .collect();
            let publisher: Arc<dyn AlertPublisher> = Arc::new(broker);
            Ok((publisher, sources))
        }
    }
}
