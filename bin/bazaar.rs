use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bazaar::{
    alerts::AlertChannel, events::RawEvent, AlertManager, AlertPublisher, BatchWriter,
    BatchWriterConfig, CheckpointManager, EventSubscriber, Ingester, LogChannel, Monitor,
    PostgresClient, Settings, WriterSignal,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let client = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    client.migrate().await.context("Failed to run migrations")?;

    let store = Arc::new(client);

    run_indexer(settings, store).await
}

async fn run_indexer(settings: Arc<Settings>, store: Arc<PostgresClient>) -> anyhow::Result<()> {
    let checkpoint = Arc::new(CheckpointManager::new(
        store.clone(),
        Duration::from_secs(settings.indexer.checkpoint_cache_ttl_secs),
    ));

    let resume = checkpoint.load().await?;
    info!(
        "Resuming ingestion at height {} ({} events processed so far)",
        resume.last_block_height, resume.processed_count
    );

    // Alerts always reach the log; Redpanda is an additional channel
    // when enabled.
    let mut channels: Vec<Box<dyn AlertChannel>> = vec![Box::new(LogChannel)];
    if let Some(redpanda) = &settings.redpanda {
        if let Some(publisher) = AlertPublisher::new(redpanda) {
            channels.push(Box::new(publisher));
        }
    }
    let alerts = Arc::new(AlertManager::new(channels));

    let (signal_tx, signal_rx) = mpsc::channel::<WriterSignal>(settings.indexer.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel::<RawEvent>(settings.indexer.channel_capacity);

    let writer = BatchWriter::new(
        store.clone(),
        BatchWriterConfig {
            batch_size: settings.indexer.batch_size,
            batch_timeout: Duration::from_millis(settings.indexer.batch_timeout_ms),
        },
        signal_tx,
    );

    // The pipeline token stops the subscriber and ingester; the monitor
    // keeps running until after the ingester's final flush so the last
    // committed batch is still checkpointed.
    let pipeline_token = CancellationToken::new();
    let monitor_token = CancellationToken::new();

    let monitor = Monitor::new(checkpoint.clone(), alerts.clone(), settings.alerts.clone());
    let monitor_handle = {
        let token = monitor_token.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.run(signal_rx, token).await {
                error!("Monitor failed: {:#}", e);
            }
        })
    };

    let ingester = Ingester::new(writer, checkpoint.clone());
    let ingester_handle = {
        let token = pipeline_token.child_token();
        tokio::spawn(async move {
            if let Err(e) = ingester.run(event_rx, token).await {
                error!("Ingester failed: {:#}", e);
            }
        })
    };

    let subscriber_handle = match settings.redpanda.as_ref().filter(|r| r.enabled) {
        Some(redpanda) => {
            let subscriber =
                EventSubscriber::new(redpanda).context("Failed to initialize event subscriber")?;
            let sender = event_tx.clone();
            let subscriber_alerts = alerts.clone();
            let token = pipeline_token.child_token();
            Some(tokio::spawn(async move {
                if let Err(e) = subscriber.run(sender, subscriber_alerts, token).await {
                    error!("Event subscriber failed: {:#}", e);
                }
            }))
        },
        None => {
            warn!("Redpanda is disabled; no upstream events will be consumed");
            None
        },
    };

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    pipeline_token.cancel();
    drop(event_tx);

    if let Some(handle) = subscriber_handle {
        let _ = handle.await;
    }

    // The ingester flushes its queue before returning, so every signal
    // is in the channel by the time the monitor is told to stop.
    let _ = ingester_handle.await;

    monitor_token.cancel();
    let _ = monitor_handle.await;

    info!("Indexer stopped");
    Ok(())
}
