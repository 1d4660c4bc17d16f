use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Error, Result};
use clap::{Parser, Subcommand};
use complaint_pipeline::{
    api::{self, AppState},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::{ComplaintStore, PgComplaintStore},
        dead_letter::{DeadLetterSink, LogDeadLetters, QueueDeadLetters},
        health::HealthChecker,
        notifier::{HttpNotifier, LogNotifier, Notifier},
        queue::QueueClient,
        rbmq::RabbitMqClient,
        redis::{NotificationLedger, RedisLedger},
    },
    config::{Config, Role},
    policy::ResiliencePolicy,
    workers::{notification::NotificationWorker, processor::ComplaintProcessor},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Seconds a notification claim is held before another worker may retry it.
const CLAIM_TTL_SECONDS: u64 = 300;

#[derive(Parser)]
#[command(name = "complaint-pipeline")]
#[command(about = "Complaint ingestion, processing and notification services")]
struct Cli {
    /// Overrides SERVER_PORT.
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the complaint ingestion API
    Api,
    /// Persist queued complaints and publish processed events
    Processor,
    /// Notify customers about processed complaints
    Notifier,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Command::Api => run_api(config, shutdown_rx).await,
        Command::Processor => run_processor(config, shutdown_rx).await,
        Command::Notifier => run_notifier(config, shutdown_rx).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_api(config: Config, shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let broker = Arc::new(RabbitMqClient::connect(&config.rabbitmq_url, config.prefetch_count).await?);
    let queue: Arc<dyn QueueClient> = Arc::new(
        broker
            .queue(&config.complaints_queue_name, config.visibility_timeout())
            .await?,
    );

    let state = Arc::new(AppState {
        queue,
        ingest_policy: ResiliencePolicy::new("ingest", config.ingest_retry()),
        health_checker: HealthChecker::new().with_broker(broker),
    });

    api::serve(api::router(state), config.server_port, shutdown).await
}

async fn run_processor(config: Config, shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let broker = Arc::new(RabbitMqClient::connect(&config.rabbitmq_url, config.prefetch_count).await?);
    let queue: Arc<dyn QueueClient> = Arc::new(
        broker
            .queue(&config.complaints_queue_name, config.visibility_timeout())
            .await?,
    );

    let topic = broker.topic(&config.processed_exchange_name).await?;
    topic.bind_queue(&config.notifications_queue_name).await?;

    let store = PgComplaintStore::connect(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to the complaints database")?;
    store.ensure_schema().await?;
    let store: Arc<dyn ComplaintStore> = Arc::new(store);

    let dead_letters = dead_letters(&config, &broker, &config.complaints_queue_name).await?;

    let processor = Arc::new(ComplaintProcessor::new(
        queue,
        Arc::new(topic),
        Arc::clone(&store),
        ResiliencePolicy::new("database", config.db_retry()),
        ResiliencePolicy::new("topic", config.topic_retry()),
        dead_letters,
        config.poll_settings(Role::Processor),
    ));

    let health = HealthChecker::new().with_store(store).with_broker(broker);

    let worker_shutdown = shutdown.clone();
    let worker = tokio::spawn(async move { processor.run(worker_shutdown).await });

    supervise(worker, health, &config, shutdown).await
}

async fn run_notifier(config: Config, shutdown: watch::Receiver<bool>) -> Result<(), Error> {
    let broker = Arc::new(RabbitMqClient::connect(&config.rabbitmq_url, config.prefetch_count).await?);

    let topic = broker.topic(&config.processed_exchange_name).await?;
    topic.bind_queue(&config.notifications_queue_name).await?;

    let queue: Arc<dyn QueueClient> = Arc::new(
        broker
            .queue(&config.notifications_queue_name, config.visibility_timeout())
            .await?,
    );

    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(
            url.as_str(),
            Duration::from_secs(config.notification_timeout_seconds),
        )?),
        None => {
            info!("No notification webhook configured, simulating e-mail delivery");
            Arc::new(LogNotifier::default())
        }
    };

    let breaker = Arc::new(CircuitBreaker::new(
        "notification",
        config.circuit_breaker_config(),
    ));
    let policy = ResiliencePolicy::new("notification", config.notify_retry())
        .with_circuit_breaker(Arc::clone(&breaker));

    let dead_letters = dead_letters(&config, &broker, &config.notifications_queue_name).await?;

    let mut worker = NotificationWorker::new(
        queue,
        notifier,
        policy,
        dead_letters,
        config.poll_settings(Role::Notifier),
    );

    if let Some(redis_url) = &config.redis_url {
        let ledger: Arc<dyn NotificationLedger> = Arc::new(
            RedisLedger::connect(
                redis_url,
                CLAIM_TTL_SECONDS,
                config.idempotency_ttl_seconds,
                config.notify_retry(),
            )
            .await?,
        );
        worker = worker.with_ledger(ledger);
    }

    let worker = Arc::new(worker);
    let health = HealthChecker::new()
        .with_broker(broker)
        .with_notification_circuit(breaker);

    let worker_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    supervise(handle, health, &config, shutdown).await
}

async fn dead_letters(
    config: &Config,
    broker: &RabbitMqClient,
    source_queue: &str,
) -> Result<Arc<dyn DeadLetterSink>, Error> {
    match &config.dead_letter_queue_name {
        Some(name) => {
            let target = broker.queue(name, config.visibility_timeout()).await?;
            Ok(Arc::new(QueueDeadLetters::new(source_queue, Arc::new(target))))
        }
        None => Ok(Arc::new(LogDeadLetters)),
    }
}

/// Serves health next to a running worker, then gives the worker `shutdown_grace` to drain.
async fn supervise(
    worker: JoinHandle<()>,
    health: HealthChecker,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mut server = tokio::spawn(api::serve(
        api::health_router(health),
        config.server_port,
        shutdown.clone(),
    ));

    let mut stopping = shutdown;
    let stop_requested = async move {
        let _ = stopping.wait_for(|stop| *stop).await;
    };

    tokio::select! {
        _ = stop_requested => {}
        result = &mut server => {
            let result = result.context("Health server task panicked").and_then(|r| r);
            if let Err(e) = result {
                error!(error = %e, "Health server stopped unexpectedly");
                return Err(e);
            }
            return Ok(());
        }
    }

    info!(
        grace_secs = config.shutdown_grace_seconds,
        "Waiting for in-flight messages to settle"
    );

    drain("worker", worker, config.shutdown_grace()).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
    }

    Ok(())
}

async fn drain<F>(name: &str, task: F, grace: Duration)
where
    F: Future<Output = Result<(), tokio::task::JoinError>>,
{
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(())) => info!(task = name, "Stopped cleanly"),
        Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
        Err(_) => warn!(task = name, "Did not stop within the grace period"),
    }
}
