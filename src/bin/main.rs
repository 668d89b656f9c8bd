use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use gathering_service::config::Config;
use gathering_service::domains::broker::{consume_project_queue, NatsBrokerGateway};
use gathering_service::domains::crawling::{CrawlWorker, CrawlWorkerConfig, DbWorker};
use gathering_service::domains::locking::{CrawlLockManager, RedisRangeLockStore};
use gathering_service::domains::results::{PostgresResultsStore, ResultsStore};
use gathering_service::kernel::envelope::{CRAWL_WORKER, DB_WORKER};
use gathering_service::kernel::supervisor::{ServiceFactory, WorkerClass};
use gathering_service::kernel::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "fatal startup error");
        std::process::exit(1);
    }

    info!("shut down gracefully");
    Ok(())
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let lock_store = RedisRangeLockStore::connect(&config.redis_url)
        .await
        .context("connecting to redis")?;
    let lock_manager = Arc::new(CrawlLockManager::new(Arc::new(lock_store), config.lock_ttl));

    let results_store: Arc<dyn ResultsStore> = Arc::new(
        PostgresResultsStore::connect(&config.database_url)
            .await
            .context("connecting to postgres")?,
    );

    let broker = Arc::new(
        NatsBrokerGateway::connect(&config.nats_url)
            .await
            .context("connecting to nats")?,
    );

    let supervisor = Arc::new(Supervisor::new(config.health_staleness));
    let shutdown = supervisor.shutdown_token();

    let crawl_worker_count = worker_count(&config, "CrawlWorker");
    let db_worker_count = worker_count(&config, "DBWorker");

    let crawl_factory: ServiceFactory = {
        let lock_manager = lock_manager.clone();
        let broker = broker.clone();
        // The HTTP fetch/parse pipeline behind `Crawl` is out of this
        // crate's scope (see domains::crawling::crawl); wire a real
        // implementation here when one exists.
        let crawler: Arc<dyn gathering_service::domains::crawling::Crawl> =
            Arc::new(gathering_service::domains::crawling::FakeCrawl::with_items(Vec::new()));
        let data_gathering_subject = config.data_gathering_queue_subject.clone();
        let compensation_subject = config.compensation_queue_subject.clone();
        Arc::new(move |_index| {
            Box::new(CrawlWorker::new(
                lock_manager.clone(),
                crawler.clone(),
                broker.clone(),
                CrawlWorkerConfig {
                    data_gathering_subject: data_gathering_subject.clone(),
                    compensation_subject: compensation_subject.clone(),
                },
            )) as Box<dyn gathering_service::kernel::Service>
        })
    };

    let db_factory: ServiceFactory = {
        let results_store = results_store.clone();
        Arc::new(move |_index| Box::new(DbWorker::new(results_store.clone())) as Box<dyn gathering_service::kernel::Service>)
    };

    supervisor
        .spawn_class(WorkerClass {
            name: CRAWL_WORKER.to_string(),
            count: crawl_worker_count,
            factory: crawl_factory,
        })
        .await;
    supervisor
        .spawn_class(WorkerClass {
            name: DB_WORKER.to_string(),
            count: db_worker_count,
            factory: db_factory,
        })
        .await;

    let health_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.monitor_health().await }
    });

    let reply_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            supervisor.drain_replies(|envelope| {
                info!(correlation_id = %envelope.correlation_id, status = ?envelope.status, "job reply");
            }).await;
        }
    });

    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn({
        let supervisor = supervisor.clone();
        let nats_url = config.nats_url.clone();
        let subject = config.project_queue_subject.clone();
        async move { consume_project_queue(&nats_url, &subject, supervisor, consumer_shutdown).await }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    supervisor.request_shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(30), consumer_handle).await;
    let _ = reply_handle.await;
    let _ = health_handle.await;

    Ok(())
}

fn worker_count(config: &Config, class_name: &str) -> usize {
    config
        .worker_classes
        .iter()
        .find(|c| c.name == class_name)
        .map(|c| c.count)
        .unwrap_or(1)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
