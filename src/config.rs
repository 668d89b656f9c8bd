use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub nats_url: String,
    pub project_queue_subject: String,
    pub data_gathering_queue_subject: String,
    pub compensation_queue_subject: String,
    pub lock_ttl: Duration,
    pub health_staleness: Duration,
    pub worker_classes: Vec<WorkerClassConfig>,
}

/// Per-class worker configuration (§6: `{count, memory_limit_mb, config}`).
#[derive(Debug, Clone)]
pub struct WorkerClassConfig {
    pub name: String,
    pub count: usize,
    pub memory_limit_mb: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            nats_url: env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            project_queue_subject: env::var("PROJECT_QUEUE_SUBJECT")
                .unwrap_or_else(|_| "project_queue".to_string()),
            data_gathering_queue_subject: env::var("DATA_GATHERING_QUEUE_SUBJECT")
                .unwrap_or_else(|_| "data_gathering_queue".to_string()),
            compensation_queue_subject: env::var("COMPENSATION_QUEUE_SUBJECT")
                .unwrap_or_else(|_| "compensation_queue".to_string()),
            lock_ttl: Duration::from_secs(
                env::var("LOCK_TTL_SECONDS")
                    .unwrap_or_else(|_| "6000".to_string())
                    .parse()
                    .context("LOCK_TTL_SECONDS must be a valid number")?,
            ),
            health_staleness: Duration::from_secs(
                env::var("HEALTH_STALENESS_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("HEALTH_STALENESS_SECONDS must be a valid number")?,
            ),
            worker_classes: vec![
                WorkerClassConfig {
                    name: "CrawlWorker".to_string(),
                    count: env::var("CRAWL_WORKER_COUNT")
                        .unwrap_or_else(|_| "2".to_string())
                        .parse()
                        .context("CRAWL_WORKER_COUNT must be a valid number")?,
                    memory_limit_mb: 512,
                },
                WorkerClassConfig {
                    name: "DBWorker".to_string(),
                    count: env::var("DB_WORKER_COUNT")
                        .unwrap_or_else(|_| "1".to_string())
                        .parse()
                        .context("DB_WORKER_COUNT must be a valid number")?,
                    memory_limit_mb: 256,
                },
            ],
        })
    }
}
