use thiserror::Error;

/// Error taxonomy for the crawl orchestration kernel.
///
/// Every variant maps to a `reason` code carried on a `failed`/`error`
/// envelope (see [`crate::kernel::envelope::Envelope`]); locally recovered
/// errors never cross a worker boundary as anything else.
#[derive(Error, Debug)]
pub enum GatheringError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("worker is busy")]
    ServerBusy,

    #[error("no tweets found for range")]
    NoTweetFound,

    #[error("crawl failed: {0}")]
    CrawlFailed(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("no worker configured for destination: {0}")]
    UnknownDestination(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] async_nats::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatheringError {
    /// The `reason` string carried on a `failed`/`error` envelope.
    pub fn reason(&self) -> &'static str {
        match self {
            GatheringError::Transport(_)
            | GatheringError::Redis(_)
            | GatheringError::Database(_)
            | GatheringError::Broker(_) => "TRANSPORT",
            GatheringError::ServerBusy => "SERVER_BUSY",
            GatheringError::NoTweetFound => "NO_TWEET_FOUND",
            GatheringError::CrawlFailed(_) => "CRAWL_FAILED",
            GatheringError::BadInput(_) => "BAD_INPUT",
            GatheringError::UnknownDestination(_) => "UNKNOWN_DESTINATION",
            GatheringError::Other(_) => "TRANSPORT",
        }
    }

    /// Whether this error kind should fail the whole job (vs. just the
    /// sub-range currently being processed).
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            GatheringError::Transport(_)
                | GatheringError::Redis(_)
                | GatheringError::Database(_)
                | GatheringError::Broker(_)
                | GatheringError::BadInput(_)
                | GatheringError::CrawlFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatheringError>;
