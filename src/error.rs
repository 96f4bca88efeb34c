use thiserror::Error;

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Bad run input; raised before any request is sent.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("fetching {url} failed after {attempts} attempt(s): {source}")]
    Fetch {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("proxy connection failed for {url}: {source}")]
    Proxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("page {page}: {reason}")]
    Extract { page: u32, reason: String },

    /// A page task panicked or was cancelled before it produced a result.
    #[error("{0}")]
    TaskFailed(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<redis::RedisError> for ScrapeError {
    fn from(e: redis::RedisError) -> Self {
        ScrapeError::StoreUnavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for ScrapeError {
    fn from(e: rusqlite::Error) -> Self {
        ScrapeError::StoreUnavailable(e.to_string())
    }
}
