use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmdeckError {
    #[error("invalid API url {url}: {source}")]
    InvalidApiUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("API url cannot carry a path: {0}")]
    UnusableApiUrl(String),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid JSON from backend: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },
}
