use thiserror::Error;

/// Failures talking to the remote batch service.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level failure: connect, timeout, TLS or HTTP status.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered, but the payload is not shaped as documented.
    #[error("malformed response: {0}")]
    Protocol(String),
}

/// Unrecoverable failure of a whole refresh cycle.
///
/// Per-category fetch problems never show up here; they are carried inside
/// the refresh outcome instead.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to resolve latest batch: {0}")]
    BatchResolution(#[source] SourceError),
    #[error("failed to list categories: {0}")]
    CategoryListing(#[source] SourceError),
}

/// A story or category record that does not satisfy the model invariants.
///
/// At list level these become skipped records, not call failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("story cluster has no articles")]
    NoArticles,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a configuration directory")]
    NoConfigDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
