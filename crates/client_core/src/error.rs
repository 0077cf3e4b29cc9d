use shared::domain::TargetId;
use storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("origin '{0}' must start with http:// or https://")]
    UnsupportedOrigin(String),
    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
    #[error("failed to open event channel to {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("event channel dropped: {0}")]
    Dropped(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no targets selected")]
    NoTargets,
    #[error("target #{target} failed: {reason}")]
    Target { target: TargetId, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum MalformedMessageError {
    #[error("non-json frame: {0}")]
    NotJson(String),
    #[error("frame is not an event envelope: {0}")]
    NotEnvelope(String),
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("unknown view '{0}'")]
    UnknownView(String),
}
