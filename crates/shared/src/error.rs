use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the backend on non-2xx responses. Older routes
/// report `detail` instead of `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn message(&self) -> Option<&str> {
        self.error.as_deref().or(self.detail.as_deref())
    }
}

#[derive(Debug, Error)]
#[error("HTTP {status}: {message}")]
pub struct ApiException {
    pub status: u16,
    pub message: String,
}

impl ApiException {
    pub fn from_body(status: u16, reason: &str, body: Option<ApiError>) -> Self {
        let message = body
            .as_ref()
            .and_then(ApiError::message)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP Error {status}: {reason}"));
        Self { status, message }
    }
}
