use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{OperationKey, TargetId},
    error::{ApiError, ApiException},
    protocol::{InstanceSummary, RefreshInstancesResponse, RemoteCallResult},
};
use tracing::debug;

/// Runs one operation on one target. The dispatcher treats the transport
/// behind this as opaque.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, target: TargetId, operation: &OperationKey) -> Result<RemoteCallResult>;
}

/// Fleet queries the polling views issue.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>>;
    async fn refresh_instances(&self) -> Result<Vec<InstanceSummary>>;
}

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    origin: String,
}

impl HttpBackend {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.origin, path)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.json::<ApiError>().await.ok();
        return Err(ApiException::from_body(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown status"),
            body,
        )
        .into());
    }
    response
        .json::<T>()
        .await
        .context("failed to decode backend response")
}

#[async_trait]
impl RemoteCall for HttpBackend {
    async fn call(&self, target: TargetId, operation: &OperationKey) -> Result<RemoteCallResult> {
        debug!(target = target.0, operation = %operation, "backend: run operation");
        let response = self
            .http
            .post(self.url("/api/macros/run"))
            .query(&[
                ("index", target.0.to_string()),
                ("filename", operation.as_str().to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("failed to reach backend for target #{target}"))?;
        decode(response).await
    }
}

#[async_trait]
impl FleetApi for HttpBackend {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
        let response = self
            .http
            .get(self.url("/api/devices"))
            .send()
            .await
            .context("failed to reach backend")?;
        decode(response).await
    }

    async fn refresh_instances(&self) -> Result<Vec<InstanceSummary>> {
        let response = self
            .http
            .post(self.url("/api/devices/refresh"))
            .send()
            .await
            .context("failed to reach backend")?;
        let body: RefreshInstancesResponse = decode(response).await?;
        Ok(body.devices)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
