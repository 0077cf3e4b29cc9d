use std::{sync::Arc, time::Duration};

use futures::{stream::FuturesUnordered, StreamExt};
use shared::{
    domain::{OperationKey, TargetId},
    protocol::RemoteCallResult,
};
use tracing::{info, warn};

use crate::{
    backend::RemoteCall,
    error::DispatchError,
    store::{Severity, Store},
};

pub const DEFAULT_RECONCILE_FALLBACK: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub key: OperationKey,
    pub name: String,
}

impl Operation {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: OperationKey::new(key),
            name: name.into(),
        }
    }

    /// Operation labelled by its key.
    pub fn keyed(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key: OperationKey(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Succeeded { duration_ms: Option<u64> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub operation: Operation,
    pub targets: Vec<TargetId>,
    pub success_count: usize,
    pub failure_count: usize,
    pub max_observed_duration_ms: Option<u64>,
    /// When the completion reconciliation fires; `None` if every call failed.
    pub reconcile_after: Option<Duration>,
    pub outcomes: Vec<(TargetId, TargetOutcome)>,
}

impl DispatchSummary {
    pub fn all_failed(&self) -> bool {
        self.success_count == 0
    }
}

#[derive(Clone)]
pub struct TaskDispatcher {
    store: Store,
    remote: Arc<dyn RemoteCall>,
    reconcile_fallback: Duration,
}

impl TaskDispatcher {
    pub fn new(store: Store, remote: Arc<dyn RemoteCall>) -> Self {
        Self {
            store,
            remote,
            reconcile_fallback: DEFAULT_RECONCILE_FALLBACK,
        }
    }

    pub fn with_reconcile_fallback(mut self, fallback: Duration) -> Self {
        self.reconcile_fallback = fallback;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Dispatches to whatever is currently selected in the store.
    pub async fn run_on_selected(
        &self,
        operation: &Operation,
    ) -> Result<DispatchSummary, DispatchError> {
        let targets: Vec<TargetId> = self
            .store
            .read(|state| state.selected_targets.iter().copied().collect());
        self.run_on_targets(&targets, operation).await
    }

    pub async fn run_on_targets(
        &self,
        targets: &[TargetId],
        operation: &Operation,
    ) -> Result<DispatchSummary, DispatchError> {
        if targets.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        self.store
            .set_operation_running(operation.key.clone(), targets.len(), None);
        info!(
            operation = %operation.key,
            targets = targets.len(),
            "dispatch: fanning out"
        );

        let mut pending: FuturesUnordered<_> = targets
            .iter()
            .map(|&target| {
                let remote = Arc::clone(&self.remote);
                let key = operation.key.clone();
                async move { (target, remote.call(target, &key).await) }
            })
            .collect();

        let mut summary = DispatchSummary {
            operation: operation.clone(),
            targets: targets.to_vec(),
            success_count: 0,
            failure_count: 0,
            max_observed_duration_ms: None,
            reconcile_after: None,
            outcomes: Vec::with_capacity(targets.len()),
        };

        while let Some((target, result)) = pending.next().await {
            let outcome = match result {
                Ok(RemoteCallResult {
                    success: true,
                    duration_ms,
                    ..
                }) => TargetOutcome::Succeeded { duration_ms },
                Ok(RemoteCallResult { error, .. }) => {
                    TargetOutcome::Failed(error.unwrap_or_else(|| "unknown error".to_string()))
                }
                Err(err) => TargetOutcome::Failed(format!("network error: {err}")),
            };
            self.record_outcome(&mut summary, target, outcome);
        }

        if summary.all_failed() {
            self.store.clear_operation(&operation.key);
            self.store.append_log_entry(
                format!("✗ \"{}\" failed on all {} target(s)", operation.name, targets.len()),
                Severity::Fail,
            );
            warn!(operation = %operation.key, "dispatch: all targets failed");
            return Ok(summary);
        }

        let wait = summary
            .max_observed_duration_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.reconcile_fallback);
        self.store
            .set_operation_estimate(&operation.key, wait.as_millis() as u64);
        summary.reconcile_after = Some(wait);
        info!(
            operation = %operation.key,
            succeeded = summary.success_count,
            failed = summary.failure_count,
            wait_ms = wait.as_millis() as u64,
            "dispatch: running"
        );

        let store = self.store.clone();
        let operation = operation.clone();
        let targets = targets.to_vec();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            reconcile(&store, &operation, &targets);
        });

        Ok(summary)
    }

    fn record_outcome(
        &self,
        summary: &mut DispatchSummary,
        target: TargetId,
        outcome: TargetOutcome,
    ) {
        match &outcome {
            TargetOutcome::Succeeded { duration_ms } => {
                summary.success_count += 1;
                if let Some(ms) = duration_ms {
                    summary.max_observed_duration_ms =
                        Some(summary.max_observed_duration_ms.map_or(*ms, |max| max.max(*ms)));
                }
                self.store.append_log_entry(
                    format!("▶ \"{}\" → target #{target}", summary.operation.name),
                    Severity::Active,
                );
            }
            TargetOutcome::Failed(reason) => {
                summary.failure_count += 1;
                let err = DispatchError::Target {
                    target,
                    reason: reason.clone(),
                };
                warn!(operation = %summary.operation.key, "dispatch: {err}");
                self.store
                    .append_log_entry(format!("✗ Failed #{target}: {reason}"), Severity::Fail);
            }
        }
        summary.outcomes.push((target, outcome));
    }
}

// Every originally dispatched target gets a "completed" line, including
// the ones whose call failed.
fn reconcile(store: &Store, operation: &Operation, targets: &[TargetId]) {
    store.clear_operation(&operation.key);
    for target in targets {
        store.append_log_entry(
            format!("✓ \"{}\" completed on target #{target}", operation.name),
            Severity::Done,
        );
    }
    info!(operation = %operation.key, "dispatch: reconciled");
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
