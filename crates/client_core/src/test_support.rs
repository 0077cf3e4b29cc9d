use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{InstanceStatus, OperationKey, TargetId},
    protocol::{InstanceSummary, RemoteCallResult},
};

use crate::{
    backend::{FleetApi, RemoteCall},
    channel::EventChannel,
    dispatcher::TaskDispatcher,
    panels::Panels,
    store::Store,
    views::{ViewContext, ViewSettings},
};

pub(crate) fn instance(serial: &str, status: InstanceStatus) -> InstanceSummary {
    InstanceSummary {
        serial: serial.to_string(),
        status,
        index: None,
        name: None,
        task_type: None,
        data: None,
    }
}

#[derive(Default)]
pub(crate) struct FakeFleet {
    instances: Mutex<Vec<InstanceSummary>>,
    failing: AtomicBool,
    lists: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeFleet {
    pub(crate) fn with(instances: Vec<InstanceSummary>) -> Arc<Self> {
        let fleet = Self::default();
        *fleet.instances.lock().expect("instances") = instances;
        Arc::new(fleet)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_instances(&self, instances: Vec<InstanceSummary>) {
        *self.instances.lock().expect("instances") = instances;
    }

    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<Vec<InstanceSummary>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("backend down"));
        }
        Ok(self.instances.lock().expect("instances").clone())
    }
}

#[async_trait]
impl FleetApi for FakeFleet {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.answer()
    }

    async fn refresh_instances(&self) -> Result<Vec<InstanceSummary>> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.answer()
    }
}

/// Succeeds on every target except the listed ones.
pub(crate) struct FakeRemote {
    pub(crate) duration_ms: Option<u64>,
    pub(crate) failing: Vec<TargetId>,
}

#[async_trait]
impl RemoteCall for FakeRemote {
    async fn call(&self, target: TargetId, _operation: &OperationKey) -> Result<RemoteCallResult> {
        if self.failing.contains(&target) {
            return Ok(RemoteCallResult::failed("Instance not running"));
        }
        Ok(RemoteCallResult::ok(self.duration_ms))
    }
}

/// Context around `store` whose channel is never connected.
pub(crate) fn context(store: Store, fleet: Arc<FakeFleet>, remote: FakeRemote) -> ViewContext {
    ViewContext {
        dispatcher: TaskDispatcher::new(store.clone(), Arc::new(remote)),
        panels: Panels::new(store.clone()),
        channel: EventChannel::new("ws://127.0.0.1:1/ws"),
        fleet,
        store,
        settings: ViewSettings::default(),
    }
}

pub(crate) fn quiet_remote() -> FakeRemote {
    FakeRemote {
        duration_ms: Some(4_000),
        failing: Vec::new(),
    }
}
