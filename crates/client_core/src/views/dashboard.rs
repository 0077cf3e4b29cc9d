use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard},
};

use shared::{domain::InstanceStatus, protocol::InstanceSummary};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{View, ViewContext, ViewResources};
use crate::panels::NotificationKind;

pub const ID: &str = "dashboard";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetCounters {
    pub total: usize,
    pub online: usize,
    pub busy: usize,
    pub error: usize,
}

impl FleetCounters {
    pub fn tally(instances: &[InstanceSummary]) -> Self {
        let count = |status: InstanceStatus| instances.iter().filter(|i| i.status == status).count();
        Self {
            total: instances.len(),
            online: count(InstanceStatus::Online),
            busy: count(InstanceStatus::Busy),
            error: count(InstanceStatus::Error),
        }
    }
}

#[derive(Default)]
struct DashboardLive {
    counters: FleetCounters,
    instances: Vec<InstanceSummary>,
    updates: u64,
}

fn lock(live: &Mutex<DashboardLive>) -> MutexGuard<'_, DashboardLive> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fleet overview. Refreshes the device list on mount, then polls it.
#[derive(Default)]
pub struct DashboardView {
    live: Arc<Mutex<DashboardLive>>,
    resources: ViewResources,
}

impl DashboardView {
    pub fn counters(&self) -> FleetCounters {
        lock(&self.live).counters
    }

    pub fn instances(&self) -> Vec<InstanceSummary> {
        lock(&self.live).instances.clone()
    }

    /// Number of successful fleet fetches since the view was created.
    pub fn updates(&self) -> u64 {
        lock(&self.live).updates
    }
}

fn apply(ctx: &ViewContext, live: &Mutex<DashboardLive>, instances: Vec<InstanceSummary>) {
    ctx.panels.devices.sync(&instances);
    let mut live = lock(live);
    live.counters = FleetCounters::tally(&instances);
    live.instances = instances;
    live.updates += 1;
}

impl View for DashboardView {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Dashboard"
    }

    fn render(&self) -> String {
        "[stats] total | online | busy | error\n[devices]\n[Refresh] [Scan All]".into()
    }

    fn init(&mut self, ctx: &ViewContext) -> anyhow::Result<()> {
        let ctx = ctx.clone();
        let live = Arc::clone(&self.live);
        let period = ctx.settings.dashboard_poll;
        self.resources.spawn("poll", async move {
            match ctx.fleet.refresh_instances().await {
                Ok(instances) => apply(&ctx, &live, instances),
                Err(err) => {
                    warn!("dashboard: refresh failed: {err:#}");
                    ctx.panels.notifications.push(
                        NotificationKind::Error,
                        "Connection Error",
                        "Could not reach backend server",
                    );
                }
            }

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match ctx.fleet.list_instances().await {
                    Ok(instances) => apply(&ctx, &live, instances),
                    Err(err) => debug!("dashboard: poll failed: {err:#}"),
                }
            }
        });
        Ok(())
    }

    fn destroy(&mut self) {
        self.resources.release();
    }

    fn live_region(&self) -> String {
        let live = lock(&self.live);
        let FleetCounters {
            total,
            online,
            busy,
            error,
        } = live.counters;
        let mut out = format!("total {total} | online {online} | busy {busy} | error {error}");
        for instance in &live.instances {
            out.push_str(&format!("\n  {} {}", instance.serial, instance.status.label()));
        }
        out
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
