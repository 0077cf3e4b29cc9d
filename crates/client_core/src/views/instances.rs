use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Local;
use shared::protocol::InstanceSummary;
use tokio::{
    sync::Notify,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::{View, ViewContext, ViewResources};
use crate::panels::NotificationKind;

pub const ID: &str = "instances";
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Presentation-only ring that shows how far the next auto refresh is.
/// It has nothing to do with elapsed time of running operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshCountdown {
    interval_secs: u64,
    elapsed_secs: u64,
    enabled: bool,
}

impl RefreshCountdown {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.max(1),
            elapsed_secs: 0,
            enabled: true,
        }
    }

    /// One second passed. Frozen while disabled.
    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        self.elapsed_secs = (self.elapsed_secs + 1) % self.interval_secs;
    }

    pub fn reset(&mut self) {
        self.elapsed_secs = 0;
    }

    pub fn set_interval(&mut self, interval_secs: u64) {
        self.interval_secs = interval_secs.max(1);
        self.reset();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Fraction of the interval used up, in `0.0..1.0`.
    pub fn progress(&self) -> f64 {
        self.elapsed_secs as f64 / self.interval_secs as f64
    }
}

impl Default for RefreshCountdown {
    fn default() -> Self {
        Self::new(5)
    }
}

#[derive(Default)]
struct InstancesLive {
    instances: Vec<InstanceSummary>,
    countdown: RefreshCountdown,
    last_refresh: Option<String>,
    fetches: u64,
}

fn lock(live: &Mutex<InstancesLive>) -> MutexGuard<'_, InstancesLive> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn fetch(ctx: &ViewContext, live: &Mutex<InstancesLive>, loud: bool) {
    match ctx.fleet.list_instances().await {
        Ok(instances) => {
            ctx.panels.devices.sync(&instances);
            let mut live = lock(live);
            live.instances = instances;
            live.last_refresh = Some(Local::now().format("%H:%M:%S").to_string());
            live.fetches += 1;
        }
        Err(err) if loud => {
            warn!("instances: fetch failed: {err:#}");
            ctx.panels.notifications.push(
                NotificationKind::Error,
                "Error",
                "Failed to fetch emulator instances",
            );
        }
        Err(err) => debug!("instances: background fetch failed: {err:#}"),
    }
}

/// Emulator instances with auto refresh.
pub struct InstancesView {
    ctx: Option<ViewContext>,
    auto_refresh: bool,
    refresh_secs: u64,
    live: Arc<Mutex<InstancesLive>>,
    resources: ViewResources,
}

impl Default for InstancesView {
    fn default() -> Self {
        Self {
            ctx: None,
            auto_refresh: true,
            refresh_secs: 5,
            live: Arc::default(),
            resources: ViewResources::default(),
        }
    }
}

impl InstancesView {
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    pub fn refresh_secs(&self) -> u64 {
        self.refresh_secs
    }

    pub fn countdown(&self) -> RefreshCountdown {
        lock(&self.live).countdown
    }

    pub fn instances(&self) -> Vec<InstanceSummary> {
        lock(&self.live).instances.clone()
    }

    pub fn fetches(&self) -> u64 {
        lock(&self.live).fetches
    }

    pub fn last_refresh(&self) -> Option<String> {
        lock(&self.live).last_refresh.clone()
    }

    /// `(total, running, stopped)`
    pub fn stats(&self) -> (usize, usize, usize) {
        let live = lock(&self.live);
        let total = live.instances.len();
        let running = live
            .instances
            .iter()
            .filter(|instance| instance.status.is_running())
            .count();
        (total, running, total - running)
    }

    pub fn is_polling(&self) -> bool {
        self.resources.has_timer("poll")
    }

    pub fn manual_refresh(&mut self) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        lock(&self.live).countdown.reset();
        let live = Arc::clone(&self.live);
        self.resources
            .spawn("fetch", async move { fetch(&ctx, &live, true).await });
    }

    pub fn toggle_auto_refresh(&mut self) -> bool {
        self.auto_refresh = !self.auto_refresh;
        lock(&self.live).countdown.set_enabled(self.auto_refresh);
        self.setup_polling();
        self.auto_refresh
    }

    pub fn set_refresh_interval(&mut self, secs: u64) {
        self.refresh_secs = secs.max(1);
        lock(&self.live).countdown.set_interval(self.refresh_secs);
        self.setup_polling();
    }

    fn setup_polling(&mut self) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        if !self.auto_refresh {
            self.resources.cancel("poll");
            return;
        }
        let live = Arc::clone(&self.live);
        let period = Duration::from_secs(self.refresh_secs);
        self.resources.spawn("poll", async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                fetch(&ctx, &live, false).await;
            }
        });
    }
}

impl View for InstancesView {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Emulators"
    }

    fn render(&self) -> String {
        "[stats] total | running | stopped\n[auto refresh] [Refresh]\n[instances]".into()
    }

    fn init(&mut self, ctx: &ViewContext) -> anyhow::Result<()> {
        self.ctx = Some(ctx.clone());
        self.auto_refresh = true;
        self.refresh_secs = ctx.settings.instances_refresh_secs.max(1);
        lock(&self.live).countdown = RefreshCountdown::new(self.refresh_secs);

        let task_ctx = ctx.clone();
        let live = Arc::clone(&self.live);
        self.resources
            .spawn("fetch", async move { fetch(&task_ctx, &live, true).await });
        self.setup_polling();

        let live = Arc::clone(&self.live);
        self.resources.every("countdown", COUNTDOWN_TICK, move || {
            lock(&live).countdown.tick();
        });

        // A finished scan usually changes what the fleet reports.
        let wake = Arc::new(Notify::new());
        let notify = Arc::clone(&wake);
        self.resources.listen(&ctx.channel, "scan_completed", move |_| {
            notify.notify_one();
        });
        let task_ctx = ctx.clone();
        let live = Arc::clone(&self.live);
        self.resources.spawn("rescan", async move {
            loop {
                wake.notified().await;
                fetch(&task_ctx, &live, false).await;
            }
        });
        Ok(())
    }

    fn destroy(&mut self) {
        self.resources.release();
        self.ctx = None;
    }

    fn live_region(&self) -> String {
        let (total, running, stopped) = self.stats();
        let live = lock(&self.live);
        let countdown = live.countdown;
        let mut out = format!(
            "total {total} | running {running} | stopped {stopped} | next refresh {}/{}s{}",
            countdown.elapsed_secs(),
            countdown.interval_secs(),
            if countdown.is_enabled() { "" } else { " (paused)" },
        );
        if let Some(at) = &live.last_refresh {
            out.push_str(&format!(" | updated {at}"));
        }
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
#[path = "tests/instances_tests.rs"]
mod tests;
