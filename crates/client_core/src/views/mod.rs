use std::{any::Any, future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    backend::FleetApi,
    channel::{EventChannel, HandlerId},
    dispatcher::{DispatchSummary, Operation, TaskDispatcher},
    error::{DispatchError, NavigationError},
    panels::{NotificationKind, Panels},
    store::{Store, Subscription},
};

pub mod dashboard;
pub mod instances;
pub mod runner;

pub use dashboard::{DashboardView, FleetCounters};
pub use instances::{InstancesView, RefreshCountdown};
pub use runner::{RunnerView, RunningCard};

#[derive(Debug, Clone, Copy)]
pub struct ViewSettings {
    pub dashboard_poll: Duration,
    pub instances_refresh_secs: u64,
    pub ui_tick: Duration,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            dashboard_poll: Duration::from_secs(3),
            instances_refresh_secs: 5,
            ui_tick: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct ViewContext {
    pub store: Store,
    pub channel: EventChannel,
    pub dispatcher: TaskDispatcher,
    pub fleet: Arc<dyn FleetApi>,
    pub panels: Panels,
    pub settings: ViewSettings,
}

impl ViewContext {
    pub async fn run_selected(
        &self,
        operation: &Operation,
    ) -> Result<DispatchSummary, DispatchError> {
        let notifications = &self.panels.notifications;
        let summary = match self.dispatcher.run_on_selected(operation).await {
            Ok(summary) => summary,
            Err(err) => {
                notifications.push(
                    NotificationKind::Warning,
                    "No emulator selected",
                    "Select at least one emulator before running an action.",
                );
                return Err(err);
            }
        };

        let name = &operation.name;
        if summary.all_failed() {
            notifications.push(
                NotificationKind::Error,
                "Action Failed",
                format!("\"{name}\" failed on all {} target(s)", summary.targets.len()),
            );
        } else if summary.failure_count == 0 {
            notifications.push(
                NotificationKind::Success,
                "Action Started",
                format!("\"{name}\" running on {} target(s)", summary.success_count),
            );
        } else {
            notifications.push(
                NotificationKind::Warning,
                "Action Partially Started",
                format!(
                    "\"{name}\" running on {} target(s), {} failed",
                    summary.success_count, summary.failure_count
                ),
            );
        }
        Ok(summary)
    }
}

/// Resources a mounted view holds. Dropping or releasing the bag frees all
/// of them; releasing an empty or partly filled bag is fine.
#[derive(Default)]
pub struct ViewResources {
    subscriptions: Vec<Subscription>,
    handlers: Vec<(EventChannel, String, HandlerId)>,
    timers: Vec<(&'static str, JoinHandle<()>)>,
}

impl ViewResources {
    pub fn hold(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn listen(
        &mut self,
        channel: &EventChannel,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = channel.on(event, handler);
        self.handlers.push((channel.clone(), event.to_string(), id));
        id
    }

    /// Spawns a task owned by the view. A running task with the same name
    /// is aborted first.
    pub fn spawn(&mut self, name: &'static str, task: impl Future<Output = ()> + Send + 'static) {
        self.cancel(name);
        self.timers.push((name, tokio::spawn(task)));
    }

    pub fn every(&mut self, name: &'static str, period: Duration, mut tick: impl FnMut() + Send + 'static) {
        self.spawn(name, async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick();
            }
        });
    }

    pub fn cancel(&mut self, name: &str) -> bool {
        let before = self.timers.len();
        self.timers.retain(|(timer, handle)| {
            if *timer == name {
                handle.abort();
                false
            } else {
                true
            }
        });
        self.timers.len() != before
    }

    pub fn has_timer(&self, name: &str) -> bool {
        self.timers
            .iter()
            .any(|(timer, handle)| *timer == name && !handle.is_finished())
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.handlers.is_empty() && self.timers.is_empty()
    }

    pub fn release(&mut self) {
        for (_, handle) in self.timers.drain(..) {
            handle.abort();
        }
        for (channel, event, id) in self.handlers.drain(..) {
            channel.off(&event, id);
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.release();
        }
    }
}

impl Drop for ViewResources {
    fn drop(&mut self) {
        self.release();
    }
}

pub trait View: Send + 'static {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    /// Static structure produced before `init` runs.
    fn render(&self) -> String;
    fn init(&mut self, ctx: &ViewContext) -> anyhow::Result<()>;
    /// Must release everything `init` acquired, even if `init` failed
    /// halfway.
    fn destroy(&mut self);
    fn live_region(&self) -> String {
        String::new()
    }
    fn wants_events(&self) -> bool {
        false
    }
    fn on_channel_event(&mut self, _event: &str, _data: &Value) {}
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct ViewManager {
    ctx: ViewContext,
    views: Vec<Box<dyn View>>,
    active: Option<usize>,
    frame: String,
}

impl ViewManager {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            views: Vec::new(),
            active: None,
            frame: String::new(),
        }
    }

    pub fn with_default_views(ctx: ViewContext) -> Self {
        let mut manager = Self::new(ctx);
        manager.register(DashboardView::default());
        manager.register(RunnerView::default());
        manager.register(InstancesView::default());
        manager
    }

    pub fn context(&self) -> &ViewContext {
        &self.ctx
    }

    /// Registers a view, replacing an unmounted one with the same id.
    pub fn register(&mut self, view: impl View) {
        let view: Box<dyn View> = Box::new(view);
        match self.views.iter().position(|known| known.id() == view.id()) {
            Some(index) if Some(index) == self.active => {
                warn!(view = view.id(), "views: cannot replace the mounted view");
            }
            Some(index) => self.views[index] = view,
            None => self.views.push(view),
        }
    }

    pub fn active_view(&self) -> Option<&'static str> {
        self.active.map(|index| self.views[index].id())
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn live_region(&self) -> Option<String> {
        self.active.map(|index| self.views[index].live_region())
    }

    /// Tears down the mounted view, then mounts `id`. An unknown id leaves
    /// the current view mounted. A view whose `init` fails stays active so
    /// its `destroy` still runs on the next navigation.
    pub fn navigate(&mut self, id: &str) -> Result<(), NavigationError> {
        let Some(next) = self.views.iter().position(|view| view.id() == id) else {
            return Err(NavigationError::UnknownView(id.to_string()));
        };

        self.unmount();

        let view = &mut self.views[next];
        self.frame = format!("== {} ==\n{}", view.title(), view.render());
        self.active = Some(next);
        info!(view = id, "views: mounted");
        if let Err(err) = view.init(&self.ctx) {
            warn!(view = id, "views: init failed: {err:#}");
        }
        Ok(())
    }

    pub fn unmount(&mut self) {
        if let Some(current) = self.active.take() {
            let view = &mut self.views[current];
            view.destroy();
            debug!(view = view.id(), "views: destroyed");
            self.frame.clear();
        }
    }

    /// Feeds the process-wide panels, then the mounted view if it asked
    /// for channel events.
    pub fn route_event(&mut self, event: &str, data: &Value) {
        self.ctx.panels.handle_event(event, data);
        if let Some(index) = self.active {
            let view = &mut self.views[index];
            if view.wants_events() {
                view.on_channel_event(event, data);
            }
        }
    }

    pub fn active_as<T: View>(&mut self) -> Option<&mut T> {
        let index = self.active?;
        self.views[index].as_any_mut().downcast_mut::<T>()
    }
}

impl Drop for ViewManager {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
