use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    backend::{FleetApi, HttpBackend, RemoteCall},
    channel::{ChannelTimings, EventChannel, HandlerId, WILDCARD},
    dispatcher::{DispatchSummary, Operation, TaskDispatcher, DEFAULT_RECONCILE_FALLBACK},
    error::{ConnectivityError, DispatchError, NavigationError},
    panels::Panels,
    store::Store,
    views::{View, ViewContext, ViewManager, ViewSettings},
};

#[derive(Debug, Clone)]
pub struct PanelOptions {
    pub views: ViewSettings,
    pub channel: ChannelTimings,
    pub reconcile_fallback: Duration,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            views: ViewSettings::default(),
            channel: ChannelTimings::default(),
            reconcile_fallback: DEFAULT_RECONCILE_FALLBACK,
        }
    }
}

fn lock(manager: &Mutex<ViewManager>) -> MutexGuard<'_, ViewManager> {
    manager.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ControlPanel {
    ctx: ViewContext,
    manager: Arc<Mutex<ViewManager>>,
    router: Option<HandlerId>,
    connectivity: Option<JoinHandle<()>>,
}

impl ControlPanel {
    pub fn new(
        store: Store,
        channel: EventChannel,
        remote: Arc<dyn RemoteCall>,
        fleet: Arc<dyn FleetApi>,
        options: &PanelOptions,
    ) -> Self {
        let dispatcher = TaskDispatcher::new(store.clone(), remote)
            .with_reconcile_fallback(options.reconcile_fallback);
        let ctx = ViewContext {
            panels: Panels::new(store.clone()),
            store,
            channel,
            dispatcher,
            fleet,
            settings: options.views,
        };
        let manager = ViewManager::with_default_views(ctx.clone());
        Self {
            ctx,
            manager: Arc::new(Mutex::new(manager)),
            router: None,
            connectivity: None,
        }
    }

    pub fn over_http(
        store: Store,
        origin: &str,
        options: &PanelOptions,
    ) -> Result<Self, ConnectivityError> {
        let url = crate::channel::ws_url_from_origin(origin)?;
        let channel = EventChannel::with_timings(url, options.channel);
        let backend = Arc::new(HttpBackend::new(origin));
        Ok(Self::new(
            store,
            channel,
            backend.clone(),
            backend,
            options,
        ))
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn channel(&self) -> &EventChannel {
        &self.ctx.channel
    }

    pub fn panels(&self) -> &Panels {
        &self.ctx.panels
    }

    pub fn context(&self) -> &ViewContext {
        &self.ctx
    }

    /// Routes every channel event through the view manager, mirrors
    /// connectivity into the indicator and opens the channel. Calling it
    /// twice is a no-op.
    pub fn start(&mut self) {
        if self.router.is_some() {
            return;
        }
        let manager = Arc::clone(&self.manager);
        self.router = Some(
            self.ctx
                .channel
                .on_any(move |event, data| lock(&manager).route_event(event, data)),
        );

        let indicator = self.ctx.panels.connectivity.clone();
        let mut state = self.ctx.channel.watch_state();
        self.connectivity = Some(tokio::spawn(async move {
            loop {
                indicator.set(*state.borrow_and_update());
                if state.changed().await.is_err() {
                    break;
                }
            }
        }));

        info!(url = %self.ctx.channel.url(), "panel: starting");
        self.ctx.channel.connect();
    }

    pub fn navigate(&self, view: &str) -> Result<(), NavigationError> {
        lock(&self.manager).navigate(view)
    }

    pub fn active_view(&self) -> Option<&'static str> {
        lock(&self.manager).active_view()
    }

    pub fn frame(&self) -> String {
        lock(&self.manager).frame().to_string()
    }

    pub fn live_region(&self) -> Option<String> {
        lock(&self.manager).live_region()
    }

    pub fn with_view<T: View, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        lock(&self.manager).active_as::<T>().map(f)
    }

    pub async fn run_operation(
        &self,
        operation: &Operation,
    ) -> Result<DispatchSummary, DispatchError> {
        self.ctx.run_selected(operation).await
    }

    /// Unmounts the active view and detaches from the channel. In-flight
    /// dispatches keep running.
    pub fn shutdown(&mut self) {
        lock(&self.manager).unmount();
        if let Some(router) = self.router.take() {
            self.ctx.channel.off(WILDCARD, router);
        }
        if let Some(task) = self.connectivity.take() {
            task.abort();
        }
        debug!("panel: shut down");
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
