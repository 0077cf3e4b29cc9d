use std::{
    any::Any,
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde_json::Value;
use shared::domain::OperationKey;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{View, ViewContext, ViewResources};
use crate::{
    dispatcher::{DispatchSummary, Operation},
    error::DispatchError,
    store::{format_elapsed, now_millis, StoreState, DEFAULT_TAB},
};

pub const ID: &str = "runner";
pub const TABS: [&str; 4] = ["emulators", "recorder", "scan", "install-apps"];
const TAPE_CAP: usize = 50;

/// One running operation as the actions page shows it. Elapsed time is
/// always derived from the stored start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningCard {
    pub key: OperationKey,
    pub target_count: usize,
    pub elapsed: String,
    pub estimate: Option<String>,
}

#[derive(Default)]
struct RunnerLive {
    feed: Vec<String>,
    selected: usize,
    cards: Vec<RunningCard>,
    tape: VecDeque<String>,
    refreshes: u64,
}

impl RunnerLive {
    fn derive(&mut self, state: &StoreState, now_ms: i64) {
        self.feed = state
            .activity_log
            .iter()
            .map(|entry| format!("{} {}", entry.time_str, entry.message))
            .collect();
        self.selected = state.selected_targets.len();
        self.cards = state
            .running_operations
            .iter()
            .map(|(key, record)| RunningCard {
                key: key.clone(),
                target_count: record.target_count,
                elapsed: format_elapsed(record.elapsed_at(now_ms)),
                estimate: record
                    .estimated_duration_ms
                    .map(|ms| format_elapsed(Duration::from_millis(ms))),
            })
            .collect();
        self.refreshes += 1;
    }
}

fn lock(live: &Mutex<RunnerLive>) -> MutexGuard<'_, RunnerLive> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Actions page: activity feed, target count and running operations.
pub struct RunnerView {
    tab: String,
    ctx: Option<ViewContext>,
    live: Arc<Mutex<RunnerLive>>,
    resources: ViewResources,
}

impl Default for RunnerView {
    fn default() -> Self {
        Self {
            tab: DEFAULT_TAB.to_string(),
            ctx: None,
            live: Arc::default(),
            resources: ViewResources::default(),
        }
    }
}

impl RunnerView {
    pub fn tab(&self) -> &str {
        &self.tab
    }

    /// Switches tab and remembers it across navigation. Unknown tabs are
    /// rejected.
    pub fn select_tab(&mut self, tab: &str) -> bool {
        if !TABS.contains(&tab) {
            return false;
        }
        self.tab = tab.to_string();
        if let Some(ctx) = &self.ctx {
            ctx.store.set_active_tab(tab);
        }
        true
    }

    pub fn feed(&self) -> Vec<String> {
        lock(&self.live).feed.clone()
    }

    pub fn selected_count(&self) -> usize {
        lock(&self.live).selected
    }

    pub fn cards(&self) -> Vec<RunningCard> {
        lock(&self.live).cards.clone()
    }

    pub fn tape(&self) -> Vec<String> {
        lock(&self.live).tape.iter().cloned().collect()
    }

    pub fn refreshes(&self) -> u64 {
        lock(&self.live).refreshes
    }

    /// Starts `operation` on the selected targets. The dispatch is not tied
    /// to this view and keeps going after it is destroyed. `None` while the
    /// view is not mounted.
    pub fn run(
        &self,
        operation: Operation,
    ) -> Option<JoinHandle<Result<DispatchSummary, DispatchError>>> {
        let ctx = self.ctx.clone()?;
        Some(tokio::spawn(async move { ctx.run_selected(&operation).await }))
    }
}

impl View for RunnerView {
    fn id(&self) -> &'static str {
        ID
    }

    fn title(&self) -> &'static str {
        "Actions"
    }

    fn render(&self) -> String {
        let tabs: Vec<String> = TABS
            .iter()
            .map(|tab| {
                if *tab == self.tab {
                    format!("[{tab}]")
                } else {
                    tab.to_string()
                }
            })
            .collect();
        format!("{}\n[targets]\n[running]\n[live feed]", tabs.join(" | "))
    }

    fn init(&mut self, ctx: &ViewContext) -> anyhow::Result<()> {
        self.ctx = Some(ctx.clone());

        let stored = ctx.store.read(|state| state.active_tab.clone());
        self.tab = if TABS.contains(&stored.as_str()) {
            stored
        } else {
            DEFAULT_TAB.to_string()
        };

        ctx.store
            .read(|state| lock(&self.live).derive(state, now_millis()));

        let live = Arc::clone(&self.live);
        self.resources.hold(
            ctx.store
                .subscribe(move |state| lock(&live).derive(state, now_millis())),
        );

        let live = Arc::clone(&self.live);
        let store = ctx.store.clone();
        self.resources.every("ui-tick", ctx.settings.ui_tick, move || {
            store.read(|state| lock(&live).derive(state, now_millis()));
        });
        Ok(())
    }

    fn destroy(&mut self) {
        self.resources.release();
        self.ctx = None;
    }

    fn live_region(&self) -> String {
        let live = lock(&self.live);
        let mut out = format!("{} emulator(s) selected", live.selected);
        for card in &live.cards {
            out.push_str(&format!(
                "\n  {} on {} emulator(s) {}",
                card.key, card.target_count, card.elapsed
            ));
        }
        for line in live.feed.iter().take(10) {
            out.push_str(&format!("\n  {line}"));
        }
        out
    }

    fn wants_events(&self) -> bool {
        true
    }

    fn on_channel_event(&mut self, event: &str, data: &Value) {
        if !event.starts_with("task_") {
            return;
        }
        let serial = data.get("serial").and_then(Value::as_str).unwrap_or("?");
        let detail = data
            .get("step")
            .or_else(|| data.get("status"))
            .and_then(Value::as_str)
            .unwrap_or(event);
        debug!(event, serial, "runner: event");
        let mut live = lock(&self.live);
        live.tape.push_front(format!("[{serial}] {detail}"));
        live.tape.truncate(TAPE_CAP);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/runner_tests.rs"]
mod tests;
