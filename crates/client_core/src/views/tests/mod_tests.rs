use super::*;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use anyhow::anyhow;
use serde_json::json;
use shared::domain::{InstanceStatus, TargetId};

use crate::{
    store::Severity,
    test_support::{context, instance, quiet_remote, FakeFleet, FakeRemote},
};

#[derive(Default)]
struct Probe {
    inits: AtomicUsize,
    destroys: AtomicUsize,
    events: Mutex<Vec<String>>,
}

struct ProbeView {
    id: &'static str,
    fail_init: bool,
    wants_events: bool,
    probe: Arc<Probe>,
    resources: ViewResources,
}

impl ProbeView {
    fn new(id: &'static str, probe: &Arc<Probe>) -> Self {
        Self {
            id,
            fail_init: false,
            wants_events: false,
            probe: Arc::clone(probe),
            resources: ViewResources::default(),
        }
    }
}

impl View for ProbeView {
    fn id(&self) -> &'static str {
        self.id
    }

    fn title(&self) -> &'static str {
        "Probe"
    }

    fn render(&self) -> String {
        format!("probe {}", self.id)
    }

    fn init(&mut self, ctx: &ViewContext) -> anyhow::Result<()> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        self.resources.hold(ctx.store.subscribe(|_| {}));
        self.resources.listen(&ctx.channel, "task_started", |_| {});
        if self.fail_init {
            return Err(anyhow!("widget missing"));
        }
        self.resources
            .every("tick", Duration::from_secs(1), || {});
        Ok(())
    }

    fn destroy(&mut self) {
        self.probe.destroys.fetch_add(1, Ordering::SeqCst);
        self.resources.release();
    }

    fn wants_events(&self) -> bool {
        self.wants_events
    }

    fn on_channel_event(&mut self, event: &str, _data: &Value) {
        self.probe
            .events
            .lock()
            .expect("events")
            .push(format!("{}:{event}", self.id));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn manager_with_probes(probe: &Arc<Probe>) -> ViewManager {
    let ctx = context(Store::in_memory(), FakeFleet::with(Vec::new()), quiet_remote());
    let mut manager = ViewManager::new(ctx);
    let mut a = ProbeView::new("a", probe);
    a.wants_events = true;
    manager.register(a);
    manager.register(ProbeView::new("b", probe));
    manager
}

fn resource_counts(manager: &ViewManager) -> (usize, usize) {
    let ctx = manager.context();
    (ctx.store.subscriber_count(), ctx.channel.handler_count())
}

#[tokio::test]
async fn navigation_pairs_every_init_with_a_destroy() {
    let probe = Arc::new(Probe::default());
    let mut manager = manager_with_probes(&probe);
    assert_eq!(resource_counts(&manager), (0, 0));

    manager.navigate("a").expect("a");
    assert_eq!(manager.active_view(), Some("a"));
    assert_eq!(resource_counts(&manager), (1, 1));

    manager.navigate("b").expect("b");
    manager.navigate("a").expect("a again");
    manager.navigate("a").expect("same view remounts");
    assert_eq!(probe.inits.load(Ordering::SeqCst), 4);
    assert_eq!(probe.destroys.load(Ordering::SeqCst), 3);
    assert_eq!(resource_counts(&manager), (1, 1));
    assert_eq!(manager.frame(), "== Probe ==\nprobe a");

    manager.unmount();
    assert_eq!(probe.destroys.load(Ordering::SeqCst), 4);
    assert_eq!(resource_counts(&manager), (0, 0));
    assert_eq!(manager.active_view(), None);
}

#[tokio::test]
async fn unknown_view_keeps_the_current_one_mounted() {
    let probe = Arc::new(Probe::default());
    let mut manager = manager_with_probes(&probe);
    manager.navigate("b").expect("b");

    let err = manager.navigate("settings").expect_err("unknown");
    assert!(matches!(err, NavigationError::UnknownView(ref id) if id == "settings"));
    assert_eq!(manager.active_view(), Some("b"));
    assert_eq!(probe.destroys.load(Ordering::SeqCst), 0);
    assert_eq!(resource_counts(&manager), (1, 1));
}

#[tokio::test]
async fn failed_init_is_still_torn_down() {
    let probe = Arc::new(Probe::default());
    let mut manager = manager_with_probes(&probe);
    let mut broken = ProbeView::new("broken", &probe);
    broken.fail_init = true;
    manager.register(broken);

    manager.navigate("broken").expect("mounted despite init error");
    assert_eq!(manager.active_view(), Some("broken"));
    assert_eq!(resource_counts(&manager), (1, 1));

    manager.navigate("b").expect("b");
    assert_eq!(probe.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(resource_counts(&manager), (1, 1));
}

#[tokio::test]
async fn events_reach_panels_always_and_views_only_when_interested() {
    let probe = Arc::new(Probe::default());
    let mut manager = manager_with_probes(&probe);
    let store = manager.context().store.clone();
    let logged = || store.read(|state| state.activity_log.len());
    let before = logged();

    manager.route_event("task_failed", &json!({"serial": "emu-1"}));
    assert_eq!(logged(), before + 1);

    manager.navigate("b").expect("b");
    manager.route_event("task_failed", &json!({"serial": "emu-2"}));
    assert_eq!(logged(), before + 2);

    manager.navigate("a").expect("a");
    manager.route_event("task_failed", &json!({"serial": "emu-3"}));
    assert_eq!(logged(), before + 3);

    assert_eq!(*probe.events.lock().expect("events"), vec!["a:task_failed"]);
    assert_eq!(
        store.read(|state| state.activity_log.front().map(|entry| entry.severity)),
        Some(Severity::Fail)
    );
}

#[tokio::test]
async fn resources_release_is_idempotent() {
    let store = Store::in_memory();
    let channel = EventChannel::new("ws://127.0.0.1:1/ws");
    let mut resources = ViewResources::default();
    resources.release();
    assert!(resources.is_empty());

    resources.hold(store.subscribe(|_| {}));
    resources.listen(&channel, "scan_failed", |_| {});
    resources.every("tick", Duration::from_secs(1), || {});
    resources.every("tick", Duration::from_secs(2), || {});
    assert!(resources.has_timer("tick"));
    assert!(!resources.is_empty());

    resources.release();
    resources.release();
    assert!(resources.is_empty());
    assert_eq!(store.subscriber_count(), 0);
    assert_eq!(channel.handler_count(), 0);
}

#[tokio::test]
async fn cancel_stops_only_the_named_timer() {
    let mut resources = ViewResources::default();
    resources.every("poll", Duration::from_secs(1), || {});
    resources.every("countdown", Duration::from_secs(1), || {});

    assert!(resources.cancel("poll"));
    assert!(!resources.cancel("poll"));
    assert!(!resources.has_timer("poll"));
    assert!(resources.has_timer("countdown"));
}

#[tokio::test(start_paused = true)]
async fn default_views_return_resources_to_baseline() {
    let fleet = FakeFleet::with(vec![instance("emulator-5554", InstanceStatus::Online)]);
    let ctx = context(Store::in_memory(), fleet, quiet_remote());
    let mut manager = ViewManager::with_default_views(ctx);

    for _ in 0..3 {
        for id in ["dashboard", "runner", "instances"] {
            manager.navigate(id).expect("known view");
            assert_eq!(manager.active_view(), Some(id));
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(manager.live_region().is_some());
        }
    }
    manager.unmount();
    assert_eq!(resource_counts(&manager), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn run_selected_reports_through_notifications() {
    let store = Store::in_memory();
    let ctx = context(
        store.clone(),
        FakeFleet::with(Vec::new()),
        FakeRemote {
            duration_ms: Some(1_000),
            failing: vec![TargetId(2)],
        },
    );
    let operation = Operation::new("farm.record", "Farm");

    assert!(matches!(
        ctx.run_selected(&operation).await,
        Err(DispatchError::NoTargets)
    ));
    assert_eq!(
        ctx.panels.notifications.latest().map(|n| n.kind),
        Some(NotificationKind::Warning)
    );

    store.toggle_target(TargetId(1), true);
    let summary = ctx.run_selected(&operation).await.expect("dispatch");
    assert_eq!(summary.success_count, 1);
    let latest = ctx.panels.notifications.latest().expect("notification");
    assert_eq!(latest.kind, NotificationKind::Success);
    assert_eq!(latest.body, "\"Farm\" running on 1 target(s)");

    store.toggle_target(TargetId(2), true);
    ctx.run_selected(&operation).await.expect("dispatch");
    let latest = ctx.panels.notifications.latest().expect("notification");
    assert_eq!(latest.body, "\"Farm\" running on 1 target(s), 1 failed");

    store.toggle_target(TargetId(1), false);
    let summary = ctx.run_selected(&operation).await.expect("dispatch");
    assert!(summary.all_failed());
    assert_eq!(
        ctx.panels.notifications.latest().map(|n| n.kind),
        Some(NotificationKind::Error)
    );
}
