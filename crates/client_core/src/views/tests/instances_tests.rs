use super::*;

use serde_json::json;
use shared::domain::InstanceStatus;

use crate::{
    store::Store,
    test_support::{context, instance, quiet_remote, FakeFleet},
};

#[test]
fn countdown_wraps_at_the_interval() {
    let mut countdown = RefreshCountdown::new(3);
    let seen: Vec<u64> = (0..7)
        .map(|_| {
            countdown.tick();
            countdown.elapsed_secs()
        })
        .collect();
    assert_eq!(seen, vec![1, 2, 0, 1, 2, 0, 1]);
}

#[test]
fn countdown_freezes_while_disabled_and_resets_on_change() {
    let mut countdown = RefreshCountdown::new(5);
    countdown.tick();
    countdown.tick();
    countdown.set_enabled(false);
    countdown.tick();
    countdown.tick();
    assert_eq!(countdown.elapsed_secs(), 2);
    assert!((countdown.progress() - 0.4).abs() < f64::EPSILON);

    countdown.set_enabled(true);
    countdown.tick();
    assert_eq!(countdown.elapsed_secs(), 3);

    countdown.set_interval(10);
    assert_eq!(countdown.elapsed_secs(), 0);
    assert_eq!(countdown.interval_secs(), 10);

    countdown.tick();
    countdown.reset();
    assert_eq!(countdown.elapsed_secs(), 0);

    countdown.set_interval(0);
    assert_eq!(countdown.interval_secs(), 1);
}

fn mounted() -> (InstancesView, ViewContext, std::sync::Arc<FakeFleet>) {
    let fake = FakeFleet::with(vec![
        instance("emulator-5554", InstanceStatus::Online),
        instance("emulator-5556", InstanceStatus::Busy),
        instance("emulator-5558", InstanceStatus::Offline),
    ]);
    let ctx = context(Store::in_memory(), fake.clone(), quiet_remote());
    let mut view = InstancesView::default();
    view.init(&ctx).expect("init");
    (view, ctx, fake)
}

#[tokio::test(start_paused = true)]
async fn fetches_on_mount_and_polls_with_the_countdown() {
    let (mut view, ctx, fake) = mounted();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fake.lists(), 1);
    assert_eq!(view.instances().len(), 3);
    assert_eq!(view.stats(), (3, 2, 1));
    assert!(view
        .live_region()
        .starts_with("total 3 | running 2 | stopped 1 | next refresh 0/5s"));
    assert!(view.last_refresh().is_some());
    assert!(view.is_polling());

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(view.countdown().elapsed_secs(), 2);

    tokio::time::sleep(Duration::from_millis(3_000)).await;
    assert_eq!(fake.lists(), 2);
    assert_eq!(view.countdown().elapsed_secs(), 0);
    assert_eq!(
        ctx.panels.devices.card("emulator-5556").map(|card| card.status),
        Some(InstanceStatus::Busy)
    );
    view.destroy();
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_refresh_stops_polling_and_freezes_the_ring() {
    let (mut view, _ctx, fake) = mounted();
    tokio::time::sleep(Duration::from_millis(2_010)).await;

    assert!(!view.toggle_auto_refresh());
    assert!(!view.is_polling());
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(fake.lists(), 1);
    assert_eq!(view.countdown().elapsed_secs(), 2);
    assert!(!view.countdown().is_enabled());

    assert!(view.toggle_auto_refresh());
    assert!(view.is_polling());
    tokio::time::sleep(Duration::from_millis(5_010)).await;
    assert_eq!(fake.lists(), 2);
    view.destroy();
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_and_interval_change_reset_the_ring() {
    let (mut view, _ctx, fake) = mounted();
    tokio::time::sleep(Duration::from_millis(3_010)).await;
    assert_eq!(view.countdown().elapsed_secs(), 3);

    view.manual_refresh();
    assert_eq!(view.countdown().elapsed_secs(), 0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fake.lists(), 2);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    view.set_refresh_interval(2);
    assert_eq!(view.refresh_secs(), 2);
    assert_eq!(view.countdown().elapsed_secs(), 0);
    assert_eq!(view.countdown().interval_secs(), 2);

    tokio::time::sleep(Duration::from_millis(2_010)).await;
    assert_eq!(fake.lists(), 3);
    view.destroy();
}

#[tokio::test(start_paused = true)]
async fn scan_completion_triggers_a_refetch() {
    let (mut view, ctx, fake) = mounted();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ctx.channel.handler_count(), 1);

    fake.set_instances(vec![instance("emulator-5554", InstanceStatus::Online)]);
    ctx.channel
        .emit("scan_completed", &json!({"serial": "emulator-5556"}));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fake.lists(), 2);
    assert_eq!(view.instances().len(), 1);

    view.destroy();
    assert_eq!(ctx.channel.handler_count(), 0);
    ctx.channel
        .emit("scan_completed", &json!({"serial": "emulator-5556"}));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fake.lists(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_fetch_is_reported() {
    let fake = FakeFleet::with(Vec::new());
    fake.set_failing(true);
    let ctx = context(Store::in_memory(), fake.clone(), quiet_remote());
    let mut view = InstancesView::default();
    view.init(&ctx).expect("init");
    tokio::time::sleep(Duration::from_millis(5_010)).await;

    assert_eq!(fake.lists(), 2);
    assert_eq!(ctx.panels.notifications.len(), 1);
    assert_eq!(view.last_refresh(), None);
    view.destroy();
}
