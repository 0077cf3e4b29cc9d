use super::*;

use serde_json::json;

fn log_head(store: &Store) -> Option<(String, Severity)> {
    store.read(|state| {
        state
            .activity_log
            .front()
            .map(|entry| (entry.message.clone(), entry.severity))
    })
}

#[test]
fn indicator_tracks_connectivity() {
    let indicator = ConnectivityIndicator::default();
    assert_eq!(indicator.label(), "Disconnected");

    indicator.set(ConnectionState::Connecting);
    assert_eq!(indicator.label(), "Disconnected");
    indicator.set(ConnectionState::Connected);
    assert_eq!(indicator.label(), "Connected");
    indicator.set(ConnectionState::Disconnected);
    assert_eq!(indicator.state(), ConnectionState::Disconnected);
}

#[test]
fn feed_logs_lifecycle_events_with_matching_severity() {
    let store = Store::in_memory();
    let feed = ActivityFeed::new(store.clone());

    assert!(feed.handle(&ServerEvent::TaskStarted {
        serial: "emulator-5554".into(),
        task_type: Some("profile".into()),
        step: Some("Starting...".into()),
    }));
    assert_eq!(
        log_head(&store),
        Some(("[emulator-5554] Starting...".into(), Severity::Active))
    );

    feed.handle(&ServerEvent::TaskCompleted {
        serial: "emulator-5554".into(),
        task_type: Some("profile".into()),
        duration_ms: Some(4200),
        data: None,
    });
    assert_eq!(
        log_head(&store),
        Some((
            "[emulator-5554] profile completed in 4.2s".into(),
            Severity::Done
        ))
    );

    feed.handle(&ServerEvent::ScanFailed {
        serial: "emulator-5556".into(),
        error: None,
    });
    assert_eq!(
        log_head(&store),
        Some(("[emulator-5556] Scan failed: Unknown".into(), Severity::Fail))
    );
}

#[test]
fn feed_ignores_progress_and_pong() {
    let store = Store::in_memory();
    let feed = ActivityFeed::new(store.clone());
    let before = store.read(|state| state.activity_log.len());

    assert!(!feed.handle(&ServerEvent::TaskProgress {
        serial: "emulator-5554".into(),
        step: Some("Capturing screenshot...".into()),
    }));
    assert!(!feed.handle(&ServerEvent::Pong));
    assert_eq!(store.read(|state| state.activity_log.len()), before);
}

#[test]
fn board_maps_task_steps_to_progress() {
    let board = DeviceBoard::default();
    board.handle(&ServerEvent::TaskStarted {
        serial: "emu".into(),
        task_type: None,
        step: None,
    });
    let card = board.card("emu").expect("card");
    assert_eq!(card.status, InstanceStatus::Busy);
    assert_eq!(
        card.progress,
        Some(Progress {
            step: "Starting...".into(),
            percent: 15
        })
    );

    for (step, percent) in [
        ("Navigating to game screen...", 30),
        ("Capturing screenshot...", 55),
        ("Processing OCR...", 75),
        ("Tapping button", 50),
    ] {
        board.handle(&ServerEvent::TaskProgress {
            serial: "emu".into(),
            step: Some(step.into()),
        });
        assert_eq!(
            board.card("emu").and_then(|card| card.progress).map(|p| p.percent),
            Some(percent),
            "{step}"
        );
    }

    board.handle(&ServerEvent::TaskFailed {
        serial: "emu".into(),
        error: Some("adb offline".into()),
    });
    let card = board.card("emu").expect("card");
    assert_eq!(card.status, InstanceStatus::Error);
    assert_eq!(card.progress, None);
}

#[test]
fn board_maps_scan_steps_and_completion() {
    let board = DeviceBoard::default();
    for (step, detail, percent, text) in [
        ("starting", None, 50, "Starting..."),
        ("capturing_profile", None, 20, "capturing_profile"),
        ("ocr_processing", Some("Reading 3 images"), 60, "Reading 3 images"),
        ("parsing", None, 80, "parsing"),
        ("saving", None, 90, "saving"),
    ] {
        board.handle(&ServerEvent::ScanProgress {
            serial: "emu".into(),
            step: step.into(),
            detail: detail.map(str::to_string),
        });
        let progress = board.card("emu").and_then(|card| card.progress).expect("progress");
        assert_eq!(progress.percent, percent, "{step}");
        assert_eq!(progress.step, text);
    }

    board.handle(&ServerEvent::ScanCompleted {
        serial: "emu".into(),
        emulator_index: None,
        elapsed_ms: Some(9000),
        data: Some(json!({"power": 1200})),
    });
    let card = board.card("emu").expect("card");
    assert_eq!(card.status, InstanceStatus::Online);
    assert_eq!(card.progress, None);
    assert_eq!(card.task_type.as_deref(), Some("full_scan"));
    assert_eq!(card.data, Some(json!({"power": 1200})));
}

#[test]
fn board_sync_keeps_progress_only_for_busy_devices() {
    let board = DeviceBoard::default();
    for serial in ["a", "b"] {
        board.handle(&ServerEvent::TaskStarted {
            serial: serial.into(),
            task_type: None,
            step: None,
        });
    }

    board.sync(&[
        InstanceSummary {
            serial: "a".into(),
            status: InstanceStatus::Busy,
            index: None,
            name: None,
            task_type: None,
            data: None,
        },
        InstanceSummary {
            serial: "b".into(),
            status: InstanceStatus::Online,
            index: None,
            name: None,
            task_type: None,
            data: None,
        },
    ]);

    assert!(board.card("a").and_then(|card| card.progress).is_some());
    assert!(board.card("b").and_then(|card| card.progress).is_none());
    assert_eq!(board.cards().len(), 2);
}

#[test]
fn notifications_are_bounded_and_newest_first() {
    let center = NotificationCenter::default();
    for n in 0..NOTIFICATION_CAP + 5 {
        center.push(NotificationKind::Info, "n", n.to_string());
    }
    assert_eq!(center.len(), NOTIFICATION_CAP);
    assert_eq!(
        center.latest().map(|n| n.body),
        Some((NOTIFICATION_CAP + 4).to_string())
    );
}

#[test]
fn notifications_describe_scan_completion() {
    let center = NotificationCenter::default();
    center.handle(&ServerEvent::ScanCompleted {
        serial: "emu".into(),
        emulator_index: Some(shared::domain::TargetId(3)),
        elapsed_ms: Some(12_345),
        data: None,
    });
    assert_eq!(
        center.latest(),
        Some(Notification {
            kind: NotificationKind::Success,
            title: "Full Scan Complete".into(),
            body: "Emulator #3 completed in 12.3s".into(),
        })
    );
}

#[test]
fn panels_decode_raw_events_and_skip_unknown_ones() {
    let store = Store::in_memory();
    let panels = Panels::new(store.clone());
    let logged_before = store.read(|state| state.activity_log.len());

    panels.handle_event(
        "task_failed",
        &json!({"serial": "emulator-5554", "error": "timeout"}),
    );
    panels.handle_event("macro_queued", &json!({"serial": "emulator-5554"}));
    panels.handle_event("task_started", &json!({"no_serial": true}));

    assert_eq!(
        panels.devices.card("emulator-5554").map(|card| card.status),
        Some(InstanceStatus::Error)
    );
    assert_eq!(
        store.read(|state| state.activity_log.len()),
        logged_before + 1
    );
    assert_eq!(panels.notifications.len(), 1);
    assert_eq!(
        panels.notifications.latest().map(|n| n.body),
        Some("emulator-5554: timeout".into())
    );
}
