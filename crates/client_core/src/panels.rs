use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;
use shared::{
    domain::InstanceStatus,
    protocol::{InstanceSummary, ServerEvent},
};
use tracing::{debug, info};

use crate::{
    channel::ConnectionState,
    store::{Severity, Store},
};

pub const NOTIFICATION_CAP: usize = 50;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn seconds(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

#[derive(Clone)]
pub struct ConnectivityIndicator {
    state: Arc<Mutex<ConnectionState>>,
}

impl Default for ConnectivityIndicator {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
        }
    }
}

impl ConnectivityIndicator {
    pub fn set(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if state.is_connected() != next.is_connected() {
            info!(connected = next.is_connected(), "connectivity changed");
        }
        *state = next;
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn label(&self) -> &'static str {
        if self.state().is_connected() {
            "Connected"
        } else {
            "Disconnected"
        }
    }
}

/// Turns task and scan lifecycle events into activity log entries.
#[derive(Clone)]
pub struct ActivityFeed {
    store: Store,
}

impl ActivityFeed {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn handle(&self, event: &ServerEvent) -> bool {
        let (message, severity) = match event {
            ServerEvent::TaskStarted { serial, step, .. } => (
                format!("[{serial}] {}", step.as_deref().unwrap_or("task_started")),
                Severity::Active,
            ),
            ServerEvent::TaskCompleted {
                serial,
                task_type,
                duration_ms,
                ..
            } => {
                let task = task_type.as_deref().unwrap_or("Task");
                let message = match duration_ms {
                    Some(ms) => format!("[{serial}] {task} completed in {}", seconds(*ms)),
                    None => format!("[{serial}] {task} completed"),
                };
                (message, Severity::Done)
            }
            ServerEvent::TaskFailed { serial, error } => (
                format!("[{serial}] Failed: {}", error.as_deref().unwrap_or("Unknown")),
                Severity::Fail,
            ),
            ServerEvent::ScanCompleted {
                serial, elapsed_ms, ..
            } => {
                let message = match elapsed_ms {
                    Some(ms) => format!("[{serial}] Full scan completed in {}", seconds(*ms)),
                    None => format!("[{serial}] Full scan completed"),
                };
                (message, Severity::Done)
            }
            ServerEvent::ScanFailed { serial, error } => (
                format!(
                    "[{serial}] Scan failed: {}",
                    error.as_deref().unwrap_or("Unknown")
                ),
                Severity::Fail,
            ),
            _ => return false,
        };
        self.store.append_log_entry(message, severity);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub step: String,
    pub percent: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCard {
    pub status: InstanceStatus,
    pub progress: Option<Progress>,
    pub task_type: Option<String>,
    pub data: Option<Value>,
}

#[derive(Clone, Default)]
pub struct DeviceBoard {
    cards: Arc<Mutex<BTreeMap<String, DeviceCard>>>,
}

impl DeviceBoard {
    pub fn card(&self, serial: &str) -> Option<DeviceCard> {
        lock(&self.cards).get(serial).cloned()
    }

    pub fn cards(&self) -> BTreeMap<String, DeviceCard> {
        lock(&self.cards).clone()
    }

    /// Replaces statuses with a fresh fleet listing. Progress of devices
    /// that are still busy is kept.
    pub fn sync(&self, instances: &[InstanceSummary]) {
        let mut cards = lock(&self.cards);
        for instance in instances {
            let card = cards.entry(instance.serial.clone()).or_default();
            card.status = instance.status;
            if instance.status != InstanceStatus::Busy {
                card.progress = None;
            }
            if instance.task_type.is_some() {
                card.task_type = instance.task_type.clone();
            }
            if instance.data.is_some() {
                card.data = instance.data.clone();
            }
        }
    }

    pub fn handle(&self, event: &ServerEvent) -> bool {
        let Some(serial) = event.serial() else {
            return false;
        };
        let mut cards = lock(&self.cards);
        let card = cards.entry(serial.to_string()).or_default();
        match event {
            ServerEvent::TaskStarted {
                step, task_type, ..
            } => {
                card.status = InstanceStatus::Busy;
                card.task_type = task_type.clone();
                card.progress = Some(Progress {
                    step: step.clone().unwrap_or_else(|| "Starting...".into()),
                    percent: 15,
                });
            }
            ServerEvent::TaskProgress { step, .. } => {
                let step = step.clone().unwrap_or_else(|| "Processing...".into());
                card.progress = Some(Progress {
                    percent: task_step_percent(&step),
                    step,
                });
            }
            ServerEvent::ScanProgress { step, detail, .. } => {
                card.status = InstanceStatus::Busy;
                let text = match detail {
                    Some(detail) => detail.clone(),
                    None if step == "starting" => "Starting...".into(),
                    None => step.clone(),
                };
                card.progress = Some(Progress {
                    step: text,
                    percent: scan_step_percent(step),
                });
            }
            ServerEvent::TaskCompleted {
                task_type, data, ..
            } => {
                card.status = InstanceStatus::Online;
                card.progress = None;
                if data.is_some() {
                    card.task_type = task_type.clone();
                    card.data = data.clone();
                }
            }
            ServerEvent::ScanCompleted { data, .. } => {
                card.status = InstanceStatus::Online;
                card.progress = None;
                if data.is_some() {
                    card.task_type = Some("full_scan".into());
                    card.data = data.clone();
                }
            }
            ServerEvent::TaskFailed { .. } | ServerEvent::ScanFailed { .. } => {
                card.status = InstanceStatus::Error;
                card.progress = None;
            }
            ServerEvent::Pong => return false,
        }
        true
    }
}

fn task_step_percent(step: &str) -> u8 {
    match step {
        "Navigating to game screen..." => 30,
        "Capturing screenshot..." => 55,
        "Processing OCR..." => 75,
        _ => 50,
    }
}

fn scan_step_percent(step: &str) -> u8 {
    if step.contains("capturing") {
        return 20;
    }
    match step {
        "ocr_processing" => 60,
        "parsing" => 80,
        "saving" => 90,
        _ => 50,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

/// Bounded list of transient notifications, newest first.
#[derive(Clone, Default)]
pub struct NotificationCenter {
    items: Arc<Mutex<VecDeque<Notification>>>,
}

impl NotificationCenter {
    pub fn push(&self, kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) {
        let notification = Notification {
            kind,
            title: title.into(),
            body: body.into(),
        };
        debug!(kind = ?notification.kind, title = %notification.title, "notification: {}", notification.body);
        let mut items = lock(&self.items);
        items.push_front(notification);
        items.truncate(NOTIFICATION_CAP);
    }

    pub fn items(&self) -> Vec<Notification> {
        lock(&self.items).iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Notification> {
        lock(&self.items).front().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handle(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::TaskStarted {
                serial, task_type, ..
            } => self.push(
                NotificationKind::Info,
                "Task Started",
                format!("{} on {serial}", task_type.as_deref().unwrap_or("Task")),
            ),
            ServerEvent::TaskCompleted {
                serial,
                task_type,
                duration_ms,
                ..
            } => {
                let task = task_type.as_deref().unwrap_or("Task");
                let body = match duration_ms {
                    Some(ms) => format!("{task} on {serial} {}", seconds(*ms)),
                    None => format!("{task} on {serial}"),
                };
                self.push(NotificationKind::Success, "Task Complete", body);
            }
            ServerEvent::TaskFailed { serial, error } => self.push(
                NotificationKind::Error,
                "Task Failed",
                format!("{serial}: {}", error.as_deref().unwrap_or("Unknown")),
            ),
            ServerEvent::ScanCompleted {
                serial,
                emulator_index,
                elapsed_ms,
                ..
            } => {
                let who = match emulator_index {
                    Some(index) => format!("Emulator #{index}"),
                    None => serial.clone(),
                };
                let body = match elapsed_ms {
                    Some(ms) => format!("{who} completed in {}", seconds(*ms)),
                    None => format!("{who} completed"),
                };
                self.push(NotificationKind::Success, "Full Scan Complete", body);
            }
            ServerEvent::ScanFailed { serial, error } => self.push(
                NotificationKind::Error,
                "Scan Failed",
                format!("{serial}: {}", error.as_deref().unwrap_or("Unknown")),
            ),
            _ => return false,
        }
        true
    }
}

#[derive(Clone)]
pub struct Panels {
    pub connectivity: ConnectivityIndicator,
    pub feed: ActivityFeed,
    pub devices: DeviceBoard,
    pub notifications: NotificationCenter,
}

impl Panels {
    pub fn new(store: Store) -> Self {
        Self {
            connectivity: ConnectivityIndicator::default(),
            feed: ActivityFeed::new(store),
            devices: DeviceBoard::default(),
            notifications: NotificationCenter::default(),
        }
    }

    /// Unknown event names and payloads that do not decode are ignored.
    pub fn handle_event(&self, event: &str, data: &Value) {
        let Some(typed) = ServerEvent::decode(event, data) else {
            debug!(event, "panels: ignoring untyped event");
            return;
        };
        self.devices.handle(&typed);
        self.feed.handle(&typed);
        self.notifications.handle(&typed);
    }
}

#[cfg(test)]
#[path = "tests/panels_tests.rs"]
mod tests;
