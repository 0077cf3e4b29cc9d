use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use chrono::{Local, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::domain::{OperationKey, TargetId};
use storage::{MemorySessionStorage, SessionStorage};
use tracing::{debug, error};

use crate::error::PersistenceError;

pub const SNAPSHOT_KEY: &str = "panel_store";
pub const ACTIVITY_LOG_CAP: usize = 100;
pub const DEFAULT_TAB: &str = "emulators";
const WELCOME_MESSAGE: &str = "Select emulators → run actions to see progress here";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Active,
    Done,
    Fail,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "timeStr")]
    pub time_str: String,
    pub message: String,
    #[serde(rename = "dotClass")]
    pub severity: Severity,
}

impl LogEntry {
    pub fn now(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            time_str: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OperationRecordWire", into = "OperationRecordWire")]
pub struct OperationRecord {
    pub started_at_ms: i64,
    pub target_count: usize,
    pub estimated_duration_ms: Option<u64>,
}

impl OperationRecord {
    pub fn started_now(target_count: usize) -> Self {
        Self {
            started_at_ms: now_millis(),
            target_count,
            estimated_duration_ms: None,
        }
    }

    pub fn elapsed_at(&self, now_ms: i64) -> Duration {
        let elapsed = now_ms.saturating_sub(self.started_at_ms).max(0);
        Duration::from_millis(elapsed as u64)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(now_millis())
    }
}

// Snapshot shape kept by earlier panel builds; an unknown estimate is 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationRecordWire {
    start_time: i64,
    #[serde(default)]
    total_duration: u64,
    emulator_count: usize,
}

impl From<OperationRecordWire> for OperationRecord {
    fn from(wire: OperationRecordWire) -> Self {
        Self {
            started_at_ms: wire.start_time,
            target_count: wire.emulator_count,
            estimated_duration_ms: (wire.total_duration > 0).then_some(wire.total_duration),
        }
    }
}

impl From<OperationRecord> for OperationRecordWire {
    fn from(record: OperationRecord) -> Self {
        Self {
            start_time: record.started_at_ms,
            total_duration: record.estimated_duration_ms.unwrap_or(0),
            emulator_count: record.target_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(rename = "selectedTargets")]
    pub selected_targets: BTreeSet<TargetId>,
    #[serde(rename = "runningOperations")]
    pub running_operations: BTreeMap<OperationKey, OperationRecord>,
    #[serde(rename = "activityLogs")]
    pub activity_log: VecDeque<LogEntry>,
    #[serde(rename = "currentTab")]
    pub active_tab: String,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            selected_targets: BTreeSet::new(),
            running_operations: BTreeMap::new(),
            activity_log: VecDeque::new(),
            active_tab: DEFAULT_TAB.to_string(),
        }
    }
}

impl StoreState {
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Loads a persisted snapshot field by field. A field that is missing or
    /// has the wrong shape keeps its default; the others still load.
    pub fn from_snapshot(raw: &str) -> Self {
        let mut state = Self::default();
        let fields = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                debug!("store: snapshot is not an object, using defaults");
                return state;
            }
            Err(err) => {
                debug!("store: unreadable snapshot, using defaults: {err}");
                return state;
            }
        };

        if let Some(selected) = decode_field::<Vec<TargetId>>(&fields, "selectedTargets") {
            state.selected_targets = selected.into_iter().collect();
        }
        if let Some(running) =
            decode_field::<BTreeMap<OperationKey, OperationRecord>>(&fields, "runningOperations")
        {
            state.running_operations = running;
        }
        if let Some(entries) = decode_field::<Vec<Value>>(&fields, "activityLogs") {
            state.activity_log = entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<LogEntry>(entry) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        debug!("store: dropping malformed log entry: {err}");
                        None
                    }
                })
                .take(ACTIVITY_LOG_CAP)
                .collect();
        }
        if let Some(tab) = fields
            .get("currentTab")
            .and_then(Value::as_str)
            .filter(|tab| !tab.is_empty())
        {
            state.active_tab = tab.to_string();
        }
        state
    }
}

fn decode_field<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str) -> Option<T> {
    let value = fields.get(name)?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            debug!(field = name, "store: dropping malformed snapshot field: {err}");
            None
        }
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

type Callback = Arc<dyn Fn(&StoreState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

struct StoreShared {
    state: Mutex<StoreState>,
    listeners: Mutex<Listeners>,
    storage: Arc<dyn SessionStorage>,
}

impl StoreShared {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Store {
    pub fn init(storage: Arc<dyn SessionStorage>) -> Self {
        let state = match storage.get_item(SNAPSHOT_KEY) {
            Ok(Some(raw)) => StoreState::from_snapshot(&raw),
            Ok(None) => StoreState::default(),
            Err(err) => {
                debug!("store: failed to read snapshot, using defaults: {err}");
                StoreState::default()
            }
        };

        let store = Self {
            shared: Arc::new(StoreShared {
                state: Mutex::new(state),
                listeners: Mutex::new(Listeners::default()),
                storage,
            }),
        };
        if store.read(|state| state.activity_log.is_empty()) {
            store.append_log_entry(WELCOME_MESSAGE, Severity::Active);
        }
        store
    }

    pub fn in_memory() -> Self {
        Self::init(Arc::new(MemorySessionStorage::new()))
    }

    pub fn subscribe(&self, callback: impl Fn(&StoreState) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.shared.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            released: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners().entries.len()
    }

    pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.shared.state())
    }

    pub fn snapshot(&self) -> StoreState {
        self.shared.state().clone()
    }

    pub fn notify(&self) {
        self.mutate(|_| {});
    }

    pub fn toggle_target(&self, target: TargetId, selected: bool) {
        self.mutate(|state| {
            if selected {
                state.selected_targets.insert(target);
            } else {
                state.selected_targets.remove(&target);
            }
        });
    }

    pub fn clear_selected_targets(&self) {
        self.mutate(|state| state.selected_targets.clear());
    }

    pub fn set_operation_running(
        &self,
        key: OperationKey,
        target_count: usize,
        estimated_duration_ms: Option<u64>,
    ) {
        self.mutate(|state| {
            let mut record = OperationRecord::started_now(target_count);
            record.estimated_duration_ms = estimated_duration_ms;
            state.running_operations.insert(key, record);
        });
    }

    /// Records the real duration once it is known. Start time and target
    /// count are left untouched. Returns `false` if the operation is gone.
    pub fn set_operation_estimate(&self, key: &OperationKey, estimated_duration_ms: u64) -> bool {
        let mut found = false;
        self.mutate(|state| {
            if let Some(record) = state.running_operations.get_mut(key) {
                record.estimated_duration_ms = Some(estimated_duration_ms);
                found = true;
            }
        });
        found
    }

    pub fn clear_operation(&self, key: &OperationKey) {
        self.mutate(|state| {
            state.running_operations.remove(key);
        });
    }

    pub fn operation(&self, key: &OperationKey) -> Option<OperationRecord> {
        self.read(|state| state.running_operations.get(key).copied())
    }

    pub fn operation_elapsed(&self, key: &OperationKey) -> Option<Duration> {
        self.operation(key).map(|record| record.elapsed())
    }

    pub fn append_log_entry(&self, message: impl Into<String>, severity: Severity) {
        let entry = LogEntry::now(message, severity);
        self.mutate(|state| {
            state.activity_log.push_front(entry);
            state.activity_log.truncate(ACTIVITY_LOG_CAP);
        });
    }

    pub fn set_active_tab(&self, tab: impl Into<String>) {
        let tab = tab.into();
        self.mutate(|state| state.active_tab = tab);
    }

    // Mutation and persistence happen under the state lock so snapshots hit
    // storage in mutation order; subscribers run afterwards with no lock
    // held and may call back into the store.
    fn mutate(&self, f: impl FnOnce(&mut StoreState)) {
        let snapshot = {
            let mut state = self.shared.state();
            f(&mut state);
            if let Err(err) = self.persist(&state) {
                debug!("store: snapshot not persisted: {err}");
            }
            state.clone()
        };
        self.dispatch(&snapshot);
    }

    fn persist(&self, state: &StoreState) -> Result<(), PersistenceError> {
        let raw = state.to_snapshot()?;
        self.shared.storage.set_item(SNAPSHOT_KEY, &raw)?;
        Ok(())
    }

    fn dispatch(&self, snapshot: &StoreState) {
        let callbacks: Vec<Callback> = self
            .shared
            .listeners()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                error!("store: subscriber panicked during notify");
            }
        }
    }
}

/// Registration returned by [`Store::subscribe`]. Releasing it, explicitly
/// or by dropping it, removes exactly that subscriber.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    shared: Weak<StoreShared>,
    released: bool,
}

impl Subscription {
    pub fn release(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
