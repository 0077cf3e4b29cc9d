use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{InstanceStatus, TargetId};

/// Literal keepalive frame the client sends; the server answers with a
/// `pong` event that nobody is required to wait for.
pub const KEEPALIVE_FRAME: &str = "ping";

/// Every server push is `{ "event": <name>, "data": <object> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Result of one remote operation call on one target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl RemoteCallResult {
    pub fn ok(duration_ms: Option<u64>) -> Self {
        Self {
            success: true,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub serial: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshInstancesResponse {
    pub count: usize,
    pub devices: Vec<InstanceSummary>,
}

/// Typed view of the server pushes the panel reacts to. Decoded from an
/// [`EventEnvelope`]; names not listed here are ignored by typed consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    TaskStarted {
        serial: String,
        #[serde(default)]
        task_type: Option<String>,
        #[serde(default)]
        step: Option<String>,
    },
    TaskProgress {
        serial: String,
        #[serde(default)]
        step: Option<String>,
    },
    TaskCompleted {
        serial: String,
        #[serde(default)]
        task_type: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        data: Option<Value>,
    },
    TaskFailed {
        serial: String,
        #[serde(default)]
        error: Option<String>,
    },
    ScanProgress {
        serial: String,
        step: String,
        #[serde(default)]
        detail: Option<String>,
    },
    ScanCompleted {
        serial: String,
        #[serde(default)]
        emulator_index: Option<TargetId>,
        #[serde(default)]
        elapsed_ms: Option<u64>,
        #[serde(default)]
        data: Option<Value>,
    },
    ScanFailed {
        serial: String,
        #[serde(default)]
        error: Option<String>,
    },
    Pong,
}

impl ServerEvent {
    pub fn from_envelope(envelope: &EventEnvelope) -> Option<Self> {
        serde_json::from_value(serde_json::to_value(envelope).ok()?).ok()
    }

    pub fn decode(event: &str, data: &Value) -> Option<Self> {
        Self::from_envelope(&EventEnvelope::new(event, data.clone()))
    }

    pub fn serial(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { serial, .. }
            | Self::TaskProgress { serial, .. }
            | Self::TaskCompleted { serial, .. }
            | Self::TaskFailed { serial, .. }
            | Self::ScanProgress { serial, .. }
            | Self::ScanCompleted { serial, .. }
            | Self::ScanFailed { serial, .. } => Some(serial),
            Self::Pong => None,
        }
    }
}
