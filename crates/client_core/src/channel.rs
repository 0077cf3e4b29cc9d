use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::protocol::{EventEnvelope, KEEPALIVE_FRAME};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ConnectivityError, MalformedMessageError};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelTimings {
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type AnyEventHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Named(EventHandler),
    Wildcard(AnyEventHandler),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_event: HashMap<String, Vec<(HandlerId, Handler)>>,
}

impl Registry {
    fn insert(&mut self, event: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn handlers_for(&self, event: &str) -> Vec<Handler> {
        let named = self.by_event.get(event).into_iter().flatten();
        let wildcard = self.by_event.get(WILDCARD).into_iter().flatten();
        named
            .chain(wildcard)
            .map(|(_, handler)| handler.clone())
            .collect()
    }
}

struct ChannelShared {
    url: String,
    timings: ChannelTimings,
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    pending_reconnect: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnects_scheduled: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct EventChannel {
    shared: Arc<ChannelShared>,
}

impl EventChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timings(url, ChannelTimings::default())
    }

    pub fn with_timings(url: impl Into<String>, timings: ChannelTimings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(ChannelShared {
                url: url.into(),
                timings,
                registry: Mutex::new(Registry::default()),
                state,
                pending_reconnect: Mutex::new(None),
                heartbeat: Mutex::new(None),
                reconnects_scheduled: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_origin(origin: &str) -> Result<Self, ConnectivityError> {
        Ok(Self::new(ws_url_from_origin(origin)?))
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Opens the connection in the background. Failures never surface here;
    /// they show up as `Disconnected` and a scheduled retry.
    pub fn connect(&self) {
        if self.reconnect_pending() {
            debug!(url = %self.url(), "channel: connect ignored, reconnect pending");
            return;
        }
        if !self.claim_connect() {
            debug!(url = %self.url(), "channel: connect ignored, already {:?}", self.state());
            return;
        }
        let channel = self.clone();
        tokio::spawn(async move { channel.open().await });
    }

    // Disconnected -> Connecting under the watch lock, so only one caller
    // gets to open a socket.
    fn claim_connect(&self) -> bool {
        self.shared.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Connecting;
            true
        })
    }

    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        lock(&self.shared.registry).insert(event, Handler::Named(Arc::new(handler)))
    }

    pub fn on_any(&self, handler: impl Fn(&str, &Value) + Send + Sync + 'static) -> HandlerId {
        lock(&self.shared.registry).insert(WILDCARD, Handler::Wildcard(Arc::new(handler)))
    }

    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut registry = lock(&self.shared.registry);
        let Some(handlers) = registry.by_event.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            registry.by_event.remove(event);
        }
        removed
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.shared.registry)
            .by_event
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn reconnect_pending(&self) -> bool {
        lock(&self.shared.pending_reconnect).is_some()
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.shared.reconnects_scheduled.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: &str, data: &Value) {
        let handlers = lock(&self.shared.registry).handlers_for(event);
        for handler in handlers {
            let outcome = match &handler {
                Handler::Named(handler) => catch_unwind(AssertUnwindSafe(|| handler(data))),
                Handler::Wildcard(handler) => {
                    catch_unwind(AssertUnwindSafe(|| handler(event, data)))
                }
            };
            if outcome.is_err() {
                error!(event, "channel: handler panicked");
            }
        }
    }

    pub(crate) fn handle_frame(&self, text: &str) -> Result<(), MalformedMessageError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| MalformedMessageError::NotJson(err.to_string()))?;
        let envelope: EventEnvelope = serde_json::from_value(value)
            .map_err(|err| MalformedMessageError::NotEnvelope(err.to_string()))?;
        self.emit(&envelope.event, &envelope.data);
        Ok(())
    }

    fn set_state(&self, next: ConnectionState) {
        self.shared.state.send_replace(next);
    }

    /// Caller must hold the `Connecting` claim.
    async fn open(&self) {
        let (stream, _) = match connect_async(self.url()).await {
            Ok(connected) => connected,
            Err(err) => {
                let err = ConnectivityError::Open {
                    url: self.url().to_string(),
                    reason: err.to_string(),
                };
                warn!("channel: {err}");
                self.handle_closed();
                return;
            }
        };

        let (mut writer, mut reader) = stream.split();
        self.set_state(ConnectionState::Connected);
        info!(url = %self.url(), "channel: connected");

        let period = self.shared.timings.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(err) = writer.send(Message::Text(KEEPALIVE_FRAME.into())).await {
                    debug!("channel: keepalive send failed: {err}");
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.shared.heartbeat).replace(heartbeat) {
            previous.abort();
        }

        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Err(err) = self.handle_frame(&text) {
                        debug!("channel: dropped frame: {err}");
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("channel: {}", ConnectivityError::Dropped(err.to_string()));
                    break;
                }
            }
        }
        self.handle_closed();
    }

    /// Transport went away: stop the keepalive, report offline, and make
    /// sure exactly one reconnect is pending.
    pub(crate) fn handle_closed(&self) {
        if let Some(heartbeat) = lock(&self.shared.heartbeat).take() {
            heartbeat.abort();
        }
        if self.state() != ConnectionState::Disconnected {
            info!(url = %self.url(), "channel: disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let mut pending = lock(&self.shared.pending_reconnect);
        if pending.is_some() {
            debug!("channel: reconnect already pending");
            return;
        }
        self.shared.reconnects_scheduled.fetch_add(1, Ordering::SeqCst);
        let delay = self.shared.timings.reconnect_delay;
        let channel = self.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&channel.shared.pending_reconnect).take();
            if !channel.claim_connect() {
                debug!(
                    url = %channel.url(),
                    "channel: reconnect skipped, already {:?}",
                    channel.state()
                );
                return;
            }
            debug!(url = %channel.url(), "channel: reconnecting");
            channel.open().await;
        }));
    }
}

/// `http://host:port` → `ws://host:port/ws`, `https` → `wss`.
pub fn ws_url_from_origin(origin: &str) -> Result<String, ConnectivityError> {
    let mut url = Url::parse(origin.trim()).map_err(|err| ConnectivityError::InvalidOrigin {
        origin: origin.to_string(),
        reason: err.to_string(),
    })?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(ConnectivityError::UnsupportedOrigin(origin.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ConnectivityError::UnsupportedOrigin(origin.to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
