pub mod backend;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod panels;
pub mod runtime;
pub mod store;
pub mod views;

#[cfg(test)]
mod test_support;

pub use backend::{FleetApi, HttpBackend, RemoteCall};
pub use channel::{ws_url_from_origin, ChannelTimings, ConnectionState, EventChannel, HandlerId};
pub use dispatcher::{DispatchSummary, Operation, TargetOutcome, TaskDispatcher};
pub use error::{
    ConnectivityError, DispatchError, MalformedMessageError, NavigationError, PersistenceError,
};
pub use panels::{NotificationKind, Panels};
pub use runtime::{ControlPanel, PanelOptions};
pub use store::{LogEntry, OperationRecord, Severity, Store, StoreState, Subscription};
pub use views::{View, ViewContext, ViewManager, ViewResources, ViewSettings};
