//! Status reporting pipeline: aggregates bundle, discovery, decision-log,
//! and plugin status events into a consolidated snapshot and dispatches it
//! to HTTP, console, Prometheus, and named-backend sinks.

pub mod channel;
mod dispatch;
mod event_loop;
mod lifecycle;
mod metrics;
mod store;

pub use agent_status_types::{
    BundleError, BundleStatus, Configuration, DecisionLogStatus, ErrorLocation, PluginState,
    PluginStatus, RawConfig, Snapshot, StatusError, TriggerMode,
    DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS,
};

pub use dispatch::{ConsoleLogger, NamedBackend, PluginHost, ReqwestServiceClient, ServiceClient, TracingConsoleLogger};
pub use event_loop::{LoopHandles, ReconfigureRequest, ShutdownRequest, SnapshotQuery, TriggerRequest};
pub use lifecycle::{StatusPlugin, PLUGIN_NAME};
pub use metrics::PrometheusCollectors;
