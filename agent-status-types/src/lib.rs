//! Core wire types for the status reporting pipeline: bundle and plugin
//! status records, the consolidated snapshot, configuration schema and
//! validation, and the shared error type. No I/O, no async runtime.

mod bundle;
mod config;
mod error;
mod plugin;
mod snapshot;

pub use bundle::{BundleError, BundleStatus, DecisionLogStatus, ErrorLocation};
pub use config::{
    Configuration, RawBundleLoadDurationCollector, RawCollectors, RawConfig,
    RawPrometheusConfig, TriggerMode, DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS,
};
pub use error::StatusError;
pub use plugin::{PluginState, PluginStatus};
pub use snapshot::{Snapshot, SnapshotBuilder};
