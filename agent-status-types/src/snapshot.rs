//! Snapshot — the consolidated status value delivered to sinks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BundleStatus, DecisionLogStatus, PluginStatus};

/// A point-in-time, immutable view of everything the pipeline has observed.
///
/// A `Snapshot` is a pure value: producing one never mutates the store it
/// was built from, and cloning or reading one never observes a later
/// mutation of that store.
///
/// Wire field names match the external HTTP/console contract exactly;
/// `bundle` is the deprecated single-bundle field, kept for backward
/// compatibility but never populated by new producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub labels: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleStatus>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bundles: BTreeMap<String, BundleStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<BundleStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_logs: Option<DecisionLogStatus>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, PluginStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, serde_json::Value>>,
}

impl Snapshot {
    /// Create an empty snapshot carrying only the given labels.
    pub fn with_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            bundle: None,
            bundles: BTreeMap::new(),
            discovery: None,
            decision_logs: None,
            plugins: BTreeMap::new(),
            metrics: None,
        }
    }

    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Render this snapshot as a console/HTTP JSON record. The console sink
    /// additionally flattens this through a `type` field (see §4.D / §6);
    /// that flattening happens at the dispatcher, not here, since it is a
    /// sink-specific concern and not part of the snapshot's own shape.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Builder for constructing `Snapshot` values, mirroring the ergonomic
/// fluent style used for the pipeline's other configuration types.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    labels: BTreeMap<String, String>,
    bundle: Option<BundleStatus>,
    bundles: BTreeMap<String, BundleStatus>,
    discovery: Option<BundleStatus>,
    decision_logs: Option<DecisionLogStatus>,
    plugins: BTreeMap<String, PluginStatus>,
    metrics: Option<BTreeMap<String, serde_json::Value>>,
}

impl SnapshotBuilder {
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn bundle(mut self, bundle: BundleStatus) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn with_bundle(mut self, name: impl Into<String>, status: BundleStatus) -> Self {
        self.bundles.insert(name.into(), status);
        self
    }

    pub fn discovery(mut self, status: BundleStatus) -> Self {
        self.discovery = Some(status);
        self
    }

    pub fn decision_logs(mut self, status: DecisionLogStatus) -> Self {
        self.decision_logs = Some(status);
        self
    }

    pub fn with_plugin(mut self, name: impl Into<String>, status: PluginStatus) -> Self {
        self.plugins.insert(name.into(), status);
        self
    }

    pub fn metrics(mut self, metrics: BTreeMap<String, serde_json::Value>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            labels: self.labels,
            bundle: self.bundle,
            bundles: self.bundles,
            discovery: self.discovery,
            decision_logs: self.decision_logs,
            plugins: self.plugins,
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginState;

    #[test]
    fn empty_optional_fields_are_omitted_on_the_wire() {
        let snapshot = Snapshot::builder().build();
        let json = snapshot.to_json().unwrap();
        assert!(json.get("bundle").is_none());
        assert!(json.get("discovery").is_none());
        assert!(json.get("decision_logs").is_none());
        assert!(json.get("metrics").is_none());
        assert!(json.get("bundles").is_none());
        assert!(json.get("plugins").is_none());
    }

    #[test]
    fn builder_populates_bundles_and_plugins() {
        let snapshot = Snapshot::builder()
            .with_bundle("b1", BundleStatus::new("b1"))
            .with_plugin("bundle", PluginStatus::new("bundle", PluginState::Ok))
            .build();

        assert_eq!(snapshot.bundles.len(), 1);
        assert_eq!(snapshot.plugins.len(), 1);
    }

    #[test]
    fn clone_is_independent_of_the_original() {
        let snapshot = Snapshot::builder()
            .with_bundle("b1", BundleStatus::new("b1"))
            .build();

        let mut cloned = snapshot.clone();
        cloned.bundles.remove("b1");

        assert_eq!(snapshot.bundles.len(), 1, "original must be unaffected by mutating a clone");
        assert_eq!(cloned.bundles.len(), 0);
    }
}
