//! Snapshot store: holds the last-seen value for each event kind.

use std::collections::BTreeMap;

use agent_status_types::{BundleStatus, DecisionLogStatus, PluginStatus, Snapshot};

/// Mutable record of the most recent status observed for every event kind.
///
/// Only the event loop ever touches this directly; producing a [`Snapshot`]
/// copies everything out by value, so callers holding a snapshot never see
/// a later mutation of the store.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    bundle: Option<BundleStatus>,
    bundles: BTreeMap<String, BundleStatus>,
    discovery: Option<BundleStatus>,
    decision_logs: Option<DecisionLogStatus>,
    plugins: BTreeMap<String, PluginStatus>,
    metrics: Option<BTreeMap<String, serde_json::Value>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the deprecated single-bundle update.
    pub fn set_bundle(&mut self, status: BundleStatus) {
        self.bundle = Some(status);
    }

    /// Record a bulk bundle update. A bulk update carries the status of
    /// every currently-known bundle, so it wholesale-replaces the map
    /// rather than merging into it — a bundle missing from the update has
    /// dropped out and must disappear from the store too.
    pub fn apply_bulk_bundles(&mut self, update: BTreeMap<String, BundleStatus>) {
        self.bundles = update;
    }

    pub fn set_discovery(&mut self, status: BundleStatus) {
        self.discovery = Some(status);
    }

    pub fn set_decision_logs(&mut self, status: DecisionLogStatus) {
        self.decision_logs = Some(status);
    }

    /// Record a bulk plugin-readiness update. Wholesale-replaces the map,
    /// same as [`Self::apply_bulk_bundles`]: the update is a full snapshot
    /// of every currently-known plugin, not a delta.
    pub fn apply_plugin_statuses(&mut self, update: BTreeMap<String, PluginStatus>) {
        self.plugins = update;
    }

    pub fn set_metrics(&mut self, metrics: BTreeMap<String, serde_json::Value>) {
        self.metrics = Some(metrics);
    }

    /// Produce a consolidated snapshot, with labels supplied by the caller
    /// (the host's labels, read fresh on every build).
    pub fn build(&self, labels: BTreeMap<String, String>) -> Snapshot {
        Snapshot {
            labels,
            bundle: self.bundle.clone(),
            bundles: self.bundles.clone(),
            discovery: self.discovery.clone(),
            decision_logs: self.decision_logs.clone(),
            plugins: self.plugins.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_status_types::PluginState;

    #[test]
    fn empty_store_builds_a_snapshot_with_only_labels() {
        let store = SnapshotStore::new();
        let mut labels = BTreeMap::new();
        labels.insert("id".to_string(), "agent-1".to_string());

        let snapshot = store.build(labels.clone());
        assert_eq!(snapshot.labels, labels);
        assert!(snapshot.bundles.is_empty());
        assert!(snapshot.plugins.is_empty());
    }

    #[test]
    fn bulk_bundle_update_replaces_by_name() {
        let mut store = SnapshotStore::new();
        let mut first = BTreeMap::new();
        first.insert("b1".to_string(), BundleStatus::new("b1"));
        store.apply_bulk_bundles(first);

        let mut second = BundleStatus::new("b1");
        second.active_revision = Some("r2".to_string());
        let mut update = BTreeMap::new();
        update.insert("b1".to_string(), second);
        store.apply_bulk_bundles(update);

        let snapshot = store.build(BTreeMap::new());
        assert_eq!(
            snapshot.bundles.get("b1").unwrap().active_revision,
            Some("r2".to_string())
        );
    }

    #[test]
    fn bulk_bundle_update_drops_bundles_missing_from_the_new_map() {
        let mut store = SnapshotStore::new();
        let mut first = BTreeMap::new();
        first.insert("b1".to_string(), BundleStatus::new("b1"));
        first.insert("b2".to_string(), BundleStatus::new("b2"));
        store.apply_bulk_bundles(first);

        let mut second = BTreeMap::new();
        second.insert("b1".to_string(), BundleStatus::new("b1"));
        store.apply_bulk_bundles(second);

        let snapshot = store.build(BTreeMap::new());
        assert_eq!(snapshot.bundles.len(), 1, "b2 dropped out of the latest bulk update");
        assert!(snapshot.bundles.contains_key("b1"));
    }

    #[test]
    fn plugin_update_drops_plugins_missing_from_the_new_map() {
        use agent_status_types::PluginState;

        let mut store = SnapshotStore::new();
        let mut first = BTreeMap::new();
        first.insert("bundle".to_string(), PluginStatus::new("bundle", PluginState::Ok));
        first.insert("discovery".to_string(), PluginStatus::new("discovery", PluginState::Ok));
        store.apply_plugin_statuses(first);

        let mut second = BTreeMap::new();
        second.insert("bundle".to_string(), PluginStatus::new("bundle", PluginState::Ok));
        store.apply_plugin_statuses(second);

        let snapshot = store.build(BTreeMap::new());
        assert_eq!(snapshot.plugins.len(), 1, "discovery dropped out of the latest bulk update");
    }

    #[test]
    fn snapshot_is_independent_of_later_store_mutation() {
        let mut store = SnapshotStore::new();
        let mut update = BTreeMap::new();
        update.insert("b1".to_string(), BundleStatus::new("b1"));
        store.apply_bulk_bundles(update);

        let snapshot = store.build(BTreeMap::new());

        let mut another = BTreeMap::new();
        another.insert("b2".to_string(), BundleStatus::new("b2"));
        store.apply_bulk_bundles(another);

        assert_eq!(snapshot.bundles.len(), 1, "snapshot must not see later mutations");
    }

    #[test]
    fn plugin_updates_replace_by_name() {
        let mut store = SnapshotStore::new();
        let mut update = BTreeMap::new();
        update.insert(
            "bundle".to_string(),
            PluginStatus::new("bundle", PluginState::NotReady),
        );
        store.apply_plugin_statuses(update);

        let mut update = BTreeMap::new();
        update.insert("bundle".to_string(), PluginStatus::new("bundle", PluginState::Ok));
        store.apply_plugin_statuses(update);

        let snapshot = store.build(BTreeMap::new());
        assert_eq!(snapshot.plugins.get("bundle").unwrap().state, PluginState::Ok);
    }
}
