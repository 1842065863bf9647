//! Prometheus collector set: the live metric objects the dispatcher updates
//! on every dispatch, registered against a registry owned by the host.

use agent_status_types::{BundleStatus, PluginState, Snapshot, StatusError};
use prometheus::{
    histogram_opts, register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, GaugeVec, HistogramVec, Registry,
};

/// Stage names the bundle-load-duration histogram accepts. Any other stage
/// name in `BundleStatus::metrics` is silently ignored.
const KNOWN_STAGES: &[&str] = &[
    "timer_bundle_request_ns",
    "timer_rego_data_parse_ns",
    "timer_rego_module_parse_ns",
    "timer_rego_module_compile_ns",
    "timer_rego_load_bundles_ns",
];

pub struct PrometheusCollectors {
    registry: Registry,
    buckets: Vec<f64>,
    opa_info: GaugeVec,
    plugin_status: GaugeVec,
    bundle_loaded_counter: CounterVec,
    bundle_failed_load_counter: CounterVec,
    last_request: GaugeVec,
    last_successful_request: GaugeVec,
    last_successful_download: GaugeVec,
    last_successful_activation: GaugeVec,
    bundle_load_duration: HistogramVec,
}

impl PrometheusCollectors {
    /// Register the full collector set against `registry`.
    pub fn register(registry: Registry, buckets: Vec<f64>) -> Result<Self, StatusError> {
        let opa_info = register_gauge_vec_with_registry!(
            "opa_info",
            "Information about the policy agent environment",
            &["version"],
            registry
        )
        .map_err(prometheus_err)?;
        opa_info.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);

        let plugin_status = register_gauge_vec_with_registry!(
            "plugin_status",
            "Status of the plugins currently loaded in OPA",
            &["name", "state"],
            registry
        )
        .map_err(prometheus_err)?;

        let bundle_loaded_counter = register_counter_vec_with_registry!(
            "bundle_loaded_counter",
            "Number of times a bundle has successfully loaded",
            &["name"],
            registry
        )
        .map_err(prometheus_err)?;

        let bundle_failed_load_counter = register_counter_vec_with_registry!(
            "bundle_failed_load_counter",
            "Number of times a bundle failed to load",
            &["name", "code", "message"],
            registry
        )
        .map_err(prometheus_err)?;

        let last_request = register_gauge_vec_with_registry!(
            "last_request",
            "Time of last request to the server",
            &["name"],
            registry
        )
        .map_err(prometheus_err)?;

        let last_successful_request = register_gauge_vec_with_registry!(
            "last_successful_request",
            "Time of last successful activation or download",
            &["name"],
            registry
        )
        .map_err(prometheus_err)?;

        let last_successful_download = register_gauge_vec_with_registry!(
            "last_successful_download",
            "Time of last successful bundle download",
            &["name"],
            registry
        )
        .map_err(prometheus_err)?;

        let last_successful_activation = register_gauge_vec_with_registry!(
            "last_successful_activation",
            "Time of last successful bundle activation",
            &["name", "active_revision"],
            registry
        )
        .map_err(prometheus_err)?;

        let bundle_load_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                "bundle_load_duration",
                "Duration of each bundle load stage",
                buckets.clone()
            ),
            &["name", "stage"],
            registry
        )
        .map_err(prometheus_err)?;

        Ok(Self {
            registry,
            buckets,
            opa_info,
            plugin_status,
            bundle_loaded_counter,
            bundle_failed_load_counter,
            last_request,
            last_successful_request,
            last_successful_download,
            last_successful_activation,
            bundle_load_duration,
        })
    }

    /// Unregister every collector from the registry, e.g. on a
    /// Prometheus-enabled → disabled transition.
    pub fn unregister(&self) {
        let _ = self.registry.unregister(Box::new(self.opa_info.clone()));
        let _ = self.registry.unregister(Box::new(self.plugin_status.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.bundle_loaded_counter.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.bundle_failed_load_counter.clone()));
        let _ = self.registry.unregister(Box::new(self.last_request.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.last_successful_request.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.last_successful_download.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.last_successful_activation.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.bundle_load_duration.clone()));
    }

    /// True if the requested bucket boundaries differ from the ones this
    /// histogram was created with.
    pub fn needs_bucket_change(&self, new_buckets: &[f64]) -> bool {
        self.buckets != new_buckets
    }

    /// Unregister and re-create only the histogram, for a bucket-boundary
    /// change that keeps Prometheus enabled.
    pub fn recreate_histogram(&mut self, new_buckets: Vec<f64>) -> Result<(), StatusError> {
        let _ = self
            .registry
            .unregister(Box::new(self.bundle_load_duration.clone()));
        self.bundle_load_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                "bundle_load_duration",
                "Duration of each bundle load stage",
                new_buckets.clone()
            ),
            &["name", "stage"],
            self.registry
        )
        .map_err(prometheus_err)?;
        self.buckets = new_buckets;
        Ok(())
    }

    /// Apply one snapshot's worth of observations: reset the vectors whose
    /// values are a point-in-time view, then re-emit from the snapshot.
    /// Counters only ever move forward.
    pub fn update(&self, snapshot: &Snapshot) {
        self.plugin_status.reset();
        self.last_successful_activation.reset();

        for status in snapshot.plugins.values() {
            let state_label = status.state.as_str();
            for candidate in [PluginState::NotReady, PluginState::Ok, PluginState::Err] {
                let value = if candidate.as_str() == state_label { 1.0 } else { 0.0 };
                self.plugin_status
                    .with_label_values(&[&status.name, candidate.as_str()])
                    .set(value);
            }
        }

        for (name, status) in &snapshot.bundles {
            self.apply_bundle(name, status);
        }
        if let Some(discovery) = &snapshot.discovery {
            self.apply_bundle(&discovery.name, discovery);
        }
    }

    fn apply_bundle(&self, name: &str, status: &BundleStatus) {
        if status.is_loaded() {
            self.bundle_loaded_counter.with_label_values(&[name]).inc();
        } else {
            let code = status.error_code.as_deref().unwrap_or_default();
            let message = status.message.as_deref().unwrap_or_default();
            self.bundle_failed_load_counter
                .with_label_values(&[name, code, message])
                .inc();
        }

        if let Some(t) = status.last_request {
            self.last_request.with_label_values(&[name]).set(t.timestamp_nanos_opt().unwrap_or(0) as f64);
        }
        if let Some(t) = status.last_successful_request {
            self.last_successful_request
                .with_label_values(&[name])
                .set(t.timestamp_nanos_opt().unwrap_or(0) as f64);
        }
        if let Some(t) = status.last_successful_download {
            self.last_successful_download
                .with_label_values(&[name])
                .set(t.timestamp_nanos_opt().unwrap_or(0) as f64);
        }
        if let Some(t) = status.last_successful_activation {
            let revision = status.active_revision.as_deref().unwrap_or_default();
            self.last_successful_activation
                .with_label_values(&[name, revision])
                .set(t.timestamp_nanos_opt().unwrap_or(0) as f64);
        }

        for (stage, nanos) in &status.metrics {
            if KNOWN_STAGES.contains(&stage.as_str()) {
                self.bundle_load_duration
                    .with_label_values(&[name, stage])
                    .observe(*nanos as f64);
            }
        }
    }
}

fn prometheus_err(err: prometheus::Error) -> StatusError {
    StatusError::BadConfig(format!("prometheus registration failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_status_types::DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS;
    use std::collections::BTreeMap;

    fn bundle_with_duration(stage: &str, nanos: i64) -> BundleStatus {
        let mut b = BundleStatus::new("b1");
        b.last_successful_activation = Some(chrono::Utc::now());
        b.metrics.insert(stage.to_string(), nanos);
        b
    }

    #[test]
    fn register_then_unregister_leaves_registry_at_initial_count() {
        let registry = Registry::new();
        let initial = registry.gather().len();

        let collectors = PrometheusCollectors::register(
            registry.clone(),
            DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec(),
        )
        .unwrap();
        assert!(registry.gather().len() > initial);

        collectors.unregister();
        assert_eq!(registry.gather().len(), initial);
    }

    #[test]
    fn loaded_bundle_increments_loaded_counter() {
        let registry = Registry::new();
        let collectors = PrometheusCollectors::register(
            registry,
            DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec(),
        )
        .unwrap();

        let mut bundles = BTreeMap::new();
        bundles.insert(
            "b1".to_string(),
            bundle_with_duration("timer_bundle_request_ns", 100),
        );
        let snapshot = Snapshot::with_labels(BTreeMap::new());
        let mut snapshot = snapshot;
        snapshot.bundles = bundles;

        collectors.update(&snapshot);
        let value = collectors
            .bundle_loaded_counter
            .with_label_values(&["b1"])
            .get();
        assert_eq!(value, 1.0);
    }

    #[test]
    fn unknown_stage_is_silently_ignored() {
        let registry = Registry::new();
        let collectors = PrometheusCollectors::register(
            registry,
            DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec(),
        )
        .unwrap();

        let mut snapshot = Snapshot::with_labels(BTreeMap::new());
        snapshot
            .bundles
            .insert("b1".to_string(), bundle_with_duration("some_other_stage", 5));

        collectors.update(&snapshot);
        let sample_count = collectors
            .bundle_load_duration
            .with_label_values(&["b1", "some_other_stage"])
            .get_sample_count();
        assert_eq!(sample_count, 0);
    }

    #[test]
    fn bucket_change_is_detected() {
        let registry = Registry::new();
        let mut collectors = PrometheusCollectors::register(
            registry,
            DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec(),
        )
        .unwrap();

        assert!(!collectors.needs_bucket_change(DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS));
        assert!(collectors.needs_bucket_change(&[1.0, 2.0]));

        collectors.recreate_histogram(vec![1.0, 2.0]).unwrap();
        assert!(!collectors.needs_bucket_change(&[1.0, 2.0]));
    }
}
