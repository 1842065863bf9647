//! Configuration schema and validation.

use serde::{Deserialize, Serialize};

use crate::StatusError;

/// Default histogram bucket boundaries for `bundle_load_duration`, in
/// nanoseconds.
pub const DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS: &[f64] = &[
    1e3, 1e4, 1e5, 1e6, 4e6, 2e7, 1e8, 1e9, 5e9, 3e10,
];

/// When the dispatcher is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Periodic,
    Manual,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Periodic => "periodic",
            TriggerMode::Manual => "manual",
        }
    }

    pub fn parse(literal: &str) -> Result<Self, StatusError> {
        match literal {
            "periodic" => Ok(TriggerMode::Periodic),
            "manual" => Ok(TriggerMode::Manual),
            other => Err(StatusError::BadTriggerMode(other.to_string())),
        }
    }
}

/// Raw `prometheus_config.collectors.bundle_loading_duration_ns` sub-object.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBundleLoadDurationCollector {
    pub buckets: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCollectors {
    pub bundle_loading_duration_ns: Option<RawBundleLoadDurationCollector>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPrometheusConfig {
    pub collectors: Option<RawCollectors>,
}

/// The configuration exactly as it arrives over the wire: every field
/// optional, no validation applied yet.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub service: Option<String>,
    pub partition_name: Option<String>,
    pub plugin: Option<String>,
    #[serde(default)]
    pub console: Option<bool>,
    #[serde(default)]
    pub prometheus: Option<bool>,
    pub prometheus_config: Option<RawPrometheusConfig>,
    pub trigger: Option<String>,
}

/// A fully validated, defaulted configuration the pipeline actually runs
/// with. Constructed only via [`Configuration::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub service_name: Option<String>,
    pub partition_name: String,
    pub named_backend: Option<String>,
    pub console_enabled: bool,
    pub prometheus_enabled: bool,
    pub bundle_load_duration_buckets: Vec<f64>,
    pub trigger_mode: TriggerMode,
}

impl Configuration {
    /// Validate a raw configuration against the host's known service and
    /// plugin names, plus an optional caller-declared trigger mode that
    /// must agree with whatever the raw config itself parses to.
    ///
    /// Returns `Ok(None)` when the configuration describes a no-op
    /// pipeline (no sink enabled) — the caller should skip constructing
    /// the component entirely in that case.
    pub fn validate(
        raw: RawConfig,
        known_services: &[String],
        known_plugins: &[String],
        declared_trigger_mode: Option<TriggerMode>,
    ) -> Result<Option<Configuration>, StatusError> {
        let console_enabled = raw.console.unwrap_or(false);
        let prometheus_enabled = raw.prometheus.unwrap_or(false);

        if let Some(backend) = raw.plugin.as_deref() {
            if !backend.is_empty() && !known_plugins.iter().any(|p| p == backend) {
                return Err(StatusError::BadBackendName(backend.to_string()));
            }
        }

        let mut service_name = raw.service.clone().filter(|s| !s.is_empty());
        if service_name.is_none()
            && !known_services.is_empty()
            && !console_enabled
            && !prometheus_enabled
        {
            service_name = known_services.first().cloned();
        }
        if let Some(name) = service_name.as_deref() {
            if !known_services.iter().any(|s| s == name) {
                return Err(StatusError::BadServiceName(name.to_string()));
            }
        }

        let named_backend = raw.plugin.clone().filter(|p| !p.is_empty());

        let active = service_name.is_some()
            || named_backend.is_some()
            || console_enabled
            || prometheus_enabled;
        if !active {
            return Ok(None);
        }

        let trigger_literal = raw.trigger.as_deref().unwrap_or("periodic");
        let parsed_trigger_mode = TriggerMode::parse(trigger_literal)?;
        if let Some(declared) = declared_trigger_mode {
            if declared != parsed_trigger_mode {
                return Err(StatusError::TriggerModeMismatch {
                    declared: declared.as_str().to_string(),
                    parsed: parsed_trigger_mode.as_str().to_string(),
                });
            }
        }

        let bundle_load_duration_buckets = raw
            .prometheus_config
            .as_ref()
            .and_then(|p| p.collectors.as_ref())
            .and_then(|c| c.bundle_loading_duration_ns.as_ref())
            .and_then(|b| b.buckets.clone())
            .unwrap_or_else(|| DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec());

        Ok(Some(Configuration {
            service_name,
            partition_name: raw.partition_name.unwrap_or_default(),
            named_backend,
            console_enabled,
            prometheus_enabled,
            bundle_load_duration_buckets,
            trigger_mode: parsed_trigger_mode,
        }))
    }
}
