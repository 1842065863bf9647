//! Upload dispatcher and the external collaborator traits it talks to.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_status_types::{PluginState, Snapshot, StatusError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::metrics::PrometheusCollectors;

/// Accepts structured records from the pipeline (one per dispatch).
pub trait ConsoleLogger: Send + Sync {
    fn log(&self, record: serde_json::Value);
}

/// The host's outbound HTTP surface: post a JSON body, get back a status code.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn post_status(
        &self,
        path: &str,
        body: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<u16, StatusError>;
}

/// A caller-supplied sink identified by name.
#[async_trait]
pub trait NamedBackend: Send + Sync {
    async fn log(&self, snapshot: &Snapshot) -> Result<(), StatusError>;
}

/// Everything the pipeline borrows from its host, without owning any of it.
pub trait PluginHost: Send + Sync {
    fn labels(&self) -> BTreeMap<String, String>;
    fn service_client(&self, name: &str) -> Option<Arc<dyn ServiceClient>>;
    fn console_logger(&self) -> Option<Arc<dyn ConsoleLogger>>;
    fn prometheus_registry(&self) -> Option<prometheus::Registry>;
    fn named_backend(&self, name: &str) -> Option<Arc<dyn NamedBackend>>;
    fn known_service_names(&self) -> Vec<String>;
    fn known_plugin_names(&self) -> Vec<String>;
    fn set_plugin_state(&self, name: &str, state: PluginState);
}

/// Fans a snapshot out to whichever sinks are configured.
pub struct Dispatcher {
    pub console_enabled: bool,
    pub prometheus_enabled: bool,
    pub named_backend: Option<String>,
    pub service_name: Option<String>,
    pub partition_name: String,
}

impl Dispatcher {
    /// Run one dispatch pass: console, then Prometheus, then exactly one of
    /// named backend or HTTP service (named backend wins if both are
    /// configured, matching the precedence in the upload contract).
    pub async fn dispatch(
        &self,
        snapshot: &Snapshot,
        host: &dyn PluginHost,
        collectors: Option<&PrometheusCollectors>,
        cancel: CancellationToken,
    ) -> Result<(), StatusError> {
        if self.console_enabled {
            if let Some(logger) = host.console_logger() {
                match console_record(snapshot) {
                    Ok(record) => logger.log(record),
                    Err(err) => tracing::error!(error = %err, "failed to build console record"),
                }
            }
        }

        if self.prometheus_enabled {
            if let Some(collectors) = collectors {
                collectors.update(snapshot);
            }
        }

        if let Some(backend_name) = &self.named_backend {
            return match host.named_backend(backend_name) {
                Some(backend) => backend.log(snapshot).await,
                None => Err(StatusError::BadBackend(backend_name.clone())),
            };
        }

        if let Some(service_name) = &self.service_name {
            let client = host
                .service_client(service_name)
                .ok_or_else(|| StatusError::BadServiceName(service_name.clone()))?;
            let body = serde_json::to_vec(snapshot)?;
            let path = format!("/status/{}", self.partition_name);
            let status = client.post_status(&path, body, cancel).await?;
            return match status {
                200..=299 => Ok(()),
                other => Err(StatusError::RemoteReject {
                    code: other,
                    reason: reason_phrase(other).to_string(),
                }),
            };
        }

        Ok(())
    }
}

/// Flatten the snapshot to JSON and attach the console record's fixed type
/// label, matching the upload contract's console record shape.
fn console_record(snapshot: &Snapshot) -> Result<serde_json::Value, StatusError> {
    let mut value = serde_json::to_value(snapshot)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "type".to_string(),
            serde_json::Value::String("openpolicyagent.org/status".to_string()),
        );
    }
    Ok(value)
}

fn reason_phrase(code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown")
}

/// Default [`ServiceClient`] backed by `reqwest`.
pub struct ReqwestServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestServiceClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ServiceClient for ReqwestServiceClient {
    async fn post_status(
        &self,
        path: &str,
        body: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<u16, StatusError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        tokio::select! {
            result = request => {
                let response = result.map_err(StatusError::TransportFailure)?;
                let status = response.status().as_u16();
                let _ = response.bytes().await;
                Ok(status)
            }
            _ = cancel.cancelled() => Err(StatusError::Cancelled),
        }
    }
}

/// Default [`ConsoleLogger`] backed by `tracing`.
pub struct TracingConsoleLogger;

impl ConsoleLogger for TracingConsoleLogger {
    fn log(&self, record: serde_json::Value) {
        tracing::info!(record = %record, "status update");
    }
}
