//! Lifecycle manager: Start / Stop / Reconfigure / Trigger.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agent_status_types::{Configuration, PluginState, PluginStatus, RawConfig, StatusError, TriggerMode};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::dispatch::PluginHost;
use crate::event_loop::{self, LoopHandles, ReconfigureRequest, ShutdownRequest, TriggerRequest};

/// The name this component reports its own readiness under.
pub const PLUGIN_NAME: &str = "status";

/// Owns the running event loop and exposes the four lifecycle operations.
/// Not started until [`StatusPlugin::start`] is called.
pub struct StatusPlugin {
    host: Arc<dyn PluginHost>,
    running: Option<Running>,
}

struct Running {
    handles: LoopHandles,
    join: tokio::task::JoinHandle<()>,
    upload_cancel: CancellationToken,
}

impl StatusPlugin {
    pub fn new(host: Arc<dyn PluginHost>) -> Self {
        Self { host, running: None }
    }

    /// Validate a raw configuration against the host, optionally checking a
    /// caller-declared trigger mode. `Ok(None)` means a no-op pipeline: the
    /// caller should not construct (or should tear down) the component.
    pub fn validate(
        &self,
        raw: RawConfig,
        declared_trigger_mode: Option<TriggerMode>,
    ) -> Result<Option<Configuration>, StatusError> {
        Configuration::validate(
            raw,
            &self.host.known_service_names(),
            &self.host.known_plugin_names(),
            declared_trigger_mode,
        )
    }

    /// Transition readiness to `ok`, spawn the event loop, and deliver the
    /// initial readiness transition into the intake channel so a
    /// periodic-mode pipeline produces its first upload.
    pub fn start(&mut self, config: Configuration) {
        let upload_cancel = CancellationToken::new();
        let (handles, join) = event_loop::spawn(config, self.host.clone(), upload_cancel.clone());

        self.host.set_plugin_state(PLUGIN_NAME, PluginState::Ok);
        let mut initial = BTreeMap::new();
        initial.insert(
            PLUGIN_NAME.to_string(),
            PluginStatus::new(PLUGIN_NAME, PluginState::Ok),
        );
        handles.plugin_statuses.send(initial);

        self.running = Some(Running {
            handles,
            join,
            upload_cancel,
        });
    }

    /// Race a best-effort flush against `deadline`. If the deadline expires
    /// first, the flush is abandoned and a warning is logged.
    pub async fn stop(&mut self, deadline: Duration) {
        let Some(running) = self.running.take() else {
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let send_result = running
            .handles
            .shutdown
            .send(ShutdownRequest { reply: reply_tx })
            .await;

        if send_result.is_ok() {
            match tokio::time::timeout(deadline, reply_rx).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("graceful shutdown flush abandoned: deadline exceeded");
                }
            }
        }

        running.upload_cancel.cancel();
        let _ = running.join.await;
        self.host.set_plugin_state(PLUGIN_NAME, PluginState::NotReady);
    }

    /// Synchronously swap the running configuration.
    pub async fn reconfigure(&mut self, config: Configuration) -> Result<(), StatusError> {
        let Some(running) = self.running.as_ref() else {
            return Err(StatusError::BadConfig("plugin is not running".to_string()));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        running
            .handles
            .reconfigure
            .send(ReconfigureRequest {
                config,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StatusError::BadConfig("event loop is no longer running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| StatusError::BadConfig("event loop dropped the reconfigure reply".to_string()))?
    }

    /// Valid in any trigger mode, but only does useful work in manual mode.
    /// Returns whichever of the dispatcher's result or the caller's
    /// cancellation happens first.
    pub async fn trigger(&mut self, cancel: CancellationToken) -> Result<(), StatusError> {
        let Some(running) = self.running.as_ref() else {
            return Err(StatusError::BadConfig("plugin is not running".to_string()));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        running
            .handles
            .trigger
            .send(TriggerRequest {
                cancel: cancel.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StatusError::BadConfig("event loop is no longer running".to_string()))?;

        tokio::select! {
            result = reply_rx => {
                result.map_err(|_| StatusError::BadConfig("event loop dropped the trigger reply".to_string()))?
            }
            _ = cancel.cancelled() => Err(StatusError::Cancelled),
        }
    }

    /// Synchronous snapshot read, used by tests and diagnostics.
    pub async fn snapshot(&self) -> Result<agent_status_types::Snapshot, StatusError> {
        let Some(running) = self.running.as_ref() else {
            return Err(StatusError::BadConfig("plugin is not running".to_string()));
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        running
            .handles
            .snapshot_query
            .send(event_loop::SnapshotQuery { reply: reply_tx })
            .await
            .map_err(|_| StatusError::BadConfig("event loop is no longer running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| StatusError::BadConfig("event loop dropped the snapshot reply".to_string()))
    }

    pub fn handles(&self) -> Option<&LoopHandles> {
        self.running.as_ref().map(|r| &r.handles)
    }
}
