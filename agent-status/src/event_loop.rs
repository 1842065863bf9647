//! The event loop: a single-threaded reactor multiplexing every producer
//! and lifecycle channel into the snapshot store and the upload dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_status_types::{
    BundleStatus, Configuration, DecisionLogStatus, PluginStatus, Snapshot, StatusError,
    TriggerMode,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::channel::{mailbox, rendezvous, Mailbox, MailboxReceiver};
use crate::dispatch::{Dispatcher, PluginHost};
use crate::metrics::PrometheusCollectors;
use crate::store::SnapshotStore;

pub struct ReconfigureRequest {
    pub config: Configuration,
    pub reply: oneshot::Sender<Result<(), StatusError>>,
}

pub struct SnapshotQuery {
    pub reply: oneshot::Sender<Snapshot>,
}

pub struct TriggerRequest {
    pub cancel: CancellationToken,
    pub reply: oneshot::Sender<Result<(), StatusError>>,
}

pub struct ShutdownRequest {
    pub reply: oneshot::Sender<()>,
}

/// Sender-side handles the lifecycle manager and producers use to reach the
/// running loop. Cloning a handle is cheap; every field is itself cheap to
/// clone or is an owned `mpsc::Sender`.
#[derive(Clone)]
pub struct LoopHandles {
    pub plugin_statuses: Arc<Mailbox<BTreeMap<String, PluginStatus>>>,
    pub bulk_bundle_statuses: Arc<Mailbox<BTreeMap<String, BundleStatus>>>,
    pub single_bundle_status: Arc<Mailbox<BundleStatus>>,
    pub discovery_status: mpsc::Sender<BundleStatus>,
    pub decision_log_status: mpsc::Sender<DecisionLogStatus>,
    pub reconfigure: mpsc::Sender<ReconfigureRequest>,
    pub snapshot_query: mpsc::Sender<SnapshotQuery>,
    pub trigger: mpsc::Sender<TriggerRequest>,
    pub shutdown: mpsc::Sender<ShutdownRequest>,
}

struct LoopReceivers {
    plugin_statuses: MailboxReceiver<BTreeMap<String, PluginStatus>>,
    bulk_bundle_statuses: MailboxReceiver<BTreeMap<String, BundleStatus>>,
    single_bundle_status: MailboxReceiver<BundleStatus>,
    discovery_status: mpsc::Receiver<BundleStatus>,
    decision_log_status: mpsc::Receiver<DecisionLogStatus>,
    reconfigure: mpsc::Receiver<ReconfigureRequest>,
    snapshot_query: mpsc::Receiver<SnapshotQuery>,
    trigger: mpsc::Receiver<TriggerRequest>,
    shutdown: mpsc::Receiver<ShutdownRequest>,
}

/// Spawn the event loop as a background task, returning the handles used to
/// reach it and the `JoinHandle` for the task itself.
pub fn spawn(
    initial_config: Configuration,
    host: Arc<dyn PluginHost>,
    upload_cancel: CancellationToken,
) -> (LoopHandles, tokio::task::JoinHandle<()>) {
    let (plugin_tx, plugin_rx) = mailbox();
    let (bulk_tx, bulk_rx) = mailbox();
    let (single_tx, single_rx) = mailbox();
    let (discovery_tx, discovery_rx) = rendezvous();
    let (decision_log_tx, decision_log_rx) = rendezvous();
    let (reconfigure_tx, reconfigure_rx) = mpsc::channel(1);
    let (query_tx, query_rx) = mpsc::channel(8);
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let handles = LoopHandles {
        plugin_statuses: Arc::new(plugin_tx),
        bulk_bundle_statuses: Arc::new(bulk_tx),
        single_bundle_status: Arc::new(single_tx),
        discovery_status: discovery_tx,
        decision_log_status: decision_log_tx,
        reconfigure: reconfigure_tx,
        snapshot_query: query_tx,
        trigger: trigger_tx,
        shutdown: shutdown_tx,
    };

    let receivers = LoopReceivers {
        plugin_statuses: plugin_rx,
        bulk_bundle_statuses: bulk_rx,
        single_bundle_status: single_rx,
        discovery_status: discovery_rx,
        decision_log_status: decision_log_rx,
        reconfigure: reconfigure_rx,
        snapshot_query: query_rx,
        trigger: trigger_rx,
        shutdown: shutdown_rx,
    };

    let join = tokio::spawn(run(initial_config, host, receivers, upload_cancel));
    (handles, join)
}

async fn run(
    mut config: Configuration,
    host: Arc<dyn PluginHost>,
    mut rx: LoopReceivers,
    upload_cancel: CancellationToken,
) {
    let mut store = SnapshotStore::new();
    let mut collectors = if config.prometheus_enabled {
        host.prometheus_registry()
            .and_then(|registry| {
                PrometheusCollectors::register(registry, config.bundle_load_duration_buckets.clone())
                    .map_err(|err| tracing::error!(error = %err, "failed to register prometheus collectors"))
                    .ok()
            })
    } else {
        None
    };

    loop {
        tokio::select! {
            update = rx.plugin_statuses.recv() => {
                store.apply_plugin_statuses(update);
                maybe_dispatch(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
            }
            update = rx.bulk_bundle_statuses.recv() => {
                store.apply_bulk_bundles(update);
                maybe_dispatch(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
            }
            update = rx.single_bundle_status.recv() => {
                store.set_bundle(update);
                // Deprecated channel uploads unconditionally, regardless of trigger mode.
                dispatch_once(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
            }
            Some(update) = rx.discovery_status.recv() => {
                store.set_discovery(update);
                maybe_dispatch(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
            }
            Some(update) = rx.decision_log_status.recv() => {
                store.set_decision_logs(update);
                maybe_dispatch(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
            }
            Some(request) = rx.reconfigure.recv() => {
                let result = apply_reconfigure(&mut config, &mut collectors, host.as_ref(), request.config);
                let _ = request.reply.send(result);
            }
            Some(query) = rx.snapshot_query.recv() => {
                drain_pending(&mut rx, &mut store);
                let _ = query.reply.send(store.build(host.labels()));
            }
            Some(request) = rx.trigger.recv() => {
                drain_pending(&mut rx, &mut store);
                let result = dispatch_once(&config, &store, host.as_ref(), collectors.as_ref(), &request.cancel).await;
                let outcome = if request.cancel.is_cancelled() {
                    Err(StatusError::Cancelled)
                } else {
                    result
                };
                let _ = request.reply.send(outcome);
            }
            Some(request) = rx.shutdown.recv() => {
                if drain_pending(&mut rx, &mut store) {
                    let _ = dispatch_once(&config, &store, host.as_ref(), collectors.as_ref(), &upload_cancel).await;
                }
                upload_cancel.cancel();
                let _ = request.reply.send(());
                return;
            }
        }
    }
}

/// Non-blockingly drain every intake channel so a query or trigger observes
/// the freshest known values. Returns whether anything was drained.
fn drain_pending(rx: &mut LoopReceivers, store: &mut SnapshotStore) -> bool {
    let mut changed = false;
    if let Some(update) = rx.plugin_statuses.try_drain() {
        store.apply_plugin_statuses(update);
        changed = true;
    }
    if let Some(update) = rx.bulk_bundle_statuses.try_drain() {
        store.apply_bulk_bundles(update);
        changed = true;
    }
    if let Some(update) = rx.single_bundle_status.try_drain() {
        store.set_bundle(update);
        changed = true;
    }
    if let Ok(update) = rx.discovery_status.try_recv() {
        store.set_discovery(update);
        changed = true;
    }
    if let Ok(update) = rx.decision_log_status.try_recv() {
        store.set_decision_logs(update);
        changed = true;
    }
    changed
}

async fn maybe_dispatch(
    config: &Configuration,
    store: &SnapshotStore,
    host: &dyn PluginHost,
    collectors: Option<&PrometheusCollectors>,
    cancel: &CancellationToken,
) {
    if config.trigger_mode == TriggerMode::Periodic {
        let _ = dispatch_once(config, store, host, collectors, cancel).await;
    }
}

async fn dispatch_once(
    config: &Configuration,
    store: &SnapshotStore,
    host: &dyn PluginHost,
    collectors: Option<&PrometheusCollectors>,
    cancel: &CancellationToken,
) -> Result<(), StatusError> {
    let snapshot = store.build(host.labels());
    let dispatcher = Dispatcher {
        console_enabled: config.console_enabled,
        prometheus_enabled: config.prometheus_enabled,
        named_backend: config.named_backend.clone(),
        service_name: config.service_name.clone(),
        partition_name: config.partition_name.clone(),
    };
    let result = dispatcher
        .dispatch(&snapshot, host, collectors, cancel.clone())
        .await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "status upload failed");
    }
    result
}

fn apply_reconfigure(
    config: &mut Configuration,
    collectors: &mut Option<PrometheusCollectors>,
    host: &dyn PluginHost,
    new_config: Configuration,
) -> Result<(), StatusError> {
    let prometheus_was_enabled = config.prometheus_enabled;
    let prometheus_now_enabled = new_config.prometheus_enabled;

    if prometheus_was_enabled && !prometheus_now_enabled {
        if let Some(c) = collectors.take() {
            c.unregister();
        }
    } else if !prometheus_was_enabled && prometheus_now_enabled {
        if let Some(registry) = host.prometheus_registry() {
            *collectors = Some(PrometheusCollectors::register(
                registry,
                new_config.bundle_load_duration_buckets.clone(),
            )?);
        }
    } else if prometheus_now_enabled {
        if let Some(c) = collectors.as_mut() {
            if c.needs_bucket_change(&new_config.bundle_load_duration_buckets) {
                c.recreate_histogram(new_config.bundle_load_duration_buckets.clone())?;
            }
        }
    }

    *config = new_config;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_status_types::{Configuration, PluginState, TriggerMode};
    use std::collections::BTreeMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        labels: Map<String, String>,
        console: Arc<crate::dispatch::TracingConsoleLogger>,
        dispatch_count: Arc<AtomicUsize>,
    }

    struct CountingClient {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl crate::dispatch::ServiceClient for CountingClient {
        async fn post_status(
            &self,
            _path: &str,
            _body: Vec<u8>,
            _cancel: CancellationToken,
        ) -> Result<u16, StatusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(200)
        }
    }

    impl PluginHost for CountingHost {
        fn labels(&self) -> Map<String, String> {
            self.labels.clone()
        }
        fn service_client(&self, _name: &str) -> Option<Arc<dyn crate::dispatch::ServiceClient>> {
            Some(Arc::new(CountingClient {
                count: self.dispatch_count.clone(),
            }))
        }
        fn console_logger(&self) -> Option<Arc<dyn crate::dispatch::ConsoleLogger>> {
            Some(self.console.clone())
        }
        fn prometheus_registry(&self) -> Option<prometheus::Registry> {
            None
        }
        fn named_backend(&self, _name: &str) -> Option<Arc<dyn crate::dispatch::NamedBackend>> {
            None
        }
        fn known_service_names(&self) -> Vec<String> {
            vec!["s".to_string()]
        }
        fn known_plugin_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn set_plugin_state(&self, _name: &str, _state: PluginState) {}
    }

    fn periodic_config() -> Configuration {
        Configuration {
            service_name: Some("s".to_string()),
            partition_name: String::new(),
            named_backend: None,
            console_enabled: false,
            prometheus_enabled: false,
            bundle_load_duration_buckets: agent_status_types::DEFAULT_BUNDLE_LOAD_DURATION_BUCKETS.to_vec(),
            trigger_mode: TriggerMode::Periodic,
        }
    }

    fn manual_config() -> Configuration {
        Configuration {
            trigger_mode: TriggerMode::Manual,
            ..periodic_config()
        }
    }

    #[tokio::test]
    async fn periodic_mode_dispatches_on_every_plugin_update() {
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let host = Arc::new(CountingHost {
            labels: Map::new(),
            console: Arc::new(crate::dispatch::TracingConsoleLogger),
            dispatch_count: dispatch_count.clone(),
        });
        let (handles, join) = spawn(periodic_config(), host, CancellationToken::new());

        let mut update = Map::new();
        update.insert(
            "bundle".to_string(),
            agent_status_types::PluginStatus::new("bundle", PluginState::Ok),
        );
        handles.plugin_statuses.send(update);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 1);

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .shutdown
            .send(ShutdownRequest { reply: reply_tx })
            .await
            .unwrap();
        let _ = reply_rx.await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn manual_mode_coalesces_until_triggered() {
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let host = Arc::new(CountingHost {
            labels: Map::new(),
            console: Arc::new(crate::dispatch::TracingConsoleLogger),
            dispatch_count: dispatch_count.clone(),
        });
        let (handles, join) = spawn(manual_config(), host, CancellationToken::new());

        let mut update = Map::new();
        update.insert(
            "bundle".to_string(),
            agent_status_types::PluginStatus::new("bundle", PluginState::Ok),
        );
        handles.plugin_statuses.send(update);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 0, "manual mode must not dispatch on arrival");

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .trigger
            .send(TriggerRequest {
                cancel: CancellationToken::new(),
                reply: reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 1);

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .shutdown
            .send(ShutdownRequest { reply: reply_tx })
            .await
            .unwrap();
        let _ = reply_rx.await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_query_observes_freshest_pending_update() {
        let host = Arc::new(CountingHost {
            labels: Map::new(),
            console: Arc::new(crate::dispatch::TracingConsoleLogger),
            dispatch_count: Arc::new(AtomicUsize::new(0)),
        });
        let (handles, join) = spawn(manual_config(), host, CancellationToken::new());

        let mut update = Map::new();
        update.insert("b1".to_string(), BundleStatus::new("b1"));
        handles.bulk_bundle_statuses.send(update);

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .snapshot_query
            .send(SnapshotQuery { reply: reply_tx })
            .await
            .unwrap();
        let snapshot = reply_rx.await.unwrap();
        assert!(snapshot.bundles.contains_key("b1"));

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .shutdown
            .send(ShutdownRequest { reply: reply_tx })
            .await
            .unwrap();
        let _ = reply_rx.await;
        join.await.unwrap();
    }
}
