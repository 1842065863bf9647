//! Reference binary: loads a file+environment configuration, wires up the
//! host collaborators (HTTP client, console logger, Prometheus registry),
//! and runs the status reporting pipeline until interrupted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agent_status::{
    ConsoleLogger, NamedBackend, PluginHost, PluginState, RawConfig, ReqwestServiceClient,
    ServiceClient, StatusPlugin, TracingConsoleLogger,
};
use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};

#[derive(Parser, Debug)]
#[command(name = "agent-status-demo")]
#[command(about = "Runs the status reporting pipeline against a TOML+env configuration")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, default_value = "status.toml")]
    config: std::path::PathBuf,

    /// Base URL for the control-plane status endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8181")]
    base_url: String,

    /// Agent id reported in the snapshot's labels.
    #[arg(long, default_value = "agent-demo")]
    id: String,
}

struct DemoHost {
    labels: BTreeMap<String, String>,
    client: Arc<ReqwestServiceClient>,
    console: Arc<TracingConsoleLogger>,
    registry: prometheus::Registry,
    known_services: Vec<String>,
}

impl PluginHost for DemoHost {
    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    fn service_client(&self, name: &str) -> Option<Arc<dyn ServiceClient>> {
        if self.known_services.iter().any(|s| s == name) {
            Some(self.client.clone())
        } else {
            None
        }
    }

    fn console_logger(&self) -> Option<Arc<dyn ConsoleLogger>> {
        Some(self.console.clone())
    }

    fn prometheus_registry(&self) -> Option<prometheus::Registry> {
        Some(self.registry.clone())
    }

    fn named_backend(&self, _name: &str) -> Option<Arc<dyn NamedBackend>> {
        None
    }

    fn known_service_names(&self) -> Vec<String> {
        self.known_services.clone()
    }

    fn known_plugin_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn set_plugin_state(&self, name: &str, state: PluginState) {
        tracing::info!(plugin = name, state = %state, "plugin readiness changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();

    let raw: RawConfig = Config::builder()
        .add_source(File::from(args.config.as_path()).required(false))
        .add_source(Environment::with_prefix("AGENT_STATUS"))
        .build()
        .context("loading configuration")?
        .try_deserialize()
        .context("deserializing configuration")?;

    let mut labels = BTreeMap::new();
    labels.insert("id".to_string(), args.id.clone());
    labels.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

    let http_client = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;

    let host = Arc::new(DemoHost {
        labels,
        client: Arc::new(ReqwestServiceClient::new(http_client, args.base_url)),
        console: Arc::new(TracingConsoleLogger),
        registry: prometheus::Registry::new(),
        known_services: vec!["control-plane".to_string()],
    });

    let mut plugin = StatusPlugin::new(host.clone());
    let config = plugin
        .validate(raw, None)
        .context("validating configuration")?;

    let Some(config) = config else {
        tracing::info!("no sink configured, nothing to run");
        return Ok(());
    };

    plugin.start(config);
    tracing::info!("status reporting pipeline started");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, flushing");

    plugin.stop(Duration::from_secs(5)).await;
    Ok(())
}
