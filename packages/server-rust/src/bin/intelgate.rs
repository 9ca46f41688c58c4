//! `intelgate` server binary.

use std::sync::Arc;

use clap::Parser;
use intelgate_core::{ClockSource, SystemClock};
use intelgate_server::bridge::ForwardingBridge;
use intelgate_server::config::{GatewayArgs, LogFormat};
use intelgate_server::network::NetworkModule;
use intelgate_server::registry::OperationRegistry;
use intelgate_server::worker::{BackgroundWorker, RetentionRunnable};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,intelgate_server=info,tower_http=warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = GatewayArgs::parse();
    init_tracing(args.log_format);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "prometheus exporter listening");
    }

    let network_config = args.network_config();
    let bridge_config = args.bridge_config();
    let registry_config = args.registry_config();

    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let registry = Arc::new(OperationRegistry::from_config(
        &registry_config,
        Arc::clone(&clock),
    ));
    let bridge = Arc::new(ForwardingBridge::tcp(bridge_config));

    match bridge.connect().await {
        Ok(()) => info!(endpoint = %bridge.config().endpoint, "downstream connected"),
        Err(err) => warn!(
            endpoint = %bridge.config().endpoint,
            error = %err,
            "downstream unavailable at startup, will retry on first request"
        ),
    }

    let mut retention = registry_config.retention_interval.map(|interval| {
        BackgroundWorker::start(
            RetentionRunnable::new(Arc::clone(&registry), registry_config.retention_max_age),
            interval,
        )
    });

    let mut network = NetworkModule::new(network_config, registry, bridge, clock);
    let port = network.start().await?;
    info!(port, version = env!("CARGO_PKG_VERSION"), "intelgate started");

    let served = network.serve(shutdown_signal()).await;

    if let Some(worker) = retention.as_mut() {
        worker.stop().await;
    }
    info!("intelgate stopped");
    served
}
