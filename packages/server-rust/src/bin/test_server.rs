//! Gateway in front of a fleet of simulated devices.
//!
//! ```text
//! test-server -c config.json -l 4 --devices 3
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use restgate_core::EndpointName;
use restgate_server::auth::JwtAuthenticator;
use restgate_server::service::ReqwestCallbackClient;
use restgate_server::settings::LogFormat;
use restgate_server::{
    Cli, EndpointDirectory, Gateway, NetworkModule, Settings, SimulatedTransport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    init_tracing(&settings);

    for warning in &settings.warnings {
        warn!("{warning}");
    }

    if let Some(port) = settings.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port, "Prometheus exporter listening");
    }

    let auth = Arc::new(
        JwtAuthenticator::new(&settings.auth).context("invalid user scope pattern")?,
    );
    if !auth.is_enabled() {
        warn!("no users configured, authentication is disabled");
    }

    let directory = Arc::new(EndpointDirectory::new());
    let transport = Arc::new(SimulatedTransport::new(
        Arc::clone(&directory),
        settings.latency,
    ));
    let gateway = Arc::new(Gateway::new(
        settings.server.clone(),
        directory.clone(),
        transport.clone(),
    ));
    directory.add_observer(gateway.lifecycle_observer());

    let client = ReqwestCallbackClient::new(settings.server.callback_timeout())?;
    let mut workers = gateway.start_workers(Arc::new(client));

    for index in 1..=settings.devices {
        let connection = transport.add_device(EndpointName::new(format!("dev{index}")), false);
        info!(endpoint = %connection.endpoint, "simulated device registered");
    }

    let mut network = NetworkModule::new(
        settings.network.clone(),
        Arc::clone(&gateway),
        Arc::clone(&directory),
        auth,
    );
    let port = network.start().await?;
    info!(port, tls = settings.network.tls.is_some(), "gateway started");

    let result = network.serve(shutdown_signal()).await;

    workers.stop().await;
    info!("gateway stopped");
    result
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::builder()
        .with_default_directive(settings.level_filter().into())
        .from_env_lossy();

    match settings.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
