//! Command-line interface for the FleetBridge control-plane bridge.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use fleetbridge_api::server::{create_router, ServerState};
use fleetbridge_core::config::{env_vars, BridgeConfig};
use fleetbridge_engine::{Engine, MqttTransport};

/// FleetBridge - HTTP control plane for MQTT robot fleets.
#[derive(Parser, Debug)]
#[command(name = "fleetbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the bridge server.
    Serve {
        /// Host to bind the HTTP server to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind the HTTP server to.
        #[arg(short, long)]
        port: Option<u16>,
        /// MQTT broker host.
        #[arg(long)]
        broker: Option<String>,
        /// Path to a TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        /// Path to a TOML configuration file.
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Serve {
            host,
            port,
            broker,
            config,
        } => serve(host, port, broker, config).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "fleetbridge=debug,debug"
    } else {
        "fleetbridge=info,info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    let config = config.apply_env_overrides();
    config.engine.validate().context("invalid engine config")?;
    Ok(config)
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    broker: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(host) = host {
        config.http.host = host;
    }
    if let Some(port) = port {
        config.http.port = port;
    }
    if let Some(broker) = broker {
        config.mqtt.broker = broker;
    }

    info!(broker = %config.mqtt.full_broker_addr(), "connecting to mqtt broker");
    let (transport, inbound_rx) = MqttTransport::connect(&config.mqtt)
        .await
        .context("connecting to mqtt broker")?;
    let transport = Arc::new(transport);

    let engine = Arc::new(Engine::new(
        transport.clone(),
        config.engine.clone(),
        config.mqtt.topic_prefix.clone(),
    ));
    engine.start(inbound_rx);

    let state = ServerState::new(engine.clone(), config.engine.clone());
    let router = create_router(state);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("shutting down");
    engine.shutdown();
    transport.shutdown().await;
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(Some(&path))?;
    println!("{}", toml_pretty(&config)?);
    Ok(())
}

fn toml_pretty(config: &BridgeConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}
