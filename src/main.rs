//! gRPC Gateway - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use grpc_gateway::{
    GatewayConfig, Registry, ServerOptions, api,
    config::TlsConfig,
    grpc::{TlsPem, proxy_server, serve_proxy},
    metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "grpc-gateway")]
#[command(about = "Transparent gRPC reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override gRPC listener port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting gRPC Gateway");

    // Load configuration
    let mut config = GatewayConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.grpc_port = port;
    }

    config.validate()?;

    tracing::info!(
        grpc_port = config.grpc_port,
        api_port = config.api_port,
        routing_header = %config.routing_header,
        backends = config.backends.len(),
        default_backend = ?config.default_backend,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Connect every backend up front; an unreachable backend aborts startup
    let mut builder = Registry::builder();
    for backend in &config.backends {
        builder
            .register(&backend.name, &backend.address)
            .await
            .with_context(|| format!("Failed to register backend '{}'", backend.name))?;
    }
    let registry = Arc::new(builder.build(config.default_backend.as_deref())?);

    let tls = match &config.tls {
        Some(tls) => Some(load_tls(tls)?),
        None => None,
    };

    // Shutdown fan-out to both servers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let grpc_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    let grpc_listener = tokio::net::TcpListener::bind(grpc_addr)
        .await
        .context("Failed to bind gRPC listener")?;

    let options = ServerOptions {
        routing_header: config.routing_header.clone(),
        max_message_size_mb: config.max_message_size_mb,
        tls,
    };

    // TLS and routing errors fail startup here, before anything is spawned
    let grpc_server = proxy_server(registry.clone(), options)
        .context("Failed to configure gRPC server")?;

    let mut grpc_handle = tokio::spawn(serve_proxy(
        grpc_server,
        grpc_listener,
        wait_for(shutdown_rx.clone()),
    ));

    // Setup API
    let app_state = api::AppState {
        registry: registry.clone(),
        routing_header: config.routing_header.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %api_addr, "Starting API server");

    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .context("Failed to bind API server")?;

    let api_handle = tokio::spawn(async move {
        axum::serve(api_listener, app)
            .with_graceful_shutdown(wait_for(shutdown_rx))
            .await
    });

    // Either a signal or the proxy stopping on its own ends the process
    let grpc_result = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            (&mut grpc_handle).await
        }
        result = &mut grpc_handle => {
            tracing::error!("gRPC server exited, shutting down API server");
            let _ = shutdown_tx.send(true);
            result
        }
    };

    let grpc_result = grpc_result.context("gRPC server task failed")?;
    if let Err(e) = &grpc_result {
        tracing::error!(error = %e, "gRPC server error");
    }

    api_handle
        .await
        .context("API server task failed")?
        .context("API server error")?;

    grpc_result.context("gRPC server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

fn load_tls(tls: &TlsConfig) -> Result<TlsPem> {
    let cert = std::fs::read_to_string(&tls.cert_path)
        .with_context(|| format!("Failed to read TLS certificate: {:?}", tls.cert_path))?;
    let key = std::fs::read_to_string(&tls.key_path)
        .with_context(|| format!("Failed to read TLS key: {:?}", tls.key_path))?;
    let client_ca = tls
        .ca_path
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read client CA: {:?}", path))
        })
        .transpose()?;

    Ok(TlsPem {
        cert,
        key,
        client_ca,
    })
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
