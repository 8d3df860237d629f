use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tonic::transport::Server;

use grpc_gateway::demo::{
    CalculatorServer, CalculatorService, EchoServer, EchoService, GreeterServer, GreeterService,
};

#[derive(Debug, Clone, ValueEnum)]
enum DemoService {
    /// helloworld.Greeter
    Greeter,
    /// calculator.Calculator
    Calculator,
    /// echo.Echo (unary and streaming)
    Echo,
}

#[derive(Parser, Debug)]
#[clap(
    name = "demo-backend",
    about = "Sample gRPC backend to run behind the gateway"
)]
struct Args {
    /// Service to serve
    #[clap(short, long, value_enum)]
    service: DemoService,

    /// Port to listen on
    #[clap(short, long, default_value = "9090")]
    port: u16,

    /// Instance name reported by the echo service
    #[clap(short, long, default_value = "echo")]
    name: String,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(service = ?args.service, %addr, "Starting demo backend");

    let router = match args.service {
        DemoService::Greeter => Server::builder().add_service(GreeterServer::new(GreeterService)),
        DemoService::Calculator => {
            Server::builder().add_service(CalculatorServer::new(CalculatorService))
        }
        DemoService::Echo => {
            Server::builder().add_service(EchoServer::new(EchoService::new(args.name)))
        }
    };

    router
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C signal");
        })
        .await
        .context("Demo backend failed")?;

    Ok(())
}
