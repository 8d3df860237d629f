//! Common fixtures for e2e tests: in-process backends and a proxy in front of them

#![allow(dead_code)]

use grpc_gateway::demo::{
    CalculatorServer, CalculatorService, EchoServer, EchoService, GreeterServer, GreeterService,
};
use grpc_gateway::demo::proto::calculator::calculator_client::CalculatorClient;
use grpc_gateway::demo::proto::echo::echo_client::EchoClient;
use grpc_gateway::demo::proto::helloworld::greeter_client::GreeterClient;
use grpc_gateway::{Registry, ServerOptions, start_grpc_server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::{Channel, Server};

/// A server bound to an ephemeral local port
pub struct Spawned {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Spawned {
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for Spawned {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serve `router` on 127.0.0.1 with an OS-assigned port
pub async fn spawn_backend(router: Router) -> Spawned {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind backend listener");
    let addr = listener.local_addr().expect("Failed to read backend address");

    let handle = tokio::spawn(async move {
        router
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("Backend server failed");
    });

    Spawned { addr, handle }
}

pub async fn spawn_greeter() -> Spawned {
    spawn_backend(Server::builder().add_service(GreeterServer::new(GreeterService))).await
}

pub async fn spawn_calculator() -> Spawned {
    spawn_backend(Server::builder().add_service(CalculatorServer::new(CalculatorService))).await
}

pub async fn spawn_echo(name: &str) -> Spawned {
    spawn_backend(Server::builder().add_service(EchoServer::new(EchoService::new(name)))).await
}

/// Register live backends, in order, with an optional explicit default
pub async fn registry(backends: &[(&str, &Spawned)], default: Option<&str>) -> Arc<Registry> {
    let mut builder = Registry::builder();
    for (name, backend) in backends {
        builder
            .register(name, &backend.address())
            .await
            .expect("Failed to register backend");
    }
    Arc::new(builder.build(default).expect("Failed to build registry"))
}

/// Run the proxy in front of `registry`
pub async fn spawn_proxy(registry: Arc<Registry>) -> Spawned {
    spawn_proxy_with(registry, ServerOptions::default()).await
}

/// Run the proxy with non-default listener options
pub async fn spawn_proxy_with(registry: Arc<Registry>, options: ServerOptions) -> Spawned {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy listener");
    let addr = listener.local_addr().expect("Failed to read proxy address");

    let handle = tokio::spawn(async move {
        start_grpc_server(listener, registry, options, std::future::pending())
            .await
            .expect("Proxy server failed");
    });

    Spawned { addr, handle }
}

/// Client channel to the proxy
pub async fn connect(proxy: &Spawned) -> Channel {
    Channel::from_shared(format!("http://{}", proxy.addr))
        .expect("Invalid endpoint")
        .connect()
        .await
        .expect("Failed to connect to proxy")
}

pub async fn greeter_client(proxy: &Spawned) -> GreeterClient<Channel> {
    GreeterClient::new(connect(proxy).await)
}

pub async fn calculator_client(proxy: &Spawned) -> CalculatorClient<Channel> {
    CalculatorClient::new(connect(proxy).await)
}

pub async fn echo_client(proxy: &Spawned) -> EchoClient<Channel> {
    EchoClient::new(connect(proxy).await)
}

/// Attach the routing header to a request
pub fn routed<T>(message: T, target: &str) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.metadata_mut().insert(
        "x-backend-target",
        target.parse().expect("Invalid routing header value"),
    );
    request
}
