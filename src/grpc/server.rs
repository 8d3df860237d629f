//! gRPC server initialization and lifecycle management

use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::server::Router;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

use super::dispatcher::GenericDispatcher;
use super::routing::{RoutingInterceptor, RoutingResolver};
use crate::error::{RoutingError, ServerError};
use crate::registry::Registry;

/// PEM material for TLS termination on the proxy listener
#[derive(Debug, Clone)]
pub struct TlsPem {
    pub cert: String,
    pub key: String,
    /// Require client certificates signed by this CA (mTLS)
    pub client_ca: Option<String>,
}

/// Listener settings for the proxy
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub routing_header: String,
    pub max_message_size_mb: usize,
    pub tls: Option<TlsPem>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            routing_header: super::routing::DEFAULT_ROUTING_HEADER.to_string(),
            max_message_size_mb: 16,
            tls: None,
        }
    }
}

/// Catch-all routes: every path goes through the routing interceptor to the dispatcher
pub fn proxy_routes(
    registry: Arc<Registry>,
    routing_header: &str,
    max_message_size: usize,
) -> Result<Routes, RoutingError> {
    let resolver = RoutingResolver::new(registry, routing_header)?;
    let service = InterceptedService::new(
        GenericDispatcher::new(max_message_size),
        RoutingInterceptor::new(resolver),
    );

    let router = axum::Router::new().fallback_service(service);
    Ok(Routes::from(router))
}

/// Build the proxy server: catch-all routes, message limits and optional TLS
///
/// Configuration errors (bad PEM material, invalid routing header) surface here,
/// before anything is bound or spawned.
pub fn proxy_server(registry: Arc<Registry>, options: ServerOptions) -> Result<Router, ServerError> {
    // Message size limits from config
    let max_message_size: usize = options.max_message_size_mb * 1024 * 1024;
    let routes = proxy_routes(registry.clone(), &options.routing_header, max_message_size)?;

    // Build server with optional TLS
    let mut builder = Server::builder();

    if let Some(tls) = options.tls {
        tracing::info!(
            "Configuring gRPC proxy with {} (max message: {}MB, backends: {})",
            if tls.client_ca.is_some() { "mTLS" } else { "TLS" },
            options.max_message_size_mb,
            registry.len()
        );

        let mut tls_config = ServerTlsConfig::new().identity(Identity::from_pem(tls.cert, tls.key));
        if let Some(ca) = tls.client_ca {
            tls_config = tls_config.client_ca_root(Certificate::from_pem(ca));
        }

        builder = builder.tls_config(tls_config).map_err(ServerError::Tls)?;
    } else {
        tracing::info!(
            "Configuring gRPC proxy (no TLS, max message: {}MB, backends: {})",
            options.max_message_size_mb,
            registry.len()
        );
    }

    Ok(builder.add_routes(routes))
}

/// Serve a built proxy on `listener` until `shutdown` resolves
///
/// Should be spawned as a background task alongside the admin HTTP server.
pub async fn serve_proxy<F>(server: Router, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send,
{
    let addr = listener.local_addr()?;
    tracing::info!("Starting gRPC proxy on {}", addr);

    server
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    tracing::info!("gRPC proxy stopped");

    Ok(())
}

/// Build and serve the proxy in one step
pub async fn start_grpc_server<F>(
    listener: TcpListener,
    registry: Arc<Registry>,
    options: ServerOptions,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send,
{
    let server = proxy_server(registry, options)?;
    serve_proxy(server, listener, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::endpoint;
    use std::time::Duration;
    use tokio::time::timeout;

    fn create_test_registry() -> Arc<Registry> {
        let mut builder = Registry::builder();
        let channel = endpoint("greeter", "127.0.0.1:1").unwrap().connect_lazy();
        builder
            .register_channel("greeter", "127.0.0.1:1", channel)
            .unwrap();
        Arc::new(builder.build(None).unwrap())
    }

    #[tokio::test]
    async fn test_proxy_routes_with_default_header() {
        let routes = proxy_routes(create_test_registry(), "x-backend-target", 1024);
        assert!(routes.is_ok());
    }

    #[tokio::test]
    async fn test_proxy_routes_invalid_header() {
        let routes = proxy_routes(create_test_registry(), "not valid", 1024);
        assert!(matches!(routes, Err(RoutingError::InvalidHeader(_))));
    }

    #[test]
    fn test_default_options() {
        let options = ServerOptions::default();
        assert_eq!(options.routing_header, "x-backend-target");
        assert_eq!(options.max_message_size_mb, 16);
        assert!(options.tls.is_none());
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown_signal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = timeout(
            Duration::from_secs(5),
            start_grpc_server(
                listener,
                create_test_registry(),
                ServerOptions::default(),
                async {},
            ),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_invalid_tls_rejected_before_serving() {
        let options = ServerOptions {
            tls: Some(TlsPem {
                cert: "not a valid cert".to_string(),
                key: "not a valid key".to_string(),
                client_ca: Some("not a valid ca".to_string()),
            }),
            ..Default::default()
        };

        let result = proxy_server(create_test_registry(), options);

        assert!(matches!(result, Err(ServerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_invalid_tls_fails_server_task_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let options = ServerOptions {
            tls: Some(TlsPem {
                cert: "not a valid cert".to_string(),
                key: "not a valid key".to_string(),
                client_ca: None,
            }),
            ..Default::default()
        };

        // Never signalled: the task must end on its own
        let result = timeout(
            Duration::from_secs(5),
            start_grpc_server(listener, create_test_registry(), options, std::future::pending()),
        )
        .await;

        assert!(matches!(result, Ok(Err(ServerError::Tls(_)))));
    }
}
