//! Guardrail Server - HTTP API server.
//!
//! This crate provides the HTTP API for the Guardrail moderation service.
//!
//! ## Endpoints
//!
//! - `POST /api/moderate` - Classify text and return the moderation result
//! - `GET /api/health` - Liveness check
//!
//! ## Example
//!
//! ```no_run
//! use guardrail_core::classifier::LlamaGuardConfig;
//! use guardrail_core::{EngineSlot, ServiceConfig};
//! use guardrail_server::{AppState, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = EngineSlot::new().get_or_load(LlamaGuardConfig::default()).unwrap();
//!     let state = AppState::with_engine(engine, ServiceConfig::default());
//!     let server = Server::with_state(ServerConfig::default(), state).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default server host (localhost only for security).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default allowed CORS origin (the development frontend).
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 8000).
    pub port: u16,
    /// The single origin allowed to call the API with credentials.
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the allowed CORS origin.
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// The CORS origin is not a valid header value.
    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API routes without middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/moderate", post(handlers::moderate))
        .route("/api/health", get(handlers::health))
}

/// CORS for one origin with credentials.
///
/// Credentials cannot be combined with `*`, so methods and headers are
/// mirrored from the preflight request instead.
fn cors_layer(origin: &str) -> std::result::Result<CorsLayer, ServerError> {
    let origin_value =
        HeaderValue::from_str(origin).map_err(|_| ServerError::InvalidOrigin(origin.to_string()))?;

    Ok(CorsLayer::new()
        .allow_origin(origin_value)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server with the given application state.
    pub fn with_state(
        config: ServerConfig,
        state: AppState,
    ) -> std::result::Result<Self, ServerError> {
        let cors = cors_layer(&config.cors_origin)?;

        let router = routes().layer(cors).with_state(state);

        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self { router, addr })
    }

    /// Runs the server until Ctrl+C.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
    }

    /// Runs the server until `shutdown` resolves, then drains open connections.
    pub async fn run_until<F>(self, shutdown: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting Guardrail API server on {}", self.addr);

        let listener = bind_listener(self.addr)?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("API server stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Binds with SO_REUSEADDR so restarts do not trip over lingering sockets.
fn bind_listener(addr: SocketAddr) -> std::result::Result<tokio::net::TcpListener, ServerError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let bind_err = |e| ServerError::BindError(addr, e);

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(128).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
}
