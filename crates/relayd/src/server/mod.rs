//! WebSocket server for the chat relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Routes the configured path through an axum `Router`
//! - Answers plain HTTP requests on that path with `400 WebSocket only`
//! - Upgrades WebSocket requests; other paths get `404`
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + upgrade
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         │
//!         │ broadcast
//!         ▼
//! ┌─────────────────┐
//! │  Other clients  │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection failures are logged and never reach the accept loop

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, HandlerState};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{ClientHandle, ConnectionId};
use crate::config::RelayConfig;
use crate::registry::RegistryHandle;

/// Body of the reply to plain HTTP requests on the endpoint.
pub const NOT_WEBSOCKET_BODY: &str = "WebSocket only";

/// State shared with the endpoint handler.
#[derive(Clone)]
struct AppState {
    registry: RegistryHandle,
    connection_counter: Arc<AtomicU64>,
    max_message_size: usize,
    write_timeout: Duration,
}

/// WebSocket server for the relay.
///
/// Accepts connections without bound; each one runs in its own task.
pub struct RelayServer {
    config: RelayConfig,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection IDs
    connection_counter: Arc<AtomicU64>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, registry: RegistryHandle, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            registry,
            cancel_token,
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Builds the router serving the chat endpoint.
    ///
    /// Any other path falls through to the default `404`.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            connection_counter: Arc::clone(&self.connection_counter),
            max_message_size: self.config.max_message_size,
            write_timeout: self.config.write_timeout(),
        };

        self.config
            .endpoint_paths()
            .iter()
            .fold(Router::<AppState>::new(), |router, path| {
                router.route(path, any(ws_handler))
            })
            .with_state(state)
    }

    /// Binds the listening socket.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.socket_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })
    }

    /// Binds and serves until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves the endpoint on `listener` until cancelled.
    ///
    /// Established WebSocket sessions are detached from the HTTP server,
    /// so shutdown does not wait for clients to leave.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, path = %self.config.path, "Relay server listening"),
            Err(e) => warn!(error = %e, "Relay server listening on unknown address"),
        }

        let cancel_token = self.cancel_token.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("Server shutdown requested");
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("Server stopped accepting connections");
        Ok(())
    }
}

/// Endpoint handler: upgrades WebSocket requests, refuses everything else.
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(peer = %peer, reason = %rejection, "Rejecting non-WebSocket request");
            return (StatusCode::BAD_REQUEST, NOT_WEBSOCKET_BODY).into_response();
        }
    };

    let id = ConnectionId::new(state.connection_counter.fetch_add(1, Ordering::Relaxed));

    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_failed_upgrade(move |e| {
            debug!(connection = %id, peer = %peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| supervise(id, peer, serve_socket(socket, id, peer, state)))
}

/// Runs one upgraded connection until it disconnects.
async fn serve_socket(socket: WebSocket, id: ConnectionId, peer: SocketAddr, state: AppState) {
    info!(connection = %id, peer = %peer, "Client connected");

    let (sink, stream) = socket.split();
    let client = ClientHandle::new(id, sink, state.write_timeout);
    ConnectionHandler::new(stream, client, state.registry)
        .run()
        .await;
}

/// Runs a connection task in its own task so a panic is logged, not propagated.
async fn supervise<F>(id: ConnectionId, peer: SocketAddr, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = tokio::spawn(task).await {
        error!(connection = %id, peer = %peer, error = %e, "Connection task failed");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Server error: {0}")]
    Serve(String),
}
