//! Send and broadcast primitives.
//!
//! A [`ClientHandle`] is the write half of one client connection. The
//! owning `ConnectionHandler` creates it, the registry stores clones of
//! it, and any task may send through it. Writes are serialized by a
//! mutex so frames from concurrent broadcasts never interleave.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are returned as `SendError` and never abort a broadcast

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use relay_protocol::{Nickname, OutboundFrame};

use crate::registry::{RegistryHandle, RemovalReason};

/// Default write timeout for a single frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed write half of a WebSocket.
type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Number assigned to each accepted connection by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Client Handle
// ============================================================================

/// Cheap-to-clone handle for writing frames to one client.
#[derive(Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    sink: Arc<Mutex<FrameSink>>,
    open: Arc<AtomicBool>,
    write_timeout: Duration,
}

impl ClientHandle {
    /// Wraps the write half of a connection.
    pub fn new<S>(id: ConnectionId, sink: S, write_timeout: Duration) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id,
            sink: Arc::new(Mutex::new(Box::pin(sink))),
            open: Arc::new(AtomicBool::new(true)),
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns false once the connection was closed or a write failed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Serializes and sends one frame.
    pub async fn send_frame(&self, frame: &OutboundFrame) -> Result<(), SendError> {
        self.send_text(frame.encode()).await
    }

    /// Sends an already-serialized frame.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        let text: String = text.into();
        self.send_message(Message::Text(text.into())).await
    }

    async fn send_message(&self, msg: Message) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }

        let mut sink = self.sink.lock().await;

        let result = match timeout(self.write_timeout, sink.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Transport(e.to_string())),
            Err(_) => Err(SendError::Timeout),
        };

        if result.is_err() {
            self.open.store(false, Ordering::Release);
        }

        result
    }

    /// Sends a normal-closure close frame and shuts the sink.
    ///
    /// The handle reports closed afterwards even if the close handshake
    /// fails (e.g. the peer is already gone).
    pub async fn close(&self) -> Result<(), SendError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "Closed".into(),
        }));

        match timeout(self.write_timeout, async {
            sink.send(close).await?;
            sink.close().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SendError::Transport(e.to_string())),
            Err(_) => Err(SendError::Timeout),
        }
    }

    #[cfg(test)]
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Errors that can occur when writing to a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Connection is not open")]
    NotOpen,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write timeout")]
    Timeout,
}

// ============================================================================
// Send / Broadcast
// ============================================================================

/// Sends one frame to one client.
pub async fn send_to(client: &ClientHandle, frame: &OutboundFrame) -> Result<(), SendError> {
    client.send_frame(frame).await
}

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the frame was written to.
    pub delivered: usize,

    /// Sessions removed because they were closed or the write failed.
    pub dropped: usize,
}

/// Sends a frame to every registered session except `exclude`.
///
/// Works on a registry snapshot, so sessions joining or leaving meanwhile
/// do not disturb the iteration. A session that is not open, or whose
/// write fails, is removed from the registry and skipped; delivery to the
/// remaining sessions continues.
pub async fn broadcast(
    registry: &RegistryHandle,
    frame: &OutboundFrame,
    exclude: Option<&Nickname>,
) -> BroadcastReport {
    // Serialize once for all recipients
    let text = frame.encode();
    let sessions = registry.snapshot().await;
    let mut report = BroadcastReport::default();

    for session in sessions {
        if exclude == Some(&session.nickname) {
            continue;
        }

        let result = if session.client.is_open() {
            session.client.send_text(text.as_str()).await
        } else {
            Err(SendError::NotOpen)
        };

        match result {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                debug!(
                    nickname = %session.nickname,
                    connection = %session.client.id(),
                    error = %e,
                    "Dropping session after failed send"
                );
                let reason = match e {
                    SendError::NotOpen => RemovalReason::Closed,
                    _ => RemovalReason::SendFailed,
                };
                registry
                    .remove_connection(&session.nickname, session.client.id(), reason)
                    .await;
                report.dropped += 1;
            }
        }
    }

    report
}
