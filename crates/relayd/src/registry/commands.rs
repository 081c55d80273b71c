//! Registry actor commands, errors, and session records.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `Session`: The record stored per registered nickname

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use relay_protocol::{ColorCode, Nickname};

use crate::broadcast::{ClientHandle, ConnectionId};

// ============================================================================
// Session
// ============================================================================

/// A registered user's live binding of nickname, color, and connection.
///
/// The registry holds a clone of the client handle but does not own the
/// connection; the connection handler that created it closes it.
#[derive(Debug, Clone)]
pub struct Session {
    pub nickname: Nickname,
    pub color: ColorCode,
    pub client: ClientHandle,
    pub joined_at: DateTime<Utc>,
}

impl Session {
    pub fn new(nickname: Nickname, color: ColorCode, client: ClientHandle) -> Self {
        Self {
            nickname,
            color,
            client,
            joined_at: Utc::now(),
        }
    }
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request carries a oneshot channel for the response. The actor
/// processes commands one at a time, which is what makes
/// check-then-insert atomic.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Insert a session if its nickname is free.
    ///
    /// # Errors
    /// - `RegistryError::NicknameTaken` if the nickname is registered
    TryRegister {
        session: Box<Session>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session by nickname.
    ///
    /// When `connection` is set, the entry is only removed if it still
    /// belongs to that connection. Responds with the removed session.
    Remove {
        nickname: Nickname,
        connection: Option<ConnectionId>,
        reason: RemovalReason,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Get a single session by nickname.
    Get {
        nickname: Nickname,
        respond_to: oneshot::Sender<Option<Session>>,
    },

    /// Copy out every session for iteration.
    Snapshot {
        respond_to: oneshot::Sender<Vec<Session>>,
    },

    /// Count registered sessions.
    Count { respond_to: oneshot::Sender<usize> },

    /// Drop sessions whose client handle is no longer open.
    ///
    /// Fire-and-forget; sent by the prune task.
    PruneClosed,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another session already uses this nickname.
    #[error("nickname is taken: {0}")]
    NicknameTaken(Nickname),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The owning connection handler terminated.
    Disconnected,

    /// A write to the session failed during broadcast.
    SendFailed,

    /// The session's connection was found closed.
    Closed,

    /// Removed through the public `remove` call.
    Explicit,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "client disconnected"),
            Self::SendFailed => write!(f, "send failed"),
            Self::Closed => write!(f, "connection closed"),
            Self::Explicit => write!(f, "explicitly removed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NicknameTaken(Nickname::new("alice"));
        assert_eq!(err.to_string(), "nickname is taken: alice");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "response channel closed");
    }

    #[test]
    fn test_removal_reason_display() {
        assert_eq!(RemovalReason::Disconnected.to_string(), "client disconnected");
        assert_eq!(RemovalReason::SendFailed.to_string(), "send failed");
        assert_eq!(RemovalReason::Closed.to_string(), "connection closed");
        assert_eq!(RemovalReason::Explicit.to_string(), "explicitly removed");
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();

        drop(tx);

        let result = rx.await;
        assert!(result.is_err());
    }
}
