//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed` or an
//!   empty result

use tokio::sync::{mpsc, oneshot};

use relay_protocol::{ColorCode, Nickname};

use crate::broadcast::{ClientHandle, ConnectionId};

use super::commands::{RegistryCommand, RegistryError, RemovalReason, Session};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across connection
/// handlers. All methods are async and communicate with the actor via
/// channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.try_register(nickname, color, client).await?;
///
/// for session in handle.snapshot().await {
///     // send to session.client
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Registers a session if the nickname is free.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NicknameTaken` if the nickname is registered; the
    ///   registry is not modified
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn try_register(
        &self,
        nickname: Nickname,
        color: ColorCode,
        client: ClientHandle,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::TryRegister {
                session: Box::new(Session::new(nickname, color, client)),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a session by nickname.
    ///
    /// Returns whether an entry was removed. Removing an absent nickname
    /// is a no-op, so concurrent cleanup paths may both call this.
    pub async fn remove(&self, nickname: &Nickname) -> bool {
        self.send_remove(nickname, None, RemovalReason::Explicit)
            .await
    }

    /// Removes a session only if it still belongs to `connection`.
    ///
    /// Used by cleanup paths so a nickname that was freed and taken by a
    /// newer connection is left alone.
    pub async fn remove_connection(
        &self,
        nickname: &Nickname,
        connection: ConnectionId,
        reason: RemovalReason,
    ) -> bool {
        self.send_remove(nickname, Some(connection), reason).await
    }

    async fn send_remove(
        &self,
        nickname: &Nickname,
        connection: Option<ConnectionId>,
        reason: RemovalReason,
    ) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Remove {
                nickname: nickname.clone(),
                connection,
                reason,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        matches!(rx.await, Ok(Some(_)))
    }

    /// Gets a single session by nickname.
    pub async fn get(&self, nickname: &Nickname) -> Option<Session> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                nickname: nickname.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Returns a point-in-time copy of all sessions.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn snapshot(&self) -> Vec<Session> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns the number of registered sessions.
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Triggers removal of sessions whose connection is closed.
    ///
    /// Fire-and-forget.
    pub async fn prune_closed(&self) {
        let _ = self.sender.send(RegistryCommand::PruneClosed).await;
    }
}
