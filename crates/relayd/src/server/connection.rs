//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Reads frames strictly in order, one at a time
//! - Parses them and applies the registration state machine
//! - Routes chat and notices through the broadcast primitives
//! - Cleans up its registry entry and closes the socket on exit
//!
//! # State machine
//!
//! ```text
//! Unregistered ──REG ok──▶ Registered ──loop exits──▶ (closed)
//!      │                       │
//!      └──────loop exits───────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use axum::extract::ws::Message;
use chrono::Local;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use relay_protocol::{ColorCode, InboundFrame, Nickname, OutboundFrame};

use crate::broadcast::{broadcast, send_to, ClientHandle, SendError};
use crate::registry::{RegistryError, RegistryHandle, RemovalReason};

/// Registration state of one connection.
///
/// Owned by the handler task; never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerState {
    Unregistered,
    Registered { nickname: Nickname, color: ColorCode },
}

impl HandlerState {
    pub fn nickname(&self) -> Option<&Nickname> {
        match self {
            Self::Unregistered => None,
            Self::Registered { nickname, .. } => Some(nickname),
        }
    }
}

/// Connection handler for a single client.
pub struct ConnectionHandler<S> {
    /// Read half of the WebSocket
    stream: S,

    /// Write half, shared with the registry once registered
    client: ClientHandle,

    /// Handle to the session registry
    registry: RegistryHandle,

    state: HandlerState,
}

impl<S> ConnectionHandler<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    pub fn new(stream: S, client: ClientHandle, registry: RegistryHandle) -> Self {
        Self {
            stream,
            client,
            registry,
            state: HandlerState::Unregistered,
        }
    }

    /// Runs the connection handler.
    ///
    /// Processes frames until the client closes, sends a close frame, or
    /// an I/O error occurs, then runs the termination procedure. Returns
    /// the nickname the connection was registered under, if any.
    pub async fn run(mut self) -> Option<Nickname> {
        debug!(connection = %self.client.id(), "New client connected");

        if let Err(e) = self.process_frames().await {
            debug!(
                connection = %self.client.id(),
                nickname = ?self.state.nickname(),
                error = %e,
                "Connection loop ended with error"
            );
        }

        self.shutdown().await
    }

    /// Main receive loop.
    async fn process_frames(&mut self) -> Result<(), ConnectionError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => self.handle_text(text.as_str()).await?,
                Message::Binary(bytes) => {
                    self.handle_text(&String::from_utf8_lossy(&bytes)).await?
                }
                Message::Close(frame) => {
                    debug!(connection = %self.client.id(), ?frame, "Client sent close frame");
                    return Ok(());
                }
                // Ping replies are queued by the transport
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        debug!(connection = %self.client.id(), "Client stream ended");
        Ok(())
    }

    /// Applies the protocol rules to one text frame.
    async fn handle_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Register { nickname, color }) => {
                self.handle_register(nickname, color).await
            }
            Ok(InboundFrame::Chat { text }) => match &self.state {
                HandlerState::Registered { nickname, color } => {
                    let frame = OutboundFrame::chat(nickname, *color, text, &Local::now());
                    broadcast(&self.registry, &frame, None).await;
                    Ok(())
                }
                HandlerState::Unregistered => {
                    debug!(connection = %self.client.id(), "Chat before registration");
                    self.reply(&OutboundFrame::incorrect_request()).await
                }
            },
            Err(e) => {
                debug!(connection = %self.client.id(), error = %e, "Rejected frame");
                self.reply(&OutboundFrame::incorrect_request()).await
            }
        }
    }

    /// Registration procedure.
    ///
    /// Allowed in any state. Re-registering under a new name leaves the
    /// previous entry in place until its connection is seen closed.
    async fn handle_register(
        &mut self,
        nickname: Nickname,
        color: ColorCode,
    ) -> Result<(), ConnectionError> {
        match self
            .registry
            .try_register(nickname.clone(), color, self.client.clone())
            .await
        {
            Ok(()) => {
                if let Some(previous) = self.state.nickname() {
                    warn!(
                        connection = %self.client.id(),
                        previous = %previous,
                        nickname = %nickname,
                        "Connection registered a second nickname"
                    );
                }
                info!(connection = %self.client.id(), nickname = %nickname, "Client registered");

                broadcast(&self.registry, &OutboundFrame::joined(&nickname), Some(&nickname)).await;
                self.state = HandlerState::Registered { nickname, color };
                Ok(())
            }
            Err(RegistryError::NicknameTaken(_)) => {
                debug!(connection = %self.client.id(), nickname = %nickname, "Nickname taken");
                self.reply(&OutboundFrame::nickname_taken()).await
            }
            Err(e) => Err(ConnectionError::Registry(e)),
        }
    }

    async fn reply(&self, frame: &OutboundFrame) -> Result<(), ConnectionError> {
        send_to(&self.client, frame).await.map_err(ConnectionError::Send)
    }

    /// Termination procedure.
    async fn shutdown(self) -> Option<Nickname> {
        let nickname = match self.state {
            HandlerState::Registered { nickname, .. } => Some(nickname),
            HandlerState::Unregistered => None,
        };

        if let Some(ref nickname) = nickname {
            self.registry
                .remove_connection(nickname, self.client.id(), RemovalReason::Disconnected)
                .await;
            broadcast(&self.registry, &OutboundFrame::left(nickname), None).await;
        }

        if let Err(e) = self.client.close().await {
            debug!(connection = %self.client.id(), error = %e, "Failed to close connection");
        }

        info!(
            connection = %self.client.id(),
            nickname = nickname.as_ref().map(Nickname::as_str).unwrap_or("Unknown"),
            "Client disconnected"
        );
        nickname
    }
}

/// Errors that end a connection's receive loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("Send failed: {0}")]
    Send(SendError),

    #[error("Registry error: {0}")]
    Registry(RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::test_support::{
        client_pair, connection_pair, is_silent, next_message, next_text, PeerSocket,
    };
    use crate::broadcast::ConnectionId;
    use crate::registry::{spawn_registry, RegistryCommand};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Spawns a handler on an in-memory connection and returns the client side.
    fn spawn_handler(
        registry: &RegistryHandle,
        id: u64,
    ) -> (PeerSocket, JoinHandle<Option<Nickname>>) {
        let (client, stream, peer) = connection_pair(id);
        let handler = ConnectionHandler::new(stream, client, registry.clone());
        (peer, tokio::spawn(handler.run()))
    }

    /// Waits until the registry holds `n` sessions.
    async fn wait_for_len(registry: &RegistryHandle, n: usize) {
        for _ in 0..100 {
            if registry.len().await == n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("registry never reached {n} sessions");
    }

    /// Registers alice then bob, draining bob's join notice from alice.
    async fn alice_and_bob(
        registry: &RegistryHandle,
    ) -> [(PeerSocket, JoinHandle<Option<Nickname>>); 2] {
        let (alice, alice_task) = spawn_handler(registry, 1);
        let (bob, bob_task) = spawn_handler(registry, 2);

        alice.send_text("REG|alice|1");
        wait_for_len(registry, 1).await;
        bob.send_text("REG|bob|2");

        let mut alice = alice;
        assert_eq!(
            next_text(&mut alice).await.as_deref(),
            Some("SYS|bob joined the chat")
        );
        [(alice, alice_task), (bob, bob_task)]
    }

    #[tokio::test]
    async fn test_register_then_chat_reaches_everyone_including_sender() {
        let registry = spawn_registry();
        let [(mut alice, _a), (mut bob, _b)] = alice_and_bob(&registry).await;

        alice.send_text("x|hello");

        for peer in [&mut alice, &mut bob] {
            let frame = next_text(peer).await.unwrap();
            let fields: Vec<&str> = frame.split('|').collect();
            assert_eq!(fields.len(), 4);
            assert_eq!(fields[0], "alice");
            assert_eq!(fields[2], "1");
            assert_eq!(fields[3], "hello");
        }
    }

    #[tokio::test]
    async fn test_joiner_does_not_receive_own_join_notice() {
        let registry = spawn_registry();
        let (mut alice, _a) = spawn_handler(&registry, 1);

        alice.send_text("REG|alice|1");
        wait_for_len(&registry, 1).await;

        assert!(is_silent(&mut alice).await);
    }

    #[tokio::test]
    async fn test_nickname_taken_keeps_original_session() {
        let registry = spawn_registry();
        let (mut a, _a) = spawn_handler(&registry, 1);
        let (mut b, _b) = spawn_handler(&registry, 2);

        a.send_text("REG|alice|1");
        wait_for_len(&registry, 1).await;
        b.send_text("REG|alice|2");

        assert_eq!(
            next_text(&mut b).await.as_deref(),
            Some("ERR|Nickname is taken already")
        );

        let session = registry.get(&Nickname::new("alice")).await.unwrap();
        assert_eq!(session.client.id(), ConnectionId::new(1));
        assert_eq!(session.color, ColorCode::new(1));

        // b stays unregistered, so chat is refused
        b.send_text("x|hi");
        assert_eq!(next_text(&mut b).await.as_deref(), Some("ERR|Incorrect request"));
        assert!(is_silent(&mut a).await);
    }

    #[tokio::test]
    async fn test_unregistered_chat_is_refused_without_broadcast() {
        let registry = spawn_registry();
        let (mut watcher, _w) = spawn_handler(&registry, 1);
        let (mut stranger, _s) = spawn_handler(&registry, 2);

        watcher.send_text("REG|watcher|3");
        wait_for_len(&registry, 1).await;

        stranger.send_text("x|hello");

        assert_eq!(
            next_text(&mut stranger).await.as_deref(),
            Some("ERR|Incorrect request")
        );
        assert!(is_silent(&mut watcher).await);
    }

    #[tokio::test]
    async fn test_malformed_frames_get_error() {
        let registry = spawn_registry();
        let (mut peer, _h) = spawn_handler(&registry, 1);

        for bad in ["hello", "a|b|c|d", "MSG|alice|1", "", "|||"] {
            peer.send_text(bad);
            assert_eq!(
                next_text(&mut peer).await.as_deref(),
                Some("ERR|Incorrect request"),
                "frame {bad:?}"
            );
        }
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_bad_color_defaults_to_white() {
        let registry = spawn_registry();
        let (peer, _h) = spawn_handler(&registry, 1);

        peer.send_text("REG|alice|notanumber");
        wait_for_len(&registry, 1).await;

        let session = registry.get(&Nickname::new("alice")).await.unwrap();
        assert_eq!(session.color, ColorCode::WHITE);
    }

    #[tokio::test]
    async fn test_disconnect_removes_and_announces_departure() {
        let registry = spawn_registry();
        let [(mut alice, alice_task), (mut bob, _b)] = alice_and_bob(&registry).await;

        alice.close();

        assert_eq!(alice_task.await.unwrap(), Some(Nickname::new("alice")));
        assert_eq!(
            next_text(&mut bob).await.as_deref(),
            Some("SYS|alice left the chat")
        );
        assert!(registry.get(&Nickname::new("alice")).await.is_none());

        // Server answers the close handshake
        assert!(matches!(
            next_message(&mut alice).await,
            Some(Message::Close(Some(_)))
        ));
    }

    #[tokio::test]
    async fn test_nickname_reusable_after_disconnect() {
        let registry = spawn_registry();
        let (alice, alice_task) = spawn_handler(&registry, 1);

        alice.send_text("REG|alice|1");
        wait_for_len(&registry, 1).await;
        drop(alice);
        alice_task.await.unwrap();

        let (again, _h) = spawn_handler(&registry, 2);
        again.send_text("REG|alice|4");
        wait_for_len(&registry, 1).await;

        let session = registry.get(&Nickname::new("alice")).await.unwrap();
        assert_eq!(session.client.id(), ConnectionId::new(2));
    }

    #[tokio::test]
    async fn test_unregistered_disconnect_announces_nothing() {
        let registry = spawn_registry();
        let (mut watcher, _w) = spawn_handler(&registry, 1);
        let (stranger, stranger_task) = spawn_handler(&registry, 2);

        watcher.send_text("REG|watcher|3");
        wait_for_len(&registry, 1).await;

        drop(stranger);
        assert_eq!(stranger_task.await.unwrap(), None);
        assert!(is_silent(&mut watcher).await);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_previous_entry() {
        let registry = spawn_registry();
        let (mut peer, _h) = spawn_handler(&registry, 1);

        peer.send_text("REG|alice|1");
        wait_for_len(&registry, 1).await;
        peer.send_text("REG|alicia|1");

        // The stale "alice" entry still points at this connection
        assert_eq!(
            next_text(&mut peer).await.as_deref(),
            Some("SYS|alicia joined the chat")
        );
        assert_eq!(registry.len().await, 2);

        let old = registry.get(&Nickname::new("alice")).await.unwrap();
        let new = registry.get(&Nickname::new("alicia")).await.unwrap();
        assert_eq!(old.client.id(), new.client.id());

        // Chat now goes out under the new name, to both entries
        peer.send_text("x|hi");
        let first = next_text(&mut peer).await.unwrap();
        let second = next_text(&mut peer).await.unwrap();
        assert!(first.starts_with("alicia|"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_binary_frames_are_decoded_as_text() {
        let registry = spawn_registry();
        let (peer, _h) = spawn_handler(&registry, 1);

        peer.send(Message::Binary(b"REG|alice|1".to_vec().into()));
        wait_for_len(&registry, 1).await;
    }

    #[tokio::test]
    async fn test_dead_recipient_does_not_block_chat() {
        let registry = spawn_registry();
        let (mut alice, _a) = spawn_handler(&registry, 1);
        let (ghost_client, ghost_peer) = client_pair(99);

        registry
            .try_register(Nickname::new("ghost"), ColorCode::WHITE, ghost_client)
            .await
            .unwrap();
        drop(ghost_peer);

        alice.send_text("REG|alice|1");
        alice.send_text("x|still here");
        let frame = next_text(&mut alice).await.unwrap();
        assert!(frame.ends_with("|1|still here"));
        assert!(registry.get(&Nickname::new("ghost")).await.is_none());
    }

    // ========================================================================
    // Failure isolation
    // ========================================================================

    #[tokio::test]
    async fn test_failed_reply_ends_handler_and_cleans_up() {
        let registry = spawn_registry();
        let [(mut alice, alice_task), (mut bob, _b)] = alice_and_bob(&registry).await;

        // Alice's write half dies; the error reply to her bad frame fails
        alice.stop_receiving();
        alice.send_text("garbage");

        assert_eq!(alice_task.await.unwrap(), Some(Nickname::new("alice")));
        assert!(registry.get(&Nickname::new("alice")).await.is_none());
        assert_eq!(
            next_text(&mut bob).await.as_deref(),
            Some("SYS|alice left the chat")
        );

        // Bob is unaffected
        bob.send_text("x|anyone?");
        let frame = next_text(&mut bob).await.unwrap();
        assert!(frame.starts_with("bob|"));
        assert!(frame.ends_with("|2|anyone?"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_transport_error_ends_handler_and_cleans_up() {
        let registry = spawn_registry();
        let [(alice, alice_task), (mut bob, _b)] = alice_and_bob(&registry).await;

        alice.fail("connection reset");

        assert_eq!(alice_task.await.unwrap(), Some(Nickname::new("alice")));
        assert_eq!(
            next_text(&mut bob).await.as_deref(),
            Some("SYS|alice left the chat")
        );
        assert_eq!(registry.len().await, 1);

        bob.send_text("x|still here");
        let frame = next_text(&mut bob).await.unwrap();
        assert!(frame.ends_with("|still here"));
    }

    #[tokio::test]
    async fn test_registry_failure_ends_only_that_handler() {
        let live = spawn_registry();
        let (dead_tx, dead_rx) = mpsc::channel::<RegistryCommand>(1);
        drop(dead_rx);
        let dead = RegistryHandle::new(dead_tx);

        let (mut orphan, orphan_task) = spawn_handler(&dead, 1);
        let (mut bob, _b) = spawn_handler(&live, 2);

        orphan.send_text("REG|alice|1");
        assert_eq!(orphan_task.await.unwrap(), None);
        assert!(matches!(
            next_message(&mut orphan).await,
            Some(Message::Close(Some(_)))
        ));

        bob.send_text("REG|bob|2");
        wait_for_len(&live, 1).await;
        bob.send_text("x|hi");
        let frame = next_text(&mut bob).await.unwrap();
        assert!(frame.ends_with("|2|hi"));
    }

    #[test]
    fn test_handler_state_nickname() {
        assert_eq!(HandlerState::Unregistered.nickname(), None);
        let state = HandlerState::Registered {
            nickname: Nickname::new("alice"),
            color: ColorCode::WHITE,
        };
        assert_eq!(state.nickname(), Some(&Nickname::new("alice")));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Send(SendError::NotOpen);
        assert_eq!(err.to_string(), "Send failed: Connection is not open");

        let err = ConnectionError::Registry(RegistryError::ChannelClosed);
        assert!(err.to_string().contains("response channel closed"));
    }
}
