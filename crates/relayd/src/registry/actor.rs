//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of the nickname map. It receives
//! commands via an mpsc channel and answers through oneshot channels.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_protocol::Nickname;

use crate::broadcast::ConnectionId;

use super::commands::{RegistryCommand, RegistryError, RemovalReason, Session};

/// The registry actor - owns all session state.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task, so two
/// registrations for the same nickname can never both succeed.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Registered sessions keyed by nickname
    sessions: HashMap<Nickname, Session>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::TryRegister {
                session,
                respond_to,
            } => {
                let result = self.handle_try_register(*session);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove {
                nickname,
                connection,
                reason,
                respond_to,
            } => {
                let removed = self.handle_remove(&nickname, connection, reason);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Get {
                nickname,
                respond_to,
            } => {
                let _ = respond_to.send(self.sessions.get(&nickname).cloned());
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.sessions.values().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
            RegistryCommand::PruneClosed => {
                self.handle_prune_closed();
            }
        }
    }

    fn handle_try_register(&mut self, session: Session) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&session.nickname) {
            debug!(
                nickname = %session.nickname,
                connection = %session.client.id(),
                "Nickname already registered, rejecting"
            );
            return Err(RegistryError::NicknameTaken(session.nickname));
        }

        info!(
            nickname = %session.nickname,
            color = %session.color,
            connection = %session.client.id(),
            total_sessions = self.sessions.len() + 1,
            "Session registered"
        );

        self.sessions.insert(session.nickname.clone(), session);
        Ok(())
    }

    fn handle_remove(
        &mut self,
        nickname: &Nickname,
        connection: Option<ConnectionId>,
        reason: RemovalReason,
    ) -> Option<Session> {
        let owned = match (self.sessions.get(nickname), connection) {
            (None, _) => return None,
            (Some(_), None) => true,
            (Some(session), Some(id)) => session.client.id() == id,
        };

        if !owned {
            debug!(
                nickname = %nickname,
                connection = ?connection,
                "Nickname now belongs to another connection, keeping it"
            );
            return None;
        }

        let removed = self.sessions.remove(nickname)?;
        let connected_secs = (Utc::now() - removed.joined_at).num_seconds();
        info!(
            nickname = %nickname,
            connection = %removed.client.id(),
            reason = %reason,
            connected_secs,
            total_sessions = self.sessions.len(),
            "Session removed"
        );
        Some(removed)
    }

    fn handle_prune_closed(&mut self) {
        let before = self.sessions.len();
        self.sessions.retain(|nickname, session| {
            let open = session.client.is_open();
            if !open {
                debug!(nickname = %nickname, reason = %RemovalReason::Closed, "Pruning session");
            }
            open
        });

        let pruned = before - self.sessions.len();
        if pruned > 0 {
            info!(pruned, total_sessions = self.sessions.len(), "Pruned closed sessions");
        }
    }

    /// Returns the number of sessions (for testing).
    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
