//! Session registry using Actor pattern.
//!
//! The registry is the only state shared between connection handlers. It
//! maps each registered nickname to its session and is owned by a single
//! actor task; handlers talk to it through a `RegistryHandle`.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐     ┌─────────────────┐
//! │ ConnectionHandler │────▶│  RegistryActor  │
//! │   (per client)    │     │                 │
//! └───────────────────┘     └─────────────────┘
//!         │   RegistryCommand       │
//!         │   (mpsc channel)        │
//!         ▼                         ▼
//!   TryRegister/Remove      HashMap<Nickname,
//!   Snapshot                Session>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RemovalReason, Session};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Default interval between closed-session sweeps
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the registry actor and return a handle for interaction.
///
/// Uses [`DEFAULT_PRUNE_INTERVAL`] for the background sweep.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///     let sessions = handle.snapshot().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    spawn_registry_with_prune(DEFAULT_PRUNE_INTERVAL)
}

/// Spawn the registry actor with a custom prune interval.
///
/// This function:
/// 1. Creates the command channel
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns a background task that prunes closed sessions
pub fn spawn_registry_with_prune(prune_interval: Duration) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx);
    tokio::spawn(actor.run());

    spawn_prune_task(cmd_tx.downgrade(), prune_interval);

    RegistryHandle::new(cmd_tx)
}

/// Spawn a background task that periodically drops closed sessions.
///
/// Holds a weak sender so the actor still stops once every handle is gone.
fn spawn_prune_task(sender: mpsc::WeakSender<RegistryCommand>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(strong) = sender.upgrade() else {
                debug!("Prune task stopping: registry handles dropped");
                break;
            };

            if strong.send(RegistryCommand::PruneClosed).await.is_err() {
                debug!("Prune task stopping: registry channel closed");
                break;
            }
        }
    });
}
