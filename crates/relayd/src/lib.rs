//! Relay Daemon - Session registry and broadcast server
//!
//! This crate provides the core infrastructure for the chat relay:
//! - `registry` - Session registry actor mapping nicknames to live connections
//! - `broadcast` - Per-client send handles and fan-out to all sessions
//! - `server` - WebSocket server and per-connection protocol handling
//! - `config` - Layered daemon settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        relayd                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  RelayServer    │────▶│     RegistryActor           │   │
//! │  │  (WebSocket)    │     │  (nickname → session)       │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ snapshot          │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│────▶│   broadcast()               │   │
//! │  │  (per client)   │     │   (fan-out to ClientHandle) │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcast;
pub mod config;
pub mod registry;
pub mod server;
