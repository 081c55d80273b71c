//! Relay Protocol - Wire frames for chat relay communication
//!
//! This crate provides the value types and frame parsing shared by the
//! relay daemon and anything that speaks to it. Frames are single UTF-8
//! text messages whose fields are joined by `|`.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod frame;
pub mod types;

pub use frame::{
    short_time, split_fields, FrameError, InboundFrame, OutboundFrame, ERROR_TAG,
    FIELD_DELIMITER, REGISTRATION_TAG, SYSTEM_TAG,
};
pub use types::{ColorCode, Nickname};
