//! Inbound and outbound frame types.
//!
//! Every frame is one WebSocket text message. Fields are joined by
//! [`FIELD_DELIMITER`]; empty fields are discarded when parsing, so
//! `REG||alice|1` and `REG|alice|1` are the same frame.

use chrono::{DateTime, TimeZone};
use std::fmt;
use thiserror::Error;

use crate::types::{ColorCode, Nickname};

/// Separator between frame fields.
pub const FIELD_DELIMITER: char = '|';

/// First field of a registration frame.
pub const REGISTRATION_TAG: &str = "REG";

/// First field of an error frame.
pub const ERROR_TAG: &str = "ERR";

/// First field of a system notice frame.
pub const SYSTEM_TAG: &str = "SYS";

const INCORRECT_REQUEST: &str = "Incorrect request";
const NICKNAME_TAKEN: &str = "Nickname is taken already";

/// Splits a raw frame into its non-empty fields.
pub fn split_fields(raw: &str) -> Vec<&str> {
    raw.split(FIELD_DELIMITER)
        .filter(|field| !field.is_empty())
        .collect()
}

/// Formats a timestamp as a short 24-hour wall-clock time (`HH:MM`).
pub fn short_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format("%H:%M").to_string()
}

// ============================================================================
// Inbound
// ============================================================================

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// `REG|<nickname>|<colorCode>`
    Register {
        nickname: Nickname,
        color: ColorCode,
    },

    /// `<anything>|<text>`; the first field is ignored.
    Chat { text: String },
}

impl InboundFrame {
    /// Parses a raw text frame.
    ///
    /// Only the field count and, for three fields, the tag are checked.
    /// Whether a chat frame is acceptable depends on the sender's
    /// registration state and is decided by the caller.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        match split_fields(raw).as_slice() {
            [] => Err(FrameError::Empty),
            [tag, nickname, color] if *tag == REGISTRATION_TAG => Ok(Self::Register {
                nickname: Nickname::new(*nickname),
                color: ColorCode::parse_or_default(color),
            }),
            [tag, _, _] => Err(FrameError::UnknownTag((*tag).to_string())),
            [_, text] => Ok(Self::Chat {
                text: (*text).to_string(),
            }),
            fields => Err(FrameError::FieldCount(fields.len())),
        }
    }
}

/// Reasons an inbound frame could not be understood.
///
/// All of them are reported to the client as the same
/// `ERR|Incorrect request` frame; the detail is for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has no fields")]
    Empty,

    #[error("unexpected field count: {0}")]
    FieldCount(usize),

    #[error("unknown frame tag: {0}")]
    UnknownTag(String),
}

// ============================================================================
// Outbound
// ============================================================================

/// A frame sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// `ERR|<message>`, sent to the offending client only.
    Error(String),

    /// `SYS|<message>`, join and departure notices.
    System(String),

    /// `<nickname>|<time>|<colorCode>|<text>`
    Chat {
        nickname: Nickname,
        time: String,
        color: ColorCode,
        text: String,
    },
}

impl OutboundFrame {
    pub fn incorrect_request() -> Self {
        Self::Error(INCORRECT_REQUEST.to_string())
    }

    pub fn nickname_taken() -> Self {
        Self::Error(NICKNAME_TAKEN.to_string())
    }

    pub fn joined(nickname: &Nickname) -> Self {
        Self::System(format!("{nickname} joined the chat"))
    }

    pub fn left(nickname: &Nickname) -> Self {
        Self::System(format!("{nickname} left the chat"))
    }

    /// Builds a chat relay frame stamped with the sender's short time.
    pub fn chat<Tz: TimeZone>(
        nickname: &Nickname,
        color: ColorCode,
        text: impl Into<String>,
        at: &DateTime<Tz>,
    ) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self::Chat {
            nickname: nickname.clone(),
            time: short_time(at),
            color,
            text: text.into(),
        }
    }

    /// Serializes the frame to its wire form.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = FIELD_DELIMITER;
        match self {
            Self::Error(message) => write!(f, "{ERROR_TAG}{d}{message}"),
            Self::System(message) => write!(f, "{SYSTEM_TAG}{d}{message}"),
            Self::Chat {
                nickname,
                time,
                color,
                text,
            } => write!(f, "{nickname}{d}{time}{d}{color}{d}{text}"),
        }
    }
}
