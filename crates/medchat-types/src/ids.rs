//! Identifier generation.
//!
//! Every persisted record carries a short type prefix followed by a ULID,
//! so ids sort by creation time and are recognizable in logs.

use chrono::Utc;
use ulid::Ulid;

/// Record kinds with their id prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Conversation,
    Message,
    Memory,
    Preference,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Conversation => "conv",
            IdPrefix::Message => "msg",
            IdPrefix::Memory => "mem",
            IdPrefix::Preference => "pref",
        }
    }
}

/// Generate a new prefixed id, e.g. `msg_01HV...`.
pub fn new_id(prefix: IdPrefix) -> String {
    format!("{}_{}", prefix.as_str(), Ulid::new())
}

/// Id for an assistant reply in a temporary (unsaved) chat.
pub fn temporary_message_id() -> String {
    format!("temp_{}", Utc::now().timestamp_millis())
}
