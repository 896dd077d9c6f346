use serde::{Deserialize, Serialize};

/// Connectivity change reported by a messaging-protocol client.
///
/// Only the fields the watchdog acts on are carried; everything else about
/// the protocol event stays with the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected,
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ConnectionEvent {
    /// Maps a protocol event type tag; unrecognized tags yield `None` and are
    /// meant to be ignored by the caller.
    pub fn from_kind(kind: &str, reason: Option<String>) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected { reason }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}
