//! Client configuration.

use confab_protocol::Room;
use confab_room::RoomConfig;
use serde::{Deserialize, Serialize};

use crate::ConfabError;

/// Everything a [`ChatClient`](crate::ChatClient) needs besides its
/// transport.
///
/// Missing fields fall back to their defaults, so `{}` is a valid
/// configuration for the demo room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The room to join.
    pub room: Room,
    /// History and paging options for that room.
    pub room_config: RoomConfig,
}

impl ClientConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(raw: &str) -> Result<Self, ConfabError> {
        Ok(serde_json::from_str(raw)?)
    }
}
