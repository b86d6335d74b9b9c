//! Room service configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a [`ChatRoomService`](crate::ChatRoomService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Messages requested per history fetch.
    pub history_page_size: usize,

    /// Ask the backend to include time tokens in history pages.
    pub include_time_tokens: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            history_page_size: Self::MAX_HISTORY_PAGE_SIZE,
            include_time_tokens: true,
        }
    }
}

impl RoomConfig {
    /// Largest page a history fetch may request.
    pub const MAX_HISTORY_PAGE_SIZE: usize = 100;

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called by the service constructor. `history_page_size` is kept in
    /// `1..=MAX_HISTORY_PAGE_SIZE`.
    pub fn validated(mut self) -> Self {
        let clamped = self
            .history_page_size
            .clamp(1, Self::MAX_HISTORY_PAGE_SIZE);
        if clamped != self.history_page_size {
            tracing::warn!(
                requested = self.history_page_size,
                used = clamped,
                "history_page_size out of range, clamping"
            );
            self.history_page_size = clamped;
        }
        self
    }
}
