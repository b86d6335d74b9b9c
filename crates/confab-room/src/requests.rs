//! History and presence requests.
//!
//! History fetches are serialized per room through the service's history
//! gate. A fetch that arrives while another is in flight waits for the
//! gate, then computes its parameters from the log as it is *then*, so a
//! queued fetch never asks for a range the previous one already filled.

use confab_protocol::{Codec, PresenceChange};
use confab_transport::{ChatTransport, HistoryRequest};

use crate::{ChatRoomService, Operation, RoomError, RoomEvent};

impl<T: ChatTransport, C: Codec> ChatRoomService<T, C> {
    /// Fetches whatever history the log is missing and merges it.
    ///
    /// With messages already in the log this asks for everything strictly
    /// newer than the latest token; otherwise it asks for the most recent
    /// page. Emits exactly one `Messages` event per call: the newly merged
    /// messages (possibly none), or the failure. Failures are not retried.
    pub async fn fetch_history(&self) {
        let _gate = self.shared.history_gate.lock().await;

        let room_id = self.shared.room.id.clone();
        let mut request = match self.latest_sent_at() {
            Some(token) => HistoryRequest::newer_than(room_id, token),
            None => HistoryRequest::latest(room_id),
        }
        .with_limit(self.shared.config.history_page_size);
        request.include_time_token = self.shared.config.include_time_tokens;

        tracing::debug!(
            room_id = %self.shared.room.id,
            start = ?request.start,
            limit = request.limit,
            reverse = request.reverse,
            "fetching history"
        );

        match self.shared.transport.fetch_history(request).await {
            Ok(Some(page)) => self.merge(page.messages, true),
            Ok(None) => self.emit(RoomEvent::Messages(Ok(Vec::new()))),
            Err(error) => {
                tracing::warn!(
                    room_id = %self.shared.room.id,
                    %error,
                    "history fetch failed"
                );
                self.emit(RoomEvent::Messages(Err(RoomError::transport(
                    Operation::History,
                    error,
                ))));
            }
        }
    }

    /// Fetches the here-now occupant list and merges it.
    ///
    /// Only ids not already present are reported, as `joined`; a snapshot
    /// never removes anyone.
    pub async fn fetch_presence(&self) {
        tracing::debug!(room_id = %self.shared.room.id, "fetching presence");

        match self
            .shared
            .transport
            .fetch_presence(self.shared.room.id.clone())
            .await
        {
            Ok(Some(snapshot)) => self.absorb_snapshot(snapshot.uuids),
            Ok(None) => {
                self.emit(RoomEvent::Presence(Ok(PresenceChange::default())))
            }
            Err(error) => {
                tracing::warn!(
                    room_id = %self.shared.room.id,
                    %error,
                    "presence fetch failed"
                );
                self.emit(RoomEvent::Presence(Err(RoomError::transport(
                    Operation::Presence,
                    error,
                ))));
            }
        }
    }

    /// Runs a history fetch and a presence fetch concurrently.
    pub async fn refresh(&self) {
        tokio::join!(self.fetch_history(), self.fetch_presence());
    }
}
