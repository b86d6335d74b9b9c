//! Integration tests for the room service using a scripted transport.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use confab_protocol::{
    Codec, ConnectionState, JsonCodec, Message, MessageId, PresenceChange,
    PublishPayload, Room, RoomId, SentAt, UserId,
};
use confab_room::{
    ChatRoomService, Operation, RoomConfig, RoomError, RoomEvent, RoomEvents,
};
use confab_transport::{
    ChatTransport, EventFeed, HistoryPage, HistoryRequest, MessageEvent,
    PresenceEvent, PresenceSnapshot, PublishReceipt, PublishRequest,
    RequestCategory, StatusCategory, StatusEvent, TransportError,
    TransportEvent,
};
use tokio::sync::mpsc;

// =========================================================================
// Scripted transport
// =========================================================================

/// Everything the transport saw, plus the responses it will give.
/// Shared with the test so it outlives the service.
#[derive(Default)]
struct Probe {
    subscribed: Mutex<HashSet<RoomId>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    published: Mutex<Vec<PublishRequest>>,
    publish_error: Mutex<Option<TransportError>>,
    history_requests: Mutex<Vec<HistoryRequest>>,
    history_script: Mutex<VecDeque<Result<Option<HistoryPage>, TransportError>>>,
    history_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    presence_script:
        Mutex<VecDeque<Result<Option<PresenceSnapshot>, TransportError>>>,
}

struct MockTransport {
    sender: UserId,
    probe: Arc<Probe>,
}

impl ChatTransport for MockTransport {
    fn subscribe(&self, room_id: &RoomId) {
        self.probe.subscribes.fetch_add(1, Ordering::SeqCst);
        self.probe.subscribed.lock().unwrap().insert(room_id.clone());
    }

    fn unsubscribe(&self, room_id: &RoomId) {
        self.probe.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.probe.subscribed.lock().unwrap().remove(room_id);
    }

    fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.probe.subscribed.lock().unwrap().contains(room_id)
    }

    fn current_sender_id(&self) -> UserId {
        self.sender.clone()
    }

    async fn publish(
        &self,
        request: PublishRequest,
    ) -> Result<PublishReceipt, TransportError> {
        let failure = self.probe.publish_error.lock().unwrap().clone();
        self.probe.published.lock().unwrap().push(request);
        match failure {
            Some(error) => Err(error),
            None => Ok(PublishReceipt {
                time_token: SentAt::now(),
                info: "Sent".into(),
            }),
        }
    }

    async fn fetch_history(
        &self,
        request: HistoryRequest,
    ) -> Result<Option<HistoryPage>, TransportError> {
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.probe.history_requests.lock().unwrap().push(request);

        tokio::time::sleep(self.probe.history_delay).await;

        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.probe
            .history_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some(HistoryPage::default())))
    }

    async fn fetch_presence(
        &self,
        _room_id: RoomId,
    ) -> Result<Option<PresenceSnapshot>, TransportError> {
        self.probe
            .presence_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some(PresenceSnapshot::default())))
    }

    fn take_event_feed(&self) -> Option<EventFeed> {
        None
    }
}

// =========================================================================
// Helpers
// =========================================================================

const SELF_ID: &str = "user-self";

fn room() -> Room {
    Room::new("r1", "Room One")
}

fn setup_with(probe: Probe) -> (ChatRoomService<MockTransport>, RoomEvents, Arc<Probe>) {
    let probe = Arc::new(probe);
    let transport = MockTransport {
        sender: UserId::from(SELF_ID),
        probe: Arc::clone(&probe),
    };
    let (service, events) =
        ChatRoomService::new(room(), RoomConfig::default(), transport);
    (service, events, probe)
}

fn setup() -> (ChatRoomService<MockTransport>, RoomEvents, Arc<Probe>) {
    setup_with(Probe::default())
}

fn msg(id: &str, token: i64) -> Message {
    Message {
        id: MessageId::from(id),
        text: format!("text {id}"),
        sent_at: SentAt(token),
        sender_id: UserId::from("user-2"),
        room_id: RoomId::from("r1"),
    }
}

fn message_event(id: &str, text: &str, token: i64) -> TransportEvent {
    let payload = PublishPayload {
        sender_id: UserId::from("user-2"),
        text: text.into(),
        uuid: Some(MessageId::from(id)),
    };
    TransportEvent::Message(MessageEvent {
        room_id: RoomId::from("r1"),
        payload: JsonCodec.encode(&payload).unwrap(),
        time_token: SentAt(token),
    })
}

fn status(response: StatusCategory) -> TransportEvent {
    TransportEvent::Status(Ok(StatusEvent::new(
        response,
        RequestCategory::Subscribe,
    )))
}

fn presence(joined: &[&str], timedout: &[&str], left: &[&str]) -> TransportEvent {
    let ids = |raw: &[&str]| raw.iter().map(|s| UserId::from(*s)).collect();
    TransportEvent::Presence(PresenceEvent {
        room_id: RoomId::from("r1"),
        joined: ids(joined),
        timedout: ids(timedout),
        left: ids(left),
        occupancy: 0,
    })
}

fn drain(events: &mut RoomEvents) -> Vec<RoomEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn tokens(service: &ChatRoomService<MockTransport>) -> Vec<i64> {
    service.current_messages().iter().map(|m| m.sent_at.0).collect()
}

fn user_set(raw: &[&str]) -> HashSet<UserId> {
    raw.iter().map(|s| UserId::from(*s)).collect()
}

// =========================================================================
// Message ingest
// =========================================================================

#[tokio::test]
async fn test_same_message_twice_is_stored_once() {
    let (service, mut events, _) = setup();

    service.ingest(message_event("m-1", "hi", 10));
    service.ingest(message_event("m-1", "hi again", 20));

    let messages = service.current_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hi");
    assert_eq!(messages[0].sent_at, SentAt(10));

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1, "duplicate produces no event");
    let RoomEvent::Messages(Ok(batch)) = &emitted[0] else {
        panic!("expected a messages event");
    };
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn test_log_is_sorted_with_stable_ties() {
    let (service, _events, _) = setup();

    service.ingest(message_event("c", "c", 30));
    service.ingest(message_event("a", "a", 10));
    service.ingest(message_event("tie-1", "t1", 20));
    service.ingest(message_event("tie-2", "t2", 20));

    assert_eq!(tokens(&service), vec![10, 20, 20, 30]);
    let ids: Vec<String> = service
        .current_messages()
        .into_iter()
        .map(|m| m.id.0)
        .collect();
    assert_eq!(ids, ["a", "tie-1", "tie-2", "c"]);
    assert_eq!(service.latest_sent_at(), Some(SentAt(30)));
}

#[tokio::test]
async fn test_event_carries_only_the_new_message() {
    let (service, mut events, _) = setup();
    service.ingest(message_event("m-1", "one", 10));
    drain(&mut events);

    service.ingest(message_event("m-2", "two", 20));

    let emitted = drain(&mut events);
    let RoomEvent::Messages(Ok(batch)) = &emitted[0] else {
        panic!("expected a messages event");
    };
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, MessageId::from("m-2"));
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_silently() {
    let (service, mut events, _) = setup();

    service.ingest(TransportEvent::Message(MessageEvent {
        room_id: RoomId::from("r1"),
        payload: br#"{"text":"no sender"}"#.to_vec(),
        time_token: SentAt(1),
    }));
    service.ingest(TransportEvent::Message(MessageEvent {
        room_id: RoomId::from("r1"),
        payload: b"not json".to_vec(),
        time_token: SentAt(2),
    }));

    assert!(service.current_messages().is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_message_without_uuid_is_accepted() {
    let (service, _events, _) = setup();

    service.ingest(TransportEvent::Message(MessageEvent {
        room_id: RoomId::from("r1"),
        payload: br#"{"senderId":"user-2","text":"legacy"}"#.to_vec(),
        time_token: SentAt(5),
    }));

    let messages = service.current_messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].id.as_str().is_empty());
    assert_eq!(messages[0].room_id, RoomId::from("r1"));
}

#[tokio::test]
async fn test_events_for_other_rooms_are_ignored() {
    let (service, mut events, _) = setup();

    let payload = PublishPayload {
        sender_id: UserId::from("user-2"),
        text: "wrong room".into(),
        uuid: None,
    };
    service.ingest(TransportEvent::Message(MessageEvent {
        room_id: RoomId::from("elsewhere"),
        payload: JsonCodec.encode(&payload).unwrap(),
        time_token: SentAt(1),
    }));
    service.ingest(TransportEvent::Presence(PresenceEvent {
        room_id: RoomId::from("elsewhere"),
        joined: vec![UserId::from("ghost")],
        ..PresenceEvent::default()
    }));

    assert!(service.current_messages().is_empty());
    assert!(service.current_occupants().is_empty());
    assert!(drain(&mut events).is_empty());
}

// =========================================================================
// Presence
// =========================================================================

#[tokio::test]
async fn test_join_then_timeout_removes_occupant() {
    let (service, _events, _) = setup();
    service.ingest(presence(&["u1"], &[], &[]));
    service.ingest(presence(&[], &["u1"], &[]));
    assert!(!service.current_occupants().contains(&UserId::from("u1")));
}

#[tokio::test]
async fn test_join_twice_keeps_one_copy() {
    let (service, _events, _) = setup();
    service.ingest(presence(&["u1"], &[], &[]));
    service.ingest(presence(&["u1"], &[], &[]));
    assert_eq!(service.current_occupants(), user_set(&["u1"]));
    assert_eq!(service.occupancy(), 1);
}

#[tokio::test]
async fn test_presence_event_reports_joined_and_removed() {
    let (service, mut events, _) = setup();
    service.ingest(presence(&["a", "b"], &[], &[]));
    service.ingest(presence(&["c"], &["a"], &["b"]));

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 2);
    assert_eq!(
        emitted[1],
        RoomEvent::Presence(Ok(PresenceChange {
            joined: vec![UserId::from("c")],
            removed: vec![UserId::from("a"), UserId::from("b")],
        }))
    );
    assert_eq!(service.current_occupants(), user_set(&["c"]));
}

#[tokio::test]
async fn test_presence_snapshot_reports_only_new_ids() {
    let probe = Probe::default();
    probe.presence_script.lock().unwrap().push_back(Ok(Some(
        PresenceSnapshot {
            occupancy: 2,
            uuids: vec![UserId::from("a"), UserId::from("b")],
        },
    )));
    let (service, mut events, _) = setup_with(probe);
    service.ingest(presence(&["a"], &[], &[]));
    drain(&mut events);

    service.fetch_presence().await;

    assert_eq!(
        drain(&mut events),
        vec![RoomEvent::Presence(Ok(PresenceChange {
            joined: vec![UserId::from("b")],
            removed: vec![],
        }))]
    );
    assert_eq!(service.current_occupants(), user_set(&["a", "b"]));
}

#[tokio::test]
async fn test_presence_snapshot_does_not_prune_stale_ids() {
    let probe = Probe::default();
    probe.presence_script.lock().unwrap().push_back(Ok(Some(
        PresenceSnapshot {
            occupancy: 1,
            uuids: vec![UserId::from("a")],
        },
    )));
    let (service, _events, _) = setup_with(probe);
    service.ingest(presence(&["a", "stale"], &[], &[]));

    service.fetch_presence().await;

    assert_eq!(service.current_occupants(), user_set(&["a", "stale"]));
}

#[tokio::test]
async fn test_presence_fetch_failure_is_reported() {
    let probe = Probe::default();
    probe
        .presence_script
        .lock()
        .unwrap()
        .push_back(Err(TransportError::Timeout));
    let (service, mut events, _) = setup_with(probe);
    service.ingest(presence(&["a"], &[], &[]));
    drain(&mut events);

    service.fetch_presence().await;

    let emitted = drain(&mut events);
    let RoomEvent::Presence(Err(error)) = &emitted[0] else {
        panic!("expected a presence failure");
    };
    assert_eq!(error.operation(), Some(Operation::Presence));
    assert_eq!(service.current_occupants(), user_set(&["a"]));
}

#[tokio::test]
async fn test_presence_fetch_without_snapshot_reports_empty_change() {
    let probe = Probe::default();
    probe.presence_script.lock().unwrap().push_back(Ok(None));
    let (service, mut events, _) = setup_with(probe);

    service.fetch_presence().await;

    assert_eq!(
        drain(&mut events),
        vec![RoomEvent::Presence(Ok(PresenceChange::default()))]
    );
}

// =========================================================================
// Status
// =========================================================================

#[tokio::test]
async fn test_connected_adds_self_and_reports_connected() {
    let (service, mut events, _) = setup();
    service.ingest(status(StatusCategory::Connected));

    assert_eq!(service.current_occupants(), user_set(&[SELF_ID]));
    assert_eq!(
        drain(&mut events),
        vec![RoomEvent::Status(Ok(ConnectionState::Connected))]
    );
}

#[tokio::test]
async fn test_reconnected_is_treated_as_connected() {
    let (service, mut events, _) = setup();
    service.ingest(status(StatusCategory::Reconnected));
    assert!(service.current_occupants().contains(&UserId::from(SELF_ID)));
    assert_eq!(
        drain(&mut events),
        vec![RoomEvent::Status(Ok(ConnectionState::Connected))]
    );
}

#[tokio::test]
async fn test_connect_then_disconnect_clears_occupants() {
    let (service, mut events, _) = setup();
    service.start();
    service.ingest(status(StatusCategory::Connected));
    service.ingest(presence(&["a", "b"], &[], &[]));
    assert_eq!(service.connection_state(), ConnectionState::Connected);

    service.stop();
    service.ingest(status(StatusCategory::Disconnected));

    assert!(service.current_occupants().is_empty());
    assert_eq!(service.connection_state(), ConnectionState::NotConnected);
    let last = drain(&mut events).pop();
    assert_eq!(
        last,
        Some(RoomEvent::Status(Ok(ConnectionState::NotConnected)))
    );
}

#[tokio::test]
async fn test_unrecognized_status_is_not_forwarded() {
    let (service, mut events, _) = setup();
    service.ingest(presence(&["a"], &[], &[]));
    drain(&mut events);

    for category in [
        StatusCategory::Acknowledgment,
        StatusCategory::Cancelled,
        StatusCategory::Error,
    ] {
        service.ingest(status(category));
    }

    assert!(drain(&mut events).is_empty());
    assert_eq!(service.current_occupants(), user_set(&["a"]));
}

#[tokio::test]
async fn test_status_failure_is_reported_without_touching_occupants() {
    let (service, mut events, _) = setup();
    service.ingest(presence(&["a"], &[], &[]));
    drain(&mut events);

    service.ingest(TransportEvent::Status(Err(TransportError::Network(
        "offline".into(),
    ))));

    let emitted = drain(&mut events);
    let RoomEvent::Status(Err(error)) = &emitted[0] else {
        panic!("expected a status failure");
    };
    assert_eq!(error.operation(), Some(Operation::Status));
    assert_eq!(service.current_occupants(), user_set(&["a"]));
}

#[tokio::test]
async fn test_connection_state_follows_transport() {
    let (service, _events, probe) = setup();
    assert_eq!(service.connection_state(), ConnectionState::NotConnected);

    service.start();
    assert_eq!(service.connection_state(), ConnectionState::Connected);

    // start() is a no-op while subscribed.
    service.start();
    assert_eq!(probe.subscribes.load(Ordering::SeqCst), 1);

    probe.subscribed.lock().unwrap().clear();
    assert_eq!(service.connection_state(), ConnectionState::NotConnected);
}

// =========================================================================
// Send
// =========================================================================

#[tokio::test]
async fn test_send_returns_message_but_does_not_insert_it() {
    let (service, mut events, probe) = setup();

    let sent = service.send("hi").await.unwrap();

    assert!(!sent.id.as_str().is_empty());
    assert_eq!(sent.text, "hi");
    assert_eq!(sent.sender_id, service.sender_id());
    assert_eq!(sent.room_id, RoomId::from("r1"));
    assert!(service.current_messages().is_empty());
    assert!(drain(&mut events).is_empty());

    let published = probe.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].room_id, RoomId::from("r1"));
    assert_eq!(published[0].payload.uuid, Some(sent.id.clone()));
    assert_eq!(published[0].payload.sender_id, UserId::from(SELF_ID));
}

#[tokio::test]
async fn test_send_failure_returns_error_and_changes_nothing() {
    let probe = Probe::default();
    *probe.publish_error.lock().unwrap() = Some(TransportError::Rejected {
        status: 403,
        reason: "forbidden".into(),
    });
    let (service, mut events, _) = setup_with(probe);

    let result = service.send("nope").await;

    let Err(error) = result else {
        panic!("send should fail");
    };
    assert_eq!(error.operation(), Some(Operation::Send));
    assert!(service.current_messages().is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_sent_message_appears_once_echoed() {
    let (service, _events, probe) = setup();

    let sent = service.send("hello").await.unwrap();
    let published = probe.published.lock().unwrap()[0].clone();

    service.ingest(TransportEvent::Message(MessageEvent {
        room_id: published.room_id,
        payload: JsonCodec.encode(&published.payload).unwrap(),
        time_token: SentAt::now(),
    }));

    let messages = service.current_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[0].sender_id, UserId::from(SELF_ID));
}

// =========================================================================
// History
// =========================================================================

#[tokio::test]
async fn test_first_history_fetch_requests_default_page() {
    let probe = Probe::default();
    probe.history_script.lock().unwrap().push_back(Ok(Some(HistoryPage {
        start: SentAt(10),
        end: SentAt(20),
        messages: vec![msg("b", 20), msg("a", 10)],
    })));
    let (service, mut events, probe) = setup_with(probe);

    service.fetch_history().await;

    let requests = probe.history_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].start, None);
    assert_eq!(requests[0].limit, 100);
    assert!(!requests[0].reverse);

    assert_eq!(tokens(&service), vec![10, 20]);
    let emitted = drain(&mut events);
    let RoomEvent::Messages(Ok(batch)) = &emitted[0] else {
        panic!("expected a messages event");
    };
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_history_fetch_asks_for_newer_than_latest() {
    let (service, _events, probe) = setup();
    service.ingest(message_event("m-1", "x", 42));

    service.fetch_history().await;

    let requests = probe.history_requests.lock().unwrap().clone();
    assert_eq!(requests[0].start, Some(SentAt(42)));
    assert!(requests[0].reverse);
}

#[tokio::test]
async fn test_history_uses_configured_page_size() {
    let probe = Arc::new(Probe::default());
    let transport = MockTransport {
        sender: UserId::from(SELF_ID),
        probe: Arc::clone(&probe),
    };
    let config = RoomConfig {
        history_page_size: 25,
        ..RoomConfig::default()
    };
    let (service, _events) = ChatRoomService::new(room(), config, transport);

    service.fetch_history().await;

    assert_eq!(probe.history_requests.lock().unwrap()[0].limit, 25);
}

#[tokio::test]
async fn test_history_batch_reports_only_new_messages() {
    let probe = Probe::default();
    probe.history_script.lock().unwrap().push_back(Ok(Some(HistoryPage {
        messages: vec![msg("old", 10), msg("new", 20)],
        ..HistoryPage::default()
    })));
    let (service, mut events, _) = setup_with(probe);
    service.ingest(message_event("old", "old", 10));
    drain(&mut events);

    service.fetch_history().await;

    let emitted = drain(&mut events);
    let RoomEvent::Messages(Ok(batch)) = &emitted[0] else {
        panic!("expected a messages event");
    };
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, MessageId::from("new"));
    assert_eq!(service.current_messages().len(), 2);
}

#[tokio::test]
async fn test_history_with_nothing_new_still_reports_once() {
    let (service, mut events, _) = setup();
    service.fetch_history().await;
    assert_eq!(drain(&mut events), vec![RoomEvent::Messages(Ok(vec![]))]);
}

#[tokio::test]
async fn test_history_without_page_reports_empty() {
    let probe = Probe::default();
    probe.history_script.lock().unwrap().push_back(Ok(None));
    let (service, mut events, _) = setup_with(probe);

    service.fetch_history().await;

    assert_eq!(drain(&mut events), vec![RoomEvent::Messages(Ok(vec![]))]);
}

#[tokio::test]
async fn test_history_failure_reports_once_and_does_not_retry() {
    let probe = Probe::default();
    probe
        .history_script
        .lock()
        .unwrap()
        .push_back(Err(TransportError::Network("reset".into())));
    let (service, mut events, probe) = setup_with(probe);

    service.fetch_history().await;

    assert_eq!(probe.history_requests.lock().unwrap().len(), 1);
    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    assert_eq!(
        emitted[0],
        RoomEvent::Messages(Err(RoomError::Transport {
            operation: Operation::History,
            source: TransportError::Network("reset".into()),
        }))
    );
    assert!(service.current_messages().is_empty());
}

#[tokio::test]
async fn test_concurrent_history_fetches_never_overlap() {
    let probe = Probe {
        history_delay: Duration::from_millis(20),
        ..Probe::default()
    };
    {
        let mut script = probe.history_script.lock().unwrap();
        script.push_back(Ok(Some(HistoryPage {
            messages: vec![msg("a", 10), msg("b", 20)],
            ..HistoryPage::default()
        })));
        script.push_back(Ok(Some(HistoryPage {
            messages: vec![msg("c", 30)],
            ..HistoryPage::default()
        })));
    }
    let (service, _events, probe) = setup_with(probe);

    futures_util::future::join_all([
        service.fetch_history(),
        service.fetch_history(),
    ])
    .await;

    let requests = probe.history_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    // The queued fetch recomputed its start from the first fetch's result.
    assert_eq!(requests[0].start, None);
    assert_eq!(requests[1].start, Some(SentAt(20)));
    assert_eq!(tokens(&service), vec![10, 20, 30]);
}

#[tokio::test]
async fn test_concurrent_history_fetches_from_separate_tasks() {
    let probe = Probe {
        history_delay: Duration::from_millis(10),
        ..Probe::default()
    };
    let (service, _events, probe) = setup_with(probe);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.fetch_history().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(probe.history_requests.lock().unwrap().len(), 4);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_history_completion_after_stop_is_still_applied() {
    let probe = Probe {
        history_delay: Duration::from_millis(20),
        ..Probe::default()
    };
    probe.history_script.lock().unwrap().push_back(Ok(Some(HistoryPage {
        messages: vec![msg("late", 10)],
        ..HistoryPage::default()
    })));
    let (service, _events, _) = setup_with(probe);
    service.start();

    let fetch = {
        let service = service.clone();
        tokio::spawn(async move { service.fetch_history().await })
    };
    tokio::task::yield_now().await;
    service.stop();
    fetch.await.unwrap();

    assert_eq!(service.current_messages().len(), 1);
}

#[tokio::test]
async fn test_refresh_runs_history_and_presence() {
    let probe = Probe::default();
    probe.presence_script.lock().unwrap().push_back(Ok(Some(
        PresenceSnapshot {
            occupancy: 1,
            uuids: vec![UserId::from("a")],
        },
    )));
    let (service, mut events, probe) = setup_with(probe);

    service.refresh().await;

    assert_eq!(probe.history_requests.lock().unwrap().len(), 1);
    let kinds: HashSet<&str> =
        drain(&mut events).iter().map(RoomEvent::kind).collect();
    assert_eq!(kinds, HashSet::from(["messages", "presence"]));
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test]
async fn test_shutdown_stops_events_and_mutation() {
    let (service, mut events, probe) = setup();
    service.start();
    service.shutdown();

    assert!(service.is_shut_down());
    assert_eq!(probe.unsubscribes.load(Ordering::SeqCst), 1);

    service.ingest(message_event("m-1", "x", 1));
    service.ingest(presence(&["a"], &[], &[]));
    service.ingest(status(StatusCategory::Connected));
    service.fetch_history().await;
    service.fetch_presence().await;

    assert!(service.current_messages().is_empty());
    assert!(service.current_occupants().is_empty());
    assert!(drain(&mut events).is_empty());

    let result = service.send("late").await;
    assert_eq!(result, Err(RoomError::ShutDown(RoomId::from("r1"))));

    // Restarting a torn-down service does nothing.
    service.start();
    assert_eq!(probe.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_in_flight_history_after_shutdown_does_not_resurrect_state() {
    let probe = Probe {
        history_delay: Duration::from_millis(20),
        ..Probe::default()
    };
    probe.history_script.lock().unwrap().push_back(Ok(Some(HistoryPage {
        messages: vec![msg("zombie", 10)],
        ..HistoryPage::default()
    })));
    let (service, mut events, _) = setup_with(probe);

    let fetch = {
        let service = service.clone();
        tokio::spawn(async move { service.fetch_history().await })
    };
    tokio::task::yield_now().await;
    service.shutdown();
    fetch.await.unwrap();

    assert!(service.current_messages().is_empty());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_dropping_last_handle_unsubscribes() {
    let (service, _events, probe) = setup();
    service.start();
    let second = service.clone();

    drop(service);
    assert_eq!(probe.unsubscribes.load(Ordering::SeqCst), 0);

    drop(second);
    assert_eq!(probe.unsubscribes.load(Ordering::SeqCst), 1);
}

// =========================================================================
// Feed pump and concurrency
// =========================================================================

#[tokio::test]
async fn test_pump_feeds_transport_events_in_order() {
    let (service, mut events, _) = setup();
    let (tx, rx) = mpsc::unbounded_channel();
    let pump = service.pump(rx);

    tx.send(status(StatusCategory::Connected)).unwrap();
    tx.send(message_event("m-1", "hi", 10)).unwrap();
    tx.send(presence(&["a"], &[], &[])).unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(events.recv().await.unwrap().kind());
    }
    assert_eq!(kinds, ["status", "messages", "presence"]);

    drop(tx);
    pump.await.unwrap();
}

#[tokio::test]
async fn test_pump_does_not_keep_service_alive() {
    let (service, _events, probe) = setup();
    service.start();
    let (tx, rx) = mpsc::unbounded_channel();
    let pump = service.pump(rx);

    drop(service);
    assert_eq!(probe.unsubscribes.load(Ordering::SeqCst), 1);

    tx.send(status(StatusCategory::Connected)).unwrap();
    pump.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_ingest_keeps_log_consistent() {
    let (service, _events, _) = setup();

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let service = service.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let id = format!("w{w}-m{i}");
                    let token = (w * 50 + i) * 7919 % 1000;
                    service.ingest(message_event(&id, "x", token));
                    // Every writer also replays an earlier id.
                    service.ingest(message_event("w0-m0", "dup", 0));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let snapshot = tokens(&service);
                    assert!(snapshot.windows(2).all(|w| w[0] <= w[1]));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.await.unwrap();
    }

    let messages = service.current_messages();
    assert_eq!(messages.len(), 400);
    let unique: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
    assert_eq!(unique.len(), 400);
    assert!(tokens(&service).windows(2).all(|w| w[0] <= w[1]));
}
