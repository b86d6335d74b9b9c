//! Two clients chatting through one in-memory hub.
//!
//! Run with `RUST_LOG=debug` to see the service internals as well.

use std::time::Duration;

use confab::prelude::*;

/// Logs every event a client's observer receives.
fn watch(name: &'static str, events: RoomEvents) -> tokio::task::JoinHandle<()> {
    events.listen(move |event| match event {
        RoomEvent::Messages(Ok(batch)) => {
            for message in batch {
                tracing::info!(
                    client = name,
                    from = %message.sender_id,
                    at = message.sent_at_seconds(),
                    "{}",
                    message.text
                );
            }
        }
        RoomEvent::Presence(Ok(change)) if !change.is_empty() => {
            tracing::info!(
                client = name,
                joined = ?change.joined,
                removed = ?change.removed,
                "presence"
            );
        }
        RoomEvent::Presence(Ok(_)) => {}
        RoomEvent::Status(Ok(state)) => {
            tracing::info!(client = name, %state, "status");
        }
        RoomEvent::Messages(Err(error))
        | RoomEvent::Presence(Err(error))
        | RoomEvent::Status(Err(error)) => {
            tracing::warn!(client = name, %error, "room error");
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), ConfabError> {
    init_tracing();

    let hub = LocalHub::new();
    hub.seed(Message::compose(
        "Welcome to the demo room.",
        UserId::from("system"),
        Room::default().id,
    ));

    let (alice, alice_events) = ChatClientBuilder::new().connect(hub.connect("alice"))?;
    let (bob, bob_events) = ChatClientBuilder::new().connect(hub.connect("bob"))?;
    let alice_log = watch("alice", alice_events);
    let bob_log = watch("bob", bob_events);

    alice.start()?;
    bob.start()?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    alice.send("hi bob").await?;
    bob.send("hey alice").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Bob goes to the background and comes back, then catches up on return.
    bob.signal(AppSignal::WillResignActive)?;
    alice.send("are you still there?").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    bob.signal(AppSignal::BecameActive)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    for (name, client) in [("alice", &alice), ("bob", &bob)] {
        tracing::info!(
            client = name,
            messages = client.messages().len(),
            occupants = client.occupants().len(),
            "final state"
        );
    }

    alice.shutdown().await?;
    bob.shutdown().await?;
    let _ = tokio::join!(alice_log, bob_log);
    Ok(())
}
