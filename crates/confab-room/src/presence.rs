//! Occupant-set merge rules.

use std::collections::HashSet;

use confab_protocol::{PresenceChange, UserId};
use confab_transport::PresenceEvent;

/// Applies a live presence event: joins first, then timeouts, then
/// leaves. Inserting a present id or removing an absent one is a no-op.
///
/// The returned change echoes the event as reported, with
/// `removed = timedout ++ left`.
pub(crate) fn apply_event(
    occupants: &mut HashSet<UserId>,
    event: PresenceEvent,
) -> PresenceChange {
    for id in &event.joined {
        occupants.insert(id.clone());
    }
    for id in event.timedout.iter().chain(&event.left) {
        occupants.remove(id);
    }

    let mut removed = event.timedout;
    removed.extend(event.left);
    PresenceChange {
        joined: event.joined,
        removed,
    }
}

/// Unions a here-now snapshot into the set and returns the ids that were
/// not already present, in snapshot order.
///
/// Ids missing from the snapshot are left alone: a snapshot only adds.
pub(crate) fn absorb_snapshot(
    occupants: &mut HashSet<UserId>,
    uuids: Vec<UserId>,
) -> Vec<UserId> {
    uuids
        .into_iter()
        .filter(|id| occupants.insert(id.clone()))
        .collect()
}
