//! The deduplicated, time-ordered message log.

use std::collections::HashSet;

use confab_protocol::{Message, MessageId, SentAt};

/// Messages sorted ascending by `sent_at`, unique by id.
///
/// The first copy of an id wins; later copies are ignored even if their
/// text or token differ. Ties on `sent_at` keep insertion order because
/// the re-sort is stable and new entries are appended.
#[derive(Debug, Default)]
pub(crate) struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageLog {
    /// Merges a batch and returns the messages that were actually added,
    /// in batch order. Ids already present (or repeated within the batch)
    /// are skipped individually; the rest of the batch still lands.
    pub(crate) fn merge(
        &mut self,
        batch: impl IntoIterator<Item = Message>,
    ) -> Vec<Message> {
        let mut added = Vec::new();
        for message in batch {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message.clone());
                added.push(message);
            }
        }
        if !added.is_empty() {
            self.messages.sort_by_key(|m| m.sent_at);
        }
        added
    }

    pub(crate) fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub(crate) fn latest_sent_at(&self) -> Option<SentAt> {
        self.messages.last().map(|m| m.sent_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}
