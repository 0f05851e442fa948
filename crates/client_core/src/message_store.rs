//! In-memory message sequence for one open conversation.
//!
//! The store is the single source the chat view renders from. Provisional
//! entries are created the moment the user submits text and are later either
//! confirmed by the send response, superseded by a polled server record, or
//! removed when delivery gives up.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use shared::{
    domain::{ConversationId, MessageId, UserId},
    protocol::MessageRecord,
};

/// How close a polled record's timestamp must be to a provisional entry's
/// local timestamp to be taken as the same message.
pub const DEFAULT_MATCH_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True until the server has acknowledged the message.
    pub provisional: bool,
}

impl From<MessageRecord> for LocalMessage {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            content: record.content,
            timestamp: record.timestamp,
            provisional: false,
        }
    }
}

/// What `reconcile` does with provisional entries the server list does not
/// (yet) contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisionalPolicy {
    /// Keep them on screen, merged by timestamp, until a server record
    /// supersedes them or the delivery path removes them.
    #[default]
    KeepUntilMatched,
    /// Replace the whole sequence with the server list.
    DropUnconfirmed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub confirmed: usize,
    pub superseded: usize,
    pub retained: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation_id: ConversationId,
    messages: Vec<LocalMessage>,
    policy: ProvisionalPolicy,
    match_window: ChronoDuration,
}

impl MessageStore {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            policy: ProvisionalPolicy::default(),
            match_window: ChronoDuration::seconds(DEFAULT_MATCH_WINDOW_SECS),
        }
    }

    pub fn with_policy(mut self, policy: ProvisionalPolicy, match_window: ChronoDuration) -> Self {
        self.policy = policy;
        self.match_window = match_window;
        self
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&LocalMessage> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn provisional_count(&self) -> usize {
        self.messages.iter().filter(|message| message.provisional).count()
    }

    pub fn insert_provisional(&mut self, sender_id: UserId, content: impl Into<String>) -> MessageId {
        self.insert_provisional_at(sender_id, content, Utc::now())
    }

    /// Appends a provisional entry and returns its temporary id.
    pub fn insert_provisional_at(
        &mut self,
        sender_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> MessageId {
        let id = MessageId::provisional();
        self.messages.push(LocalMessage {
            id: id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id,
            content: content.into(),
            timestamp,
            provisional: true,
        });
        id
    }

    /// Swaps a provisional entry for the record the send call returned.
    /// Returns false when the entry is already gone (superseded or removed).
    pub fn confirm(&mut self, provisional_id: &MessageId, record: MessageRecord) -> bool {
        let Some(index) = self
            .messages
            .iter()
            .position(|message| message.provisional && &message.id == provisional_id)
        else {
            return false;
        };

        if self
            .messages
            .iter()
            .any(|message| !message.provisional && message.id == record.id)
        {
            // A poll already delivered the confirmed record.
            self.messages.remove(index);
            return true;
        }

        self.messages[index] = record.into();
        self.messages.sort_by_key(|message| message.timestamp);
        true
    }

    pub fn remove_provisional(&mut self, provisional_id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|message| !(message.provisional && &message.id == provisional_id));
        self.messages.len() != before
    }

    /// Replaces the confirmed part of the sequence with the server list.
    ///
    /// Server state always wins: previously confirmed entries absent from
    /// `server_messages` disappear. Each server record supersedes at most one
    /// provisional entry with the same sender and content whose timestamp is
    /// within the match window.
    pub fn reconcile(&mut self, server_messages: Vec<MessageRecord>) -> ReconcileSummary {
        let mut confirmed: Vec<LocalMessage> =
            server_messages.into_iter().map(LocalMessage::from).collect();
        // Stable: equal timestamps keep the order the server listed them in.
        confirmed.sort_by_key(|message| message.timestamp);

        let provisional: Vec<LocalMessage> = self
            .messages
            .drain(..)
            .filter(|message| message.provisional)
            .collect();

        let mut summary = ReconcileSummary {
            confirmed: confirmed.len(),
            ..ReconcileSummary::default()
        };

        if self.policy == ProvisionalPolicy::DropUnconfirmed {
            summary.dropped = provisional.len();
            self.messages = confirmed;
            return summary;
        }

        let mut claimed = vec![false; confirmed.len()];
        let mut retained = Vec::new();
        for pending in provisional {
            let matched = confirmed.iter().enumerate().position(|(index, record)| {
                !claimed[index]
                    && record.sender_id == pending.sender_id
                    && record.content == pending.content
                    && within(record.timestamp, pending.timestamp, self.match_window)
            });
            match matched {
                Some(index) => {
                    claimed[index] = true;
                    summary.superseded += 1;
                }
                None => retained.push(pending),
            }
        }

        summary.retained = retained.len();
        self.messages = confirmed;
        for pending in retained {
            let at = self
                .messages
                .partition_point(|message| message.timestamp <= pending.timestamp);
            self.messages.insert(at, pending);
        }
        summary
    }
}

fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: ChronoDuration) -> bool {
    a - b <= window && b - a <= window
}

#[cfg(test)]
#[path = "tests/message_store_tests.rs"]
mod tests;
