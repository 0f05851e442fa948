use shared::domain::{ConversationId, MessageId};

use crate::{conversation_list::ConversationSummary, message_store::LocalMessage, poller::PollKey};

/// A message whose delivery budget ran out. The provisional entry has already
/// been removed; the caller decides whether to resend the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub conversation_id: ConversationId,
    pub content: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    MessagesUpdated {
        conversation_id: ConversationId,
        messages: Vec<LocalMessage>,
    },
    MessageDelivered {
        conversation_id: ConversationId,
        provisional_id: MessageId,
        message_id: Option<MessageId>,
        attempts: u32,
    },
    DeliveryFailed(FailedDelivery),
    ConversationsUpdated {
        conversations: Vec<ConversationSummary>,
    },
    /// A refresh failed while there was nothing on screen to fall back to.
    LoadFailed {
        key: PollKey,
        reason: String,
    },
}
