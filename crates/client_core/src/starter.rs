use std::sync::Arc;

use shared::{
    domain::UserId,
    protocol::{ConversationRecord, CreateConversationRequest},
};
use tracing::{info, warn};

use crate::{
    error::{DeliveryError, StartChatError, TransportError},
    retry::{DeliveryReport, OutgoingMessage, RetryController, RetryPolicy},
    transport::ChatTransport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstMessage {
    Delivered(DeliveryReport),
    /// The conversation exists but its opening message did not go through;
    /// the caller keeps the user in the conversation so they can resend.
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedConversation {
    pub conversation: ConversationRecord,
    pub first_message: FirstMessage,
}

/// Opens a conversation with another user and delivers its first message.
pub struct ConversationStarter {
    transport: Arc<dyn ChatTransport>,
    retry: RetryController,
}

impl ConversationStarter {
    pub fn new(transport: Arc<dyn ChatTransport>, first_message_policy: RetryPolicy) -> Self {
        Self {
            retry: RetryController::new(transport.clone(), first_message_policy),
            transport,
        }
    }

    pub async fn find_existing(
        &self,
        me: &UserId,
        receiver: &UserId,
    ) -> Result<Option<ConversationRecord>, TransportError> {
        let conversations = self.transport.fetch_conversations(me).await?;
        Ok(conversations
            .into_iter()
            .find(|conversation| conversation.is_between(me, receiver)))
    }

    pub async fn start(
        &self,
        me: &UserId,
        receiver: &UserId,
        text: &str,
    ) -> Result<StartedConversation, StartChatError> {
        if text.trim().is_empty() {
            return Err(StartChatError::EmptyText);
        }
        if me == receiver {
            return Err(StartChatError::SelfConversation);
        }

        let conversation = self
            .transport
            .create_conversation(&CreateConversationRequest {
                sender_id: me.clone(),
                receiver_id: receiver.clone(),
            })
            .await
            .map_err(StartChatError::Create)?;
        info!(
            conversation_id = %conversation.id,
            receiver_id = %receiver,
            "chat: conversation created"
        );

        let outgoing = OutgoingMessage::new(conversation.id.clone(), me.clone(), text)
            .map_err(|_| StartChatError::EmptyText)?;
        let first_message = match self.retry.deliver(&outgoing).await {
            Ok(report) => FirstMessage::Delivered(report),
            Err(DeliveryError::Exhausted {
                attempts,
                last_error,
            }) => {
                warn!(
                    conversation_id = %conversation.id,
                    attempts,
                    error = %last_error,
                    "chat: conversation created but first message failed"
                );
                FirstMessage::Failed {
                    attempts,
                    reason: last_error.to_string(),
                }
            }
            Err(err) => FirstMessage::Failed {
                attempts: 0,
                reason: err.to_string(),
            },
        };

        Ok(StartedConversation {
            conversation,
            first_message,
        })
    }
}

#[cfg(test)]
#[path = "tests/starter_tests.rs"]
mod tests;
