use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ConversationId, UserId},
    protocol::{MessageRecord, SendMessageRequest},
};
use tracing::{info, warn};

use crate::{error::DeliveryError, transport::ChatTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before attempt `attempt` (0-based): `attempt * base_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
}

impl OutgoingMessage {
    /// Trims the text and rejects it when nothing is left.
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        text: &str,
    ) -> Result<Self, DeliveryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DeliveryError::EmptyText);
        }
        Ok(Self {
            conversation_id,
            sender_id,
            text: text.to_string(),
        })
    }

    fn request(&self) -> SendMessageRequest {
        SendMessageRequest {
            conversation_id: self.conversation_id.clone(),
            message: self.text.clone(),
            sender_id: self.sender_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Present when the backend echoed the created message.
    pub record: Option<MessageRecord>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Total time spent backing off.
    pub waited: Duration,
}

#[derive(Clone)]
pub struct RetryController {
    transport: Arc<dyn ChatTransport>,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn deliver(&self, message: &OutgoingMessage) -> Result<DeliveryReport, DeliveryError> {
        if message.text.trim().is_empty() {
            return Err(DeliveryError::EmptyText);
        }

        let request = message.request();
        let max_attempts = self.policy.max_attempts();
        let mut waited = Duration::ZERO;
        let mut attempt = 0;
        loop {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                waited = waited.saturating_add(delay);
            }

            match self.transport.send_message(&request).await {
                Ok(record) => {
                    info!(
                        conversation_id = %message.conversation_id,
                        attempt = attempt + 1,
                        max_attempts,
                        "chat: message delivered"
                    );
                    return Ok(DeliveryReport {
                        record,
                        attempts: attempt + 1,
                        waited,
                    });
                }
                Err(err) if attempt < self.policy.max_retries => {
                    warn!(
                        conversation_id = %message.conversation_id,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %err,
                        "chat: delivery attempt failed; retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        conversation_id = %message.conversation_id,
                        attempts = attempt + 1,
                        error = %err,
                        "chat: delivery budget exhausted"
                    );
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt + 1,
                        last_error: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
