use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use shared::domain::{ConversationId, MessageId, UserId};
use tokio::{
    sync::{broadcast, oneshot, Mutex},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    error::{DeliveryError, TransportError},
    events::{ClientEvent, FailedDelivery},
    message_store::{LocalMessage, MessageStore, ProvisionalPolicy, DEFAULT_MATCH_WINDOW_SECS},
    poller::{PollKey, PollRegistry, PollTarget, PollTicket, RefreshMode},
    retry::{DeliveryReport, OutgoingMessage, RetryController, RetryPolicy},
    transport::ChatTransport,
};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub provisional_policy: ProvisionalPolicy,
    pub match_window: ChronoDuration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            provisional_policy: ProvisionalPolicy::default(),
            match_window: ChronoDuration::seconds(DEFAULT_MATCH_WINDOW_SECS),
        }
    }
}

/// State shared between the session, its poll timer and its delivery tasks.
/// Nothing here holds the session itself, so dropping the session tears
/// everything down.
struct MessageSync {
    conversation_id: ConversationId,
    transport: Arc<dyn ChatTransport>,
    store: Mutex<MessageStore>,
    events: broadcast::Sender<ClientEvent>,
    active: AtomicBool,
}

impl MessageSync {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn publish(&self, messages: Vec<LocalMessage>) {
        let _ = self.events.send(ClientEvent::MessagesUpdated {
            conversation_id: self.conversation_id.clone(),
            messages,
        });
    }

    async fn fetch(&self, mode: RefreshMode) -> Result<(), TransportError> {
        match self.transport.fetch_messages(&self.conversation_id).await {
            Ok(records) => {
                if !self.is_active() {
                    debug!(
                        conversation_id = %self.conversation_id,
                        "chat: discarding fetch that resolved after close"
                    );
                    return Ok(());
                }
                let snapshot = {
                    let mut store = self.store.lock().await;
                    let summary = store.reconcile(records);
                    debug!(
                        conversation_id = %self.conversation_id,
                        confirmed = summary.confirmed,
                        superseded = summary.superseded,
                        retained = summary.retained,
                        dropped = summary.dropped,
                        "chat: reconciled with server"
                    );
                    store.messages().to_vec()
                };
                self.publish(snapshot);
                Ok(())
            }
            Err(err) => {
                let empty = self.store.lock().await.is_empty();
                if empty && self.is_active() {
                    let _ = self.events.send(ClientEvent::LoadFailed {
                        key: PollKey::Conversation(self.conversation_id.clone()),
                        reason: err.to_string(),
                    });
                }
                if mode == RefreshMode::Blocking {
                    return Err(err);
                }
                warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "chat: silent refresh failed"
                );
                Ok(())
            }
        }
    }

    async fn settle(
        &self,
        provisional_id: &MessageId,
        content: &str,
        outcome: &Result<DeliveryReport, DeliveryError>,
    ) {
        if !self.is_active() {
            return;
        }
        match outcome {
            Ok(report) => {
                let snapshot = {
                    let mut store = self.store.lock().await;
                    if let Some(record) = report.record.clone() {
                        store.confirm(provisional_id, record);
                    }
                    store.messages().to_vec()
                };
                let _ = self.events.send(ClientEvent::MessageDelivered {
                    conversation_id: self.conversation_id.clone(),
                    provisional_id: provisional_id.clone(),
                    message_id: report.record.as_ref().map(|record| record.id.clone()),
                    attempts: report.attempts,
                });
                self.publish(snapshot);
                if let Err(err) = self.fetch(RefreshMode::Silent).await {
                    warn!(error = %err, "chat: refresh after delivery failed");
                }
            }
            Err(err) => {
                // A drop-unconfirmed poll may already have removed the entry.
                let snapshot = {
                    let mut store = self.store.lock().await;
                    store.remove_provisional(provisional_id);
                    store.messages().to_vec()
                };
                self.publish(snapshot);
                if let DeliveryError::Exhausted { attempts, last_error } = err {
                    let _ = self.events.send(ClientEvent::DeliveryFailed(FailedDelivery {
                        conversation_id: self.conversation_id.clone(),
                        content: content.to_string(),
                        attempts: *attempts,
                        reason: last_error.to_string(),
                    }));
                }
            }
        }
    }
}

#[async_trait]
impl PollTarget for MessageSync {
    async fn refresh(&self, mode: RefreshMode) -> anyhow::Result<()> {
        self.fetch(mode).await?;
        Ok(())
    }
}

/// Handle for one in-flight delivery.
pub struct SendTicket {
    pub provisional_id: MessageId,
    outcome: oneshot::Receiver<Result<DeliveryReport, DeliveryError>>,
}

impl SendTicket {
    /// Resolves once delivery succeeded or its budget ran out. A session
    /// closed in the meantime yields [`DeliveryError::Cancelled`].
    pub async fn outcome(self) -> Result<DeliveryReport, DeliveryError> {
        self.outcome.await.unwrap_or(Err(DeliveryError::Cancelled))
    }
}

pub struct ConversationSession {
    me: UserId,
    sync: Arc<MessageSync>,
    registry: Arc<PollRegistry>,
    key: PollKey,
    ticket: StdMutex<Option<PollTicket>>,
    config: SessionConfig,
    retry: RetryController,
    deliveries: StdMutex<JoinSet<()>>,
}

impl ConversationSession {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<PollRegistry>,
        conversation_id: ConversationId,
        me: UserId,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let store = MessageStore::new(conversation_id.clone())
            .with_policy(config.provisional_policy, config.match_window);
        Self {
            me,
            key: PollKey::Conversation(conversation_id.clone()),
            retry: RetryController::new(transport.clone(), config.retry),
            sync: Arc::new(MessageSync {
                conversation_id,
                transport,
                store: Mutex::new(store),
                events,
                active: AtomicBool::new(false),
            }),
            registry,
            ticket: StdMutex::new(None),
            config,
            deliveries: StdMutex::new(JoinSet::new()),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.sync.conversation_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sync.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.sync.is_active()
    }

    /// Loads the conversation and starts polling it. The timer is started
    /// even when the first load fails, but not when `close` ran meanwhile.
    pub async fn activate(&self) -> Result<(), TransportError> {
        self.sync.active.store(true, Ordering::Release);
        info!(conversation_id = %self.sync.conversation_id, "chat: conversation opened");
        let result = self.sync.fetch(RefreshMode::Blocking).await;
        if !self.is_active() {
            debug!(
                conversation_id = %self.sync.conversation_id,
                "chat: closed while loading; not polling"
            );
            return result;
        }
        let ticket =
            self.registry
                .start(self.key.clone(), self.config.poll_interval, self.sync.clone());
        *self.ticket.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticket);
        result
    }

    pub async fn reload(&self) -> Result<(), TransportError> {
        self.sync.fetch(RefreshMode::Blocking).await
    }

    pub async fn messages(&self) -> Vec<LocalMessage> {
        self.sync.store.lock().await.messages().to_vec()
    }

    /// Shows `text` immediately as a provisional entry and delivers it in the
    /// background.
    pub async fn send(&self, text: &str) -> Result<SendTicket, DeliveryError> {
        let outgoing = OutgoingMessage::new(
            self.sync.conversation_id.clone(),
            self.me.clone(),
            text,
        )?;
        if !self.is_active() {
            return Err(DeliveryError::Cancelled);
        }

        let (provisional_id, snapshot) = {
            let mut store = self.sync.store.lock().await;
            let id = store.insert_provisional(self.me.clone(), outgoing.text.clone());
            (id, store.messages().to_vec())
        };
        self.sync.publish(snapshot);

        let (tx, rx) = oneshot::channel();
        let sync = self.sync.clone();
        let retry = self.retry.clone();
        let task_id = provisional_id.clone();
        let mut deliveries = self.deliveries.lock().unwrap_or_else(PoisonError::into_inner);
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn(async move {
            let outcome = retry.deliver(&outgoing).await;
            sync.settle(&task_id, &outgoing.text, &outcome).await;
            let _ = tx.send(outcome);
        });
        drop(deliveries);

        Ok(SendTicket {
            provisional_id,
            outcome: rx,
        })
    }

    /// Sends a failed message again with a fresh attempt budget.
    pub async fn resend(&self, failed: &FailedDelivery) -> Result<SendTicket, DeliveryError> {
        self.send(&failed.content).await
    }

    /// Idempotent. Stops the poll timer and abandons pending deliveries;
    /// results that arrive afterwards are discarded.
    pub fn close(&self) {
        if self.sync.active.swap(false, Ordering::AcqRel) {
            info!(conversation_id = %self.sync.conversation_id, "chat: conversation closed");
        }
        if let Some(ticket) = self
            .ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.registry.release(&ticket);
        }
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
