use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, UserId},
    protocol::ConversationRecord,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::{
    error::TransportError,
    events::ClientEvent,
    poller::{PollKey, PollRegistry, PollTarget, PollTicket, RefreshMode},
    transport::ChatTransport,
};

/// Preview shown for a conversation that has no message yet.
pub const EMPTY_CONVERSATION_PREVIEW: &str = "Start the conversation...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub partner_id: UserId,
    pub last_message: String,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ConversationList {
    me: UserId,
    records: Vec<ConversationRecord>,
    summaries: Vec<ConversationSummary>,
}

impl ConversationList {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            records: Vec::new(),
            summaries: Vec::new(),
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Replaces the list. Summaries are ordered by last activity, most
    /// recent first; conversations without any timestamp go last.
    pub fn replace(&mut self, records: Vec<ConversationRecord>) {
        let mut summaries: Vec<ConversationSummary> = records
            .iter()
            .map(|record| ConversationSummary {
                id: record.id.clone(),
                partner_id: record.partner_of(&self.me).clone(),
                last_message: record
                    .last_message
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_CONVERSATION_PREVIEW.to_string()),
                last_active: record.last_active(),
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_active
                .cmp(&a.last_active)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.records = records;
        self.summaries = summaries;
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Existing conversation with `partner`, in either direction.
    pub fn find_with(&self, partner: &UserId) -> Option<&ConversationRecord> {
        self.records
            .iter()
            .find(|record| record.is_between(&self.me, partner))
    }
}

struct InboxSync {
    transport: Arc<dyn ChatTransport>,
    list: RwLock<ConversationList>,
    events: broadcast::Sender<ClientEvent>,
    active: AtomicBool,
}

impl InboxSync {
    async fn fetch(&self, mode: RefreshMode) -> Result<(), TransportError> {
        let me = self.list.read().await.me().clone();
        match self.transport.fetch_conversations(&me).await {
            Ok(records) => {
                if !self.active.load(Ordering::Acquire) {
                    debug!(user_id = %me, "inbox: discarding refresh that resolved after close");
                    return Ok(());
                }
                let conversations = {
                    let mut list = self.list.write().await;
                    list.replace(records);
                    list.summaries().to_vec()
                };
                let _ = self
                    .events
                    .send(ClientEvent::ConversationsUpdated { conversations });
                Ok(())
            }
            Err(err) => {
                let empty = self.list.read().await.is_empty();
                if empty && self.active.load(Ordering::Acquire) {
                    let _ = self.events.send(ClientEvent::LoadFailed {
                        key: PollKey::ConversationList(me.clone()),
                        reason: err.to_string(),
                    });
                }
                if mode == RefreshMode::Blocking {
                    return Err(err);
                }
                warn!(user_id = %me, error = %err, "inbox: silent refresh failed");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PollTarget for InboxSync {
    async fn refresh(&self, mode: RefreshMode) -> anyhow::Result<()> {
        self.fetch(mode).await?;
        Ok(())
    }
}

/// The conversation list screen: one blocking load, then silent polling.
pub struct ConversationInbox {
    sync: Arc<InboxSync>,
    registry: Arc<PollRegistry>,
    key: PollKey,
    ticket: StdMutex<Option<PollTicket>>,
    period: Duration,
}

impl ConversationInbox {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<PollRegistry>,
        me: UserId,
        period: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            key: PollKey::ConversationList(me.clone()),
            sync: Arc::new(InboxSync {
                transport,
                list: RwLock::new(ConversationList::new(me)),
                events,
                active: AtomicBool::new(false),
            }),
            registry,
            ticket: StdMutex::new(None),
            period,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sync.events.subscribe()
    }

    /// Loads the list and starts polling. Polling is started even when the
    /// first load fails, unless the inbox was closed during the load.
    pub async fn activate(&self) -> Result<(), TransportError> {
        self.sync.active.store(true, Ordering::Release);
        let result = self.sync.fetch(RefreshMode::Blocking).await;
        if !self.sync.active.load(Ordering::Acquire) {
            debug!("inbox: closed while loading; not polling");
            return result;
        }
        let ticket = self
            .registry
            .start(self.key.clone(), self.period, self.sync.clone());
        *self.ticket.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticket);
        result
    }

    pub async fn refresh_now(&self) -> Result<(), TransportError> {
        self.sync.fetch(RefreshMode::Blocking).await
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.sync.list.read().await.summaries().to_vec()
    }

    pub async fn find_with(&self, partner: &UserId) -> Option<ConversationRecord> {
        self.sync.list.read().await.find_with(partner).cloned()
    }

    pub fn close(&self) {
        self.sync.active.store(false, Ordering::Release);
        if let Some(ticket) = self
            .ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.registry.release(&ticket);
        }
    }
}

impl Drop for ConversationInbox {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "tests/conversation_list_tests.rs"]
mod tests;
