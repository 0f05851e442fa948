use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, PostId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        parse_timestamp, ConversationRecord, CreateConversationRequest, MessageRecord, PostPage,
        PostSummary, SendMessageRequest,
    },
};
use tokio::{sync::Semaphore, time::Instant};

use crate::{
    error::TransportError,
    transport::{ChatTransport, FavoriteSource, ListingSource},
};

pub(crate) fn at(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).expect("timestamp")
}

pub(crate) fn record(id: &str, sender: &str, content: &str, timestamp: &str) -> MessageRecord {
    MessageRecord {
        id: MessageId::new(id),
        conversation_id: ConversationId::new("c-1"),
        sender_id: UserId::new(sender),
        content: content.to_string(),
        timestamp: at(timestamp),
    }
}

pub(crate) fn conversation(
    id: &str,
    sender: &str,
    receiver: &str,
    updated_at: Option<&str>,
) -> ConversationRecord {
    ConversationRecord {
        id: ConversationId::new(id),
        sender_id: UserId::new(sender),
        receiver_id: UserId::new(receiver),
        last_message: None,
        updated_at: updated_at.map(at),
        created_at: None,
    }
}

pub(crate) fn post(slug: &str, title: &str, price: f64) -> PostSummary {
    PostSummary {
        id: PostId::new(format!("id-{slug}")),
        slug: slug.to_string(),
        title: title.to_string(),
        price,
        area: 20.0,
        location: None,
        category_name: None,
        amenities: Default::default(),
        image_urls: Vec::new(),
    }
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        error: ApiError::new(ErrorCode::Internal, "service unavailable"),
    }
}

#[derive(Default)]
struct FakeState {
    messages: Vec<MessageRecord>,
    conversations: Vec<ConversationRecord>,
    send_failures: u32,
    fetch_failures: u32,
    create_failures: u32,
    silent_sends: bool,
    send_calls: Vec<(Instant, SendMessageRequest)>,
    message_fetches: u32,
    conversation_fetches: u32,
    next_id: u64,
}

/// Scriptable chat backend: failures are injected per call kind and
/// successful sends are appended to the server-side message list.
#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_messages(self, messages: Vec<MessageRecord>) -> Self {
        self.state().messages = messages;
        self
    }

    pub(crate) fn with_conversations(self, conversations: Vec<ConversationRecord>) -> Self {
        self.state().conversations = conversations;
        self
    }

    pub(crate) fn push_message(&self, message: MessageRecord) {
        self.state().messages.push(message);
    }

    pub(crate) fn set_conversations(&self, conversations: Vec<ConversationRecord>) {
        self.state().conversations = conversations;
    }

    pub(crate) fn fail_sends(&self, count: u32) {
        self.state().send_failures = count;
    }

    pub(crate) fn fail_fetches(&self, count: u32) {
        self.state().fetch_failures = count;
    }

    pub(crate) fn fail_creates(&self, count: u32) {
        self.state().create_failures = count;
    }

    /// Sends succeed without echoing the created record.
    pub(crate) fn silent_sends(&self) {
        self.state().silent_sends = true;
    }

    pub(crate) fn send_calls(&self) -> Vec<(Instant, SendMessageRequest)> {
        self.state().send_calls.clone()
    }

    pub(crate) fn message_fetches(&self) -> u32 {
        self.state().message_fetches
    }

    pub(crate) fn conversation_fetches(&self) -> u32 {
        self.state().conversation_fetches
    }

    pub(crate) fn server_messages(&self) -> Vec<MessageRecord> {
        self.state().messages.clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let mut state = self.state();
        state.message_fetches += 1;
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(unavailable());
        }
        Ok(state
            .messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<Option<MessageRecord>, TransportError> {
        let mut state = self.state();
        state.send_calls.push((Instant::now(), request.clone()));
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(unavailable());
        }
        state.next_id += 1;
        let created = MessageRecord {
            id: MessageId::new(format!("srv-{}", state.next_id)),
            conversation_id: request.conversation_id.clone(),
            sender_id: request.sender_id.clone(),
            content: request.message.clone(),
            timestamp: Utc::now(),
        };
        state.messages.push(created.clone());
        Ok((!state.silent_sends).then_some(created))
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationRecord, TransportError> {
        let mut state = self.state();
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(unavailable());
        }
        state.next_id += 1;
        let created = ConversationRecord {
            id: ConversationId::new(format!("conv-{}", state.next_id)),
            sender_id: request.sender_id.clone(),
            receiver_id: request.receiver_id.clone(),
            last_message: None,
            updated_at: None,
            created_at: Some(Utc::now()),
        };
        state.conversations.push(created.clone());
        Ok(created)
    }

    async fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationRecord>, TransportError> {
        let mut state = self.state();
        state.conversation_fetches += 1;
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(unavailable());
        }
        Ok(state
            .conversations
            .iter()
            .filter(|conversation| {
                &conversation.sender_id == user_id || &conversation.receiver_id == user_id
            })
            .cloned()
            .collect())
    }
}

/// Holds every list fetch until the test hands out a permit.
pub(crate) struct GatedTransport {
    pub(crate) inner: FakeTransport,
    pub(crate) gate: Semaphore,
}

impl GatedTransport {
    pub(crate) fn new(inner: FakeTransport, permits: usize) -> Self {
        Self {
            inner,
            gate: Semaphore::new(permits),
        }
    }
}

#[async_trait]
impl ChatTransport for GatedTransport {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        self.gate.acquire().await.expect("gate open").forget();
        self.inner.fetch_messages(conversation_id).await
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<Option<MessageRecord>, TransportError> {
        self.inner.send_message(request).await
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationRecord, TransportError> {
        self.inner.create_conversation(request).await
    }

    async fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationRecord>, TransportError> {
        self.gate.acquire().await.expect("gate open").forget();
        self.inner.fetch_conversations(user_id).await
    }
}

#[derive(Default)]
pub(crate) struct FakeListings {
    posts: HashMap<String, PostSummary>,
}

impl FakeListings {
    pub(crate) fn with_posts(posts: Vec<PostSummary>) -> Self {
        Self {
            posts: posts
                .into_iter()
                .map(|post| (post.slug.clone(), post))
                .collect(),
        }
    }
}

#[async_trait]
impl ListingSource for FakeListings {
    async fn post_by_slug(&self, slug: &str) -> Result<PostSummary, TransportError> {
        self.posts.get(slug).cloned().ok_or(TransportError::Status {
            status: 404,
            error: ApiError::new(ErrorCode::NotFound, format!("no listing {slug}")),
        })
    }

    async fn approved_posts(&self, page: u32, page_size: u32) -> Result<PostPage, TransportError> {
        let mut data: Vec<PostSummary> = self.posts.values().cloned().collect();
        data.sort_by(|a, b| a.slug.cmp(&b.slug));
        let total = data.len() as u64;
        let skip = (page.saturating_sub(1) * page_size) as usize;
        Ok(PostPage {
            data: data.into_iter().skip(skip).take(page_size as usize).collect(),
            total,
        })
    }
}

#[derive(Default)]
struct FavoriteState {
    catalog: Vec<PostSummary>,
    saved: Vec<PostId>,
    toggles: Vec<(UserId, PostId)>,
    toggle_failures: u32,
}

/// One user's favorites over a fixed catalog; toggling flips membership.
#[derive(Default)]
pub(crate) struct FakeFavorites {
    state: Mutex<FavoriteState>,
}

impl FakeFavorites {
    pub(crate) fn new(catalog: Vec<PostSummary>, saved: &[&str]) -> Self {
        Self {
            state: Mutex::new(FavoriteState {
                catalog,
                saved: saved.iter().map(|id| PostId::new(*id)).collect(),
                ..FavoriteState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FavoriteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn fail_toggles(&self, count: u32) {
        self.state().toggle_failures = count;
    }

    pub(crate) fn toggles(&self) -> Vec<(UserId, PostId)> {
        self.state().toggles.clone()
    }
}

#[async_trait]
impl FavoriteSource for FakeFavorites {
    async fn user_favorites(&self, _user_id: &UserId) -> Result<Vec<PostSummary>, TransportError> {
        let state = self.state();
        Ok(state
            .catalog
            .iter()
            .filter(|post| state.saved.contains(&post.id))
            .cloned()
            .collect())
    }

    async fn toggle_favorite(
        &self,
        user_id: &UserId,
        post_id: &PostId,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.toggle_failures > 0 {
            state.toggle_failures -= 1;
            return Err(unavailable());
        }
        state.toggles.push((user_id.clone(), post_id.clone()));
        if let Some(index) = state.saved.iter().position(|saved| saved == post_id) {
            state.saved.remove(index);
        } else {
            state.saved.push(post_id.clone());
        }
        Ok(())
    }
}
