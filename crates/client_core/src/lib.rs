use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use shared::domain::{ConversationId, UserId};
use storage::LocalStore;
use tracing::info;

pub mod auth;
pub mod compare;
pub mod config;
pub mod conversation_list;
pub mod error;
pub mod events;
pub mod favorites;
pub mod message_store;
pub mod poller;
pub mod retry;
pub mod session;
pub mod starter;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthSession, TokenClaims};
pub use compare::{CompareBoard, CompareSelection};
pub use config::{load_settings, ClientSettings};
pub use conversation_list::{ConversationInbox, ConversationSummary};
pub use error::{AuthError, CompareError, DeliveryError, StartChatError, TransportError};
pub use events::{ClientEvent, FailedDelivery};
pub use favorites::FavoriteList;
pub use message_store::{LocalMessage, MessageStore, ProvisionalPolicy};
pub use poller::{PollKey, PollRegistry};
pub use retry::{DeliveryReport, RetryController, RetryPolicy};
pub use session::{ConversationSession, SendTicket, SessionConfig};
pub use starter::{ConversationStarter, FirstMessage, StartedConversation};
pub use transport::{ChatTransport, FavoriteSource, HttpTransport, ListingSource};

/// Wires settings, HTTP transport, local store and the shared poll registry
/// together and hands out the per-screen components.
pub struct RentalClient {
    settings: ClientSettings,
    http: Arc<HttpTransport>,
    store: LocalStore,
    registry: Arc<PollRegistry>,
}

impl RentalClient {
    pub async fn connect(settings: ClientSettings) -> Result<Self> {
        let database_url = settings.normalized_database_url();
        let store = LocalStore::new(&database_url)
            .await
            .with_context(|| format!("failed to open local store at '{database_url}'"))?;
        let http = HttpTransport::new(&settings.api_base_url, settings.request_timeout())
            .context("failed to build http transport")?;
        info!(api = %http.base_url(), database_url = %database_url, "client: ready");
        Ok(Self {
            settings,
            http: Arc::new(http),
            store,
            registry: Arc::new(PollRegistry::new()),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn http(&self) -> Arc<HttpTransport> {
        self.http.clone()
    }

    pub fn registry(&self) -> Arc<PollRegistry> {
        self.registry.clone()
    }

    pub fn auth(&self) -> AuthSession {
        AuthSession::new(self.store.clone(), self.http.clone())
    }

    /// Restores the stored session and returns the signed-in user's id.
    pub async fn require_user(&self) -> Result<UserId> {
        self.auth()
            .current_user_id()
            .await?
            .ok_or_else(|| anyhow!("not signed in: sign in first"))
    }

    pub fn inbox(&self, me: UserId) -> ConversationInbox {
        ConversationInbox::new(
            self.http.clone(),
            self.registry.clone(),
            me,
            self.settings.conversation_poll_interval(),
        )
    }

    pub fn conversation(&self, conversation_id: ConversationId, me: UserId) -> ConversationSession {
        ConversationSession::new(
            self.http.clone(),
            self.registry.clone(),
            conversation_id,
            me,
            self.settings.session_config(),
        )
    }

    pub fn starter(&self) -> ConversationStarter {
        ConversationStarter::new(
            self.http.clone(),
            self.settings.first_message_retry_policy(),
        )
    }

    pub fn favorites(&self, me: UserId) -> FavoriteList {
        FavoriteList::new(self.http.clone(), me)
    }

    pub fn compare_board(&self) -> CompareBoard {
        CompareBoard::new(self.store.clone(), self.http.clone())
    }
}
