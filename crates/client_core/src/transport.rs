use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{ConversationId, PostId, UserId},
    error::ApiError,
    protocol::{
        ConversationRecord, CreateConversationRequest, FavoriteToggleQuery, LoginRequest,
        LoginResponse, MessageRecord, NewsArticle, PostPage, PostPageQuery, PostSummary,
        RegisterRequest, SendMessageRequest, UpdateUserRequest, UserProfile,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

/// The four backend calls the chat flow depends on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError>;

    /// Returns the created record when the backend echoes it back.
    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<Option<MessageRecord>, TransportError>;

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationRecord, TransportError>;

    async fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationRecord>, TransportError>;
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn post_by_slug(&self, slug: &str) -> Result<PostSummary, TransportError>;
    async fn approved_posts(&self, page: u32, page_size: u32) -> Result<PostPage, TransportError>;
}

/// The signed-in user's saved listings.
#[async_trait]
pub trait FavoriteSource: Send + Sync {
    async fn user_favorites(&self, user_id: &UserId) -> Result<Vec<PostSummary>, TransportError>;
    async fn toggle_favorite(&self, user_id: &UserId, post_id: &PostId)
        -> Result<(), TransportError>;
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path)?)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get(&self, path: &str) -> Result<Response, TransportError> {
        let url = self.endpoint(path)?;
        let builder = self.authorized(self.http.get(url)).await;
        checked(builder.send().await?).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, TransportError> {
        let url = self.endpoint(path)?;
        let builder = self.authorized(self.http.post(url).json(body)).await;
        checked(builder.send().await?).await
    }

    async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, TransportError> {
        let url = self.endpoint(path)?;
        let builder = self.authorized(self.http.put(url).json(body)).await;
        checked(builder.send().await?).await
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<String, TransportError> {
        let body: LoginResponse = self.post("Auth/login", request).await?.json().await?;
        Ok(body.into_token())
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), TransportError> {
        self.post("Auth/register", request).await?;
        Ok(())
    }

    pub async fn user_by_id(&self, user_id: &UserId) -> Result<UserProfile, TransportError> {
        Ok(self
            .get(&format!("Users/{}", encode_segment(user_id.as_str())))
            .await?
            .json()
            .await?)
    }

    pub async fn update_user(
        &self,
        user_id: &UserId,
        request: &UpdateUserRequest,
    ) -> Result<(), TransportError> {
        self.put(&format!("Users/{}", encode_segment(user_id.as_str())), request)
            .await?;
        Ok(())
    }

    pub async fn news(&self, page: u32, page_size: u32) -> Result<Vec<NewsArticle>, TransportError> {
        let url = self.endpoint("News")?;
        let builder = self
            .authorized(self.http.get(url).query(&PostPageQuery { page, page_size }))
            .await;
        let body: Value = checked(builder.send().await?).await?.json().await?;
        Ok(decode_list(body, "news"))
    }

    pub async fn news_by_slug(&self, slug: &str) -> Result<NewsArticle, TransportError> {
        let body: Value = self
            .get(&format!("News/{}", encode_segment(slug)))
            .await?
            .json()
            .await?;
        serde_json::from_value(body)
            .map_err(|err| TransportError::Shape(format!("news article: {err}")))
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let path = format!(
            "Messages/conversation/{}",
            encode_segment(conversation_id.as_str())
        );
        let body: Value = self.get(&path).await?.json().await?;
        Ok(decode_list(body, "messages"))
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<Option<MessageRecord>, TransportError> {
        let bytes = self.post("Messages", request).await?.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<MessageRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                debug!(
                    conversation_id = %request.conversation_id,
                    error = %err,
                    "send message: response carried no message record"
                );
                Ok(None)
            }
        }
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationRecord, TransportError> {
        let body: Value = self.post("Conversations", request).await?.json().await?;
        serde_json::from_value(body)
            .map_err(|err| TransportError::Shape(format!("conversation record: {err}")))
    }

    async fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationRecord>, TransportError> {
        let path = format!("Conversations/user/{}", encode_segment(user_id.as_str()));
        let body: Value = self.get(&path).await?.json().await?;
        Ok(decode_list(body, "conversations"))
    }
}

#[async_trait]
impl ListingSource for HttpTransport {
    async fn post_by_slug(&self, slug: &str) -> Result<PostSummary, TransportError> {
        let body: Value = self
            .get(&format!("Posts/{}", encode_segment(slug)))
            .await?
            .json()
            .await?;
        serde_json::from_value(body)
            .map_err(|err| TransportError::Shape(format!("post record: {err}")))
    }

    async fn approved_posts(&self, page: u32, page_size: u32) -> Result<PostPage, TransportError> {
        let url = self.endpoint("Posts/approved")?;
        let builder = self
            .authorized(self.http.get(url).query(&PostPageQuery { page, page_size }))
            .await;
        let body: Value = checked(builder.send().await?).await?.json().await?;
        Ok(serde_json::from_value(body).unwrap_or_else(|err| {
            warn!(error = %err, "listings: unexpected page shape; treating as empty");
            PostPage::default()
        }))
    }
}

#[async_trait]
impl FavoriteSource for HttpTransport {
    async fn user_favorites(&self, user_id: &UserId) -> Result<Vec<PostSummary>, TransportError> {
        let path = format!("Favorites/user/{}", encode_segment(user_id.as_str()));
        let body: Value = self.get(&path).await?.json().await?;
        Ok(decode_list(body, "favorites"))
    }

    async fn toggle_favorite(
        &self,
        user_id: &UserId,
        post_id: &PostId,
    ) -> Result<(), TransportError> {
        let url = self.endpoint("Favorites")?;
        let query = FavoriteToggleQuery {
            user_id: user_id.clone(),
            post_id: post_id.clone(),
        };
        let builder = self.authorized(self.http.post(url).query(&query)).await;
        checked(builder.send().await?).await?;
        Ok(())
    }
}

async fn checked(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        error: ApiError::from_response(status.as_u16(), &body),
    })
}

/// Decodes a list response leniently: the array may be bare or wrapped in
/// `{ "data": [...] }`, and records missing required fields are skipped.
pub(crate) fn decode_list<T: DeserializeOwned>(body: Value, what: &str) -> Vec<T> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!(what, "list response had no array payload; treating as empty");
                return Vec::new();
            }
        },
        Value::Null => return Vec::new(),
        _ => {
            warn!(what, "list response was not an array; treating as empty");
            return Vec::new();
        }
    };

    let mut decoded = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(record) => decoded.push(record),
            Err(err) => warn!(what, error = %err, "skipping malformed record"),
        }
    }
    decoded
}

fn normalize_base_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        anyhow::bail!("api base url must start with http:// or https://: {raw}");
    }
    // `Url::join` drops the last segment unless the base ends with a slash.
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Ok(Url::parse(&with_slash)?)
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
