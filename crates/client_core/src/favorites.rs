use std::sync::Arc;

use shared::{
    domain::{PostId, UserId},
    protocol::PostSummary,
};
use tracing::info;

use crate::{error::TransportError, transport::FavoriteSource};

/// The favorites screen for one user.
pub struct FavoriteList {
    source: Arc<dyn FavoriteSource>,
    me: UserId,
    items: Vec<PostSummary>,
}

impl FavoriteList {
    pub fn new(source: Arc<dyn FavoriteSource>, me: UserId) -> Self {
        Self {
            source,
            me,
            items: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> Result<&[PostSummary], TransportError> {
        self.items = self.source.user_favorites(&self.me).await?;
        Ok(&self.items)
    }

    pub fn items(&self) -> &[PostSummary] {
        &self.items
    }

    pub fn contains(&self, post_id: &PostId) -> bool {
        self.items.iter().any(|item| &item.id == post_id)
    }

    /// Flips `post_id` on the server and returns whether it is now a
    /// favorite. A removal is applied locally; an addition reloads the list.
    pub async fn toggle(&mut self, post_id: &PostId) -> Result<bool, TransportError> {
        let was_favorite = self.contains(post_id);
        self.source.toggle_favorite(&self.me, post_id).await?;
        info!(user_id = %self.me, post_id = %post_id, added = !was_favorite, "favorites: toggled");
        if was_favorite {
            self.items.retain(|item| &item.id != post_id);
            return Ok(false);
        }
        self.load().await?;
        Ok(self.contains(post_id))
    }
}

#[cfg(test)]
#[path = "tests/favorites_tests.rs"]
mod tests;
