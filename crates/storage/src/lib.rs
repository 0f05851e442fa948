use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

/// Key holding the raw bearer token returned by sign-in.
pub const TOKEN_KEY: &str = "token";
/// Key holding the JSON blob of the signed-in user's claims.
pub const USER_DATA_KEY: &str = "userData";
/// Key holding the JSON array of listing slugs picked for comparison.
pub const COMPARED_ITEMS_KEY: &str = "comparedItems";
/// The comparison screen shows listings side by side, two at a time.
pub const MAX_COMPARED_ITEMS: usize = 2;

/// Persisted client-side state: a flat string key/value table in sqlite.
#[derive(Clone)]
pub struct LocalStore {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl LocalStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // A single connection keeps `sqlite::memory:` one database instead of one per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open local store at '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read local key '{key}'"))?;
        Ok(value)
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write local key '{key}'"))?;
        Ok(())
    }

    /// Returns whether a value was present.
    pub async fn remove_item(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove local key '{key}'"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn entries(&self) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query("SELECT key, value, updated_at FROM kv_entries ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("failed to list local keys")?;
        rows.into_iter()
            .map(|row| {
                Ok(StoredEntry {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    /// Reads a JSON value. A value that no longer parses is logged and
    /// treated as absent so a corrupt entry never blocks the caller.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_item(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "local store: ignoring undecodable value");
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("failed to encode local key '{key}'"))?;
        self.set_item(key, &raw).await
    }

    pub async fn auth_token(&self) -> Result<Option<String>> {
        self.get_item(TOKEN_KEY).await
    }

    pub async fn set_auth_token(&self, token: &str) -> Result<()> {
        self.set_item(TOKEN_KEY, token).await
    }

    pub async fn user_data<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.get_json(USER_DATA_KEY).await
    }

    pub async fn set_user_data<T: Serialize>(&self, user_data: &T) -> Result<()> {
        self.set_json(USER_DATA_KEY, user_data).await
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.remove_item(TOKEN_KEY).await?;
        self.remove_item(USER_DATA_KEY).await?;
        Ok(())
    }

    pub async fn compared_items(&self) -> Result<Vec<String>> {
        Ok(self
            .get_json::<Vec<String>>(COMPARED_ITEMS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_compared_items(&self, slugs: &[String]) -> Result<()> {
        if slugs.len() > MAX_COMPARED_ITEMS {
            bail!(
                "at most {MAX_COMPARED_ITEMS} listings can be compared, got {}",
                slugs.len()
            );
        }
        self.set_json(COMPARED_ITEMS_KEY, &slugs).await
    }

    /// Removes one slug; returns the remaining list.
    pub async fn remove_compared_item(&self, slug: &str) -> Result<Vec<String>> {
        let mut slugs = self.compared_items().await?;
        slugs.retain(|existing| existing != slug);
        self.set_json(COMPARED_ITEMS_KEY, &slugs).await?;
        Ok(slugs)
    }

    pub async fn clear_compared_items(&self) -> Result<()> {
        self.remove_item(COMPARED_ITEMS_KEY).await?;
        Ok(())
    }
}

/// Normalizes a user-supplied location into a sqlite URL.
pub fn normalize_database_url(raw_database_url: &str, default_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return default_url.to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
