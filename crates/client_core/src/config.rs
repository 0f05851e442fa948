use std::{collections::HashMap, fs, path::Path, time::Duration};

use storage::normalize_database_url;

use crate::{message_store::ProvisionalPolicy, retry::RetryPolicy, session::SessionConfig};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/client.db";
/// Upper bound for poll intervals and request timeouts: one day.
const MAX_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub database_url: String,
    pub message_poll_secs: u64,
    pub conversation_poll_secs: u64,
    pub chat_max_retries: u32,
    pub first_message_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub drop_unconfirmed_on_poll: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://motel.azurewebsites.net/api/".into(),
            database_url: DEFAULT_DATABASE_URL.into(),
            message_poll_secs: 5,
            conversation_poll_secs: 30,
            chat_max_retries: 2,
            first_message_max_retries: 3,
            retry_base_delay_ms: 1000,
            request_timeout_secs: 15,
            drop_unconfirmed_on_poll: false,
        }
    }
}

impl ClientSettings {
    pub fn message_poll_interval(&self) -> Duration {
        Duration::from_secs(self.message_poll_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn conversation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.conversation_poll_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.clamp(1, MAX_INTERVAL_SECS))
    }

    pub fn chat_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.chat_max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn first_message_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.first_message_max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: self.message_poll_interval(),
            retry: self.chat_retry_policy(),
            provisional_policy: if self.drop_unconfirmed_on_poll {
                ProvisionalPolicy::DropUnconfirmed
            } else {
                ProvisionalPolicy::KeepUntilMatched
            },
            ..SessionConfig::default()
        }
    }

    pub fn normalized_database_url(&self) -> String {
        normalize_database_url(&self.database_url, DEFAULT_DATABASE_URL)
    }
}

/// Defaults, then `client.toml` in the working directory, then environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |name| {
        std::env::var(name).ok()
    })
}

pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            for (key, value) in file_cfg {
                let value = match value {
                    toml::Value::String(text) => text,
                    other => other.to_string(),
                };
                apply(&mut settings, &key, &value);
            }
        }
    }

    for (name, key) in [
        ("API_BASE_URL", "api_base_url"),
        ("APP__API_BASE_URL", "api_base_url"),
        ("DATABASE_URL", "database_url"),
        ("APP__DATABASE_URL", "database_url"),
        ("APP__MESSAGE_POLL_SECS", "message_poll_secs"),
        ("APP__CONVERSATION_POLL_SECS", "conversation_poll_secs"),
        ("APP__CHAT_MAX_RETRIES", "chat_max_retries"),
        ("APP__FIRST_MESSAGE_MAX_RETRIES", "first_message_max_retries"),
        ("APP__RETRY_BASE_DELAY_MS", "retry_base_delay_ms"),
        ("APP__REQUEST_TIMEOUT_SECS", "request_timeout_secs"),
        ("APP__DROP_UNCONFIRMED_ON_POLL", "drop_unconfirmed_on_poll"),
    ] {
        if let Some(value) = env(name) {
            apply(&mut settings, key, &value);
        }
    }

    settings
}

/// Unknown keys and unparsable numbers leave the current value untouched.
fn apply(settings: &mut ClientSettings, key: &str, value: &str) {
    let value = value.trim();
    match key {
        "api_base_url" => settings.api_base_url = value.to_string(),
        "database_url" => settings.database_url = value.to_string(),
        "message_poll_secs" => set_parsed(&mut settings.message_poll_secs, value),
        "conversation_poll_secs" => set_parsed(&mut settings.conversation_poll_secs, value),
        "chat_max_retries" => set_parsed(&mut settings.chat_max_retries, value),
        "first_message_max_retries" => {
            set_parsed(&mut settings.first_message_max_retries, value)
        }
        "retry_base_delay_ms" => set_parsed(&mut settings.retry_base_delay_ms, value),
        "request_timeout_secs" => set_parsed(&mut settings.request_timeout_secs, value),
        "drop_unconfirmed_on_poll" => set_parsed(&mut settings.drop_unconfirmed_on_poll, value),
        _ => {}
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *slot = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
