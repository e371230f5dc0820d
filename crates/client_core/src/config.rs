use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::AccountId;

pub const DEFAULT_SETTINGS_FILE: &str = "relay_client.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub default_account_id: String,
    pub liveness_interval_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            database_url: "sqlite://./data/relay_cache.db".into(),
            default_account_id: "main".into(),
            liveness_interval_secs: 30,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl Settings {
    pub fn default_account(&self) -> AccountId {
        AccountId::new(self.default_account_id.clone())
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Defaults, then the flat TOML file (if readable), then the environment.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    if let Ok(raw) = fs::read_to_string(path) {
        apply_file_overrides(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("RELAY_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__DEFAULT_ACCOUNT") {
        settings.default_account_id = v;
    }

    if let Ok(v) = std::env::var("APP__LIVENESS_INTERVAL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.liveness_interval_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay_ms = parsed;
        }
    }

    settings
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        tracing::warn!("config: ignoring unparsable settings file");
        return;
    };

    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("database_url").and_then(toml::Value::as_str) {
        settings.database_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("default_account_id")
        .and_then(toml::Value::as_str)
    {
        settings.default_account_id = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("liveness_interval_secs")
        .and_then(toml::Value::as_integer)
    {
        if let Ok(v) = u64::try_from(v) {
            settings.liveness_interval_secs = v;
        }
    }
    if let Some(v) = file_cfg
        .get("reconnect_delay_ms")
        .and_then(toml::Value::as_integer)
    {
        if let Ok(v) = u64::try_from(v) {
            settings.reconnect_delay_ms = v;
        }
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
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

/// `http(s)://host` to the relay's push endpoint `ws(s)://host/ws`.
pub fn push_url(server_url: &str) -> Result<String, crate::error::ClientError> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(crate::error::ClientError::Validation(
            "server_url must start with http:// or https://".to_string(),
        ));
    };
    Ok(format!("{ws_url}/ws"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
