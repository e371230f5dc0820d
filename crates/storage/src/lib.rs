use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::{BTreeSet, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::Mutex;
use tracing::info;

use shared::domain::AccountId;

const LAST_ACTIVE_ACCOUNT_KEY: &str = "last_active_account";

/// Slot of per-account state held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKind {
    Contacts,
    Messages,
}

impl CacheKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Contacts => "contacts",
            CacheKind::Messages => "messages",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key/value mirror of the conversation view, namespaced by account.
///
/// Values are opaque serialized payloads; interpreting (and tolerating
/// corrupt) payloads is the caller's job.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, account_id: &AccountId, kind: CacheKind) -> Result<Option<String>>;
    async fn set(&self, account_id: &AccountId, kind: CacheKind, value: &str) -> Result<()>;
    async fn last_active_account(&self) -> Result<Option<AccountId>>;
    async fn set_last_active_account(&self, account_id: &AccountId) -> Result<()>;
    async fn cached_accounts(&self) -> Result<Vec<AccountId>>;
    async fn clear_account(&self, account_id: &AccountId) -> Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        // Every connection to `:memory:` opens a separate database, so the
        // pool must keep exactly one connection alive for its lifetime.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(%database_url, "storage: cache opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for Storage {
    async fn get(&self, account_id: &AccountId, kind: CacheKind) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT payload FROM conversation_cache WHERE account_id = ? AND kind = ?",
        )
        .bind(account_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read {kind} cache for account {account_id}"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set(&self, account_id: &AccountId, kind: CacheKind, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_cache (account_id, kind, payload, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account_id, kind) DO UPDATE
             SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(account_id.as_str())
        .bind(kind.as_str())
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write {kind} cache for account {account_id}"))?;
        Ok(())
    }

    async fn last_active_account(&self) -> Result<Option<AccountId>> {
        let row = sqlx::query("SELECT value FROM client_settings WHERE key = ?")
            .bind(LAST_ACTIVE_ACCOUNT_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read last active account")?;
        Ok(row
            .map(|r| r.get::<String, _>(0))
            .filter(|id| !id.trim().is_empty())
            .map(AccountId))
    }

    async fn set_last_active_account(&self, account_id: &AccountId) -> Result<()> {
        sqlx::query(
            "INSERT INTO client_settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(LAST_ACTIVE_ACCOUNT_KEY)
        .bind(account_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to persist last active account")?;
        Ok(())
    }

    async fn cached_accounts(&self) -> Result<Vec<AccountId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT account_id FROM conversation_cache ORDER BY account_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list cached accounts")?;
        Ok(rows
            .into_iter()
            .map(|r| AccountId(r.get::<String, _>(0)))
            .collect())
    }

    async fn clear_account(&self, account_id: &AccountId) -> Result<()> {
        sqlx::query("DELETE FROM conversation_cache WHERE account_id = ?")
            .bind(account_id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to clear cache for account {account_id}"))?;
        info!(%account_id, "storage: account cache cleared");
        Ok(())
    }
}

/// Process-local cache used when no durable store is wanted (tests,
/// throwaway sessions).
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryCacheState>,
}

#[derive(Default)]
struct MemoryCacheState {
    entries: HashMap<(AccountId, CacheKind), String>,
    last_active_account: Option<AccountId>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, account_id: &AccountId, kind: CacheKind) -> Result<Option<String>> {
        let guard = self.inner.lock().await;
        Ok(guard.entries.get(&(account_id.clone(), kind)).cloned())
    }

    async fn set(&self, account_id: &AccountId, kind: CacheKind, value: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .entries
            .insert((account_id.clone(), kind), value.to_string());
        Ok(())
    }

    async fn last_active_account(&self) -> Result<Option<AccountId>> {
        Ok(self.inner.lock().await.last_active_account.clone())
    }

    async fn set_last_active_account(&self, account_id: &AccountId) -> Result<()> {
        self.inner.lock().await.last_active_account = Some(account_id.clone());
        Ok(())
    }

    async fn cached_accounts(&self) -> Result<Vec<AccountId>> {
        let guard = self.inner.lock().await;
        let accounts: BTreeSet<AccountId> = guard
            .entries
            .keys()
            .map(|(account_id, _)| account_id.clone())
            .collect();
        Ok(accounts.into_iter().collect())
    }

    async fn clear_account(&self, account_id: &AccountId) -> Result<()> {
        self.inner
            .lock()
            .await
            .entries
            .retain(|(cached_account, _), _| cached_account != account_id);
        Ok(())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
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
