//! SQLite storage for sniper subscriptions and intent watchers.

use async_trait::async_trait;
use escrow_core::{Currency, IntentId, Platform, SniperSubscription};
use escrow_engine::SubscriberDirectory;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Database connection for subscriptions.
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    /// Connect to SQLite database at the given path.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sniper_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_chat_id TEXT NOT NULL,
                currency TEXT NOT NULL,
                platform TEXT NOT NULL DEFAULT '',
                threshold_percent REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(telegram_chat_id, currency, platform)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intent_watchers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                intent_id TEXT NOT NULL,
                telegram_chat_id TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(intent_id, telegram_chat_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sniper_currency
            ON sniper_subscriptions(currency)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register or update a sniper subscription for a chat.
    ///
    /// "Any platform" is stored as an empty string so the uniqueness
    /// constraint applies to it (SQLite treats NULLs as distinct).
    pub async fn upsert_subscription(&self, sub: &SniperSubscription) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sniper_subscriptions (telegram_chat_id, currency, platform, threshold_percent)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(telegram_chat_id, currency, platform)
            DO UPDATE SET threshold_percent = ?
            "#,
        )
        .bind(&sub.chat_id)
        .bind(sub.currency.code())
        .bind(sub.platform.map(|p| p.code()).unwrap_or(""))
        .bind(sub.threshold_percent)
        .bind(sub.threshold_percent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove every sniper subscription for a chat. Returns how many
    /// were removed.
    pub async fn clear_subscriptions(&self, chat_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sniper_subscriptions WHERE telegram_chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All sniper subscriptions for a chat.
    pub async fn subscriptions_for_chat(
        &self,
        chat_id: &str,
    ) -> Result<Vec<SniperSubscription>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, Option<f64>)>(
            "SELECT telegram_chat_id, currency, platform, threshold_percent FROM sniper_subscriptions WHERE telegram_chat_id = ?",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(row_to_subscription).collect())
    }

    /// All sniper subscriptions watching a currency.
    pub async fn subscriptions_for_currency(
        &self,
        currency: Currency,
    ) -> Result<Vec<SniperSubscription>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, Option<f64>)>(
            "SELECT telegram_chat_id, currency, platform, threshold_percent FROM sniper_subscriptions WHERE currency = ?",
        )
        .bind(currency.code())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(row_to_subscription).collect())
    }

    /// Register a chat as a watcher of an intent's outcome.
    pub async fn watch_intent(&self, intent_id: &IntentId, chat_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO intent_watchers (intent_id, telegram_chat_id)
            VALUES (?, ?)
            ON CONFLICT(intent_id, telegram_chat_id) DO NOTHING
            "#,
        )
        .bind(intent_id.as_str())
        .bind(chat_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Chats watching an intent.
    pub async fn watchers_for(&self, intent_id: &IntentId) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT telegram_chat_id FROM intent_watchers WHERE intent_id = ?",
        )
        .bind(intent_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Drop all watchers of an intent. Outcomes are terminal so this is
    /// called after a settled intent has been dispatched.
    pub async fn remove_watchers(&self, intent_id: &IntentId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM intent_watchers WHERE intent_id = ?")
            .bind(intent_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_subscription(
    (chat_id, currency, platform, threshold_percent): (String, String, String, Option<f64>),
) -> Option<SniperSubscription> {
    let currency = Currency::from_code(&currency)?;
    let platform = if platform.is_empty() {
        None
    } else {
        Some(Platform::from_code(&platform)?)
    };
    Some(SniperSubscription {
        chat_id,
        currency,
        platform,
        threshold_percent,
    })
}

#[async_trait]
impl SubscriberDirectory for SubscriptionStore {
    async fn subscribers_for(
        &self,
        currency: Currency,
        _platform: Option<Platform>,
    ) -> Vec<SniperSubscription> {
        match self.subscriptions_for_currency(currency).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(%currency, error = %e, "subscription lookup failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sub(chat: &str, currency: Currency, platform: Option<Platform>, threshold: Option<f64>) -> SniperSubscription {
        SniperSubscription {
            chat_id: chat.to_string(),
            currency,
            platform,
            threshold_percent: threshold,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_lookup_by_currency() {
        let store = SubscriptionStore::connect("sqlite::memory:").await.unwrap();

        store
            .upsert_subscription(&sub("100", Currency::EUR, None, Some(1.5)))
            .await
            .unwrap();
        store
            .upsert_subscription(&sub("200", Currency::EUR, Some(Platform::Venmo), None))
            .await
            .unwrap();
        store
            .upsert_subscription(&sub("300", Currency::KRW, None, None))
            .await
            .unwrap();

        let eur = store.subscriptions_for_currency(Currency::EUR).await.unwrap();
        assert_eq!(eur.len(), 2);

        let krw = store.subscriptions_for_currency(Currency::KRW).await.unwrap();
        assert_eq!(krw.len(), 1);
        assert_eq!(krw[0].chat_id, "300");
    }

    #[tokio::test]
    async fn test_upsert_updates_threshold() {
        let store = SubscriptionStore::connect("sqlite::memory:").await.unwrap();

        store
            .upsert_subscription(&sub("100", Currency::EUR, None, Some(1.0)))
            .await
            .unwrap();
        store
            .upsert_subscription(&sub("100", Currency::EUR, None, Some(2.5)))
            .await
            .unwrap();

        let subs = store.subscriptions_for_chat("100").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].threshold_percent, Some(2.5));
    }

    #[tokio::test]
    async fn test_clear_subscriptions() {
        let store = SubscriptionStore::connect("sqlite::memory:").await.unwrap();

        store
            .upsert_subscription(&sub("100", Currency::EUR, None, None))
            .await
            .unwrap();
        store
            .upsert_subscription(&sub("100", Currency::GBP, None, None))
            .await
            .unwrap();

        let removed = store.clear_subscriptions("100").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.subscriptions_for_chat("100").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_intent_watchers() {
        let store = SubscriptionStore::connect("sqlite::memory:").await.unwrap();
        let intent = IntentId::new("intent-7");

        store.watch_intent(&intent, "100").await.unwrap();
        store.watch_intent(&intent, "200").await.unwrap();
        // Duplicate registration is a no-op.
        store.watch_intent(&intent, "100").await.unwrap();

        let mut watchers = store.watchers_for(&intent).await.unwrap();
        watchers.sort();
        assert_eq!(watchers, vec!["100", "200"]);

        let removed = store.remove_watchers(&intent).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.watchers_for(&intent).await.unwrap().is_empty());
    }
}
