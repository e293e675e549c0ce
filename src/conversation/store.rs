//! Conversation state storage.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::conversation::session::ConversationSession;
use crate::core::errors::BotResult;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key-value store of conversation sessions. Last save wins.
pub trait ConversationStore: Send + Sync {
    /// Load the session stored under `key`.
    ///
    /// # Errors
    /// Returns an error if storage access or decoding fails.
    fn load(&self, key: &str) -> StoreFuture<'_, BotResult<Option<ConversationSession>>>;

    /// Store `session` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if storage access or encoding fails.
    fn save(&self, key: &str, session: &ConversationSession) -> StoreFuture<'_, BotResult<()>>;

    /// Load the session under `key`, or return `default` when absent.
    ///
    /// # Errors
    /// Returns an error if storage access or decoding fails.
    fn get(
        &self,
        key: &str,
        default: ConversationSession,
    ) -> StoreFuture<'_, BotResult<ConversationSession>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.load(&key).await?.unwrap_or(default)) })
    }
}

/// In-process store backed by a concurrent map of JSON blobs.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    entries: DashMap<String, String>,
}

impl MemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn load(&self, key: &str) -> StoreFuture<'_, BotResult<Option<ConversationSession>>> {
        let key = key.to_string();
        Box::pin(async move {
            let Some(data) = self.entries.get(&key).map(|entry| entry.value().clone()) else {
                return Ok(None);
            };
            Ok(Some(serde_json::from_str(&data)?))
        })
    }

    fn save(&self, key: &str, session: &ConversationSession) -> StoreFuture<'_, BotResult<()>> {
        let key = key.to_string();
        let data = serde_json::to_string(session);
        Box::pin(async move {
            self.entries.insert(key, data?);
            Ok(())
        })
    }
}

/// `SQLite` store keeping one JSON blob per conversation key.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>) -> BotResult<Self> {
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> BotResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> BotResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS conversation_state (
                    key TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn load(&self, key: &str) -> StoreFuture<'_, BotResult<Option<ConversationSession>>> {
        let key = key.to_string();
        Box::pin(async move {
            let data = self
                .conn
                .call(move |conn| {
                    let data = conn
                        .query_row(
                            "SELECT data FROM conversation_state WHERE key = ?1",
                            rusqlite::params![key],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(data)
                })
                .await?;

            match data {
                Some(data) => Ok(Some(serde_json::from_str(&data)?)),
                None => Ok(None),
            }
        })
    }

    fn save(&self, key: &str, session: &ConversationSession) -> StoreFuture<'_, BotResult<()>> {
        let key = key.to_string();
        let data = serde_json::to_string(session);
        Box::pin(async move {
            let data = data?;
            let updated_at = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO conversation_state (key, data, updated_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![key, data, updated_at],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::turn::ConversationTurn;

    fn sample_session() -> ConversationSession {
        let mut session = ConversationSession::new(4, "system rules");
        session.history.push(ConversationTurn::user("hello"));
        session.history.push(ConversationTurn::assistant("hi there"));
        session.thread_id = Some("thread_abc".to_string());
        session
    }

    async fn assert_round_trip(store: &dyn ConversationStore) {
        let session = sample_session();
        store
            .save("msteams/conversations/1", &session)
            .await
            .unwrap();
        let loaded = store.load("msteams/conversations/1").await.unwrap();
        assert_eq!(loaded, Some(session));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryConversationStore::new();
        assert_round_trip(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        assert_round_trip(&store).await;
    }

    #[tokio::test]
    async fn test_get_returns_default_when_missing() {
        let store = MemoryConversationStore::new();
        let default = ConversationSession::new(3, "rules");
        let loaded = store.get("missing", default.clone()).await.unwrap();
        assert_eq!(loaded, default);
    }

    #[tokio::test]
    async fn test_sqlite_last_write_wins() {
        let store = SqliteConversationStore::open_in_memory().await.unwrap();
        let mut session = sample_session();
        store.save("k", &session).await.unwrap();
        session.reset();
        store.save("k", &session).await.unwrap();

        let loaded = store.load("k").await.unwrap().unwrap();
        assert!(loaded.history.is_empty());
        assert!(loaded.thread_id.is_none());
    }
}
