//! Durable conversation history: sessions and their ordered messages.
//!
//! Sessions are created lazily on first append. The display title is a
//! two-state field: `Default` until a user message supplies one, then
//! `UserDerived` and frozen. Messages are append-only; ordering is the
//! autoincrement id.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::errors::ApiError;

const SCHEMA_VERSION: i64 = 1;
const MAX_TITLE_LEN: usize = 60;
const MAX_HISTORY_LIMIT: i64 = 1000;

pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Model => "model",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "model" => MessageRole::Model,
            _ => MessageRole::User,
        }
    }
}

/// Whether the session title is still the placeholder or was derived from
/// the first user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleState {
    Default,
    UserDerived,
}

impl TitleState {
    fn as_str(&self) -> &'static str {
        match self {
            TitleState::Default => "default",
            TitleState::UserDerived => "user_derived",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "user_derived" => TitleState::UserDerived,
            _ => TitleState::Default,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub id: String,
    pub title: String,
    pub title_state: TitleState,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    pub attachment: Option<Value>,
    pub created_at: String,
}

/// A message waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub attachment: Option<Value>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::persistence)?;

        let store = Self { db_path, pool };
        store.init_db().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_db(&self) -> Result<(), ApiError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        if version != SCHEMA_VERSION {
            self.rebuild_schema().await?;
        }

        Ok(())
    }

    async fn rebuild_schema(&self) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::persistence)?;

        sqlx::query("DROP TABLE IF EXISTS messages")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;
        sqlx::query("DROP TABLE IF EXISTS sessions")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;

        sqlx::query(
            "\
            CREATE TABLE sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK(length(trim(title)) > 0),
                title_state TEXT NOT NULL DEFAULT 'default'
                    CHECK(title_state IN ('default', 'user_derived')),
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::persistence)?;

        sqlx::query(
            "\
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'model')),
                content TEXT NOT NULL,
                attachment TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&mut *tx)
        .await
        .map_err(ApiError::persistence)?;

        sqlx::query("CREATE INDEX idx_sessions_updated_at ON sessions(updated_at DESC)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;
        sqlx::query("CREATE INDEX idx_messages_session_id_id ON messages(session_id, id)")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;

        let pragma = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
        sqlx::query(&pragma)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;

        tx.commit().await.map_err(ApiError::persistence)?;
        Ok(())
    }

    /// Explicit "new chat". The returned id can be handed to `append`.
    pub async fn create_session(&self) -> Result<String, ApiError> {
        let session_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO sessions (id, title, title_state) VALUES (?1, ?2, 'default')")
            .bind(&session_id)
            .bind(DEFAULT_TITLE)
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionDetail>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, title_state, created_at, updated_at FROM sessions WHERE id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(row.as_ref().map(session_detail_from_row))
    }

    /// Session summaries newest-first.
    pub async fn list_recent(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, title, updated_at FROM sessions ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(rows
            .iter()
            .map(|row| SessionSummary {
                id: row.get("id"),
                title: row.get("title"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Full message replay in insertion order, capped at `limit`.
    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<SessionMessage>, ApiError> {
        let limit = sanitize_limit(limit);

        let rows = sqlx::query(
            "\
            SELECT role, content, attachment, created_at
            FROM messages
            WHERE session_id = ?1
            ORDER BY id ASC
            LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// The last `n` messages in insertion order, the conversational window
    /// replayed into prompts. Deliberate truncation, not full replay.
    pub async fn window(&self, session_id: &str, n: usize) -> Result<Vec<SessionMessage>, ApiError> {
        let limit = sanitize_limit(n as i64);

        let rows = sqlx::query(
            "\
            SELECT role, content, attachment, created_at
            FROM (
                SELECT id, role, content, attachment, created_at
                FROM messages
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT ?2
            )
            ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::persistence)?;

        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Appends `messages` in order within one transaction, creating the
    /// session if needed. The first user message seeds the title; once a
    /// session carries a user-derived title it is never overwritten.
    pub async fn append(
        &self,
        session_id: &str,
        messages: &[NewMessage],
    ) -> Result<(), ApiError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::persistence)?;

        let derived_title = messages
            .iter()
            .find(|m| m.role == MessageRole::User && !m.content.trim().is_empty())
            .map(|m| truncate_title(&m.content));

        ensure_session(&mut tx, session_id, derived_title.as_deref()).await?;

        for message in messages {
            let attachment = message
                .attachment
                .as_ref()
                .map(|v| serde_json::to_string(v).map_err(ApiError::internal))
                .transpose()?;

            sqlx::query(
                "\
                INSERT INTO messages (session_id, role, content, attachment)
                VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(attachment)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::persistence)?;
        }

        touch_session(&mut tx, session_id).await?;

        tx.commit().await.map_err(ApiError::persistence)?;
        Ok(())
    }

    /// Idempotent at this layer; the HTTP handler decides whether a missing
    /// id is worth a 404.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::persistence)?;

        Ok(result.rows_affected() > 0)
    }
}

fn session_detail_from_row(row: &sqlx::sqlite::SqliteRow) -> SessionDetail {
    let title_state: String = row.get("title_state");
    SessionDetail {
        id: row.get("id"),
        title: row.get("title"),
        title_state: TitleState::parse(&title_state),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> SessionMessage {
    let role: String = row.get("role");
    let attachment: Option<String> = row.get("attachment");

    SessionMessage {
        role: MessageRole::parse(&role),
        content: row.get("content"),
        attachment: attachment.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get("created_at"),
    }
}

/// Creates the session if absent and settles the title: a derived title
/// wins on creation, and upgrades an existing session only while its title
/// is still the placeholder.
async fn ensure_session(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    derived_title: Option<&str>,
) -> Result<(), ApiError> {
    let (title, state) = match derived_title {
        Some(title) => (title, TitleState::UserDerived),
        None => (DEFAULT_TITLE, TitleState::Default),
    };

    sqlx::query("INSERT OR IGNORE INTO sessions (id, title, title_state) VALUES (?1, ?2, ?3)")
        .bind(session_id)
        .bind(title)
        .bind(state.as_str())
        .execute(&mut **tx)
        .await
        .map_err(ApiError::persistence)?;

    if let Some(title) = derived_title {
        sqlx::query(
            "UPDATE sessions SET title = ?1, title_state = 'user_derived'
             WHERE id = ?2 AND title_state = 'default'",
        )
        .bind(title)
        .bind(session_id)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::persistence)?;
    }

    Ok(())
}

async fn touch_session(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE sessions SET updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
    )
    .bind(session_id)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::persistence)?;
    Ok(())
}

fn sanitize_limit(limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    limit.min(MAX_HISTORY_LIMIT)
}

fn truncate_title(content: &str) -> String {
    content.trim().chars().take(MAX_TITLE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> HistoryStore {
        let tmp = std::env::temp_dir().join(format!("corpora-history-{}.db", Uuid::new_v4()));
        HistoryStore::new(tmp).await.unwrap()
    }

    #[tokio::test]
    async fn append_creates_session_once() {
        let store = test_store().await;

        store
            .append("s1", &[NewMessage::user("What is gravity?")])
            .await
            .unwrap();
        store
            .append("s1", &[NewMessage::model("A force.")])
            .await
            .unwrap();

        let sessions = store.list_recent().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");

        let messages = store.get_messages("s1", 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Model);
    }

    #[tokio::test]
    async fn title_derives_from_first_user_message_and_truncates() {
        let store = test_store().await;

        let long_question = "Q".repeat(200);
        store
            .append("s1", &[NewMessage::user(long_question)])
            .await
            .unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.title.chars().count(), MAX_TITLE_LEN);
        assert_eq!(session.title_state, TitleState::UserDerived);
    }

    #[tokio::test]
    async fn derived_title_is_never_overwritten() {
        let store = test_store().await;

        store
            .append("s1", &[NewMessage::user("First question")])
            .await
            .unwrap();
        store
            .append("s1", &[NewMessage::user("Second question")])
            .await
            .unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.title, "First question");
    }

    #[tokio::test]
    async fn placeholder_title_upgrades_on_first_user_message() {
        let store = test_store().await;

        // Image-only exchange: no usable user text yet.
        store
            .append("s1", &[NewMessage::model("I see a cat.")])
            .await
            .unwrap();
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.title, DEFAULT_TITLE);
        assert_eq!(session.title_state, TitleState::Default);

        store
            .append("s1", &[NewMessage::user("Tell me more")])
            .await
            .unwrap();
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.title, "Tell me more");
        assert_eq!(session.title_state, TitleState::UserDerived);
    }

    #[tokio::test]
    async fn window_returns_last_n_in_order() {
        let store = test_store().await;

        for i in 0..10 {
            store
                .append("s1", &[NewMessage::user(format!("m{i}"))])
                .await
                .unwrap();
        }

        let window = store.window("s1", 6).await.unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5", "m6", "m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn explicit_create_then_delete() {
        let store = test_store().await;

        let id = store.create_session().await.unwrap();
        let session = store.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.title, DEFAULT_TITLE);

        assert!(store.delete_session(&id).await.unwrap());
        assert!(store.get_session(&id).await.unwrap().is_none());
        // Deleting again is not an error here.
        assert!(!store.delete_session(&id).await.unwrap());
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first() {
        let store = test_store().await;

        store.append("a", &[NewMessage::user("one")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append("b", &[NewMessage::user("two")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append("a", &[NewMessage::model("reply")]).await.unwrap();

        let sessions = store.list_recent().await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids[0], "a");
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn attachment_round_trips_as_json() {
        let store = test_store().await;

        let attachment = serde_json::json!({ "kind": "image", "mime": "image/png" });
        store
            .append(
                "s1",
                &[NewMessage::user("[Image]").with_attachment(attachment.clone())],
            )
            .await
            .unwrap();

        let messages = store.get_messages("s1", 10).await.unwrap();
        assert_eq!(messages[0].attachment.as_ref().unwrap(), &attachment);
    }
}
