//! SQLite knowledge store.
//!
//! One database file holds every collection:
//! - `knowledge`: rules, triggers, prompts and plans (variant body as JSON)
//! - `events` and `requests`: fingerprint-gated, `hash` is UNIQUE
//! - `hooks`: raw hook records
//! - `conversations` and `chat`: conversation headers and their messages
//!
//! `insert_if_new` is a single `INSERT OR IGNORE` against the UNIQUE hash,
//! so concurrent writers cannot both insert the same fingerprint.

use async_trait::async_trait;
use blv_core::error::StoreError;
use blv_core::knowledge::{
    Finding, HookRecord, HttpRequestRecord, KnowledgeBody, KnowledgeEntry, KnowledgeKind,
};
use blv_core::message::{
    ConversationId, ConversationSummary, Message, Role, default_conversation_name,
};
use blv_core::store::{Collection, KnowledgeStore, NewRecord};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "knowledge table",
        r#"
        CREATE TABLE IF NOT EXISTS knowledge (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            kind       TEXT NOT NULL,
            name       TEXT NOT NULL,
            active     INTEGER NOT NULL DEFAULT 1,
            priority   INTEGER NOT NULL DEFAULT 0,
            body       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(kind, name)
        )
        "#,
    ),
    (
        "events table",
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern    TEXT NOT NULL,
            worked     INTEGER NOT NULL DEFAULT 1,
            target     TEXT NOT NULL,
            technique  TEXT NOT NULL DEFAULT '',
            impact     TEXT NOT NULL DEFAULT '',
            notes      TEXT,
            payload    TEXT,
            hash       TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "requests table",
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            url      TEXT NOT NULL,
            method   TEXT NOT NULL,
            headers  TEXT NOT NULL DEFAULT '',
            body     TEXT NOT NULL DEFAULT '',
            response TEXT NOT NULL DEFAULT '',
            hash     TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "hooks table",
        r#"
        CREATE TABLE IF NOT EXISTS hooks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT UNIQUE NOT NULL,
            event       TEXT NOT NULL,
            matcher     TEXT NOT NULL,
            check_type  TEXT NOT NULL,
            check_value TEXT,
            action      TEXT NOT NULL,
            message     TEXT,
            priority    INTEGER NOT NULL DEFAULT 0,
            active      INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "conversations table",
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "chat table",
        r#"
        CREATE TABLE IF NOT EXISTS chat (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            tokens          INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        )
        "#,
    ),
    (
        "chat index",
        "CREATE INDEX IF NOT EXISTS idx_chat_conversation ON chat(conversation_id, id)",
    ),
];

/// A SQLite-backed knowledge store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Each connection to `:memory:` is its own database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite knowledge store initialized at {path}");
        Ok(store)
    }

    /// Open a database file, creating parent directories as needed.
    pub async fn open_file(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (label, sql) in MIGRATIONS {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
        }
        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_entry(row: &SqliteRow) -> Result<KnowledgeEntry, StoreError> {
        let body_json: String = col(row, "body")?;
        let body: KnowledgeBody = serde_json::from_str(&body_json)
            .map_err(|e| StoreError::QueryFailed(format!("knowledge body: {e}")))?;
        Ok(KnowledgeEntry {
            id: col(row, "id")?,
            name: col(row, "name")?,
            active: col(row, "active")?,
            priority: col(row, "priority")?,
            body,
        })
    }

    fn row_to_finding(row: &SqliteRow) -> Result<Finding, StoreError> {
        let created_at: String = col(row, "created_at")?;
        Ok(Finding {
            id: col(row, "id")?,
            pattern: col(row, "pattern")?,
            worked: col(row, "worked")?,
            target: col(row, "target")?,
            technique: col(row, "technique")?,
            impact: col(row, "impact")?,
            notes: col(row, "notes")?,
            payload: col(row, "payload")?,
            content_hash: col(row, "hash")?,
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_request(row: &SqliteRow) -> Result<HttpRequestRecord, StoreError> {
        Ok(HttpRequestRecord {
            id: col(row, "id")?,
            url: col(row, "url")?,
            method: col(row, "method")?,
            headers: col(row, "headers")?,
            body: col(row, "body")?,
            response: col(row, "response")?,
            content_hash: col(row, "hash")?,
        })
    }

    fn row_to_hook(row: &SqliteRow) -> Result<HookRecord, StoreError> {
        Ok(HookRecord {
            id: col(row, "id")?,
            name: col(row, "name")?,
            event_name: col(row, "event")?,
            matcher: col(row, "matcher")?,
            check_type: col(row, "check_type")?,
            check_value: col(row, "check_value")?,
            action: col(row, "action")?,
            message_template: col(row, "message")?,
            priority: col(row, "priority")?,
            active: col(row, "active")?,
        })
    }

    fn row_to_conversation(row: &SqliteRow) -> Result<ConversationSummary, StoreError> {
        let id: String = col(row, "id")?;
        let created_at: String = col(row, "created_at")?;
        Ok(ConversationSummary {
            id: ConversationId(id),
            name: col(row, "name")?,
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
        let role: String = col(row, "role")?;
        let created_at: String = col(row, "created_at")?;
        let tokens: i64 = col(row, "tokens")?;
        Ok(Message {
            role: Role::parse(&role)
                .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role}'")))?,
            content: col(row, "content")?,
            token_count: u32::try_from(tokens).unwrap_or(0),
            created_at: parse_time(&created_at),
        })
    }

    async fn fetch_entries(&self, kind: KnowledgeKind, active_only: bool) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let sql = if active_only {
            "SELECT * FROM knowledge WHERE kind = ?1 AND active = 1 ORDER BY priority DESC, name ASC"
        } else {
            "SELECT * FROM knowledge WHERE kind = ?1 ORDER BY priority DESC, name ASC"
        };
        let rows = sqlx::query(sql)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("knowledge select: {e}")))?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_active(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError> {
        self.fetch_entries(kind, true).await
    }

    async fn list_entries(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError> {
        self.fetch_entries(kind, false).await
    }

    async fn add_entry(
        &self,
        name: &str,
        priority: i64,
        body: KnowledgeBody,
    ) -> Result<KnowledgeEntry, StoreError> {
        let kind = body.kind();
        let body_json = serde_json::to_string(&body)
            .map_err(|e| StoreError::Storage(format!("knowledge body serialization: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO knowledge (kind, name, active, priority, body, created_at) VALUES (?1, ?2, 1, ?3, ?4, ?5)",
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(priority)
        .bind(&body_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("{kind} '{name}' INSERT failed: {e}")))?;

        Ok(KnowledgeEntry {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            active: true,
            priority,
            body,
        })
    }

    async fn toggle_entry(&self, kind: KnowledgeKind, name: &str) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query(
            "UPDATE knowledge SET active = 1 - active WHERE kind = ?1 AND name = ?2 RETURNING active",
        )
        .bind(kind.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("toggle failed: {e}")))?;

        row.map(|r| col::<bool>(&r, "active")).transpose()
    }

    async fn delete_entry(&self, kind: KnowledgeKind, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM knowledge WHERE kind = ?1 AND name = ?2")
            .bind(kind.as_str())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_recent_events(&self, limit: usize, worked_only: bool) -> Result<Vec<Finding>, StoreError> {
        let sql = if worked_only {
            "SELECT * FROM events WHERE worked = 1 ORDER BY id DESC LIMIT ?1"
        } else {
            "SELECT * FROM events ORDER BY id DESC LIMIT ?1"
        };
        let rows = sqlx::query(sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("events select: {e}")))?;
        rows.iter().map(Self::row_to_finding).collect()
    }

    async fn search_events(&self, keyword: &str) -> Result<Vec<Finding>, StoreError> {
        let like = format!("%{keyword}%");
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE pattern LIKE ?1 OR target LIKE ?1 OR technique LIKE ?1 OR notes LIKE ?1
            ORDER BY id DESC
            "#,
        )
        .bind(&like)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("events search: {e}")))?;
        rows.iter().map(Self::row_to_finding).collect()
    }

    async fn get_requests(&self, limit: usize) -> Result<Vec<HttpRequestRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM requests ORDER BY id ASC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("requests select: {e}")))?;
        rows.iter().map(Self::row_to_request).collect()
    }

    async fn count_requests(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM requests")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("requests count: {e}")))?;
        let n: i64 = col(&row, "n")?;
        Ok(n as usize)
    }

    async fn contains_fingerprint(
        &self,
        collection: Collection,
        fingerprint: &str,
    ) -> Result<bool, StoreError> {
        let sql = match collection {
            Collection::Events => "SELECT 1 FROM events WHERE hash = ?1",
            Collection::Requests => "SELECT 1 FROM requests WHERE hash = ?1",
        };
        let row = sqlx::query(sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("fingerprint lookup: {e}")))?;
        Ok(row.is_some())
    }

    async fn insert_if_new(&self, fingerprint: &str, record: NewRecord) -> Result<bool, StoreError> {
        let result = match record {
            NewRecord::Finding(f) => sqlx::query(
                r#"
                INSERT OR IGNORE INTO events
                    (pattern, worked, target, technique, impact, notes, payload, hash, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&f.pattern)
            .bind(f.worked)
            .bind(&f.target)
            .bind(&f.technique)
            .bind(&f.impact)
            .bind(&f.notes)
            .bind(&f.payload)
            .bind(fingerprint)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await,
            NewRecord::Request(r) => sqlx::query(
                r#"
                INSERT OR IGNORE INTO requests (url, method, headers, body, response, hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&r.url)
            .bind(&r.method)
            .bind(&r.headers)
            .bind(&r.body)
            .bind(&r.response)
            .bind(fingerprint)
            .execute(&self.pool)
            .await,
        }
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_hook(&self, mut hook: HookRecord) -> Result<HookRecord, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO hooks (name, event, matcher, check_type, check_value, action, message, priority, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&hook.name)
        .bind(&hook.event_name)
        .bind(&hook.matcher)
        .bind(&hook.check_type)
        .bind(&hook.check_value)
        .bind(&hook.action)
        .bind(&hook.message_template)
        .bind(hook.priority)
        .bind(hook.active)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("hook '{}' INSERT failed: {e}", hook.name)))?;

        hook.id = result.last_insert_rowid();
        Ok(hook)
    }

    async fn get_hooks(&self, phase: &str) -> Result<Vec<HookRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM hooks WHERE event = ?1 AND active = 1 ORDER BY priority DESC, name ASC",
        )
        .bind(phase)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("hooks select: {e}")))?;
        rows.iter().map(Self::row_to_hook).collect()
    }

    async fn create_conversation(&self, name: Option<&str>) -> Result<ConversationSummary, StoreError> {
        let now = Utc::now();
        let summary = ConversationSummary {
            id: ConversationId::new(),
            name: name
                .filter(|n| !n.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_conversation_name(now)),
            created_at: now,
        };

        sqlx::query("INSERT INTO conversations (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(summary.id.as_str())
            .bind(&summary.name)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("conversation INSERT failed: {e}")))?;

        Ok(summary)
    }

    async fn find_conversation(&self, name: &str) -> Result<Option<ConversationSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM conversations WHERE name = ?1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("conversation lookup: {e}")))?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY created_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("conversations select: {e}")))?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        // Messages go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("conversation DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
        tokens: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat (conversation_id, role, content, tokens, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(conversation.as_str())
        .bind(role.as_str())
        .bind(text)
        .bind(i64::from(tokens))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("message INSERT failed: {e}")))?;
        Ok(())
    }

    async fn get_history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM chat WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2
            ) ORDER BY id ASC
            "#,
        )
        .bind(conversation.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("history select: {e}")))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn message_count(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chat WHERE conversation_id = ?1")
            .bind(conversation.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("message count: {e}")))?;
        let n: i64 = col(&row, "n")?;
        Ok(n as usize)
    }

    async fn conversation_tokens(&self, conversation: &ConversationId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(tokens), 0) AS total FROM chat WHERE conversation_id = ?1",
        )
        .bind(conversation.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("token sum: {e}")))?;
        let total: i64 = col(&row, "total")?;
        Ok(total.max(0) as u64)
    }
}
