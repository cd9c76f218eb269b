//! Local SQLite backend with the same tables as the hosted database.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::store::{
    ConversationTurn, NewTurn, QueryCursor, QueryRow, Role, StoreError, UserProfile, UserStats,
    parse_timestamp, timestamp_now,
};
use crate::persona::Persona;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self { conn: Mutex::new(Connection::open(path)?) };
        store.init_schema()?;
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        info!("Opened database {:?} ({} turns)", path, count);
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Statements never leave a half-written row behind, so a poisoned lock is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                username TEXT,
                first_name TEXT,
                agent_type TEXT NOT NULL,
                role TEXT NOT NULL,
                message TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_sessions (
                user_id TEXT PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                current_agent TEXT NOT NULL,
                last_active TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, agent_type);
            CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(created_at, id);
            CREATE INDEX IF NOT EXISTS idx_analytics_action ON bot_analytics(action);
        "#)?;
        Ok(())
    }

    pub fn save_message(&self, turn: &NewTurn<'_>) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO conversations
                (user_id, username, first_name, agent_type, role, message, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                turn.user.user_id,
                turn.user.username,
                turn.user.first_name,
                turn.persona.tag(),
                turn.role.as_str(),
                turn.message,
                turn.tokens_used,
                timestamp_now(),
            ],
        )?;
        Ok(())
    }

    pub fn history(&self, user_id: &str, persona: Persona, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role, message, tokens_used, created_at FROM conversations
             WHERE user_id = ?1 AND agent_type = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let mut turns = stmt
            .query_map(params![user_id, persona.tag(), limit as i64], |row| {
                Ok(ConversationTurn {
                    role: Role::from_str(&row.get::<_, String>(0)?),
                    persona,
                    message: row.get(1)?,
                    tokens_used: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    pub fn update_user_session(&self, user: &UserProfile, persona: Persona) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO user_sessions (user_id, username, first_name, current_agent, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                current_agent = excluded.current_agent,
                last_active = excluded.last_active",
            params![user.user_id, user.username, user.first_name, persona.tag(), timestamp_now()],
        )?;
        Ok(())
    }

    pub fn session_persona(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        let tag: Option<String> = self
            .conn()
            .query_row(
                "SELECT current_agent FROM user_sessions WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tag.as_deref().and_then(Persona::from_tag))
    }

    pub fn clear_conversation(&self, user_id: &str, persona: Option<Persona>) -> Result<(), StoreError> {
        let conn = self.conn();
        let deleted = match persona {
            Some(p) => conn.execute(
                "DELETE FROM conversations WHERE user_id = ?1 AND agent_type = ?2",
                params![user_id, p.tag()],
            )?,
            None => conn.execute("DELETE FROM conversations WHERE user_id = ?1", params![user_id])?,
        };
        info!("Cleared {deleted} turns for user {user_id}");
        Ok(())
    }

    pub fn user_stats(&self, user_id: &str) -> Result<UserStats, StoreError> {
        let conn = self.conn();
        let count = |agent: Option<&str>| -> Result<usize, rusqlite::Error> {
            let n: i64 = match agent {
                Some(a) => conn.query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND role = 'user' AND agent_type = ?2",
                    params![user_id, a],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND role = 'user'",
                    params![user_id],
                    |row| row.get(0),
                )?,
            };
            Ok(n as usize)
        };
        let first: Option<String> = conn.query_row(
            "SELECT MIN(created_at) FROM conversations WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(UserStats {
            total_messages: count(None)?,
            pm_messages: count(Some(Persona::ProductManager.tag()))?,
            vc_messages: count(Some(Persona::Investor.tag()))?,
            first_message_date: first.as_deref().and_then(parse_timestamp),
        })
    }

    pub fn user_message_count(&self, user_id: &str, persona: Persona) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND agent_type = ?2 AND role = 'user'",
            params![user_id, persona.tag()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn save_summary(&self, user_id: &str, persona: Persona, summary: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO conversation_summaries (user_id, agent_type, summary, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, persona.tag(), summary, timestamp_now()],
        )?;
        Ok(())
    }

    pub fn log_event(&self, user_id: &str, action: &str, metadata: &serde_json::Value) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO bot_analytics (user_id, action, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, action, metadata.to_string(), timestamp_now()],
        )?;
        Ok(())
    }

    /// Analytics rows for one action, oldest first (metadata parsed back to JSON).
    pub fn events(&self, action: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, metadata FROM bot_analytics WHERE action = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![action], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(user, raw)| {
                serde_json::from_str(&raw)
                    .map(|meta| (user, meta))
                    .map_err(|e| StoreError::Parse(e.to_string()))
            })
            .collect()
    }

    pub fn summaries(&self, user_id: &str, persona: Persona) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT summary FROM conversation_summaries WHERE user_id = ?1 AND agent_type = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![user_id, persona.tag()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn user_queries_page(&self, after: Option<&QueryCursor>, limit: usize) -> Result<Vec<QueryRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, username, first_name, agent_type, message, tokens_used, created_at
             FROM conversations
             WHERE role = 'user' AND (created_at > ?1 OR (created_at = ?1 AND id > ?2))
             ORDER BY created_at, id
             LIMIT ?3",
        )?;
        let (created_at, id) = match after {
            Some(c) => (c.created_at.as_str(), c.id),
            None => ("", i64::MIN),
        };
        let rows = stmt
            .query_map(params![created_at, id, limit as i64], |row| {
                Ok(QueryRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    username: row.get(2)?,
                    first_name: row.get(3)?,
                    agent_type: row.get(4)?,
                    message: row.get(5)?,
                    tokens_used: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
