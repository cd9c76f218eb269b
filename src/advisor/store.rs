//! Conversation storage over either hosted Supabase or a local SQLite file.
//!
//! Reads degrade to empty values (logged with `warn!`) so a flaky database
//! never blocks a reply. Writes return errors and the caller decides.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::sqlite::SqliteStore;
use super::supabase::SupabaseStore;
use crate::persona::Persona;

/// Who wrote a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// The Telegram user behind a request.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        self.first_name.as_deref().unwrap_or("Founder")
    }
}

/// A turn about to be written.
pub struct NewTurn<'a> {
    pub user: &'a UserProfile,
    pub persona: Persona,
    pub role: Role,
    pub message: &'a str,
    pub tokens_used: u32,
}

/// A stored turn.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub persona: Persona,
    pub message: String,
    pub tokens_used: u32,
    /// RFC 3339 timestamp as stored.
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStats {
    pub total_messages: usize,
    pub pm_messages: usize,
    pub vc_messages: usize,
    pub first_message_date: Option<DateTime<Utc>>,
}

/// One user-authored turn, as exported by the query report.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub id: i64,
    pub user_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub agent_type: String,
    pub message: String,
    pub tokens_used: u32,
    pub created_at: String,
}

/// Keyset position for paging through [`QueryRow`]s in `(created_at, id)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCursor {
    pub created_at: String,
    pub id: i64,
}

impl QueryRow {
    pub fn cursor(&self) -> QueryCursor {
        QueryCursor { created_at: self.created_at.clone(), id: self.id }
    }
}

/// Current time in the sortable form both backends store.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug)]
pub enum StoreError {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Http(e) => write!(f, "HTTP error: {e}"),
            StoreError::Api { status, body } => write!(f, "database API error: {status}: {body}"),
            StoreError::Parse(e) => write!(f, "Parse error: {e}"),
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

pub enum Store {
    Supabase(SupabaseStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Supabase(_) => "supabase",
            Store::Sqlite(_) => "sqlite",
        }
    }

    pub async fn save_message(&self, turn: &NewTurn<'_>) -> Result<(), StoreError> {
        match self {
            Store::Supabase(s) => s.save_message(turn).await,
            Store::Sqlite(s) => s.save_message(turn),
        }
    }

    /// The latest `limit` turns for this user and persona, oldest first.
    pub async fn history(&self, user_id: &str, persona: Persona, limit: usize) -> Vec<ConversationTurn> {
        let result = match self {
            Store::Supabase(s) => s.history(user_id, persona, limit).await,
            Store::Sqlite(s) => s.history(user_id, persona, limit),
        };
        result.unwrap_or_else(|e| {
            warn!("Failed to load history for {user_id}: {e}");
            Vec::new()
        })
    }

    pub async fn update_user_session(&self, user: &UserProfile, persona: Persona) {
        let result = match self {
            Store::Supabase(s) => s.update_user_session(user, persona).await,
            Store::Sqlite(s) => s.update_user_session(user, persona),
        };
        if let Err(e) = result {
            warn!("Failed to update session for {}: {e}", user.user_id);
        }
    }

    /// Persona recorded in the user's session, if any.
    pub async fn session_persona(&self, user_id: &str) -> Option<Persona> {
        let result = match self {
            Store::Supabase(s) => s.session_persona(user_id).await,
            Store::Sqlite(s) => s.session_persona(user_id),
        };
        result.unwrap_or_else(|e| {
            warn!("Failed to load session for {user_id}: {e}");
            None
        })
    }

    /// Delete turns for a user, limited to one persona when given.
    pub async fn clear_conversation(&self, user_id: &str, persona: Option<Persona>) -> Result<(), StoreError> {
        match self {
            Store::Supabase(s) => s.clear_conversation(user_id, persona).await,
            Store::Sqlite(s) => s.clear_conversation(user_id, persona),
        }
    }

    pub async fn user_stats(&self, user_id: &str) -> UserStats {
        let result = match self {
            Store::Supabase(s) => s.user_stats(user_id).await,
            Store::Sqlite(s) => s.user_stats(user_id),
        };
        result.unwrap_or_else(|e| {
            warn!("Failed to load stats for {user_id}: {e}");
            UserStats::default()
        })
    }

    /// Number of user-authored turns with this persona.
    pub async fn user_message_count(&self, user_id: &str, persona: Persona) -> usize {
        let result = match self {
            Store::Supabase(s) => s.user_message_count(user_id, persona).await,
            Store::Sqlite(s) => s.user_message_count(user_id, persona),
        };
        result.unwrap_or_else(|e| {
            warn!("Failed to count messages for {user_id}: {e}");
            0
        })
    }

    pub async fn save_summary(&self, user_id: &str, persona: Persona, summary: &str) -> Result<(), StoreError> {
        match self {
            Store::Supabase(s) => s.save_summary(user_id, persona, summary).await,
            Store::Sqlite(s) => s.save_summary(user_id, persona, summary),
        }
    }

    pub async fn log_event(&self, user_id: &str, action: &str, metadata: &serde_json::Value) -> Result<(), StoreError> {
        match self {
            Store::Supabase(s) => s.log_event(user_id, action, metadata).await,
            Store::Sqlite(s) => s.log_event(user_id, action, metadata),
        }
    }

    /// Next page of user-authored turns strictly after `after`.
    pub async fn user_queries_page(&self, after: Option<&QueryCursor>, limit: usize) -> Result<Vec<QueryRow>, StoreError> {
        match self {
            Store::Supabase(s) => s.user_queries_page(after, limit).await,
            Store::Sqlite(s) => s.user_queries_page(after, limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str(Role::Assistant.as_str()), Role::Assistant);
        assert_eq!(Role::from_str("user"), Role::User);
        assert_eq!(Role::from_str("garbage"), Role::User);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = timestamp_now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = timestamp_now();
        assert!(a < b);
        assert!(parse_timestamp(&a).is_some());
    }

    #[test]
    fn test_parse_supabase_timestamp() {
        let dt = parse_timestamp("2024-03-05T10:20:30.123456+00:00").unwrap();
        assert_eq!(dt.format("%B %d, %Y").to_string(), "March 05, 2024");
    }

    #[test]
    fn test_display_name_fallback() {
        let user = UserProfile { user_id: "1".into(), username: None, first_name: None };
        assert_eq!(user.display_name(), "Founder");
    }
}
