//! Supabase backend over the PostgREST HTTP interface.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::store::{
    ConversationTurn, NewTurn, QueryCursor, QueryRow, Role, StoreError, UserProfile, UserStats,
    parse_timestamp, timestamp_now,
};
use crate::config::SupabaseConfig;
use crate::persona::Persona;

pub struct SupabaseStore {
    rest_url: String,
    service_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ConversationInsert<'a> {
    user_id: &'a str,
    username: Option<&'a str>,
    first_name: Option<&'a str>,
    agent_type: &'static str,
    role: &'static str,
    message: &'a str,
    tokens_used: u32,
}

#[derive(Deserialize)]
struct ConversationRow {
    role: String,
    agent_type: String,
    message: String,
    #[serde(default)]
    tokens_used: Option<u32>,
    #[serde(default)]
    created_at: String,
}

#[derive(Deserialize)]
struct QueryRecord {
    id: i64,
    user_id: String,
    username: Option<String>,
    first_name: Option<String>,
    agent_type: String,
    message: String,
    #[serde(default)]
    tokens_used: Option<u32>,
    created_at: String,
}

#[derive(Deserialize)]
struct SessionRow {
    current_agent: String,
}

#[derive(Deserialize)]
struct CreatedAtRow {
    created_at: String,
}

/// Total row count from a PostgREST `Content-Range` header such as `0-0/42` or `*/0`.
pub fn parse_content_range(header: &str) -> Option<usize> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;
        info!("Using Supabase at {}", config.url);
        Ok(Self {
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            service_key: config.service_key.clone(),
            http,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status, body });
        }
        Ok(response)
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> Result<Vec<T>, StoreError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn insert(&self, table: &str, body: &impl Serialize) -> Result<(), StoreError> {
        let request = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(request).await?;
        debug!("Inserted row into {table}");
        Ok(())
    }

    /// Exact row count for the given filters.
    async fn count(&self, filters: &[(&str, String)]) -> Result<usize, StoreError> {
        let request = self
            .request(Method::GET, "conversations")
            .header("Prefer", "count=exact")
            .query(&[("select", "id"), ("limit", "1")])
            .query(filters);
        let response = self.send(request).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| StoreError::Parse("missing Content-Range count".into()))
    }

    pub async fn save_message(&self, turn: &NewTurn<'_>) -> Result<(), StoreError> {
        let row = ConversationInsert {
            user_id: &turn.user.user_id,
            username: turn.user.username.as_deref(),
            first_name: turn.user.first_name.as_deref(),
            agent_type: turn.persona.tag(),
            role: turn.role.as_str(),
            message: turn.message,
            tokens_used: turn.tokens_used,
        };
        self.insert("conversations", &row).await
    }

    pub async fn history(&self, user_id: &str, persona: Persona, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let request = self.request(Method::GET, "conversations").query(&[
            ("select", "role,agent_type,message,tokens_used,created_at".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("agent_type", format!("eq.{}", persona.tag())),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let rows: Vec<ConversationRow> = self.fetch(request).await?;
        Ok(rows
            .into_iter()
            .rev()
            .map(|r| ConversationTurn {
                role: Role::from_str(&r.role),
                persona: Persona::from_tag(&r.agent_type).unwrap_or(persona),
                message: r.message,
                tokens_used: r.tokens_used.unwrap_or(0),
                created_at: r.created_at,
            })
            .collect())
    }

    pub async fn update_user_session(&self, user: &UserProfile, persona: Persona) -> Result<(), StoreError> {
        let body = json!({
            "user_id": user.user_id,
            "username": user.username,
            "first_name": user.first_name,
            "current_agent": persona.tag(),
            "last_active": timestamp_now(),
        });
        let request = self
            .request(Method::POST, "user_sessions")
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        self.send(request).await?;
        Ok(())
    }

    pub async fn session_persona(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        let request = self.request(Method::GET, "user_sessions").query(&[
            ("select", "current_agent".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<SessionRow> = self.fetch(request).await?;
        Ok(rows.first().and_then(|r| Persona::from_tag(&r.current_agent)))
    }

    pub async fn clear_conversation(&self, user_id: &str, persona: Option<Persona>) -> Result<(), StoreError> {
        let mut filters = vec![("user_id", format!("eq.{user_id}"))];
        if let Some(p) = persona {
            filters.push(("agent_type", format!("eq.{}", p.tag())));
        }
        self.send(self.request(Method::DELETE, "conversations").query(&filters)).await?;
        info!("Cleared conversations for user {user_id}");
        Ok(())
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats, StoreError> {
        let user = ("user_id", format!("eq.{user_id}"));
        let role = ("role", "eq.user".to_string());
        let agent = |p: Persona| ("agent_type", format!("eq.{}", p.tag()));

        let total_messages = self.count(&[user.clone(), role.clone()]).await?;
        let pm_messages = self
            .count(&[user.clone(), role.clone(), agent(Persona::ProductManager)])
            .await?;
        let vc_messages = self
            .count(&[user.clone(), role.clone(), agent(Persona::Investor)])
            .await?;

        let request = self.request(Method::GET, "conversations").query(&[
            ("select", "created_at".to_string()),
            user,
            ("order", "created_at.asc".to_string()),
            ("limit", "1".to_string()),
        ]);
        let first: Vec<CreatedAtRow> = self.fetch(request).await?;

        Ok(UserStats {
            total_messages,
            pm_messages,
            vc_messages,
            first_message_date: first.first().and_then(|r| parse_timestamp(&r.created_at)),
        })
    }

    pub async fn user_message_count(&self, user_id: &str, persona: Persona) -> Result<usize, StoreError> {
        self.count(&[
            ("user_id", format!("eq.{user_id}")),
            ("agent_type", format!("eq.{}", persona.tag())),
            ("role", "eq.user".to_string()),
        ])
        .await
    }

    pub async fn save_summary(&self, user_id: &str, persona: Persona, summary: &str) -> Result<(), StoreError> {
        let body = json!({
            "user_id": user_id,
            "agent_type": persona.tag(),
            "summary": summary,
        });
        self.insert("conversation_summaries", &body).await
    }

    pub async fn log_event(&self, user_id: &str, action: &str, metadata: &serde_json::Value) -> Result<(), StoreError> {
        let body = json!({
            "user_id": user_id,
            "action": action,
            "metadata": metadata,
            "created_at": timestamp_now(),
        });
        self.insert("bot_analytics", &body).await
    }

    pub async fn user_queries_page(&self, after: Option<&QueryCursor>, limit: usize) -> Result<Vec<QueryRow>, StoreError> {
        let mut params = vec![
            ("select", "id,user_id,username,first_name,agent_type,message,tokens_used,created_at".to_string()),
            ("role", "eq.user".to_string()),
            ("order", "created_at.asc,id.asc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = after {
            params.push(("or", keyset_filter(cursor)));
        }
        let rows: Vec<QueryRecord> = self
            .fetch(self.request(Method::GET, "conversations").query(&params))
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| QueryRow {
                id: r.id,
                user_id: r.user_id,
                username: r.username,
                first_name: r.first_name,
                agent_type: r.agent_type,
                message: r.message,
                tokens_used: r.tokens_used.unwrap_or(0),
                created_at: r.created_at,
            })
            .collect())
    }
}

/// PostgREST `or` filter selecting rows strictly after `cursor` in `(created_at, id)` order.
pub fn keyset_filter(cursor: &QueryCursor) -> String {
    let ts = &cursor.created_at;
    format!("(created_at.gt.\"{ts}\",and(created_at.eq.\"{ts}\",id.gt.{}))", cursor.id)
}
