//! Usage events written to `bot_analytics`.
//!
//! Recording is best effort: a failed write is counted and logged, never
//! surfaced to the user.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::store::Store;
use crate::persona::Persona;

#[derive(Debug, Clone)]
pub enum Event {
    BotStarted { username: Option<String>, first_name: Option<String> },
    PersonaSelected(Persona),
    PersonaSwitched(Persona),
    RateLimited { message: String },
    MessageProcessed {
        persona: Persona,
        message_length: usize,
        response_length: usize,
        tokens_used: u32,
        query: String,
    },
    MessageError { persona: Persona, error: String },
    ConversationReset(Persona),
    StatsViewed { total_messages: usize, pm_messages: usize, vc_messages: usize, days_active: i64 },
    ConversationExported { persona: Persona, turns: usize },
}

impl Event {
    pub fn action(&self) -> &'static str {
        match self {
            Event::BotStarted { .. } => "bot_started",
            Event::PersonaSelected(_) => "agent_selected",
            Event::PersonaSwitched(_) => "agent_switched",
            Event::RateLimited { .. } => "rate_limited",
            Event::MessageProcessed { .. } => "message_processed",
            Event::MessageError { .. } => "message_error",
            Event::ConversationReset(_) => "conversation_reset",
            Event::StatsViewed { .. } => "stats_viewed",
            Event::ConversationExported { .. } => "conversation_exported",
        }
    }

    pub fn metadata(&self) -> Value {
        match self {
            Event::BotStarted { username, first_name } => {
                json!({ "username": username, "first_name": first_name })
            }
            Event::PersonaSelected(p) => json!({ "agent_type": p.tag(), "agent_name": p.name() }),
            Event::PersonaSwitched(p) => json!({ "new_agent_type": p.tag(), "agent_name": p.name() }),
            Event::RateLimited { message } => json!({ "error_msg": message }),
            Event::MessageProcessed { persona, message_length, response_length, tokens_used, query } => json!({
                "agent_type": persona.tag(),
                "message_length": message_length,
                "response_length": response_length,
                "tokens_used": tokens_used,
                "query": query,
            }),
            Event::MessageError { persona, error } => {
                let error: String = error.chars().take(100).collect();
                json!({ "agent_type": persona.tag(), "error": error })
            }
            Event::ConversationReset(p) => json!({ "agent_type": p.tag(), "agent_name": p.name() }),
            Event::StatsViewed { total_messages, pm_messages, vc_messages, days_active } => json!({
                "total_messages": total_messages,
                "pm_messages": pm_messages,
                "vc_messages": vc_messages,
                "days_active": days_active,
            }),
            Event::ConversationExported { persona, turns } => {
                json!({ "agent_type": persona.tag(), "format": "markdown", "turns": turns })
            }
        }
    }
}

pub struct Analytics {
    store: Arc<Store>,
    failures: AtomicU64,
}

impl Analytics {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, failures: AtomicU64::new(0) }
    }

    pub async fn record(&self, user_id: &str, event: Event) {
        let action = event.action();
        match self.store.log_event(user_id, action, &event.metadata()).await {
            Ok(()) => debug!("analytics: {action} for {user_id}"),
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Failed to record {action} ({failures} failures so far): {e}");
            }
        }
    }

    /// Writes that failed since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
