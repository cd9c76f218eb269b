//! Command handling and the per-message advice flow.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use teloxide::types::CallbackQueryId;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::analytics::{Analytics, Event};
use super::export::{EXPORT_TURNS, markdown_file_name, to_markdown};
use super::store::{NewTurn, Role, Store, UserProfile, UserStats};
use super::summary::{
    SUMMARY_WINDOW, continuity_prefix, contextualize, normalize_query, summary_card,
    summary_due, summary_messages,
};
use super::telegram::{TelegramClient, export_keyboard, persona_keyboard};
use crate::format::markup::{bold, escape, italic};
use crate::format::{FormatOptions, format_response};
use crate::openrouter::{self, Message};
use crate::persona::Persona;
use crate::ratelimit::RateLimiter;

const REPLY_MAX_TOKENS: u32 = 800;
const REPLY_TEMPERATURE: f32 = 0.7;
const SUMMARY_MAX_TOKENS: u32 = 150;
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Settings the engine needs from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub max_history_messages: usize,
    pub summary_model: String,
    pub summary_every: usize,
    pub format: FormatOptions,
    pub feedback_contact: Option<String>,
}

/// Active persona per user id, seeded from the stored session.
#[derive(Default)]
struct PersonaCache(Mutex<HashMap<String, Persona>>);

impl PersonaCache {
    async fn get_or_load<F>(&self, user_id: &str, load: F) -> Persona
    where
        F: Future<Output = Option<Persona>>,
    {
        if let Some(p) = self.0.lock().await.get(user_id).copied() {
            return p;
        }
        let stored = load.await.unwrap_or_default();
        // A choice made while the session was loading beats the stored one.
        *self.0.lock().await.entry(user_id.to_string()).or_insert(stored)
    }

    async fn set(&self, user_id: &str, persona: Persona) {
        self.0.lock().await.insert(user_id.to_string(), persona);
    }
}

pub struct AdvisorEngine {
    config: AdvisorConfig,
    store: Arc<Store>,
    llm: openrouter::Client,
    limiter: RateLimiter,
    analytics: Analytics,
    telegram: TelegramClient,
    personas: PersonaCache,
}

impl AdvisorEngine {
    pub fn new(
        config: AdvisorConfig,
        store: Arc<Store>,
        llm: openrouter::Client,
        limiter: RateLimiter,
        telegram: TelegramClient,
    ) -> Self {
        let analytics = Analytics::new(store.clone());
        Self {
            config,
            store,
            llm,
            limiter,
            analytics,
            telegram,
            personas: PersonaCache::default(),
        }
    }

    async fn persona_for(&self, user_id: &str) -> Persona {
        self.personas
            .get_or_load(user_id, self.store.session_persona(user_id))
            .await
    }

    async fn set_persona(&self, user: &UserProfile, persona: Persona) {
        self.personas.set(&user.user_id, persona).await;
        self.store.update_user_session(user, persona).await;
    }

    async fn reply(&self, chat_id: i64, markdown: &str) {
        if let Err(e) = self.telegram.send_markdown(chat_id, markdown).await {
            warn!("Reply to {chat_id} failed: {e}");
        }
    }

    pub async fn answer_callback(&self, id: CallbackQueryId) {
        self.telegram.answer_callback(id).await;
    }

    // ==================== Commands ====================

    pub async fn start(&self, chat_id: i64, user: &UserProfile) {
        let text = welcome_text(user);
        if let Err(e) = self
            .telegram
            .send_markdown_with_keyboard(chat_id, &text, persona_keyboard())
            .await
        {
            warn!("Failed to send welcome: {e}");
        }
        let persona = self.persona_for(&user.user_id).await;
        self.store.update_user_session(user, persona).await;
        self.analytics
            .record(&user.user_id, Event::BotStarted {
                username: user.username.clone(),
                first_name: user.first_name.clone(),
            })
            .await;
    }

    /// Inline keyboard choice from /start.
    pub async fn select_persona(&self, chat_id: i64, message_id: Option<i32>, user: &UserProfile, persona: Persona) {
        self.set_persona(user, persona).await;
        self.analytics
            .record(&user.user_id, Event::PersonaSelected(persona))
            .await;

        let text = selected_text(persona);
        let result = match message_id {
            Some(id) => self.telegram.edit_markdown(chat_id, id, &text).await,
            None => self.telegram.send_markdown(chat_id, &text).await,
        };
        if let Err(e) = result {
            warn!("Failed to confirm persona selection: {e}");
        }
    }

    /// /pm and /vc.
    pub async fn switch_persona(&self, chat_id: i64, user: &UserProfile, persona: Persona) {
        self.set_persona(user, persona).await;
        self.analytics
            .record(&user.user_id, Event::PersonaSwitched(persona))
            .await;
        info!("{} switched to {}", user.user_id, persona);
        let text = format!(
            "✅ Switched to {}\n\n{}",
            bold(persona.name()),
            escape("How can I help you?")
        );
        self.reply(chat_id, &text).await;
    }

    pub async fn reset(&self, chat_id: i64, user: &UserProfile) {
        let persona = self.persona_for(&user.user_id).await;
        if let Err(e) = self.store.clear_conversation(&user.user_id, Some(persona)).await {
            error!("Failed to clear conversation for {}: {e}", user.user_id);
            self.reply(chat_id, &escape("Sorry, I couldn't reset the conversation. Please try again.")).await;
            return;
        }
        let text = format!(
            "🔄 {}\n\n{}",
            bold("Conversation Reset!"),
            escape(&format!(
                "Your conversation history with {} has been cleared.\n\nLet's start fresh! What would you like to discuss?",
                persona.name()
            ))
        );
        self.reply(chat_id, &text).await;
        self.analytics
            .record(&user.user_id, Event::ConversationReset(persona))
            .await;
    }

    pub async fn stats(&self, chat_id: i64, user: &UserProfile) {
        let stats = self.store.user_stats(&user.user_id).await;
        let days_active = days_active(&stats);
        let text = stats_text(user, &stats, self.config.feedback_contact.as_deref());
        self.reply(chat_id, &text).await;
        info!(
            "Stats for {}: {} messages ({} analytics writes failed since start)",
            user.user_id,
            stats.total_messages,
            self.analytics.failures()
        );
        self.analytics
            .record(&user.user_id, Event::StatsViewed {
                total_messages: stats.total_messages,
                pm_messages: stats.pm_messages,
                vc_messages: stats.vc_messages,
                days_active,
            })
            .await;
    }

    pub async fn help(&self, chat_id: i64) {
        self.reply(chat_id, &help_text(self.config.feedback_contact.as_deref())).await;
    }

    pub async fn export_menu(&self, chat_id: i64) {
        if let Err(e) = self
            .telegram
            .send_markdown_with_keyboard(chat_id, &escape("Choose export format:"), export_keyboard())
            .await
        {
            warn!("Failed to send export menu: {e}");
        }
    }

    /// "export_markdown" callback: send the conversation as a .md file.
    pub async fn export_markdown(&self, chat_id: i64, message_id: Option<i32>, user: &UserProfile) {
        let persona = self.persona_for(&user.user_id).await;
        let turns = self.store.history(&user.user_id, persona, EXPORT_TURNS).await;

        let status = if turns.is_empty() {
            "No conversation history to export."
        } else {
            let now = Local::now();
            let document = to_markdown(&turns, user.display_name(), now);
            match self
                .telegram
                .send_document(
                    chat_id,
                    document.into_bytes(),
                    &markdown_file_name(now),
                    "📝 Your conversation in Markdown format",
                )
                .await
            {
                Ok(()) => {
                    self.analytics
                        .record(&user.user_id, Event::ConversationExported { persona, turns: turns.len() })
                        .await;
                    "✅ Export complete!"
                }
                Err(_) => "❌ Export failed. Please try again later.",
            }
        };

        let result = match message_id {
            Some(id) => self.telegram.edit_markdown(chat_id, id, &escape(status)).await,
            None => self.telegram.send_formatted(chat_id, status).await,
        };
        if let Err(e) = result {
            warn!("Failed to report export status: {e}");
        }
    }

    // ==================== Messages ====================

    /// Rate limit, ask the model, store and send the formatted answer.
    pub async fn handle_message(&self, chat_id: i64, user: &UserProfile, text: &str) {
        let (allowed, limit_msg) = self.limiter.is_allowed(&user.user_id);
        if !allowed {
            info!("Rate limited {}", user.user_id);
            let warning = format!(
                "⚠️ {}\n\n{}",
                escape(&limit_msg),
                escape("This limit helps ensure quality service for all users.")
            );
            self.reply(chat_id, &warning).await;
            self.analytics
                .record(&user.user_id, Event::RateLimited { message: limit_msg })
                .await;
            return;
        }

        let persona = self.persona_for(&user.user_id).await;
        self.telegram.send_typing(chat_id).await;

        if let Err(e) = self.answer(chat_id, user, persona, text).await {
            error!("Error handling message from {}: {e}", user.user_id);
            self.reply(chat_id, &escape(&e.user_message())).await;
            self.analytics
                .record(&user.user_id, Event::MessageError { persona, error: e.to_string() })
                .await;
        }
    }

    async fn answer(&self, chat_id: i64, user: &UserProfile, persona: Persona, text: &str) -> Result<(), FlowError> {
        self.store
            .save_message(&NewTurn { user, persona, role: Role::User, message: text, tokens_used: 0 })
            .await
            .map_err(FlowError::Store)?;

        let history = self
            .store
            .history(&user.user_id, persona, self.config.max_history_messages)
            .await;
        let prefix = continuity_prefix(&history);

        let mut messages = vec![Message::system(persona.system_prompt())];
        // The newest stored turn is the message being answered; it is re-sent with context.
        let earlier = match history.last() {
            Some(last) if last.role == Role::User && last.message == text => &history[..history.len() - 1],
            _ => &history[..],
        };
        messages.extend(earlier.iter().map(|t| match t.role {
            Role::User => Message::user(t.message.clone()),
            Role::Assistant => Message::assistant(t.message.clone()),
        }));
        messages.push(Message::user(contextualize(text, prefix.as_deref())));

        let completion = self
            .llm
            .chat(persona.model(), &messages, REPLY_MAX_TOKENS, REPLY_TEMPERATURE)
            .await
            .map_err(FlowError::Model)?;

        let formatted = format_response(&completion.content, persona, &self.config.format);

        self.store
            .save_message(&NewTurn {
                user,
                persona,
                role: Role::Assistant,
                message: &formatted,
                tokens_used: completion.total_tokens,
            })
            .await
            .map_err(FlowError::Store)?;

        if let Err(e) = self.telegram.send_formatted(chat_id, &formatted).await {
            warn!("Failed to deliver answer to {chat_id}: {e}");
        }

        self.analytics
            .record(&user.user_id, Event::MessageProcessed {
                persona,
                message_length: text.chars().count(),
                response_length: formatted.chars().count(),
                tokens_used: completion.total_tokens,
                query: normalize_query(text),
            })
            .await;

        let count = self.store.user_message_count(&user.user_id, persona).await;
        if summary_due(count, self.config.summary_every) {
            self.send_summary(chat_id, &user.user_id, persona).await;
        }
        Ok(())
    }

    async fn send_summary(&self, chat_id: i64, user_id: &str, persona: Persona) {
        let history = self.store.history(user_id, persona, SUMMARY_WINDOW).await;
        if history.is_empty() {
            return;
        }
        let summary = match self
            .llm
            .chat(&self.config.summary_model, &summary_messages(&history), SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE)
            .await
        {
            Ok(c) => c.content,
            Err(e) => {
                warn!("Summary generation failed: {e}");
                return;
            }
        };

        self.reply(chat_id, &summary_card(&summary, self.config.summary_every)).await;
        if let Err(e) = self.store.save_summary(user_id, persona, &summary).await {
            warn!("Failed to save summary for {user_id}: {e}");
        }
    }
}

/// Why a message could not be answered.
#[derive(Debug)]
enum FlowError {
    Store(super::store::StoreError),
    Model(openrouter::Error),
}

impl FlowError {
    fn user_message(&self) -> String {
        match self {
            FlowError::Store(_) => "Sorry, I encountered an error. Please try again.".to_string(),
            FlowError::Model(e) => e.user_message().to_string(),
        }
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::Store(e) => write!(f, "store: {e}"),
            FlowError::Model(e) => write!(f, "model: {e}"),
        }
    }
}

// ==================== Texts (MarkdownV2) ====================

pub fn welcome_text(user: &UserProfile) -> String {
    let mut text = escape(&format!(
        "Welcome to Startup Advisor Bot (Beta).\n\nHello {}. I provide AI-powered guidance through two specialized advisors:\n\n",
        user.display_name()
    ));
    text.push_str(&bold("Product Manager"));
    text.push_str(&escape(
        "\nStrategic product development guidance\n\
         - Challenges your assumptions about users\n\
         - Questions your product-market fit approach\n\
         - Probes your growth and retention strategies\n\
         - Helps prioritize features that matter\n\n",
    ));
    text.push_str(&bold("VC/Angel Investor"));
    text.push_str(&escape(
        "\nEarly-stage investment perspective\n\
         - Questions market size and opportunity\n\
         - Challenges your competitive positioning\n\
         - Probes unit economics and metrics\n\
         - Tests your fundraising readiness\n\n\
         Choose your advisor to begin:",
    ));
    text
}

pub fn selected_text(persona: Persona) -> String {
    let prompts = persona.start_prompts().join("\n- ");
    format!(
        "{}{}",
        bold(&format!("{} selected.", persona.name())),
        escape(&format!(
            "\n\nI'll challenge your thinking and ask probing questions to help refine your strategy.\n\n\
             Start by sharing:\n- {prompts}\n\n\
             Or tell me about your startup.\n\n\
             Switch advisors anytime with /pm or /vc"
        ))
    )
}

pub fn help_text(feedback_contact: Option<&str>) -> String {
    let mut text = format!(
        "{}\n\n{}\n{}\n\n{}\n{}\n\n{}\n{}",
        bold("How to use this bot:"),
        bold("Commands:"),
        escape(
            "- /start - Choose your advisor\n\
             - /pm - Switch to Product Manager\n\
             - /vc - Switch to VC/Angel Investor\n\
             - /reset - Clear conversation history\n\
             - /stats - View your usage stats\n\
             - /export - Download your conversation\n\
             - /help - Show this help message"
        ),
        bold("Tips:"),
        escape(
            "- Be specific about your startup/product\n\
             - Ask follow-up questions\n\
             - Share your challenges openly\n\
             - The AI has internet access for current data"
        ),
        bold("Beta Version"),
        escape("This bot is in beta. Your feedback helps improve it."),
    );
    if let Some(contact) = feedback_contact {
        text.push_str(&escape(&format!("\nReport bugs or suggestions to {contact}")));
    }
    text
}

pub fn days_active(stats: &UserStats) -> i64 {
    stats
        .first_message_date
        .map_or(0, |first| (Utc::now() - first).num_days())
}

pub fn favorite_persona(stats: &UserStats) -> &'static str {
    use std::cmp::Ordering;
    match stats.pm_messages.cmp(&stats.vc_messages) {
        Ordering::Greater => "🚀 Product Manager",
        Ordering::Less => "🦈 VC/Angel",
        Ordering::Equal => "Both equally!",
    }
}

pub fn stats_text(user: &UserProfile, stats: &UserStats, feedback_contact: Option<&str>) -> String {
    let member_since = stats
        .first_message_date
        .map_or_else(|| "Today".to_string(), |d| d.format("%B %d, %Y").to_string());

    let line = |label: &str, value: &str| format!("{} {}", bold(label), escape(value));
    let mut text = format!(
        "📊 {}\n\n👤 {}\n📅 {}\n⏱️ {}\n\n💬 {}\n{}\n{}\n\n⭐ {}",
        bold("Your Statistics"),
        line("User:", user.display_name()),
        line("Member Since:", &member_since),
        line("Days Active:", &days_active(stats).to_string()),
        line("Total Messages:", &stats.total_messages.to_string()),
        escape(&format!("├─ 🚀 PM: {}", stats.pm_messages)),
        escape(&format!("└─ 🦈 VC: {}", stats.vc_messages)),
        line("Favorite:", favorite_persona(stats)),
    );
    let footer = match feedback_contact {
        Some(contact) => format!("Beta version • Feedback: {contact}"),
        None => "Beta version".to_string(),
    };
    text.push_str("\n\n");
    text.push_str(&italic(&footer));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::markup::{RESERVED, to_plain};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_persona_cache_loads_once() {
        let cache = PersonaCache::default();
        assert_eq!(cache.get_or_load("1", async { Some(Persona::Investor) }).await, Persona::Investor);
        assert_eq!(cache.get_or_load("1", async { None }).await, Persona::Investor);
        assert_eq!(cache.get_or_load("2", async { None }).await, Persona::default());
    }

    #[tokio::test]
    async fn test_switch_during_session_load_wins() {
        let cache = PersonaCache::default();
        let (tx, rx) = tokio::sync::oneshot::channel::<Option<Persona>>();
        let load = async { rx.await.ok().flatten() };

        let (persona, ()) = tokio::join!(cache.get_or_load("1", load), async {
            cache.set("1", Persona::Investor).await;
            let _ = tx.send(Some(Persona::ProductManager));
        });

        assert_eq!(persona, Persona::Investor);
        assert_eq!(cache.get_or_load("1", async { None }).await, Persona::Investor);
    }

    fn ada() -> UserProfile {
        UserProfile {
            user_id: "1".into(),
            username: Some("ada".into()),
            first_name: Some("Ada".into()),
        }
    }

    /// Every reserved char outside bold/italic markers is escaped.
    fn assert_markdown_safe(markdown: &str) {
        let mut chars = markdown.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                assert!(chars.next().is_some(), "dangling backslash in {markdown:?}");
            } else if c != '*' && c != '_' {
                assert!(!RESERVED.contains(&c), "unescaped {c:?} in {markdown:?}");
            }
        }
    }

    #[test]
    fn test_welcome_text() {
        let text = welcome_text(&ada());
        assert_markdown_safe(&text);
        let plain = to_plain(&text);
        assert!(plain.contains("Hello Ada."));
        assert!(plain.contains("Product Manager\nStrategic product development guidance"));
        assert!(plain.ends_with("Choose your advisor to begin:"));
    }

    #[test]
    fn test_selected_text_lists_start_prompts() {
        let text = selected_text(Persona::Investor);
        assert_markdown_safe(&text);
        let plain = to_plain(&text);
        for prompt in Persona::Investor.start_prompts() {
            assert!(plain.contains(&format!("- {prompt}")));
        }
        assert!(plain.contains("/pm or /vc"));
    }

    #[test]
    fn test_help_text() {
        let text = help_text(Some("@founder"));
        assert_markdown_safe(&text);
        assert!(to_plain(&text).contains("- /export - Download your conversation"));
        assert!(to_plain(&text).ends_with("Report bugs or suggestions to @founder"));
        assert!(!to_plain(&help_text(None)).contains("Report bugs"));
    }

    #[test]
    fn test_favorite_persona() {
        let mut stats = UserStats { pm_messages: 3, vc_messages: 1, ..Default::default() };
        assert_eq!(favorite_persona(&stats), "🚀 Product Manager");
        stats.vc_messages = 5;
        assert_eq!(favorite_persona(&stats), "🦈 VC/Angel");
        stats.pm_messages = 5;
        assert_eq!(favorite_persona(&stats), "Both equally!");
    }

    #[test]
    fn test_stats_text() {
        let stats = UserStats {
            total_messages: 4,
            pm_messages: 3,
            vc_messages: 1,
            first_message_date: Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()),
        };
        let text = stats_text(&ada(), &stats, None);
        assert_markdown_safe(&text);
        let plain = to_plain(&text);
        assert!(plain.contains("Member Since: March 05, 2024"));
        assert!(plain.contains("Total Messages: 4\n├─ 🚀 PM: 3\n└─ 🦈 VC: 1"));
        assert!(plain.contains("Favorite: 🚀 Product Manager"));
        assert!(days_active(&stats) > 0);
    }

    #[test]
    fn test_stats_text_new_user() {
        let text = stats_text(&ada(), &UserStats::default(), Some("@founder"));
        let plain = to_plain(&text);
        assert!(plain.contains("Member Since: Today"));
        assert!(plain.contains("Days Active: 0"));
        assert!(plain.ends_with("Beta version • Feedback: @founder"));
    }
}
