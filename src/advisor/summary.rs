//! Conversation continuity and periodic progress summaries.

use std::sync::LazyLock;

use regex::Regex;

use super::store::{ConversationTurn, Role};
use crate::format::markup::{bold, escape, italic};
use crate::openrouter::Message;

/// Topics tracked for the continuity prefix, in priority order.
pub const TOPIC_KEYWORDS: [&str; 8] = [
    "product", "users", "market", "growth", "revenue", "competition", "funding", "team",
];

/// History length above which replies get a continuity prefix.
pub const CONTINUITY_MIN_TURNS: usize = 4;

/// Turns fed to the summary model.
pub const SUMMARY_WINDOW: usize = 8;

pub const MAX_QUERY_CHARS: usize = 300;

const SUMMARY_PROMPT: &str = "Summarize this startup advisory session in 3 bullet points:
- Key insight discovered
- Main challenge identified
- Next action to take
Keep each point under 15 words.";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// "Building on our discussion about ..." when the history mentions tracked topics.
pub fn continuity_prefix(history: &[ConversationTurn]) -> Option<String> {
    if history.len() <= CONTINUITY_MIN_TURNS {
        return None;
    }
    let user_text: Vec<String> = history
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.message.to_lowercase())
        .collect();

    let topics: Vec<&str> = TOPIC_KEYWORDS
        .iter()
        .copied()
        .filter(|k| user_text.iter().any(|m| m.contains(k)))
        .take(3)
        .collect();

    if topics.is_empty() {
        None
    } else {
        Some(format!("Building on our discussion about {}... ", topics.join(", ")))
    }
}

/// The user message as sent to the model, with continuity context when available.
pub fn contextualize(message: &str, prefix: Option<&str>) -> String {
    match prefix {
        Some(p) => format!("[Continue from previous discussion: {p}]\n\nUser says: {message}"),
        None => message.to_string(),
    }
}

/// Prompt for the summary model over the most recent turns.
pub fn summary_messages(history: &[ConversationTurn]) -> Vec<Message> {
    let start = history.len().saturating_sub(SUMMARY_WINDOW);
    let mut session = String::new();
    for turn in &history[start..] {
        let who = match turn.role {
            Role::User => "User",
            Role::Assistant => "Advisor",
        };
        let excerpt: String = turn.message.chars().take(200).collect();
        session.push_str(&format!("{who}: {excerpt}...\n"));
    }
    vec![
        Message::system(SUMMARY_PROMPT),
        Message::user(format!("Session: {session}")),
    ]
}

/// MarkdownV2 card wrapping a progress summary.
pub fn summary_card(summary: &str, every: usize) -> String {
    format!(
        "📊 {}\n\n{}\n\n{}",
        bold(&format!("Progress Summary (Last {every} exchanges):")),
        escape(summary.trim()),
        italic("Keep going! What's your next question?"),
    )
}

/// Whether the `count`th user message should trigger a summary.
pub fn summary_due(count: usize, every: usize) -> bool {
    every > 0 && count > 0 && count % every == 0
}

/// Query text as stored for analytics: trimmed, lowercased, single-spaced, capped.
pub fn normalize_query(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ").to_lowercase();
    collapsed.chars().take(MAX_QUERY_CHARS).collect()
}
