//! Conversation export to Markdown and query report export to CSV.

use std::io::{self, Write};

use chrono::{DateTime, Local};

use super::store::{ConversationTurn, QueryRow, Role};

/// Turns included in a `/export` document.
pub const EXPORT_TURNS: usize = 50;

pub const CSV_HEADERS: [&str; 7] = [
    "user_id", "username", "first_name", "agent_type", "query", "tokens_used", "created_at",
];

/// Markdown document for a conversation.
pub fn to_markdown(turns: &[ConversationTurn], first_name: &str, now: DateTime<Local>) -> String {
    let mut md = format!(
        "# Startup Advisory Session\n\n\
         **Date**: {}  \n\
         **User**: {}  \n\
         **Total Messages**: {}\n\n\
         ---\n\n\
         ## Conversation\n\n",
        now.format("%Y-%m-%d"),
        first_name,
        turns.len(),
    );
    for turn in turns {
        let who = match turn.role {
            Role::Assistant => "**Advisor**",
            Role::User => "**You**",
        };
        let date: String = turn.created_at.chars().take(10).collect();
        md.push_str(&format!("\n### {who} ({date})\n\n{}\n\n---\n", turn.message));
    }
    md
}

pub fn markdown_file_name(now: DateTime<Local>) -> String {
    format!("conversation_{}.md", now.format("%Y%m%d_%H%M%S"))
}

pub fn csv_file_name(now: DateTime<Local>) -> String {
    format!("user_queries_{}.csv", now.format("%Y%m%d_%H%M"))
}

/// One CSV field, quoted when it holds a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_record<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(out, "{}", line.join(","))
}

pub fn write_csv_header<W: Write>(out: &mut W) -> io::Result<()> {
    write_record(out, &CSV_HEADERS)
}

pub fn write_csv_rows<W: Write>(out: &mut W, rows: &[QueryRow]) -> io::Result<()> {
    for row in rows {
        let tokens = row.tokens_used.to_string();
        write_record(out, &[
            row.user_id.as_str(),
            row.username.as_deref().unwrap_or(""),
            row.first_name.as_deref().unwrap_or(""),
            row.agent_type.as_str(),
            row.message.as_str(),
            tokens.as_str(),
            row.created_at.as_str(),
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_markdown_layout() {
        let turns = vec![
            ConversationTurn {
                role: Role::User,
                persona: Persona::Investor,
                message: "Is my TAM big enough?".into(),
                tokens_used: 0,
                created_at: "2024-03-01T10:00:00.000000Z".into(),
            },
            ConversationTurn {
                role: Role::Assistant,
                persona: Persona::Investor,
                message: "💰 Response:\n\nShow me the bottom-up math.".into(),
                tokens_used: 120,
                created_at: "2024-03-01T10:00:05.000000Z".into(),
            },
        ];
        let md = to_markdown(&turns, "Ada", now());
        assert!(md.starts_with("# Startup Advisory Session\n\n**Date**: 2024-03-05  \n**User**: Ada  \n**Total Messages**: 2\n"));
        assert!(md.contains("\n### **You** (2024-03-01)\n\nIs my TAM big enough?\n\n---\n"));
        assert!(md.contains("### **Advisor** (2024-03-01)"));
    }

    #[test]
    fn test_file_names() {
        assert_eq!(markdown_file_name(now()), "conversation_20240305_140709.md");
        assert_eq!(csv_file_name(now()), "user_queries_20240305_1407.csv");
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_csv_rows() {
        let rows = vec![QueryRow {
            id: 1,
            user_id: "42".into(),
            username: None,
            first_name: Some("Ada".into()),
            agent_type: "pm".into(),
            message: "churn, retention?".into(),
            tokens_used: 0,
            created_at: "2024-03-01T10:00:00Z".into(),
        }];
        let mut out = Vec::new();
        write_csv_header(&mut out).unwrap();
        write_csv_rows(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "user_id,username,first_name,agent_type,query,tokens_used,created_at\n\
             42,,Ada,pm,\"churn, retention?\",0,2024-03-01T10:00:00Z\n"
        );
    }
}
