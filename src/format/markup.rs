//! Telegram MarkdownV2 escaping and message chunking.
//!
//! `escape` is not idempotent: escaping already-escaped text escapes the
//! backslashes again. Always escape raw text exactly once.

/// Characters MarkdownV2 reserves outside of entities.
pub const RESERVED: [char; 19] = [
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Backslash-escape every reserved character; newlines and everything else pass through.
pub fn escape(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        if RESERVED.contains(&c) {
            result.push('\\');
        }
        result.push(c);
    }
    result
}

/// Plain-text rendering of MarkdownV2 for the no-parse-mode fallback.
///
/// Removes backslash escapes and unescaped emphasis markers, so
/// `to_plain(&escape(t)) == t` for any `t`.
pub fn to_plain(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    result.push(escaped);
                }
            }
            '*' | '_' | '~' => {}
            _ => result.push(c),
        }
    }
    result
}

/// Escaped text wrapped in bold markers.
pub fn bold(text: &str) -> String {
    format!("*{}*", escape(text))
}

pub fn italic(text: &str) -> String {
    format!("_{}_", escape(text))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}

/// True when `text` ends with an unpaired escaping backslash.
fn ends_mid_escape(text: &str) -> bool {
    text.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Split `text` into pieces of at most `limit` chars.
///
/// Prefers the last newline inside the window when it sits at least halfway
/// in, never separates a backslash from the char it escapes (unless the limit
/// leaves no room), and drops newlines at the start of each following piece.
pub fn chunk(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard = byte_offset(rest, limit);
        let window = &rest[..hard];

        let mut cut = match window.rfind('\n') {
            Some(pos) if pos > 0 && window[..pos].chars().count() >= limit / 2 => pos,
            _ => hard,
        };
        // '\\' is one byte, so stepping back one byte stays on a char boundary.
        if cut > 1 && ends_mid_escape(&rest[..cut]) {
            cut -= 1;
        }

        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
