//! Structural clean-up of model output.
//!
//! Each stage is a pure `&str -> String` function; [`reformat`] folds them in
//! the order listed in [`STAGES`].

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::trace;

/// Non-bullet lines longer than this (in chars) are split into sentences.
pub const LONG_LINE_THRESHOLD: usize = 160;

/// Questions beyond this count become bullets instead of numbered items.
pub const MAX_NUMBERED_QUESTIONS: usize = 7;

pub const CALL_TO_ACTION: &str =
    "💡 Next Step: Reflect on the above questions and share your thoughts on the most challenging one.";

pub type Stage = fn(&str) -> String;

pub const STAGES: &[(&str, Stage)] = &[
    ("links", links_to_plain),
    ("headings", promote_headings),
    ("rules", rules_to_breaks),
    ("dashes", normalize_dashes),
    ("emphasis", strip_emphasis),
    ("reflow", reflow_long_lines),
    ("questions", number_questions),
    ("bullets", normalize_bullets),
    ("paragraphs", paragraph_breaks),
    ("spacing", collapse_blank_lines),
    ("call_to_action", ensure_call_to_action),
];

/// Run every stage in order.
pub fn reformat(text: &str) -> String {
    STAGES.iter().fold(text.to_string(), |acc, (name, stage)| {
        let next = stage(&acc);
        trace!(stage = *name, len = next.len(), "format stage");
        next
    })
}

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("valid regex"));

static INLINE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s#])[ \t]+(#{1,6}[ \t]+)").expect("valid regex"));

static BLOCK_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").expect("valid regex"));

static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:-{3,}|_{3,}|\*{3,})[ \t]*$").expect("valid regex"));

static DASH_AFTER_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])[ \t]+-[ \t]+").expect("valid regex"));

static LEADING_DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*-[ \t]+").expect("valid regex"));

static STAR_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)[*•][ \t]+").expect("valid regex"));

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?][ \t]+").expect("valid regex"));

static NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)][ \t]+").expect("valid regex"));

static BULLET_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*][ \t]+|•[ \t]*)").expect("valid regex"));

static EXCESS_BLANKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn is_bullet(line: &str) -> bool {
    line.trim_start().starts_with("- ")
}

fn is_numbered(line: &str) -> bool {
    NUMBERED.is_match(line.trim_start())
}

fn leading_number(line: &str) -> Option<usize> {
    let digits: String = line.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn ends_sentence(line: &str) -> bool {
    line.ends_with(['.', '!', '?'])
}

/// `[title](url)` -> `title - url`.
pub fn links_to_plain(text: &str) -> String {
    MARKDOWN_LINK
        .replace_all(text, |caps: &Captures| {
            let title = &caps[1];
            let url = &caps[2];
            if url == "#" {
                title.to_string()
            } else {
                format!("{title} - {url}")
            }
        })
        .into_owned()
}

/// `## Heading` (at line start or mid-line) -> a bare line framed by blank lines.
pub fn promote_headings(text: &str) -> String {
    let split = INLINE_HEADING.replace_all(text, "${1}\n${2}");
    BLOCK_HEADING.replace_all(&split, "\n${1}\n").into_owned()
}

pub fn rules_to_breaks(text: &str) -> String {
    HORIZONTAL_RULE.replace_all(text, "").into_owned()
}

/// Em/en dashes become hyphens; a ` - ` after a finished sentence starts a bullet.
pub fn normalize_dashes(text: &str) -> String {
    let text = text.replace(['—', '–'], "-");
    let text = DASH_AFTER_SENTENCE.replace_all(&text, "${1}\n- ");
    LEADING_DASH.replace_all(&text, "- ").into_owned()
}

/// Drop `*`, `_` and backticks. URLs keep their characters and `* item` bullets
/// are rewritten to `- item` first so they survive.
pub fn strip_emphasis(text: &str) -> String {
    let text = STAR_BULLET.replace_all(text, "${1}- ");

    let strip = |segment: &str| -> String {
        segment.chars().filter(|c| !matches!(c, '*' | '_' | '`')).collect()
    };

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for url in URL.find_iter(&text) {
        out.push_str(&strip(&text[last..url.start()]));
        out.push_str(url.as_str());
        last = url.end();
    }
    out.push_str(&strip(&text[last..]));
    out
}

fn split_sentences(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(line) {
        let next = line[m.end()..].chars().next();
        let starts_sentence = next.is_some_and(|c| {
            c.is_uppercase() || c.is_ascii_digit() || matches!(c, '(' | '"' | '\'' | '“')
        });
        if starts_sentence {
            // The punctuation char is ASCII, so +1 stays on a char boundary.
            parts.push(line[start..m.start() + 1].trim().to_string());
            start = m.end();
        }
    }
    parts.push(line[start..].trim().to_string());
    parts.retain(|part| !part.is_empty());
    parts
}

/// Break overly long prose lines at sentence boundaries.
pub fn reflow_long_lines(text: &str) -> String {
    text.lines()
        .flat_map(|line| {
            if line.chars().count() > LONG_LINE_THRESHOLD && !is_bullet(line) && !is_numbered(line) {
                split_sentences(line)
            } else {
                vec![line.to_string()]
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number the first questions, bullet the rest.
pub fn number_questions(text: &str) -> String {
    let mut count = 0;

    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            if !trimmed.ends_with('?') {
                return line.to_string();
            }

            if is_numbered(trimmed) {
                // Later questions continue from the model's own numbering.
                count = leading_number(trimmed).unwrap_or(count + 1);
                return trimmed.to_string();
            }
            count += 1;

            let body = BULLET_MARKER.replace(trimmed, "");
            if count <= MAX_NUMBERED_QUESTIONS {
                format!("{count}. {body}")
            } else {
                format!("- {body}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unify `-`, `*` and `•` bullets as `- ` and separate a new list from prose.
pub fn normalize_bullets(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(marker) = BULLET_MARKER.find(trimmed) else {
            out.push(line.to_string());
            continue;
        };

        let body = trimmed[marker.end()..].trim_end();
        if body.is_empty() {
            continue;
        }

        let after_prose = out
            .last()
            .is_some_and(|prev| !prev.trim().is_empty() && !is_bullet(prev) && !is_numbered(prev));
        if after_prose {
            out.push(String::new());
        }
        out.push(format!("- {body}"));
    }

    out.join("\n")
}

/// Blank line after each finished prose sentence that is followed by content.
pub fn paragraph_breaks(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());

    for (i, &line) in lines.iter().enumerate() {
        out.push(line);
        let trimmed = line.trim();
        let is_prose = !trimmed.is_empty() && !is_bullet(trimmed) && !is_numbered(trimmed);
        if is_prose
            && ends_sentence(trimmed)
            && let Some(next) = lines.get(i + 1)
            && !next.trim().is_empty()
        {
            out.push("");
        }
    }

    out.join("\n")
}

pub fn collapse_blank_lines(text: &str) -> String {
    let trimmed_lines = text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    EXCESS_BLANKS.replace_all(&trimmed_lines, "\n\n").trim().to_string()
}

/// Append [`CALL_TO_ACTION`] unless the text already points at a next step.
pub fn ensure_call_to_action(text: &str) -> String {
    let lower = text.to_lowercase();
    if lower.contains("next step") || lower.contains("action item") {
        return text.to_string();
    }
    if text.trim().is_empty() {
        return CALL_TO_ACTION.to_string();
    }
    format!("{text}\n\n{CALL_TO_ACTION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_to_plain() {
        assert_eq!(
            links_to_plain("Read [Lenny's Newsletter](https://lenny.com/p) and [Notes](#)."),
            "Read Lenny's Newsletter - https://lenny.com/p and Notes."
        );
    }

    #[test]
    fn test_block_heading() {
        assert_eq!(promote_headings("## Growth Loops ##\nText"), "\nGrowth Loops\n\nText");
    }

    #[test]
    fn test_inline_heading_split() {
        let out = promote_headings("Intro text. ### Retention\nBody");
        assert_eq!(out, "Intro text.\n\nRetention\n\nBody");
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        assert_eq!(promote_headings("We shipped #1 on C# today"), "We shipped #1 on C# today");
    }

    #[test]
    fn test_rules_become_blank() {
        assert_eq!(rules_to_breaks("a\n---\nb\n___\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn test_dash_after_sentence_starts_bullet() {
        assert_eq!(
            normalize_dashes("Focus on retention. — Measure weekly actives"),
            "Focus on retention.\n- Measure weekly actives"
        );
    }

    #[test]
    fn test_hyphenated_words_untouched() {
        assert_eq!(normalize_dashes("Jobs-to-be-Done works"), "Jobs-to-be-Done works");
    }

    #[test]
    fn test_strip_emphasis_keeps_urls_and_bullets() {
        let out = strip_emphasis("**Bold** and `code` with _it_\n* item\nsee https://x.io/a_b*c");
        assert_eq!(out, "Bold and code with it\n- item\nsee https://x.io/a_b*c");
    }

    #[test]
    fn test_reflow_long_line() {
        let line = format!(
            "{} is the first sentence. {} is the second one! (Third) starts with a paren.",
            "A".repeat(70),
            "B".repeat(70)
        );
        let out = reflow_long_lines(&line);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("first sentence."));
        assert!(lines[1].ends_with("second one!"));
        assert_eq!(lines[2], "(Third) starts with a paren.");
    }

    #[test]
    fn test_short_line_not_reflowed() {
        assert_eq!(reflow_long_lines("One. Two. Three."), "One. Two. Three.");
    }

    #[test]
    fn test_long_bullet_not_reflowed() {
        let line = format!("- {}. Next sentence here.", "x".repeat(170));
        assert_eq!(reflow_long_lines(&line), line);
    }

    #[test]
    fn test_number_questions() {
        let text = (1..=9).map(|i| format!("Question {i}?")).collect::<Vec<_>>().join("\n");
        let out = number_questions(&text);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "1. Question 1?");
        assert_eq!(lines[6], "7. Question 7?");
        assert_eq!(lines[7], "- Question 8?");
        assert_eq!(lines[8], "- Question 9?");
    }

    #[test]
    fn test_already_numbered_question_kept() {
        let out = number_questions("2. Who pays?\n- Why now?");
        assert_eq!(out, "2. Who pays?\n3. Why now?");
    }

    #[test]
    fn test_numbering_continues_after_existing_number() {
        let out = number_questions("Who pays?\n2. Why now?\nHow big?");
        assert_eq!(out, "1. Who pays?\n2. Why now?\n3. How big?");

        let out = number_questions("2. Who pays?\nWhy now?\nHow big?");
        assert_eq!(out, "2. Who pays?\n3. Why now?\n4. How big?");
    }

    #[test]
    fn test_high_existing_number_ends_numbering() {
        let out = number_questions("7. Last one?\nAnother?");
        assert_eq!(out, "7. Last one?\n- Another?");
    }

    #[test]
    fn test_normalize_bullets_adds_gap_after_prose() {
        let out = normalize_bullets("Key points:\n• first\n* second\n-   third");
        assert_eq!(out, "Key points:\n\n- first\n- second\n- third");
    }

    #[test]
    fn test_negative_number_not_bullet() {
        assert_eq!(normalize_bullets("-5% churn"), "-5% churn");
    }

    #[test]
    fn test_paragraph_breaks() {
        let out = paragraph_breaks("First.\nSecond.\n- bullet.\n- another");
        assert_eq!(out, "First.\n\nSecond.\n\n- bullet.\n- another");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("\n\na  \n\n\n\nb\n\n"), "a\n\nb");
    }

    #[test]
    fn test_call_to_action_appended_once() {
        let once = ensure_call_to_action("Think about churn.");
        assert!(once.ends_with(CALL_TO_ACTION));
        assert_eq!(ensure_call_to_action(&once), once);
    }

    #[test]
    fn test_existing_action_item_respected() {
        let text = "Action Item: ship the pricing page.";
        assert_eq!(ensure_call_to_action(text), text);
    }
}
