//! Citation markers and reference blocks in model output.
//!
//! Models emit sources in two shapes: a trailing `References:` block with
//! `[n] Title - URL` entries, or a `Sources:` section of numbered lines
//! referenced by grouped markers like `[1,2]`. Both feed one reference table,
//! and inline markers are rewritten in a single pass under one
//! [`UnresolvedCitations`] policy.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::debug;

/// A resolved source for a citation index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

/// Citation index (digits, as written) -> source.
pub type ReferenceTable = BTreeMap<String, Reference>;

/// What to do with a marker whose index has no reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedCitations {
    /// Leave `[n]` in the text.
    #[default]
    Preserve,
    /// Remove the marker.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationMode {
    /// Resolve markers against reference blocks and rewrite them as links.
    #[default]
    Link,
    /// Remove every numeric marker without touching reference blocks.
    Strip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct CitationSettings {
    #[serde(default)]
    pub mode: CitationMode,
    #[serde(default)]
    pub unresolved: UnresolvedCitations,
}

static REFERENCE_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[(\d+)\]|(\d+)\.)\s*(.+?)\s+[-–—]\s+(https?://\S+)\s*$").expect("valid regex")
});

static NUMBERED_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[?(\d+)[\].)]\s*(.*)$").expect("valid regex"));

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)").expect("valid regex"));

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([ \t]*)\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid regex"));

static MARKER_AT_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+(?:\s*,\s*\d+)*\]$").expect("valid regex"));

static MARKER_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*(?:\[\d+(?:\s*,\s*\d+)*\])+").expect("valid regex"));

static BLOCK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:references|sources|citations):").expect("valid regex"));

/// Grouped sections must open the line: "Sources:", "## Sources:", "**Source:**".
static SOURCES_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[\s#*_]*sources?:").expect("valid regex"));

const BLOCK_HEADINGS: [&str; 3] = ["references", "sources", "citations"];

const SOURCES_HEADINGS: [&str; 2] = ["sources", "source"];

/// Apply the configured citation handling to `text`.
pub fn normalize_citations(text: &str, settings: &CitationSettings) -> String {
    match settings.mode {
        CitationMode::Strip => strip_citation_markers(text),
        CitationMode::Link => {
            let (content, mut refs) = extract_trailing_references(text);
            let (content, grouped) = extract_sources_section(&content);
            for (index, reference) in grouped {
                refs.entry(index).or_insert(reference);
            }
            if refs.is_empty() {
                return content;
            }
            debug!("Resolving citations against {} references", refs.len());
            resolve_markers(&content, &refs, settings.unresolved)
        }
    }
}

/// Strip heading/emphasis decoration and lowercase, e.g. `## **Sources:**` -> `sources:`.
fn marker_key(line: &str) -> String {
    line.trim()
        .trim_matches(|c: char| c == '#' || c == '*' || c == '_' || c.is_whitespace())
        .to_lowercase()
}

/// Text after the marker keyword when `line` introduces a reference block.
///
/// A line containing `keyword:` anywhere counts ("Here are the references:"),
/// as does a bare heading such as `## References` or `**Sources**:`.
fn block_marker<'a>(line: &'a str, pattern: &Regex, headings: &[&str]) -> Option<&'a str> {
    if let Some(m) = pattern.find(line) {
        return Some(&line[m.end()..]);
    }
    let key = marker_key(line);
    let key = key.trim_end_matches(['*', '_', ':']);
    headings.contains(&key).then_some("")
}

/// Trailing-block style: everything after a `References:`/`Sources:`/`Citations:`
/// line is parsed as `[n] Title - URL` or `n. Title - URL`.
///
/// The block is only cut when at least one entry parses, so a prose line that
/// happens to start with "Sources:" is left alone.
pub fn extract_trailing_references(text: &str) -> (String, ReferenceTable) {
    let lines: Vec<&str> = text.lines().collect();

    for (marker, line) in lines.iter().enumerate() {
        // Entries sometimes share the marker line: "Sources: [1] Title - URL"
        let Some(inline_tail) = block_marker(line, &BLOCK_MARKER, &BLOCK_HEADINGS) else {
            continue;
        };

        let mut refs = ReferenceTable::new();
        for candidate in std::iter::once(inline_tail).chain(lines[marker + 1..].iter().copied()) {
            if let Some(caps) = REFERENCE_ENTRY.captures(candidate) {
                let index = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
                refs.entry(index.to_string()).or_insert_with(|| Reference {
                    title: caps[3].trim().to_string(),
                    url: caps[4].to_string(),
                });
            }
        }

        if !refs.is_empty() {
            let content = lines[..marker].join("\n").trim_end().to_string();
            return (content, refs);
        }
    }

    (text.to_string(), ReferenceTable::new())
}

/// Grouped-citation style: a `Sources:` line followed by numbered lines.
/// The section ends at the first blank line or repeated index once entries
/// have started. It is removed and content after it is kept.
pub fn extract_sources_section(text: &str) -> (String, ReferenceTable) {
    let lines: Vec<&str> = text.lines().collect();

    for (marker, line) in lines.iter().enumerate() {
        if block_marker(line, &SOURCES_MARKER, &SOURCES_HEADINGS).is_none() {
            continue;
        }

        let mut refs = ReferenceTable::new();
        let mut end = marker + 1;
        while end < lines.len() {
            let candidate = lines[end];
            if candidate.trim().is_empty() {
                if !refs.is_empty() {
                    break;
                }
                end += 1;
                continue;
            }
            let Some(caps) = NUMBERED_SOURCE.captures(candidate) else {
                break;
            };
            if refs.contains_key(&caps[1]) {
                break;
            }
            refs.insert(caps[1].to_string(), parse_source(&caps[2]));
            end += 1;
        }

        if refs.is_empty() {
            continue;
        }

        let mut kept: Vec<&str> = lines[..marker].to_vec();
        while kept.last().is_some_and(|l| l.trim().is_empty()) {
            kept.pop();
        }
        let rest: Vec<&str> = lines[end..].iter().copied().skip_while(|l| l.trim().is_empty()).collect();
        if !rest.is_empty() {
            kept.push("");
            kept.extend(rest);
        }
        return (kept.join("\n").trim_end().to_string(), refs);
    }

    (text.to_string(), ReferenceTable::new())
}

fn parse_source(entry: &str) -> Reference {
    if let Some(caps) = MARKDOWN_LINK.captures(entry) {
        return Reference {
            title: caps[1].trim().to_string(),
            url: caps[2].to_string(),
        };
    }

    let url = URL.find(entry).map(|m| m.as_str().to_string());
    let title = match URL.find(entry) {
        Some(m) => format!("{}{}", &entry[..m.start()], &entry[m.end()..]),
        None => entry.to_string(),
    };
    let title = title.trim().trim_matches(|c: char| matches!(c, '-' | '–' | '—' | ':' | '|') || c.is_whitespace());

    Reference {
        title: if title.is_empty() { "Source".to_string() } else { title.to_string() },
        url: url.unwrap_or_else(|| "#".to_string()),
    }
}

/// Rewrite `[n]`, `[1][2]` and `[1,2]` markers as `[title](url)` links.
///
/// Spacing is fixed only around each rewritten marker; the rest of the text
/// is left byte for byte.
pub fn resolve_markers(text: &str, refs: &ReferenceTable, policy: UnresolvedCitations) -> String {
    MARKER
        .replace_all(text, |caps: &Captures| {
            let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
            let before = &text[..start];
            let after = &text[end..];
            let lead = &caps[1];
            // `[3](https://...)` is already a link, not a citation.
            if after.starts_with('(') {
                return caps[0].to_string();
            }

            let mut linked = false;
            let parts: Vec<String> = caps[2]
                .split(',')
                .map(str::trim)
                .filter_map(|index| match refs.get(index) {
                    Some(r) => {
                        linked = true;
                        Some(format!("[{}]({})", r.title, r.url))
                    }
                    None => match policy {
                        UnresolvedCitations::Preserve => Some(format!("[{index}]")),
                        UnresolvedCitations::Drop => None,
                    },
                })
                .collect();

            if parts.is_empty() {
                return rejoin(lead, after);
            }
            let joined = parts.join(" ");
            let separate = before.ends_with(|c: char| !c.is_whitespace())
                && (linked || MARKER_AT_END.is_match(before));
            let mut out = if lead.is_empty() && separate {
                format!(" {joined}")
            } else {
                format!("{lead}{joined}")
            };
            if linked && after.starts_with(char::is_alphanumeric) {
                out.push(' ');
            }
            out
        })
        .into_owned()
}

/// What replaces a removed marker: its leading space only when a word follows,
/// so "two [9]." becomes "two." and "a [9] b" stays "a b".
fn rejoin(lead: &str, after: &str) -> String {
    if after.starts_with(char::is_alphanumeric) {
        lead.to_string()
    } else {
        String::new()
    }
}

/// Remove every numeric citation marker outright.
pub fn strip_citation_markers(text: &str) -> String {
    MARKER_RUN
        .replace_all(text, |caps: &Captures| {
            let end = caps.get(0).map_or(0, |m| m.end());
            let after = &text[end..];
            if after.starts_with('(') {
                return caps[0].to_string();
            }
            let run = &caps[0];
            let lead = &run[..run.len() - run.trim_start().len()];
            rejoin(lead, after)
        })
        .into_owned()
}
