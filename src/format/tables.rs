//! Flattens markdown pipe tables into bullet lists.
//!
//! Telegram has no table rendering, so each data row becomes one bullet of
//! `header: value` pairs.

use std::sync::LazyLock;

use regex::Regex;

static SEPARATOR_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|?\s*:?-+:?\s*(?:\|\s*:?-+:?\s*)*\|?\s*$").expect("valid regex")
});

fn is_table_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('|') && (trimmed.starts_with('|') || trimmed.matches('|').count() >= 2)
}

fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Replace every pipe-table block in `text` with a bullet group.
pub fn flatten_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !is_table_line(lines[i]) {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let start = i;
        while i < lines.len() && is_table_line(lines[i]) {
            i += 1;
        }
        let block = &lines[start..i];

        match flatten_block(block) {
            Some(bullets) => {
                out.push(String::new());
                out.extend(bullets);
                out.push(String::new());
            }
            // A lone pipe-heavy line is prose, not a table.
            None => out.extend(block.iter().map(|line| line.to_string())),
        }
    }

    out.join("\n")
}

fn flatten_block(block: &[&str]) -> Option<Vec<String>> {
    let rows: Vec<Vec<String>> = block
        .iter()
        .filter(|line| !SEPARATOR_ROW.is_match(line))
        .map(|line| split_cells(line))
        .collect();

    let (header, data) = rows.split_first()?;
    if data.is_empty() {
        return None;
    }

    Some(data.iter().filter_map(|row| row_to_bullet(header, row)).collect())
}

fn row_to_bullet(header: &[String], row: &[String]) -> Option<String> {
    let body = if row.len() == header.len() {
        header
            .iter()
            .zip(row)
            .filter(|(_, value)| !value.is_empty())
            .map(|(label, value)| {
                if label.is_empty() {
                    value.clone()
                } else {
                    format!("{label}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    } else {
        row.iter()
            .map(String::as_str)
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<_>>()
            .join(" — ")
    };

    (!body.is_empty()).then(|| format!("- {body}"))
}
