//! Response post-processing.
//!
//! Raw model text flows through citations -> tables -> structure, then gets a
//! persona header. Escaping and chunking for Telegram happen at send time in
//! [`markup`].

pub mod citations;
pub mod markup;
pub mod structure;
pub mod tables;

#[cfg(test)]
mod tests;

use serde::Deserialize;

use crate::persona::Persona;
pub use citations::{CitationMode, CitationSettings, UnresolvedCitations};

/// Knobs for [`format_response`].
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FormatOptions {
    #[serde(default)]
    pub citations: CitationSettings,
}

/// Turn raw model output into the clean text stored and sent to the user.
pub fn format_response(raw: &str, persona: Persona, options: &FormatOptions) -> String {
    let text = citations::normalize_citations(raw.trim(), &options.citations);
    let text = tables::flatten_tables(&text);
    let body = structure::reformat(&text);
    format!("{} Response:\n\n{}", persona.glyph(), body)
}
