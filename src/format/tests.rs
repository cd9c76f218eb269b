//! End-to-end tests for the response pipeline.
//!
//! Run with: cargo test format

use super::*;
use crate::format::markup::{chunk, escape, to_plain};
use crate::format::structure::CALL_TO_ACTION;

fn pm(raw: &str) -> String {
    format_response(raw, Persona::ProductManager, &FormatOptions::default())
}

// =============================================================================
// HEADER & CALL TO ACTION
// =============================================================================

mod header {
    use super::*;

    #[test]
    fn test_persona_glyph_prefix() {
        assert!(pm("Hi.").starts_with("🚀 Response:\n\n"));
        let vc = format_response("Hi.", Persona::Investor, &FormatOptions::default());
        assert!(vc.starts_with("💰 Response:\n\n"));
    }

    #[test]
    fn test_call_to_action_added() {
        let out = pm("Focus on one segment.");
        assert!(out.ends_with(CALL_TO_ACTION));
    }

    #[test]
    fn test_no_duplicate_next_step() {
        let out = pm("Think hard.\n\nNext Step: interview five users this week.");
        assert!(!out.contains(CALL_TO_ACTION));
        assert_eq!(out.to_lowercase().matches("next step").count(), 1);
    }

    #[test]
    fn test_empty_input_still_has_call_to_action() {
        assert_eq!(pm("   "), format!("🚀 Response:\n\n{CALL_TO_ACTION}"));
    }
}

// =============================================================================
// CITATIONS & TABLES THROUGH THE PIPELINE
// =============================================================================

mod content {
    use super::*;

    #[test]
    fn test_reference_block_rendered_inline() {
        let out = pm("[1] fact.\n\nSources:\n1. Title - http://x.com");
        assert!(out.contains("Title - http://x.com"));
        assert!(!out.contains("[1]"));
        assert!(!out.contains("Sources:"));
    }

    #[test]
    fn test_table_becomes_bullet() {
        let out = pm("| A | B |\n|---|---|\n| 1 | 2 |");
        assert!(out.contains("\n- A: 1; B: 2"));
        assert!(!out.contains('|'));
    }

    #[test]
    fn test_strip_mode_through_pipeline() {
        let options = FormatOptions {
            citations: CitationSettings {
                mode: CitationMode::Strip,
                ..Default::default()
            },
        };
        let out = format_response("Retention beats acquisition [1][2].", Persona::Investor, &options);
        assert!(out.contains("Retention beats acquisition."));
    }
}

// =============================================================================
// STRUCTURE
// =============================================================================

mod structure_rules {
    use super::*;

    #[test]
    fn test_realistic_answer() {
        let raw = "## Diagnosis\n\
                   **Your retention** is the _real_ problem — not acquisition.\n\
                   * Weekly actives dropped\n\
                   • Churn is 8%\n\
                   ---\n\
                   What job are users hiring you for? Who churns first?\n\
                   Why now?";
        let out = pm(raw);

        assert!(out.contains("\n\nDiagnosis\n\n"));
        assert!(out.contains("Your retention is the real problem - not acquisition."));
        assert!(out.contains("- Weekly actives dropped\n- Churn is 8%"));
        assert!(!out.contains('*'));
        assert!(!out.contains('#'));
        assert!(out.contains("1. What job are users hiring you for? Who churns first?\n2. Why now?"));
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn test_question_line_numbering() {
        let raw = "Who is the buyer?\nWhat is the budget?\nHow long is the cycle?";
        let out = pm(raw);
        assert!(out.contains("1. Who is the buyer?\n2. What is the budget?\n3. How long is the cycle?"));
    }

    #[test]
    fn test_long_paragraph_reflowed() {
        let sentence = "Retention is the leading indicator that matters most at your stage of growth";
        let raw = format!("{sentence}. {sentence}. {sentence}.");
        let out = pm(&raw);
        let body_lines: Vec<&str> = out.lines().filter(|l| l.starts_with("Retention")).collect();
        assert_eq!(body_lines.len(), 3);
        assert!(out.lines().all(|l| l.chars().count() <= 160));
    }
}

// =============================================================================
// SENDING
// =============================================================================

mod sending {
    use super::*;

    #[test]
    fn test_escaped_chunks_fit_and_degrade_to_plain() {
        let raw = "Why now? ".repeat(20) + &"Market data [1]. ".repeat(400) + "\n\nReferences:\n[1] CB Insights - https://cbinsights.com/r_1";
        let formatted = pm(&raw);
        let chunks = chunk(&escape(&formatted), 4000);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4000));

        let plain: String = chunks.iter().map(|c| to_plain(c)).collect::<Vec<_>>().concat();
        assert!(plain.contains("CB Insights - https://cbinsights.com/r_1"));
    }
}
