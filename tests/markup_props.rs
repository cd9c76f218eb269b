//! Property tests for MarkdownV2 escaping and chunking.
//!
//! Run with: cargo test --test markup_props

use proptest::prelude::*;
use startup_advisor::format::markup::{RESERVED, chunk, escape, to_plain};

fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just('\n'),
            Just('\\'),
            prop::sample::select(RESERVED.to_vec()),
            any::<char>(),
            prop::char::range('a', 'z'),
        ],
        0..400,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn chunks_never_exceed_limit(text in text_strategy(), limit in 1usize..120) {
        for piece in chunk(&text, limit) {
            prop_assert!(piece.chars().count() <= limit);
        }
    }

    #[test]
    fn non_empty_input_yields_a_chunk(text in text_strategy(), limit in 1usize..120) {
        let trimmed_empty = text.trim_start_matches('\n').is_empty();
        if !text.is_empty() && !trimmed_empty {
            prop_assert!(!chunk(&text, limit).is_empty());
        }
    }

    #[test]
    fn chunking_only_drops_boundary_newlines(text in text_strategy(), limit in 1usize..120) {
        let joined: String = chunk(&text, limit).concat();
        let strip = |s: &str| s.chars().filter(|&c| c != '\n').collect::<String>();
        prop_assert_eq!(strip(&joined), strip(&text));
    }

    #[test]
    fn escaped_text_reads_back_as_original(text in text_strategy()) {
        prop_assert_eq!(to_plain(&escape(&text)), text);
    }

    #[test]
    fn escaped_chunks_keep_escape_pairs(text in text_strategy(), limit in 2usize..120) {
        for piece in chunk(&escape(&text), limit) {
            let trailing = piece.chars().rev().take_while(|&c| c == '\\').count();
            prop_assert!(trailing % 2 == 0, "chunk ends mid-escape: {:?}", piece);
        }
    }
}
