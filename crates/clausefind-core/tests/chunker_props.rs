use clausefind_core::chunker::{normalize, window_ranges};
use clausefind_core::config::ChunkingConfig;
use clausefind_core::{Chunker, RawBlock};
use proptest::prelude::*;

fn sentence() -> impl Strategy<Value = String> {
    // Final words of five letters or more never collide with abbreviations.
    (prop::collection::vec("[a-z]{2,8}", 0..6), "[a-z]{5,10}", prop::sample::select(vec!['.', '!', '?']))
        .prop_map(|(words, last, end)| {
            let mut s = words.join(" ");
            if !s.is_empty() {
                s.push(' ');
            }
            s.push_str(&last);
            s.push(end);
            s
        })
}

proptest! {
    #[test]
    fn short_paragraph_is_single_normalized_chunk(text in "[a-zA-Z .,!?\t\n]{0,300}") {
        let chunker = Chunker::new(ChunkingConfig { threshold: 400, window: 4, overlap: 1 }).unwrap();
        let chunks = chunker.chunk(&[RawBlock::paragraph(0, text.clone())]).unwrap();
        let expected = normalize(&text);
        if expected.is_empty() {
            prop_assert!(chunks.is_empty());
        } else {
            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(&chunks[0].text, &expected);
        }
    }

    #[test]
    fn windows_cover_all_sentences_with_exact_overlap(
        sentences in prop::collection::vec(sentence(), 6..24),
        window in 3usize..=5,
        overlap in 1usize..=2,
    ) {
        prop_assume!(sentences.len() > window);
        let chunker = Chunker::new(ChunkingConfig { threshold: 1, window, overlap }).unwrap();
        let chunks = chunker.chunk(&[RawBlock::paragraph(0, sentences.join(" "))]).unwrap();
        let ranges = window_ranges(sentences.len(), window, overlap);

        prop_assert_eq!(chunks.len(), ranges.len());
        prop_assert_eq!(ranges.first().map(|r| r.start), Some(0));
        prop_assert_eq!(ranges.last().map(|r| r.end), Some(sentences.len()));
        for (chunk, range) in chunks.iter().zip(&ranges) {
            prop_assert_eq!(&chunk.text, &sentences[range.clone()].join(" "));
        }
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].end - pair[1].start, overlap);
        }
    }

    #[test]
    fn rechunking_a_short_chunk_is_identity(text in "[a-zA-Z][a-zA-Z .,]{0,200}") {
        let chunker = Chunker::default();
        let first = chunker.chunk(&[RawBlock::paragraph(4, text)]).unwrap();
        prop_assert_eq!(first.len(), 1);
        let again = chunker.chunk(&[RawBlock::paragraph(4, first[0].text.clone())]).unwrap();
        prop_assert_eq!(again, first);
    }
}
