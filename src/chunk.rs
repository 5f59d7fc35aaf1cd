//! Fixed-size overlapping window chunker.
//!
//! Page text is cut into windows of `chunk_chars` characters that start every
//! `chunk_chars - overlap_chars` characters. The last window always ends at
//! the end of the text, so every character lands in at least one window.
//! Lengths are counted in Unicode scalar values; a window never splits a
//! UTF-8 code point.

use uuid::Uuid;

use crate::models::Chunk;

/// Split `text` into overlapping windows.
///
/// Returns an empty vector for empty or whitespace-only text. Callers are
/// expected to validate `overlap_chars < chunk_chars`; if not, the stride is
/// clamped to one character.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    if chunk_chars == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let stride = chunk_chars.saturating_sub(overlap_chars).max(1);

    // Byte offset of every char start, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = bounds.len() - 1;

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_chars).min(char_len);
        windows.push(text[bounds[start]..bounds[end]].to_string());
        if end == char_len {
            break;
        }
        start += stride;
    }

    windows
}

/// Chunk one page's text into [`Chunk`] rows with contiguous `seq` numbers.
pub fn chunk_page(page_id: &str, text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    chunk_text(text, chunk_chars, overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(seq, text)| Chunk {
            id: Uuid::new_v4().to_string(),
            page_id: page_id.to_string(),
            seq: seq as i64,
            text,
            embedding: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_short_text_single_window() {
        let windows = chunk_text("Hello, world!", 800, 100);
        assert_eq!(windows, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chunk_text("", 800, 100).is_empty());
        assert!(chunk_text("   \n\t ", 800, 100).is_empty());
    }

    #[test]
    fn test_windows_have_configured_size() {
        let text = sample(2000);
        let windows = chunk_text(&text, 800, 100);
        // starts at 0, 700, 1400; the third reaches the end
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].chars().count(), 800);
        assert_eq!(windows[1].chars().count(), 800);
        assert_eq!(windows[2].chars().count(), 600);
    }

    #[test]
    fn test_consecutive_windows_overlap() {
        let text = sample(2500);
        let windows = chunk_text(&text, 800, 100);
        for pair in windows.windows(2) {
            let tail: String = pair[0].chars().skip(700).collect();
            let head: String = pair[1].chars().take(100).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_windows_cover_full_input() {
        let text = sample(1234);
        let windows = chunk_text(&text, 300, 50);
        let mut rebuilt = windows[0].clone();
        for w in &windows[1..] {
            rebuilt.extend(w.chars().skip(50));
        }
        assert_eq!(rebuilt, text);
        assert!(text.ends_with(windows.last().unwrap().as_str()));
    }

    #[test]
    fn test_exact_multiple_does_not_emit_empty_tail() {
        let text = sample(800);
        let windows = chunk_text(&text, 800, 100);
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_multibyte_text_is_not_split_mid_char() {
        let text = "ü".repeat(25) + &"日本".repeat(20);
        let windows = chunk_text(&text, 10, 3);
        for w in &windows {
            assert!(w.chars().count() <= 10);
        }
        assert!(text.ends_with(windows.last().unwrap().as_str()));
    }

    #[test]
    fn test_chunk_page_sequences() {
        let chunks = chunk_page("page-1", &sample(1600), 800, 100);
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.seq, i as i64);
            assert_eq!(c.page_id, "page-1");
            assert!(c.embedding.is_none());
        }
    }
}
