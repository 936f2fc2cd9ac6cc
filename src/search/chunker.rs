//! Fixed-size overlapping text windows.
//!
//! Windows start at offsets `0, size-overlap, 2*(size-overlap), ...`, each
//! `size` characters long with the last one truncated to the remaining
//! length. Offsets count Unicode scalar values, not bytes, so a window never
//! splits a code point.

/// Split `text` into overlapping windows of `size` characters.
///
/// Pure and deterministic. Empty input yields no windows.
///
/// # Panics
///
/// Panics when `overlap >= size`. That combination means a zero or negative
/// stride and an unterminating loop; [`crate::config::EngineConfig::validate`]
/// rejects it at startup, so reaching the panic is a caller bug.
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(
        size > 0 && overlap < size,
        "chunk window requires overlap ({overlap}) < size ({size})"
    );

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let stride = size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    windows
}

/// Number of windows [`chunk`] produces for a text of `len` characters.
pub fn chunk_count(len: usize, size: usize, overlap: usize) -> usize {
    assert!(size > 0 && overlap < size);
    if len == 0 {
        return 0;
    }
    if len <= size {
        return 1;
    }
    let stride = size - overlap;
    (len - overlap).div_ceil(stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_windows() {
        assert!(chunk("", 10, 2).is_empty());
        assert_eq!(chunk_count(0, 10, 2), 0);
    }

    #[test]
    fn short_text_is_a_single_window() {
        let windows = chunk("hello", 10, 2);
        assert_eq!(windows, vec!["hello".to_string()]);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text = "abcdefghij";
        let windows = chunk(text, 4, 2);
        assert_eq!(windows, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn last_window_is_truncated() {
        let windows = chunk("abcdefg", 4, 1);
        assert_eq!(windows, vec!["abcd", "defg", "g"]);
    }

    #[test]
    fn every_character_is_covered() {
        let text: String = ('a'..='z').cycle().take(257).collect();
        for (size, overlap) in [(16, 4), (50, 25), (257, 0), (300, 10)] {
            let windows = chunk(&text, size, overlap);
            let covered: usize = {
                let stride = size - overlap;
                let mut seen = vec![false; text.chars().count()];
                for (w, window) in windows.iter().enumerate() {
                    let start = w * stride;
                    for i in start..start + window.chars().count() {
                        seen[i] = true;
                    }
                }
                seen.iter().filter(|&&s| s).count()
            };
            assert_eq!(covered, 257, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn window_count_matches_closed_form() {
        for len in [1usize, 5, 99, 100, 101, 250, 1000] {
            let text: String = std::iter::repeat('x').take(len).collect();
            for (size, overlap) in [(100, 0), (100, 20), (40, 39)] {
                let windows = chunk(&text, size, overlap);
                assert_eq!(
                    windows.len(),
                    chunk_count(len, size, overlap),
                    "len={len} size={size} overlap={overlap}"
                );
            }
        }
    }

    #[test]
    fn multibyte_text_never_splits_code_points() {
        let text = "日本語のテキストを分割する".repeat(3);
        let windows = chunk(&text, 7, 2);
        let total: usize = windows.iter().map(|w| w.chars().count()).sum();
        assert!(total >= text.chars().count());
    }

    #[test]
    #[should_panic]
    fn overlap_equal_to_size_panics() {
        chunk("abc", 4, 4);
    }
}
