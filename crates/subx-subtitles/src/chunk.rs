//! Sliding-window chunking for translation requests.
//!
//! Line count is the primary split criterion. Short cues are common, so a
//! file can reach thousands of lines well under any character cap, and
//! large line counts make model output drift out of alignment.

use crate::line::total_chars;

/// Character cap per request.
pub const CHAR_LIMIT_SAFE_CAP: usize = 12_000;
/// Lines per chunk.
pub const MAX_LINES_PER_BLOCK: usize = 80;
/// Lines repeated from the previous chunk as context.
pub const OVERLAP_LINES: usize = 20;
/// Inputs at or below this size go out as one chunk.
pub const MIN_LINES_FOR_SPLIT: usize = 100;

/// A window `[start, end)` into the input.
///
/// The first `overlap_count` lines were already covered by the previous
/// chunk and only serve as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
    pub overlap_count: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Index of the first line this chunk is responsible for.
    pub fn new_start(&self) -> usize {
        self.start + self.overlap_count
    }
}

/// Split texts into overlapping windows.
///
/// Every input index is covered as a non-overlap line by exactly one chunk.
pub fn chunk_lines<S: AsRef<str>>(texts: &[S]) -> Vec<Chunk> {
    let total = texts.len();
    if total == 0 {
        return Vec::new();
    }
    if total <= MIN_LINES_FOR_SPLIT && total_chars(texts) <= CHAR_LIMIT_SAFE_CAP {
        return vec![Chunk {
            start: 0,
            end: total,
            overlap_count: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut covered = 0;

    while start < total {
        let mut end = (start + MAX_LINES_PER_BLOCK).min(total);
        while total_chars(&texts[start..end]) > CHAR_LIMIT_SAFE_CAP && end - start > OVERLAP_LINES {
            end -= 10;
        }
        // A shrunken window must still add at least one new line
        if end <= covered {
            end = (covered + 1).min(total);
        }

        chunks.push(Chunk {
            start,
            end,
            overlap_count: covered.saturating_sub(start),
        });

        if end >= total {
            break;
        }
        covered = end;
        start = end.saturating_sub(OVERLAP_LINES).max(chunks.last().map_or(0, |c| c.start + 1));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize, len: usize) -> Vec<String> {
        (0..n).map(|_| "x".repeat(len)).collect()
    }

    fn assert_exact_cover(chunks: &[Chunk], total: usize) {
        let mut next = 0;
        for c in chunks {
            assert_eq!(c.new_start(), next, "gap or double cover at {:?}", c);
            assert!(c.end > c.new_start());
            next = c.end;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn test_small_input_single_chunk() {
        let chunks = chunk_lines(&texts(100, 10));
        assert_eq!(chunks, vec![Chunk { start: 0, end: 100, overlap_count: 0 }]);
        assert!(chunk_lines::<String>(&[]).is_empty());
    }

    #[test]
    fn test_sliding_window_with_overlap() {
        let chunks = chunk_lines(&texts(200, 10));
        assert_eq!(chunks[0], Chunk { start: 0, end: 80, overlap_count: 0 });
        assert_eq!(chunks[1], Chunk { start: 60, end: 140, overlap_count: 20 });
        assert_eq!(chunks[2], Chunk { start: 120, end: 200, overlap_count: 20 });
        assert_exact_cover(&chunks, 200);
    }

    #[test]
    fn test_char_cap_shrinks_window() {
        // 80 lines of 200 chars = 16k chars, over the cap
        let chunks = chunk_lines(&texts(150, 200));
        assert_eq!(chunks[0].len(), 60);
        assert!(chunks.iter().all(|c| c.len() <= MAX_LINES_PER_BLOCK));
        assert_exact_cover(&chunks, 150);
    }

    #[test]
    fn test_huge_lines_still_make_progress() {
        // Every window shrinks to the overlap size; coverage must still advance
        let chunks = chunk_lines(&texts(60, 2_000));
        assert_exact_cover(&chunks, 60);
    }

    #[test]
    fn test_few_lines_over_char_cap_split() {
        let chunks = chunk_lines(&texts(50, 400));
        assert!(chunks.len() > 1);
        assert_exact_cover(&chunks, 50);
    }
}
