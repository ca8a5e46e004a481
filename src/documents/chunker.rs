// Recursive character splitter
//
// Windows of at most `chunk_size` chars; each window after the first starts
// exactly `overlap` chars before the previous one ended. The cut point is
// the latest break of the most preferred kind inside the window:
// paragraph, then line or sentence end, then word, then a hard cut.
// Positions are counted in chars, not bytes.

use anyhow::{bail, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Break candidates, most preferred tier first
const SEPARATOR_TIERS: &[&[&str]] = &[&["\n\n"], &["\n", ". ", "! ", "? "], &[" "]];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("Chunk size must be positive");
        }
        if overlap >= chunk_size {
            bail!("Chunk overlap ({}) must be smaller than chunk size ({})", overlap, chunk_size);
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping chunks. Empty text yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        if chars.is_empty() {
            return chunks;
        }

        let mut start = 0;
        loop {
            if chars.len() - start <= self.chunk_size {
                chunks.push(chars[start..].iter().collect());
                break;
            }

            let end = self.find_break(&chars, start);
            chunks.push(chars[start..end].iter().collect());
            start = end - self.overlap;
        }

        chunks
    }

    /// Cut point in `(start + overlap, start + chunk_size]`
    fn find_break(&self, chars: &[char], start: usize) -> usize {
        let lowest = start + self.overlap + 1;
        let highest = start + self.chunk_size;

        for tier in SEPARATOR_TIERS {
            let best = tier
                .iter()
                .filter_map(|sep| last_break_before(chars, sep, lowest, highest))
                .max();
            if let Some(end) = best {
                return end;
            }
        }

        highest
    }
}

/// Largest `end` in `[lowest, highest]` such that `chars[..end]` ends with `sep`
fn last_break_before(chars: &[char], sep: &str, lowest: usize, highest: usize) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    (lowest.max(sep.len())..=highest)
        .rev()
        .find(|&end| chars[end - sep.len()..end] == sep[..])
}
