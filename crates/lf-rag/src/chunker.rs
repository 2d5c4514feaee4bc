//! Document chunking: split text into units (paragraphs, sentences, or
//! characters) and merge them into chunks honouring `chunk_size` and
//! `chunk_overlap`.

use serde::{Deserialize, Serialize};

use lf_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    Paragraphs,
    Sentences,
    Characters,
}

/// Chunking settings, typically produced by the strategy resolver from the
/// parser's merged config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSettings {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,
}

fn d_chunk_size() -> usize {
    512
}

fn d_chunk_overlap() -> usize {
    50
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            chunk_strategy: ChunkStrategy::default(),
        }
    }
}

impl ChunkSettings {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Split `text` into chunks.
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        self.validate()?;
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = match self.chunk_strategy {
            ChunkStrategy::Characters => self.split_characters(text),
            ChunkStrategy::Paragraphs => self.merge_units(split_paragraphs(text), "\n\n"),
            ChunkStrategy::Sentences => self.merge_units(split_sentences(text), " "),
        };
        Ok(chunks)
    }

    /// Sliding character window with `chunk_size - chunk_overlap` stride,
    /// aligned to char boundaries.
    fn split_characters(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }

    /// Merge pre-split units into chunks no larger than `chunk_size`,
    /// carrying up to `chunk_overlap` characters of trailing units into the
    /// next chunk.  A single unit larger than `chunk_size` becomes its own
    /// chunk (with a warning).
    fn merge_units(&self, units: Vec<&str>, separator: &str) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        let joined_len = |parts: &[&str]| -> usize {
            let sep = separator.len() * parts.len().saturating_sub(1);
            parts.iter().map(|p| p.len()).sum::<usize>() + sep
        };

        for unit in units {
            let added = if current.is_empty() {
                unit.len()
            } else {
                unit.len() + separator.len()
            };

            if current_len + added > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(separator));

                // Keep trailing units within the overlap budget.
                let mut kept: Vec<&str> = Vec::new();
                for piece in current.iter().rev() {
                    let candidate_len =
                        joined_len(&kept) + piece.len() + if kept.is_empty() { 0 } else { separator.len() };
                    if candidate_len > self.chunk_overlap {
                        break;
                    }
                    kept.push(piece);
                }
                kept.reverse();
                current = kept;
                current_len = joined_len(&current);
            }

            if unit.len() > self.chunk_size {
                tracing::warn!(
                    unit_len = unit.len(),
                    chunk_size = self.chunk_size,
                    "unit larger than chunk_size emitted as its own chunk"
                );
            }

            current.push(unit);
            current_len = joined_len(&current);
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }
        chunks
    }
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next_is_boundary = bytes.get(i + 1).map_or(true, |n| n.is_ascii_whitespace());
            if next_is_boundary {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = i + 1;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(size: usize, overlap: usize, strategy: ChunkStrategy) -> ChunkSettings {
        ChunkSettings {
            chunk_size: size,
            chunk_overlap: overlap,
            chunk_strategy: strategy,
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(settings(0, 0, ChunkStrategy::Characters).split("x").is_err());
    }

    #[test]
    fn overlap_not_smaller_than_size_rejected() {
        assert!(settings(10, 10, ChunkStrategy::Characters).split("x").is_err());
        assert!(settings(10, 20, ChunkStrategy::Characters).split("x").is_err());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = settings(10, 0, ChunkStrategy::Paragraphs).split("").unwrap();
        assert!(chunks.is_empty());
    }

    // ── Characters ──────────────────────────────────────────────────

    #[test]
    fn character_chunk_count_matches_ceiling() {
        // 100 chars, size 30, no overlap → ceil(100/30) = 4 chunks.
        let text = "a".repeat(100);
        let chunks = settings(30, 0, ChunkStrategy::Characters).split(&text).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.len() == 30));
        assert_eq!(chunks[3].len(), 10);
    }

    #[test]
    fn character_overlap_repeats_tail() {
        let text = "abcdefghij";
        let chunks = settings(4, 2, ChunkStrategy::Characters).split(text).unwrap();
        assert_eq!(chunks[0], "abcd");
        assert_eq!(chunks[1], "cdef");
        // Concatenating with overlap removed reproduces the input.
        let mut rebuilt = chunks[0].clone();
        for c in &chunks[1..] {
            rebuilt.push_str(&c[2.min(c.len())..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn character_split_respects_utf8_boundaries() {
        let text = "héllo wörld 😎 exactly";
        let chunks = settings(5, 1, ChunkStrategy::Characters).split(text).unwrap();
        // Would panic on a byte-index split; also verify nothing was lost.
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    // ── Paragraphs ──────────────────────────────────────────────────

    #[test]
    fn paragraphs_group_until_size() {
        let text = "first para\n\nsecond para\n\nthird para";
        let chunks = settings(25, 0, ChunkStrategy::Paragraphs).split(text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "first para\n\nsecond para");
        assert_eq!(chunks[1], "third para");
    }

    #[test]
    fn oversized_paragraph_becomes_own_chunk() {
        let big = "x".repeat(100);
        let text = format!("small\n\n{big}\n\nalso small");
        let chunks = settings(20, 0, ChunkStrategy::Paragraphs).split(&text).unwrap();
        assert!(chunks.contains(&big));
    }

    #[test]
    fn paragraph_overlap_carries_tail_units() {
        let text = "aaaa\n\nbbbb\n\ncccc\n\ndddd";
        let chunks = settings(12, 6, ChunkStrategy::Paragraphs).split(text).unwrap();
        // Each chunk after the first starts with the previous chunk's tail.
        assert!(chunks.len() >= 2);
        assert!(chunks[1].starts_with("bbbb"));
    }

    // ── Sentences ───────────────────────────────────────────────────

    #[test]
    fn sentences_split_on_terminators() {
        let text = "One. Two! Three? Four";
        let chunks = settings(10, 0, ChunkStrategy::Sentences).split(text).unwrap();
        let all: String = chunks.join(" ");
        assert!(all.contains("One."));
        assert!(all.contains("Four"));
    }

    #[test]
    fn decimal_points_do_not_split() {
        let text = "Pi is 3.14 approximately. Next sentence.";
        let chunks = settings(100, 0, ChunkStrategy::Sentences).split(text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("3.14 approximately."));
    }
}
