//! Paragraph-aware, word-counted chunking with overlap.
//!
//! Text is split into paragraphs on blank lines and page breaks. Paragraphs are packed greedily
//! into a buffer of at most `chunk_size` words; when the next paragraph does not fit, the buffer
//! is emitted and the next one starts with the trailing `overlap` words of the emitted chunk.
//! A paragraph longer than `chunk_size` is hard-split on word boundaries.

use serde::{Deserialize, Serialize};

use super::PAGE_BREAK;
use super::types::Chunk;
use crate::error::{MemoryError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const DEFAULT_CHUNK_OVERLAP: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum words per chunk.
    pub chunk_size: usize,
    /// Words repeated from the end of one chunk at the start of the next.
    pub overlap: usize,
    /// Never let a chunk span a page break.
    pub respect_pages: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            respect_pages: false,
        }
    }
}

impl ChunkConfig {
    /// # Errors
    ///
    /// Returns `InvalidChunkConfig` unless `overlap < chunk_size`.
    pub fn validate(&self) -> Result<()> {
        if self.overlap >= self.chunk_size {
            return Err(MemoryError::InvalidChunkConfig {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

enum Block<'a> {
    Paragraph(Vec<&'a str>),
    PageBreak,
}

fn blocks(text: &str) -> Vec<Block<'_>> {
    let mut out = Vec::new();
    for (page_no, page) in text.split(PAGE_BREAK.trim_matches('\n')).enumerate() {
        if page_no > 0 {
            out.push(Block::PageBreak);
        }
        let mut words = Vec::new();
        for line in page.lines() {
            if line.trim().is_empty() {
                if !words.is_empty() {
                    out.push(Block::Paragraph(std::mem::take(&mut words)));
                }
            } else {
                words.extend(line.split_whitespace());
            }
        }
        if !words.is_empty() {
            out.push(Block::Paragraph(words));
        }
    }
    out
}

/// Running chunk buffer: paragraph segments plus whether it holds unemitted words.
struct Packer<'a> {
    size: usize,
    overlap: usize,
    segments: Vec<Vec<&'a str>>,
    words: usize,
    fresh: bool,
    out: Vec<String>,
}

impl<'a> Packer<'a> {
    fn new(config: ChunkConfig) -> Self {
        Self {
            size: config.chunk_size,
            overlap: config.overlap,
            segments: Vec::new(),
            words: 0,
            fresh: false,
            out: Vec::new(),
        }
    }

    fn render(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.join(" "))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Emit the buffer if it holds new words and keep its last `overlap` words.
    fn emit(&mut self) {
        if !self.fresh {
            return;
        }
        self.out.push(self.render());
        self.fresh = false;

        let mut needed = self.overlap;
        let mut carry = Vec::new();
        for segment in self.segments.iter().rev() {
            if needed == 0 {
                break;
            }
            let take = needed.min(segment.len());
            carry.push(segment[segment.len() - take..].to_vec());
            needed -= take;
        }
        carry.reverse();
        self.words = self.overlap - needed;
        self.segments = carry;
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.words = 0;
        self.fresh = false;
    }

    /// Drop carried words from the front until `incoming` more words fit.
    fn shrink_carry(&mut self, incoming: usize) {
        let mut excess = (self.words + incoming).saturating_sub(self.size);
        while excess > 0 && !self.segments.is_empty() {
            let first = &mut self.segments[0];
            let take = excess.min(first.len());
            first.drain(..take);
            self.words -= take;
            excess -= take;
            if first.is_empty() {
                self.segments.remove(0);
            }
        }
    }

    fn push_paragraph(&mut self, words: Vec<&'a str>) {
        let n = words.len();
        if self.fresh && self.words + n > self.size {
            self.emit();
        }

        if n <= self.size {
            self.shrink_carry(n);
            self.words += n;
            self.segments.push(words);
            self.fresh = true;
            return;
        }

        // Oversized paragraph: hard split on word boundaries.
        self.segments.push(Vec::with_capacity(self.size));
        for word in words {
            if self.words >= self.size {
                self.emit();
                if self.segments.is_empty() {
                    self.segments.push(Vec::with_capacity(self.size));
                }
            }
            if let Some(last) = self.segments.last_mut() {
                last.push(word);
            }
            self.words += 1;
            self.fresh = true;
        }
    }

    fn finish(mut self) -> Vec<String> {
        if self.fresh {
            self.out.push(self.render());
        }
        self.out
    }
}

impl Chunker {
    /// # Errors
    ///
    /// Returns `InvalidChunkConfig` unless `overlap < chunk_size`.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// Split `text` into ordered chunk strings. Identical input yields identical output.
    #[must_use]
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let mut packer = Packer::new(self.config);
        for block in blocks(text) {
            match block {
                Block::Paragraph(words) => packer.push_paragraph(words),
                Block::PageBreak if self.config.respect_pages => {
                    packer.emit();
                    packer.clear();
                }
                Block::PageBreak => {}
            }
        }
        packer.finish()
    }

    #[must_use]
    pub fn chunk_document(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        self.chunk_text(text)
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Chunk {
                document_id: document_id.to_owned(),
                ordinal,
                word_count: text.split_whitespace().count(),
                char_len: text.chars().count(),
                text,
            })
            .collect()
    }
}

/// Chunk `text` into pieces of at most `chunk_size` words overlapping by `overlap` words.
///
/// # Errors
///
/// Returns `InvalidChunkConfig` unless `overlap < chunk_size`.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    let chunker = Chunker::new(ChunkConfig {
        chunk_size,
        overlap,
        respect_pages: false,
    })?;
    Ok(chunker.chunk_text(text))
}
