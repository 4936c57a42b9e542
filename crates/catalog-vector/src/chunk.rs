//! Fixed-size overlapping text chunking.
//!
//! Long catalog descriptions are split before embedding so every input stays
//! within the model's context. Sizes are counted in `char`s, never bytes, so
//! a chunk boundary can never land inside a multi-byte code point.

use catalog_core::config::ChunkingConfig;
use catalog_core::error::{CatalogError, Result};

/// Splits text into overlapping chunks of at most `chunk_size` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkSplitter {
    /// Create a splitter. `overlap` must be strictly smaller than `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CatalogError::Config("chunk_size must be > 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(CatalogError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily split `text`. Surrounding whitespace is ignored, so blank input
    /// yields no chunks. The returned iterator is `Clone`; cloning it (or
    /// calling `split` again) restarts the sequence.
    pub fn split<'a>(&self, text: &'a str) -> Chunks<'a> {
        let text = text.trim();
        Chunks {
            text,
            next_start: if text.is_empty() { None } else { Some(0) },
            chunk_size: self.chunk_size,
            step: self.chunk_size - self.overlap,
        }
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        let config = ChunkingConfig::default();
        Self {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
        }
    }
}

/// Iterator over the chunks of one text. Yields borrowed slices.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of the next chunk, `None` once exhausted.
    next_start: Option<usize>,
    chunk_size: usize,
    step: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let rest = &self.text[start..];

        let end = rest
            .char_indices()
            .nth(self.chunk_size)
            .map(|(offset, _)| start + offset)
            .unwrap_or(self.text.len());

        self.next_start = if end == self.text.len() {
            None
        } else {
            // `rest` holds more than chunk_size chars here, and step < chunk_size.
            rest.char_indices()
                .nth(self.step)
                .map(|(offset, _)| start + offset)
        };

        Some(&self.text[start..end])
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
