//! Fixed-size overlapping text windows, the unit of retrieval.
//!
//! Window `i` covers characters `[i*(size-overlap), i*(size-overlap)+size)`
//! clipped to the text length; splitting stops once a window would start at
//! or past the end. With `size=1000, overlap=200` adjacent windows share
//! their last/first 200 characters.

use crate::config::ChunkingConfig;
use crate::errors::ApiError;

/// One window over the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub text: String,
    /// Character offset of the window start in the source.
    pub start_offset: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ApiError> {
        if config.chunk_size == 0 {
            return Err(ApiError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if config.overlap >= config.chunk_size {
            // A step of zero would never advance the window.
            return Err(ApiError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Splits `text` into windows. The returned iterator is lazy and can be
    /// recreated from the same `Chunker` any number of times.
    pub fn split(&self, text: &str) -> Result<ChunkIter, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::EmptyInput(
                "no usable text to chunk".to_string(),
            ));
        }

        Ok(ChunkIter {
            chars: text.chars().collect(),
            step: self.config.chunk_size - self.config.overlap,
            chunk_size: self.config.chunk_size,
            start: 0,
            index: 0,
        })
    }
}

pub struct ChunkIter {
    chars: Vec<char>,
    step: usize,
    chunk_size: usize,
    start: usize,
    index: usize,
}

impl Iterator for ChunkIter {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        if self.start >= self.chars.len() {
            return None;
        }

        let end = (self.start + self.chunk_size).min(self.chars.len());
        let span = ChunkSpan {
            text: self.chars[self.start..end].iter().collect(),
            start_offset: self.start,
            index: self.index,
        };

        self.start += self.step;
        self.index += 1;
        Some(span)
    }
}
