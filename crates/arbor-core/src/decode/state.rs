//! Generation state threaded through the decode loop.

use crate::cache::RotatingCache;
use crate::error::{ArborError, Result};

/// Lifecycle of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// Buffers allocated, no step taken yet.
    Initializing,
    /// At least one step taken, some row still running.
    Stepping,
    /// Every row is done or the step budget is spent. Terminal.
    Finished,
}

/// Everything that changes between decode steps.
///
/// The token buffer is row-major `[batch, total_length]`. Column 0 holds the
/// beginning-of-sequence id, prompts start at column 1 and the rest is
/// padding until generated tokens overwrite it.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub(crate) tokens: Vec<u32>,
    pub(crate) batch_size: usize,
    pub(crate) total_length: usize,
    pub(crate) input_lengths: Vec<usize>,
    pub(crate) step: usize,
    pub(crate) done: Vec<bool>,
    pub(crate) all_done: bool,
    pub(crate) phase: DecodePhase,
    pub(crate) cache: RotatingCache,
}

impl GenerationState {
    /// Number of rows.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Columns per row, including the two reserved for BOS and EOS.
    pub fn total_length(&self) -> usize {
        self.total_length
    }

    /// Step budget: the last step that can write a token is `max_steps() - 1`.
    pub fn max_steps(&self) -> usize {
        self.total_length - 2
    }

    /// Prompt length of each row, without BOS.
    pub fn input_lengths(&self) -> &[usize] {
        &self.input_lengths
    }

    /// Steps taken so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Per-row done flags. Once set, a flag stays set.
    pub fn done(&self) -> &[bool] {
        &self.done
    }

    /// Whether the generation is over.
    pub fn all_done(&self) -> bool {
        self.all_done
    }

    /// Current phase.
    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// The rotating cache.
    pub fn cache(&self) -> &RotatingCache {
        &self.cache
    }

    /// Token at `(row, column)`.
    pub fn token(&self, row: usize, column: usize) -> Option<u32> {
        if row >= self.batch_size || column >= self.total_length {
            return None;
        }
        self.tokens.get(row * self.total_length + column).copied()
    }

    /// Position fed with the token at `column`.
    ///
    /// Positions are the column index in every row, also across padding.
    pub fn position(&self, column: usize) -> Result<u32> {
        u32::try_from(column)
            .map_err(|_| ArborError::InvalidInput(format!("position {column} does not fit in u32")))
    }

    /// Row `row` of the token buffer.
    pub fn row(&self, row: usize) -> Option<&[u32]> {
        if row >= self.batch_size {
            return None;
        }
        let start = row * self.total_length;
        self.tokens.get(start..start + self.total_length)
    }

    /// All rows of the token buffer, in batch order.
    pub fn sequences(&self) -> Vec<Vec<u32>> {
        self.tokens
            .chunks(self.total_length)
            .map(<[u32]>::to_vec)
            .collect()
    }
}
