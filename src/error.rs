//! Error type for model construction and forward evaluation.

use thiserror::Error;

/// Errors surfaced by the decoder.
///
/// Every variant is fatal to the current call; nothing is retried or truncated.
#[derive(Debug, Error)]
pub enum GptError {
    /// Inconsistent or non-positive hyperparameters, detected at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Input sequence longer than the context window.
    #[error("sequence length {seq_len} exceeds block_size {block_size}")]
    SequenceLength {
        /// Length of the offending input
        seq_len: usize,
        /// Configured context window
        block_size: usize,
    },

    /// Token id outside `[0, vocab_size)`.
    #[error("token id {id} is outside vocabulary range [0, {vocab_size})")]
    IndexRange {
        /// Offending id
        id: i64,
        /// Configured vocabulary size
        vocab_size: usize,
    },

    /// Failure reported by the tensor substrate.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl GptError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GptError>;
