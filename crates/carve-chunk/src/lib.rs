//! Stream chunking.
//!
//! A [`Chunker`] walks a borrowed buffer and emits [`Chunk`] boundary
//! decisions. Implementations never copy data and never look past the
//! buffer they are handed; the pipeline guarantees the buffer is at least
//! two maximum chunk sizes long except at the final flush, where
//! `use_entire_buffer` requires any trailing bytes to come out as a final
//! chunk.
//!
//! Selection happens once at startup through [`registry::new_chunker`]
//! with specs like `fixed-size_262144` or
//! `rabin_polynomial=17437180132763653_min-size=87381_max-size=393216`.

mod buzhash;
mod fixed;
mod rabin;
pub mod registry;

pub use buzhash::{BUZ_TABLE_V0, BuzhashChunker, BuzhashConfig};
pub use fixed::FixedSizeChunker;
pub use rabin::{RabinChunker, RabinConfig};

/// A single boundary decision: the next `size` bytes form one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk length in bytes; always at least 1.
    pub size: usize,
}

/// Limits a chunker instance declares at construction.
///
/// The pipeline checks `max_chunk_size` against the leaf payload cap and
/// sizes its buffer windows from it.
#[derive(Debug, Clone, Copy)]
pub struct InstanceConstants {
    /// No chunk except the final flush chunk is smaller than this.
    pub min_chunk_size: usize,
    /// No chunk is ever larger than this.
    pub max_chunk_size: usize,
}

/// Error surfaced out of a [`Chunker::split`] run.
#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    /// The emit callback rejected a chunk.
    #[error("chunk callback failed: {0}")]
    Callback(String),
}

/// Boundary callback handed to [`Chunker::split`].
pub type SplitCallback<'a> = &'a mut dyn FnMut(Chunk) -> Result<(), ChunkerError>;

/// A stream chunking algorithm.
pub trait Chunker: Send + Sync + std::fmt::Debug {
    /// Walk `buf` and emit a [`Chunk`] for every accepted boundary.
    ///
    /// With `use_entire_buffer` set (final flush) all trailing bytes must
    /// be emitted, as a final chunk of length >= 1. Returns the first
    /// error returned by `emit`.
    fn split(
        &self,
        buf: &[u8],
        use_entire_buffer: bool,
        emit: SplitCallback<'_>,
    ) -> Result<(), ChunkerError>;
}
