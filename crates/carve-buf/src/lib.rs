//! Quantized ring buffer between the input reader and the chunker.
//!
//! A [`RingBuffer`] owns its input via a long-lived reader task that fills
//! sector-quantized [`Bytes`] segments under a byte-accounting semaphore.
//! [`RingBuffer::next_region`] assembles those segments into contiguous
//! windows (carrying any unconsumed tail forward) and hands out
//! reference-counted [`Region`]s. Buffer space only becomes reusable once
//! every reservation of a window has been dropped, which is what lets the
//! CAR writer keep reading leaf bytes long after the chunker has moved on.

mod region;
mod ring;

pub use region::Region;
pub use ring::{RingBuffer, RingConfig};

/// Errors surfaced by the ring buffer.
#[derive(Debug, thiserror::Error)]
pub enum BufError {
    /// Underlying read failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// The input ended before a bounded fill received its declared bytes.
    #[error("unexpected end of input: expected {expected} bytes, received {received}")]
    UnexpectedEof {
        /// Bytes the fill was told to deliver.
        expected: u64,
        /// Bytes actually received before EOF.
        received: u64,
    },

    /// The reader task exited while a request was outstanding.
    #[error("ring buffer reader task is gone")]
    ReaderGone,
}
