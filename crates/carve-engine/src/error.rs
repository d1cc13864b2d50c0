//! Pipeline error types.

use carve_buf::BufError;
use carve_chunk::ChunkerError;

/// Errors surfaced from pipeline construction and ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// One or more invalid or conflicting options; nothing was processed.
    #[error("fatal error parsing configuration:\n\t{}", .0.join("\n\t"))]
    Config(Vec<String>),

    /// Ring buffer / input failure.
    #[error(transparent)]
    Buf(#[from] BufError),

    /// The 8-byte multipart substream size could not be read.
    #[error("error reading next 8-byte multipart substream size: {0}")]
    Prefix(std::io::Error),

    /// A multipart prefix declared a negative substream size.
    #[error("negative multipart substream size {0}")]
    NegativePrefix(i64),

    /// A multipart substream ended short of its declared size.
    #[error(
        "unexpected end of substream #{stream} after {received} bytes \
         (stream expected to be {expected} bytes long)"
    )]
    UnexpectedSubstreamEof {
        stream: u64,
        received: u64,
        expected: u64,
    },

    /// A chunker callback failed.
    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    /// The CAR stream writer failed.
    #[error("car stream write failed: {0}")]
    CarWrite(std::io::Error),

    /// A non-CAR emitter failed.
    #[error("emitting '{target}' failed: {source}")]
    Emit {
        target: &'static str,
        source: std::io::Error,
    },

    /// A background task died unexpectedly.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),

    /// Fatal ingestion error annotated with stream position context.
    #[error(
        "failure at byte offset {offset} of sub-stream #{stream} with \
         {buffered} bytes buffered/unprocessed: {source}"
    )]
    Annotated {
        offset: i64,
        stream: u64,
        buffered: usize,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// Wrap with stream-position context (idempotent).
    pub(crate) fn annotate(self, offset: i64, stream: u64, buffered: usize) -> IngestError {
        match self {
            already @ IngestError::Annotated { .. } => already,
            config @ IngestError::Config(_) => config,
            source => IngestError::Annotated {
                offset,
                stream,
                buffered,
                source: Box::new(source),
            },
        }
    }
}
