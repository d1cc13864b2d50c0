//! Fixed-size chunking.

use crate::{Chunk, Chunker, ChunkerError, SplitCallback};

/// Splits the buffer into equally sized chunks.
///
/// Mid-stream a chunk is only emitted while strictly more data remains
/// behind it, so the pipeline always keeps a full window's worth of
/// lookahead; the exact-fit and remainder chunks come out at the final
/// flush.
#[derive(Debug)]
pub struct FixedSizeChunker {
    size: usize,
}

impl FixedSizeChunker {
    /// Chunker emitting `size`-byte chunks.
    pub fn new(size: usize) -> FixedSizeChunker {
        FixedSizeChunker { size }
    }
}

impl Chunker for FixedSizeChunker {
    fn split(
        &self,
        buf: &[u8],
        use_entire_buffer: bool,
        emit: SplitCallback<'_>,
    ) -> Result<(), ChunkerError> {
        let mut cur = self.size;

        while cur < buf.len() {
            emit(Chunk { size: self.size })?;
            cur += self.size;
        }

        if cur - self.size < buf.len() && use_entire_buffer {
            emit(Chunk {
                size: buf.len() - (cur - self.size),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::drive;

    #[test]
    fn test_exact_multiple() {
        let chunker = FixedSizeChunker::new(4);
        assert_eq!(drive(&chunker, &[0u8; 12], 64), vec![4, 4, 4]);
    }

    #[test]
    fn test_remainder_chunk() {
        let chunker = FixedSizeChunker::new(4);
        assert_eq!(drive(&chunker, &[0u8; 13], 64), vec![4, 4, 4, 1]);
    }

    #[test]
    fn test_empty_input() {
        let chunker = FixedSizeChunker::new(4);
        assert_eq!(drive(&chunker, &[], 64), Vec::<usize>::new());
    }

    #[test]
    fn test_holds_back_exact_fit_mid_stream() {
        // Without the flush flag an exact-fit buffer emits nothing: the
        // final chunk needs the EOF signal.
        let chunker = FixedSizeChunker::new(8);
        let mut sizes = Vec::new();
        chunker
            .split(&[0u8; 8], false, &mut |c| {
                sizes.push(c.size);
                Ok(())
            })
            .unwrap();
        assert!(sizes.is_empty());

        chunker
            .split(&[0u8; 8], true, &mut |c| {
                sizes.push(c.size);
                Ok(())
            })
            .unwrap();
        assert_eq!(sizes, vec![8]);
    }

    #[test]
    fn test_coverage_across_windows() {
        let chunker = FixedSizeChunker::new(100);
        let data = vec![7u8; 1057];
        let sizes = drive(&chunker, &data, 250);
        assert_eq!(sizes.iter().sum::<usize>(), data.len());
        assert_eq!(sizes.last(), Some(&57));
        assert!(sizes[..sizes.len() - 1].iter().all(|&s| s == 100));
    }

    #[test]
    fn test_callback_error_propagates() {
        let chunker = FixedSizeChunker::new(1);
        let err = chunker
            .split(&[0u8; 4], true, &mut |_| {
                Err(ChunkerError::Callback("stop".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ChunkerError::Callback(_)));
    }
}
