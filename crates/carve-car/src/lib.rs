//! CARv1 stream emission.
//!
//! The writer thread is the single consumer of a bounded queue of
//! [`CarUnit`]s: each frame is `varint(len(cid) + len(block)) || cid ||
//! block`, after which the block's content is evicted and its buffer
//! region reservation dropped. A failed write ends the stream; the error
//! comes back from the writer's join handle at shutdown.

use std::io::Write;
use std::sync::Arc;

use carve_block::Header;
use carve_buf::Region;
use carve_types::varint::uvarint;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The fixed CARv1 header for a root-less stream: varint length prefix
/// followed by the canonical CBOR map `{"roots": [], "version": 1}`.
pub const NUL_ROOT_CAR_HEADER: &[u8] = &[
    0x11, // 17 bytes of CBOR
    0xa2, // map, 2 entries
    0x65, b'r', b'o', b'o', b't', b's', // text key "roots"
    0x80, // empty array
    0x67, b'v', b'e', b'r', b's', b'i', b'o', b'n', // text key "version"
    0x01,
];

/// One queued block: its header plus the buffer reservation that keeps
/// the leaf bytes alive until they are written out.
pub struct CarUnit {
    pub header: Arc<Header>,
    pub region: Option<Region>,
}

/// Write the null-root CAR header.
pub fn write_null_root_header(writer: &mut dyn Write) -> std::io::Result<()> {
    writer.write_all(NUL_ROOT_CAR_HEADER)
}

/// Drain the CAR queue into `writer` until the queue closes.
///
/// Runs on a dedicated blocking thread. On a write error the remaining
/// queue is drained without writing (so producers never block on a dead
/// writer and every region reservation is released) and the first error
/// is returned.
pub fn run_writer(
    mut writer: Box<dyn Write + Send>,
    mut queue: mpsc::Receiver<CarUnit>,
) -> std::io::Result<u64> {
    let mut written = 0u64;
    let mut failure: Option<std::io::Error> = None;

    while let Some(unit) = queue.blocking_recv() {
        if failure.is_none() {
            if let Err(err) = write_unit(writer.as_mut(), &unit) {
                warn!(%err, "car write failed, draining queue");
                failure = Some(err);
            } else {
                written += 1;
            }
        }
        unit.header.evict_content();
        drop(unit.region);
    }

    match failure {
        Some(err) => Err(err),
        None => {
            writer.flush()?;
            debug!(blocks = written, "car stream complete");
            Ok(written)
        }
    }
}

fn write_unit(writer: &mut dyn Write, unit: &CarUnit) -> std::io::Result<()> {
    let cid = unit.header.cid();
    let frame_len = cid.len() as u64 + unit.header.size_block() as u64;
    writer.write_all(&uvarint(frame_len))?;
    writer.write_all(cid.as_bytes())?;
    for segment in unit.header.content() {
        writer.write_all(&segment)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use carve_block::{BlockMaker, MakerConfig};
    use carve_types::HasherKind;
    use carve_types::cid::CODEC_RAW;
    use std::sync::Mutex;

    fn maker() -> BlockMaker {
        BlockMaker::new(MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 256,
            inline_max_size: 0,
            cid_v0: false,
            async_hashers: 0,
        })
        .unwrap()
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_header_bytes() {
        assert_eq!(NUL_ROOT_CAR_HEADER.len(), 18);
        assert_eq!(NUL_ROOT_CAR_HEADER[0] as usize, NUL_ROOT_CAR_HEADER.len() - 1);
        assert_eq!(
            &NUL_ROOT_CAR_HEADER[..],
            &[
                0x11, 0xa2, 0x65, 0x72, 0x6f, 0x6f, 0x74, 0x73, 0x80, 0x67, 0x76, 0x65, 0x72,
                0x73, 0x69, 0x6f, 0x6e, 0x01
            ]
        );
    }

    #[test]
    fn test_writer_frames_and_evicts() {
        let maker = maker();
        let block = maker.make(vec![Bytes::from_static(b"hello world")], CODEC_RAW, 11, 0);
        let cid = block.cid();

        let sink = SharedSink::default();
        let out = sink.clone();
        let (tx, rx) = mpsc::channel(8);
        let writer = std::thread::spawn(move || run_writer(Box::new(sink), rx));

        tx.blocking_send(CarUnit {
            header: block.clone(),
            region: None,
        })
        .unwrap();
        drop(tx);
        assert_eq!(writer.join().unwrap().unwrap(), 1);

        let bytes = out.0.lock().unwrap().clone();
        let mut expect = Vec::new();
        expect.push((cid.len() + 11) as u8); // fits one varint byte
        expect.extend_from_slice(cid.as_bytes());
        expect.extend_from_slice(b"hello world");
        assert_eq!(bytes, expect);
        assert!(block.content().is_empty(), "content must be evicted");
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("pipe gone"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_error_drains_and_surfaces() {
        let maker = maker();
        let (tx, rx) = mpsc::channel(8);
        let writer = std::thread::spawn(move || run_writer(Box::new(FailingSink), rx));

        for i in 0..5u8 {
            let block = maker.make(vec![Bytes::from(vec![i; 4])], CODEC_RAW, 4, 0);
            tx.blocking_send(CarUnit {
                header: block,
                region: None,
            })
            .unwrap();
        }
        drop(tx);

        let err = writer.join().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "pipe gone");
    }
}
