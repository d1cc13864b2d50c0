//! The ring buffer proper: reader task, fill protocol, window assembly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::trace;

use crate::BufError;
use crate::region::{GaugeGuard, Region, WindowBacking};

/// Ring buffer geometry.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Total buffer budget in bytes; reads stall when it is exhausted.
    pub buffer_size: usize,
    /// Read quantum; every fill read covers a whole number of sectors.
    pub sector_size: usize,
    /// Preferred minimum size of a single read.
    pub min_read: usize,
    /// Minimum window handed to the chunker (except at end of fill).
    pub min_region: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        RingConfig {
            buffer_size: 24 * 1024 * 1024,
            sector_size: 64 * 1024,
            min_read: 256 * 1024,
            min_region: 2 * 1024 * 1024,
        }
    }
}

impl RingConfig {
    /// Per-read claim: `min_read` rounded up to whole sectors.
    fn read_len(&self) -> usize {
        let base = self.min_read.max(self.sector_size);
        base.div_ceil(self.sector_size) * self.sector_size
    }

    /// Sanity-check the geometry.
    pub fn validate(&self) -> Result<(), String> {
        if self.sector_size == 0 || self.min_region == 0 {
            return Err("ring buffer sector and region sizes must be non-zero".into());
        }
        if self.buffer_size < 2 * self.min_region + self.read_len() {
            return Err(format!(
                "ring buffer size {} too small: need at least 2*min_region + read quantum = {}",
                self.buffer_size,
                2 * self.min_region + self.read_len(),
            ));
        }
        Ok(())
    }
}

enum FillCmd {
    /// Read up to `limit` bytes (0 = until EOF) into the segment stream.
    Fill { limit: u64 },
    /// Read an 8-byte big-endian prefix directly off the shared reader.
    ReadPrefix {
        reply: oneshot::Sender<std::io::Result<Option<[u8; 8]>>>,
    },
}

struct Seg {
    bytes: Bytes,
    guard: GaugeGuard,
}

enum Fill {
    Data(Seg),
    End { error: Option<BufError> },
}

/// Quantized ring buffer with an owned reader task.
///
/// Construction spawns the reader task; it must therefore happen inside a
/// tokio runtime. Dropping the buffer shuts the task down.
pub struct RingBuffer {
    cfg: RingConfig,
    gauge: Arc<Semaphore>,
    cmd_tx: mpsc::Sender<FillCmd>,
    data_rx: mpsc::Receiver<Fill>,
    window: Bytes,
    pos: usize,
    backing: Arc<WindowBacking>,
    fill_ended: bool,
    read_calls: Arc<AtomicU64>,
}

impl RingBuffer {
    /// Wrap `reader` in a ring buffer with the given geometry.
    pub fn new<R>(reader: R, cfg: RingConfig) -> RingBuffer
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let gauge = Arc::new(Semaphore::new(cfg.buffer_size));
        let read_calls = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let queue_cap = (cfg.buffer_size / cfg.read_len()).max(4);
        let (data_tx, data_rx) = mpsc::channel(queue_cap);

        tokio::spawn(run_reader(
            reader,
            cfg.clone(),
            gauge.clone(),
            cmd_rx,
            data_tx,
            read_calls.clone(),
        ));

        let backing = WindowBacking::new(GaugeGuard::adopt(&gauge, 0));
        RingBuffer {
            cfg,
            gauge,
            cmd_tx,
            data_rx,
            window: Bytes::new(),
            pos: 0,
            backing,
            fill_ended: true,
            read_calls,
        }
    }

    /// Begin asynchronous filling up to `limit` bytes (0 = until EOF).
    pub async fn start_fill(&mut self, limit: u64) -> Result<(), BufError> {
        self.fill_ended = false;
        self.cmd_tx
            .send(FillCmd::Fill { limit })
            .await
            .map_err(|_| BufError::ReaderGone)
    }

    /// Read the next 8-byte big-endian length prefix between fills.
    ///
    /// Returns `None` on clean EOF at the prefix boundary.
    pub async fn read_length_prefix(&mut self) -> Result<Option<i64>, BufError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(FillCmd::ReadPrefix { reply: reply_tx })
            .await
            .map_err(|_| BufError::ReaderGone)?;
        let raw = reply_rx.await.map_err(|_| BufError::ReaderGone)??;
        Ok(raw.map(i64::from_be_bytes))
    }

    /// Advance past `consumed` bytes of the previous region and return the
    /// next readable window.
    ///
    /// The returned flag is true once the current fill is exhausted (the
    /// chunker's `use_entire_buffer` signal). `(None, true)` means the fill
    /// is fully drained.
    pub async fn next_region(
        &mut self,
        consumed: usize,
    ) -> Result<(Option<Region>, bool), BufError> {
        self.pos += consumed;
        debug_assert!(self.pos <= self.window.len());
        let carry = self.window.slice(self.pos..);

        // Fast paths that avoid re-assembly: enough data already windowed
        // (and the caller made progress, so returning the same window
        // cannot livelock), or the fill is over and the remainder is final.
        if !carry.is_empty()
            && (self.fill_ended || (carry.len() >= self.cfg.min_region && consumed > 0))
        {
            self.window = carry.clone();
            self.pos = 0;
            return Ok((
                Some(Region::new(carry, self.backing.clone())),
                self.fill_ended,
            ));
        }
        if carry.is_empty() && self.fill_ended {
            return Ok((None, true));
        }

        // Assemble a fresh window: carried tail first, then new segments
        // until the minimum region size is reached or the fill ends.
        let mut out = BytesMut::with_capacity(self.cfg.min_region + self.cfg.read_len());
        let mut claimed = 0usize;
        if !carry.is_empty() {
            // The carried bytes are double-counted against the gauge until
            // the old window's regions drop; buffer_size validation leaves
            // headroom for exactly this.
            GaugeGuard::acquire(&self.gauge, carry.len()).await.disarm();
            claimed += carry.len();
            out.extend_from_slice(&carry);
        }
        drop(carry);

        // A zero-progress caller is asking for a bigger window, so at
        // least one fresh segment must land even if the carry alone
        // already satisfies min_region.
        let mut pulled_any = false;
        while (out.len() < self.cfg.min_region || (consumed == 0 && !pulled_any))
            && !self.fill_ended
        {
            match self.data_rx.recv().await {
                Some(Fill::Data(mut seg)) => {
                    out.extend_from_slice(&seg.bytes);
                    claimed += seg.guard.disarm();
                    pulled_any = true;
                }
                Some(Fill::End { error }) => {
                    self.fill_ended = true;
                    if let Some(err) = error {
                        // Window guard drops here and releases the claim.
                        drop(WindowBacking::new(GaugeGuard::adopt(&self.gauge, claimed)));
                        return Err(err);
                    }
                }
                None => return Err(BufError::ReaderGone),
            }
        }

        trace!(window = out.len(), ended = self.fill_ended, "assembled region");

        let window = out.freeze();
        self.backing = WindowBacking::new(GaugeGuard::adopt(&self.gauge, claimed));
        self.window = window.clone();
        self.pos = 0;
        if window.is_empty() {
            return Ok((None, true));
        }
        Ok((
            Some(Region::new(window, self.backing.clone())),
            self.fill_ended,
        ))
    }

    /// Currently unconsumed bytes of the assembled window.
    pub fn buffered(&self) -> usize {
        self.window.len() - self.pos
    }

    /// Number of `read` calls issued so far by the reader task.
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }
}

async fn run_reader<R>(
    mut reader: R,
    cfg: RingConfig,
    gauge: Arc<Semaphore>,
    mut cmd_rx: mpsc::Receiver<FillCmd>,
    data_tx: mpsc::Sender<Fill>,
    read_calls: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            FillCmd::ReadPrefix { reply } => {
                let result = read_prefix(&mut reader, &read_calls).await;
                let _ = reply.send(result);
            }
            FillCmd::Fill { limit } => {
                let mut received: u64 = 0;
                let mut error: Option<BufError> = None;
                loop {
                    if limit != 0 && received == limit {
                        break;
                    }
                    let want = if limit != 0 {
                        (limit - received).min(cfg.read_len() as u64) as usize
                    } else {
                        cfg.read_len()
                    };
                    let mut guard = GaugeGuard::acquire(&gauge, want).await;
                    let mut buf = BytesMut::with_capacity(want);
                    read_calls.fetch_add(1, Ordering::Relaxed);
                    // limit() caps the read at the claimed budget even if the
                    // allocator handed BytesMut extra capacity
                    match reader.read_buf(&mut (&mut buf).limit(want)).await {
                        Ok(0) => {
                            drop(guard);
                            if limit != 0 {
                                error = Some(BufError::UnexpectedEof {
                                    expected: limit,
                                    received,
                                });
                            }
                            break;
                        }
                        Ok(n) => {
                            guard.shrink_to(n);
                            received += n as u64;
                            let seg = Seg {
                                bytes: buf.freeze(),
                                guard,
                            };
                            if data_tx.send(Fill::Data(seg)).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            drop(guard);
                            error = Some(BufError::Io(err));
                            break;
                        }
                    }
                }
                if data_tx.send(Fill::End { error }).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_prefix<R>(
    reader: &mut R,
    read_calls: &AtomicU64,
) -> std::io::Result<Option<[u8; 8]>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8];
    let mut filled = 0usize;
    while filled < 8 {
        read_calls.fetch_add(1, Ordering::Relaxed);
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("length prefix truncated after {filled} bytes"),
            ));
        }
        filled += n;
    }
    Ok(Some(buf))
}
