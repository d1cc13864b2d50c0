//! The ingest coordinator and its post-processing pipeline.
//!
//! Data path: the coordinator chunks ring-buffer regions and folds them
//! into the collector; every produced block (leaf or link) is handed to
//! a FIFO post-processing task that accumulates statistics, deduplicates
//! by content address and submits first-seen blocks to the CAR writer
//! thread. FIFO post-processing keeps CAR output in deterministic
//! first-seen order even when hashing is farmed out to worker threads.
//!
//! ```text
//! coordinator ─► [post-process queue] ─► post-processor ─► [car queue] ─► car writer
//!      │                                      │
//!      └── chunker / collector / encoder      └── stats + dedup maps
//! ```

use std::collections::hash_map::Entry;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use carve_block::{BlockMaker, DataSource, Header, MakerConfig};
use carve_buf::{BufError, Region, RingBuffer, RingConfig};
use carve_car::{CarUnit, run_writer, write_null_root_header};
use carve_chunk::{Chunker, registry::new_chunker};
use carve_dag::{Collector, LinkBlockCallback, registry as dag_registry};
use carve_types::hasher::AVAILABLE_HASHERS;
use carve_types::{CAR_QUEUE_SIZE, HasherKind, MAX_LEAF_PAYLOAD_SIZE, Multibase};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{Emitters, PipelineConfig};
use crate::error::IngestError;
use crate::stats::{
    DagCounters, DedupTotals, PlatformProbe, NoopProbe, ResourceUsage, RootStats, SeenMaps,
    SeenRoot, StatSummary, SysStats, UniqueBlockStats, seen_key,
};

/// Depth of the queue between the coordinator and the post-processor.
const POST_PROCESS_QUEUE_SIZE: usize = 1024;

/// Out-of-band notifications mirrored onto an optional event channel.
#[derive(Debug, Clone)]
pub enum IngestionEvent {
    /// A fatal error, stringified.
    ErrorString(String),
    /// The per-root JSONL line, exactly as written to `roots-jsonl`.
    NewRootJsonl(String),
}

struct PendingBlock {
    header: Arc<Header>,
    region: Option<Region>,
}

/// The assembled ingestion pipeline.
///
/// Reusable across [`Pipeline::process_reader`] calls; statistics and
/// dedup state accumulate until [`Pipeline::output_summary`].
pub struct Pipeline {
    cfg: PipelineConfig,
    multibase: Multibase,
    chunker: Box<dyn Chunker>,
    collector: Box<dyn Collector>,
    link_outbox: mpsc::UnboundedReceiver<Arc<Header>>,
    counters: Arc<DagCounters>,
    seen: Arc<Mutex<SeenMaps>>,
    emitters: Emitters,
    probe: Box<dyn PlatformProbe>,
    streams: u64,
    cur_stream_offset: i64,
    root_stats: Vec<RootStats>,
    sys: SysStats,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `cfg` and assemble the pipeline.
    ///
    /// Every configuration problem is collected so the caller can show
    /// them all at once.
    pub fn new(cfg: PipelineConfig, emitters: Emitters) -> Result<Pipeline, IngestError> {
        let mut errs: Vec<String> = Vec::new();

        if cfg.hash_bits < 128 || cfg.hash_bits % 8 != 0 {
            errs.push("the value of hash-bits must be a minimum of 128 and be divisible by 8".into());
        }
        if !(cfg.inline_max_size == 0
            || (4..MAX_LEAF_PAYLOAD_SIZE).contains(&cfg.inline_max_size))
        {
            errs.push(format!(
                "inline-max-size '{}' out of bounds 0 or [4:{}]",
                cfg.inline_max_size, MAX_LEAF_PAYLOAD_SIZE
            ));
        }
        let multibase = match Multibase::by_name(&cfg.cid_multibase) {
            Some(mb) => mb,
            None => {
                errs.push(format!("unsupported cid multibase '{}'", cfg.cid_multibase));
                Multibase::Base32
            }
        };
        let hasher = match HasherKind::by_name(&cfg.hash) {
            Some(h) => h,
            None => {
                errs.push(format!(
                    "hash function '{}' is not valid. Available hash names are: {}",
                    cfg.hash,
                    AVAILABLE_HASHERS.join(", ")
                ));
                HasherKind::Sha2_256
            }
        };
        if emitters.car_v1_stream.is_some() && !cfg.track_blocks {
            errs.push("disabling blockstat collection conflicts with streaming .car data".into());
        }

        let ring_cfg = RingConfig {
            buffer_size: cfg.ring_buffer_size,
            sector_size: cfg.ring_buffer_sect_size,
            min_read: cfg.ring_buffer_min_read,
            // twice the max chunk, otherwise chunking chains won't work
            min_region: 2 * MAX_LEAF_PAYLOAD_SIZE,
        };
        if let Err(e) = ring_cfg.validate() {
            errs.push(e);
        }

        let chunker = match new_chunker(&cfg.chunker) {
            Ok((chunker, constants)) => {
                if constants.max_chunk_size < 1
                    || constants.max_chunk_size > MAX_LEAF_PAYLOAD_SIZE
                {
                    errs.push(format!(
                        "chunker MaxChunkSize constant '{}' out of range [1:{}]",
                        constants.max_chunk_size, MAX_LEAF_PAYLOAD_SIZE
                    ));
                }
                if constants.min_chunk_size > constants.max_chunk_size {
                    errs.push(format!(
                        "chunker MinChunkSize constant '{}' out of range [0:{}]",
                        constants.min_chunk_size, constants.max_chunk_size
                    ));
                }
                Some(chunker)
            }
            Err(mut chunker_errs) => {
                errs.append(&mut chunker_errs);
                None
            }
        };

        let (outbox_tx, link_outbox) = mpsc::unbounded_channel();

        let encoder_spec = match dag_registry::parse_encoder_spec(&cfg.node_encoder) {
            Ok(spec) => Some(spec),
            Err(mut encoder_errs) => {
                errs.append(&mut encoder_errs);
                None
            }
        };

        let mut collector = None;
        if let Some(spec) = encoder_spec
            && errs.is_empty()
        {
            match BlockMaker::new(MakerConfig {
                hasher,
                hash_bits: cfg.hash_bits,
                inline_max_size: cfg.inline_max_size,
                cid_v0: spec.cid_v0,
                async_hashers: cfg.async_hashers,
            }) {
                Ok(maker) => {
                    let callback: LinkBlockCallback = Box::new(move |header| {
                        let _ = outbox_tx.send(header);
                    });
                    let encoder =
                        dag_registry::new_node_encoder(spec, Arc::new(maker), callback);
                    match dag_registry::new_collector(&cfg.collector, encoder) {
                        Ok(built) => collector = Some(built),
                        Err(mut collector_errs) => errs.append(&mut collector_errs),
                    }
                }
                Err(maker_err) => errs.push(maker_err),
            }
        }

        match (chunker, collector) {
            (Some(chunker), Some(collector)) if errs.is_empty() => Ok(Pipeline {
                multibase,
                chunker,
                collector,
                link_outbox,
                counters: Arc::new(DagCounters::default()),
                seen: Arc::new(Mutex::new(SeenMaps::default())),
                emitters,
                probe: Box::new(NoopProbe),
                streams: 0,
                cur_stream_offset: 0,
                root_stats: Vec::new(),
                sys: SysStats {
                    os: std::env::consts::OS,
                    ..SysStats::default()
                },
                cfg,
            }),
            _ => Err(IngestError::Config(errs)),
        }
    }

    /// Replace the platform probe (binaries inject a getrusage-backed one).
    pub fn with_probe(mut self, probe: Box<dyn PlatformProbe>) -> Pipeline {
        self.probe = probe;
        self
    }

    /// Record the invocation argv for the summary.
    pub fn set_argv(&mut self, initial: Vec<String>, expanded: Vec<String>) {
        self.sys.argv_initial = initial;
        self.sys.argv_expanded = expanded;
    }

    /// Record the system page size for the summary.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.sys.page_size = page_size;
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Ingest one reader: chunk, collect, hash, dedup and emit.
    ///
    /// Returns after all in-flight post-processing has drained and the
    /// CAR writer (if any) has finished. At most one error is returned;
    /// it is mirrored on `event_tx` when that channel is given.
    pub async fn process_reader<R>(
        &mut self,
        reader: R,
        event_tx: Option<mpsc::UnboundedSender<IngestionEvent>>,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let t0 = Instant::now();
        let usage_pre = self.probe.snapshot();

        let ring_cfg = RingConfig {
            buffer_size: self.cfg.ring_buffer_size,
            sector_size: self.cfg.ring_buffer_sect_size,
            min_read: self.cfg.ring_buffer_min_read,
            min_region: 2 * MAX_LEAF_PAYLOAD_SIZE,
        };
        let mut ring = RingBuffer::new(reader, ring_cfg);

        // CAR prequel goes out before anything else can fail mid-stream.
        let mut car_handle = None;
        let mut car_tx = None;
        if let Some(mut writer) = self.emitters.car_v1_stream.take() {
            if let Err(e) = write_null_root_header(writer.as_mut()) {
                let err = IngestError::CarWrite(e);
                send_error_event(&event_tx, &err);
                return Err(err);
            }
            let (tx, rx) = mpsc::channel(CAR_QUEUE_SIZE);
            car_handle = Some(tokio::task::spawn_blocking(move || run_writer(writer, rx)));
            car_tx = Some(tx);
        }

        let (pp_tx, pp_rx) = mpsc::channel(POST_PROCESS_QUEUE_SIZE);
        let pp_handle = tokio::spawn(post_process_loop(
            pp_rx,
            car_tx,
            self.counters.clone(),
            self.seen.clone(),
            self.cfg.track_blocks,
        ));

        let mut result = self.ingest_loop(&mut ring, &pp_tx, &event_tx).await;

        // Teardown: drain post-processing, then the CAR queue/writer.
        drop(pp_tx);
        if let Err(join_err) = pp_handle.await {
            result = result.and(Err(IngestError::TaskFailed(join_err.to_string())));
        }
        if let Some(handle) = car_handle {
            match handle.await {
                Ok(Ok(blocks)) => debug!(blocks, "car stream writer finished"),
                Ok(Err(e)) => result = result.and(Err(IngestError::CarWrite(e))),
                Err(join_err) => {
                    result = result.and(Err(IngestError::TaskFailed(join_err.to_string())));
                }
            }
        }

        self.sys.read_calls += ring.read_calls();
        drop(ring);

        if let (Some(pre), Some(post)) = (usage_pre, self.probe.snapshot()) {
            apply_usage_delta(&mut self.sys, pre, post);
        }
        self.sys.elapsed_nsecs += t0.elapsed().as_nanos() as i64;

        if let Err(err) = &result {
            send_error_event(&event_tx, err);
        }
        result
    }

    async fn ingest_loop(
        &mut self,
        ring: &mut RingBuffer,
        pp_tx: &mpsc::Sender<PendingBlock>,
        event_tx: &Option<mpsc::UnboundedSender<IngestionEvent>>,
    ) -> Result<(), IngestError> {
        loop {
            let mut substream_size = 0i64;
            if self.cfg.multipart_stream {
                match ring.read_length_prefix().await {
                    Ok(Some(size)) => substream_size = size,
                    // clean EOF at a prefix boundary ends the stream
                    Ok(None) => break,
                    Err(BufError::Io(e)) => {
                        return Err(self.annotate(IngestError::Prefix(e), ring));
                    }
                    Err(other) => return Err(self.annotate(other.into(), ring)),
                }
                if substream_size < 0 {
                    return Err(self.annotate(IngestError::NegativePrefix(substream_size), ring));
                }
                if substream_size == 0 && self.cfg.skip_nul_inputs {
                    continue;
                }
                self.streams += 1;
                self.cur_stream_offset = 0;
            }

            if self.cfg.multipart_stream && substream_size == 0 {
                // one-time zero-CID emission for the empty substream
                self.stream_append(pp_tx, None, None).await?;
            } else {
                match self.process_stream(ring, pp_tx, substream_size as u64).await {
                    Ok(()) => {
                        if self.cur_stream_offset == 0 && !self.cfg.skip_nul_inputs {
                            self.stream_append(pp_tx, None, None).await?;
                        }
                    }
                    Err(IngestError::Buf(BufError::UnexpectedEof { expected, received })) => {
                        let err = IngestError::UnexpectedSubstreamEof {
                            stream: self.streams,
                            received,
                            expected,
                        };
                        return Err(self.annotate(err, ring));
                    }
                    Err(other) => return Err(self.annotate(other, ring)),
                }
            }

            let root = self.collector.flush_state();
            self.drain_links(pp_tx).await?;
            self.emit_root(root, event_tx).await?;

            if !self.cfg.multipart_stream {
                break;
            }
        }
        Ok(())
    }

    async fn process_stream(
        &mut self,
        ring: &mut RingBuffer,
        pp_tx: &mpsc::Sender<PendingBlock>,
        limit: u64,
    ) -> Result<(), IngestError> {
        ring.start_fill(limit).await?;

        let mut consumed_prev = 0usize;
        loop {
            let (region, end_of_fill) = ring.next_region(consumed_prev).await?;
            let Some(region) = region else {
                return Ok(());
            };

            let mut cut_sizes = Vec::new();
            self.chunker.split(region.bytes(), end_of_fill, &mut |chunk| {
                cut_sizes.push(chunk.size);
                Ok(())
            })?;

            let mut offset = 0usize;
            for size in cut_sizes {
                let sub = region.sub_region(offset, size);
                offset += size;
                self.counters.payload.fetch_add(size as i64, Ordering::Relaxed);
                let source = DataSource {
                    chunk_size: size,
                    content: sub.as_shared(),
                };
                // the sub-region doubles as the reservation that keeps the
                // chunk bytes pinned until CAR emission
                self.stream_append(pp_tx, Some(source), Some(sub)).await?;
            }
            consumed_prev = offset;
        }
    }

    /// Fold one leaf into the collector and queue everything it produced.
    async fn stream_append(
        &mut self,
        pp_tx: &mpsc::Sender<PendingBlock>,
        source: Option<DataSource>,
        region: Option<Region>,
    ) -> Result<(), IngestError> {
        let size = source.as_ref().map_or(0, |s| s.chunk_size);
        let header = self.collector.append_data(source);
        self.cur_stream_offset += size as i64;

        pp_tx
            .send(PendingBlock { header, region })
            .await
            .map_err(|_| IngestError::TaskFailed("post-processing queue closed".into()))?;

        // link nodes minted while this leaf was folded in
        self.drain_links(pp_tx).await
    }

    async fn drain_links(
        &mut self,
        pp_tx: &mpsc::Sender<PendingBlock>,
    ) -> Result<(), IngestError> {
        while let Ok(header) = self.link_outbox.try_recv() {
            pp_tx
                .send(PendingBlock {
                    header,
                    region: None,
                })
                .await
                .map_err(|_| IngestError::TaskFailed("post-processing queue closed".into()))?;
        }
        Ok(())
    }

    async fn emit_root(
        &mut self,
        root: Option<Arc<Header>>,
        event_tx: &Option<mpsc::UnboundedSender<IngestionEvent>>,
    ) -> Result<(), IngestError> {
        let mut root_payload = 0u64;
        let mut root_dag = 0u64;
        let mut cid_str = String::from("N/A");

        if let Some(root) = &root {
            root_payload = root.size_cumulative_payload();
            root_dag = root.size_cumulative_dag();
            let cid = root.cid_async().await;
            cid_str = self.multibase.format(&cid, root.dummy_hashed());

            if self.cfg.track_blocks {
                let mut duplicate = false;
                if let Some(key) = seen_key(&cid, root.is_cid_inlined(), root.dummy_hashed()) {
                    let mut maps = self.seen.lock().expect("seen maps lock poisoned");
                    let order = maps.roots.len();
                    match maps.roots.entry(key) {
                        Entry::Occupied(_) => duplicate = true,
                        Entry::Vacant(slot) => {
                            slot.insert(SeenRoot { order, cid });
                        }
                    }
                }
                self.root_stats.push(RootStats {
                    cid: cid_str.clone(),
                    wire_size: root_dag,
                    payload: root_payload,
                    duplicate,
                });
            }
        }

        let line = format!(
            "{{\"event\":   \"root\", \"payload\":{root_payload:12}, \"stream\":{:7}, {:<67}, \"wiresize\":{root_dag:12} }}\n",
            self.streams,
            format!("\"cid\":\"{cid_str}\""),
        );
        if let Some(tx) = event_tx {
            let _ = tx.send(IngestionEvent::NewRootJsonl(line.clone()));
        }
        if root.is_some()
            && let Some(writer) = self.emitters.roots_jsonl.as_mut()
        {
            writer
                .write_all(line.as_bytes())
                .map_err(|e| IngestError::Emit {
                    target: "roots-jsonl",
                    source: e,
                })?;
        }
        Ok(())
    }

    fn annotate(&self, err: IngestError, ring: &RingBuffer) -> IngestError {
        err.annotate(self.cur_stream_offset, self.streams, ring.buffered())
    }

    /// Snapshot the accumulated summary.
    pub fn summary(&self) -> StatSummary {
        StatSummary {
            event_type: "summary",
            dag: self.counters.snapshot(),
            streams: self.streams,
            roots: self.root_stats.clone(),
            sys: self.sys.clone(),
        }
    }

    /// Dataset-level dedup totals from the seen-block map.
    pub fn dedup_totals(&self) -> DedupTotals {
        let maps = self.seen.lock().expect("seen maps lock poisoned");
        let mut totals = DedupTotals::default();
        for stats in maps.blocks.values() {
            totals.unique_blocks += 1;
            totals.unique_bytes += stats.size_block as i64;
            if stats.is_data {
                totals.unique_leaf_blocks += 1;
                totals.unique_leaf_bytes += stats.size_block as i64;
            }
        }
        totals
    }

    /// Write the summary JSON line, if a `stats-jsonl` emitter is set.
    pub fn output_summary(&mut self) -> Result<(), IngestError> {
        let summary = self.summary();
        if let Some(writer) = self.emitters.stats_jsonl.as_mut() {
            let json = serde_json::to_string(&summary).map_err(|e| IngestError::Emit {
                target: "stats-jsonl",
                source: std::io::Error::other(e),
            })?;
            writer
                .write_all(format!("{json}\n").as_bytes())
                .map_err(|e| IngestError::Emit {
                    target: "stats-jsonl",
                    source: e,
                })?;
        }
        Ok(())
    }
}

async fn post_process_loop(
    mut queue: mpsc::Receiver<PendingBlock>,
    car_tx: Option<mpsc::Sender<CarUnit>>,
    counters: Arc<DagCounters>,
    seen: Arc<Mutex<SeenMaps>>,
    track_blocks: bool,
) {
    while let Some(pending) = queue.recv().await {
        let PendingBlock { header, region } = pending;

        // design assertion, not a user error
        assert!(
            header.size_block() == 0 || header.size_cumulative_dag() != 0,
            "block header with dag-size of 0 encountered"
        );

        counters
            .wire_size
            .fetch_add(header.size_block() as i64, Ordering::Relaxed);
        counters.nodes.fetch_add(1, Ordering::Relaxed);

        // Materialise the CID before any chance of eviction.
        let cid = header.cid_async().await;

        if track_blocks
            && header.size_block() > 0
            && let Some(key) = seen_key(&cid, header.is_cid_inlined(), header.dummy_hashed())
        {
            let first_seen = {
                let mut maps = seen.lock().expect("seen maps lock poisoned");
                match maps.blocks.entry(key) {
                    Entry::Occupied(_) => false,
                    Entry::Vacant(slot) => {
                        slot.insert(UniqueBlockStats {
                            size_block: header.size_block(),
                            is_data: region.is_some(),
                        });
                        true
                    }
                }
            };
            // No lock is held during the queue send, or a slow CAR writer
            // would head-of-line-block every dedup lookup.
            if first_seen && let Some(tx) = &car_tx {
                if tx.send(CarUnit { header, region }).await.is_err() {
                    warn!("car queue closed early, dropping block");
                }
                continue; // the car writer evicts and releases
            }
        }

        drop(region);
        header.evict_content();
    }
}

fn send_error_event(
    event_tx: &Option<mpsc::UnboundedSender<IngestionEvent>>,
    err: &IngestError,
) {
    if let Some(tx) = event_tx {
        let _ = tx.send(IngestionEvent::ErrorString(err.to_string()));
    }
}

fn apply_usage_delta(sys: &mut SysStats, pre: ResourceUsage, post: ResourceUsage) {
    sys.cpu_user_nsecs += post.cpu_user_nsecs - pre.cpu_user_nsecs;
    sys.cpu_sys_nsecs += post.cpu_sys_nsecs - pre.cpu_sys_nsecs;
    sys.max_rss_bytes = post.max_rss_bytes;
    sys.min_flt += post.min_flt - pre.min_flt;
    sys.maj_flt += post.maj_flt - pre.maj_flt;
    sys.bio_read += post.bio_read - pre.bio_read;
    sys.bio_write += post.bio_write - pre.bio_write;
    sys.sigs += post.sigs - pre.sigs;
    sys.ctx_sw_yield += post.ctx_sw_yield - pre.ctx_sw_yield;
    sys.ctx_sw_forced += post.ctx_sw_forced - pre.ctx_sw_forced;
}
