//! Statistics accumulation, dedup bookkeeping and the summary wire types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use carve_types::{Cid, SEEN_HASH_SIZE};
use serde::Serialize;

/// Key of the seen-maps: the last [`SEEN_HASH_SIZE`] bytes of a
/// non-identity, non-dummy CID.
pub(crate) type SeenKey = [u8; SEEN_HASH_SIZE];

/// Derive the seen-map key for a block, if it participates in dedup.
pub(crate) fn seen_key(cid: &Cid, is_cid_inlined: bool, dummy_hashed: bool) -> Option<SeenKey> {
    if is_cid_inlined || dummy_hashed {
        return None;
    }
    let bytes = cid.as_bytes();
    debug_assert!(bytes.len() >= SEEN_HASH_SIZE);
    let mut key = [0u8; SEEN_HASH_SIZE];
    key.copy_from_slice(&bytes[bytes.len() - SEEN_HASH_SIZE..]);
    Some(key)
}

/// Per-unique-block record in the dedup set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UniqueBlockStats {
    pub size_block: usize,
    /// True when the block carried stream data (a leaf).
    pub is_data: bool,
}

/// First-seen record for a root CID.
///
/// Retained for introspection; nothing on the hot path reads it back.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub(crate) struct SeenRoot {
    pub order: usize,
    pub cid: Cid,
}

/// Both dedup maps behind the pipeline's single mutex.
#[derive(Default)]
pub(crate) struct SeenMaps {
    pub blocks: HashMap<SeenKey, UniqueBlockStats>,
    pub roots: HashMap<SeenKey, SeenRoot>,
}

/// Eventually-consistent DAG counters, updated by post-processing and
/// read after every in-flight task has been joined.
#[derive(Default)]
pub(crate) struct DagCounters {
    pub nodes: AtomicI64,
    pub wire_size: AtomicI64,
    pub payload: AtomicI64,
}

impl DagCounters {
    pub(crate) fn snapshot(&self) -> DagStats {
        DagStats {
            nodes: self.nodes.load(Ordering::Relaxed),
            wire_size: self.wire_size.load(Ordering::Relaxed),
            payload: self.payload.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------
// summary wire types
// ---------------------------------------------------------------------

/// Logical DAG counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DagStats {
    /// Block count, including duplicates.
    pub nodes: i64,
    /// On-wire bytes, including duplicates.
    #[serde(rename = "wireSize")]
    pub wire_size: i64,
    /// Stream payload bytes.
    pub payload: i64,
}

/// Per-root summary entry.
#[derive(Debug, Clone, Serialize)]
pub struct RootStats {
    /// Formatted CID.
    pub cid: String,
    /// Cumulative DAG bytes under this root.
    #[serde(rename = "wireSize")]
    pub wire_size: u64,
    /// Cumulative payload bytes under this root.
    pub payload: u64,
    /// True when an earlier (sub)stream already produced this root.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Host/process counters for the summary's `sys` object.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SysStats {
    #[serde(rename = "readCalls")]
    pub read_calls: u64,
    #[serde(rename = "elapsedNanoseconds")]
    pub elapsed_nsecs: i64,
    #[serde(rename = "cpuUserNanoseconds")]
    pub cpu_user_nsecs: i64,
    #[serde(rename = "cpuSystemNanoseconds")]
    pub cpu_sys_nsecs: i64,
    #[serde(rename = "maxMemoryUsed")]
    pub max_rss_bytes: i64,
    #[serde(rename = "cacheMinorFaults")]
    pub min_flt: i64,
    #[serde(rename = "cacheMajorFaults")]
    pub maj_flt: i64,
    #[serde(rename = "blockIoReads", skip_serializing_if = "is_zero")]
    pub bio_read: i64,
    #[serde(rename = "blockIoWrites", skip_serializing_if = "is_zero")]
    pub bio_write: i64,
    #[serde(rename = "signalsReceived", skip_serializing_if = "is_zero")]
    pub sigs: i64,
    #[serde(rename = "contextSwitchYields")]
    pub ctx_sw_yield: i64,
    #[serde(rename = "contextSwitchForced")]
    pub ctx_sw_forced: i64,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    pub os: &'static str,
    #[serde(rename = "argvExpanded")]
    pub argv_expanded: Vec<String>,
    #[serde(rename = "argvInitial")]
    pub argv_initial: Vec<String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// The final summary, emitted as one JSON line on `stats-jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct StatSummary {
    #[serde(rename = "event")]
    pub event_type: &'static str,
    #[serde(rename = "logicalDag")]
    pub dag: DagStats,
    #[serde(rename = "subStreams")]
    pub streams: u64,
    pub roots: Vec<RootStats>,
    pub sys: SysStats,
}

/// Dataset-level dedup totals derived from the seen-block map.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupTotals {
    pub unique_blocks: i64,
    pub unique_bytes: i64,
    pub unique_leaf_blocks: i64,
    pub unique_leaf_bytes: i64,
}

// ---------------------------------------------------------------------
// platform probe
// ---------------------------------------------------------------------

/// Resource-usage counters as sampled by a [`PlatformProbe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub cpu_user_nsecs: i64,
    pub cpu_sys_nsecs: i64,
    pub max_rss_bytes: i64,
    pub min_flt: i64,
    pub maj_flt: i64,
    pub bio_read: i64,
    pub bio_write: i64,
    pub sigs: i64,
    pub ctx_sw_yield: i64,
    pub ctx_sw_forced: i64,
}

/// Injected collaborator sampling process resource usage around a run.
pub trait PlatformProbe: Send + Sync {
    /// Sample current usage; `None` when the platform offers nothing.
    fn snapshot(&self) -> Option<ResourceUsage>;
}

/// Probe that reports nothing (library default; binaries inject a real one).
pub struct NoopProbe;

impl PlatformProbe for NoopProbe {
    fn snapshot(&self) -> Option<ResourceUsage> {
        None
    }
}
