//! Pipeline configuration.

use std::io::Write;

/// Everything that shapes the output bytes, fixed before processing.
///
/// The defaults are opinionated: 1 MiB static chunking into a trickle
/// DAG with identity-inlining of tiny blocks, sha2-256/256 and base36
/// CID rendering.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunker spec, e.g. `fixed-size_1048576`.
    pub chunker: String,
    /// Collector spec, e.g. `trickle_max-direct-leaves=2048_max-sibling-subgroups=8`.
    pub collector: String,
    /// Node encoder spec, e.g. `unixfsv1_unixfs-leaf-decorator-type=2`.
    pub node_encoder: String,
    /// Hash function name (`sha2-256`, `blake3`, `none`).
    pub hash: String,
    /// Bits taken from the *start* of the hash output.
    pub hash_bits: usize,
    /// Identity-CID blocks at or below this wire size; 0 disables.
    pub inline_max_size: usize,
    /// Multibase for formatted CIDs: `base32` or `base36`.
    pub cid_multibase: String,
    /// Hashing worker threads; 0 hashes inline (deterministic default).
    pub async_hashers: usize,
    /// Ring buffer total size in bytes.
    pub ring_buffer_size: usize,
    /// Ring buffer synchronization sector size in bytes.
    pub ring_buffer_sect_size: usize,
    /// Minimum free space before the next read(2) is issued.
    pub ring_buffer_min_read: usize,
    /// Expect SInt64BE-size-prefixed substreams on the input.
    pub multipart_stream: bool,
    /// Skip zero-length streams instead of emitting the nul-input CID.
    pub skip_nul_inputs: bool,
    /// Maintain the seen-block map (dedup stats; required for CAR output).
    pub track_blocks: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            chunker: "fixed-size_1048576".into(),
            collector: "trickle_max-direct-leaves=2048_max-sibling-subgroups=8".into(),
            node_encoder: "unixfsv1".into(),
            hash: "sha2-256".into(),
            hash_bits: 256,
            inline_max_size: 36,
            cid_multibase: "base36".into(),
            async_hashers: 0,
            ring_buffer_size: 24 * 1024 * 1024,
            ring_buffer_sect_size: 64 * 1024,
            ring_buffer_min_read: 256 * 1024,
            multipart_stream: false,
            skip_nul_inputs: false,
            track_blocks: true,
        }
    }
}

/// Output writers, assigned by the caller (the CLI maps emitter names to
/// stdout/stderr; tests capture into buffers).
#[derive(Default)]
pub struct Emitters {
    /// One JSON line per produced root.
    pub roots_jsonl: Option<Box<dyn Write + Send>>,
    /// The final summary as a single JSON line.
    pub stats_jsonl: Option<Box<dyn Write + Send>>,
    /// The CARv1 stream.
    pub car_v1_stream: Option<Box<dyn Write + Send>>,
}
