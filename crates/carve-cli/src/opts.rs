//! CLI surface: flag definitions, emitter assignment and the
//! `ipfs add`-compatibility preset.

use clap::Parser;

use carve_engine::PipelineConfig;

/// Stream-ingest stdin into a UnixFSv1 DAG, optionally emitting the
/// blocks as a CARv1 stream plus per-root and aggregate statistics.
#[derive(Debug, Parser)]
#[command(name = "carve", version, about)]
pub struct Cli {
    /// Expect multiple SInt64BE-size-prefixed streams on stdIN.
    #[arg(long)]
    pub multipart: bool,

    /// Skip zero-length streams instead of emitting an IPFS-compatible
    /// zero-length CID.
    #[arg(long)]
    pub skip_nul_inputs: bool,

    /// Use identity-CIDs for blocks with an on-wire size at or below
    /// this value (36 is recommended), 0 disables.
    #[arg(long, value_name = "bytes")]
    pub inline_max_size: Option<usize>,

    /// Number of concurrent hashing workers. 0 (disable) for predictable
    /// benchmarking.
    #[arg(long, value_name = "integer", default_value_t = 0)]
    pub async_hashers: usize,

    /// Size of the quantized ring buffer used for ingestion.
    #[arg(long, value_name = "bytes", default_value_t = 24 * 1024 * 1024)]
    pub ring_buffer_size: usize,

    /// (EXPERT SETTING) Size of each buffer synchronization sector.
    #[arg(long = "ring-buffer-sync-size", value_name = "bytes", default_value_t = 64 * 1024)]
    pub ring_buffer_sect_size: usize,

    /// (EXPERT SETTING) Perform next read(2) only when this much free
    /// space is available in the buffer.
    #[arg(long = "ring-buffer-min-sysread", value_name = "bytes", default_value_t = 256 * 1024)]
    pub ring_buffer_min_read: usize,

    /// Bitfield of stat aggregations: bit0 enables block-level stats.
    #[arg(long, value_name = "uint", default_value_t = 1)]
    pub stats_active: u32,

    /// Hash function to use, one of: blake3, none, sha2-256.
    #[arg(long, value_name = "algname")]
    pub hash: Option<String>,

    /// Amount of bits taken from the *start* of the hash output.
    #[arg(long, value_name = "integer", default_value_t = 256)]
    pub hash_bits: usize,

    /// Multibase for CID output: base32 or base36.
    #[arg(long, value_name = "string", default_value = "base36")]
    pub cid_multibase: String,

    /// Stream chunking algorithm chain.
    #[arg(long, value_name = "chname_opt1_..._optN")]
    pub chunker: Option<String>,

    /// Node-forming algorithm chain.
    #[arg(long, value_name = "colname_opt1_..._optN")]
    pub collector: Option<String>,

    /// The IPLD-ish node encoder to use.
    #[arg(long, value_name = "encname_opt1_..._optN")]
    pub node_encoder: Option<String>,

    /// Emitters to activate on stdOUT.
    #[arg(long = "emit-stdout", value_name = "comma,sep,emitters", value_delimiter = ',', default_value = "roots-jsonl")]
    pub emit_stdout: Vec<String>,

    /// Emitters to activate on stdERR.
    #[arg(long = "emit-stderr", value_name = "comma,sep,emitters", value_delimiter = ',', default_value = "stats-text")]
    pub emit_stderr: Vec<String>,

    /// A complete go-ipfs/js-ipfs add command serving as a basis config
    /// (any conflicting option will take precedence).
    #[arg(long = "ipfs-add-compatible-command", value_name = "cmdstring")]
    pub ipfs_compat_command: Option<String>,
}

impl Cli {
    /// Resolve the flag set (plus any compat preset) into the pipeline
    /// configuration, collecting every problem.
    pub fn build_config(&self) -> Result<PipelineConfig, Vec<String>> {
        let mut errs = Vec::new();

        let mut preset = Preset::default();
        if let Some(command) = &self.ipfs_compat_command {
            match preset_from_ipfs(command) {
                Ok(parsed) => preset = parsed,
                Err(mut preset_errs) => errs.append(&mut preset_errs),
            }
        }

        let cfg = PipelineConfig {
            chunker: self
                .chunker
                .clone()
                .or(preset.chunker)
                .unwrap_or_else(|| "fixed-size_1048576".into()),
            collector: self.collector.clone().or(preset.collector).unwrap_or_else(
                || "trickle_max-direct-leaves=2048_max-sibling-subgroups=8".into(),
            ),
            node_encoder: self
                .node_encoder
                .clone()
                .or(preset.node_encoder)
                .unwrap_or_else(|| "unixfsv1".into()),
            hash: self
                .hash
                .clone()
                .or(preset.hash)
                .unwrap_or_else(|| "sha2-256".into()),
            hash_bits: self.hash_bits,
            inline_max_size: self
                .inline_max_size
                .or(preset.inline_max_size)
                .unwrap_or(36),
            cid_multibase: self.cid_multibase.clone(),
            async_hashers: self.async_hashers,
            ring_buffer_size: self.ring_buffer_size,
            ring_buffer_sect_size: self.ring_buffer_sect_size,
            ring_buffer_min_read: self.ring_buffer_min_read,
            multipart_stream: self.multipart,
            skip_nul_inputs: self.skip_nul_inputs,
            track_blocks: self.stats_active & 1 == 1,
        };

        if errs.is_empty() { Ok(cfg) } else { Err(errs) }
    }

    /// The normalized `--opt=value` list for the summary, generic options
    /// first (sorted), CID-determining options last in a fixed order.
    pub fn argv_expanded(&self, cfg: &PipelineConfig) -> Vec<String> {
        let mut generic = vec![
            format!("--async-hashers={}", cfg.async_hashers),
            format!("--cid-multibase={}", cfg.cid_multibase),
            format!("--emit-stderr={}", self.emit_stderr.join(",")),
            format!("--emit-stdout={}", self.emit_stdout.join(",")),
            format!("--multipart={}", cfg.multipart_stream),
            format!("--ring-buffer-min-sysread={}", cfg.ring_buffer_min_read),
            format!("--ring-buffer-size={}", cfg.ring_buffer_size),
            format!("--ring-buffer-sync-size={}", cfg.ring_buffer_sect_size),
            format!("--skip-nul-inputs={}", cfg.skip_nul_inputs),
            format!("--stats-active={}", self.stats_active),
        ];
        generic.sort();
        // CID-determining options come last, in a predefined order.
        generic.extend([
            format!("--inline-max-size={}", cfg.inline_max_size),
            format!("--hash={}", cfg.hash),
            format!("--hash-bits={}", cfg.hash_bits),
            format!("--chunker={}", cfg.chunker),
            format!("--collector={}", cfg.collector),
            format!("--node-encoder={}", cfg.node_encoder),
        ]);
        generic
    }
}

// ---------------------------------------------------------------------
// ipfs-add compat preset
// ---------------------------------------------------------------------

#[derive(Debug, Default)]
struct Preset {
    hash: Option<String>,
    inline_max_size: Option<usize>,
    chunker: Option<String>,
    collector: Option<String>,
    node_encoder: Option<String>,
}

/// Translate a `[ipfs] add ...` command line into preset values.
fn preset_from_ipfs(command: &str) -> Result<Preset, Vec<String>> {
    let mut errs = Vec::new();

    // recognised ipfs flags, with their go-ipfs defaults
    let mut cid_version = 0i64;
    let mut inline_active = false;
    let mut inline_limit: Option<usize> = None;
    let mut use_raw_leaves: Option<bool> = None;
    let mut upgrade_v0 = false;
    let mut trickle = false;
    let mut ipfs_chunker = String::from("size");
    let mut ipfs_hash: Option<String> = None;

    let mut tokens = command.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token == "ipfs" || token == "add" {
            continue;
        }
        let Some(stripped) = token.strip_prefix("--") else {
            errs.push(format!("unexpected ipfs-compatible parameter(s): {token}..."));
            continue;
        };
        let (key, mut value) = match stripped.split_once('=') {
            Some((k, v)) => (k, Some(v.to_string())),
            None => (stripped, None),
        };
        // value-taking flags also accept the space-separated form
        if value.is_none()
            && matches!(key, "cid-version" | "inline-limit" | "chunker" | "hash")
            && let Some(next) = tokens.peek()
            && !next.starts_with("--")
        {
            value = tokens.next().map(str::to_string);
        }

        match (key, value) {
            ("cid-version", Some(v)) => match v.parse() {
                Ok(n) => cid_version = n,
                Err(e) => errs.push(format!("invalid --cid-version '{v}': {e}")),
            },
            ("inline", _) => inline_active = true,
            ("inline-limit", Some(v)) => match v.parse() {
                Ok(n) => inline_limit = Some(n),
                Err(e) => errs.push(format!("invalid --inline-limit '{v}': {e}")),
            },
            ("raw-leaves", v) => {
                use_raw_leaves = Some(v.as_deref() != Some("false"));
            }
            ("upgrade-cidv0-in-output", _) => upgrade_v0 = true,
            ("trickle", _) => trickle = true,
            ("chunker", Some(v)) => ipfs_chunker = v,
            ("hash", Some(v)) => ipfs_hash = Some(v),
            (other, _) => errs.push(format!("unexpected ipfs-compatible parameter(s): --{other}...")),
        }
    }

    if !errs.is_empty() {
        return Err(errs);
    }

    let mut preset = Preset {
        hash: Some(ipfs_hash.unwrap_or_else(|| "sha2-256".into())),
        inline_max_size: Some(if inline_active {
            inline_limit.unwrap_or(32)
        } else {
            0
        }),
        ..Preset::default()
    };

    // either trickle or fixed-outdegree, go-ipfs doesn't understand much else
    preset.collector = Some(if trickle {
        "trickle_max-direct-leaves=174_max-sibling-subgroups=4_unixfs-nul-leaf-compat".into()
    } else {
        "fixed-outdegree_max-outdegree=174".into()
    });

    let mut encoder_opts = vec!["unixfsv1".to_string()];
    if cid_version != 1 {
        if upgrade_v0 && cid_version == 0 {
            encoder_opts.push("cidv0".into());
        } else {
            errs.push(format!(
                "--cid-version={cid_version} is unsupported ( try --cid-version=1 or --upgrade-cidv0-in-output )"
            ));
        }
    } else if use_raw_leaves.is_none() {
        use_raw_leaves = Some(true);
    }
    if !use_raw_leaves.unwrap_or(false) {
        encoder_opts.push(if trickle {
            "unixfs-leaf-decorator-type=0".into()
        } else {
            "unixfs-leaf-decorator-type=2".into()
        });
    }
    preset.node_encoder = Some(encoder_opts.join("_"));

    preset.chunker = translate_ipfs_chunker(&ipfs_chunker, &mut errs);

    if errs.is_empty() { Ok(preset) } else { Err(errs) }
}

fn translate_ipfs_chunker(spec: &str, errs: &mut Vec<String>) -> Option<String> {
    let parts: Vec<&str> = spec.split('-').collect();
    let translated = match parts.as_slice() {
        ["size"] => Some("fixed-size_262144".to_string()),
        ["size", n] => Some(format!("fixed-size_{n}")),
        ["rabin"] => Some(rabin_spec(18, 87_381, 393_216)),
        ["rabin", avg] => avg
            .parse::<u64>()
            .ok()
            .filter(|avg| *avg > 1)
            .map(|avg| rabin_spec(avg.ilog2(), avg / 3, avg + avg / 2)),
        ["rabin", min, avg, max] => match (
            min.parse::<u64>(),
            avg.parse::<u64>(),
            max.parse::<u64>(),
        ) {
            (Ok(min), Ok(avg), Ok(max)) if avg > 1 => Some(rabin_spec(avg.ilog2(), min, max)),
            _ => None,
        },
        ["buzhash"] => Some(
            "buzhash_hash-table=v0_state-target=0_state-mask-bits=17_min-size=131072_max-size=524288"
                .to_string(),
        ),
        _ => None,
    };
    if translated.is_none() {
        errs.push(format!("invalid ipfs-compatible spec --chunker={spec}"));
    }
    translated
}

fn rabin_spec(mask_bits: u32, min: u64, max: u64) -> String {
    format!(
        "rabin_polynomial=17437180132763653_window-size=16_state-target=0_state-mask-bits={mask_bits}_min-size={min}_max-size={max}"
    )
}

// ---------------------------------------------------------------------
// emitter assignment
// ---------------------------------------------------------------------

/// Which standard stream an emitter was mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdout,
    Stderr,
}

/// The resolved emitter → stream assignment.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EmitterAssignment {
    pub stats_text: Option<Target>,
    pub stats_jsonl: Option<Target>,
    pub roots_jsonl: Option<Target>,
    pub car_v1_stream: Option<Target>,
}

const KNOWN_EMITTERS: &[&str] = &[
    "none",
    "stats-text",
    "stats-jsonl",
    "roots-jsonl",
    "car-v1-stream",
];

/// Map the `--emit-stdout` / `--emit-stderr` lists onto streams.
pub fn assign_emitters(
    stdout_list: &[String],
    stderr_list: &[String],
) -> Result<EmitterAssignment, Vec<String>> {
    let mut errs = Vec::new();
    let mut assignment = EmitterAssignment::default();

    for (target, flag, list) in [
        (Target::Stderr, "--emit-stderr", stderr_list),
        (Target::Stdout, "--emit-stdout", stdout_list),
    ] {
        for name in list {
            if !KNOWN_EMITTERS.contains(&name.as_str()) {
                errs.push(format!(
                    "invalid emitter '{name}' specified for {flag}. Available emitters are: {}",
                    KNOWN_EMITTERS.join(", ")
                ));
                continue;
            }
            let slot = match name.as_str() {
                "none" => continue,
                "stats-text" => &mut assignment.stats_text,
                "stats-jsonl" => &mut assignment.stats_jsonl,
                "roots-jsonl" => &mut assignment.roots_jsonl,
                _ => &mut assignment.car_v1_stream,
            };
            if slot.is_some() {
                errs.push(format!("emitter '{name}' specified more than once"));
            } else {
                *slot = Some(target);
            }
        }

        // none, stats-text and car-v1-stream want their stream to themselves
        for exclusive in ["none", "stats-text", "car-v1-stream"] {
            if list.iter().any(|n| n == exclusive) && list.len() > 1 {
                errs.push(format!(
                    "when specified, emitter '{exclusive}' must be the sole argument to {flag}"
                ));
            }
        }
    }

    if errs.is_empty() { Ok(assignment) } else { Err(errs) }
}
