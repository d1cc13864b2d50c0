//! String-keyed chunker selection.
//!
//! Chunker specs are underscore-joined: the algorithm name first, then
//! `key=value` sub-options, e.g. `fixed-size_1048576` or
//! `buzhash_hash-table=v0_state-mask-bits=17_min-size=131072_max-size=524288`.
//! Errors are collected into a list so a caller can surface every problem
//! at once.

use carve_types::MAX_LEAF_PAYLOAD_SIZE;

use crate::buzhash::{BUZ_TABLE_V0, BuzhashChunker, BuzhashConfig};
use crate::fixed::FixedSizeChunker;
use crate::rabin::{RabinChunker, RabinConfig};
use crate::{Chunker, InstanceConstants};

/// Registry names, in help-text order.
pub const AVAILABLE_CHUNKERS: &[&str] = &["buzhash", "fixed-size", "rabin"];

/// Instantiate a chunker from its spec string.
pub fn new_chunker(spec: &str) -> Result<(Box<dyn Chunker>, InstanceConstants), Vec<String>> {
    let mut parts = spec.split('_');
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match name {
        "fixed-size" => new_fixed(&args),
        "rabin" => new_rabin(&args),
        "buzhash" => new_buzhash(&args),
        other => Err(vec![format!(
            "chunker '{other}' not found. Available chunker names are: {}",
            AVAILABLE_CHUNKERS.join(", ")
        )]),
    }
}

fn new_fixed(args: &[&str]) -> Result<(Box<dyn Chunker>, InstanceConstants), Vec<String>> {
    if args.len() != 1 {
        return Err(vec![
            "chunker requires an integer argument, the size of each chunk in bytes".into(),
        ]);
    }
    let size: usize = args[0]
        .parse()
        .map_err(|e| vec![format!("argument parse failed: {e}")])?;
    if size < 1 || size > MAX_LEAF_PAYLOAD_SIZE {
        return Err(vec![format!(
            "provided chunk size '{size}' out of range [1:{MAX_LEAF_PAYLOAD_SIZE}]"
        )]);
    }
    Ok((
        Box::new(FixedSizeChunker::new(size)),
        InstanceConstants {
            min_chunk_size: size,
            max_chunk_size: size,
        },
    ))
}

fn new_rabin(args: &[&str]) -> Result<(Box<dyn Chunker>, InstanceConstants), Vec<String>> {
    let mut cfg = RabinConfig {
        polynomial: 17437180132763653,
        window_size: 16,
        min_size: 87381,
        max_size: 393216,
        mask_bits: 18,
        target: 0,
    };

    let mut errs = Vec::new();
    for (key, value) in parse_sub_options(args, &mut errs) {
        match key {
            "polynomial" => set_num(&mut cfg.polynomial, key, value, &mut errs),
            "window-size" => set_num(&mut cfg.window_size, key, value, &mut errs),
            "min-size" => set_num(&mut cfg.min_size, key, value, &mut errs),
            "max-size" => set_num(&mut cfg.max_size, key, value, &mut errs),
            "state-mask-bits" => set_num(&mut cfg.mask_bits, key, value, &mut errs),
            "state-target" => set_num(&mut cfg.target, key, value, &mut errs),
            other => errs.push(format!("unknown rabin chunker option '{other}'")),
        }
    }
    if cfg.max_size > MAX_LEAF_PAYLOAD_SIZE {
        errs.push(format!(
            "max-size {} out of range [1:{MAX_LEAF_PAYLOAD_SIZE}]",
            cfg.max_size
        ));
    }
    if !errs.is_empty() {
        return Err(errs);
    }

    let min = cfg.min_size;
    let max = cfg.max_size;
    let chunker = RabinChunker::new(cfg).map_err(|e| vec![e])?;
    Ok((
        Box::new(chunker),
        InstanceConstants {
            min_chunk_size: min,
            max_chunk_size: max,
        },
    ))
}

fn new_buzhash(args: &[&str]) -> Result<(Box<dyn Chunker>, InstanceConstants), Vec<String>> {
    let mut cfg = BuzhashConfig {
        min_size: 131072,
        max_size: 524288,
        mask_bits: 17,
        target: 0,
    };
    let mut table = &BUZ_TABLE_V0;

    let mut errs = Vec::new();
    for (key, value) in parse_sub_options(args, &mut errs) {
        match key {
            "hash-table" => match value {
                "v0" => table = &BUZ_TABLE_V0,
                other => errs.push(format!(
                    "unknown buzhash hash-table '{other}' (available: v0)"
                )),
            },
            "min-size" => set_num(&mut cfg.min_size, key, value, &mut errs),
            "max-size" => set_num(&mut cfg.max_size, key, value, &mut errs),
            "state-mask-bits" => set_num(&mut cfg.mask_bits, key, value, &mut errs),
            "state-target" => set_num(&mut cfg.target, key, value, &mut errs),
            other => errs.push(format!("unknown buzhash chunker option '{other}'")),
        }
    }
    if cfg.max_size > MAX_LEAF_PAYLOAD_SIZE {
        errs.push(format!(
            "max-size {} out of range [1:{MAX_LEAF_PAYLOAD_SIZE}]",
            cfg.max_size
        ));
    }
    if !errs.is_empty() {
        return Err(errs);
    }

    let min = cfg.min_size;
    let max = cfg.max_size;
    let chunker = BuzhashChunker::new(table, cfg).map_err(|e| vec![e])?;
    Ok((
        Box::new(chunker),
        InstanceConstants {
            min_chunk_size: min,
            max_chunk_size: max,
        },
    ))
}

/// Split `key=value` sub-options, reporting bare keys as errors.
fn parse_sub_options<'a>(args: &[&'a str], errs: &mut Vec<String>) -> Vec<(&'a str, &'a str)> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg.split_once('=') {
            Some((k, v)) => out.push((k, v)),
            None => errs.push(format!("option '{arg}' is not in key=value form")),
        }
    }
    out
}

fn set_num<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str, errs: &mut Vec<String>)
where
    T::Err: std::fmt::Display,
{
    match value.parse() {
        Ok(v) => *slot = v,
        Err(e) => errs.push(format!("invalid value '{value}' for '{key}': {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size_spec() {
        let (_, constants) = new_chunker("fixed-size_262144").unwrap();
        assert_eq!(constants.min_chunk_size, 262144);
        assert_eq!(constants.max_chunk_size, 262144);
    }

    #[test]
    fn test_fixed_size_requires_argument() {
        assert!(new_chunker("fixed-size").is_err());
        assert!(new_chunker("fixed-size_abc").is_err());
        assert!(new_chunker("fixed-size_0").is_err());
        assert!(new_chunker("fixed-size_2097152").is_err());
    }

    #[test]
    fn test_rabin_defaults() {
        let (_, constants) = new_chunker("rabin").unwrap();
        assert_eq!(constants.min_chunk_size, 87381);
        assert_eq!(constants.max_chunk_size, 393216);
    }

    #[test]
    fn test_rabin_full_spec() {
        let spec = "rabin_polynomial=17437180132763653_window-size=16_state-target=0_state-mask-bits=18_min-size=87381_max-size=393216";
        assert!(new_chunker(spec).is_ok());
    }

    #[test]
    fn test_rabin_rejects_min_over_max() {
        let errs = new_chunker("rabin_min-size=500000_max-size=393216").unwrap_err();
        assert!(errs.iter().any(|e| e.contains("max-size")));
    }

    #[test]
    fn test_buzhash_spec() {
        let spec = "buzhash_hash-table=v0_state-target=0_state-mask-bits=17_min-size=131072_max-size=524288";
        let (_, constants) = new_chunker(spec).unwrap();
        assert_eq!(constants.min_chunk_size, 131072);
        assert_eq!(constants.max_chunk_size, 524288);
    }

    #[test]
    fn test_buzhash_unknown_table() {
        let errs = new_chunker("buzhash_hash-table=nope").unwrap_err();
        assert!(errs[0].contains("hash-table"));
    }

    #[test]
    fn test_unknown_chunker() {
        let errs = new_chunker("whirlpool_5").unwrap_err();
        assert!(errs[0].contains("not found"));
    }

    #[test]
    fn test_errors_accumulate() {
        let errs = new_chunker("rabin_min-size=abc_bogus-key=1_plainflag").unwrap_err();
        assert!(errs.len() >= 3, "expected every error reported: {errs:?}");
    }
}
