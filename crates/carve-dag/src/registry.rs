//! String-keyed selection of collectors and node encoders.
//!
//! Specs are underscore-joined like the chunker specs: name first, then
//! `key=value` options or bare flags, e.g.
//! `trickle_max-direct-leaves=2048_max-sibling-subgroups=8` or
//! `unixfsv1_unixfs-leaf-decorator-type=2_cidv0`.

use std::sync::Arc;

use carve_block::BlockMaker;

use crate::{
    CidRefsCollector, Collector, FixedOutdegreeCollector, LinkBlockCallback, NoopCollector,
    NodeEncoder, TrickleCollector, UnixFsV1Encoder, UnixFsV1Spec,
};

/// Registry names, in help-text order.
pub const AVAILABLE_COLLECTORS: &[&str] =
    &["fixed-cid-refs-size", "fixed-outdegree", "none", "trickle"];

/// Registry names, in help-text order.
pub const AVAILABLE_NODE_ENCODERS: &[&str] = &["unixfsv1"];

/// Parse a node-encoder spec string.
///
/// Parsing is separate from construction because the `cidv0` option
/// feeds the block maker, which must exist before the encoder.
pub fn parse_encoder_spec(spec: &str) -> Result<UnixFsV1Spec, Vec<String>> {
    let mut parts = spec.split('_');
    let name = parts.next().unwrap_or_default();
    if name != "unixfsv1" {
        return Err(vec![format!(
            "encoder '{name}' not found. Available encoder names are: {}",
            AVAILABLE_NODE_ENCODERS.join(", ")
        )]);
    }

    let mut parsed = UnixFsV1Spec {
        leaf_decorator_type: None,
        cid_v0: false,
        legacy_no_tsize: false,
    };
    let mut errs = Vec::new();

    for part in parts {
        match part.split_once('=') {
            Some(("unixfs-leaf-decorator-type", value)) => match value {
                "0" => parsed.leaf_decorator_type = Some(0),
                "2" => parsed.leaf_decorator_type = Some(2),
                _ => errs.push(
                    "when provided, value of 'unixfs-leaf-decorator-type' can be only 0 or 2"
                        .into(),
                ),
            },
            Some((key, _)) => errs.push(format!("unknown unixfsv1 encoder option '{key}'")),
            None => match part {
                "cidv0" => parsed.cid_v0 = true,
                "legacy-no-tsize" => parsed.legacy_no_tsize = true,
                other => errs.push(format!("unknown unixfsv1 encoder option '{other}'")),
            },
        }
    }

    if errs.is_empty() { Ok(parsed) } else { Err(errs) }
}

/// Construct the unixfsv1 encoder from a parsed spec.
pub fn new_node_encoder(
    spec: UnixFsV1Spec,
    maker: Arc<BlockMaker>,
    new_link_block_callback: LinkBlockCallback,
) -> Box<dyn NodeEncoder> {
    Box::new(UnixFsV1Encoder::new(spec, maker, new_link_block_callback))
}

/// Instantiate a collector from its spec string.
pub fn new_collector(
    spec: &str,
    encoder: Box<dyn NodeEncoder>,
) -> Result<Box<dyn Collector>, Vec<String>> {
    let mut parts = spec.split('_');
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match name {
        "none" => {
            if let Some(extra) = args.first() {
                return Err(vec![format!(
                    "collector 'none' accepts no options, got '{extra}'"
                )]);
            }
            Ok(Box::new(NoopCollector::new(encoder)))
        }
        "fixed-outdegree" => {
            let mut max_outdegree: Option<usize> = None;
            let mut errs = Vec::new();
            for (key, value) in key_values(&args, &mut errs) {
                match key {
                    "max-outdegree" => parse_into(&mut max_outdegree, key, value, &mut errs),
                    other => errs.push(format!("unknown fixed-outdegree option '{other}'")),
                }
            }
            let max_outdegree = required(max_outdegree, "max-outdegree", &mut errs);
            if let Some(v) = max_outdegree
                && v < 2
            {
                errs.push(format!("value '{v}' for max-outdegree out of range [2:]"));
            }
            match (max_outdegree, errs.is_empty()) {
                (Some(v), true) => Ok(Box::new(FixedOutdegreeCollector::new(v, encoder))),
                _ => Err(errs),
            }
        }
        "fixed-cid-refs-size" => {
            let mut max_refs: Option<usize> = None;
            let mut errs = Vec::new();
            for (key, value) in key_values(&args, &mut errs) {
                match key {
                    "max-cid-refs-size" => parse_into(&mut max_refs, key, value, &mut errs),
                    other => errs.push(format!("unknown fixed-cid-refs-size option '{other}'")),
                }
            }
            let max_refs = required(max_refs, "max-cid-refs-size", &mut errs);
            if let Some(v) = max_refs
                && v < 160
            {
                errs.push(format!(
                    "value '{v}' for max-cid-refs-size out of range [160:]"
                ));
            }
            match (max_refs, errs.is_empty()) {
                (Some(v), true) => Ok(Box::new(CidRefsCollector::new(v, encoder))),
                _ => Err(errs),
            }
        }
        "trickle" => {
            let mut max_direct_leaves: Option<usize> = None;
            let mut max_sibling_subgroups: Option<usize> = None;
            let mut compat = false;
            let mut errs = Vec::new();
            for arg in &args {
                match arg.split_once('=') {
                    Some(("max-direct-leaves", value)) => {
                        parse_into(&mut max_direct_leaves, "max-direct-leaves", value, &mut errs)
                    }
                    Some(("max-sibling-subgroups", value)) => parse_into(
                        &mut max_sibling_subgroups,
                        "max-sibling-subgroups",
                        value,
                        &mut errs,
                    ),
                    Some((key, _)) => errs.push(format!("unknown trickle option '{key}'")),
                    None if *arg == "unixfs-nul-leaf-compat" => compat = true,
                    None => errs.push(format!("unknown trickle option '{arg}'")),
                }
            }
            let leaves = required(max_direct_leaves, "max-direct-leaves", &mut errs);
            let groups = required(max_sibling_subgroups, "max-sibling-subgroups", &mut errs);
            if let Some(v) = leaves
                && v < 1
            {
                errs.push(format!("value '{v}' for max-direct-leaves out of range [1:]"));
            }
            if let Some(v) = groups
                && v < 1
            {
                errs.push(format!(
                    "value '{v}' for max-sibling-subgroups out of range [1:]"
                ));
            }
            match (leaves, groups, errs.is_empty()) {
                (Some(l), Some(g), true) => {
                    Ok(Box::new(TrickleCollector::new(l, g, compat, encoder)))
                }
                _ => Err(errs),
            }
        }
        other => Err(vec![format!(
            "collector '{other}' not found. Available collector names are: {}",
            AVAILABLE_COLLECTORS.join(", ")
        )]),
    }
}

fn key_values<'a>(args: &[&'a str], errs: &mut Vec<String>) -> Vec<(&'a str, &'a str)> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg.split_once('=') {
            Some((k, v)) => out.push((k, v)),
            None => errs.push(format!("option '{arg}' is not in key=value form")),
        }
    }
    out
}

fn parse_into(
    slot: &mut Option<usize>,
    key: &str,
    value: &str,
    errs: &mut Vec<String>,
) {
    match value.parse() {
        Ok(v) => *slot = Some(v),
        Err(e) => errs.push(format!("invalid value '{value}' for '{key}': {e}")),
    }
}

fn required(slot: Option<usize>, key: &str, errs: &mut Vec<String>) -> Option<usize> {
    if slot.is_none() {
        errs.push(format!("a value for {key} must be specified"));
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::counting_encoder;

    #[test]
    fn test_encoder_spec_parsing() {
        let plain = parse_encoder_spec("unixfsv1").unwrap();
        assert_eq!(plain.leaf_decorator_type, None);
        assert!(!plain.cid_v0);

        let full =
            parse_encoder_spec("unixfsv1_unixfs-leaf-decorator-type=2_cidv0_legacy-no-tsize")
                .unwrap();
        assert_eq!(full.leaf_decorator_type, Some(2));
        assert!(full.cid_v0);
        assert!(full.legacy_no_tsize);

        assert!(parse_encoder_spec("unixfsv1_unixfs-leaf-decorator-type=1").is_err());
        assert!(parse_encoder_spec("cbor").is_err());
    }

    #[test]
    fn test_collector_specs() {
        let (encoder, _) = counting_encoder();
        assert!(new_collector("none", encoder).is_ok());

        let (encoder, _) = counting_encoder();
        assert!(new_collector("fixed-outdegree_max-outdegree=174", encoder).is_ok());

        let (encoder, _) = counting_encoder();
        assert!(new_collector("fixed-cid-refs-size_max-cid-refs-size=4096", encoder).is_ok());

        let (encoder, _) = counting_encoder();
        assert!(
            new_collector(
                "trickle_max-direct-leaves=174_max-sibling-subgroups=4_unixfs-nul-leaf-compat",
                encoder,
            )
            .is_ok()
        );
    }

    #[test]
    fn test_collector_validation() {
        let (encoder, _) = counting_encoder();
        assert!(new_collector("fixed-outdegree_max-outdegree=1", encoder).is_err());

        let (encoder, _) = counting_encoder();
        assert!(new_collector("fixed-outdegree", encoder).is_err());

        let (encoder, _) = counting_encoder();
        assert!(new_collector("fixed-cid-refs-size_max-cid-refs-size=100", encoder).is_err());

        let (encoder, _) = counting_encoder();
        let errs = new_collector("trickle_max-direct-leaves=0", encoder).unwrap_err();
        assert!(errs.len() >= 2, "range and missing-option errors: {errs:?}");

        let (encoder, _) = counting_encoder();
        assert!(new_collector("balanced", encoder).is_err());
    }
}
