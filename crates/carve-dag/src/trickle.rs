//! The trickle collector.
//!
//! Produces a "side-balanced" DAG optimized for streaming reads from the
//! start of a file: every DAG node holds up to `max_direct_leaves` leaves
//! followed by sibling subtrees, `max_sibling_subgroups` per depth, each
//! subtree one depth deeper than the last set. The builder is the
//! streaming equivalent of the go-unixfs recursive trickle layout: only
//! the rightmost path of the DAG is open at any time, and a node seals
//! into its parent as soon as arithmetic on the incoming leaf index shows
//! a new subtree starting above it.
//!
//! The placement depth of leaf `i` is `floor(log(i/L) / log(1+G))`, which
//! is exactly what the capacity walk below computes without floats.

use std::sync::Arc;

use carve_block::{DataSource, Header};

use crate::{Collector, NodeEncoder, empty_source};

/// Streaming trickle-DAG builder.
pub struct TrickleCollector {
    max_direct_leaves: u64,
    max_sibling_subgroups: u64,
    unixfs_nul_leaf_compat: bool,
    encoder: Box<dyn NodeEncoder>,
    /// Child lists of the open rightmost path, root first.
    open: Vec<Vec<Arc<Header>>>,
    leaf_count: u64,
    nul_root: Option<Arc<Header>>,
    descent_prealloc: usize,
}

impl std::fmt::Debug for TrickleCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrickleCollector")
            .field("max_direct_leaves", &self.max_direct_leaves)
            .field("max_sibling_subgroups", &self.max_sibling_subgroups)
            .finish_non_exhaustive()
    }
}

impl TrickleCollector {
    /// Both limits must be at least 1 (the IPFS defaults are 174 and 4).
    pub fn new(
        max_direct_leaves: usize,
        max_sibling_subgroups: usize,
        unixfs_nul_leaf_compat: bool,
        encoder: Box<dyn NodeEncoder>,
    ) -> TrickleCollector {
        // Pre-allocate the descent stack for ~8M leaves (usually 6 or 7).
        let descent_prealloc = (((1u64 << 23) as f64 / max_direct_leaves as f64).ln()
            / (1.0 + max_sibling_subgroups as f64).ln())
        .ceil() as usize;

        TrickleCollector {
            max_direct_leaves: max_direct_leaves as u64,
            max_sibling_subgroups: max_sibling_subgroups as u64,
            unixfs_nul_leaf_compat,
            encoder,
            open: Vec::with_capacity(descent_prealloc + 1),
            leaf_count: 0,
            nul_root: None,
            descent_prealloc,
        }
    }

    /// Seal open nodes deeper than `node_idx`, deepest first, linking
    /// each into its parent.
    fn seal_down_to(&mut self, node_idx: usize) {
        while self.open.len() > node_idx + 1 {
            if let Some(children) = self.open.pop() {
                let link = self.encoder.new_link(&children);
                if let Some(parent) = self.open.last_mut() {
                    parent.push(link);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.open = Vec::with_capacity(self.descent_prealloc + 1);
        self.leaf_count = 0;
        self.nul_root = None;
    }
}

impl Collector for TrickleCollector {
    fn append_data(&mut self, source: Option<DataSource>) -> Arc<Header> {
        if source.is_none() && self.unixfs_nul_leaf_compat && self.leaf_count == 0 {
            // IPFS compatibility: an empty stream becomes the canonical
            // empty UnixFS file, not a wrapped empty leaf.
            let header = self.encoder.nul_leaf();
            self.nul_root = Some(header.clone());
            return header;
        }

        let header = self
            .encoder
            .new_leaf(source.unwrap_or_else(empty_source));
        self.append_block(header.clone());
        header
    }

    fn append_block(&mut self, header: Arc<Header>) {
        let index = self.leaf_count;
        if self.open.is_empty() {
            self.open.push(Vec::new());
        }

        if index == 0 || index % self.max_direct_leaves != 0 {
            if let Some(tail) = self.open.last_mut() {
                tail.push(header);
            }
        } else {
            // The leaf opens a fresh subtree. Walk the capacity ladder
            // from the root: at each open node, subtract its direct
            // leaves, then find which subtree ordinal the remainder
            // falls into (ordinal t has depth t/G + 1 and capacity
            // L*(1+G)^(t/G)). Remainder zero means the subtree starts
            // here; otherwise descend into the still-open child.
            let leaves = self.max_direct_leaves as u128;
            let groups = self.max_sibling_subgroups as u128;
            let mut remainder = index as u128;
            let mut node_idx = 0usize;
            loop {
                remainder -= leaves;
                let mut ordinal: u128 = 0;
                loop {
                    let capacity = leaves * (1 + groups).pow((ordinal / groups) as u32);
                    if remainder < capacity {
                        break;
                    }
                    remainder -= capacity;
                    ordinal += 1;
                }
                if remainder == 0 {
                    self.seal_down_to(node_idx);
                    self.open.push(vec![header]);
                    break;
                }
                node_idx += 1;
            }
        }

        self.leaf_count += 1;
    }

    fn flush_state(&mut self) -> Option<Arc<Header>> {
        if let Some(root) = self.nul_root.take() {
            self.reset();
            return Some(root);
        }
        if self.leaf_count == 0 {
            self.reset();
            return None;
        }

        self.seal_down_to(0);
        let children = self.open.pop()?;
        let root = self.encoder.new_link(&children);
        self.reset();
        Some(root)
    }
}
