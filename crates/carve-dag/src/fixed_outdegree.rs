//! The fixed-outdegree collector: a balanced DAG where every node holds
//! at most `max_outdegree` children.

use std::sync::Arc;

use carve_block::{DataSource, Header};

use crate::{Collector, NodeEncoder, empty_source};

/// Stack-of-layers DAG builder with a fixed per-node child count.
pub struct FixedOutdegreeCollector {
    max_outdegree: usize,
    encoder: Box<dyn NodeEncoder>,
    stack: Vec<Vec<Arc<Header>>>,
}

impl std::fmt::Debug for FixedOutdegreeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedOutdegreeCollector")
            .field("max_outdegree", &self.max_outdegree)
            .finish_non_exhaustive()
    }
}

impl FixedOutdegreeCollector {
    /// `max_outdegree` must be at least 2 (the IPFS default is 174).
    pub fn new(max_outdegree: usize, encoder: Box<dyn NodeEncoder>) -> FixedOutdegreeCollector {
        FixedOutdegreeCollector {
            max_outdegree,
            encoder,
            stack: vec![Vec::new()],
        }
    }

    fn compact_layers(&mut self, full_merge: bool) {
        let mut layer_idx = 0;
        while layer_idx < self.stack.len() {
            let cur_len = self.stack[layer_idx].len();
            if (cur_len == 1 && layer_idx == self.stack.len() - 1)
                || (!full_merge && cur_len < self.max_outdegree)
            {
                break;
            }

            if layer_idx == self.stack.len() - 1 {
                self.stack.push(Vec::new());
            }

            let mut last_cut = 0usize;
            while self.stack[layer_idx].len() - last_cut >= self.max_outdegree
                || (full_merge && last_cut < self.stack[layer_idx].len())
            {
                let next_cut =
                    (last_cut + self.max_outdegree).min(self.stack[layer_idx].len());
                let link = self
                    .encoder
                    .new_link(&self.stack[layer_idx][last_cut..next_cut]);
                self.stack[layer_idx + 1].push(link);
                last_cut = next_cut;
            }

            self.stack[layer_idx].drain(..last_cut);
            layer_idx += 1;
        }
    }
}

impl Collector for FixedOutdegreeCollector {
    fn append_data(&mut self, source: Option<DataSource>) -> Arc<Header> {
        let header = self
            .encoder
            .new_leaf(source.unwrap_or_else(empty_source));
        self.append_block(header.clone());
        header
    }

    fn append_block(&mut self, header: Arc<Header>) {
        self.stack[0].push(header);

        // Compact every time the entry layer fills up, to keep memory
        // bounded on very large DAGs.
        if self.stack[0].len() >= self.max_outdegree {
            self.compact_layers(false);
        }
    }

    fn flush_state(&mut self) -> Option<Arc<Header>> {
        if self.stack.last()?.is_empty() {
            return None;
        }

        self.compact_layers(true);
        let root = self.stack.last()?.first().cloned();

        // The instance is reused across substreams; reset to fresh state.
        self.stack = vec![Vec::new()];
        root
    }
}
