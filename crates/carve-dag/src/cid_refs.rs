//! The fixed-cid-refs-size collector: like fixed-outdegree, but nodes
//! are capped by the cumulative byte length of their children's CIDs
//! rather than by child count. Link framing overhead is not counted.

use std::sync::Arc;

use carve_block::{DataSource, Header};

use crate::{Collector, NodeEncoder, empty_source};

#[derive(Default)]
struct Layer {
    cid_refs_size: usize,
    nodes: Vec<Arc<Header>>,
}

/// DAG builder capped by cumulative child-CID bytes per node.
pub struct CidRefsCollector {
    max_cid_refs_size: usize,
    encoder: Box<dyn NodeEncoder>,
    stack: Vec<Layer>,
}

impl std::fmt::Debug for CidRefsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CidRefsCollector")
            .field("max_cid_refs_size", &self.max_cid_refs_size)
            .finish_non_exhaustive()
    }
}

impl CidRefsCollector {
    /// `max_cid_refs_size` must be at least 160.
    pub fn new(max_cid_refs_size: usize, encoder: Box<dyn NodeEncoder>) -> CidRefsCollector {
        CidRefsCollector {
            max_cid_refs_size,
            encoder,
            stack: vec![Layer::default()],
        }
    }

    fn compact_layers(&mut self, full_merge: bool) {
        let mut layer_idx = 0;
        while layer_idx < self.stack.len() {
            let cur = &self.stack[layer_idx];
            if (cur.nodes.len() == 1 && layer_idx == self.stack.len() - 1)
                || (!full_merge && cur.cid_refs_size < self.max_cid_refs_size)
            {
                break;
            }

            if layer_idx == self.stack.len() - 1 {
                self.stack.push(Layer::default());
            }

            let mut cur_idx = 0usize;
            let mut last_cut = 0usize;
            let mut running_ref_size = 0usize;
            while self.stack[layer_idx].cid_refs_size > self.max_cid_refs_size
                || (full_merge && last_cut < self.stack[layer_idx].nodes.len())
            {
                while cur_idx < self.stack[layer_idx].nodes.len() {
                    let cid_len = self.stack[layer_idx].nodes[cur_idx].cid().len();
                    if running_ref_size + cid_len > self.max_cid_refs_size {
                        // A single CID larger than the whole budget still
                        // forms a (singleton) group, or grouping could
                        // never terminate.
                        if cur_idx == last_cut {
                            running_ref_size += cid_len;
                            cur_idx += 1;
                        }
                        break;
                    }
                    running_ref_size += cid_len;
                    cur_idx += 1;
                }

                let link = self
                    .encoder
                    .new_link(&self.stack[layer_idx].nodes[last_cut..cur_idx]);
                let link_cid_len = link.cid().len();
                self.stack[layer_idx + 1].nodes.push(link);
                self.stack[layer_idx + 1].cid_refs_size += link_cid_len;

                self.stack[layer_idx].cid_refs_size -= running_ref_size;
                running_ref_size = 0;
                last_cut = cur_idx;
            }

            self.stack[layer_idx].nodes.drain(..last_cut);
            layer_idx += 1;
        }
    }
}

impl Collector for CidRefsCollector {
    fn append_data(&mut self, source: Option<DataSource>) -> Arc<Header> {
        let header = self
            .encoder
            .new_leaf(source.unwrap_or_else(empty_source));
        self.append_block(header.clone());
        header
    }

    fn append_block(&mut self, header: Arc<Header>) {
        self.stack[0].cid_refs_size += header.cid().len();
        self.stack[0].nodes.push(header);

        if self.stack[0].cid_refs_size >= self.max_cid_refs_size {
            self.compact_layers(false);
        }
    }

    fn flush_state(&mut self) -> Option<Arc<Header>> {
        if self.stack.last()?.nodes.is_empty() {
            return None;
        }

        self.compact_layers(true);
        let root = self.stack.last()?.nodes.first().cloned();

        self.stack = vec![Layer::default()];
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::counting_encoder;
    use bytes::Bytes;
    use std::sync::atomic::Ordering;

    fn leaf(data: Vec<u8>) -> Option<DataSource> {
        Some(DataSource {
            chunk_size: data.len(),
            content: Bytes::from(data),
        })
    }

    #[test]
    fn test_single_leaf_root() {
        let (encoder, links) = counting_encoder();
        let mut collector = CidRefsCollector::new(160, encoder);
        let appended = collector.append_data(leaf(b"alone".to_vec()));
        let root = collector.flush_state().unwrap();
        assert_eq!(root.cid(), appended.cid());
        assert_eq!(links.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_groups_by_cid_bytes() {
        // sha2-256 raw-leaf CIDv1s are 36 bytes; a 160-byte budget packs
        // four CIDs (144 bytes) per node.
        let (encoder, links) = counting_encoder();
        let mut collector = CidRefsCollector::new(160, encoder);
        for i in 0..8u8 {
            collector.append_data(leaf(vec![i; 16]));
        }
        let root = collector.flush_state().unwrap();
        // 8 leaves → two 4-wide groups → one root over the two links.
        assert_eq!(links.load(Ordering::Relaxed), 3);
        assert_eq!(root.size_cumulative_payload(), 8 * 16);
    }

    #[test]
    fn test_remainder_group_on_flush() {
        let (encoder, links) = counting_encoder();
        let mut collector = CidRefsCollector::new(160, encoder);
        for i in 0..5u8 {
            collector.append_data(leaf(vec![i; 16]));
        }
        let root = collector.flush_state().unwrap();
        // 4 + 1 leaves → two groups + root.
        assert_eq!(links.load(Ordering::Relaxed), 3);
        assert_eq!(root.size_cumulative_payload(), 80);
    }

    #[test]
    fn test_reusable_after_flush() {
        let (encoder, _) = counting_encoder();
        let mut collector = CidRefsCollector::new(160, encoder);
        collector.append_data(leaf(b"x".to_vec()));
        let first = collector.flush_state().unwrap();
        assert!(collector.flush_state().is_none());
        collector.append_data(leaf(b"x".to_vec()));
        let second = collector.flush_state().unwrap();
        assert_eq!(first.cid(), second.cid());
    }
}
