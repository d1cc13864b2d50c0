//! The `none` collector: leaves are encoded (and therefore hashed and
//! emitted) but no DAG is formed and no root exists.

use std::sync::Arc;

use carve_block::{DataSource, Header};

use crate::{Collector, NodeEncoder, empty_source};

/// Collector that forms no DAG at all.
pub struct NoopCollector {
    encoder: Box<dyn NodeEncoder>,
}

impl std::fmt::Debug for NoopCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoopCollector").finish_non_exhaustive()
    }
}

impl NoopCollector {
    pub fn new(encoder: Box<dyn NodeEncoder>) -> NoopCollector {
        NoopCollector { encoder }
    }
}

impl Collector for NoopCollector {
    fn append_data(&mut self, source: Option<DataSource>) -> Arc<Header> {
        self.encoder.new_leaf(source.unwrap_or_else(empty_source))
    }

    fn append_block(&mut self, _header: Arc<Header>) {}

    fn flush_state(&mut self) -> Option<Arc<Header>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::counting_encoder;
    use bytes::Bytes;

    #[test]
    fn test_no_root_no_links() {
        let (encoder, links) = counting_encoder();
        let mut collector = NoopCollector::new(encoder);
        for _ in 0..10 {
            let leaf = collector.append_data(Some(DataSource {
                chunk_size: 3,
                content: Bytes::from_static(b"abc"),
            }));
            assert_eq!(leaf.size_block(), 3);
        }
        assert!(collector.flush_state().is_none());
        assert_eq!(links.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn test_nul_input_still_materialises_a_leaf() {
        let (encoder, _) = counting_encoder();
        let mut collector = NoopCollector::new(encoder);
        let leaf = collector.append_data(None);
        assert_eq!(leaf.size_block(), 0);
        assert!(collector.flush_state().is_none());
    }
}
