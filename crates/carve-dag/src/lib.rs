//! UnixFSv1 node encoding and DAG-shaping collectors.
//!
//! The [`NodeEncoder`] turns chunk bytes into leaf blocks and child lists
//! into dag-pb link blocks; a [`Collector`] decides the DAG's shape by
//! choosing when to group children under a link. Both families are
//! selected once at startup via [`registry`] spec strings.

mod cid_refs;
mod fixed_outdegree;
mod noop;
pub mod registry;
mod trickle;
mod unixfs;

use std::sync::Arc;

use carve_block::{DataSource, Header};

pub use cid_refs::CidRefsCollector;
pub use fixed_outdegree::FixedOutdegreeCollector;
pub use noop::NoopCollector;
pub use trickle::TrickleCollector;
pub use unixfs::{UnixFsV1Encoder, UnixFsV1Spec};

/// Invoked exactly once for every link block an encoder produces; the
/// pipeline uses it to route link nodes into post-processing.
pub type LinkBlockCallback = Box<dyn Fn(Arc<Header>) + Send + Sync>;

/// Serialises leaves and link nodes into blocks.
pub trait NodeEncoder: Send + Sync {
    /// Encode a leaf from raw chunk bytes.
    fn new_leaf(&self, source: DataSource) -> Arc<Header>;

    /// The canonical empty UnixFSv1 file leaf (`Type: File, filesize: 0`).
    ///
    /// Emitted for zero-length streams when a collector asks for
    /// IPFS-compatible nul-leaf handling.
    fn nul_leaf(&self) -> Arc<Header>;

    /// Group `children` under a new link block.
    fn new_link(&self, children: &[Arc<Header>]) -> Arc<Header>;
}

/// Assembles appended blocks into a DAG.
///
/// After [`Collector::flush_state`] returns, internal state is back at
/// its fresh-construction value and the instance is reusable.
pub trait Collector: Send + std::fmt::Debug {
    /// Encode a leaf and fold it into the DAG, returning its header.
    ///
    /// `None` is the coordinator's signal for a zero-length stream.
    fn append_data(&mut self, source: Option<DataSource>) -> Arc<Header>;

    /// Fold a prebuilt block into the DAG.
    fn append_block(&mut self, header: Arc<Header>);

    /// Finalize the DAG; `None` when nothing was appended.
    fn flush_state(&mut self) -> Option<Arc<Header>>;
}

pub(crate) fn empty_source() -> DataSource {
    DataSource {
        chunk_size: 0,
        content: bytes::Bytes::new(),
    }
}
