//! Block headers, CID construction and the asynchronous hashing bus.
//!
//! A [`Header`] is the central value object of the pipeline: every leaf
//! and link node becomes one, carrying its CID (possibly still being
//! computed by a hash worker), its evictable on-wire content, and the
//! cumulative size accounting the collectors rely on.

mod hashing;
mod header;
mod maker;

pub use hashing::HashingBus;
pub use header::{DataSource, Header};
pub use maker::{BlockMaker, MakerConfig};
