//! Shared vocabulary for the carve workspace.
//!
//! This crate defines everything the other crates agree on:
//! wire-format constants, unsigned LEB128 varints ([`varint`]),
//! multihash/CID assembly and multibase rendering ([`cid`]), and the
//! hasher registry ([`hasher`]).

pub mod cid;
pub mod hasher;
pub mod varint;

pub use cid::{Cid, Multibase};
pub use hasher::HasherKind;

/// Largest payload a single leaf block may carry (1 MiB).
///
/// <https://github.com/ipfs/go-ipfs-chunker/pull/21#discussion_r369197120>
pub const MAX_LEAF_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Largest on-wire block size accepted anywhere in the pipeline.
pub const MAX_BLOCK_WIRE_SIZE: usize = 2 * 1024 * 1024 - 1;

/// Bytes taken off the *end* of a non-identity CID to key the seen-maps.
///
/// Truncation keeps collision probability uniform for any real hash while
/// halving the map's memory footprint.
pub const SEEN_HASH_SIZE: usize = 16;

/// Capacity of the bounded queue feeding the CAR writer thread.
pub const CAR_QUEUE_SIZE: usize = 2048;
