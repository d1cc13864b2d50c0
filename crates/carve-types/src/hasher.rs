//! The hasher registry.
//!
//! Hashers digest a block's content segments and hand back the leading
//! `hash_bits / 8` bytes. The `none` hasher exists for benchmarking the
//! rest of the pipeline: it produces an all-zero placeholder digest and
//! marks the block dummy-hashed so it never enters dedup or CAR output.

use sha2::{Digest, Sha256};

use crate::cid::{MH_BLAKE3, MH_SHA2_256};

/// A registered hash function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasherKind {
    /// sha2-256 — the IPFS default.
    Sha2_256,
    /// blake3, truncated to the requested width.
    Blake3,
    /// No hashing; fixed placeholder digest.
    None,
}

/// Registry names, in help-text order.
pub const AVAILABLE_HASHERS: &[&str] = &["blake3", "none", "sha2-256"];

impl HasherKind {
    /// Look up a hasher by its configuration name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "sha2-256" => Some(HasherKind::Sha2_256),
            "blake3" => Some(HasherKind::Blake3),
            "none" => Some(HasherKind::None),
            _ => None,
        }
    }

    /// The multihash code this hasher tags its digests with.
    ///
    /// `none` borrows the sha2-256 code so the CID stays structurally
    /// valid; its blocks are flagged dummy-hashed everywhere it matters.
    pub fn multihash_code(self) -> u64 {
        match self {
            HasherKind::Sha2_256 | HasherKind::None => MH_SHA2_256,
            HasherKind::Blake3 => MH_BLAKE3,
        }
    }

    /// True when this hasher produces placeholder digests.
    pub fn is_dummy(self) -> bool {
        matches!(self, HasherKind::None)
    }

    /// Widest digest this hasher can produce, in bits.
    pub fn max_bits(self) -> usize {
        match self {
            HasherKind::Sha2_256 | HasherKind::Blake3 => 256,
            HasherKind::None => usize::MAX,
        }
    }

    /// Digest `segments` and truncate (from the start) to `out_len` bytes.
    pub fn digest<'a>(
        self,
        segments: impl IntoIterator<Item = &'a [u8]>,
        out_len: usize,
    ) -> Vec<u8> {
        match self {
            HasherKind::Sha2_256 => {
                let mut hasher = Sha256::new();
                for seg in segments {
                    hasher.update(seg);
                }
                let mut digest = hasher.finalize().to_vec();
                digest.truncate(out_len);
                digest
            }
            HasherKind::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                for seg in segments {
                    hasher.update(seg);
                }
                let mut digest = hasher.finalize().as_bytes().to_vec();
                digest.truncate(out_len);
                digest
            }
            HasherKind::None => vec![0u8; out_len],
        }
    }
}
