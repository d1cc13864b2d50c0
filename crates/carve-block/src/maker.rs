//! The block maker: payload bytes in, [`Header`] out.

use std::sync::Arc;

use bytes::Bytes;
use carve_types::cid::CODEC_DAG_PB;
use carve_types::{Cid, HasherKind, MAX_BLOCK_WIRE_SIZE};

use crate::hashing::{CidRecipe, HashJob, HashingBus};
use crate::header::{CidCell, Header};

/// Blocks below this wire size hash inline even when the bus is active;
/// for them the channel round-trip costs more than the digest itself.
const ASYNC_HASH_THRESHOLD: usize = 4 * 1024;

/// Block maker configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct MakerConfig {
    /// Hash function used for non-inlined blocks.
    pub hasher: HasherKind,
    /// Digest width; a multiple of 8, at least 128.
    pub hash_bits: usize,
    /// Blocks at or below this on-wire size get identity CIDs; 0 disables.
    pub inline_max_size: usize,
    /// Emit bare sha2-256 multihashes for dag-pb blocks (CIDv0).
    pub cid_v0: bool,
    /// Number of hashing worker threads; 0 hashes inline.
    pub async_hashers: usize,
}

/// Builds block headers: assigns CIDs (identity-inlined or hashed,
/// possibly on the hashing bus) and carries the size accounting.
pub struct BlockMaker {
    hasher: HasherKind,
    hash_len: usize,
    inline_max_size: usize,
    cid_v0: bool,
    bus: Option<HashingBus>,
}

impl BlockMaker {
    /// Validate the configuration and spawn the hashing bus if requested.
    pub fn new(cfg: MakerConfig) -> Result<BlockMaker, String> {
        if cfg.hash_bits < 128 || cfg.hash_bits % 8 != 0 {
            return Err("hash-bits must be a minimum of 128 and be divisible by 8".into());
        }
        if cfg.hash_bits > cfg.hasher.max_bits() {
            return Err(format!(
                "hash-bits {} wider than the selected hash function provides",
                cfg.hash_bits
            ));
        }
        if cfg.cid_v0 && (cfg.hasher != HasherKind::Sha2_256 || cfg.hash_bits != 256) {
            return Err("legacy CIDv0 linking requires --hash=sha2-256 and --hash-bits=256".into());
        }

        let bus = if cfg.async_hashers > 0 {
            Some(HashingBus::new(cfg.async_hashers)?)
        } else {
            None
        };

        Ok(BlockMaker {
            hasher: cfg.hasher,
            hash_len: cfg.hash_bits / 8,
            inline_max_size: cfg.inline_max_size,
            cid_v0: cfg.cid_v0,
            bus,
        })
    }

    /// True when blocks of `size` bytes will be identity-inlined.
    pub fn inlines_at(&self, size: usize) -> bool {
        self.inline_max_size > 0 && size <= self.inline_max_size
    }

    /// Assemble a header for a block with the given on-wire `content`.
    ///
    /// `children_dag` is the cumulative on-wire size of every descendant
    /// block (0 for leaves); the block's own size is added here.
    pub fn make(
        &self,
        content: Vec<Bytes>,
        codec: u64,
        size_cumulative_payload: u64,
        children_dag: u64,
    ) -> Arc<Header> {
        let size_block: usize = content.iter().map(Bytes::len).sum();
        debug_assert!(size_block <= MAX_BLOCK_WIRE_SIZE, "oversized block");

        if self.inlines_at(size_block) {
            let cid = Cid::identity(
                codec,
                size_block as u64,
                content.iter().map(|segment| segment.as_ref()),
            );
            return Header::new(
                CidCell::filled(cid),
                content,
                size_block,
                size_cumulative_payload,
                children_dag + size_block as u64,
                true,
                false,
            );
        }

        let recipe = CidRecipe {
            hasher: self.hasher,
            hash_len: self.hash_len,
            codec,
            // CIDv0 only ever applies to dag-pb blocks; raw leaves keep
            // CIDv1 even when the legacy mode is on.
            cid_v0: self.cid_v0 && codec == CODEC_DAG_PB,
        };

        let cell = match &self.bus {
            Some(bus) if size_block >= ASYNC_HASH_THRESHOLD => {
                let cell = CidCell::pending();
                bus.submit(HashJob {
                    segments: content.clone(),
                    recipe,
                    cell: cell.clone(),
                });
                cell
            }
            _ => CidCell::filled(recipe.build(content.iter().map(|segment| segment.as_ref()))),
        };

        Header::new(
            cell,
            content,
            size_block,
            size_cumulative_payload,
            children_dag + size_block as u64,
            false,
            self.hasher.is_dummy(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_types::Multibase;
    use carve_types::cid::CODEC_RAW;

    fn maker(inline_max: usize) -> BlockMaker {
        BlockMaker::new(MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 256,
            inline_max_size: inline_max,
            cid_v0: false,
            async_hashers: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_bits_validation() {
        let bad = MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 100,
            inline_max_size: 0,
            cid_v0: false,
            async_hashers: 0,
        };
        assert!(BlockMaker::new(bad.clone()).is_err());
        assert!(
            BlockMaker::new(MakerConfig {
                hash_bits: 130,
                ..bad.clone()
            })
            .is_err()
        );
        assert!(
            BlockMaker::new(MakerConfig {
                hash_bits: 512,
                ..bad.clone()
            })
            .is_err()
        );
        assert!(
            BlockMaker::new(MakerConfig {
                hash_bits: 256,
                ..bad
            })
            .is_ok()
        );
    }

    #[test]
    fn test_cid_v0_requires_sha2_256() {
        let bad = MakerConfig {
            hasher: HasherKind::Blake3,
            hash_bits: 256,
            inline_max_size: 0,
            cid_v0: true,
            async_hashers: 0,
        };
        assert!(BlockMaker::new(bad).is_err());
    }

    #[test]
    fn test_known_raw_leaf_cid() {
        let maker = maker(0);
        let hdr = maker.make(vec![Bytes::from_static(b"hello world")], CODEC_RAW, 11, 0);
        assert_eq!(
            Multibase::Base32.format(&hdr.cid(), false),
            "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e"
        );
        assert_eq!(hdr.size_block(), 11);
        assert_eq!(hdr.size_cumulative_dag(), 11);
        assert!(!hdr.is_cid_inlined());
    }

    #[test]
    fn test_inline_boundary() {
        let maker = maker(8);
        // size == inline max: inlined
        let at = maker.make(vec![Bytes::from_static(b"12345678")], CODEC_RAW, 8, 0);
        assert!(at.is_cid_inlined());
        // one below: inlined
        let below = maker.make(vec![Bytes::from_static(b"1234567")], CODEC_RAW, 7, 0);
        assert!(below.is_cid_inlined());
        // one above: hashed
        let above = maker.make(vec![Bytes::from_static(b"123456789")], CODEC_RAW, 9, 0);
        assert!(!above.is_cid_inlined());
    }

    #[test]
    fn test_identity_cid_embeds_payload() {
        let maker = maker(36);
        let hdr = maker.make(
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
            CODEC_RAW,
            4,
            0,
        );
        assert!(hdr.is_cid_inlined());
        assert_eq!(
            hdr.cid().as_bytes(),
            &[0x01, 0x55, 0x00, 0x04, b'a', b'b', b'c', b'd']
        );
    }

    #[test]
    fn test_truncated_hash_bits() {
        let maker = BlockMaker::new(MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 128,
            inline_max_size: 0,
            cid_v0: false,
            async_hashers: 0,
        })
        .unwrap();
        let hdr = maker.make(vec![Bytes::from_static(b"hello world")], CODEC_RAW, 11, 0);
        let cid = hdr.cid();
        assert_eq!(cid.len(), 4 + 16);
        assert_eq!(&cid.as_bytes()[..4], &[0x01, 0x55, 0x12, 0x10]);
        assert_eq!(
            &cid.as_bytes()[4..],
            &[
                0xb9, 0x4d, 0x27, 0xb9, 0x93, 0x4d, 0x3e, 0x08, 0xa5, 0x2e, 0x52, 0xd7, 0xda,
                0x7d, 0xab, 0xfa
            ]
        );
    }

    #[test]
    fn test_dummy_hasher_flags_block() {
        let maker = BlockMaker::new(MakerConfig {
            hasher: HasherKind::None,
            hash_bits: 256,
            inline_max_size: 0,
            cid_v0: false,
            async_hashers: 0,
        })
        .unwrap();
        let hdr = maker.make(vec![Bytes::from_static(b"data")], CODEC_RAW, 4, 0);
        assert!(hdr.dummy_hashed());
        let formatted = Multibase::Base32.format(&hdr.cid(), hdr.dummy_hashed());
        assert_eq!(&formatted[10..20], "zzzznohash");
    }

    #[test]
    fn test_cid_v0_layout_for_dag_pb() {
        let maker = BlockMaker::new(MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 256,
            inline_max_size: 0,
            cid_v0: true,
            async_hashers: 0,
        })
        .unwrap();
        let pb = maker.make(vec![Bytes::from_static(b"\x0a\x00")], CODEC_DAG_PB, 0, 0);
        assert_eq!(pb.cid().len(), 34);
        assert_eq!(&pb.cid().as_bytes()[..2], &[0x12, 0x20]);
        // raw blocks stay CIDv1 even in legacy mode
        let raw = maker.make(vec![Bytes::from_static(b"xyz")], CODEC_RAW, 3, 0);
        assert_eq!(&raw.cid().as_bytes()[..2], &[0x01, 0x55]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_hashing_matches_inline() {
        let inline = maker(0);
        let bussed = BlockMaker::new(MakerConfig {
            hasher: HasherKind::Sha2_256,
            hash_bits: 256,
            inline_max_size: 0,
            cid_v0: false,
            async_hashers: 2,
        })
        .unwrap();

        for i in 0..64u8 {
            // large enough to actually travel the bus
            let payload = Bytes::from(vec![i; 8192 + i as usize]);
            let a = inline.make(vec![payload.clone()], CODEC_RAW, 0, 0);
            let b = bussed.make(vec![payload], CODEC_RAW, 0, 0);
            assert_eq!(a.cid(), b.cid_async().await);
        }
    }
}
