//! The UnixFSv1 node encoder.
//!
//! Wire layout notes, since every byte here is CID-relevant:
//!
//! - A raw leaf is the chunk bytes verbatim under the `raw` codec.
//! - A decorated leaf wraps the chunk in a UnixFS protobuf
//!   (`Type`, optional `Data`, `filesize` for type 2) carried in the
//!   dag-pb node's `Data` field.
//! - A link node serialises its `PBLink`s (field 2: `Hash`, empty `Name`,
//!   `Tsize`) before the outer `Data` field (field 1), matching the
//!   go-ipfs merkledag byte order, with the UnixFS `Data` carrying
//!   `Type: File`, the total `filesize` and per-child `blocksizes`.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use carve_block::{BlockMaker, DataSource, Header};
use carve_types::cid::{CODEC_DAG_PB, CODEC_RAW};
use carve_types::varint::{put_uvarint, uvarint_len};

use crate::{LinkBlockCallback, NodeEncoder};

/// Parsed `unixfsv1` encoder options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixFsV1Spec {
    /// `None` emits raw leaves; `Some(0)`/`Some(2)` wraps chunk bytes in a
    /// UnixFS protobuf of that type.
    pub leaf_decorator_type: Option<u8>,
    /// Reference dag-pb blocks by bare sha2-256 multihash (CIDv0).
    pub cid_v0: bool,
    /// Omit the `Tsize` field from links.
    pub legacy_no_tsize: bool,
}

/// UnixFSv1 encoder over a shared block maker.
pub struct UnixFsV1Encoder {
    spec: UnixFsV1Spec,
    maker: Arc<BlockMaker>,
    new_link_block_callback: LinkBlockCallback,
}

// UnixFS protobuf field tags (proto2, go-unixfs pb/unixfs.proto).
const UNIXFS_TYPE: u8 = 0x08;
const UNIXFS_DATA: u8 = 0x12;
const UNIXFS_FILESIZE: u8 = 0x18;
const UNIXFS_BLOCKSIZE: u8 = 0x20;
const UNIXFS_TYPE_FILE: u8 = 2;

// dag-pb field tags.
const DAGPB_DATA: u8 = 0x0a;
const DAGPB_LINK: u8 = 0x12;
const PBLINK_HASH: u8 = 0x0a;
const PBLINK_NAME: u8 = 0x12;
const PBLINK_TSIZE: u8 = 0x18;

impl UnixFsV1Encoder {
    /// Build an encoder; `new_link_block_callback` fires once per link.
    pub fn new(
        spec: UnixFsV1Spec,
        maker: Arc<BlockMaker>,
        new_link_block_callback: LinkBlockCallback,
    ) -> UnixFsV1Encoder {
        UnixFsV1Encoder {
            spec,
            maker,
            new_link_block_callback,
        }
    }

    /// Decorated leaf: dag-pb `Data` holding the UnixFS protobuf.
    ///
    /// The chunk bytes stay a borrowed segment between a freshly built
    /// prefix and suffix, so nothing payload-sized is copied.
    fn decorated_leaf(&self, decorator: u8, source: DataSource) -> Arc<Header> {
        let payload = source.content;
        let payload_len = payload.len() as u64;

        let mut inner_len = 2usize; // Type field
        if !payload.is_empty() {
            inner_len += 1 + uvarint_len(payload_len) + payload.len();
        }
        if decorator == UNIXFS_TYPE_FILE {
            inner_len += 1 + uvarint_len(payload_len);
        }

        let mut prefix = BytesMut::with_capacity(inner_len - payload.len() + 8);
        prefix.put_u8(DAGPB_DATA);
        put_uvarint(&mut prefix, inner_len as u64);
        prefix.put_u8(UNIXFS_TYPE);
        prefix.put_u8(decorator);
        if !payload.is_empty() {
            prefix.put_u8(UNIXFS_DATA);
            put_uvarint(&mut prefix, payload_len);
        }

        let mut segments = Vec::with_capacity(3);
        if payload.is_empty() {
            if decorator == UNIXFS_TYPE_FILE {
                prefix.put_u8(UNIXFS_FILESIZE);
                put_uvarint(&mut prefix, 0);
            }
            segments.push(prefix.freeze());
        } else {
            segments.push(prefix.freeze());
            segments.push(payload);
            if decorator == UNIXFS_TYPE_FILE {
                let mut suffix = BytesMut::with_capacity(1 + uvarint_len(payload_len));
                suffix.put_u8(UNIXFS_FILESIZE);
                put_uvarint(&mut suffix, payload_len);
                segments.push(suffix.freeze());
            }
        }

        self.maker.make(segments, CODEC_DAG_PB, payload_len, 0)
    }
}

impl NodeEncoder for UnixFsV1Encoder {
    fn new_leaf(&self, source: DataSource) -> Arc<Header> {
        match self.spec.leaf_decorator_type {
            None => {
                let payload_len = source.content.len() as u64;
                self.maker
                    .make(vec![source.content], CODEC_RAW, payload_len, 0)
            }
            Some(decorator) => self.decorated_leaf(decorator, source),
        }
    }

    fn nul_leaf(&self) -> Arc<Header> {
        // {Type: File, filesize: 0} — the canonical empty-file block,
        // regardless of the configured leaf decorator.
        self.maker.make(
            vec![Bytes::from_static(&[
                DAGPB_DATA,
                0x04,
                UNIXFS_TYPE,
                UNIXFS_TYPE_FILE,
                UNIXFS_FILESIZE,
                0x00,
            ])],
            CODEC_DAG_PB,
            0,
            0,
        )
    }

    fn new_link(&self, children: &[Arc<Header>]) -> Arc<Header> {
        debug_assert!(!children.is_empty(), "link node needs children");

        let mut total_payload = 0u64;
        let mut children_dag = 0u64;
        let mut out = BytesMut::with_capacity(64 * children.len());

        for child in children {
            let cid = child.cid();
            let dag = child.size_cumulative_dag();
            total_payload += child.size_cumulative_payload();
            children_dag += dag;

            let mut pblink_len = 1 + uvarint_len(cid.len() as u64) + cid.len() + 2;
            if !self.spec.legacy_no_tsize {
                pblink_len += 1 + uvarint_len(dag);
            }

            out.put_u8(DAGPB_LINK);
            put_uvarint(&mut out, pblink_len as u64);
            out.put_u8(PBLINK_HASH);
            put_uvarint(&mut out, cid.len() as u64);
            out.put_slice(cid.as_bytes());
            out.put_u8(PBLINK_NAME);
            out.put_u8(0x00);
            if !self.spec.legacy_no_tsize {
                out.put_u8(PBLINK_TSIZE);
                put_uvarint(&mut out, dag);
            }
        }

        let mut inner_len = 2 + 1 + uvarint_len(total_payload);
        for child in children {
            inner_len += 1 + uvarint_len(child.size_cumulative_payload());
        }
        out.put_u8(DAGPB_DATA);
        put_uvarint(&mut out, inner_len as u64);
        out.put_u8(UNIXFS_TYPE);
        out.put_u8(UNIXFS_TYPE_FILE);
        out.put_u8(UNIXFS_FILESIZE);
        put_uvarint(&mut out, total_payload);
        for child in children {
            out.put_u8(UNIXFS_BLOCKSIZE);
            put_uvarint(&mut out, child.size_cumulative_payload());
        }

        let header = self
            .maker
            .make(vec![out.freeze()], CODEC_DAG_PB, total_payload, children_dag);
        (self.new_link_block_callback)(header.clone());
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_maker;
    use carve_types::Multibase;

    fn encoder(spec: UnixFsV1Spec) -> UnixFsV1Encoder {
        UnixFsV1Encoder::new(spec, test_maker(0), Box::new(|_| {}))
    }

    fn source(data: &'static [u8]) -> DataSource {
        DataSource {
            chunk_size: data.len(),
            content: Bytes::from_static(data),
        }
    }

    fn b32(header: &Header) -> String {
        Multibase::Base32.format(&header.cid(), false)
    }

    #[test]
    fn test_raw_leaf() {
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: None,
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let leaf = enc.new_leaf(source(b"hello world"));
        assert_eq!(
            b32(&leaf),
            "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e"
        );
        assert_eq!(leaf.size_block(), 11);
        assert_eq!(leaf.size_cumulative_payload(), 11);
    }

    #[test]
    fn test_nul_leaf_is_canonical_empty_file() {
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: None,
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let leaf = enc.nul_leaf();
        assert_eq!(
            b32(&leaf),
            "bafybeif7ztnhq65lumvvtr4ekcwd2ifwgm3awq4zfr3srh462rwyinlb4y"
        );
        assert_eq!(leaf.size_block(), 6);
        assert_eq!(leaf.size_cumulative_payload(), 0);
    }

    #[test]
    fn test_decorated_empty_leaf_matches_nul_leaf() {
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: Some(2),
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let leaf = enc.new_leaf(source(b""));
        assert_eq!(
            b32(&leaf),
            "bafybeif7ztnhq65lumvvtr4ekcwd2ifwgm3awq4zfr3srh462rwyinlb4y"
        );
    }

    #[test]
    fn test_decorated_leaf_type2_bytes() {
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: Some(2),
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let leaf = enc.new_leaf(source(b"\x00"));
        let content: Vec<u8> = leaf
            .content()
            .iter()
            .flat_map(|segment| segment.to_vec())
            .collect();
        // Data{ Type: File, Data: 0x00, filesize: 1 }
        assert_eq!(
            content,
            vec![0x0a, 0x07, 0x08, 0x02, 0x12, 0x01, 0x00, 0x18, 0x01]
        );
        assert_eq!(
            b32(&leaf),
            "bafybeibyqyrkx66boqbutl5oktknecxgnl43cipcls3knonfmi727rdtnu"
        );
    }

    #[test]
    fn test_decorated_leaf_type0_omits_filesize() {
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: Some(0),
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let leaf = enc.new_leaf(source(b"ab"));
        let content: Vec<u8> = leaf
            .content()
            .iter()
            .flat_map(|segment| segment.to_vec())
            .collect();
        assert_eq!(content, vec![0x0a, 0x06, 0x08, 0x00, 0x12, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_link_node_scenario_bytes() {
        // Two decorated type-2 leaves (1 MiB of zeros and one zero byte)
        // under one link: byte-exact against the reference encoding.
        let enc = encoder(UnixFsV1Spec {
            leaf_decorator_type: Some(2),
            cid_v0: false,
            legacy_no_tsize: false,
        });
        let big = enc.new_leaf(DataSource {
            chunk_size: 1048576,
            content: Bytes::from(vec![0u8; 1048576]),
        });
        let small = enc.new_leaf(source(b"\x00"));
        assert_eq!(big.size_block(), 1048590);
        assert_eq!(
            b32(&big),
            "bafybeids7spn7r37szbnm2xm3jhg7invbu6tiq7bjt7nqmaibfddwynkdq"
        );

        let root = enc.new_link(&[big.clone(), small.clone()]);
        assert_eq!(root.size_block(), 104);
        assert_eq!(root.size_cumulative_payload(), 1048577);
        assert_eq!(
            root.size_cumulative_dag(),
            104 + big.size_cumulative_dag() + small.size_cumulative_dag()
        );
        assert_eq!(
            b32(&root),
            "bafybeigtkquh52pkqbyph62ktfcvthz5idho2ha33qdrglea5pehiwal7y"
        );

        let root_bytes: Vec<u8> = root
            .content()
            .iter()
            .flat_map(|segment| segment.to_vec())
            .collect();
        let expected = "122c0a240170122072fc9edfc77f9642d66aecda4e6fa1b50d3d3443e14cfed83008\
                        09463b61aa1c1200188e8040122a0a2401701220388622abfbc1740349afae54d4d2\
                        0ae66af9b121e25cb6a6b9a5623fafc4736d120018090a0c08021881804020808040\
                        2001";
        assert_eq!(hex(&root_bytes), expected.replace(char::is_whitespace, ""));
    }

    #[test]
    fn test_legacy_no_tsize_drops_field() {
        let spec = UnixFsV1Spec {
            leaf_decorator_type: None,
            cid_v0: false,
            legacy_no_tsize: true,
        };
        let enc = encoder(spec);
        let leaf = enc.new_leaf(source(b"abcd"));
        let link = enc.new_link(std::slice::from_ref(&leaf));
        let bytes: Vec<u8> = link
            .content()
            .iter()
            .flat_map(|segment| segment.to_vec())
            .collect();
        // PBLink must contain Hash + empty Name only (no 0x18 tsize tag
        // after the name terminator).
        let with_tsize = encoder(UnixFsV1Spec {
            legacy_no_tsize: false,
            ..spec
        })
        .new_link(std::slice::from_ref(&leaf));
        let with_bytes: Vec<u8> = with_tsize
            .content()
            .iter()
            .flat_map(|segment| segment.to_vec())
            .collect();
        assert_eq!(with_bytes.len(), bytes.len() + 2);
    }

    #[test]
    fn test_link_callback_fires_once_per_link() {
        let (enc, links) = crate::test_support::counting_encoder();
        let leaf = enc.new_leaf(source(b"x"));
        assert_eq!(links.load(std::sync::atomic::Ordering::Relaxed), 0);
        enc.new_link(std::slice::from_ref(&leaf));
        enc.new_link(std::slice::from_ref(&leaf));
        assert_eq!(links.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    fn hex(data: &[u8]) -> String {
        data.iter().map(|b| format!("{b:02x}")).collect()
    }
}
