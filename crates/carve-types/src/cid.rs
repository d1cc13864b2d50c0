//! CID assembly and multibase rendering.
//!
//! A CID here is just its wire bytes: `0x01 || codec || multihash` for
//! CIDv1, or the bare 34-byte sha2-256 multihash for CIDv0. Nothing in
//! the pipeline ever needs to re-parse one.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::varint::put_uvarint;

/// Multicodec for raw leaf blocks.
pub const CODEC_RAW: u64 = 0x55;
/// Multicodec for dag-pb blocks (link nodes and decorated leaves).
pub const CODEC_DAG_PB: u64 = 0x70;

/// Multihash code for the identity "hash".
pub const MH_IDENTITY: u64 = 0x00;
/// Multihash code for sha2-256.
pub const MH_SHA2_256: u64 = 0x12;
/// Multihash code for blake3.
pub const MH_BLAKE3: u64 = 0x1e;

/// A content identifier in wire-byte form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cid(Bytes);

impl Cid {
    /// Assemble a CIDv1 from a codec, a multihash code and a digest.
    pub fn v1(codec: u64, mh_code: u64, digest: &[u8]) -> Self {
        let mut out = BytesMut::with_capacity(4 + digest.len() + 8);
        out.put_u8(0x01);
        put_uvarint(&mut out, codec);
        put_uvarint(&mut out, mh_code);
        put_uvarint(&mut out, digest.len() as u64);
        out.put_slice(digest);
        Cid(out.freeze())
    }

    /// Assemble a CIDv0: the bare `sha2-256/256` multihash.
    pub fn v0(digest: &[u8]) -> Self {
        let mut out = BytesMut::with_capacity(2 + digest.len());
        out.put_u8(0x12);
        out.put_u8(digest.len() as u8);
        out.put_slice(digest);
        Cid(out.freeze())
    }

    /// Assemble an identity-multihash CIDv1 embedding `payload` verbatim.
    ///
    /// The payload arrives as the block's content segments so no
    /// intermediate concatenation is needed elsewhere.
    pub fn identity<'a>(
        codec: u64,
        payload_len: u64,
        segments: impl IntoIterator<Item = &'a [u8]>,
    ) -> Self {
        let mut out = BytesMut::with_capacity(payload_len as usize + 12);
        out.put_u8(0x01);
        put_uvarint(&mut out, codec);
        put_uvarint(&mut out, MH_IDENTITY);
        put_uvarint(&mut out, payload_len);
        for seg in segments {
            out.put_slice(seg);
        }
        Cid(out.freeze())
    }

    /// The CID's wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wire length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True only for the degenerate zero-length CID (never produced).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cheap reference-counted copy of the wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid(")?;
        for byte in self.0.iter().take(8) {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 8 {
            write!(f, "…{}B", self.0.len())?;
        }
        write!(f, ")")
    }
}

/// Output multibase for formatted CID strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multibase {
    /// `'b'` + lowercase RFC 4648 base32, no padding.
    Base32,
    /// `'k'` + lowercase base36.
    Base36,
}

impl Multibase {
    /// Look up a multibase by its configuration name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "base32" => Some(Multibase::Base32),
            "base36" => Some(Multibase::Base36),
            _ => None,
        }
    }

    /// Render `cid` in this multibase.
    ///
    /// `dummy_hashed` CIDs get their digest region made human-recognisable:
    /// string positions 10..20 become `"zzzznohash"` and everything from
    /// position 20 on becomes `'z'`.
    pub fn format(self, cid: &Cid, dummy_hashed: bool) -> String {
        let encoded = match self {
            Multibase::Base32 => {
                let mut s = String::with_capacity(1 + cid.len() * 8 / 5 + 1);
                s.push('b');
                base32_lc(cid.as_bytes(), &mut s);
                s
            }
            Multibase::Base36 => {
                let mut s = String::with_capacity(1 + cid.len() * 8 / 5 + 1);
                s.push('k');
                base36_lc(cid.as_bytes(), &mut s);
                s
            }
        };

        if !dummy_hashed {
            return encoded;
        }

        let mut raw = encoded.into_bytes();
        let n = raw.len();
        for (i, &ch) in b"zzzznohash".iter().enumerate() {
            if 10 + i < n {
                raw[10 + i] = ch;
            }
        }
        for b in raw.iter_mut().skip(20) {
            *b = b'z';
        }
        String::from_utf8(raw).expect("multibase output is ASCII")
    }
}

fn base32_lc(data: &[u8], out: &mut String) {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 31) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 31) as usize] as char);
    }
}

fn base36_lc(data: &[u8], out: &mut String) {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let zeros = data.iter().take_while(|b| **b == 0).count();
    for _ in 0..zeros {
        out.push('0');
    }

    // Repeated divmod of the big-endian byte string by 36. Quadratic, but
    // CIDs are tens of bytes outside pathological identity-inline setups.
    let mut num: Vec<u8> = data[zeros..].to_vec();
    let mut digits: Vec<u8> = Vec::with_capacity(num.len() * 2);
    while !num.is_empty() {
        let mut rem: u32 = 0;
        let mut next: Vec<u8> = Vec::with_capacity(num.len());
        for &byte in &num {
            let cur = rem * 256 + u32::from(byte);
            let quot = (cur / 36) as u8;
            rem = cur % 36;
            if !next.is_empty() || quot != 0 {
                next.push(quot);
            }
        }
        digits.push(ALPHABET[rem as usize]);
        num = next;
    }
    out.extend(digits.iter().rev().map(|&d| d as char));
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    // dag-pb node of the canonical empty UnixFS file.
    const EMPTY_FILE_BLOCK: [u8; 6] = [0x0a, 0x04, 0x08, 0x02, 0x18, 0x00];

    fn empty_file_cid() -> Cid {
        let digest = Sha256::digest(EMPTY_FILE_BLOCK);
        Cid::v1(CODEC_DAG_PB, MH_SHA2_256, &digest)
    }

    #[test]
    fn test_cid_v1_layout() {
        let cid = empty_file_cid();
        assert_eq!(cid.len(), 36);
        assert_eq!(&cid.as_bytes()[..4], &[0x01, 0x70, 0x12, 0x20]);
    }

    #[test]
    fn test_cid_v0_layout() {
        let digest = Sha256::digest(EMPTY_FILE_BLOCK);
        let cid = Cid::v0(&digest);
        assert_eq!(cid.len(), 34);
        assert_eq!(&cid.as_bytes()[..2], &[0x12, 0x20]);
        assert_eq!(&cid.as_bytes()[2..], digest.as_slice());
    }

    #[test]
    fn test_canonical_empty_file_base32() {
        assert_eq!(
            Multibase::Base32.format(&empty_file_cid(), false),
            "bafybeif7ztnhq65lumvvtr4ekcwd2ifwgm3awq4zfr3srh462rwyinlb4y"
        );
    }

    #[test]
    fn test_canonical_empty_file_base36() {
        assert_eq!(
            Multibase::Base36.format(&empty_file_cid(), false),
            "k2jmtxw57e8q3wevq1yz5usxqabvtnck9ehnqx5hk29iz6otpovk09uu"
        );
    }

    #[test]
    fn test_identity_cid() {
        let cid = Cid::identity(CODEC_RAW, 4, [b"ab".as_slice(), b"cd".as_slice()]);
        assert_eq!(
            cid.as_bytes(),
            &[0x01, 0x55, 0x00, 0x04, b'a', b'b', b'c', b'd']
        );
        assert_eq!(Multibase::Base32.format(&cid, false), "bafkqabdbmjrwi");
    }

    #[test]
    fn test_raw_leaf_base32() {
        let digest = Sha256::digest(b"hello world");
        let cid = Cid::v1(CODEC_RAW, MH_SHA2_256, &digest);
        assert_eq!(
            Multibase::Base32.format(&cid, false),
            "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e"
        );
    }

    #[test]
    fn test_dummy_overlay() {
        let cid = Cid::v1(CODEC_RAW, MH_SHA2_256, &[0u8; 32]);
        let s = Multibase::Base32.format(&cid, true);
        assert_eq!(&s[10..20], "zzzznohash");
        assert!(s[20..].bytes().all(|b| b == b'z'));
        // prefix stays decodeable
        assert!(s.starts_with('b'));
    }

    #[test]
    fn test_multibase_by_name() {
        assert_eq!(Multibase::by_name("base32"), Some(Multibase::Base32));
        assert_eq!(Multibase::by_name("base36"), Some(Multibase::Base36));
        assert_eq!(Multibase::by_name("base58btc"), None);
    }

    #[test]
    fn test_base36_leading_zero_bytes() {
        let mut s = String::new();
        base36_lc(&[0x00, 0x00, 0x01], &mut s);
        assert_eq!(s, "001");
    }
}
