//! Unsigned LEB128 varints, as used by CAR framing, CIDs and dag-pb.

use bytes::{BufMut, BytesMut};

/// Append `value` to `out` as an unsigned LEB128 varint.
pub fn put_uvarint(out: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.put_u8(byte | 0x80);
        } else {
            out.put_u8(byte);
            return;
        }
    }
}

/// Encode `value` as a standalone varint byte vector.
pub fn uvarint(value: u64) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(10);
    put_uvarint(&mut out, value);
    out.to_vec()
}

/// Number of bytes `value` occupies when varint-encoded.
pub fn uvarint_len(value: u64) -> usize {
    // 1 byte per started 7-bit group, at least one.
    (64 - value.max(1).leading_zeros() as usize).div_ceil(7)
}

/// Decode an unsigned LEB128 varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// input is truncated or overflows 64 bits.
pub fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}
