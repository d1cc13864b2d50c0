//! Buzhash chunking.
//!
//! Cyclic-rotation rolling hash over a fixed 32-byte window: each step
//! rotates the state left by one bit, xors out the byte leaving the
//! window and xors in the byte entering it. With a 32-byte window the
//! leaving byte's accumulated rotation is a multiple of 32 bits, so no
//! extra rotation is needed on the way out.

use crate::{Chunk, Chunker, ChunkerError, SplitCallback};

/// Fixed rolling-window width.
pub const BUZ_WINDOW: usize = 32;

/// The `v0` byte-mixing table, generated once from a fixed splitmix64
/// seed so every build and platform agrees on it.
pub const BUZ_TABLE_V0: [u32; 256] = generate_table_v0();

const fn generate_table_v0() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        table[i] = (z >> 32) as u32;
        i += 1;
    }
    table
}

/// Rolling buzhash chunker.
#[derive(Debug)]
pub struct BuzhashChunker {
    table: &'static [u32; 256],
    min_size: usize,
    max_size: usize,
    mask: u32,
    target: u32,
}

/// Construction parameters; see [`crate::registry`] for the string form.
#[derive(Debug, Clone)]
pub struct BuzhashConfig {
    /// Smallest chunk the boundary search may produce.
    pub min_size: usize,
    /// Hard upper bound on chunk size.
    pub max_size: usize,
    /// Number of low state bits compared against `target`.
    pub mask_bits: u32,
    /// Boundary fires when `(state & mask) == target`.
    pub target: u32,
}

impl BuzhashChunker {
    /// Build a chunker over the given mixing table.
    pub fn new(table: &'static [u32; 256], cfg: BuzhashConfig) -> Result<BuzhashChunker, String> {
        if cfg.min_size < BUZ_WINDOW {
            return Err(format!(
                "min-size {} smaller than the {BUZ_WINDOW}-byte window",
                cfg.min_size
            ));
        }
        if cfg.min_size >= cfg.max_size {
            return Err("value for 'max-size' must be larger than 'min-size'".into());
        }
        if cfg.mask_bits < 1 || cfg.mask_bits > 31 {
            return Err(format!(
                "state-mask-bits {} out of range [1:31]",
                cfg.mask_bits
            ));
        }
        Ok(BuzhashChunker {
            table,
            min_size: cfg.min_size,
            max_size: cfg.max_size,
            mask: (1u32 << cfg.mask_bits) - 1,
            target: cfg.target,
        })
    }
}

impl Chunker for BuzhashChunker {
    fn split(
        &self,
        buf: &[u8],
        use_entire_buffer: bool,
        emit: SplitCallback<'_>,
    ) -> Result<(), ChunkerError> {
        let post = buf.len();
        let mut last = 0usize;

        loop {
            if post - last <= self.min_size {
                if use_entire_buffer && last < post {
                    emit(Chunk { size: post - last })?;
                }
                return Ok(());
            }

            let round_max = last + self.max_size;
            if round_max > post && !use_entire_buffer {
                return Ok(());
            }
            let hard_cap = round_max.min(post);

            // Pre-heat the window over the last 32 bytes of the minimum.
            let mut state: u32 = 0;
            let preheat_start = last + self.min_size - BUZ_WINDOW;
            for &byte in &buf[preheat_start..preheat_start + BUZ_WINDOW] {
                state = state.rotate_left(1) ^ self.table[byte as usize];
            }

            let mut idx = last + self.min_size;
            while idx < hard_cap && (state & self.mask) != self.target {
                state = state.rotate_left(1)
                    ^ self.table[buf[idx - BUZ_WINDOW] as usize]
                    ^ self.table[buf[idx] as usize];
                idx += 1;
            }

            emit(Chunk { size: idx - last })?;
            last = idx;
        }
    }
}
