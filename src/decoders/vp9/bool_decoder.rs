// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The boolean range decoder used by the compressed header and tile data.

use thiserror::Error;

/// Probability used to signal a forward probability update.
pub const DIFF_UPDATE_PROB: u8 = 252;

const MAX_PROB: i32 = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoolDecoderError {
    #[error("cannot initialize a bool decoder over an empty partition")]
    EmptyPartition,
    #[error("the bool decoder marker bit is set")]
    InvalidMarker,
}

/// A node of a binary decoding tree. Inner nodes point at the index of the next node pair, and
/// the probability used to decide at node `i` is `probs[i]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    Leaf(u8),
    Node(u8),
}

/// A binary tree where entry `i` holds the (zero, one) branches of node `i`.
pub type Tree = [[TreeNode; 2]];

/// Boolean range decoder.
///
/// Reading past the end of the buffer never fails: zeros are shifted in and a sticky error flag
/// is raised, which callers check at tile and frame boundaries.
#[derive(Clone)]
pub struct BoolDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Window of undecoded bits, MSB aligned. The top 8 bits are compared against the split.
    value: u64,
    /// Number of valid bits in `value`.
    bits: u32,
    range: u32,
    /// Bits shifted out of the window so far, including the initial byte.
    consumed: u64,
    has_error: bool,
}

impl<'a> BoolDecoder<'a> {
    /// Creates a decoder over `data` and reads the marker bit, which must be zero.
    pub fn new(data: &'a [u8]) -> Result<Self, BoolDecoderError> {
        if data.is_empty() {
            return Err(BoolDecoderError::EmptyPartition);
        }

        let mut decoder = Self {
            data,
            pos: 0,
            value: 0,
            bits: 0,
            range: 255,
            consumed: 8,
            has_error: false,
        };

        decoder.fill();

        if decoder.read_bit() {
            return Err(BoolDecoderError::InvalidMarker);
        }

        Ok(decoder)
    }

    fn fill(&mut self) {
        while self.bits <= 56 {
            let byte = match self.data.get(self.pos) {
                Some(byte) => {
                    self.pos += 1;
                    *byte
                }
                None => 0,
            };

            self.value |= u64::from(byte) << (56 - self.bits);
            self.bits += 8;
        }
    }

    /// Decodes one boolean whose probability of being `false` is `prob / 256`.
    pub fn read_bool(&mut self, prob: u8) -> bool {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);

        if self.bits < 16 {
            self.fill();
        }

        let bigsplit = u64::from(split) << 56;
        let bit = if self.value >= bigsplit {
            self.range -= split;
            self.value -= bigsplit;
            true
        } else {
            self.range = split;
            false
        };

        let shift = self.range.leading_zeros() - 24;
        self.range <<= shift;
        self.value <<= shift;
        self.bits -= shift;
        self.consumed += u64::from(shift);

        if self.consumed > self.data.len() as u64 * 8 {
            self.has_error = true;
        }

        bit
    }

    /// Reads a bit with even probability.
    pub fn read_bit(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Reads an `n`-bit unsigned literal, MSB first.
    pub fn read_literal(&mut self, n: u32) -> u32 {
        (0..n).fold(0, |acc, _| (acc << 1) | self.read_bit() as u32)
    }

    /// Walks `tree` from its root and returns the value of the leaf reached.
    pub fn read_tree(&mut self, tree: &Tree, probs: &[u8]) -> u8 {
        self.read_tree_from(tree, probs, 0)
    }

    /// Same as [`Self::read_tree`], starting at node `start`.
    pub fn read_tree_from(&mut self, tree: &Tree, probs: &[u8], start: usize) -> u8 {
        let mut node = start;

        loop {
            let bit = self.read_bool(probs[node]);
            match tree[node][bit as usize] {
                TreeNode::Leaf(value) => return value,
                TreeNode::Node(next) => node = next as usize,
            }
        }
    }

    /// Conditionally replaces `prob` with a delta-coded new value.
    pub fn diff_update_prob(&mut self, prob: &mut u8) {
        if self.read_bool(DIFF_UPDATE_PROB) {
            let delp = self.decode_term_subexp();
            *prob = inv_remap_prob(delp, *prob);
        }
    }

    fn decode_uniform(&mut self) -> u32 {
        const L: u32 = 8;
        const M: u32 = (1 << L) - 191;

        let v = self.read_literal(L - 1);
        if v < M {
            v
        } else {
            (v << 1) - M + self.read_bit() as u32
        }
    }

    fn decode_term_subexp(&mut self) -> u32 {
        if !self.read_bit() {
            return self.read_literal(4);
        }
        if !self.read_bit() {
            return self.read_literal(4) + 16;
        }
        if !self.read_bit() {
            return self.read_literal(5) + 32;
        }

        self.decode_uniform() + 64
    }

    /// Whether the decoder ran past the end of its buffer. Never clears.
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Checks that the bits left after the last decoded symbol are all zero.
    pub fn padding_is_zero(&self) -> bool {
        // The top 8 bits of the window belong to the current interval.
        (self.value << 8) == 0 && self.data[self.pos..].iter().all(|b| *b == 0)
    }
}

const fn build_inv_map_table() -> [u8; MAX_PROB as usize] {
    let mut table = [0u8; MAX_PROB as usize];
    let mut i = 0;

    while i < 20 {
        table[i] = 7 + 13 * i as u8;
        i += 1;
    }

    let mut v = 1;
    while v <= 253 {
        if v % 13 != 7 {
            table[i] = v as u8;
            i += 1;
        }
        v += 1;
    }

    table[i] = 253;
    table
}

const INV_MAP_TABLE: [u8; MAX_PROB as usize] = build_inv_map_table();

fn inv_recenter_nonneg(v: i32, m: i32) -> i32 {
    if v > 2 * m {
        v
    } else if v & 1 != 0 {
        m - ((v + 1) >> 1)
    } else {
        m + (v >> 1)
    }
}

/// Maps a decoded delta index back onto a probability, centered around `prob`.
pub fn inv_remap_prob(delp: u32, prob: u8) -> u8 {
    let v = i32::from(INV_MAP_TABLE[(delp as usize).min(INV_MAP_TABLE.len() - 1)]);
    let m = i32::from(prob) - 1;

    let new = if (m << 1) <= MAX_PROB {
        1 + inv_recenter_nonneg(v, m)
    } else {
        MAX_PROB - inv_recenter_nonneg(v, MAX_PROB - 1 - m)
    };

    new.clamp(1, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::bool_encoder::BoolEncoder;

    use TreeNode::Leaf;
    use TreeNode::Node;

    const TEST_TREE: [[TreeNode; 2]; 3] = [
        [Leaf(0), Node(1)],
        [Leaf(1), Node(2)],
        [Leaf(2), Leaf(3)],
    ];

    #[test]
    fn inv_map_table_is_a_permutation() {
        let mut seen = [false; 256];
        for v in &INV_MAP_TABLE[..254] {
            assert!(!seen[*v as usize], "{} appears twice", v);
            seen[*v as usize] = true;
        }
        assert!(seen[1..255].iter().all(|s| *s));
    }

    #[test]
    fn empty_partition_is_rejected() {
        assert_eq!(BoolDecoder::new(&[]).err(), Some(BoolDecoderError::EmptyPartition));
    }

    #[test]
    fn marker_bit_must_be_zero() {
        assert_eq!(BoolDecoder::new(&[0xff, 0xff]).err(), Some(BoolDecoderError::InvalidMarker));
    }

    #[test]
    fn decoding_is_deterministic() {
        let mut enc = BoolEncoder::new();
        let probs = [1u8, 10, 128, 200, 255, 77, 3];
        for (i, p) in probs.iter().cycle().take(500).enumerate() {
            enc.write_bool(i % 3 == 0, *p);
        }
        let data = enc.finish();

        let decode = || {
            let mut dec = BoolDecoder::new(&data).unwrap();
            probs
                .iter()
                .cycle()
                .take(500)
                .map(|p| dec.read_bool(*p))
                .collect::<Vec<_>>()
        };

        let first = decode();
        assert_eq!(first, decode());
        assert!(first.iter().enumerate().all(|(i, b)| *b == (i % 3 == 0)));
    }

    #[test]
    fn literals_and_trees() {
        let mut enc = BoolEncoder::new();
        enc.write_literal(8, 0xa5);
        enc.write_tree(&TEST_TREE, &[100, 50, 200], 2);
        enc.write_tree(&TEST_TREE, &[100, 50, 200], 0);
        enc.write_literal(3, 5);
        let data = enc.finish();

        let mut dec = BoolDecoder::new(&data).unwrap();
        assert_eq!(dec.read_literal(8), 0xa5);
        assert_eq!(dec.read_tree(&TEST_TREE, &[100, 50, 200]), 2);
        assert_eq!(dec.read_tree(&TEST_TREE, &[100, 50, 200]), 0);
        assert_eq!(dec.read_literal(3), 5);
        assert!(!dec.has_error());
    }

    #[test]
    fn padding_check() {
        let dec = BoolDecoder::new(&[0x00, 0x00, 0x00]).unwrap();
        assert!(dec.padding_is_zero());

        let dec = BoolDecoder::new(&[0x00, 0x00, 0x01]).unwrap();
        assert!(!dec.padding_is_zero());
    }

    #[test]
    fn overrun_sets_sticky_error() {
        let mut dec = BoolDecoder::new(&[0x00]).unwrap();
        assert!(!dec.has_error());

        for _ in 0..64 {
            assert!(!dec.read_bit());
        }
        assert!(dec.has_error());

        // Decoding keeps returning deterministic values and the flag stays set.
        dec.read_literal(16);
        assert!(dec.has_error());
    }

    #[test]
    fn diff_update_prob_round_trip() {
        for old in [1u8, 2, 60, 128, 129, 200, 254, 255] {
            for new in [1u8, 5, 100, 128, 190, 255] {
                // An update to the same value cannot be signaled.
                if new == old {
                    continue;
                }

                let mut enc = BoolEncoder::new();
                enc.write_diff_update(old, None);
                enc.write_diff_update(old, Some(new));
                let data = enc.finish();

                let mut dec = BoolDecoder::new(&data).unwrap();

                let mut unchanged = old;
                dec.diff_update_prob(&mut unchanged);
                assert_eq!(unchanged, old);

                let mut updated = old;
                dec.diff_update_prob(&mut updated);
                assert_eq!(updated, new, "updating {} to {}", old, new);
            }
        }
    }
}
