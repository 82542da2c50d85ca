// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Boolean range encoder used to synthesize compressed headers and tile data in tests.

use crate::decoders::vp9::bool_decoder::inv_remap_prob;
use crate::decoders::vp9::bool_decoder::Tree;
use crate::decoders::vp9::bool_decoder::TreeNode;
use crate::decoders::vp9::bool_decoder::DIFF_UPDATE_PROB;

pub struct BoolEncoder {
    buffer: Vec<u8>,
    low: u32,
    range: u32,
    count: i32,
}

impl BoolEncoder {
    /// Creates an encoder and writes the leading marker bit.
    pub fn new() -> Self {
        let mut encoder = Self {
            buffer: vec![],
            low: 0,
            range: 255,
            count: -24,
        };

        encoder.write_bit(false);
        encoder
    }

    // Propagates a carry into the bytes already written.
    fn add_one_to_output(&mut self) {
        for byte in self.buffer.iter_mut().rev() {
            if *byte == 0xff {
                *byte = 0;
            } else {
                *byte += 1;
                break;
            }
        }
    }

    pub fn write_bool(&mut self, bit: bool, prob: u8) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);

        if bit {
            self.low += split;
            self.range -= split;
        } else {
            self.range = split;
        }

        let mut shift = self.range.leading_zeros() as i32 - 24;
        self.range <<= shift;
        self.count += shift;

        if self.count >= 0 {
            let offset = shift - self.count;

            if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                self.add_one_to_output();
            }

            self.buffer.push((self.low >> (24 - offset)) as u8);
            self.low <<= offset;
            shift = self.count;
            self.low &= 0xff_ffff;
            self.count -= 8;
        }

        self.low <<= shift;
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_bool(bit, 128);
    }

    pub fn write_literal(&mut self, n: u32, value: u32) {
        for bit in (0..n).rev() {
            self.write_bit((value >> bit) & 1 == 1);
        }
    }

    /// Writes the branch decisions leading to the leaf holding `value`.
    pub fn write_tree(&mut self, tree: &Tree, probs: &[u8], value: u8) {
        self.write_tree_from(tree, probs, value, 0);
    }

    pub fn write_tree_from(&mut self, tree: &Tree, probs: &[u8], value: u8, start: usize) {
        fn find(tree: &Tree, node: usize, value: u8, path: &mut Vec<(usize, bool)>) -> bool {
            for bit in [false, true] {
                path.push((node, bit));
                let found = match tree[node][bit as usize] {
                    TreeNode::Leaf(v) => v == value,
                    TreeNode::Node(next) => find(tree, next as usize, value, path),
                };
                if found {
                    return true;
                }
                path.pop();
            }

            false
        }

        let mut path = vec![];
        assert!(find(tree, start, value, &mut path), "{} is not a leaf of the tree", value);

        for (node, bit) in path {
            self.write_bool(bit, probs[node]);
        }
    }

    fn write_term_subexp(&mut self, v: u32) {
        if v < 16 {
            self.write_bit(false);
            self.write_literal(4, v);
        } else if v < 32 {
            self.write_literal(2, 0b10);
            self.write_literal(4, v - 16);
        } else if v < 64 {
            self.write_literal(3, 0b110);
            self.write_literal(5, v - 32);
        } else {
            self.write_literal(3, 0b111);
            let v = v - 64;
            if v < 65 {
                self.write_literal(7, v);
            } else {
                let t = v + 65;
                self.write_literal(7, t >> 1);
                self.write_bit(t & 1 == 1);
            }
        }
    }

    /// Writes the update flag for a probability currently equal to `old` and, when `new` is set,
    /// the delta that turns `old` into `new`.
    pub fn write_diff_update(&mut self, old: u8, new: Option<u8>) {
        let delta = new.and_then(|new| (0..254).find(|v| inv_remap_prob(*v, old) == new));

        match delta {
            Some(v) => {
                self.write_bool(true, DIFF_UPDATE_PROB);
                self.write_term_subexp(v);
            }
            None => self.write_bool(false, DIFF_UPDATE_PROB),
        }
    }

    /// Flushes the encoder and returns the coded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..32 {
            self.write_bit(false);
        }

        self.buffer
    }
}
