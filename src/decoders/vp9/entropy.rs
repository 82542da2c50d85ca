// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Forward probabilities, backward-update counters and the adaptation that folds the latter into
//! the former at the end of a frame.

use std::ops::AddAssign;

use crate::decoders::vp9::bool_decoder::Tree;
use crate::decoders::vp9::bool_decoder::TreeNode;
use crate::decoders::vp9::probs::*;
use crate::decoders::vp9::types::TxSize;

pub const TX_SIZE_CONTEXTS: usize = 2;
pub const SKIP_CONTEXTS: usize = 3;
pub const INTER_MODE_CONTEXTS: usize = 7;
pub const INTERP_FILTER_CONTEXTS: usize = 4;
pub const IS_INTER_CONTEXTS: usize = 4;
pub const COMP_MODE_CONTEXTS: usize = 5;
pub const REF_CONTEXTS: usize = 5;
pub const BLOCK_SIZE_GROUPS: usize = 4;
pub const MV_CLASSES: usize = 11;
pub const MV_OFFSET_BITS: usize = 10;
pub const CLASS0_SIZE: usize = 2;

const COEF_COUNT_SAT: u32 = 24;
const COEF_MAX_UPDATE_FACTOR: u32 = 112;
const COEF_MAX_UPDATE_FACTOR_KEY: u32 = 112;
const COEF_MAX_UPDATE_FACTOR_AFTER_KEY: u32 = 128;
const MODE_MV_COUNT_SAT: u32 = 20;
const MODE_MV_MAX_UPDATE_FACTOR: u32 = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MvComponentProbs {
    pub sign: u8,
    pub classes: [u8; MV_CLASSES - 1],
    pub class0: [u8; CLASS0_SIZE - 1],
    pub bits: [u8; MV_OFFSET_BITS],
    pub class0_fr: [[u8; 3]; CLASS0_SIZE],
    pub fr: [u8; 3],
    pub class0_hp: u8,
    pub hp: u8,
}

/// The forward probabilities used to decode a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameContext {
    pub tx8x8: [[u8; 1]; TX_SIZE_CONTEXTS],
    pub tx16x16: [[u8; 2]; TX_SIZE_CONTEXTS],
    pub tx32x32: [[u8; 3]; TX_SIZE_CONTEXTS],
    pub coef: CoefProbs,
    pub skip: [u8; SKIP_CONTEXTS],
    pub inter_mode: [[u8; 3]; INTER_MODE_CONTEXTS],
    pub interp_filter: [[u8; 2]; INTERP_FILTER_CONTEXTS],
    pub is_inter: [u8; IS_INTER_CONTEXTS],
    pub comp_mode: [u8; COMP_MODE_CONTEXTS],
    pub single_ref: [[u8; 2]; REF_CONTEXTS],
    pub comp_ref: [u8; REF_CONTEXTS],
    pub y_mode: [[u8; 9]; BLOCK_SIZE_GROUPS],
    pub uv_mode: [[u8; 9]; 10],
    pub partition: [[u8; 3]; 16],
    pub mv_joint: [u8; 3],
    pub mv_comp: [MvComponentProbs; 2],
}

impl Default for FrameContext {
    fn default() -> Self {
        let mv_comp = |i: usize| MvComponentProbs {
            sign: DEFAULT_MV_SIGN_PROBS[i],
            classes: DEFAULT_MV_CLASSES_PROBS[i],
            class0: [DEFAULT_MV_CLASS0_PROBS[i]],
            bits: DEFAULT_MV_BITS_PROBS[i],
            class0_fr: DEFAULT_MV_CLASS0_FR_PROBS[i],
            fr: DEFAULT_MV_FR_PROBS[i],
            class0_hp: DEFAULT_MV_CLASS0_HP_PROBS[i],
            hp: DEFAULT_MV_HP_PROBS[i],
        };

        Self {
            tx8x8: DEFAULT_TX_8X8_PROBS,
            tx16x16: DEFAULT_TX_16X16_PROBS,
            tx32x32: DEFAULT_TX_32X32_PROBS,
            coef: DEFAULT_COEF_PROBS,
            skip: DEFAULT_SKIP_PROBS,
            inter_mode: DEFAULT_INTER_MODE_PROBS,
            interp_filter: DEFAULT_INTERP_FILTER_PROBS,
            is_inter: DEFAULT_IS_INTER_PROBS,
            comp_mode: DEFAULT_COMP_MODE_PROBS,
            single_ref: DEFAULT_SINGLE_REF_PROBS,
            comp_ref: DEFAULT_COMP_REF_PROBS,
            y_mode: DEFAULT_Y_MODE_PROBS,
            uv_mode: DEFAULT_UV_MODE_PROBS,
            partition: DEFAULT_PARTITION_PROBS,
            mv_joint: DEFAULT_MV_JOINT_PROBS,
            mv_comp: [mv_comp(0), mv_comp(1)],
        }
    }
}

impl FrameContext {
    /// Probabilities of the transform size tree for blocks whose largest transform is `max_tx`.
    pub fn tx_probs(&self, max_tx: TxSize, ctx: usize) -> &[u8] {
        match max_tx {
            TxSize::Tx4x4 => &[],
            TxSize::Tx8x8 => &self.tx8x8[ctx],
            TxSize::Tx16x16 => &self.tx16x16[ctx],
            TxSize::Tx32x32 => &self.tx32x32[ctx],
        }
    }
}

/// Elementwise accumulation of counter arrays.
trait Accumulate {
    fn accumulate(&mut self, other: &Self);
}

impl Accumulate for u32 {
    fn accumulate(&mut self, other: &Self) {
        *self += *other;
    }
}

impl<T: Accumulate, const N: usize> Accumulate for [T; N] {
    fn accumulate(&mut self, other: &Self) {
        for (a, b) in self.iter_mut().zip(other) {
            a.accumulate(b);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvComponentCounts {
    pub sign: [u32; 2],
    pub classes: [u32; MV_CLASSES],
    pub class0: [u32; CLASS0_SIZE],
    pub bits: [[u32; 2]; MV_OFFSET_BITS],
    pub class0_fr: [[u32; 4]; CLASS0_SIZE],
    pub fr: [u32; 4],
    pub class0_hp: [u32; 2],
    pub hp: [u32; 2],
}

impl Accumulate for MvComponentCounts {
    fn accumulate(&mut self, other: &Self) {
        self.sign.accumulate(&other.sign);
        self.classes.accumulate(&other.classes);
        self.class0.accumulate(&other.class0);
        self.bits.accumulate(&other.bits);
        self.class0_fr.accumulate(&other.class0_fr);
        self.fr.accumulate(&other.fr);
        self.class0_hp.accumulate(&other.class0_hp);
        self.hp.accumulate(&other.hp);
    }
}

/// Symbol counts gathered while decoding a frame.
///
/// Counts only ever grow and merging two sets is a plain sum, so the order in which tile
/// workers are folded together does not matter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameCounts {
    /// Zero, one, more than one and end of block tokens.
    pub coef: [[[[[[u32; UNCONSTRAINED_NODES + 1]; COEF_CONTEXTS]; COEF_BANDS]; 2]; 2]; 4],
    /// Number of times the end of block node was read.
    pub eob_branch: [[[[[u32; COEF_CONTEXTS]; COEF_BANDS]; 2]; 2]; 4],
    pub y_mode: [[u32; 10]; BLOCK_SIZE_GROUPS],
    pub uv_mode: [[u32; 10]; 10],
    pub partition: [[u32; 4]; 16],
    pub skip: [[u32; 2]; SKIP_CONTEXTS],
    pub tx8x8: [[u32; 2]; TX_SIZE_CONTEXTS],
    pub tx16x16: [[u32; 3]; TX_SIZE_CONTEXTS],
    pub tx32x32: [[u32; 4]; TX_SIZE_CONTEXTS],
    pub inter_mode: [[u32; 4]; INTER_MODE_CONTEXTS],
    pub interp_filter: [[u32; 3]; INTERP_FILTER_CONTEXTS],
    pub is_inter: [[u32; 2]; IS_INTER_CONTEXTS],
    pub comp_mode: [[u32; 2]; COMP_MODE_CONTEXTS],
    pub single_ref: [[[u32; 2]; 2]; REF_CONTEXTS],
    pub comp_ref: [[u32; 2]; REF_CONTEXTS],
    pub mv_joint: [u32; 4],
    pub mv_comp: [MvComponentCounts; 2],
}

impl FrameCounts {
    pub fn tx_counts(&mut self, max_tx: TxSize, ctx: usize) -> &mut [u32] {
        match max_tx {
            TxSize::Tx4x4 => &mut [],
            TxSize::Tx8x8 => &mut self.tx8x8[ctx],
            TxSize::Tx16x16 => &mut self.tx16x16[ctx],
            TxSize::Tx32x32 => &mut self.tx32x32[ctx],
        }
    }
}

impl AddAssign<&FrameCounts> for FrameCounts {
    fn add_assign(&mut self, other: &FrameCounts) {
        self.coef.accumulate(&other.coef);
        self.eob_branch.accumulate(&other.eob_branch);
        self.y_mode.accumulate(&other.y_mode);
        self.uv_mode.accumulate(&other.uv_mode);
        self.partition.accumulate(&other.partition);
        self.skip.accumulate(&other.skip);
        self.tx8x8.accumulate(&other.tx8x8);
        self.tx16x16.accumulate(&other.tx16x16);
        self.tx32x32.accumulate(&other.tx32x32);
        self.inter_mode.accumulate(&other.inter_mode);
        self.interp_filter.accumulate(&other.interp_filter);
        self.is_inter.accumulate(&other.is_inter);
        self.comp_mode.accumulate(&other.comp_mode);
        self.single_ref.accumulate(&other.single_ref);
        self.comp_ref.accumulate(&other.comp_ref);
        self.mv_joint.accumulate(&other.mv_joint);
        for (a, b) in self.mv_comp.iter_mut().zip(&other.mv_comp) {
            a.accumulate(b);
        }
    }
}

/// Probability of a zero given `n0` zeros and `n1` ones, clamped to [1, 255].
pub fn get_binary_prob(n0: u32, n1: u32) -> u8 {
    let den = u64::from(n0) + u64::from(n1);
    if den == 0 {
        return 128;
    }

    ((u64::from(n0) * 256 + (den >> 1)) / den).clamp(1, 255) as u8
}

fn weighted_prob(a: u8, b: u8, factor: u32) -> u8 {
    ((u32::from(a) * (256 - factor) + u32::from(b) * factor + 128) >> 8) as u8
}

fn merge_probs(pre_prob: u8, ct: [u32; 2], count_sat: u32, max_update_factor: u32) -> u8 {
    let prob = get_binary_prob(ct[0], ct[1]);
    let count = (ct[0] + ct[1]).min(count_sat);
    let factor = max_update_factor * count / count_sat;
    weighted_prob(pre_prob, prob, factor)
}

fn mode_mv_merge_probs(pre_prob: u8, ct: [u32; 2]) -> u8 {
    if ct[0] + ct[1] == 0 {
        return pre_prob;
    }

    merge_probs(pre_prob, ct, MODE_MV_COUNT_SAT, MODE_MV_MAX_UPDATE_FACTOR)
}

/// Adapts the probabilities of `tree` from `counts`, indexed by leaf value. Returns the total
/// count of the subtree rooted at `node`.
fn tree_merge_probs(
    tree: &Tree,
    node: usize,
    pre_probs: &[u8],
    counts: &[u32],
    probs: &mut [u8],
) -> u32 {
    let branch = |b: usize, probs: &mut [u8]| match tree[node][b] {
        TreeNode::Leaf(v) => counts[v as usize],
        TreeNode::Node(next) => tree_merge_probs(tree, next as usize, pre_probs, counts, probs),
    };

    let left = branch(0, probs);
    let right = branch(1, probs);
    probs[node] = mode_mv_merge_probs(pre_probs[node], [left, right]);
    left + right
}

fn adapt_tree(tree: &Tree, pre_probs: &[u8], counts: &[u32], probs: &mut [u8]) {
    tree_merge_probs(tree, 0, pre_probs, counts, probs);
}

/// Adapts the coefficient probabilities of `fc` from `pre_fc`, the context the frame started
/// from, and the counts gathered while decoding.
pub fn adapt_coef_probs(
    fc: &mut FrameContext,
    pre_fc: &FrameContext,
    counts: &FrameCounts,
    frame_is_intra: bool,
    last_frame_was_key: bool,
) {
    let update_factor = if frame_is_intra {
        COEF_MAX_UPDATE_FACTOR_KEY
    } else if last_frame_was_key {
        COEF_MAX_UPDATE_FACTOR_AFTER_KEY
    } else {
        COEF_MAX_UPDATE_FACTOR
    };

    for tx in 0..4 {
        for plane in 0..2 {
            for reference in 0..2 {
                for band in 0..COEF_BANDS {
                    let contexts = if band == 0 { 3 } else { COEF_CONTEXTS };
                    for ctx in 0..contexts {
                        let c = &counts.coef[tx][plane][reference][band][ctx];
                        let eob = counts.eob_branch[tx][plane][reference][band][ctx];
                        let [n0, n1, n2, neob] = *c;
                        let branch_ct = [[neob, eob.saturating_sub(neob)], [n0, n1 + n2], [n1, n2]];

                        let pre = &pre_fc.coef[tx][plane][reference][band][ctx];
                        let probs = &mut fc.coef[tx][plane][reference][band][ctx];
                        for m in 0..UNCONSTRAINED_NODES {
                            probs[m] =
                                merge_probs(pre[m], branch_ct[m], COEF_COUNT_SAT, update_factor);
                        }
                    }
                }
            }
        }
    }
}

/// Adapts the mode probabilities of an inter frame.
pub fn adapt_mode_probs(
    fc: &mut FrameContext,
    pre_fc: &FrameContext,
    counts: &FrameCounts,
    switchable_filter: bool,
    tx_select: bool,
) {
    for i in 0..IS_INTER_CONTEXTS {
        fc.is_inter[i] = mode_mv_merge_probs(pre_fc.is_inter[i], counts.is_inter[i]);
    }
    for i in 0..COMP_MODE_CONTEXTS {
        fc.comp_mode[i] = mode_mv_merge_probs(pre_fc.comp_mode[i], counts.comp_mode[i]);
    }
    for i in 0..REF_CONTEXTS {
        fc.comp_ref[i] = mode_mv_merge_probs(pre_fc.comp_ref[i], counts.comp_ref[i]);
        for j in 0..2 {
            fc.single_ref[i][j] =
                mode_mv_merge_probs(pre_fc.single_ref[i][j], counts.single_ref[i][j]);
        }
    }

    for i in 0..INTER_MODE_CONTEXTS {
        adapt_tree(
            &INTER_MODE_TREE,
            &pre_fc.inter_mode[i],
            &counts.inter_mode[i],
            &mut fc.inter_mode[i],
        );
    }
    for i in 0..BLOCK_SIZE_GROUPS {
        adapt_tree(&INTRA_MODE_TREE, &pre_fc.y_mode[i], &counts.y_mode[i], &mut fc.y_mode[i]);
    }
    for i in 0..10 {
        adapt_tree(&INTRA_MODE_TREE, &pre_fc.uv_mode[i], &counts.uv_mode[i], &mut fc.uv_mode[i]);
    }
    for i in 0..16 {
        adapt_tree(
            &PARTITION_TREE,
            &pre_fc.partition[i],
            &counts.partition[i],
            &mut fc.partition[i],
        );
    }

    if switchable_filter {
        for i in 0..INTERP_FILTER_CONTEXTS {
            adapt_tree(
                &INTERP_FILTER_TREE,
                &pre_fc.interp_filter[i],
                &counts.interp_filter[i],
                &mut fc.interp_filter[i],
            );
        }
    }

    if tx_select {
        for i in 0..TX_SIZE_CONTEXTS {
            let c = &counts.tx8x8[i];
            fc.tx8x8[i][0] = mode_mv_merge_probs(pre_fc.tx8x8[i][0], [c[0], c[1]]);

            let c = &counts.tx16x16[i];
            let branch_ct = [[c[0], c[1] + c[2]], [c[1], c[2]]];
            for j in 0..2 {
                fc.tx16x16[i][j] = mode_mv_merge_probs(pre_fc.tx16x16[i][j], branch_ct[j]);
            }

            let c = &counts.tx32x32[i];
            let branch_ct = [[c[0], c[1] + c[2] + c[3]], [c[1], c[2] + c[3]], [c[2], c[3]]];
            for j in 0..3 {
                fc.tx32x32[i][j] = mode_mv_merge_probs(pre_fc.tx32x32[i][j], branch_ct[j]);
            }
        }
    }

    for i in 0..SKIP_CONTEXTS {
        fc.skip[i] = mode_mv_merge_probs(pre_fc.skip[i], counts.skip[i]);
    }
}

/// Adapts the motion vector probabilities of an inter frame.
pub fn adapt_mv_probs(
    fc: &mut FrameContext,
    pre_fc: &FrameContext,
    counts: &FrameCounts,
    allow_high_precision_mv: bool,
) {
    adapt_tree(&MV_JOINT_TREE, &pre_fc.mv_joint, &counts.mv_joint, &mut fc.mv_joint);

    for i in 0..2 {
        let pre = &pre_fc.mv_comp[i];
        let c = &counts.mv_comp[i];
        let comp = &mut fc.mv_comp[i];

        comp.sign = mode_mv_merge_probs(pre.sign, c.sign);
        adapt_tree(&MV_CLASS_TREE, &pre.classes, &c.classes, &mut comp.classes);
        comp.class0[0] = mode_mv_merge_probs(pre.class0[0], c.class0);
        for j in 0..MV_OFFSET_BITS {
            comp.bits[j] = mode_mv_merge_probs(pre.bits[j], c.bits[j]);
        }
        for j in 0..CLASS0_SIZE {
            adapt_tree(&MV_FR_TREE, &pre.class0_fr[j], &c.class0_fr[j], &mut comp.class0_fr[j]);
        }
        adapt_tree(&MV_FR_TREE, &pre.fr, &c.fr, &mut comp.fr);

        if allow_high_precision_mv {
            comp.class0_hp = mode_mv_merge_probs(pre.class0_hp, c.class0_hp);
            comp.hp = mode_mv_merge_probs(pre.hp, c.hp);
        }
    }
}
