// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding of quantized transform coefficients.

use crate::decoders::vp9::bool_decoder::BoolDecoder;
use crate::decoders::vp9::entropy::FrameContext;
use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::parser::BitDepth;
use crate::decoders::vp9::probs::coef_band;
use crate::decoders::vp9::probs::get_scan;
use crate::decoders::vp9::probs::CAT1_PROBS;
use crate::decoders::vp9::probs::CAT2_PROBS;
use crate::decoders::vp9::probs::CAT3_PROBS;
use crate::decoders::vp9::probs::CAT4_PROBS;
use crate::decoders::vp9::probs::CAT5_PROBS;
use crate::decoders::vp9::probs::CAT6_PROBS;
use crate::decoders::vp9::probs::CAT_MIN_VALUES;
use crate::decoders::vp9::probs::CATEGORY1_TOKEN;
use crate::decoders::vp9::probs::COEF_CON_TREE;
use crate::decoders::vp9::probs::EOB_MODEL_TOKEN;
use crate::decoders::vp9::probs::ENERGY_CLASS;
use crate::decoders::vp9::probs::ONE_TOKEN;
use crate::decoders::vp9::probs::PARETO_TABLE;
use crate::decoders::vp9::probs::TWO_TOKEN;
use crate::decoders::vp9::probs::ZERO_TOKEN;
use crate::decoders::vp9::types::TxSize;
use crate::decoders::vp9::types::TxType;

const EOB_NODE: usize = 0;
const ZERO_NODE: usize = 1;
const ONE_NODE: usize = 2;
const PIVOT_NODE: usize = 2;

/// Entropy context at the start of a transform block: the number of its above and left
/// neighbors that had nonzero coefficients.
pub fn block_context(above: &[u8], left: &[u8]) -> usize {
    above.iter().any(|c| *c != 0) as usize + left.iter().any(|c| *c != 0) as usize
}

/// Records whether a transform block had coefficients. Entries from `in_frame` on lie outside
/// the frame and are always cleared.
pub fn set_context(ctx: &mut [u8], nonzero: bool, in_frame: usize) {
    for (i, c) in ctx.iter_mut().enumerate() {
        *c = (nonzero && i < in_frame) as u8;
    }
}

/// Raster positions of the two already decoded neighbors whose tokens give the context of the
/// coefficient at `rc`. Transforms mixing ADST and DCT only look along the ADST direction.
fn neighbors(rc: usize, width: usize, tx_size: TxSize, tx_type: TxType) -> (usize, usize) {
    let (i, j) = (rc / width, rc % width);
    let above = rc.wrapping_sub(width);
    let left = rc.wrapping_sub(1);

    if i > 0 && j > 0 {
        match (tx_size, tx_type) {
            (TxSize::Tx32x32, _) => (above, left),
            (_, TxType::DctAdst) => (above, above),
            (_, TxType::AdstDct) => (left, left),
            _ => (above, left),
        }
    } else if i > 0 {
        (above, above)
    } else {
        (left, left)
    }
}

/// Where a transform block sits in the entropy model.
#[derive(Copy, Clone, Debug)]
pub struct BlockKind {
    pub tx_size: TxSize,
    pub tx_type: TxType,
    /// 0 for luma, 1 for chroma.
    pub plane_type: usize,
    pub is_inter: bool,
}

/// Decodes the tokens of one transform block into dequantized coefficients.
///
/// `coefs` is indexed in raster order and must be zero on entry. `ctx` is the value returned
/// by [`block_context`]. Returns the end of block position, the number of coefficients read
/// in scan order.
#[allow(clippy::too_many_arguments)]
pub fn decode_coefs(
    bd: &mut BoolDecoder,
    fc: &FrameContext,
    counts: &mut FrameCounts,
    kind: BlockKind,
    mut ctx: usize,
    dq: [i16; 2],
    bit_depth: BitDepth,
    coefs: &mut [i32],
    token_cache: &mut [u8],
) -> usize {
    let BlockKind {
        tx_size,
        tx_type,
        plane_type,
        is_inter,
    } = kind;
    let tx = tx_size as usize;
    let reference = is_inter as usize;
    let probs = &fc.coef[tx][plane_type][reference];
    let coef_counts = &mut counts.coef[tx][plane_type][reference];
    let eob_branch = &mut counts.eob_branch[tx][plane_type][reference];

    let scan = get_scan(tx_size, tx_type);
    let width = tx_size.width();
    let max_eob = tx_size.num_coeffs();
    let dq_shift = (tx_size == TxSize::Tx32x32) as u32;
    let (cat6_bits, cat6_probs) = match bit_depth {
        BitDepth::Depth8 => (14, &CAT6_PROBS[4..]),
        BitDepth::Depth10 => (16, &CAT6_PROBS[2..]),
        BitDepth::Depth12 => (18, &CAT6_PROBS[..]),
    };

    let context_at = |c: usize, token_cache: &[u8]| {
        let (a, b) = neighbors(scan[c] as usize, width, tx_size, tx_type);
        (1 + token_cache[a] as usize + token_cache[b] as usize) >> 1
    };

    let mut c = 0;
    while c < max_eob {
        let mut band = coef_band(tx_size, c);
        let mut prob = &probs[band][ctx];

        eob_branch[band][ctx] += 1;
        if !bd.read_bool(prob[EOB_NODE]) {
            coef_counts[band][ctx][EOB_MODEL_TOKEN] += 1;
            break;
        }

        while !bd.read_bool(prob[ZERO_NODE]) {
            coef_counts[band][ctx][ZERO_TOKEN as usize] += 1;
            token_cache[scan[c] as usize] = 0;
            c += 1;
            if c >= max_eob {
                return c;
            }
            ctx = context_at(c, token_cache);
            band = coef_band(tx_size, c);
            prob = &probs[band][ctx];
        }

        let (token, value) = if !bd.read_bool(prob[ONE_NODE]) {
            coef_counts[band][ctx][ONE_TOKEN as usize] += 1;
            (ONE_TOKEN, 1)
        } else {
            coef_counts[band][ctx][TWO_TOKEN as usize] += 1;
            let pareto = &PARETO_TABLE[prob[PIVOT_NODE] as usize - 1];
            let token = bd.read_tree(&COEF_CON_TREE, pareto);
            let value = if token < CATEGORY1_TOKEN {
                i32::from(token)
            } else {
                let cat = (token - CATEGORY1_TOKEN) as usize;
                let extra: &[u8] = match cat {
                    0 => &CAT1_PROBS,
                    1 => &CAT2_PROBS,
                    2 => &CAT3_PROBS,
                    3 => &CAT4_PROBS,
                    4 => &CAT5_PROBS,
                    _ => &cat6_probs[..cat6_bits],
                };
                let bits = extra
                    .iter()
                    .fold(0, |acc, p| (acc << 1) | bd.read_bool(*p) as i32);
                CAT_MIN_VALUES[cat] + bits
            };
            (token, value)
        };

        let rc = scan[c] as usize;
        token_cache[rc] = ENERGY_CLASS[token as usize];

        let dqv = i32::from(if c == 0 { dq[0] } else { dq[1] });
        let v = (value * dqv) >> dq_shift;
        coefs[rc] = if bd.read_bit() { -v } else { v };

        c += 1;
        if c < max_eob {
            ctx = context_at(c, token_cache);
        }
    }

    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::bool_encoder::BoolEncoder;
    use crate::decoders::vp9::probs::CATEGORY6_TOKEN;

    /// A context where every coefficient probability is one half, so the encoder does not need
    /// to track contexts.
    fn flat_context() -> FrameContext {
        let mut fc = FrameContext::default();
        for tx in fc.coef.iter_mut() {
            for pt in tx.iter_mut() {
                for r in pt.iter_mut() {
                    for band in r.iter_mut() {
                        for ctx in band.iter_mut() {
                            *ctx = [128; 3];
                        }
                    }
                }
            }
        }
        fc
    }

    fn write_token(enc: &mut BoolEncoder, token: u8) {
        enc.write_bool(true, 128);
        if token == ZERO_TOKEN {
            enc.write_bool(false, 128);
            return;
        }
        enc.write_bool(true, 128);
        if token == ONE_TOKEN {
            enc.write_bool(false, 128);
        } else {
            enc.write_bool(true, 128);
            enc.write_tree(&COEF_CON_TREE, &PARETO_TABLE[127], token);
        }
    }

    fn decode(data: &[u8], kind: BlockKind, dq: [i16; 2]) -> (usize, Vec<i32>, FrameCounts) {
        let fc = flat_context();
        let mut counts = FrameCounts::default();
        let mut coefs = vec![0; kind.tx_size.num_coeffs()];
        let mut token_cache = [0u8; 1024];
        let mut bd = BoolDecoder::new(data).unwrap();
        let eob = decode_coefs(
            &mut bd,
            &fc,
            &mut counts,
            kind,
            0,
            dq,
            BitDepth::Depth8,
            &mut coefs,
            &mut token_cache,
        );
        assert!(!bd.has_error());
        (eob, coefs, counts)
    }

    const LUMA_4X4: BlockKind = BlockKind {
        tx_size: TxSize::Tx4x4,
        tx_type: TxType::DctDct,
        plane_type: 0,
        is_inter: false,
    };

    #[test]
    fn immediate_end_of_block() {
        let mut enc = BoolEncoder::new();
        enc.write_bool(false, 128);
        let (eob, coefs, counts) = decode(&enc.finish(), LUMA_4X4, [8, 10]);

        assert_eq!(eob, 0);
        assert!(coefs.iter().all(|c| *c == 0));
        assert_eq!(counts.eob_branch[0][0][0][0][0], 1);
        assert_eq!(counts.coef[0][0][0][0][0][EOB_MODEL_TOKEN], 1);
    }

    #[test]
    fn tokens_are_dequantized_in_scan_order() {
        let mut enc = BoolEncoder::new();
        // +1, 0 and -2, then the end of block.
        write_token(&mut enc, ONE_TOKEN);
        enc.write_bit(false);
        enc.write_bool(true, 128);
        enc.write_bool(false, 128);
        enc.write_bool(true, 128);
        enc.write_bool(true, 128);
        enc.write_tree(&COEF_CON_TREE, &PARETO_TABLE[127], TWO_TOKEN);
        enc.write_bit(true);
        enc.write_bool(false, 128);

        let (eob, coefs, counts) = decode(&enc.finish(), LUMA_4X4, [8, 10]);

        assert_eq!(eob, 3);
        assert_eq!(coefs[0], 8);
        // The default 4x4 scan visits raster positions 0, 4 and 1 first.
        assert_eq!(coefs[4], 0);
        assert_eq!(coefs[1], -20);

        let total = |token: usize| -> u32 {
            counts.coef[0][0][0]
                .iter()
                .flat_map(|b| b.iter())
                .map(|c| c[token])
                .sum()
        };
        assert_eq!(total(ZERO_TOKEN as usize), 1);
        assert_eq!(total(ONE_TOKEN as usize), 1);
        assert_eq!(total(TWO_TOKEN as usize), 1);
        assert_eq!(total(EOB_MODEL_TOKEN), 1);

        // No end of block check follows a zero token.
        let eob_checks: u32 = counts.eob_branch[0][0][0].iter().flatten().sum();
        assert_eq!(eob_checks, 3);
    }

    #[test]
    fn category6_extra_bits() {
        let mut enc = BoolEncoder::new();
        write_token(&mut enc, CATEGORY6_TOKEN);
        for bit in (0..14).rev() {
            enc.write_bool((100 >> bit) & 1 == 1, CAT6_PROBS[4 + 13 - bit]);
        }
        enc.write_bit(false);
        enc.write_bool(false, 128);

        let (eob, coefs, _) = decode(&enc.finish(), LUMA_4X4, [4, 4]);
        assert_eq!(eob, 1);
        assert_eq!(coefs[0], (67 + 100) * 4);
    }

    #[test]
    fn largest_transform_halves_dequantized_values() {
        let mut enc = BoolEncoder::new();
        write_token(&mut enc, ONE_TOKEN);
        enc.write_bit(false);
        enc.write_bool(false, 128);

        let kind = BlockKind {
            tx_size: TxSize::Tx32x32,
            ..LUMA_4X4
        };
        let (eob, coefs, counts) = decode(&enc.finish(), kind, [5, 7]);
        assert_eq!(eob, 1);
        assert_eq!(coefs[0], 2);
        assert_eq!(counts.coef[3][0][0][0][0][ONE_TOKEN as usize], 1);
    }

    #[test]
    fn trailing_zeros_end_without_eob_token() {
        let mut enc = BoolEncoder::new();
        enc.write_bool(true, 128);
        for _ in 0..16 {
            enc.write_bool(false, 128);
        }

        let (eob, coefs, counts) = decode(&enc.finish(), LUMA_4X4, [8, 10]);
        assert_eq!(eob, 16);
        assert!(coefs.iter().all(|c| *c == 0));
        let eobs: u32 = counts.coef[0][0][0]
            .iter()
            .flatten()
            .map(|c| c[EOB_MODEL_TOKEN])
            .sum();
        assert_eq!(eobs, 0);
    }

    #[test]
    fn entropy_contexts() {
        assert_eq!(block_context(&[0, 0], &[0, 1]), 1);
        assert_eq!(block_context(&[1, 0], &[0, 1]), 2);
        assert_eq!(block_context(&[0], &[0]), 0);

        let mut ctx = [1u8; 4];
        set_context(&mut ctx, true, 3);
        assert_eq!(ctx, [1, 1, 1, 0]);
        set_context(&mut ctx, false, 4);
        assert_eq!(ctx, [0; 4]);
    }

    #[test]
    fn neighbor_directions() {
        // Position (1, 1) of a 4x4 block.
        assert_eq!(neighbors(5, 4, TxSize::Tx4x4, TxType::DctDct), (1, 4));
        assert_eq!(neighbors(5, 4, TxSize::Tx4x4, TxType::DctAdst), (1, 1));
        assert_eq!(neighbors(5, 4, TxSize::Tx4x4, TxType::AdstDct), (4, 4));
        assert_eq!(neighbors(2, 4, TxSize::Tx4x4, TxType::AdstAdst), (1, 1));
        assert_eq!(neighbors(8, 4, TxSize::Tx4x4, TxType::AdstAdst), (4, 4));
    }
}
