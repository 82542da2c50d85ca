// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The compressed header: transform and reference modes plus forward probability updates.

use enumn::N;

use crate::decoders::vp9::bool_decoder::BoolDecoder;
use crate::decoders::vp9::entropy::FrameContext;
use crate::decoders::vp9::entropy::MvComponentProbs;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::InterpolationFilter;
use crate::decoders::vp9::parser::ReferenceFrameType;
use crate::decoders::vp9::probs::COEF_BANDS;
use crate::decoders::vp9::probs::COEF_CONTEXTS;
use crate::decoders::vp9::probs::UNCONSTRAINED_NODES;
use crate::decoders::vp9::types::TxMode;
use crate::decoders::vp9::types::TxSize;
use crate::decoders::DecodeError;

const MV_UPDATE_PROB: u8 = 252;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum ReferenceMode {
    #[default]
    Single = 0,
    Compound = 1,
    Select = 2,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompressedHeader {
    pub tx_mode: TxMode,
    pub reference_mode: ReferenceMode,
    /// Reference shared by every compound prediction of the frame.
    pub comp_fixed_ref: ReferenceFrameType,
    /// The two references a compound prediction can pair with `comp_fixed_ref`.
    pub comp_var_ref: [ReferenceFrameType; 2],
}

/// Whether the sign biases allow compound prediction, i.e. one reference lies on the other
/// side of the current frame.
pub fn compound_reference_allowed(hdr: &Header) -> bool {
    let last = hdr.ref_frame_sign_bias[ReferenceFrameType::Last.index()];
    hdr.ref_frame_sign_bias[ReferenceFrameType::Golden.index()..]
        .iter()
        .any(|bias| *bias != last)
}

fn setup_compound_reference_mode(hdr: &Header, ch: &mut CompressedHeader) {
    use ReferenceFrameType::*;

    let bias = &hdr.ref_frame_sign_bias;

    if bias[Last.index()] == bias[Golden.index()] {
        ch.comp_fixed_ref = AltRef;
        ch.comp_var_ref = [Last, Golden];
    } else if bias[Last.index()] == bias[AltRef.index()] {
        ch.comp_fixed_ref = Golden;
        ch.comp_var_ref = [Last, AltRef];
    } else {
        ch.comp_fixed_ref = Last;
        ch.comp_var_ref = [Golden, AltRef];
    }
}

fn read_tx_mode(r: &mut BoolDecoder) -> TxMode {
    let mut mode = r.read_literal(2);
    if mode == TxMode::Allow32x32 as u32 {
        mode += r.read_bit() as u32;
    }

    // Always in range: two bits plus one.
    TxMode::n(mode as u8).unwrap_or(TxMode::Select)
}

fn read_tx_mode_probs(r: &mut BoolDecoder, fc: &mut FrameContext) {
    for probs in fc.tx8x8.iter_mut() {
        probs.iter_mut().for_each(|p| r.diff_update_prob(p));
    }
    for probs in fc.tx16x16.iter_mut() {
        probs.iter_mut().for_each(|p| r.diff_update_prob(p));
    }
    for probs in fc.tx32x32.iter_mut() {
        probs.iter_mut().for_each(|p| r.diff_update_prob(p));
    }
}

fn read_coef_probs(r: &mut BoolDecoder, fc: &mut FrameContext, tx_mode: TxMode) {
    let max_tx = tx_mode.max_tx_size();

    for tx_size in 0..=max_tx as usize {
        if !r.read_bit() {
            continue;
        }

        for plane_probs in fc.coef[tx_size].iter_mut() {
            for ref_probs in plane_probs.iter_mut() {
                for band in 0..COEF_BANDS {
                    let contexts = if band == 0 { 3 } else { COEF_CONTEXTS };
                    for ctx in 0..contexts {
                        for node in 0..UNCONSTRAINED_NODES {
                            r.diff_update_prob(&mut ref_probs[band][ctx][node]);
                        }
                    }
                }
            }
        }
    }
}

fn read_reference_mode(r: &mut BoolDecoder, hdr: &Header) -> ReferenceMode {
    if !compound_reference_allowed(hdr) || !r.read_bit() {
        ReferenceMode::Single
    } else if r.read_bit() {
        ReferenceMode::Select
    } else {
        ReferenceMode::Compound
    }
}

fn read_reference_mode_probs(r: &mut BoolDecoder, fc: &mut FrameContext, mode: ReferenceMode) {
    if mode == ReferenceMode::Select {
        fc.comp_mode.iter_mut().for_each(|p| r.diff_update_prob(p));
    }

    if mode != ReferenceMode::Compound {
        for probs in fc.single_ref.iter_mut() {
            r.diff_update_prob(&mut probs[0]);
            r.diff_update_prob(&mut probs[1]);
        }
    }

    if mode != ReferenceMode::Single {
        fc.comp_ref.iter_mut().for_each(|p| r.diff_update_prob(p));
    }
}

/// Motion vector probabilities are replaced by a 7-bit value instead of being delta coded.
fn update_mv_probs(r: &mut BoolDecoder, probs: &mut [u8]) {
    for p in probs {
        if r.read_bool(MV_UPDATE_PROB) {
            *p = ((r.read_literal(7) as u8) << 1) | 1;
        }
    }
}

fn read_mv_probs(r: &mut BoolDecoder, fc: &mut FrameContext, allow_hp: bool) {
    update_mv_probs(r, &mut fc.mv_joint);

    for comp in fc.mv_comp.iter_mut() {
        let MvComponentProbs {
            sign,
            classes,
            class0,
            bits,
            ..
        } = comp;
        update_mv_probs(r, std::slice::from_mut(sign));
        update_mv_probs(r, classes);
        update_mv_probs(r, class0);
        update_mv_probs(r, bits);
    }

    for comp in fc.mv_comp.iter_mut() {
        for probs in comp.class0_fr.iter_mut() {
            update_mv_probs(r, probs);
        }
        update_mv_probs(r, &mut comp.fr);
    }

    if allow_hp {
        for comp in fc.mv_comp.iter_mut() {
            update_mv_probs(r, std::slice::from_mut(&mut comp.class0_hp));
            update_mv_probs(r, std::slice::from_mut(&mut comp.hp));
        }
    }
}

/// Parses the compressed header in `data`, applying its probability updates to `fc`.
pub fn parse(data: &[u8], hdr: &Header, fc: &mut FrameContext) -> Result<CompressedHeader, DecodeError> {
    let mut r = BoolDecoder::new(data)
        .map_err(|e| DecodeError::CorruptFrame(format!("compressed header: {}", e)))?;
    let mut ch = CompressedHeader::default();

    ch.tx_mode = if hdr.lossless {
        TxMode::Only4x4
    } else {
        read_tx_mode(&mut r)
    };

    if ch.tx_mode == TxMode::Select {
        read_tx_mode_probs(&mut r, fc);
    }

    read_coef_probs(&mut r, fc, ch.tx_mode);

    fc.skip.iter_mut().for_each(|p| r.diff_update_prob(p));

    if !hdr.frame_is_intra() {
        for probs in fc.inter_mode.iter_mut() {
            probs.iter_mut().for_each(|p| r.diff_update_prob(p));
        }

        if hdr.interpolation_filter == InterpolationFilter::Switchable {
            for probs in fc.interp_filter.iter_mut() {
                probs.iter_mut().for_each(|p| r.diff_update_prob(p));
            }
        }

        fc.is_inter.iter_mut().for_each(|p| r.diff_update_prob(p));

        ch.reference_mode = read_reference_mode(&mut r, hdr);
        if ch.reference_mode != ReferenceMode::Single {
            setup_compound_reference_mode(hdr, &mut ch);
        }
        read_reference_mode_probs(&mut r, fc, ch.reference_mode);

        for probs in fc.y_mode.iter_mut() {
            probs.iter_mut().for_each(|p| r.diff_update_prob(p));
        }

        for probs in fc.partition.iter_mut() {
            probs.iter_mut().for_each(|p| r.diff_update_prob(p));
        }

        read_mv_probs(&mut r, fc, hdr.allow_high_precision_mv);
    }

    if r.has_error() {
        return Err(DecodeError::CorruptFrame(
            "compressed header is truncated".into(),
        ));
    }

    Ok(ch)
}

impl CompressedHeader {
    /// Largest transform of the frame.
    pub fn max_tx_size(&self) -> TxSize {
        self.tx_mode.max_tx_size()
    }
}
