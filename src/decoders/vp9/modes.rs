// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reading of the per-block mode info: segment id, skip flag, transform size, prediction modes,
//! references and motion vectors.

use log::debug;

use crate::decoders::vp9::bool_decoder::BoolDecoder;
use crate::decoders::vp9::compressed_header::CompressedHeader;
use crate::decoders::vp9::compressed_header::ReferenceMode;
use crate::decoders::vp9::entropy::FrameContext;
use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::entropy::MvComponentCounts;
use crate::decoders::vp9::entropy::MvComponentProbs;
use crate::decoders::vp9::entropy::CLASS0_SIZE;
use crate::decoders::vp9::entropy::MV_CLASSES;
use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::frame::MvBuffer;
use crate::decoders::vp9::mvref;
use crate::decoders::vp9::mvref::CandidateSearch;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::InterpolationFilter;
use crate::decoders::vp9::parser::ReferenceFrameType;
use crate::decoders::vp9::parser::SEG_LVL_REF_FRAME;
use crate::decoders::vp9::parser::SEG_LVL_SKIP;
use crate::decoders::vp9::probs::*;
use crate::decoders::vp9::types::BlockEdges;
use crate::decoders::vp9::types::BlockSize;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::Mv;
use crate::decoders::vp9::types::PredictionMode;
use crate::decoders::vp9::types::TxMode;
use crate::decoders::vp9::types::TxSize;
use crate::decoders::DecodeError;

/// Motion vector components must stay strictly within this bound.
const MV_LIMIT: i32 = 1 << 14;

/// Interpolation filter context value standing for "no inter neighbor".
const NO_FILTER_CONTEXT: usize = 3;

/// Location of a block in the mode-info grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockPos {
    pub mi_row: usize,
    pub mi_col: usize,
    pub bsize: BlockSize,
}

/// The above and left neighbors of a block, when inside the frame and the tile column.
#[derive(Copy, Clone, Default)]
pub struct Neighbors<'a> {
    pub above: Option<&'a ModeInfo>,
    pub left: Option<&'a ModeInfo>,
}

impl<'a> Neighbors<'a> {
    pub fn new(grid: &'a ColumnsMut<ModeInfo>, mi_row: usize, mi_col: usize) -> Self {
        Self {
            above: (mi_row > 0).then(|| grid.get(mi_col, mi_row - 1)),
            left: (mi_col > grid.x_start()).then(|| grid.get(mi_col - 1, mi_row)),
        }
    }

    fn skip_ctx(&self) -> usize {
        let skip = |m: Option<&ModeInfo>| m.map_or(0, |m| m.skip as usize);
        skip(self.above) + skip(self.left)
    }

    fn is_inter_ctx(&self) -> usize {
        match (self.above, self.left) {
            (Some(a), Some(l)) => {
                let (ai, li) = (!a.is_inter(), !l.is_inter());
                if ai && li {
                    3
                } else {
                    (ai || li) as usize
                }
            }
            (Some(e), None) | (None, Some(e)) => 2 * !e.is_inter() as usize,
            (None, None) => 0,
        }
    }

    fn tx_size_ctx(&self, max_tx: TxSize) -> usize {
        let size = |m: Option<&ModeInfo>| {
            m.filter(|m| !m.skip)
                .map_or(max_tx as usize, |m| m.tx_size as usize)
        };
        let mut above = size(self.above);
        let mut left = size(self.left);
        if self.left.is_none() {
            left = above;
        }
        if self.above.is_none() {
            above = left;
        }

        (above + left > max_tx as usize) as usize
    }

    fn interp_filter_ctx(&self) -> usize {
        let filter = |m: Option<&ModeInfo>| {
            m.filter(|m| m.is_inter())
                .map_or(NO_FILTER_CONTEXT, |m| m.interp_filter as usize)
        };
        let left = filter(self.left);
        let above = filter(self.above);

        if left == above {
            left
        } else if left == NO_FILTER_CONTEXT {
            above
        } else if above == NO_FILTER_CONTEXT {
            left
        } else {
            NO_FILTER_CONTEXT
        }
    }

    /// Context of the single or compound choice.
    fn comp_mode_ctx(&self, fixed: ReferenceFrameType) -> usize {
        match (self.above, self.left) {
            (Some(a), Some(l)) => match (a.is_compound(), l.is_compound()) {
                (false, false) => {
                    ((a.ref_frame[0] == fixed) ^ (l.ref_frame[0] == fixed)) as usize
                }
                (false, true) => 2 + (a.ref_frame[0] == fixed || !a.is_inter()) as usize,
                (true, false) => 2 + (l.ref_frame[0] == fixed || !l.is_inter()) as usize,
                (true, true) => 4,
            },
            (Some(e), None) | (None, Some(e)) => {
                if e.is_compound() {
                    3
                } else {
                    (e.ref_frame[0] == fixed) as usize
                }
            }
            (None, None) => 1,
        }
    }

    /// Context of the variable reference of a compound prediction.
    fn comp_ref_ctx(&self, ch: &CompressedHeader, var_idx: usize) -> usize {
        let var1 = ch.comp_var_ref[1];
        let var_ref = |m: &ModeInfo| {
            if m.is_compound() {
                m.ref_frame[var_idx]
            } else {
                m.ref_frame[0]
            }
        };

        match (self.above, self.left) {
            (Some(a), Some(l)) => match (a.is_inter(), l.is_inter()) {
                (false, false) => 2,
                (true, false) | (false, true) => {
                    let e = if a.is_inter() { a } else { l };
                    1 + 2 * (var_ref(e) != var1) as usize
                }
                (true, true) => {
                    let a_sg = !a.is_compound();
                    let l_sg = !l.is_compound();
                    let vrfa = var_ref(a);
                    let vrfl = var_ref(l);

                    if vrfa == vrfl && var1 == vrfa {
                        0
                    } else if l_sg && a_sg {
                        if (vrfa == ch.comp_fixed_ref && vrfl == ch.comp_var_ref[0])
                            || (vrfl == ch.comp_fixed_ref && vrfa == ch.comp_var_ref[0])
                        {
                            4
                        } else if vrfa == vrfl {
                            3
                        } else {
                            1
                        }
                    } else if l_sg || a_sg {
                        let vrfc = if l_sg { vrfa } else { vrfl };
                        let rfs = if a_sg { vrfa } else { vrfl };
                        if vrfc == var1 && rfs != var1 {
                            1
                        } else if rfs == var1 && vrfc != var1 {
                            2
                        } else {
                            4
                        }
                    } else if vrfa == vrfl {
                        4
                    } else {
                        2
                    }
                }
            },
            (Some(e), None) | (None, Some(e)) => {
                if !e.is_inter() {
                    2
                } else if e.is_compound() {
                    4 * (e.ref_frame[var_idx] != var1) as usize
                } else {
                    3 * (e.ref_frame[0] != var1) as usize
                }
            }
            (None, None) => 2,
        }
    }

    /// Context of the LAST versus GOLDEN/ALTREF choice.
    fn single_ref_p1_ctx(&self) -> usize {
        use ReferenceFrameType::Last;

        let has_last = |m: &ModeInfo| m.ref_frame[0] == Last || m.ref_frame[1] == Last;
        let edge = |e: &ModeInfo| {
            if e.is_compound() {
                1 + has_last(e) as usize
            } else {
                4 * (e.ref_frame[0] == Last) as usize
            }
        };

        match (self.above, self.left) {
            (Some(a), Some(l)) => match (a.is_inter(), l.is_inter()) {
                (false, false) => 2,
                (true, false) => edge(a),
                (false, true) => edge(l),
                (true, true) => match (a.is_compound(), l.is_compound()) {
                    (true, true) => 1 + (has_last(a) || has_last(l)) as usize,
                    (false, false) => {
                        2 * (a.ref_frame[0] == Last) as usize + 2 * (l.ref_frame[0] == Last) as usize
                    }
                    (a_comp, _) => {
                        let (single, comp) = if a_comp { (l, a) } else { (a, l) };
                        if single.ref_frame[0] == Last {
                            3 + has_last(comp) as usize
                        } else {
                            has_last(comp) as usize
                        }
                    }
                },
            },
            (Some(e), None) | (None, Some(e)) => {
                if e.is_inter() {
                    edge(e)
                } else {
                    2
                }
            }
            (None, None) => 2,
        }
    }

    /// Context of the GOLDEN versus ALTREF choice.
    fn single_ref_p2_ctx(&self) -> usize {
        use ReferenceFrameType::AltRef;
        use ReferenceFrameType::Golden;
        use ReferenceFrameType::Last;

        let has_golden = |m: &ModeInfo| m.ref_frame[0] == Golden || m.ref_frame[1] == Golden;

        match (self.above, self.left) {
            (Some(a), Some(l)) => match (a.is_inter(), l.is_inter()) {
                (false, false) => 2,
                (true, false) | (false, true) => {
                    let e = if a.is_inter() { a } else { l };
                    if e.is_compound() {
                        1 + 2 * has_golden(e) as usize
                    } else if e.ref_frame[0] == Last {
                        3
                    } else {
                        4 * (e.ref_frame[0] == Golden) as usize
                    }
                }
                (true, true) => match (a.is_compound(), l.is_compound()) {
                    (true, true) => {
                        if a.ref_frame == l.ref_frame {
                            3 * (has_golden(a) || has_golden(l)) as usize
                        } else {
                            2
                        }
                    }
                    (false, false) => {
                        let (a0, l0) = (a.ref_frame[0], l.ref_frame[0]);
                        if a0 == Last && l0 == Last {
                            3
                        } else if a0 == Last || l0 == Last {
                            let e0 = if a0 == Last { l0 } else { a0 };
                            4 * (e0 == Golden) as usize
                        } else {
                            2 * (a0 == Golden) as usize + 2 * (l0 == Golden) as usize
                        }
                    }
                    (a_comp, _) => {
                        let (single, comp) = if a_comp { (l, a) } else { (a, l) };
                        let rfs = single.ref_frame[0];
                        if rfs == Golden {
                            3 + has_golden(comp) as usize
                        } else if rfs == AltRef {
                            has_golden(comp) as usize
                        } else {
                            1 + 2 * has_golden(comp) as usize
                        }
                    }
                },
            },
            (Some(e), None) | (None, Some(e)) => {
                if !e.is_inter() || (e.ref_frame[0] == Last && !e.is_compound()) {
                    2
                } else if e.is_compound() {
                    3 * has_golden(e) as usize
                } else {
                    4 * (e.ref_frame[0] == Golden) as usize
                }
            }
            (None, None) => 2,
        }
    }

    /// Luma mode of the 4x4 sub-block above sub-block `b` of the current block.
    fn above_mode(&self, cur: &ModeInfo, b: usize) -> PredictionMode {
        if b >= 2 {
            return cur.sub_modes[b - 2];
        }
        match self.above {
            Some(m) if !m.is_inter() => m.sub_modes[b + 2],
            _ => PredictionMode::Dc,
        }
    }

    /// Luma mode of the 4x4 sub-block left of sub-block `b` of the current block.
    fn left_mode(&self, cur: &ModeInfo, b: usize) -> PredictionMode {
        if b & 1 == 1 {
            return cur.sub_modes[b - 1];
        }
        match self.left {
            Some(m) if !m.is_inter() => m.sub_modes[b + 1],
            _ => PredictionMode::Dc,
        }
    }
}

/// Lowest segment id of the area covered by a block in `map`.
pub fn predicted_segment_id(
    map: &[u8],
    mi_cols: usize,
    mi_row: usize,
    mi_col: usize,
    (x_mis, y_mis): (usize, usize),
) -> u8 {
    (mi_row..mi_row + y_mis)
        .flat_map(|row| &map[row * mi_cols + mi_col..row * mi_cols + mi_col + x_mis])
        .copied()
        .min()
        .unwrap_or(0)
}

fn mv_class(z: u32) -> usize {
    if z >= (CLASS0_SIZE as u32) << 12 {
        MV_CLASSES - 1
    } else {
        let x = z >> 3;
        if x == 0 {
            0
        } else {
            (31 - x.leading_zeros()) as usize
        }
    }
}

fn mv_class_base(class: usize) -> u32 {
    if class == 0 {
        0
    } else {
        (CLASS0_SIZE as u32) << (class + 2)
    }
}

/// Records a nonzero motion vector difference component.
fn count_mv_component(counts: &mut MvComponentCounts, v: i32) {
    counts.sign[(v < 0) as usize] += 1;

    let z = v.unsigned_abs() - 1;
    let class = mv_class(z);
    counts.classes[class] += 1;

    let offset = z - mv_class_base(class);
    let d = (offset >> 3) as usize;
    let fr = ((offset >> 1) & 3) as usize;
    let hp = (offset & 1) as usize;

    if class == 0 {
        counts.class0[d] += 1;
        counts.class0_fr[d][fr] += 1;
        counts.class0_hp[hp] += 1;
    } else {
        for i in 0..class {
            counts.bits[i][(d >> i) & 1] += 1;
        }
        counts.fr[fr] += 1;
        counts.hp[hp] += 1;
    }
}

fn read_mv_component(bd: &mut BoolDecoder, probs: &MvComponentProbs, use_hp: bool) -> i32 {
    let sign = bd.read_bool(probs.sign);
    let class = bd.read_tree(&MV_CLASS_TREE, &probs.classes) as usize;

    let (d, base) = if class == 0 {
        (bd.read_bool(probs.class0[0]) as u32, 0)
    } else {
        let mut d = 0;
        for i in 0..class {
            d |= (bd.read_bool(probs.bits[i]) as u32) << i;
        }
        (d, mv_class_base(class))
    };

    let fr_probs = if class == 0 {
        &probs.class0_fr[d as usize]
    } else {
        &probs.fr
    };
    let fr = bd.read_tree(&MV_FR_TREE, fr_probs) as u32;

    let hp = if use_hp {
        bd.read_bool(if class == 0 {
            probs.class0_hp
        } else {
            probs.hp
        }) as u32
    } else {
        1
    };

    let mag = (base + ((d << 3) | (fr << 1) | hp) + 1) as i32;
    if sign {
        -mag
    } else {
        mag
    }
}

/// Frame-wide state needed to read the mode info of the blocks of a tile.
pub struct ModeReader<'a> {
    pub hdr: &'a Header,
    pub ch: &'a CompressedHeader,
    pub fc: &'a FrameContext,
    /// Segmentation map of the previous frame, one entry per mode-info unit.
    pub prev_segment_ids: Option<&'a [u8]>,
    /// Motion vectors of the previous frame, when usable for prediction.
    pub prev_mvs: Option<&'a MvBuffer>,
    /// Whether LAST, GOLDEN and ALTREF have a size this frame can predict from.
    pub ref_valid: [bool; 3],
}

impl<'a> ModeReader<'a> {
    fn mi_cols(&self) -> usize {
        self.hdr.mi_cols()
    }

    fn mi_rows(&self) -> usize {
        self.hdr.mi_rows()
    }

    /// Visible extent of the block in mode-info units.
    fn extent(&self, pos: &BlockPos) -> (usize, usize) {
        (
            pos.bsize.width_mi().min(self.mi_cols() - pos.mi_col),
            pos.bsize.height_mi().min(self.mi_rows() - pos.mi_row),
        )
    }

    fn write_segment_id(&self, map: &mut ColumnsMut<u8>, pos: &BlockPos, segment_id: u8) {
        let (x_mis, y_mis) = self.extent(pos);
        for row in pos.mi_row..pos.mi_row + y_mis {
            map.row_from_mut(pos.mi_col, row)[..x_mis].fill(segment_id);
        }
    }

    fn copy_segment_ids(&self, map: &mut ColumnsMut<u8>, pos: &BlockPos) {
        let (x_mis, y_mis) = self.extent(pos);
        let mi_cols = self.mi_cols();
        for row in pos.mi_row..pos.mi_row + y_mis {
            let dst = &mut map.row_from_mut(pos.mi_col, row)[..x_mis];
            match self.prev_segment_ids {
                Some(prev) => {
                    let start = row * mi_cols + pos.mi_col;
                    dst.copy_from_slice(&prev[start..start + x_mis]);
                }
                None => dst.fill(0),
            }
        }
    }

    fn read_segment_id(&self, bd: &mut BoolDecoder) -> u8 {
        bd.read_tree(&SEGMENT_TREE, &self.hdr.seg.tree_probs)
    }

    fn read_intra_segment_id(
        &self,
        bd: &mut BoolDecoder,
        map: &mut ColumnsMut<u8>,
        pos: &BlockPos,
    ) -> u8 {
        let seg = &self.hdr.seg;
        if !seg.enabled {
            return 0;
        }

        if !seg.update_map {
            self.copy_segment_ids(map, pos);
            return 0;
        }

        let segment_id = self.read_segment_id(bd);
        self.write_segment_id(map, pos, segment_id);
        segment_id
    }

    fn read_inter_segment_id(
        &self,
        bd: &mut BoolDecoder,
        nb: &Neighbors,
        map: &mut ColumnsMut<u8>,
        pos: &BlockPos,
        mi: &mut ModeInfo,
    ) -> u8 {
        let seg = &self.hdr.seg;
        if !seg.enabled {
            return 0;
        }

        let predicted = self.prev_segment_ids.map_or(0, |prev| {
            predicted_segment_id(prev, self.mi_cols(), pos.mi_row, pos.mi_col, self.extent(pos))
        });

        if !seg.update_map {
            self.copy_segment_ids(map, pos);
            return predicted;
        }

        let segment_id = if seg.temporal_update {
            let predicted_flag =
                |m: Option<&ModeInfo>| m.map_or(0, |m| m.seg_id_predicted as usize);
            let ctx = predicted_flag(nb.above) + predicted_flag(nb.left);
            mi.seg_id_predicted = bd.read_bool(seg.pred_probs[ctx]);
            if mi.seg_id_predicted {
                predicted
            } else {
                self.read_segment_id(bd)
            }
        } else {
            self.read_segment_id(bd)
        };

        self.write_segment_id(map, pos, segment_id);
        segment_id
    }

    fn read_skip(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
        segment_id: u8,
    ) -> bool {
        if self.hdr.seg.feature_active(segment_id, SEG_LVL_SKIP) {
            return true;
        }

        let ctx = nb.skip_ctx();
        let skip = bd.read_bool(self.fc.skip[ctx]);
        counts.skip[ctx][skip as usize] += 1;
        skip
    }

    fn read_tx_size(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
        bsize: BlockSize,
        allow_select: bool,
    ) -> TxSize {
        let max_tx = bsize.max_tx_size();
        let tx_mode = self.ch.tx_mode;

        if !(allow_select && tx_mode == TxMode::Select && bsize >= BlockSize::Block8x8) {
            return max_tx.min(tx_mode.max_tx_size());
        }

        let ctx = nb.tx_size_ctx(max_tx);
        let probs = self.fc.tx_probs(max_tx, ctx);
        let mut tx_size = bd.read_bool(probs[0]) as usize;
        if tx_size != 0 && max_tx >= TxSize::Tx16x16 {
            tx_size += bd.read_bool(probs[1]) as usize;
            if tx_size != 1 && max_tx >= TxSize::Tx32x32 {
                tx_size += bd.read_bool(probs[2]) as usize;
            }
        }
        counts.tx_counts(max_tx, ctx)[tx_size] += 1;

        TxSize::from_log2(tx_size)
    }

    fn read_intra_mode(bd: &mut BoolDecoder, probs: &[u8]) -> PredictionMode {
        PredictionMode::n(bd.read_tree(&INTRA_MODE_TREE, probs)).unwrap_or_default()
    }

    /// Reads the luma modes of a block, calling `read` with the 4x4 sub-block index of each
    /// coded mode.
    fn read_luma_modes(
        mi: &mut ModeInfo,
        mut read: impl FnMut(&ModeInfo, usize) -> PredictionMode,
    ) {
        match mi.sb_type {
            BlockSize::Block4x4 => {
                for b in 0..4 {
                    mi.sub_modes[b] = read(mi, b);
                }
            }
            BlockSize::Block4x8 => {
                for b in 0..2 {
                    let mode = read(mi, b);
                    mi.sub_modes[b] = mode;
                    mi.sub_modes[b + 2] = mode;
                }
            }
            BlockSize::Block8x4 => {
                for b in [0, 2] {
                    let mode = read(mi, b);
                    mi.sub_modes[b] = mode;
                    mi.sub_modes[b + 1] = mode;
                }
            }
            _ => {
                let mode = read(mi, 0);
                mi.sub_modes = [mode; 4];
            }
        }
        mi.mode = mi.sub_modes[3];
    }

    fn read_intra_frame_mode_info(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
        map: &mut ColumnsMut<u8>,
        pos: &BlockPos,
        mi: &mut ModeInfo,
    ) {
        mi.segment_id = self.read_intra_segment_id(bd, map, pos);
        mi.skip = self.read_skip(bd, counts, nb, mi.segment_id);
        mi.tx_size = self.read_tx_size(bd, counts, nb, pos.bsize, true);
        mi.ref_frame = [ReferenceFrameType::Intra, ReferenceFrameType::None];

        Self::read_luma_modes(mi, |cur, b| {
            let above = nb.above_mode(cur, b);
            let left = nb.left_mode(cur, b);
            Self::read_intra_mode(bd, &KF_Y_MODE_PROBS[above as usize][left as usize])
        });
        mi.uv_mode = Self::read_intra_mode(bd, &KF_UV_MODE_PROBS[mi.mode as usize]);
    }

    fn read_intra_block_mode_info(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        mi: &mut ModeInfo,
    ) {
        let fc = self.fc;
        let group = if mi.sb_type.is_sub8x8() {
            0
        } else {
            mi.sb_type.size_group()
        };

        Self::read_luma_modes(mi, |_, _| {
            let mode = Self::read_intra_mode(bd, &fc.y_mode[group]);
            counts.y_mode[group][mode as usize] += 1;
            mode
        });

        mi.uv_mode = Self::read_intra_mode(bd, &fc.uv_mode[mi.mode as usize]);
        counts.uv_mode[mi.mode as usize][mi.uv_mode as usize] += 1;
        mi.ref_frame = [ReferenceFrameType::Intra, ReferenceFrameType::None];
    }

    fn read_is_inter(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
        segment_id: u8,
    ) -> bool {
        let seg = &self.hdr.seg;
        if seg.feature_active(segment_id, SEG_LVL_REF_FRAME) {
            return seg.feature_data[segment_id as usize][SEG_LVL_REF_FRAME] != 0;
        }

        let ctx = nb.is_inter_ctx();
        let is_inter = bd.read_bool(self.fc.is_inter[ctx]);
        counts.is_inter[ctx][is_inter as usize] += 1;
        is_inter
    }

    fn read_ref_frames(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
        segment_id: u8,
    ) -> Result<[ReferenceFrameType; 2], DecodeError> {
        use ReferenceFrameType::*;

        let seg = &self.hdr.seg;
        if seg.feature_active(segment_id, SEG_LVL_REF_FRAME) {
            let data = seg.feature_data[segment_id as usize][SEG_LVL_REF_FRAME];
            let ref_frame = ReferenceFrameType::n(data as i8).ok_or_else(|| {
                DecodeError::UnsupBitstream(format!("invalid segment reference {}", data))
            })?;
            return Ok([ref_frame, None]);
        }

        let ch = self.ch;
        let compound = match ch.reference_mode {
            ReferenceMode::Single => false,
            ReferenceMode::Compound => true,
            ReferenceMode::Select => {
                let ctx = nb.comp_mode_ctx(ch.comp_fixed_ref);
                let bit = bd.read_bool(self.fc.comp_mode[ctx]);
                counts.comp_mode[ctx][bit as usize] += 1;
                bit
            }
        };

        if compound {
            let fixed_idx = (self.hdr.ref_frame_sign_bias[ch.comp_fixed_ref.index()] != 0) as usize;
            let ctx = nb.comp_ref_ctx(ch, 1 - fixed_idx);
            let bit = bd.read_bool(self.fc.comp_ref[ctx]);
            counts.comp_ref[ctx][bit as usize] += 1;

            let mut refs = [None; 2];
            refs[fixed_idx] = ch.comp_fixed_ref;
            refs[1 - fixed_idx] = ch.comp_var_ref[bit as usize];
            return Ok(refs);
        }

        let ctx = nb.single_ref_p1_ctx();
        let bit = bd.read_bool(self.fc.single_ref[ctx][0]);
        counts.single_ref[ctx][0][bit as usize] += 1;
        if !bit {
            return Ok([Last, None]);
        }

        let ctx = nb.single_ref_p2_ctx();
        let bit = bd.read_bool(self.fc.single_ref[ctx][1]);
        counts.single_ref[ctx][1][bit as usize] += 1;
        Ok([if bit { AltRef } else { Golden }, None])
    }

    fn read_inter_mode(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        ctx: usize,
    ) -> PredictionMode {
        let offset = bd.read_tree(&INTER_MODE_TREE, &self.fc.inter_mode[ctx]) as usize;
        counts.inter_mode[ctx][offset] += 1;
        PredictionMode::n(PredictionMode::NearestMv as u8 + offset as u8)
            .unwrap_or(PredictionMode::ZeroMv)
    }

    fn read_interp_filter(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        nb: &Neighbors,
    ) -> InterpolationFilter {
        if self.hdr.interpolation_filter != InterpolationFilter::Switchable {
            return self.hdr.interpolation_filter;
        }

        let ctx = nb.interp_filter_ctx();
        let filter = bd.read_tree(&INTERP_FILTER_TREE, &self.fc.interp_filter[ctx]);
        counts.interp_filter[ctx][filter as usize] += 1;
        InterpolationFilter::n(filter).unwrap_or_default()
    }

    /// Reads a motion vector coded as a difference from `reference`.
    fn read_mv(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        reference: Mv,
    ) -> Result<Mv, DecodeError> {
        let fc = self.fc;
        let joint = bd.read_tree(&MV_JOINT_TREE, &fc.mv_joint) as usize;
        let use_hp = self.hdr.allow_high_precision_mv && mvref::use_mv_hp(reference);

        let row = if joint & 2 != 0 {
            read_mv_component(bd, &fc.mv_comp[0], use_hp)
        } else {
            0
        };
        let col = if joint & 1 != 0 {
            read_mv_component(bd, &fc.mv_comp[1], use_hp)
        } else {
            0
        };

        counts.mv_joint[joint] += 1;
        if row != 0 {
            count_mv_component(&mut counts.mv_comp[0], row);
        }
        if col != 0 {
            count_mv_component(&mut counts.mv_comp[1], col);
        }

        let row = i32::from(reference.row) + row;
        let col = i32::from(reference.col) + col;
        if row.abs() >= MV_LIMIT || col.abs() >= MV_LIMIT {
            return Err(DecodeError::CorruptFrame(format!(
                "motion vector ({}, {}) out of range",
                row, col
            )));
        }

        Ok(Mv::new(row as i16, col as i16))
    }

    /// Motion vectors of a block or sub-block predicted with `mode`.
    #[allow(clippy::too_many_arguments)]
    fn assign_mv(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        mode: PredictionMode,
        num_refs: usize,
        best: &[Mv; 2],
        nearest: &[Mv; 2],
        near: &[Mv; 2],
    ) -> Result<[Mv; 2], DecodeError> {
        let mut mvs = [Mv::default(); 2];

        match mode {
            PredictionMode::NewMv => {
                for i in 0..num_refs {
                    mvs[i] = self.read_mv(bd, counts, best[i])?;
                }
            }
            PredictionMode::NearestMv => mvs[..num_refs].copy_from_slice(&nearest[..num_refs]),
            PredictionMode::NearMv => mvs[..num_refs].copy_from_slice(&near[..num_refs]),
            _ => (),
        }

        Ok(mvs)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_inter_block_mode_info(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        grid: &ColumnsMut<ModeInfo>,
        nb: &Neighbors,
        pos: &BlockPos,
        mi: &mut ModeInfo,
    ) -> Result<(), DecodeError> {
        mi.ref_frame = self.read_ref_frames(bd, counts, nb, mi.segment_id)?;
        let num_refs = 1 + mi.is_compound() as usize;

        let search = CandidateSearch {
            grid,
            prev_mvs: self.prev_mvs,
            sign_bias: self.hdr.ref_frame_sign_bias.map(|b| b != 0),
            mi_rows: self.mi_rows(),
        };
        let edges = BlockEdges::new(
            pos.mi_row,
            pos.mi_col,
            pos.bsize,
            self.mi_rows(),
            self.mi_cols(),
        );

        let mut candidates = [mvref::Candidates::default(); 2];
        for i in 0..num_refs {
            let ref_frame = mi.ref_frame[i];
            if !self.ref_valid[ref_frame.index() - 1] {
                return Err(DecodeError::UnsupBitstream(format!(
                    "reference {:?} has invalid dimensions",
                    ref_frame
                )));
            }
            candidates[i] = search.find(pos.mi_row, pos.mi_col, pos.bsize, ref_frame, None, &edges);
        }
        let mode_ctx = candidates[0].mode_context;

        let sub8x8 = pos.bsize.is_sub8x8();
        let mode = if self.hdr.seg.feature_active(mi.segment_id, SEG_LVL_SKIP) {
            if sub8x8 {
                return Err(DecodeError::UnsupBitstream(
                    "segment skip on a block smaller than 8x8".into(),
                ));
            }
            PredictionMode::ZeroMv
        } else if !sub8x8 {
            self.read_inter_mode(bd, counts, mode_ctx)
        } else {
            PredictionMode::ZeroMv
        };

        let allow_hp = self.hdr.allow_high_precision_mv;
        let mut best = [Mv::default(); 2];
        let mut near = [Mv::default(); 2];
        if sub8x8 || mode != PredictionMode::ZeroMv {
            for i in 0..num_refs {
                let [nearest_mv, near_mv] =
                    mvref::best_ref_mvs(&candidates[i].mvs, allow_hp, &edges);
                best[i] = nearest_mv;
                near[i] = near_mv;
            }
        }

        mi.interp_filter = self.read_interp_filter(bd, counts, nb);

        if !sub8x8 {
            mi.mode = mode;
            mi.sub_modes = [mode; 4];
            mi.mv = self.assign_mv(bd, counts, mode, num_refs, &best, &best, &near)?;
            mi.sub_mvs = [mi.mv; 4];
            return Ok(());
        }

        let step_x = pos.bsize.width4();
        let step_y = pos.bsize.height4();
        let mut b_mode = PredictionMode::ZeroMv;

        for idy in (0..2).step_by(step_y) {
            for idx in (0..2).step_by(step_x) {
                let j = idy * 2 + idx;
                b_mode = self.read_inter_mode(bd, counts, mode_ctx);

                let mut sub_nearest = [Mv::default(); 2];
                let mut sub_near = [Mv::default(); 2];
                if matches!(b_mode, PredictionMode::NearestMv | PredictionMode::NearMv) {
                    for i in 0..num_refs {
                        [sub_nearest[i], sub_near[i]] =
                            search.sub8x8_mvs(mi, pos.mi_row, pos.mi_col, i, j, &edges);
                    }
                }

                let mvs =
                    self.assign_mv(bd, counts, b_mode, num_refs, &best, &sub_nearest, &sub_near)?;

                mi.sub_mvs[j] = mvs;
                mi.sub_modes[j] = b_mode;
                if step_y == 2 {
                    mi.sub_mvs[j + 2] = mvs;
                    mi.sub_modes[j + 2] = b_mode;
                }
                if step_x == 2 {
                    mi.sub_mvs[j + 1] = mvs;
                    mi.sub_modes[j + 1] = b_mode;
                }
            }
        }

        mi.mode = b_mode;
        mi.mv = mi.sub_mvs[3];
        Ok(())
    }

    fn read_inter_frame_mode_info(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        grid: &ColumnsMut<ModeInfo>,
        nb: &Neighbors,
        map: &mut ColumnsMut<u8>,
        pos: &BlockPos,
        mi: &mut ModeInfo,
    ) -> Result<(), DecodeError> {
        mi.segment_id = self.read_inter_segment_id(bd, nb, map, pos, mi);
        mi.skip = self.read_skip(bd, counts, nb, mi.segment_id);
        let is_inter = self.read_is_inter(bd, counts, nb, mi.segment_id);
        mi.tx_size = self.read_tx_size(bd, counts, nb, pos.bsize, !mi.skip || !is_inter);

        if is_inter {
            self.read_inter_block_mode_info(bd, counts, grid, nb, pos, mi)
        } else {
            self.read_intra_block_mode_info(bd, counts, mi);
            Ok(())
        }
    }

    /// Reads the mode info of the block at `pos`. `grid` holds the already decoded blocks of
    /// the tile column and `map` receives the segment ids of the block.
    pub fn read(
        &self,
        bd: &mut BoolDecoder,
        counts: &mut FrameCounts,
        grid: &ColumnsMut<ModeInfo>,
        map: &mut ColumnsMut<u8>,
        pos: &BlockPos,
    ) -> Result<ModeInfo, DecodeError> {
        let nb = Neighbors::new(grid, pos.mi_row, pos.mi_col);
        let mut mi = ModeInfo {
            sb_type: pos.bsize,
            ..Default::default()
        };

        if self.hdr.frame_is_intra() {
            self.read_intra_frame_mode_info(bd, counts, &nb, map, pos, &mut mi);
        } else {
            self.read_inter_frame_mode_info(bd, counts, grid, &nb, map, pos, &mut mi)?;
        }

        if bd.has_error() {
            debug!(
                "mode info at ({}, {}) read past the end of the tile",
                pos.mi_row, pos.mi_col
            );
        }

        Ok(mi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::bool_encoder::BoolEncoder;
    use crate::decoders::vp9::frame::split_columns;
    use crate::decoders::vp9::parser::FrameType;
    use crate::decoders::vp9::parser::SegmentationParams;

    struct Fixture {
        hdr: Header,
        ch: CompressedHeader,
        fc: FrameContext,
        grid: Vec<ModeInfo>,
        seg_map: Vec<u8>,
        prev_seg_map: Option<Vec<u8>>,
    }

    impl Fixture {
        fn new(frame_type: FrameType) -> Self {
            let hdr = Header {
                frame_type,
                width: 64,
                height: 64,
                ..Default::default()
            };
            let mi = hdr.mi_cols() * hdr.mi_rows();

            Self {
                hdr,
                ch: Default::default(),
                fc: Default::default(),
                grid: vec![ModeInfo::default(); mi],
                seg_map: vec![0; mi],
                prev_seg_map: None,
            }
        }

        fn read(
            &mut self,
            data: &[u8],
            pos: BlockPos,
        ) -> (Result<ModeInfo, DecodeError>, FrameCounts) {
            let mi_cols = self.hdr.mi_cols();
            let mi_rows = self.hdr.mi_rows();
            let reader = ModeReader {
                hdr: &self.hdr,
                ch: &self.ch,
                fc: &self.fc,
                prev_segment_ids: self.prev_seg_map.as_deref(),
                prev_mvs: None,
                ref_valid: [true; 3],
            };

            let grid = split_columns(&mut self.grid, mi_cols, mi_rows, &[0, mi_cols]);
            let mut map = split_columns(&mut self.seg_map, mi_cols, mi_rows, &[0, mi_cols]);
            let mut bd = BoolDecoder::new(data).unwrap();
            let mut counts = FrameCounts::default();

            let res = reader.read(&mut bd, &mut counts, &grid[0], &mut map[0], &pos);
            (res, counts)
        }
    }

    fn pos(mi_row: usize, mi_col: usize, bsize: BlockSize) -> BlockPos {
        BlockPos {
            mi_row,
            mi_col,
            bsize,
        }
    }

    #[test]
    fn key_frame_block_with_selected_transform() {
        let mut f = Fixture::new(FrameType::KeyFrame);
        f.ch.tx_mode = TxMode::Select;

        let mut enc = BoolEncoder::new();
        enc.write_bool(false, f.fc.skip[0]);
        // No neighbors: both sides default to the largest transform.
        enc.write_bool(true, f.fc.tx32x32[1][0]);
        enc.write_bool(true, f.fc.tx32x32[1][1]);
        enc.write_bool(false, f.fc.tx32x32[1][2]);
        enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[0][0], PredictionMode::Tm as u8);
        enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[9], PredictionMode::V as u8);
        let data = enc.finish();

        let (mi, counts) = f.read(&data, pos(0, 0, BlockSize::Block64x64));
        let mi = mi.unwrap();

        assert!(!mi.skip);
        assert_eq!(mi.tx_size, TxSize::Tx16x16);
        assert_eq!(mi.mode, PredictionMode::Tm);
        assert_eq!(mi.sub_modes, [PredictionMode::Tm; 4]);
        assert_eq!(mi.uv_mode, PredictionMode::V);
        assert!(!mi.is_inter());
        assert_eq!(counts.skip[0], [1, 0]);
        assert_eq!(counts.tx32x32[1], [0, 0, 1, 0]);
        // Key frame modes are not counted.
        assert_eq!(counts.y_mode, [[0u32; 10]; 4]);
    }

    #[test]
    fn key_frame_sub8x8_modes_use_left_sub_block() {
        let mut f = Fixture::new(FrameType::KeyFrame);
        let above = ModeInfo {
            sb_type: BlockSize::Block8x8,
            mode: PredictionMode::H,
            sub_modes: [PredictionMode::H; 4],
            ..Default::default()
        };
        f.grid[1] = above;

        let mut enc = BoolEncoder::new();
        enc.write_bool(false, f.fc.skip[0]);
        let h = PredictionMode::H as usize;
        enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[h][0], PredictionMode::D45 as u8);
        enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[h][3], PredictionMode::V as u8);
        enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[1], PredictionMode::Dc as u8);
        let data = enc.finish();

        let (mi, _) = f.read(&data, pos(1, 1, BlockSize::Block4x8));
        let mi = mi.unwrap();

        use PredictionMode::*;
        assert_eq!(mi.sub_modes, [D45, V, D45, V]);
        assert_eq!(mi.mode, V);
        assert_eq!(mi.tx_size, TxSize::Tx4x4);
    }

    #[test]
    fn intra_segment_map_copy() {
        let mut f = Fixture::new(FrameType::KeyFrame);
        f.hdr.seg = SegmentationParams {
            enabled: true,
            update_map: false,
            ..Default::default()
        };
        f.prev_seg_map = Some(vec![5; 64]);

        let mut enc = BoolEncoder::new();
        enc.write_bool(false, f.fc.skip[0]);
        enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[0][0], 0);
        enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[0], 0);
        let data = enc.finish();

        let (mi, _) = f.read(&data, pos(2, 2, BlockSize::Block16x16));
        assert_eq!(mi.unwrap().segment_id, 0);
        assert_eq!(f.seg_map[2 * 8 + 2..2 * 8 + 4], [5, 5]);
        assert_eq!(f.seg_map[3 * 8 + 2..3 * 8 + 4], [5, 5]);
        assert_eq!(f.seg_map[2 * 8 + 4], 0);
    }

    #[test]
    fn explicit_segment_id() {
        let mut f = Fixture::new(FrameType::KeyFrame);
        f.hdr.seg = SegmentationParams {
            enabled: true,
            update_map: true,
            tree_probs: [128; 7],
            ..Default::default()
        };

        let mut enc = BoolEncoder::new();
        enc.write_tree(&SEGMENT_TREE, &[128; 7], 6);
        enc.write_bool(true, f.fc.skip[0]);
        enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[0][0], 0);
        enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[0], 0);
        let data = enc.finish();

        // The block sticks out of the bottom right corner of the frame.
        let (mi, _) = f.read(&data, pos(6, 6, BlockSize::Block32x32));
        let mi = mi.unwrap();

        assert_eq!(mi.segment_id, 6);
        assert!(mi.skip);
        assert_eq!(f.seg_map[7 * 8 + 6..], [6, 6]);
        assert_eq!(f.seg_map.iter().filter(|s| **s == 6).count(), 4);
    }

    #[test]
    fn predicted_segment_is_area_minimum() {
        #[rustfmt::skip]
        let map = [
            3, 4, 7,
            5, 2, 1,
        ];

        assert_eq!(predicted_segment_id(&map, 3, 0, 0, (2, 2)), 2);
        assert_eq!(predicted_segment_id(&map, 3, 0, 1, (2, 1)), 4);
        assert_eq!(predicted_segment_id(&map, 3, 0, 0, (3, 2)), 1);
    }

    #[test]
    fn inter_block_with_new_motion_vector() {
        let mut f = Fixture::new(FrameType::InterFrame);

        let mut enc = BoolEncoder::new();
        enc.write_bool(false, f.fc.skip[0]);
        enc.write_bool(true, f.fc.is_inter[0]);
        // LAST
        enc.write_bool(false, f.fc.single_ref[2][0]);
        // No candidates give inter mode context 2.
        enc.write_tree(&INTER_MODE_TREE, &f.fc.inter_mode[2], 3);
        // Row only: 1 integer pel, 2 quarter pels and the implicit 1/8th.
        enc.write_tree(&MV_JOINT_TREE, &f.fc.mv_joint, 2);
        let comp = &f.fc.mv_comp[0];
        enc.write_bool(false, comp.sign);
        enc.write_tree(&MV_CLASS_TREE, &comp.classes, 0);
        enc.write_bool(true, comp.class0[0]);
        enc.write_tree(&MV_FR_TREE, &comp.class0_fr[1], 2);
        let data = enc.finish();

        let (mi, counts) = f.read(&data, pos(0, 0, BlockSize::Block8x8));
        let mi = mi.unwrap();

        assert_eq!(mi.ref_frame, [ReferenceFrameType::Last, ReferenceFrameType::None]);
        assert_eq!(mi.mode, PredictionMode::NewMv);
        assert_eq!(mi.mv[0], Mv::new(14, 0));
        assert_eq!(mi.interp_filter, InterpolationFilter::EightTap);

        assert_eq!(counts.is_inter[0], [0, 1]);
        assert_eq!(counts.single_ref[2][0], [1, 0]);
        assert_eq!(counts.inter_mode[2], [0, 0, 0, 1]);
        assert_eq!(counts.mv_joint, [0, 0, 1, 0]);
        let comp = &counts.mv_comp[0];
        assert_eq!(comp.sign, [1, 0]);
        assert_eq!(comp.classes[0], 1);
        assert_eq!(comp.class0, [0, 1]);
        assert_eq!(comp.class0_fr[1], [0, 0, 1, 0]);
        assert_eq!(comp.class0_hp, [0, 1]);
        assert_eq!(counts.mv_comp[1], Default::default());
    }

    #[test]
    fn out_of_range_motion_vector() {
        let mut f = Fixture::new(FrameType::InterFrame);

        let mut enc = BoolEncoder::new();
        enc.write_bool(false, f.fc.skip[0]);
        enc.write_bool(true, f.fc.is_inter[0]);
        enc.write_bool(false, f.fc.single_ref[2][0]);
        enc.write_tree(&INTER_MODE_TREE, &f.fc.inter_mode[2], 3);
        enc.write_tree(&MV_JOINT_TREE, &f.fc.mv_joint, 2);
        let comp = f.fc.mv_comp[0].clone();
        enc.write_bool(false, comp.sign);
        enc.write_tree(&MV_CLASS_TREE, &comp.classes, 10);
        for p in comp.bits {
            enc.write_bool(true, p);
        }
        enc.write_tree(&MV_FR_TREE, &comp.fr, 3);
        let data = enc.finish();

        let (mi, _) = f.read(&data, pos(0, 0, BlockSize::Block8x8));
        assert!(matches!(mi, Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn segment_skip_on_small_block() {
        let mut f = Fixture::new(FrameType::InterFrame);
        f.hdr.seg.enabled = true;
        f.hdr.seg.feature_enabled[0][SEG_LVL_SKIP] = true;

        let mut enc = BoolEncoder::new();
        enc.write_bool(true, f.fc.is_inter[0]);
        enc.write_bool(false, f.fc.single_ref[2][0]);
        let data = enc.finish();

        let (mi, _) = f.read(&data, pos(0, 0, BlockSize::Block4x4));
        assert!(matches!(mi, Err(DecodeError::UnsupBitstream(_))));
    }

    #[test]
    fn segment_reference_and_skip() {
        let mut f = Fixture::new(FrameType::InterFrame);
        f.hdr.seg.enabled = true;
        f.hdr.seg.feature_enabled[0][SEG_LVL_SKIP] = true;
        f.hdr.seg.feature_enabled[0][SEG_LVL_REF_FRAME] = true;
        f.hdr.seg.feature_data[0][SEG_LVL_REF_FRAME] = 2;

        // Nothing but the interpolation filter is coded.
        let data = BoolEncoder::new().finish();

        let (mi, counts) = f.read(&data, pos(0, 0, BlockSize::Block16x16));
        let mi = mi.unwrap();

        assert!(mi.skip);
        assert_eq!(mi.ref_frame[0], ReferenceFrameType::Golden);
        assert_eq!(mi.mode, PredictionMode::ZeroMv);
        assert!(mi.mv[0].is_zero());
        assert_eq!(counts, FrameCounts::default());
    }

    fn inter(refs: [ReferenceFrameType; 2]) -> ModeInfo {
        ModeInfo {
            ref_frame: refs,
            mode: PredictionMode::ZeroMv,
            ..Default::default()
        }
    }

    #[test]
    fn reference_contexts() {
        use ReferenceFrameType::AltRef;
        use ReferenceFrameType::Golden;
        use ReferenceFrameType::Last;

        let intra = ModeInfo::default();
        let last = inter([Last, ReferenceFrameType::None]);
        let golden = inter([Golden, ReferenceFrameType::None]);
        let altref = inter([AltRef, ReferenceFrameType::None]);
        let comp = inter([Last, AltRef]);

        let nb = |above, left| Neighbors { above, left };

        assert_eq!(nb(Some(&last), Some(&intra)).single_ref_p1_ctx(), 4);
        assert_eq!(nb(Some(&golden), Some(&altref)).single_ref_p1_ctx(), 0);
        assert_eq!(nb(Some(&comp), Some(&last)).single_ref_p1_ctx(), 4);
        assert_eq!(nb(None, None).single_ref_p1_ctx(), 2);

        assert_eq!(nb(Some(&golden), Some(&altref)).single_ref_p2_ctx(), 2);
        assert_eq!(nb(Some(&last), Some(&golden)).single_ref_p2_ctx(), 4);
        assert_eq!(nb(Some(&last), None).single_ref_p2_ctx(), 2);
        assert_eq!(nb(None, Some(&golden)).single_ref_p2_ctx(), 4);

        assert_eq!(nb(Some(&last), Some(&golden)).comp_mode_ctx(AltRef), 0);
        assert_eq!(nb(Some(&altref), Some(&golden)).comp_mode_ctx(AltRef), 1);
        assert_eq!(nb(Some(&comp), Some(&intra)).comp_mode_ctx(AltRef), 3);
        assert_eq!(nb(Some(&comp), Some(&comp)).comp_mode_ctx(AltRef), 4);

        let ch = CompressedHeader {
            comp_fixed_ref: AltRef,
            comp_var_ref: [Last, Golden],
            ..Default::default()
        };
        assert_eq!(nb(Some(&golden), Some(&golden)).comp_ref_ctx(&ch, 0), 0);
        assert_eq!(nb(Some(&last), None).comp_ref_ctx(&ch, 0), 3);
        assert_eq!(nb(Some(&intra), Some(&intra)).comp_ref_ctx(&ch, 0), 2);
    }

    #[test]
    fn block_contexts() {
        let intra = ModeInfo {
            tx_size: TxSize::Tx8x8,
            ..Default::default()
        };
        let skipped = ModeInfo {
            skip: true,
            ref_frame: [ReferenceFrameType::Last, ReferenceFrameType::None],
            interp_filter: InterpolationFilter::EightTapSharp,
            ..Default::default()
        };
        let nb = |above, left| Neighbors { above, left };

        assert_eq!(nb(Some(&intra), Some(&intra)).is_inter_ctx(), 3);
        assert_eq!(nb(Some(&intra), Some(&skipped)).is_inter_ctx(), 1);
        assert_eq!(nb(None, Some(&intra)).is_inter_ctx(), 2);

        assert_eq!(nb(Some(&skipped), Some(&skipped)).skip_ctx(), 2);

        // A skipped neighbor counts as the largest transform.
        assert_eq!(nb(Some(&intra), Some(&skipped)).tx_size_ctx(TxSize::Tx16x16), 1);
        assert_eq!(nb(Some(&intra), None).tx_size_ctx(TxSize::Tx16x16), 0);
        assert_eq!(nb(None, None).tx_size_ctx(TxSize::Tx8x8), 1);

        assert_eq!(nb(Some(&intra), Some(&skipped)).interp_filter_ctx(), 2);
        assert_eq!(nb(None, None).interp_filter_ctx(), NO_FILTER_CONTEXT);
    }

    #[test]
    fn motion_vector_counts() {
        let mut counts = MvComponentCounts::default();
        // Magnitude 100: class 3, integer offset 4.
        count_mv_component(&mut counts, -100);

        assert_eq!(counts.sign, [0, 1]);
        assert_eq!(counts.classes[3], 1);
        assert_eq!(counts.bits[0], [1, 0]);
        assert_eq!(counts.bits[1], [1, 0]);
        assert_eq!(counts.bits[2], [0, 1]);
        assert_eq!(counts.fr, [0, 1, 0, 0]);
        assert_eq!(counts.hp, [0, 1]);
    }
}
