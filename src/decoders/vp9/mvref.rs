// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Motion vector candidate lists built from spatial and temporal neighbors.

use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::frame::MvBuffer;
use crate::decoders::vp9::parser::ReferenceFrameType;
use crate::decoders::vp9::types::BlockEdges;
use crate::decoders::vp9::types::BlockSize;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::Mv;

const MVREF_NEIGHBOURS: usize = 8;

/// How far candidates may point outside the frame, in 1/8th pel.
const MV_BORDER: i32 = 16 << 3;
/// How far best candidates may point outside the frame, in 1/8th pel.
const BEST_MV_MARGIN: i32 = (160 - 4) << 3;

/// Above this magnitude (in full pels) the 1/8th pel bit of vectors is not coded.
const COMPANDED_MVREF_THRESH: i32 = 8;

/// Neighbor positions searched for each block size, as (row, column) offsets in mode-info
/// units. The first two are the closest above and left neighbors.
const MV_REF_BLOCKS: [[(i8, i8); MVREF_NEIGHBOURS]; 13] = [
    // 4x4
    [(-1, 0), (0, -1), (-1, -1), (-2, 0), (0, -2), (-2, -1), (-1, -2), (-2, -2)],
    // 4x8
    [(-1, 0), (0, -1), (-1, -1), (-2, 0), (0, -2), (-2, -1), (-1, -2), (-2, -2)],
    // 8x4
    [(-1, 0), (0, -1), (-1, -1), (-2, 0), (0, -2), (-2, -1), (-1, -2), (-2, -2)],
    // 8x8
    [(-1, 0), (0, -1), (-1, -1), (-2, 0), (0, -2), (-2, -1), (-1, -2), (-2, -2)],
    // 8x16
    [(0, -1), (-1, 0), (1, -1), (-1, -1), (0, -2), (-2, 0), (-2, -1), (-1, -2)],
    // 16x8
    [(-1, 0), (0, -1), (-1, 1), (-1, -1), (-2, 0), (0, -2), (-1, -2), (-2, -1)],
    // 16x16
    [(-1, 0), (0, -1), (-1, 1), (1, -1), (-1, -1), (-3, 0), (0, -3), (-3, -3)],
    // 16x32
    [(0, -1), (-1, 0), (2, -1), (-1, -1), (-1, 1), (0, -3), (-3, 0), (-3, -3)],
    // 32x16
    [(-1, 0), (0, -1), (-1, 2), (-1, -1), (1, -1), (-3, 0), (0, -3), (-3, -3)],
    // 32x32
    [(-1, 1), (1, -1), (-1, 2), (2, -1), (-1, -1), (-3, 0), (0, -3), (-3, -3)],
    // 32x64
    [(0, -1), (-1, 0), (4, -1), (-1, 2), (-1, -1), (0, -3), (-3, 0), (2, -1)],
    // 64x32
    [(-1, 0), (0, -1), (-1, 4), (2, -1), (-1, -1), (-3, 0), (0, -3), (-1, 2)],
    // 64x64
    [(-1, 3), (3, -1), (-1, 4), (4, -1), (-1, -1), (-1, 0), (0, -1), (-1, 6)],
];

/// Weight of the mode of the two closest neighbors in the inter mode context.
const MODE_2_COUNTER: [u8; 14] = [9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 0, 0, 3, 1];

const COUNTER_TO_CONTEXT: [u8; 19] = [2, 3, 4, 1, 3, 9, 0, 9, 9, 5, 5, 9, 5, 9, 9, 9, 9, 9, 6];

/// Sub-block of a neighbor smaller than 8x8 that touches sub-block `b` of the current block,
/// for a left neighbor (index 0) and an above one (index 1).
const IDX_N_COLUMN_TO_SUBBLOCK: [[usize; 2]; 4] = [[1, 2], [1, 3], [3, 2], [3, 3]];

/// Up to two distinct candidates.
#[derive(Default)]
struct MvList {
    mvs: [Mv; 2],
    count: usize,
}

impl MvList {
    /// Adds `mv` unless it repeats the first entry. Returns true once the list is full.
    fn add(&mut self, mv: Mv) -> bool {
        if self.count == 0 {
            self.mvs[0] = mv;
            self.count = 1;
            false
        } else if mv != self.mvs[0] {
            self.mvs[1] = mv;
            self.count = 2;
            true
        } else {
            false
        }
    }
}

/// Candidate motion vectors for one reference of a block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Candidates {
    pub mvs: [Mv; 2],
    /// Context of the inter mode of the block, derived from its two closest neighbors.
    pub mode_context: usize,
}

fn clamp_mv(mv: Mv, edges: &BlockEdges, margin: i32) -> Mv {
    Mv::new(
        i32::from(mv.row).clamp(edges.top - margin, edges.bottom + margin) as i16,
        i32::from(mv.col).clamp(edges.left - margin, edges.right + margin) as i16,
    )
}

/// Whether the 1/8th pel bit of a vector predicted from `mv` is coded.
pub fn use_mv_hp(mv: Mv) -> bool {
    (i32::from(mv.row).abs() >> 3) < COMPANDED_MVREF_THRESH
        && (i32::from(mv.col).abs() >> 3) < COMPANDED_MVREF_THRESH
}

/// Rounds odd components towards zero when 1/8th pel precision is not in use for `mv`.
pub fn lower_mv_precision(mv: Mv, allow_hp: bool) -> Mv {
    if allow_hp && use_mv_hp(mv) {
        return mv;
    }

    let lower = |v: i16| {
        if v & 1 != 0 {
            if v > 0 {
                v - 1
            } else {
                v + 1
            }
        } else {
            v
        }
    };
    Mv::new(lower(mv.row), lower(mv.col))
}

/// Nearest and near vectors of a block from its candidate list.
pub fn best_ref_mvs(candidates: &[Mv; 2], allow_hp: bool, edges: &BlockEdges) -> [Mv; 2] {
    candidates.map(|mv| clamp_mv(lower_mv_precision(mv, allow_hp), edges, BEST_MV_MARGIN))
}

/// Motion vector neighborhood of the blocks of one tile.
pub struct CandidateSearch<'a, 'b> {
    /// Mode info of the tile columns, indexed by mode-info position.
    pub grid: &'a ColumnsMut<'b, ModeInfo>,
    /// Vectors of the previous frame, when usable for prediction.
    pub prev_mvs: Option<&'a MvBuffer>,
    pub sign_bias: [bool; 4],
    pub mi_rows: usize,
}

impl<'a, 'b> CandidateSearch<'a, 'b> {
    fn neighbor(&self, mi_row: usize, mi_col: usize, (dr, dc): (i8, i8)) -> Option<&ModeInfo> {
        let row = mi_row as isize + dr as isize;
        let col = mi_col as isize + dc as isize;
        let inside = row >= 0
            && (row as usize) < self.mi_rows
            && col >= self.grid.x_start() as isize
            && (col as usize) < self.grid.x_end();

        inside.then(|| self.grid.get(col as usize, row as usize))
    }

    fn scaled(&self, mv: Mv, from: ReferenceFrameType, to: ReferenceFrameType) -> Mv {
        if self.sign_bias[from.index()] != self.sign_bias[to.index()] {
            Mv::new(-mv.row, -mv.col)
        } else {
            mv
        }
    }

    /// Fills `list` and returns the context counter of the two closest neighbors.
    fn search(
        &self,
        mi_row: usize,
        mi_col: usize,
        bsize: BlockSize,
        ref_frame: ReferenceFrameType,
        block: Option<usize>,
        list: &mut MvList,
    ) -> usize {
        let positions = &MV_REF_BLOCKS[bsize as usize];
        let mut counter = 0;
        let mut found_any = false;

        for (i, pos) in positions.iter().enumerate() {
            let Some(cand) = self.neighbor(mi_row, mi_col, *pos) else {
                continue;
            };
            found_any = true;

            let pick = |which: usize| match block {
                Some(b) if i < 2 && cand.sb_type.is_sub8x8() => {
                    cand.sub_mvs[IDX_N_COLUMN_TO_SUBBLOCK[b][(pos.1 == 0) as usize]][which]
                }
                _ => cand.mv[which],
            };

            if i < 2 {
                counter += MODE_2_COUNTER[cand.mode as usize] as usize;
            }

            let done = if cand.ref_frame[0] == ref_frame {
                list.add(pick(0))
            } else if cand.ref_frame[1] == ref_frame {
                list.add(pick(1))
            } else {
                false
            };
            if done {
                return counter;
            }
        }

        let prev = self.prev_mvs.map(|p| *p.get(mi_col, mi_row));
        if let Some(prev) = prev {
            let done = if prev.ref_frame[0] == ref_frame {
                list.add(prev.mv[0])
            } else if prev.ref_frame[1] == ref_frame {
                list.add(prev.mv[1])
            } else {
                false
            };
            if done {
                return counter;
            }
        }

        if found_any {
            for pos in positions {
                let Some(cand) = self.neighbor(mi_row, mi_col, *pos) else {
                    continue;
                };
                if !cand.is_inter() {
                    continue;
                }

                if cand.ref_frame[0] != ref_frame
                    && list.add(self.scaled(cand.mv[0], cand.ref_frame[0], ref_frame))
                {
                    return counter;
                }
                if cand.is_compound()
                    && cand.ref_frame[1] != ref_frame
                    && cand.mv[1] != cand.mv[0]
                    && list.add(self.scaled(cand.mv[1], cand.ref_frame[1], ref_frame))
                {
                    return counter;
                }
            }
        }

        if let Some(prev) = prev {
            if prev.ref_frame[0] != ref_frame
                && prev.ref_frame[0] > ReferenceFrameType::Intra
                && list.add(self.scaled(prev.mv[0], prev.ref_frame[0], ref_frame))
            {
                return counter;
            }
            if prev.ref_frame[1] > ReferenceFrameType::Intra
                && prev.ref_frame[1] != ref_frame
                && prev.mv[1] != prev.mv[0]
                && list.add(self.scaled(prev.mv[1], prev.ref_frame[1], ref_frame))
            {
                return counter;
            }
        }

        counter
    }

    /// Builds the candidate list of `ref_frame` for the block at `(mi_row, mi_col)`. `block`
    /// selects a 4x4 sub-block of a block smaller than 8x8.
    pub fn find(
        &self,
        mi_row: usize,
        mi_col: usize,
        bsize: BlockSize,
        ref_frame: ReferenceFrameType,
        block: Option<usize>,
        edges: &BlockEdges,
    ) -> Candidates {
        let mut list = MvList::default();
        let counter = self.search(mi_row, mi_col, bsize, ref_frame, block, &mut list);

        Candidates {
            mvs: list.mvs.map(|mv| clamp_mv(mv, edges, MV_BORDER)),
            mode_context: COUNTER_TO_CONTEXT[counter] as usize,
        }
    }

    /// Nearest and near vectors of sub-block `block` for reference `which` of `mi`, whose
    /// earlier sub-blocks are already decoded.
    pub fn sub8x8_mvs(
        &self,
        mi: &ModeInfo,
        mi_row: usize,
        mi_col: usize,
        which: usize,
        block: usize,
        edges: &BlockEdges,
    ) -> [Mv; 2] {
        let list = self
            .find(mi_row, mi_col, mi.sb_type, mi.ref_frame[which], Some(block), edges)
            .mvs;
        let own = |b: usize| mi.sub_mvs[b][which];

        let (nearest, others): (Mv, Vec<Mv>) = match block {
            0 => return list,
            1 | 2 => (own(0), list.to_vec()),
            _ => (own(2), vec![own(1), own(0), list[0], list[1]]),
        };
        let near = others
            .into_iter()
            .find(|mv| *mv != nearest)
            .unwrap_or_default();

        [nearest, near]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::frame::split_columns;
    use crate::decoders::vp9::types::MvRef;
    use crate::decoders::vp9::types::PredictionMode;

    const COLS: usize = 4;
    const ROWS: usize = 4;

    fn inter_mi(ref_frame: ReferenceFrameType, mv: Mv, mode: PredictionMode) -> ModeInfo {
        ModeInfo {
            sb_type: BlockSize::Block8x8,
            mode,
            ref_frame: [ref_frame, ReferenceFrameType::None],
            mv: [mv, Mv::default()],
            sub_mvs: [[mv, Mv::default()]; 4],
            ..Default::default()
        }
    }

    fn search<'a, 'b>(grid: &'a ColumnsMut<'b, ModeInfo>) -> CandidateSearch<'a, 'b> {
        CandidateSearch {
            grid,
            prev_mvs: None,
            sign_bias: [false; 4],
            mi_rows: ROWS,
        }
    }

    fn edges(mi_row: usize, mi_col: usize) -> BlockEdges {
        BlockEdges::new(mi_row, mi_col, BlockSize::Block8x8, ROWS, COLS)
    }

    #[test]
    fn no_neighbors_at_frame_origin() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);
        let c = search(&views[0]).find(
            0,
            0,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(0, 0),
        );

        assert_eq!(c.mvs, [Mv::default(); 2]);
        assert_eq!(c.mode_context, 2);
    }

    #[test]
    fn same_reference_neighbors_come_first() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        // Above, left and above-left of (1, 1).
        data[1] = inter_mi(ReferenceFrameType::Last, Mv::new(8, 8), PredictionMode::NewMv);
        data[COLS] = inter_mi(ReferenceFrameType::Golden, Mv::new(16, 0), PredictionMode::ZeroMv);
        data[0] = inter_mi(ReferenceFrameType::Last, Mv::new(-8, 4), PredictionMode::NearMv);
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);

        let c = search(&views[0]).find(
            1,
            1,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(1, 1),
        );

        assert_eq!(c.mvs, [Mv::new(8, 8), Mv::new(-8, 4)]);
        // NEWMV (1) and ZEROMV (3).
        assert_eq!(c.mode_context, COUNTER_TO_CONTEXT[4] as usize);
    }

    #[test]
    fn other_references_are_sign_corrected() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        data[1] = inter_mi(ReferenceFrameType::AltRef, Mv::new(8, -8), PredictionMode::NewMv);
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);

        let mut s = search(&views[0]);
        s.sign_bias[ReferenceFrameType::AltRef.index()] = true;
        let c = s.find(
            1,
            1,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(1, 1),
        );

        assert_eq!(c.mvs[0], Mv::new(-8, 8));
    }

    #[test]
    fn neighbors_outside_the_tile_are_ignored() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        data[COLS + 1] = inter_mi(ReferenceFrameType::Last, Mv::new(8, 8), PredictionMode::NewMv);
        let views = split_columns(&mut data, COLS, ROWS, &[0, 2, COLS]);

        // (1, 2) starts the second tile, its left neighbor belongs to the first one.
        let c = search(&views[1]).find(
            1,
            2,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(1, 2),
        );
        assert_eq!(c.mvs, [Mv::default(); 2]);
    }

    #[test]
    fn previous_frame_vectors() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);
        let mut prev = MvBuffer::new(COLS, ROWS);
        prev.refs[COLS + 1] = MvRef {
            ref_frame: [ReferenceFrameType::Last, ReferenceFrameType::None],
            mv: [Mv::new(24, -24), Mv::default()],
        };

        let mut s = search(&views[0]);
        s.prev_mvs = Some(&prev);
        let c = s.find(
            1,
            1,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(1, 1),
        );
        assert_eq!(c.mvs[0], Mv::new(24, -24));
    }

    #[test]
    fn candidates_are_clamped_near_the_frame() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        data[1] = inter_mi(ReferenceFrameType::Last, Mv::new(-2000, 0), PredictionMode::NewMv);
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);

        let c = search(&views[0]).find(
            1,
            1,
            BlockSize::Block8x8,
            ReferenceFrameType::Last,
            None,
            &edges(1, 1),
        );
        assert_eq!(c.mvs[0].row, -64 - MV_BORDER as i16);
    }

    #[test]
    fn precision_lowering() {
        assert_eq!(lower_mv_precision(Mv::new(3, -5), false), Mv::new(2, -4));
        assert_eq!(lower_mv_precision(Mv::new(3, -5), true), Mv::new(3, -5));
        // Large vectors never keep the 1/8th pel bit.
        assert_eq!(lower_mv_precision(Mv::new(65, 1), true), Mv::new(64, 0));
        assert!(use_mv_hp(Mv::new(63, -63)));
        assert!(!use_mv_hp(Mv::new(64, 0)));
    }

    #[test]
    fn sub_block_candidates_use_earlier_sub_blocks() {
        let mut data = vec![ModeInfo::default(); COLS * ROWS];
        let views = split_columns(&mut data, COLS, ROWS, &[0, COLS]);
        let mut mi = inter_mi(ReferenceFrameType::Last, Mv::default(), PredictionMode::NewMv);
        mi.sb_type = BlockSize::Block4x4;
        mi.sub_mvs[0][0] = Mv::new(4, 4);
        mi.sub_mvs[1][0] = Mv::new(6, 6);
        mi.sub_mvs[2][0] = Mv::new(4, 4);

        let s = search(&views[0]);
        let e = edges(1, 1);
        assert_eq!(s.sub8x8_mvs(&mi, 1, 1, 0, 1, &e), [Mv::new(4, 4), Mv::default()]);
        assert_eq!(s.sub8x8_mvs(&mi, 1, 1, 0, 3, &e), [Mv::new(4, 4), Mv::new(6, 6)]);
    }
}
