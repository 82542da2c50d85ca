// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Motion compensated prediction from reference frames, including scaled references.

use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::frame::Plane;
use crate::decoders::vp9::parser::InterpolationFilter;
use crate::decoders::vp9::types::BlockEdges;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::Mv;

const SUBPEL_BITS: i32 = 4;
const SUBPEL_MASK: i32 = (1 << SUBPEL_BITS) - 1;
const SUBPEL_SHIFTS: i32 = 1 << SUBPEL_BITS;
const SUBPEL_TAPS: usize = 8;
const FILTER_BITS: i32 = 7;
const INTERP_EXTEND: i32 = 4;

const REF_SCALE_SHIFT: i32 = 14;
const REF_NO_SCALE: i32 = 1 << REF_SCALE_SHIFT;

/// Largest prediction block side.
const MAX_BLOCK: usize = 64;
/// Rows of horizontally filtered samples needed by a 64 sample high block at twice the
/// reference resolution.
const MAX_TEMP_ROWS: usize = ((MAX_BLOCK - 1) * 32 + 15) / 16 + SUBPEL_TAPS;

pub type InterpKernel = [i16; SUBPEL_TAPS];

static REGULAR: [InterpKernel; 16] = [
    [0, 0, 0, 128, 0, 0, 0, 0],
    [0, 1, -5, 126, 8, -3, 1, 0],
    [-1, 3, -10, 122, 18, -6, 2, 0],
    [-1, 4, -13, 118, 27, -9, 3, -1],
    [-1, 4, -16, 112, 37, -11, 4, -1],
    [-1, 5, -18, 105, 48, -14, 4, -1],
    [-1, 5, -19, 97, 58, -16, 5, -1],
    [-1, 6, -19, 88, 68, -18, 5, -1],
    [-1, 6, -19, 78, 78, -19, 6, -1],
    [-1, 5, -18, 68, 88, -19, 6, -1],
    [-1, 5, -16, 58, 97, -19, 5, -1],
    [-1, 4, -14, 48, 105, -18, 5, -1],
    [-1, 4, -11, 37, 112, -16, 4, -1],
    [-1, 3, -9, 27, 118, -13, 4, -1],
    [0, 2, -6, 18, 122, -10, 3, -1],
    [0, 1, -3, 8, 126, -5, 1, 0],
];

static SMOOTH: [InterpKernel; 16] = [
    [0, 0, 0, 128, 0, 0, 0, 0],
    [-3, -1, 32, 64, 38, 1, -3, 0],
    [-2, -2, 29, 63, 41, 2, -3, 0],
    [-2, -2, 26, 63, 43, 4, -4, 0],
    [-2, -3, 24, 62, 46, 5, -4, 0],
    [-2, -3, 21, 60, 49, 7, -4, 0],
    [-1, -4, 18, 59, 51, 9, -4, 0],
    [-1, -4, 16, 57, 53, 12, -4, -1],
    [-1, -4, 14, 55, 55, 14, -4, -1],
    [-1, -4, 12, 53, 57, 16, -4, -1],
    [0, -4, 9, 51, 59, 18, -4, -1],
    [0, -4, 7, 49, 60, 21, -3, -2],
    [0, -4, 5, 46, 62, 24, -3, -2],
    [0, -4, 4, 43, 63, 26, -2, -2],
    [0, -3, 2, 41, 63, 29, -2, -2],
    [0, -3, 1, 38, 64, 32, -1, -3],
];

static SHARP: [InterpKernel; 16] = [
    [0, 0, 0, 128, 0, 0, 0, 0],
    [-1, 3, -7, 127, 8, -3, 1, 0],
    [-2, 5, -13, 125, 17, -6, 3, -1],
    [-3, 7, -17, 121, 27, -10, 5, -2],
    [-4, 9, -20, 115, 37, -13, 6, -2],
    [-4, 10, -23, 108, 48, -16, 8, -3],
    [-4, 10, -24, 100, 59, -19, 9, -3],
    [-4, 11, -24, 90, 70, -21, 10, -4],
    [-4, 11, -23, 80, 80, -23, 11, -4],
    [-4, 10, -21, 70, 90, -24, 11, -4],
    [-3, 9, -19, 59, 100, -24, 10, -4],
    [-3, 8, -16, 48, 108, -23, 10, -4],
    [-2, 6, -13, 37, 115, -20, 9, -4],
    [-2, 5, -10, 27, 121, -17, 7, -3],
    [-1, 3, -6, 17, 125, -13, 5, -2],
    [0, 1, -3, 8, 127, -7, 3, -1],
];

static BILINEAR: [InterpKernel; 16] = [
    [0, 0, 0, 128, 0, 0, 0, 0],
    [0, 0, 0, 120, 8, 0, 0, 0],
    [0, 0, 0, 112, 16, 0, 0, 0],
    [0, 0, 0, 104, 24, 0, 0, 0],
    [0, 0, 0, 96, 32, 0, 0, 0],
    [0, 0, 0, 88, 40, 0, 0, 0],
    [0, 0, 0, 80, 48, 0, 0, 0],
    [0, 0, 0, 72, 56, 0, 0, 0],
    [0, 0, 0, 64, 64, 0, 0, 0],
    [0, 0, 0, 56, 72, 0, 0, 0],
    [0, 0, 0, 48, 80, 0, 0, 0],
    [0, 0, 0, 40, 88, 0, 0, 0],
    [0, 0, 0, 32, 96, 0, 0, 0],
    [0, 0, 0, 24, 104, 0, 0, 0],
    [0, 0, 0, 16, 112, 0, 0, 0],
    [0, 0, 0, 8, 120, 0, 0, 0],
];

/// Sub-pixel kernels of a block's interpolation filter. `Switchable` never reaches a block.
pub fn kernels(filter: InterpolationFilter) -> &'static [InterpKernel; 16] {
    match filter {
        InterpolationFilter::EightTapSmooth => &SMOOTH,
        InterpolationFilter::EightTapSharp => &SHARP,
        InterpolationFilter::Bilinear => &BILINEAR,
        InterpolationFilter::EightTap | InterpolationFilter::Switchable => &REGULAR,
    }
}

/// Fixed point mapping from the current frame to a reference of a different size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScaleFactors {
    x_scale_fp: i32,
    y_scale_fp: i32,
    x_step_q4: i32,
    y_step_q4: i32,
}

impl ScaleFactors {
    /// Returns `None` when the reference is more than twice as large or sixteen times smaller
    /// than the current frame in either direction.
    pub fn new(ref_width: u32, ref_height: u32, width: u32, height: u32) -> Option<Self> {
        let valid = 2 * width >= ref_width
            && 2 * height >= ref_height
            && width <= 16 * ref_width
            && height <= 16 * ref_height;
        if !valid || width == 0 || height == 0 {
            return None;
        }

        let x_scale_fp = ((ref_width as i64) << REF_SCALE_SHIFT) / width as i64;
        let y_scale_fp = ((ref_height as i64) << REF_SCALE_SHIFT) / height as i64;
        let mut sf = Self {
            x_scale_fp: x_scale_fp as i32,
            y_scale_fp: y_scale_fp as i32,
            x_step_q4: 0,
            y_step_q4: 0,
        };
        sf.x_step_q4 = sf.scale_x(SUBPEL_SHIFTS);
        sf.y_step_q4 = sf.scale_y(SUBPEL_SHIFTS);

        Some(sf)
    }

    pub fn is_scaled(&self) -> bool {
        self.x_scale_fp != REF_NO_SCALE || self.y_scale_fp != REF_NO_SCALE
    }

    fn scale_x(&self, v: i32) -> i32 {
        ((v as i64 * self.x_scale_fp as i64) >> REF_SCALE_SHIFT) as i32
    }

    fn scale_y(&self, v: i32) -> i32 {
        ((v as i64 * self.y_scale_fp as i64) >> REF_SCALE_SHIFT) as i32
    }
}

/// Where a prediction block sits in its plane.
#[derive(Copy, Clone, Debug)]
pub struct PlaneBlock {
    /// Edges of the whole block in luma units.
    pub edges: BlockEdges,
    pub ss_x: usize,
    pub ss_y: usize,
    /// Size of the whole block in this plane, which bounds how far motion vectors may point
    /// outside the frame.
    pub width: usize,
    pub height: usize,
    /// Luma position of the block.
    pub mi_x: i32,
    pub mi_y: i32,
}

impl PlaneBlock {
    /// Top left sample of the block in the plane.
    pub fn origin(&self) -> (usize, usize) {
        (
            ((-self.edges.left) >> (3 + self.ss_x)) as usize,
            ((-self.edges.top) >> (3 + self.ss_y)) as usize,
        )
    }

    /// Converts a luma motion vector to 1/16th sample units of this plane, limiting it so the
    /// block does not move further out than the interpolation border.
    fn clamp_mv(&self, mv: Mv) -> (i32, i32) {
        let (sx, sy) = (1 - self.ss_x as i32, 1 - self.ss_y as i32);
        let spel_left = (INTERP_EXTEND + self.width as i32) << SUBPEL_BITS;
        let spel_right = spel_left - SUBPEL_SHIFTS;
        let spel_top = (INTERP_EXTEND + self.height as i32) << SUBPEL_BITS;
        let spel_bottom = spel_top - SUBPEL_SHIFTS;

        let col = (i32::from(mv.col) << sx).clamp(
            (self.edges.left << sx) - spel_left,
            (self.edges.right << sx) + spel_right,
        );
        let row = (i32::from(mv.row) << sy).clamp(
            (self.edges.top << sy) - spel_top,
            (self.edges.bottom << sy) + spel_bottom,
        );

        (row, col)
    }
}

/// Predicts the `w`x`h` area at offset `(x, y)` of `block` from `reference` displaced by `mv`.
/// With `average` the result is averaged into the samples already in `dst`, which is how the
/// second reference of compound blocks is applied.
#[allow(clippy::too_many_arguments)]
pub fn predict(
    dst: &mut ColumnsMut<u16>,
    reference: &Plane,
    scale: &ScaleFactors,
    kernel: &[InterpKernel; 16],
    block: &PlaneBlock,
    (x, y): (usize, usize),
    (w, h): (usize, usize),
    mv: Mv,
    average: bool,
    bit_depth: u32,
) {
    let (mv_row, mv_col) = block.clamp_mv(mv);
    let (bx, by) = block.origin();

    let (mut x0, mut y0, mv_row, mv_col, xs, ys) = if scale.is_scaled() {
        let x_off = scale.scale_x((block.mi_x + x as i32) << SUBPEL_BITS) & SUBPEL_MASK;
        let y_off = scale.scale_y((block.mi_y + y as i32) << SUBPEL_BITS) & SUBPEL_MASK;
        (
            scale.scale_x((bx + x) as i32),
            scale.scale_y((by + y) as i32),
            scale.scale_y(mv_row) + y_off,
            scale.scale_x(mv_col) + x_off,
            scale.x_step_q4,
            scale.y_step_q4,
        )
    } else {
        (
            (bx + x) as i32,
            (by + y) as i32,
            mv_row,
            mv_col,
            SUBPEL_SHIFTS,
            SUBPEL_SHIFTS,
        )
    };

    let subpel_x = mv_col & SUBPEL_MASK;
    let subpel_y = mv_row & SUBPEL_MASK;
    x0 += mv_col >> SUBPEL_BITS;
    y0 += mv_row >> SUBPEL_BITS;

    let max = (1i32 << bit_depth) - 1;
    let round = |sum: i32| ((sum + (1 << (FILTER_BITS - 1))) >> FILTER_BITS).clamp(0, max);

    let taps = SUBPEL_TAPS as i32;
    let rows = ((((h as i32 - 1) * ys + subpel_y) >> SUBPEL_BITS) + taps) as usize;
    let mut temp = [0u16; MAX_BLOCK * MAX_TEMP_ROWS];

    let last_x = reference.width as i32 - 1;
    let last_y = reference.height as i32 - 1;
    for r in 0..rows.min(MAX_TEMP_ROWS) {
        let sy = (y0 - (taps / 2 - 1) + r as i32).clamp(0, last_y) as usize;
        let src = reference.row(sy);
        let mut x_q4 = subpel_x;
        for c in 0..w {
            let sx = x0 + (x_q4 >> SUBPEL_BITS) - (taps / 2 - 1);
            let k = &kernel[(x_q4 & SUBPEL_MASK) as usize];
            let sum: i32 = k
                .iter()
                .enumerate()
                .map(|(t, f)| i32::from(*f) * i32::from(src[(sx + t as i32).clamp(0, last_x) as usize]))
                .sum();
            temp[r * MAX_BLOCK + c] = round(sum) as u16;
            x_q4 += xs;
        }
    }

    for r in 0..h {
        let y_q4 = subpel_y + r as i32 * ys;
        let base = (y_q4 >> SUBPEL_BITS) as usize;
        let k = &kernel[(y_q4 & SUBPEL_MASK) as usize];
        let out = &mut dst.row_from_mut(bx + x, by + y + r)[..w];
        for (c, o) in out.iter_mut().enumerate() {
            let sum: i32 = k
                .iter()
                .enumerate()
                .map(|(t, f)| i32::from(*f) * i32::from(temp[(base + t) * MAX_BLOCK + c]))
                .sum();
            let v = round(sum);
            *o = if average {
                ((i32::from(*o) + v + 1) >> 1) as u16
            } else {
                v as u16
            };
        }
    }
}

fn round_q4(v: i32) -> i16 {
    ((if v < 0 { v - 2 } else { v + 2 }) / 4) as i16
}

fn round_q2(v: i32) -> i16 {
    ((if v < 0 { v - 1 } else { v + 1 }) / 2) as i16
}

/// Motion vector used for the `block`-th 4x4 prediction of a subsampled plane of a block
/// smaller than 8x8. Subsampled planes average the vectors of the luma sub-blocks they cover.
pub fn sub8x8_plane_mv(mi: &ModeInfo, which: usize, block: usize, ss_x: bool, ss_y: bool) -> Mv {
    let mv = |b: usize| mi.sub_mvs[b.min(3)][which];
    let pair = |a: usize, b: usize| {
        let (ma, mb) = (mv(a), mv(b));
        Mv::new(
            round_q2(i32::from(ma.row) + i32::from(mb.row)),
            round_q2(i32::from(ma.col) + i32::from(mb.col)),
        )
    };

    match (ss_x, ss_y) {
        (false, false) => mv(block),
        (false, true) => pair(block, block + 2),
        (true, false) => pair(block, block + 1),
        (true, true) => {
            let (row, col) = (0..4).fold((0, 0), |(r, c), b| {
                (r + i32::from(mv(b).row), c + i32::from(mv(b).col))
            });
            Mv::new(round_q4(row), round_q4(col))
        }
    }
}
