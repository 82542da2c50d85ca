// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Deblocking of the reconstructed frame.
//!
//! Each superblock first gets a [`LoopFilterMask`] per plane describing which 8x8 unit edges
//! are filtered and with which filter, then the vertical edges of the superblock are filtered
//! followed by the horizontal ones. Superblock rows can be filtered in parallel as long as row
//! `r` stays behind row `r - 1`, which [`LfSync`] enforces.

use std::sync::Condvar;
use std::sync::Mutex;

use log::debug;

use crate::decoders::vp9::frame::Surface;
use crate::decoders::vp9::parser::BitDepth;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::MAX_LOOP_FILTER;
use crate::decoders::vp9::parser::MAX_MODE_LF_DELTAS;
use crate::decoders::vp9::parser::MAX_REF_LF_DELTAS;
use crate::decoders::vp9::parser::MAX_SEGMENTS;
use crate::decoders::vp9::parser::SEG_LVL_ALT_L;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::PredictionMode;
use crate::decoders::vp9::types::TxSize;
use crate::decoders::vp9::types::MAX_PLANES;
use crate::decoders::vp9::types::MI_BLOCK_SIZE;
use crate::decoders::vp9::types::SB_SIZE;
use crate::decoders::vp9::types::TX_SIZES;

/// Limits of the edge filters for one filter level, for 8-bit samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Thresholds {
    /// Largest step between samples on the same side of the edge.
    pub lim: u8,
    /// Largest weighted step across the edge.
    pub mblim: u8,
    /// High edge variance threshold.
    pub hev_thr: u8,
}

/// Filter levels and thresholds of a frame.
#[derive(Clone, Debug)]
pub struct LoopFilterInfo {
    /// Level per segment, reference frame and mode class.
    lvl: [[[u8; MAX_MODE_LF_DELTAS]; MAX_REF_LF_DELTAS]; MAX_SEGMENTS],
    thresholds: [Thresholds; MAX_LOOP_FILTER as usize + 1],
}

impl LoopFilterInfo {
    pub fn new(hdr: &Header) -> Self {
        let lf = &hdr.lf;
        let seg = &hdr.seg;
        let max = i32::from(MAX_LOOP_FILTER);

        let mut thresholds = [Thresholds::default(); MAX_LOOP_FILTER as usize + 1];
        for (lvl, t) in thresholds.iter_mut().enumerate() {
            let sharpness = lf.sharpness as usize;
            let mut limit = lvl >> ((sharpness > 0) as usize + (sharpness > 4) as usize);
            if sharpness > 0 {
                limit = limit.min(9 - sharpness);
            }
            let limit = limit.max(1);

            *t = Thresholds {
                lim: limit as u8,
                mblim: (2 * (lvl + 2) + limit) as u8,
                hev_thr: (lvl >> 4) as u8,
            };
        }

        let default_level = i32::from(lf.level);
        let scale = 1 << (default_level >> 5);
        let mut lvl = [[[0; MAX_MODE_LF_DELTAS]; MAX_REF_LF_DELTAS]; MAX_SEGMENTS];

        for (seg_id, seg_lvl) in lvl.iter_mut().enumerate() {
            let mut level = default_level;
            if seg.feature_active(seg_id as u8, SEG_LVL_ALT_L) {
                let data = i32::from(seg.feature_data[seg_id][SEG_LVL_ALT_L]);
                level = if seg.abs_or_delta_update {
                    data
                } else {
                    default_level + data
                }
                .clamp(0, max);
            }

            if !lf.delta_enabled {
                *seg_lvl = [[level as u8; MAX_MODE_LF_DELTAS]; MAX_REF_LF_DELTAS];
                continue;
            }

            let intra = level + i32::from(lf.ref_deltas[0]) * scale;
            seg_lvl[0] = [intra.clamp(0, max) as u8; MAX_MODE_LF_DELTAS];
            for ref_frame in 1..MAX_REF_LF_DELTAS {
                for mode in 0..MAX_MODE_LF_DELTAS {
                    let inter = level
                        + i32::from(lf.ref_deltas[ref_frame]) * scale
                        + i32::from(lf.mode_deltas[mode]) * scale;
                    seg_lvl[ref_frame][mode] = inter.clamp(0, max) as u8;
                }
            }
        }

        Self { lvl, thresholds }
    }

    /// Filter level of the edges of a block.
    pub fn level(&self, mi: &ModeInfo) -> u8 {
        let mode = (mi.mode.is_inter() && mi.mode != PredictionMode::ZeroMv) as usize;
        self.lvl[mi.segment_id as usize][mi.ref_frame[0].index()][mode]
    }

    pub fn thresholds(&self, level: u8) -> &Thresholds {
        &self.thresholds[level as usize]
    }
}

/// Edges of the 8x8 units of one plane of a superblock. Bit `row * 8 + col` stands for the unit
/// at `(row, col)` in plane units.
///
/// For each direction, the masks of the different transform sizes never share a bit. Edges of
/// 32x32 transforms are filtered like 16x16 ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopFilterMask {
    /// Left edges, by the size of the transform they bound.
    pub left: [u64; TX_SIZES],
    /// Top edges, by the size of the transform they bound.
    pub above: [u64; TX_SIZES],
    /// Units whose vertical edge 4 samples in is filtered.
    pub int_4x4_left: u64,
    /// Units whose horizontal edge 4 samples down is filtered.
    pub int_4x4_above: u64,
    /// Filter level of every unit.
    pub lfl: [u8; 64],
    /// Number of unit rows and columns inside the frame.
    pub rows: usize,
    pub cols: usize,
}

impl Default for LoopFilterMask {
    fn default() -> Self {
        Self {
            left: [0; TX_SIZES],
            above: [0; TX_SIZES],
            int_4x4_left: 0,
            int_4x4_above: 0,
            lfl: [0; 64],
            rows: 0,
            cols: 0,
        }
    }
}

impl LoopFilterMask {
    /// Builds the mask of plane with subsampling `(ss_x, ss_y)` for the superblock at
    /// `(mi_row, mi_col)`. `grid` holds the mode info of the whole frame with a stride of
    /// `mi_cols`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        info: &LoopFilterInfo,
        grid: &[ModeInfo],
        mi_cols: usize,
        mi_rows: usize,
        mi_row: usize,
        mi_col: usize,
        ss_x: bool,
        ss_y: bool,
    ) -> Self {
        let row_step = 1 << ss_y as usize;
        let col_step = 1 << ss_x as usize;
        let mut mask = Self::default();

        for r in (0..MI_BLOCK_SIZE).step_by(row_step) {
            if mi_row + r >= mi_rows {
                break;
            }
            let pr = r >> ss_y as usize;
            mask.rows = pr + 1;

            for c in (0..MI_BLOCK_SIZE).step_by(col_step) {
                if mi_col + c >= mi_cols {
                    break;
                }
                let pc = c >> ss_x as usize;
                mask.cols = mask.cols.max(pc + 1);

                let mi = &grid[(mi_row + r) * mi_cols + mi_col + c];
                let bit = 1u64 << (pr * 8 + pc);
                let level = info.level(mi);
                mask.lfl[pr * 8 + pc] = level;
                if level == 0 {
                    continue;
                }

                let bsize = mi.sb_type;
                let skip_this = mi.skip && mi.is_inter();
                let block_edge_left = bsize.width4() == 1 || c & (bsize.width_mi() - 1) == 0;
                let block_edge_above = bsize.height4() == 1 || r & (bsize.height_mi() - 1) == 0;
                let skip_c = skip_this && !block_edge_left;
                let skip_r = skip_this && !block_edge_above;

                let tx_size = mi.plane_tx_size((ss_x || ss_y) as usize, ss_x, ss_y);
                // Chroma units half outside the frame are filtered as 8x8 at most.
                let border_c = ss_x && mi_col + c == mi_cols - 1;
                let border_r = ss_y && mi_row + r == mi_rows - 1;

                match tx_size {
                    TxSize::Tx32x32 | TxSize::Tx16x16 => {
                        let align = if tx_size == TxSize::Tx32x32 { 3 } else { 1 };
                        let wide = tx_size as usize;
                        if !skip_c && pc & align == 0 {
                            let size = if border_c { TxSize::Tx8x8 as usize } else { wide };
                            mask.left[size] |= bit;
                        }
                        if !skip_r && pr & align == 0 {
                            let size = if border_r { TxSize::Tx8x8 as usize } else { wide };
                            mask.above[size] |= bit;
                        }
                    }
                    _ => {
                        // Edges on 32 sample boundaries get at least the 8 tap filter.
                        let small = |p: usize| {
                            if tx_size == TxSize::Tx8x8 || p & 3 == 0 {
                                TxSize::Tx8x8 as usize
                            } else {
                                TxSize::Tx4x4 as usize
                            }
                        };
                        if !skip_c {
                            mask.left[small(pc)] |= bit;
                        }
                        if !skip_r {
                            mask.above[small(pr)] |= bit;
                        }
                        if !skip_this && tx_size == TxSize::Tx4x4 && !border_c {
                            mask.int_4x4_left |= bit;
                            if !border_r {
                                mask.int_4x4_above |= bit;
                            }
                        }
                    }
                }
            }
        }

        // Frame borders are never filtered.
        if mi_col == 0 {
            const FIRST_COLUMN: u64 = 0x0101_0101_0101_0101;
            mask.left.iter_mut().for_each(|m| *m &= !FIRST_COLUMN);
        }
        if mi_row == 0 {
            mask.above.iter_mut().for_each(|m| *m &= !0xff);
        }

        mask
    }

    /// Whether no edge is claimed by two transform sizes.
    pub fn is_consistent(&self) -> bool {
        let disjoint = |masks: &[u64; TX_SIZES]| {
            let mut seen = 0;
            masks.iter().all(|m| {
                let ok = seen & m == 0;
                seen |= m;
                ok
            })
        };

        disjoint(&self.left) && disjoint(&self.above)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FilterSize {
    Four,
    Eight,
    Sixteen,
}

impl FilterSize {
    /// Samples read, in the 16 sample window centered on the edge.
    fn window(self) -> std::ops::Range<usize> {
        match self {
            FilterSize::Sixteen => 0..16,
            _ => 4..12,
        }
    }
}

/// Filters the samples across one edge. `px[7]` and `px[8]` are the samples closest to the
/// edge, on the left/top and right/bottom sides respectively.
fn filter_edge(px: &mut [i32; 16], size: FilterSize, t: &Thresholds, bit_depth: BitDepth) {
    let shift = bit_depth.bits() - 8;
    let limit = i32::from(t.lim) << shift;
    let blimit = i32::from(t.mblim) << shift;
    let thresh = i32::from(t.hev_thr) << shift;
    let one = 1 << shift;

    let p = |i: usize| px[7 - i];
    let q = |i: usize| px[8 + i];

    let mask = (1..4).all(|i| (p(i) - p(i - 1)).abs() <= limit && (q(i) - q(i - 1)).abs() <= limit)
        && (p(0) - q(0)).abs() * 2 + (p(1) - q(1)).abs() / 2 <= blimit;
    if !mask {
        return;
    }

    let flat_over = |range: std::ops::Range<usize>| {
        range
            .clone()
            .all(|i| (p(i) - p(0)).abs() <= one && (q(i) - q(0)).abs() <= one)
    };
    let flat = size != FilterSize::Four && flat_over(1..4);
    let flat2 = size == FilterSize::Sixteen && flat && flat_over(4..8);

    if flat2 {
        wide_filter(px, 7, 4);
    } else if flat {
        let mut win = [0; 8];
        win.copy_from_slice(&px[4..12]);
        wide_filter(&mut win, 3, 3);
        px[4..12].copy_from_slice(&win);
    } else {
        filter4(px, thresh, shift);
    }
}

/// Replaces every sample but the outermost ones by the rounded average of the `2 * reach + 1`
/// samples around it, the center counted twice and the window clamped to the slice.
fn wide_filter(px: &mut [i32], reach: usize, shift: u32) {
    let n = px.len() as isize;
    let src = px.to_vec();
    let at = |i: isize| src[i.clamp(0, n - 1) as usize];

    for k in 1..px.len() - 1 {
        let k = k as isize;
        let sum: i32 = (k - reach as isize..=k + reach as isize).map(at).sum::<i32>() + at(k);
        px[k as usize] = (sum + (1 << (shift - 1))) >> shift;
    }
}

fn filter4(px: &mut [i32; 16], thresh: i32, shift: u32) {
    let offset = 0x80 << shift;
    let lo = -128 << shift;
    let hi = (128 << shift) - 1;
    let clamp = |v: i32| v.clamp(lo, hi);

    let ps1 = px[6] - offset;
    let ps0 = px[7] - offset;
    let qs0 = px[8] - offset;
    let qs1 = px[9] - offset;

    let hev = (px[6] - px[7]).abs() > thresh || (px[9] - px[8]).abs() > thresh;

    let filter = if hev { clamp(ps1 - qs1) } else { 0 };
    let filter = clamp(filter + 3 * (qs0 - ps0));
    let filter1 = clamp(filter + 4) >> 3;
    let filter2 = clamp(filter + 3) >> 3;

    px[8] = clamp(qs0 - filter1) + offset;
    px[7] = clamp(ps0 + filter2) + offset;

    if !hev {
        let filter = (filter1 + 1) >> 1;
        px[9] = clamp(qs1 - filter) + offset;
        px[6] = clamp(ps1 + filter) + offset;
    }
}

/// Sample storage the filters operate on.
trait Samples {
    fn get(&self, x: usize, y: usize) -> u16;
    fn set(&mut self, x: usize, y: usize, v: u16);
}

/// Two vertically adjacent superblock row bands of a plane. Horizontal edges at the top of the
/// lower band reach into the upper one.
struct BandPair<'a, 'b> {
    upper: Option<&'a mut [u16]>,
    lower: &'b mut [u16],
    /// First sample row of the lower band.
    y0: usize,
    band_rows: usize,
    stride: usize,
}

impl<'a, 'b> Samples for BandPair<'a, 'b> {
    fn get(&self, x: usize, y: usize) -> u16 {
        if y >= self.y0 {
            self.lower[(y - self.y0) * self.stride + x]
        } else {
            let upper = self.upper.as_deref().unwrap_or_default();
            upper[(y + self.band_rows - self.y0) * self.stride + x]
        }
    }

    fn set(&mut self, x: usize, y: usize, v: u16) {
        if y >= self.y0 {
            self.lower[(y - self.y0) * self.stride + x] = v;
        } else if let Some(upper) = self.upper.as_deref_mut() {
            upper[(y + self.band_rows - self.y0) * self.stride + x] = v;
        }
    }
}

/// Filters the 8 sample long edge starting at `(x, y)`. Vertical edges run down, horizontal
/// ones to the right.
fn filter_line<S: Samples>(
    s: &mut S,
    (x, y): (usize, usize),
    vertical: bool,
    size: FilterSize,
    t: &Thresholds,
    bit_depth: BitDepth,
) {
    let window = size.window();

    for i in 0..8 {
        let pos = |k: usize| {
            if vertical {
                (x + k - 8, y + i)
            } else {
                (x + i, y + k - 8)
            }
        };

        let mut px = [0; 16];
        for k in window.clone() {
            let (sx, sy) = pos(k);
            px[k] = i32::from(s.get(sx, sy));
        }

        filter_edge(&mut px, size, t, bit_depth);

        for k in window.clone() {
            let (sx, sy) = pos(k);
            s.set(sx, sy, px[k] as u16);
        }
    }
}

/// Filters one plane of a superblock whose top left sample is at `(x0, y0)`.
fn filter_plane<S: Samples>(
    s: &mut S,
    mask: &LoopFilterMask,
    info: &LoopFilterInfo,
    (x0, y0): (usize, usize),
    bit_depth: BitDepth,
) {
    let wide = mask.left[TxSize::Tx16x16 as usize] | mask.left[TxSize::Tx32x32 as usize];
    let left = [mask.left[0], mask.left[1], wide];
    let wide = mask.above[TxSize::Tx16x16 as usize] | mask.above[TxSize::Tx32x32 as usize];
    let above = [mask.above[0], mask.above[1], wide];

    let size_of = |masks: &[u64; 3], bit: u64| {
        if masks[2] & bit != 0 {
            Some(FilterSize::Sixteen)
        } else if masks[1] & bit != 0 {
            Some(FilterSize::Eight)
        } else if masks[0] & bit != 0 {
            Some(FilterSize::Four)
        } else {
            None
        }
    };

    for vertical in [true, false] {
        let (masks, int_4x4) = if vertical {
            (&left, mask.int_4x4_left)
        } else {
            (&above, mask.int_4x4_above)
        };

        for r in 0..mask.rows {
            for c in 0..mask.cols {
                let bit = 1u64 << (r * 8 + c);
                let t = info.thresholds(mask.lfl[r * 8 + c]);
                let x = x0 + c * 8;
                let y = y0 + r * 8;

                if let Some(size) = size_of(masks, bit) {
                    filter_line(s, (x, y), vertical, size, t, bit_depth);
                }
                if int_4x4 & bit != 0 {
                    let inner = if vertical { (x + 4, y) } else { (x, y + 4) };
                    filter_line(s, inner, vertical, FilterSize::Four, t, bit_depth);
                }
            }
        }
    }
}

/// Number of superblocks a row must stay behind the row above it, by frame width.
pub fn sync_range(width: u32) -> usize {
    match width {
        0..=639 => 1,
        640..=1280 => 2,
        1281..=4096 => 4,
        _ => 8,
    }
}

/// Progress of the superblock rows being filtered.
pub struct LfSync {
    /// Filtered superblocks of every row.
    done: Mutex<Vec<usize>>,
    cond: Condvar,
    sb_cols: usize,
    nsync: usize,
}

impl LfSync {
    pub fn new(sb_rows: usize, sb_cols: usize, nsync: usize) -> Self {
        Self {
            done: Mutex::new(vec![0; sb_rows]),
            cond: Condvar::new(),
            sb_cols,
            nsync: nsync.max(1),
        }
    }

    /// Blocks until superblock `(row, col)` can be filtered.
    pub fn wait(&self, row: usize, col: usize) {
        if row == 0 {
            return;
        }

        let needed = (col + 1 + self.nsync).min(self.sb_cols);
        let mut done = self.done.lock().unwrap();
        while done[row - 1] < needed {
            done = self.cond.wait(done).unwrap();
        }
    }

    /// Marks superblock `(row, col)` as filtered.
    pub fn signal(&self, row: usize, col: usize) {
        let mut done = self.done.lock().unwrap();
        done[row] = col + 1;
        self.cond.notify_all();
    }
}

/// Superblock row bands of the three planes.
type Bands<'a> = [Vec<Mutex<&'a mut [u16]>>; MAX_PLANES];

fn split_bands(data: &mut [u16], band_len: usize, count: usize) -> Vec<Mutex<&mut [u16]>> {
    data.chunks_mut(band_len).take(count).map(Mutex::new).collect()
}

#[allow(clippy::too_many_arguments)]
fn filter_superblock(
    bands: &Bands,
    band_rows: &[usize; MAX_PLANES],
    strides: &[usize; MAX_PLANES],
    shifts: &[(bool, bool); MAX_PLANES],
    info: &LoopFilterInfo,
    grid: &[ModeInfo],
    (mi_cols, mi_rows): (usize, usize),
    (sb_row, sb_col): (usize, usize),
    bit_depth: BitDepth,
) {
    let mi_row = sb_row * MI_BLOCK_SIZE;
    let mi_col = sb_col * MI_BLOCK_SIZE;

    for plane in 0..MAX_PLANES {
        let (ss_x, ss_y) = shifts[plane];
        let mask = LoopFilterMask::build(info, grid, mi_cols, mi_rows, mi_row, mi_col, ss_x, ss_y);
        debug_assert!(mask.is_consistent());

        let mut upper = (sb_row > 0).then(|| bands[plane][sb_row - 1].lock().unwrap());
        let mut lower = bands[plane][sb_row].lock().unwrap();

        let y0 = sb_row * band_rows[plane];
        let mut pair = BandPair {
            upper: upper.as_deref_mut().map(|b| &mut **b),
            lower: &mut **lower,
            y0,
            band_rows: band_rows[plane],
            stride: strides[plane],
        };

        let x0 = (sb_col * SB_SIZE) >> ss_x as usize;
        filter_plane(&mut pair, &mask, info, (x0, y0), bit_depth);
    }
}

/// Deblocks `surface` using the mode info of the frame. Superblock rows are spread over
/// `threads` workers, each row staying `nsync` superblocks behind the row above.
pub fn filter_frame(
    surface: &mut Surface,
    grid: &[ModeInfo],
    hdr: &Header,
    threads: usize,
    nsync: usize,
) {
    if hdr.lf.level == 0 {
        return;
    }

    let info = LoopFilterInfo::new(hdr);
    let mi_cols = hdr.mi_cols();
    let mi_rows = hdr.mi_rows();
    let sb_rows = hdr.sb64_rows();
    let sb_cols = hdr.sb64_cols();
    let bit_depth = surface.bit_depth;

    let shifts: [(bool, bool); MAX_PLANES] = [
        (false, false),
        (surface.subsampling_x, surface.subsampling_y),
        (surface.subsampling_x, surface.subsampling_y),
    ];
    let band_rows = shifts.map(|(_, ss_y)| SB_SIZE >> ss_y as usize);
    let strides = [0, 1, 2].map(|p| surface.planes[p].stride);

    let [y, u, v] = &mut surface.planes;
    let bands: Bands = [
        split_bands(&mut y.data, band_rows[0] * strides[0], sb_rows),
        split_bands(&mut u.data, band_rows[1] * strides[1], sb_rows),
        split_bands(&mut v.data, band_rows[2] * strides[2], sb_rows),
    ];

    let workers = threads.clamp(1, sb_rows.max(1));
    debug!(
        "loop filter level {} sharpness {} over {} rows with {} workers",
        hdr.lf.level, hdr.lf.sharpness, sb_rows, workers
    );

    let sync = LfSync::new(sb_rows, sb_cols, nsync);
    let filter_rows = |first: usize| {
        for sb_row in (first..sb_rows).step_by(workers) {
            for sb_col in 0..sb_cols {
                sync.wait(sb_row, sb_col);
                filter_superblock(
                    &bands,
                    &band_rows,
                    &strides,
                    &shifts,
                    &info,
                    grid,
                    (mi_cols, mi_rows),
                    (sb_row, sb_col),
                    bit_depth,
                );
                sync.signal(sb_row, sb_col);
            }
        }
    };

    if workers == 1 {
        filter_rows(0);
        return;
    }

    std::thread::scope(|scope| {
        for first in 0..workers {
            let filter_rows = &filter_rows;
            scope.spawn(move || filter_rows(first));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::parser::ReferenceFrameType;
    use crate::decoders::vp9::types::BlockSize;

    fn header(width: u32, height: u32, level: u8) -> Header {
        let mut hdr = Header {
            width,
            height,
            ..Default::default()
        };
        hdr.lf.level = level;
        hdr
    }

    fn grid_of(hdr: &Header, mi: ModeInfo) -> Vec<ModeInfo> {
        vec![mi; hdr.mi_cols() * hdr.mi_rows()]
    }

    #[test]
    fn sharpness_limits() {
        let mut hdr = header(64, 64, 32);
        let info = LoopFilterInfo::new(&hdr);
        assert_eq!(
            *info.thresholds(32),
            Thresholds {
                lim: 32,
                mblim: 100,
                hev_thr: 2
            }
        );
        assert_eq!(info.thresholds(0).lim, 1);

        hdr.lf.sharpness = 5;
        let info = LoopFilterInfo::new(&hdr);
        assert_eq!(info.thresholds(32).lim, 4);
        assert_eq!(info.thresholds(32).mblim, 72);
    }

    #[test]
    fn levels_with_deltas() {
        let mut hdr = header(64, 64, 40);
        hdr.lf.delta_enabled = true;
        hdr.lf.ref_deltas = [1, 0, -1, -1];
        hdr.lf.mode_deltas = [0, 2];
        hdr.seg.enabled = true;
        hdr.seg.feature_enabled[1][SEG_LVL_ALT_L] = true;
        hdr.seg.feature_data[1][SEG_LVL_ALT_L] = -50;

        let info = LoopFilterInfo::new(&hdr);
        let intra = ModeInfo::default();
        let new_mv = ModeInfo {
            mode: PredictionMode::NewMv,
            ref_frame: [ReferenceFrameType::Golden, ReferenceFrameType::None],
            ..Default::default()
        };
        let zero_mv = ModeInfo {
            mode: PredictionMode::ZeroMv,
            ..new_mv
        };

        // Deltas are doubled above level 31.
        assert_eq!(info.level(&intra), 42);
        assert_eq!(info.level(&new_mv), 42);
        assert_eq!(info.level(&zero_mv), 38);
        // The segment level clamps to 0 before the deltas apply.
        assert_eq!(
            info.level(&ModeInfo {
                segment_id: 1,
                ..intra
            }),
            2
        );
    }

    #[test]
    fn masks_follow_transform_edges() {
        let hdr = header(64, 64, 10);
        let info = LoopFilterInfo::new(&hdr);
        let mi = ModeInfo {
            sb_type: BlockSize::Block32x32,
            tx_size: TxSize::Tx16x16,
            ..Default::default()
        };
        let grid = grid_of(&hdr, mi);

        let mask = LoopFilterMask::build(&info, &grid, 8, 8, 0, 0, false, false);
        assert!(mask.is_consistent());
        assert_eq!((mask.rows, mask.cols), (8, 8));
        // Left edges of columns 2, 4 and 6; the frame edge is left alone.
        let cols = 0b0101_0100u64;
        let expected = (0..8).fold(0, |m, r| m | cols << (r * 8));
        assert_eq!(mask.left[TxSize::Tx16x16 as usize], expected);
        assert_eq!(mask.left[TxSize::Tx8x8 as usize], 0);
        assert_eq!(mask.int_4x4_left, 0);
        assert_eq!(mask.above[TxSize::Tx16x16 as usize] & 0xff, 0);
        assert_eq!(mask.above[TxSize::Tx16x16 as usize] >> 16 & 0xff, 0xff);
    }

    #[test]
    fn skipped_inter_blocks_keep_only_block_edges() {
        let hdr = header(64, 64, 10);
        let info = LoopFilterInfo::new(&hdr);
        let mi = ModeInfo {
            sb_type: BlockSize::Block64x64,
            tx_size: TxSize::Tx4x4,
            skip: true,
            mode: PredictionMode::ZeroMv,
            ref_frame: [ReferenceFrameType::Last, ReferenceFrameType::None],
            ..Default::default()
        };
        let grid = grid_of(&hdr, mi);

        let mask = LoopFilterMask::build(&info, &grid, 8, 8, 0, 0, false, false);
        assert!(mask.left.iter().all(|m| *m == 0));
        assert!(mask.above.iter().all(|m| *m == 0));
        assert_eq!(mask.int_4x4_left, 0);
    }

    #[test]
    fn small_transforms_and_chroma_border() {
        // 9 mode-info columns: the last chroma unit is half outside the frame.
        let hdr = header(72, 64, 10);
        let info = LoopFilterInfo::new(&hdr);
        let mi = ModeInfo {
            sb_type: BlockSize::Block8x8,
            tx_size: TxSize::Tx4x4,
            ..Default::default()
        };
        let grid = grid_of(&hdr, mi);

        let luma = LoopFilterMask::build(&info, &grid, 9, 8, 0, 0, false, false);
        assert!(luma.is_consistent());
        // 8 taps on 32 sample boundaries, 4 elsewhere.
        assert_eq!(luma.left[TxSize::Tx8x8 as usize] & 0xff, 0b0001_0000);
        assert_eq!(luma.left[TxSize::Tx4x4 as usize] & 0xff, 0b1110_1110);
        assert_eq!(luma.int_4x4_left & 0xff, 0xff);

        let chroma = LoopFilterMask::build(&info, &grid, 9, 8, 0, 8, true, true);
        assert_eq!((chroma.rows, chroma.cols), (4, 1));
        assert_eq!(chroma.left[TxSize::Tx8x8 as usize] & 1, 1);
        assert_eq!(chroma.int_4x4_left, 0);
    }

    #[test]
    fn four_tap_filter_smooths_a_step() {
        let t = Thresholds {
            lim: 10,
            mblim: 40,
            hev_thr: 0,
        };
        let mut px = [100; 16];
        px[8..].fill(104);

        filter_edge(&mut px, FilterSize::Four, &t, BitDepth::Depth8);
        // hev: |p1 - p0| and |q1 - q0| are 0, not above the threshold.
        assert_eq!(&px[5..11], &[100, 101, 101, 102, 103, 104]);
    }

    #[test]
    fn flat_areas_use_the_wide_filters() {
        let t = Thresholds {
            lim: 10,
            mblim: 40,
            hev_thr: 0,
        };
        let mut px = [100; 16];
        px[8..].fill(101);

        let mut eight = px;
        filter_edge(&mut eight, FilterSize::Eight, &t, BitDepth::Depth8);
        // (3 * 100 + 2 * 100 + 100 + 100 + 101 + 4) >> 3 = 100
        assert_eq!(&eight[4..12], &[100, 100, 100, 100, 101, 101, 101, 101]);

        let mut ramp = [0; 16];
        for (i, p) in ramp.iter_mut().enumerate() {
            *p = 400 + (i as i32 >= 8) as i32 * 4;
        }
        filter_edge(&mut ramp, FilterSize::Sixteen, &t, BitDepth::Depth10);
        assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ramp[0], 400);
        assert_eq!(ramp[15], 404);
        assert_eq!(ramp[7], 402);
    }

    #[test]
    fn edges_above_the_limit_are_kept() {
        let t = Thresholds {
            lim: 2,
            mblim: 8,
            hev_thr: 0,
        };
        let mut px = [100; 16];
        px[8..].fill(140);
        let before = px;

        filter_edge(&mut px, FilterSize::Sixteen, &t, BitDepth::Depth8);
        assert_eq!(px, before);
    }

    fn blocky_surface() -> Surface {
        let mut surface = Surface::new(128, 128, BitDepth::Depth8, true, true).unwrap();
        for plane in surface.planes.iter_mut() {
            let stride = plane.stride;
            for (i, px) in plane.data.iter_mut().enumerate() {
                let (x, y) = (i % stride, i / stride);
                *px = 100 + (((x / 8) + (y / 8)) % 2) as u16 * 3;
            }
        }
        surface
    }

    #[test]
    fn level_zero_leaves_the_frame_untouched() {
        let hdr = header(128, 128, 0);
        let grid = grid_of(&hdr, ModeInfo::default());
        let mut surface = blocky_surface();
        let before = surface.clone();

        filter_frame(&mut surface, &grid, &hdr, 1, 1);
        assert_eq!(surface, before);
    }

    #[test]
    fn parallel_rows_match_sequential() {
        let hdr = header(128, 128, 20);
        let mi = ModeInfo {
            sb_type: BlockSize::Block8x8,
            tx_size: TxSize::Tx8x8,
            ..Default::default()
        };
        let grid = grid_of(&hdr, mi);

        let mut sequential = blocky_surface();
        filter_frame(&mut sequential, &grid, &hdr, 1, 1);
        assert_ne!(sequential, blocky_surface());

        let mut parallel = blocky_surface();
        filter_frame(&mut parallel, &grid, &hdr, 4, 1);
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn row_sync_waits_for_the_row_above() {
        let sync = LfSync::new(2, 3, 1);
        sync.signal(0, 0);
        sync.signal(0, 1);
        // Superblock (1, 0) needs (0, 1) done, which it is.
        sync.wait(1, 0);

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| sync.wait(1, 2));
            sync.signal(0, 2);
            waiter.join().unwrap();
        });
    }
}
