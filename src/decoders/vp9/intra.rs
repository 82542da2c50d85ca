// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Intra prediction of one transform block.

use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::types::PredictionMode;
use crate::decoders::vp9::types::TxSize;

/// Which neighbors of a transform block may be used for prediction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub top: bool,
    pub left: bool,
    /// Whether the above-right samples belong to the same block. Only 4x4 transforms use them.
    pub right: bool,
}

fn avg2(a: u16, b: u16) -> u16 {
    ((u32::from(a) + u32::from(b) + 1) >> 1) as u16
}

fn avg3(a: u16, b: u16, c: u16) -> u16 {
    ((u32::from(a) + 2 * u32::from(b) + u32::from(c) + 2) >> 2) as u16
}

/// Edge samples of a block: `above[0]` is the above-left corner, followed by `2 * size` above
/// samples. Missing samples are replaced with fixed values around mid-gray.
struct Edges {
    above: [u16; 65],
    left: [u16; 32],
}

impl Edges {
    fn above(&self, i: isize) -> u16 {
        self.above[(i + 1) as usize]
    }
}

fn needs_left(mode: PredictionMode) -> bool {
    !matches!(mode, PredictionMode::V | PredictionMode::D45 | PredictionMode::D63)
}

fn needs_above(mode: PredictionMode) -> bool {
    !matches!(mode, PredictionMode::H | PredictionMode::D207)
}

fn needs_above_right(mode: PredictionMode) -> bool {
    matches!(mode, PredictionMode::D45 | PredictionMode::D63)
}

#[allow(clippy::too_many_arguments)]
fn build_edges(
    plane: &ColumnsMut<u16>,
    x: usize,
    y: usize,
    size: usize,
    mode: PredictionMode,
    nb: Neighbors,
    frame_w: usize,
    frame_h: usize,
    bit_depth: u32,
) -> Edges {
    let base = 128u16 << (bit_depth - 8);
    let mut edges = Edges {
        above: [base - 1; 65],
        left: [base + 1; 32],
    };

    if needs_left(mode) && nb.left {
        let avail = size.min(frame_h.saturating_sub(y)).max(1);
        for i in 0..size {
            edges.left[i] = *plane.get(x - 1, y + i.min(avail - 1));
        }
    }

    if needs_above(mode) || needs_above_right(mode) {
        if nb.top {
            let wanted = if needs_above_right(mode) { 2 * size } else { size };
            let readable = if needs_above_right(mode) && nb.right && size == 4 {
                2 * size
            } else {
                size
            };
            let avail = readable.min(frame_w.saturating_sub(x)).max(1);
            let row = plane.row_from(x, y - 1);
            edges.above[1..1 + avail].copy_from_slice(&row[..avail]);
            let last = edges.above[avail];
            edges.above[1 + avail..1 + wanted].fill(last);

            edges.above[0] = if nb.left {
                *plane.get(x - 1, y - 1)
            } else {
                base + 1
            };
        } else {
            edges.above[..1 + 2 * size].fill(base - 1);
        }
    }

    edges
}

fn dc_value(edges: &Edges, size: usize, nb: Neighbors, bit_depth: u32) -> u16 {
    let above = || edges.above[1..1 + size].iter().map(|v| u32::from(*v)).sum::<u32>();
    let left = || edges.left[..size].iter().map(|v| u32::from(*v)).sum::<u32>();
    let n = size as u32;

    let v = match (nb.top, nb.left) {
        (true, true) => (above() + left() + n) / (2 * n),
        (true, false) => (above() + n / 2) / n,
        (false, true) => (left() + n / 2) / n,
        (false, false) => 1 << (bit_depth - 1),
    };

    v as u16
}

/// Predicts the `tx_size` block at `(x, y)` of `plane` from its reconstructed neighbors.
///
/// `frame_w` and `frame_h` bound the samples that may be read. Edge samples past them are
/// replicated from the last readable one.
#[allow(clippy::too_many_arguments)]
pub fn predict(
    plane: &mut ColumnsMut<u16>,
    x: usize,
    y: usize,
    tx_size: TxSize,
    mode: PredictionMode,
    nb: Neighbors,
    frame_w: usize,
    frame_h: usize,
    bit_depth: u32,
) {
    use PredictionMode::*;

    let size = tx_size.width();
    let edges = build_edges(plane, x, y, size, mode, nb, frame_w, frame_h, bit_depth);
    let a = |i: isize| edges.above(i);
    let l = |i: usize| edges.left[i];
    let max = (1u32 << bit_depth) - 1;

    let mut pred = [0u16; 32 * 32];
    {
        let mut set = |i: usize, j: usize, v: u16| pred[i * size + j] = v;

        match mode {
            Dc => {
                let v = dc_value(&edges, size, nb, bit_depth);
                for i in 0..size {
                    for j in 0..size {
                        set(i, j, v);
                    }
                }
            }
            V => {
                for i in 0..size {
                    for j in 0..size {
                        set(i, j, a(j as isize));
                    }
                }
            }
            H => {
                for i in 0..size {
                    for j in 0..size {
                        set(i, j, l(i));
                    }
                }
            }
            Tm => {
                for i in 0..size {
                    for j in 0..size {
                        let v = i32::from(l(i)) + i32::from(a(j as isize)) - i32::from(a(-1));
                        set(i, j, v.clamp(0, max as i32) as u16);
                    }
                }
            }
            D45 => {
                for i in 0..size {
                    for j in 0..size {
                        let k = (i + j) as isize;
                        let v = if i + j + 2 < 2 * size {
                            avg3(a(k), a(k + 1), a(k + 2))
                        } else {
                            a(2 * size as isize - 1)
                        };
                        set(i, j, v);
                    }
                }
            }
            D63 => {
                for i in 0..size {
                    let i2 = (i / 2) as isize;
                    for j in 0..size {
                        let k = i2 + j as isize;
                        let v = if i & 1 != 0 {
                            avg3(a(k), a(k + 1), a(k + 2))
                        } else {
                            avg2(a(k), a(k + 1))
                        };
                        set(i, j, v);
                    }
                }
            }
            _ => {}
        }
    }

    // The remaining directional modes propagate from already predicted samples.
    match mode {
        D117 => {
            for j in 0..size {
                pred[j] = avg2(a(j as isize - 1), a(j as isize));
            }
            pred[size] = avg3(l(0), a(-1), a(0));
            for j in 1..size {
                pred[size + j] = avg3(a(j as isize - 2), a(j as isize - 1), a(j as isize));
            }
            if size > 2 {
                pred[2 * size] = avg3(a(-1), l(0), l(1));
            }
            for i in 3..size {
                pred[i * size] = avg3(l(i - 3), l(i - 2), l(i - 1));
            }
            for i in 2..size {
                for j in 1..size {
                    pred[i * size + j] = pred[(i - 2) * size + j - 1];
                }
            }
        }
        D135 => {
            pred[0] = avg3(l(0), a(-1), a(0));
            for j in 1..size {
                pred[j] = avg3(a(j as isize - 2), a(j as isize - 1), a(j as isize));
            }
            pred[size] = avg3(a(-1), l(0), l(1));
            for i in 2..size {
                pred[i * size] = avg3(l(i - 2), l(i - 1), l(i));
            }
            for i in 1..size {
                for j in 1..size {
                    pred[i * size + j] = pred[(i - 1) * size + j - 1];
                }
            }
        }
        D153 => {
            pred[0] = avg2(l(0), a(-1));
            for i in 1..size {
                pred[i * size] = avg2(l(i - 1), l(i));
            }
            pred[1] = avg3(l(0), a(-1), a(0));
            pred[size + 1] = avg3(a(-1), l(0), l(1));
            for i in 2..size {
                pred[i * size + 1] = avg3(l(i - 2), l(i - 1), l(i));
            }
            for j in 2..size {
                pred[j] = avg3(a(j as isize - 3), a(j as isize - 2), a(j as isize - 1));
            }
            for i in 1..size {
                for j in 2..size {
                    pred[i * size + j] = pred[(i - 1) * size + j - 2];
                }
            }
        }
        D207 => {
            for j in 0..size {
                pred[(size - 1) * size + j] = l(size - 1);
            }
            for i in 0..size - 1 {
                pred[i * size] = avg2(l(i), l(i + 1));
            }
            for i in 0..size.saturating_sub(2) {
                pred[i * size + 1] = avg3(l(i), l(i + 1), l(i + 2));
            }
            pred[(size - 2) * size + 1] = avg3(l(size - 2), l(size - 1), l(size - 1));
            for i in (0..size - 1).rev() {
                for j in 2..size {
                    pred[i * size + j] = pred[(i + 1) * size + j - 2];
                }
            }
        }
        _ => {}
    }

    for (i, row) in pred.chunks(size).take(size).enumerate() {
        plane.row_from_mut(x, y + i)[..size].copy_from_slice(row);
    }
}
