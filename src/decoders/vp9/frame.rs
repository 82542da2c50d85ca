// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoded picture storage and the disjoint views tile workers write through.

use crate::decoders::vp9::parser::BitDepth;
use crate::decoders::vp9::types::MvRef;
use crate::decoders::vp9::types::SB_SIZE;
use crate::decoders::DecodeError;
use crate::plane_copy_16bit;
use crate::plane_copy_8bit;
use crate::Resolution;

/// One plane of samples. The storage covers whole superblocks; `width` and `height` are the
/// visible dimensions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u16>,
    pub stride: usize,
    pub width: usize,
    pub height: usize,
    /// Allocated rows.
    pub rows: usize,
}

impl Plane {
    fn new(width: usize, height: usize, stride: usize, rows: usize, fill: u16) -> Self {
        Self {
            data: vec![fill; stride * rows],
            stride,
            width,
            height,
            rows,
        }
    }

    /// Sample at `(x, y)` with coordinates clamped to the visible area, which replicates the
    /// edge samples outwards.
    pub fn clamped(&self, x: isize, y: isize) -> u16 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.stride + x]
    }

    pub fn row(&self, y: usize) -> &[u16] {
        &self.data[y * self.stride..(y + 1) * self.stride]
    }
}

/// A planar picture with 16-bit sample storage for every bit depth.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub bit_depth: BitDepth,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub planes: [Plane; 3],
}

/// Largest frame area accepted, in pixels.
#[cfg(not(fuzzing))]
const MAX_AREA: u64 = 1 << 32;
#[cfg(fuzzing)]
const MAX_AREA: u64 = 1 << 22;

impl Surface {
    pub fn new(
        width: u32,
        height: u32,
        bit_depth: BitDepth,
        subsampling_x: bool,
        subsampling_y: bool,
    ) -> Result<Self, DecodeError> {
        if width == 0
            || height == 0
            || width > 65536
            || height > 65536
            || u64::from(width) * u64::from(height) > MAX_AREA
        {
            return Err(DecodeError::MemError(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }

        let aligned_w = (width as usize + SB_SIZE - 1) & !(SB_SIZE - 1);
        let aligned_h = (height as usize + SB_SIZE - 1) & !(SB_SIZE - 1);
        let mid = 1u16 << (bit_depth.bits() - 1);

        let luma = Plane::new(width as usize, height as usize, aligned_w, aligned_h, mid);
        let chroma = || {
            Plane::new(
                (width as usize + subsampling_x as usize) >> subsampling_x as usize,
                (height as usize + subsampling_y as usize) >> subsampling_y as usize,
                aligned_w >> subsampling_x as usize,
                aligned_h >> subsampling_y as usize,
                mid,
            )
        };

        Ok(Self {
            width,
            height,
            bit_depth,
            subsampling_x,
            subsampling_y,
            planes: [luma, chroma(), chroma()],
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::from((self.width, self.height))
    }

    /// Subsampling shifts of `plane`.
    pub fn plane_shift(&self, plane: usize) -> (usize, usize) {
        if plane == 0 {
            (0, 0)
        } else {
            (self.subsampling_x as usize, self.subsampling_y as usize)
        }
    }

    /// Whether the surface can be used as a reference by a frame of the given format.
    pub fn same_format(&self, bit_depth: BitDepth, subsampling_x: bool, subsampling_y: bool) -> bool {
        self.bit_depth == bit_depth
            && self.subsampling_x == subsampling_x
            && self.subsampling_y == subsampling_y
    }

    /// Appends the visible samples of the three planes to `dst`. 8-bit streams use one byte per
    /// sample, deeper ones two little-endian bytes.
    pub fn write_planar(&self, dst: &mut Vec<u8>) {
        for plane in &self.planes {
            if self.bit_depth == BitDepth::Depth8 {
                plane_copy_8bit(&plane.data, plane.stride, dst, plane.width, plane.height);
            } else {
                plane_copy_16bit(&plane.data, plane.stride, dst, plane.width, plane.height);
            }
        }
    }

    /// CRC32 of the visible samples in planar layout.
    pub fn crc32(&self) -> u32 {
        let mut planar = vec![];
        self.write_planar(&mut planar);
        crc32fast::hash(&planar)
    }
}

/// Mutable access to the columns `[x0, x1)` of every row of a 2D array.
///
/// Views produced by [`split_columns`] never overlap, which lets tile workers write their
/// part of the frame from different threads.
pub struct ColumnsMut<'a, T> {
    rows: Vec<&'a mut [T]>,
    x0: usize,
}

impl<'a, T> ColumnsMut<'a, T> {
    pub fn x_start(&self) -> usize {
        self.x0
    }

    pub fn x_end(&self) -> usize {
        self.x0 + self.rows.first().map_or(0, |r| r.len())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.rows[y][x - self.x0]
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.rows[y][x - self.x0]
    }

    /// Row `y` starting at absolute column `x`.
    pub fn row_from(&self, x: usize, y: usize) -> &[T] {
        &self.rows[y][x - self.x0..]
    }

    pub fn row_from_mut(&mut self, x: usize, y: usize) -> &mut [T] {
        &mut self.rows[y][x - self.x0..]
    }
}

/// Splits the first `rows` rows of a `stride`-wide array into column views. `bounds` holds the
/// increasing column boundaries, starting at 0 and ending at `stride`.
pub fn split_columns<'a, T>(
    data: &'a mut [T],
    stride: usize,
    rows: usize,
    bounds: &[usize],
) -> Vec<ColumnsMut<'a, T>> {
    let mut views: Vec<ColumnsMut<T>> = bounds
        .windows(2)
        .map(|w| ColumnsMut {
            rows: Vec::with_capacity(rows),
            x0: w[0],
        })
        .collect();

    for row in data.chunks_mut(stride).take(rows) {
        let mut rest = row;
        for (view, w) in views.iter_mut().zip(bounds.windows(2)) {
            let (cols, tail) = rest.split_at_mut(w[1] - w[0]);
            view.rows.push(cols);
            rest = tail;
        }
    }

    views
}

/// Motion vectors and references of every mode-info unit of a frame, used for temporal
/// prediction by the next frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvBuffer {
    pub mi_cols: usize,
    pub mi_rows: usize,
    pub refs: Vec<MvRef>,
}

impl MvBuffer {
    pub fn new(mi_cols: usize, mi_rows: usize) -> Self {
        Self {
            mi_cols,
            mi_rows,
            refs: vec![MvRef::default(); mi_cols * mi_rows],
        }
    }

    pub fn get(&self, mi_col: usize, mi_row: usize) -> &MvRef {
        &self.refs[mi_row * self.mi_cols + mi_col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_is_superblock_aligned() {
        let s = Surface::new(100, 50, BitDepth::Depth8, true, true).unwrap();

        assert_eq!(s.planes[0].stride, 128);
        assert_eq!(s.planes[0].rows, 64);
        assert_eq!((s.planes[1].width, s.planes[1].height), (50, 25));
        assert_eq!(s.planes[1].stride, 64);
        assert!(s.planes[0].data.iter().all(|p| *p == 128));

        let mut planar = vec![];
        s.write_planar(&mut planar);
        assert_eq!(planar.len(), 100 * 50 + 2 * 50 * 25);
        assert_eq!(s.crc32(), crc32fast::hash(&planar));
    }

    #[test]
    fn high_bit_depth_export() {
        let s = Surface::new(4, 4, BitDepth::Depth10, false, false).unwrap();
        let mut planar = vec![];
        s.write_planar(&mut planar);

        assert_eq!(planar.len(), 3 * 16 * 2);
        assert_eq!(&planar[..2], &512u16.to_le_bytes());
    }

    #[test]
    fn invalid_sizes() {
        assert!(Surface::new(0, 16, BitDepth::Depth8, true, true).is_err());
    }

    #[test]
    fn clamped_reads_replicate_edges() {
        let mut s = Surface::new(8, 8, BitDepth::Depth8, true, true).unwrap();
        let stride = s.planes[0].stride;
        s.planes[0].data[7 * stride + 7] = 9;

        assert_eq!(s.planes[0].clamped(20, 30), 9);
        assert_eq!(s.planes[0].clamped(-5, -5), 128);
    }

    #[test]
    fn column_views_are_disjoint() {
        let mut data: Vec<u32> = (0..24).collect();
        let mut views = split_columns(&mut data, 6, 4, &[0, 2, 6]);

        assert_eq!(views.len(), 2);
        assert_eq!((views[1].x_start(), views[1].x_end()), (2, 6));
        assert_eq!(*views[1].get(3, 2), 15);

        *views[0].get_mut(1, 3) = 100;
        views[1].row_from_mut(4, 0)[1] = 200;
        assert_eq!(views[1].row_from(2, 1), &[8, 9, 10, 11]);

        drop(views);
        assert_eq!(data[19], 100);
        assert_eq!(data[5], 200);
    }
}
