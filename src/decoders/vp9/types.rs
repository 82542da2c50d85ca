// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Block-level types shared by the mode decoder, the reconstruction and the loop filter.

use enumn::N;

use crate::decoders::vp9::parser::InterpolationFilter;
use crate::decoders::vp9::parser::ReferenceFrameType;

/// Size of a mode-info unit in pixels.
pub const MI_SIZE: usize = 8;
pub const MI_SIZE_LOG2: usize = 3;
/// Number of mode-info units per superblock side.
pub const MI_BLOCK_SIZE: usize = 8;
pub const MI_BLOCK_SIZE_LOG2: usize = 3;
pub const MI_MASK: usize = MI_BLOCK_SIZE - 1;

pub const SB_SIZE: usize = 64;

pub const MAX_PLANES: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, N, Default)]
pub enum BlockSize {
    Block4x4 = 0,
    Block4x8 = 1,
    Block8x4 = 2,
    #[default]
    Block8x8 = 3,
    Block8x16 = 4,
    Block16x8 = 5,
    Block16x16 = 6,
    Block16x32 = 7,
    Block32x16 = 8,
    Block32x32 = 9,
    Block32x64 = 10,
    Block64x32 = 11,
    Block64x64 = 12,
}

pub const BLOCK_SIZES: usize = 13;

const B_WIDTH_LOG2: [u8; BLOCK_SIZES] = [0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4];
const B_HEIGHT_LOG2: [u8; BLOCK_SIZES] = [0, 1, 0, 1, 2, 1, 2, 3, 2, 3, 4, 3, 4];
const MI_WIDTH_LOG2: [u8; BLOCK_SIZES] = [0, 0, 0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3];
const MI_HEIGHT_LOG2: [u8; BLOCK_SIZES] = [0, 0, 0, 0, 1, 0, 1, 2, 1, 2, 3, 2, 3];
const SIZE_GROUP: [u8; BLOCK_SIZES] = [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 3];

/// Above and left partition context values written after decoding a block of each size.
const PARTITION_CONTEXT: [(u8, u8); BLOCK_SIZES] = [
    (15, 15),
    (15, 14),
    (14, 15),
    (14, 14),
    (14, 12),
    (12, 14),
    (12, 12),
    (12, 8),
    (8, 12),
    (8, 8),
    (8, 0),
    (0, 8),
    (0, 0),
];

impl BlockSize {
    /// log2 of the width in 4x4 units.
    pub const fn width_log2(self) -> usize {
        B_WIDTH_LOG2[self as usize] as usize
    }

    /// log2 of the height in 4x4 units.
    pub const fn height_log2(self) -> usize {
        B_HEIGHT_LOG2[self as usize] as usize
    }

    /// Width in 4x4 units.
    pub const fn width4(self) -> usize {
        1 << self.width_log2()
    }

    /// Height in 4x4 units.
    pub const fn height4(self) -> usize {
        1 << self.height_log2()
    }

    /// Width in mode-info units, at least 1.
    pub const fn width_mi(self) -> usize {
        1 << MI_WIDTH_LOG2[self as usize]
    }

    /// Height in mode-info units, at least 1.
    pub const fn height_mi(self) -> usize {
        1 << MI_HEIGHT_LOG2[self as usize]
    }

    pub const fn width_mi_log2(self) -> usize {
        MI_WIDTH_LOG2[self as usize] as usize
    }

    pub const fn size_group(self) -> usize {
        SIZE_GROUP[self as usize] as usize
    }

    pub const fn partition_context(self) -> (u8, u8) {
        PARTITION_CONTEXT[self as usize]
    }

    /// Largest transform that fits in the block.
    pub fn max_tx_size(self) -> TxSize {
        let min_log2 = self.width_log2().min(self.height_log2());
        TxSize::from_log2(min_log2)
    }

    pub fn is_sub8x8(self) -> bool {
        self < BlockSize::Block8x8
    }

    /// Returns the block size of a square `bsize` once split by `partition`, if such a block
    /// exists.
    pub fn subsize(self, partition: Partition) -> Option<BlockSize> {
        use BlockSize::*;

        match partition {
            Partition::None => Some(self),
            Partition::Horz => match self {
                Block8x8 => Some(Block8x4),
                Block16x16 => Some(Block16x8),
                Block32x32 => Some(Block32x16),
                Block64x64 => Some(Block64x32),
                _ => None,
            },
            Partition::Vert => match self {
                Block8x8 => Some(Block4x8),
                Block16x16 => Some(Block8x16),
                Block32x32 => Some(Block16x32),
                Block64x64 => Some(Block32x64),
                _ => None,
            },
            Partition::Split => match self {
                Block8x8 => Some(Block4x4),
                Block16x16 => Some(Block8x8),
                Block32x32 => Some(Block16x16),
                Block64x64 => Some(Block32x32),
                _ => None,
            },
        }
    }

    /// Block size of a subsampled plane, or `None` when the plane block would be narrower than
    /// 4 samples in one direction and taller in the other.
    pub fn plane_size(self, ss_x: bool, ss_y: bool) -> Option<BlockSize> {
        let w = self.width_log2() as isize - ss_x as isize;
        let h = self.height_log2() as isize - ss_y as isize;

        match (w.max(0), h.max(0)) {
            (0, 0) => Some(BlockSize::Block4x4),
            (0, 1) => Some(BlockSize::Block4x8),
            (1, 0) => Some(BlockSize::Block8x4),
            (1, 1) => Some(BlockSize::Block8x8),
            (1, 2) => Some(BlockSize::Block8x16),
            (2, 1) => Some(BlockSize::Block16x8),
            (2, 2) => Some(BlockSize::Block16x16),
            (2, 3) => Some(BlockSize::Block16x32),
            (3, 2) => Some(BlockSize::Block32x16),
            (3, 3) => Some(BlockSize::Block32x32),
            (3, 4) => Some(BlockSize::Block32x64),
            (4, 3) => Some(BlockSize::Block64x32),
            (4, 4) => Some(BlockSize::Block64x64),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N)]
pub enum Partition {
    None = 0,
    Horz = 1,
    Vert = 2,
    Split = 3,
}

pub const PARTITION_TYPES: usize = 4;
pub const PARTITION_CONTEXTS: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, N, Default)]
pub enum TxSize {
    #[default]
    Tx4x4 = 0,
    Tx8x8 = 1,
    Tx16x16 = 2,
    Tx32x32 = 3,
}

pub const TX_SIZES: usize = 4;

impl TxSize {
    pub fn from_log2(log2: usize) -> Self {
        match log2 {
            0 => TxSize::Tx4x4,
            1 => TxSize::Tx8x8,
            2 => TxSize::Tx16x16,
            _ => TxSize::Tx32x32,
        }
    }

    /// Side in 4x4 units.
    pub const fn width4(self) -> usize {
        1 << self as usize
    }

    /// Side in pixels.
    pub const fn width(self) -> usize {
        4 << self as usize
    }

    pub const fn num_coeffs(self) -> usize {
        16 << (2 * self as usize)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N, Default)]
pub enum TxMode {
    #[default]
    Only4x4 = 0,
    Allow8x8 = 1,
    Allow16x16 = 2,
    Allow32x32 = 3,
    Select = 4,
}

impl TxMode {
    /// Largest transform allowed by the mode.
    pub fn max_tx_size(self) -> TxSize {
        match self {
            TxMode::Only4x4 => TxSize::Tx4x4,
            TxMode::Allow8x8 => TxSize::Tx8x8,
            TxMode::Allow16x16 => TxSize::Tx16x16,
            TxMode::Allow32x32 | TxMode::Select => TxSize::Tx32x32,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, N, Default)]
pub enum TxType {
    #[default]
    DctDct = 0,
    /// ADST in the vertical direction, DCT in the horizontal one.
    AdstDct = 1,
    /// DCT in the vertical direction, ADST in the horizontal one.
    DctAdst = 2,
    AdstAdst = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, N, Default)]
pub enum PredictionMode {
    #[default]
    Dc = 0,
    V = 1,
    H = 2,
    D45 = 3,
    D135 = 4,
    D117 = 5,
    D153 = 6,
    D207 = 7,
    D63 = 8,
    Tm = 9,
    NearestMv = 10,
    NearMv = 11,
    ZeroMv = 12,
    NewMv = 13,
}

pub const INTRA_MODES: usize = 10;
pub const INTER_MODES: usize = 4;

impl PredictionMode {
    pub fn is_inter(self) -> bool {
        self >= PredictionMode::NearestMv
    }

    /// Offset of an inter mode within the inter mode tree.
    pub fn inter_offset(self) -> usize {
        self as usize - PredictionMode::NearestMv as usize
    }

    /// Transform type used by intra blocks predicted with this mode.
    pub fn tx_type(self) -> TxType {
        use PredictionMode::*;

        match self {
            V | D117 | D63 => TxType::AdstDct,
            H | D153 | D207 => TxType::DctAdst,
            D135 | Tm => TxType::AdstAdst,
            _ => TxType::DctDct,
        }
    }
}

/// A motion vector in 1/8th pel units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Mv {
    pub row: i16,
    pub col: i16,
}

impl Mv {
    pub const fn new(row: i16, col: i16) -> Self {
        Self { row, col }
    }

    pub fn is_zero(&self) -> bool {
        self.row == 0 && self.col == 0
    }
}

/// Decoded state of one mode-info unit. Every 8x8 unit covered by a block holds a copy of the
/// block's info.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModeInfo {
    pub sb_type: BlockSize,
    /// Luma mode. For blocks smaller than 8x8 this is the mode of the last 4x4 sub-block.
    pub mode: PredictionMode,
    pub uv_mode: PredictionMode,
    /// Per 4x4 sub-block modes, in raster order. Equal to `mode` for larger blocks.
    pub sub_modes: [PredictionMode; 4],
    pub ref_frame: [ReferenceFrameType; 2],
    /// Block motion vectors. For blocks smaller than 8x8 these are the last sub-block's.
    pub mv: [Mv; 2],
    /// Per 4x4 sub-block motion vectors, in raster order.
    pub sub_mvs: [[Mv; 2]; 4],
    pub tx_size: TxSize,
    pub skip: bool,
    pub segment_id: u8,
    /// Whether the segment id was taken from the previous segmentation map.
    pub seg_id_predicted: bool,
    pub interp_filter: InterpolationFilter,
}

impl Default for ModeInfo {
    fn default() -> Self {
        Self {
            sb_type: BlockSize::Block64x64,
            mode: PredictionMode::Dc,
            uv_mode: PredictionMode::Dc,
            sub_modes: [PredictionMode::Dc; 4],
            ref_frame: [ReferenceFrameType::Intra, ReferenceFrameType::None],
            mv: Default::default(),
            sub_mvs: Default::default(),
            tx_size: TxSize::Tx4x4,
            skip: false,
            segment_id: 0,
            seg_id_predicted: false,
            interp_filter: InterpolationFilter::EightTap,
        }
    }
}

impl ModeInfo {
    pub fn is_inter(&self) -> bool {
        self.ref_frame[0] > ReferenceFrameType::Intra
    }

    pub fn is_compound(&self) -> bool {
        self.ref_frame[1] > ReferenceFrameType::Intra
    }

    /// Motion vector of sub-block `block` for reference `which`.
    pub fn sub_block_mv(&self, which: usize, block: Option<usize>) -> Mv {
        match block {
            Some(b) if self.sb_type.is_sub8x8() => self.sub_mvs[b][which],
            _ => self.mv[which],
        }
    }

    /// Luma transform size for plane 0 and the chroma transform size for other planes.
    pub fn plane_tx_size(&self, plane: usize, ss_x: bool, ss_y: bool) -> TxSize {
        if plane == 0 {
            return self.tx_size;
        }

        if self.sb_type.is_sub8x8() {
            return TxSize::Tx4x4;
        }

        let w = self.sb_type.width_log2() - ss_x as usize;
        let h = self.sb_type.height_log2() - ss_y as usize;
        self.tx_size.min(TxSize::from_log2(w.min(h)))
    }
}

/// Distances from a block to the edges of the mode-info grid in 1/8th pel. The left and top
/// distances are negative or zero, the right and bottom ones are negative when the block
/// crosses the edge.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockEdges {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl BlockEdges {
    pub fn new(
        mi_row: usize,
        mi_col: usize,
        bsize: BlockSize,
        mi_rows: usize,
        mi_cols: usize,
    ) -> Self {
        let eighths = |mi: isize| (mi * MI_SIZE as isize * 8) as i32;

        Self {
            left: -eighths(mi_col as isize),
            right: eighths(mi_cols as isize - bsize.width_mi() as isize - mi_col as isize),
            top: -eighths(mi_row as isize),
            bottom: eighths(mi_rows as isize - bsize.height_mi() as isize - mi_row as isize),
        }
    }
}

/// Per-frame motion vector record kept for temporal prediction by the next frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MvRef {
    pub ref_frame: [ReferenceFrameType; 2],
    pub mv: [Mv; 2],
}

impl Default for MvRef {
    fn default() -> Self {
        Self {
            ref_frame: [ReferenceFrameType::None, ReferenceFrameType::None],
            mv: Default::default(),
        }
    }
}
