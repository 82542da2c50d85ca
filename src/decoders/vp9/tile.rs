// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding of the superblocks of one tile.
//!
//! A tile is decoded by walking the partition tree of each of its superblocks. Every leaf block
//! gets its mode info read, is predicted and then has its residual added. The tile only ever
//! writes inside its own [`TileColumn`], which lets columns be decoded on different threads.

use std::ops::Range;

use log::warn;

use crate::decoders::vp9::bool_decoder::BoolDecoder;
use crate::decoders::vp9::detokenize::block_context;
use crate::decoders::vp9::detokenize::decode_coefs;
use crate::decoders::vp9::detokenize::set_context;
use crate::decoders::vp9::detokenize::BlockKind;
use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::frame::Surface;
use crate::decoders::vp9::idct::clear_coefs;
use crate::decoders::vp9::idct::inverse_transform;
use crate::decoders::vp9::inter;
use crate::decoders::vp9::inter::PlaneBlock;
use crate::decoders::vp9::inter::ScaleFactors;
use crate::decoders::vp9::intra;
use crate::decoders::vp9::modes::BlockPos;
use crate::decoders::vp9::modes::ModeReader;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::ReferenceFrameType;
use crate::decoders::vp9::parser::MAX_SEGMENTS;
use crate::decoders::vp9::parser::REFS_PER_FRAME;
use crate::decoders::vp9::probs::KF_PARTITION_PROBS;
use crate::decoders::vp9::probs::PARTITION_TREE;
use crate::decoders::vp9::quant::Dequant;
use crate::decoders::vp9::types::BlockEdges;
use crate::decoders::vp9::types::BlockSize;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::MvRef;
use crate::decoders::vp9::types::Partition;
use crate::decoders::vp9::types::TxSize;
use crate::decoders::vp9::types::TxType;
use crate::decoders::vp9::types::MAX_PLANES;
use crate::decoders::vp9::types::MI_BLOCK_SIZE;
use crate::decoders::vp9::types::MI_BLOCK_SIZE_LOG2;
use crate::decoders::vp9::types::MI_MASK;
use crate::decoders::vp9::types::MI_SIZE;
use crate::decoders::DecodeError;

/// Entropy contexts of one plane of a superblock, in 4x4 units.
const SB_CONTEXTS: usize = 16;

/// First mode-info unit of tile `idx` when `mis` units are split into `1 << log2` tiles. Tiles
/// always start on a superblock boundary.
pub fn tile_offset(idx: usize, mis: usize, log2: u8) -> usize {
    let sbs = (mis + MI_BLOCK_SIZE - 1) >> MI_BLOCK_SIZE_LOG2;
    let offset = ((idx * sbs) >> log2) << MI_BLOCK_SIZE_LOG2;

    offset.min(mis)
}

/// Size of a plane rounded up to whole 8x8 luma blocks. Intra edges may read this far, past
/// the visible size.
fn aligned_plane_size(hdr: &Header, plane: usize) -> (usize, usize) {
    let (w, h) = (hdr.mi_cols() * MI_SIZE, hdr.mi_rows() * MI_SIZE);
    if plane == 0 {
        (w, h)
    } else {
        let (ss_x, ss_y) = (hdr.subsampling_x as usize, hdr.subsampling_y as usize);
        (w >> ss_x, h >> ss_y)
    }
}

/// A reference frame usable by the current frame.
#[derive(Copy, Clone)]
pub struct RefFrame<'a> {
    pub surface: &'a Surface,
    pub scale: ScaleFactors,
}

/// Frame-wide state the tiles read from.
pub struct FrameState<'a> {
    pub modes: ModeReader<'a>,
    pub dequant: [Dequant; MAX_SEGMENTS],
    /// LAST, GOLDEN and ALTREF, when their size allows prediction from them.
    pub refs: [Option<RefFrame<'a>>; REFS_PER_FRAME],
    /// Whether nonzero padding after the tile data fails the frame.
    pub strict_padding: bool,
}

/// The parts of the frame a column of tiles writes to, along with the entropy and partition
/// contexts of the row above the block being decoded.
pub struct TileColumn<'a> {
    pub mi_col_start: usize,
    pub mi_col_end: usize,
    pub planes: [ColumnsMut<'a, u16>; MAX_PLANES],
    pub grid: ColumnsMut<'a, ModeInfo>,
    pub segment_ids: ColumnsMut<'a, u8>,
    pub mvs: ColumnsMut<'a, MvRef>,
    above_nonzero: [Vec<u8>; MAX_PLANES],
    above_partition: Vec<u8>,
}

impl<'a> TileColumn<'a> {
    pub fn new(
        mi_cols: Range<usize>,
        planes: [ColumnsMut<'a, u16>; MAX_PLANES],
        grid: ColumnsMut<'a, ModeInfo>,
        segment_ids: ColumnsMut<'a, u8>,
        mvs: ColumnsMut<'a, MvRef>,
        subsampling_x: bool,
    ) -> Self {
        let sb_cols = (mi_cols.len() + MI_BLOCK_SIZE - 1) >> MI_BLOCK_SIZE_LOG2;
        let luma = sb_cols * SB_CONTEXTS;
        let chroma = luma >> subsampling_x as usize;

        Self {
            mi_col_start: mi_cols.start,
            mi_col_end: mi_cols.end,
            planes,
            grid,
            segment_ids,
            mvs,
            above_nonzero: [vec![0; luma], vec![0; chroma], vec![0; chroma]],
            above_partition: vec![0; sb_cols * MI_BLOCK_SIZE],
        }
    }
}

/// Private state of a thread decoding tiles.
pub struct TileWorkerState {
    pub counts: FrameCounts,
    left_nonzero: [[u8; SB_CONTEXTS]; MAX_PLANES],
    left_partition: [u8; MI_BLOCK_SIZE],
    coefs: Vec<i32>,
    residual: Vec<i32>,
    token_cache: Vec<u8>,
}

impl Default for TileWorkerState {
    fn default() -> Self {
        let max_coefs = TxSize::Tx32x32.num_coeffs();

        Self {
            counts: Default::default(),
            left_nonzero: Default::default(),
            left_partition: Default::default(),
            coefs: vec![0; max_coefs],
            residual: vec![0; max_coefs],
            token_cache: vec![0; max_coefs],
        }
    }
}

/// Where a block lies in one of the planes.
struct PlaneGeometry {
    ss_x: usize,
    ss_y: usize,
    /// Size of the block in 4x4 units.
    n4_w: usize,
    n4_h: usize,
    /// Part of the block inside the frame, in 4x4 units.
    max_w: usize,
    max_h: usize,
    /// Top left sample.
    x0: usize,
    y0: usize,
    /// First entropy contexts of the block.
    above: usize,
    left: usize,
}

struct TileDecoder<'t, 'f, 'c> {
    frame: &'t FrameState<'f>,
    tile: &'t mut TileColumn<'c>,
    state: &'t mut TileWorkerState,
    bd: BoolDecoder<'t>,
}

impl<'t, 'f, 'c> TileDecoder<'t, 'f, 'c> {
    fn read_partition(
        &mut self,
        mi_row: usize,
        mi_col: usize,
        bsl: usize,
        has_rows: bool,
        has_cols: bool,
    ) -> Result<Partition, DecodeError> {
        let above = (self.tile.above_partition[mi_col - self.tile.mi_col_start] >> bsl) & 1;
        let left = (self.state.left_partition[mi_row & MI_MASK] >> bsl) & 1;
        let ctx = (left * 2 + above) as usize + bsl * 4;

        let modes = &self.frame.modes;
        let probs = if modes.hdr.frame_is_intra() {
            &KF_PARTITION_PROBS[ctx]
        } else {
            &modes.fc.partition[ctx]
        };

        let partition = match (has_rows, has_cols) {
            (true, true) => {
                let value = self.bd.read_tree(&PARTITION_TREE, probs);
                Partition::n(value).ok_or_else(|| {
                    DecodeError::CorruptFrame(format!("invalid partition {}", value))
                })?
            }
            (false, true) if self.bd.read_bool(probs[1]) => Partition::Split,
            (false, true) => Partition::Horz,
            (true, false) if self.bd.read_bool(probs[2]) => Partition::Split,
            (true, false) => Partition::Vert,
            (false, false) => Partition::Split,
        };

        self.state.counts.partition[ctx][partition as usize] += 1;

        Ok(partition)
    }

    fn update_partition_context(
        &mut self,
        mi_row: usize,
        mi_col: usize,
        subsize: BlockSize,
        num_8x8: usize,
    ) {
        let (above, left) = subsize.partition_context();
        let x = mi_col - self.tile.mi_col_start;
        self.tile.above_partition[x..x + num_8x8].fill(above);
        let y = mi_row & MI_MASK;
        self.state.left_partition[y..y + num_8x8].fill(left);
    }

    fn decode_partition(
        &mut self,
        mi_row: usize,
        mi_col: usize,
        bsize: BlockSize,
    ) -> Result<(), DecodeError> {
        let hdr = self.frame.modes.hdr;
        if mi_row >= hdr.mi_rows() || mi_col >= hdr.mi_cols() {
            return Ok(());
        }

        let bsl = bsize.width_mi_log2();
        let num_8x8 = bsize.width_mi();
        let hbs = num_8x8 >> 1;
        let has_rows = mi_row + hbs < hdr.mi_rows();
        let has_cols = mi_col + hbs < hdr.mi_cols();

        let partition = self.read_partition(mi_row, mi_col, bsl, has_rows, has_cols)?;
        let subsize = bsize.subsize(partition).ok_or_else(|| {
            DecodeError::CorruptFrame(format!("{:?} cannot be split as {:?}", bsize, partition))
        })?;

        if hbs == 0 {
            self.decode_block(mi_row, mi_col, subsize)?;
        } else {
            match partition {
                Partition::None => self.decode_block(mi_row, mi_col, subsize)?,
                Partition::Horz => {
                    self.decode_block(mi_row, mi_col, subsize)?;
                    if has_rows {
                        self.decode_block(mi_row + hbs, mi_col, subsize)?;
                    }
                }
                Partition::Vert => {
                    self.decode_block(mi_row, mi_col, subsize)?;
                    if has_cols {
                        self.decode_block(mi_row, mi_col + hbs, subsize)?;
                    }
                }
                Partition::Split => {
                    for (r, c) in [(0, 0), (0, hbs), (hbs, 0), (hbs, hbs)] {
                        self.decode_partition(mi_row + r, mi_col + c, subsize)?;
                    }
                }
            }
        }

        if bsize == BlockSize::Block8x8 || partition != Partition::Split {
            self.update_partition_context(mi_row, mi_col, subsize, num_8x8);
        }

        Ok(())
    }

    fn geometry(&self, plane: usize, pos: &BlockPos, edges: &BlockEdges) -> PlaneGeometry {
        let hdr = self.frame.modes.hdr;
        let (ss_x, ss_y) = if plane == 0 {
            (0, 0)
        } else {
            (hdr.subsampling_x as usize, hdr.subsampling_y as usize)
        };

        // Blocks smaller than 8x8 are reconstructed as a whole 8x8 unit.
        let bsize = pos.bsize.max(BlockSize::Block8x8);
        let n4_w = bsize.width4() >> ss_x;
        let n4_h = bsize.height4() >> ss_y;
        let visible = |n4: usize, edge: i32, ss: usize| {
            if edge < 0 {
                (n4 as i32 + (edge >> (5 + ss))) as usize
            } else {
                n4
            }
        };

        PlaneGeometry {
            ss_x,
            ss_y,
            n4_w,
            n4_h,
            max_w: visible(n4_w, edges.right, ss_x),
            max_h: visible(n4_h, edges.bottom, ss_y),
            x0: (pos.mi_col * MI_SIZE) >> ss_x,
            y0: (pos.mi_row * MI_SIZE) >> ss_y,
            above: ((pos.mi_col - self.tile.mi_col_start) * 2) >> ss_x,
            left: ((pos.mi_row * 2) & (SB_CONTEXTS - 1)) >> ss_y,
        }
    }

    fn reset_skip_context(&mut self, pos: &BlockPos, edges: &BlockEdges) {
        for plane in 0..MAX_PLANES {
            let g = self.geometry(plane, pos, edges);
            self.tile.above_nonzero[plane][g.above..g.above + g.n4_w].fill(0);
            self.state.left_nonzero[plane][g.left..g.left + g.n4_h].fill(0);
        }
    }

    /// Decodes the coefficients of one transform block and adds its residual to the
    /// prediction. Returns the end of block.
    fn reconstruct(
        &mut self,
        mi: &ModeInfo,
        plane: usize,
        g: &PlaneGeometry,
        (row, col): (usize, usize),
        tx_size: TxSize,
        tx_type: TxType,
    ) -> usize {
        let hdr = self.frame.modes.hdr;
        let n4 = tx_size.width4();
        let n = tx_size.num_coeffs();

        let above = &mut self.tile.above_nonzero[plane][g.above + col..g.above + col + n4];
        let left = &mut self.state.left_nonzero[plane][g.left + row..g.left + row + n4];
        let ctx = block_context(above, left);

        let kind = BlockKind {
            tx_size,
            tx_type,
            plane_type: (plane > 0) as usize,
            is_inter: mi.is_inter(),
        };
        let dq = self.frame.dequant[mi.segment_id as usize].plane(plane);
        let eob = decode_coefs(
            &mut self.bd,
            self.frame.modes.fc,
            &mut self.state.counts,
            kind,
            ctx,
            dq,
            hdr.bit_depth,
            &mut self.state.coefs[..n],
            &mut self.state.token_cache,
        );

        set_context(above, eob > 0, g.max_w - col);
        set_context(left, eob > 0, g.max_h - row);

        if eob > 0 {
            let coefs = &mut self.state.coefs[..n];
            let residual = &mut self.state.residual[..n];
            inverse_transform(coefs, residual, tx_size, tx_type, hdr.lossless);

            let size = tx_size.width();
            let max = hdr.bit_depth.max_value();
            let (x, y) = (g.x0 + col * 4, g.y0 + row * 4);
            for (r, res) in residual.chunks(size).enumerate() {
                let dst = &mut self.tile.planes[plane].row_from_mut(x, y + r)[..size];
                for (px, v) in dst.iter_mut().zip(res) {
                    *px = (i32::from(*px) + v).clamp(0, max) as u16;
                }
            }

            clear_coefs(coefs, tx_size, tx_type, eob);
        }

        eob
    }

    fn decode_intra(&mut self, mi: &ModeInfo, pos: &BlockPos, edges: &BlockEdges) {
        let hdr = self.frame.modes.hdr;

        for plane in 0..MAX_PLANES {
            let g = self.geometry(plane, pos, edges);
            let (frame_w, frame_h) = aligned_plane_size(hdr, plane);
            let tx_size = mi.plane_tx_size(plane, g.ss_x != 0, g.ss_y != 0);
            let step = tx_size.width4();

            for row in (0..g.max_h).step_by(step) {
                for col in (0..g.max_w).step_by(step) {
                    let mode = if plane > 0 {
                        mi.uv_mode
                    } else if mi.sb_type.is_sub8x8() {
                        mi.sub_modes[(row << 1) + col]
                    } else {
                        mi.mode
                    };
                    let nb = intra::Neighbors {
                        top: row > 0 || pos.mi_row > 0,
                        left: col > 0 || pos.mi_col > self.tile.mi_col_start,
                        right: col + step < g.n4_w,
                    };

                    intra::predict(
                        &mut self.tile.planes[plane],
                        g.x0 + col * 4,
                        g.y0 + row * 4,
                        tx_size,
                        mode,
                        nb,
                        frame_w,
                        frame_h,
                        hdr.bit_depth.bits(),
                    );

                    if !mi.skip {
                        let tx_type =
                            if plane > 0 || hdr.lossless || tx_size == TxSize::Tx32x32 {
                                TxType::DctDct
                            } else {
                                mode.tx_type()
                            };
                        self.reconstruct(mi, plane, &g, (row, col), tx_size, tx_type);
                    }
                }
            }
        }
    }

    fn reference(&self, ref_frame: ReferenceFrameType) -> Result<RefFrame<'f>, DecodeError> {
        ref_frame
            .index()
            .checked_sub(1)
            .and_then(|i| self.frame.refs.get(i).copied().flatten())
            .ok_or_else(|| {
                DecodeError::UnsupBitstream(format!(
                    "{:?} reference has invalid dimensions",
                    ref_frame
                ))
            })
    }

    fn predict_inter(
        &mut self,
        mi: &ModeInfo,
        pos: &BlockPos,
        edges: &BlockEdges,
    ) -> Result<(), DecodeError> {
        let bits = self.frame.modes.hdr.bit_depth.bits();
        let kernel = inter::kernels(mi.interp_filter);
        let refs = 1 + mi.is_compound() as usize;

        for plane in 0..MAX_PLANES {
            let g = self.geometry(plane, pos, edges);
            let block = PlaneBlock {
                edges: *edges,
                ss_x: g.ss_x,
                ss_y: g.ss_y,
                width: 4 * g.n4_w,
                height: 4 * g.n4_h,
                mi_x: (pos.mi_col * MI_SIZE) as i32,
                mi_y: (pos.mi_row * MI_SIZE) as i32,
            };

            for which in 0..refs {
                let rf = self.reference(mi.ref_frame[which])?;
                let reference = &rf.surface.planes[plane];
                let dst = &mut self.tile.planes[plane];
                let average = which == 1;

                if mi.sb_type.is_sub8x8() {
                    // Subsampled planes walk the sub-blocks in order, whatever their layout.
                    let mut block_idx = 0;
                    for y in 0..g.n4_h {
                        for x in 0..g.n4_w {
                            let mv = inter::sub8x8_plane_mv(
                                mi,
                                which,
                                block_idx,
                                g.ss_x != 0,
                                g.ss_y != 0,
                            );
                            inter::predict(
                                dst,
                                reference,
                                &rf.scale,
                                kernel,
                                &block,
                                (4 * x, 4 * y),
                                (4, 4),
                                mv,
                                average,
                                bits,
                            );
                            block_idx += 1;
                        }
                    }
                } else {
                    inter::predict(
                        dst,
                        reference,
                        &rf.scale,
                        kernel,
                        &block,
                        (0, 0),
                        (block.width, block.height),
                        mi.mv[which],
                        average,
                        bits,
                    );
                }
            }
        }

        Ok(())
    }

    /// Adds the residual of an inter block. Returns the sum of the end of block positions.
    fn reconstruct_inter(&mut self, mi: &ModeInfo, pos: &BlockPos, edges: &BlockEdges) -> usize {
        let mut eob_total = 0;

        for plane in 0..MAX_PLANES {
            let g = self.geometry(plane, pos, edges);
            let tx_size = mi.plane_tx_size(plane, g.ss_x != 0, g.ss_y != 0);
            let step = tx_size.width4();

            for row in (0..g.max_h).step_by(step) {
                for col in (0..g.max_w).step_by(step) {
                    eob_total +=
                        self.reconstruct(mi, plane, &g, (row, col), tx_size, TxType::DctDct);
                }
            }
        }

        eob_total
    }

    /// Records the final mode info of a block for its neighbors, the loop filter and the next
    /// frame.
    fn store(&mut self, mi: &ModeInfo, pos: &BlockPos) {
        let hdr = self.frame.modes.hdr;
        let x_mis = pos.bsize.width_mi().min(hdr.mi_cols() - pos.mi_col);
        let y_mis = pos.bsize.height_mi().min(hdr.mi_rows() - pos.mi_row);
        let mv_ref = MvRef {
            ref_frame: mi.ref_frame,
            mv: mi.mv,
        };

        for row in pos.mi_row..pos.mi_row + y_mis {
            self.tile.grid.row_from_mut(pos.mi_col, row)[..x_mis].fill(*mi);
            self.tile.mvs.row_from_mut(pos.mi_col, row)[..x_mis].fill(mv_ref);
        }
    }

    fn decode_block(
        &mut self,
        mi_row: usize,
        mi_col: usize,
        bsize: BlockSize,
    ) -> Result<(), DecodeError> {
        let hdr = self.frame.modes.hdr;
        let (ss_x, ss_y) = (hdr.subsampling_x, hdr.subsampling_y);
        if !bsize.is_sub8x8() && (ss_x || ss_y) && bsize.plane_size(ss_x, ss_y).is_none() {
            return Err(DecodeError::CorruptFrame(format!(
                "invalid block size {:?} for the chroma subsampling",
                bsize
            )));
        }

        let pos = BlockPos {
            mi_row,
            mi_col,
            bsize,
        };
        let mut mi = self.frame.modes.read(
            &mut self.bd,
            &mut self.state.counts,
            &self.tile.grid,
            &mut self.tile.segment_ids,
            &pos,
        )?;
        let edges = BlockEdges::new(mi_row, mi_col, bsize, hdr.mi_rows(), hdr.mi_cols());

        if mi.skip {
            self.reset_skip_context(&pos, &edges);
        }

        if !mi.is_inter() {
            self.decode_intra(&mi, &pos, &edges);
        } else {
            self.predict_inter(&mi, &pos, &edges)?;

            if !mi.skip {
                let eob_total = self.reconstruct_inter(&mi, &pos, &edges);
                // Blocks without residual are filtered like skipped ones.
                if !bsize.is_sub8x8() && eob_total == 0 {
                    mi.skip = true;
                }
            }
        }

        self.store(&mi, &pos);

        Ok(())
    }
}

/// Decodes the tile made of the superblock rows `mi_rows` of `tile` from `data`.
///
/// Reading past the end of `data` does not stop decoding right away; it fails the tile once the
/// current superblock row is complete.
pub fn decode_tile(
    frame: &FrameState,
    tile: &mut TileColumn,
    state: &mut TileWorkerState,
    data: &[u8],
    mi_rows: Range<usize>,
) -> Result<(), DecodeError> {
    let bd = BoolDecoder::new(data)
        .map_err(|e| DecodeError::CorruptFrame(format!("tile data: {}", e)))?;
    let mut dec = TileDecoder {
        frame,
        tile,
        state,
        bd,
    };

    for mi_row in mi_rows.step_by(MI_BLOCK_SIZE) {
        dec.state.left_nonzero = Default::default();
        dec.state.left_partition = Default::default();

        for mi_col in (dec.tile.mi_col_start..dec.tile.mi_col_end).step_by(MI_BLOCK_SIZE) {
            dec.decode_partition(mi_row, mi_col, BlockSize::Block64x64)?;
        }

        if dec.bd.has_error() {
            return Err(DecodeError::CorruptFrame(format!(
                "tile data ends in superblock row {}",
                mi_row >> MI_BLOCK_SIZE_LOG2
            )));
        }
    }

    if !dec.bd.padding_is_zero() {
        if frame.strict_padding {
            return Err(DecodeError::CorruptFrame(
                "nonzero padding after tile data".into(),
            ));
        }
        warn!("nonzero padding after tile data");
    }

    Ok(())
}
