// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Splitting of the frame data into tiles and distribution of the tiles over worker threads.

use byteorder::BigEndian;
use byteorder::ByteOrder;
use log::debug;

use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::frame::split_columns;
use crate::decoders::vp9::frame::ColumnsMut;
use crate::decoders::vp9::frame::Plane;
use crate::decoders::vp9::frame::Surface;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::tile::decode_tile;
use crate::decoders::vp9::tile::tile_offset;
use crate::decoders::vp9::tile::FrameState;
use crate::decoders::vp9::tile::TileColumn;
use crate::decoders::vp9::tile::TileWorkerState;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::MvRef;
use crate::decoders::vp9::types::MI_SIZE;
use crate::decoders::DecodeError;

/// Size of the length prefix of every tile but the last one.
const TILE_SIZE_BYTES: usize = 4;

/// Everything the tiles of a frame write to.
pub struct FrameBuffers<'a> {
    pub surface: &'a mut Surface,
    /// Mode info of every mode-info unit, `mi_cols` per row.
    pub grid: &'a mut [ModeInfo],
    pub segment_ids: &'a mut [u8],
    pub mvs: &'a mut [MvRef],
}

/// Splits `data` into the buffers of the `tile_rows` x `tile_cols` tiles, in raster order.
pub fn tile_buffers(
    mut data: &[u8],
    tile_rows: usize,
    tile_cols: usize,
) -> Result<Vec<&[u8]>, DecodeError> {
    let count = tile_rows * tile_cols;
    let mut buffers = Vec::with_capacity(count);

    for i in 0..count {
        if i == count - 1 {
            buffers.push(data);
            break;
        }

        if data.len() < TILE_SIZE_BYTES {
            return Err(DecodeError::CorruptFrame(format!(
                "truncated packet or corrupt tile length for tile {}",
                i
            )));
        }
        let size = BigEndian::read_u32(data) as usize;
        data = &data[TILE_SIZE_BYTES..];
        if size > data.len() {
            return Err(DecodeError::CorruptFrame(format!(
                "tile {} claims {} bytes, only {} left",
                i,
                size,
                data.len()
            )));
        }

        let (tile, rest) = data.split_at(size);
        buffers.push(tile);
        data = rest;
    }

    Ok(buffers)
}

fn plane_columns<'a>(
    plane: &'a mut Plane,
    mi_bounds: &[usize],
    ss_x: bool,
) -> Vec<ColumnsMut<'a, u16>> {
    let mut bounds: Vec<usize> = mi_bounds
        .iter()
        .map(|mi| (mi * MI_SIZE) >> ss_x as usize)
        .collect();
    // The last column also owns the storage past the visible width.
    if let Some(last) = bounds.last_mut() {
        *last = plane.stride;
    }

    split_columns(&mut plane.data, plane.stride, plane.rows, &bounds)
}

/// Splits the frame buffers into one disjoint view per tile column.
fn tile_columns<'a>(hdr: &Header, bufs: FrameBuffers<'a>) -> Vec<TileColumn<'a>> {
    let (mi_cols, mi_rows) = (hdr.mi_cols(), hdr.mi_rows());
    let tile_cols = 1 << hdr.tile_cols_log2;
    let mi_bounds: Vec<usize> = (0..=tile_cols)
        .map(|i| tile_offset(i, mi_cols, hdr.tile_cols_log2))
        .collect();

    let FrameBuffers {
        surface,
        grid,
        segment_ids,
        mvs,
    } = bufs;
    let [y, u, v] = &mut surface.planes;
    let ys = plane_columns(y, &mi_bounds, false);
    let us = plane_columns(u, &mi_bounds, hdr.subsampling_x);
    let vs = plane_columns(v, &mi_bounds, hdr.subsampling_x);
    let grids = split_columns(grid, mi_cols, mi_rows, &mi_bounds);
    let segment_ids = split_columns(segment_ids, mi_cols, mi_rows, &mi_bounds);
    let mvs = split_columns(mvs, mi_cols, mi_rows, &mi_bounds);

    ys.into_iter()
        .zip(us)
        .zip(vs)
        .zip(grids)
        .zip(segment_ids)
        .zip(mvs)
        .zip(mi_bounds.windows(2))
        .map(|((((((y, u), v), grid), seg), mvs), w)| {
            TileColumn::new(w[0]..w[1], [y, u, v], grid, seg, mvs, hdr.subsampling_x)
        })
        .collect()
}

/// Assigns tile columns to `workers` threads. Every worker gets a contiguous run of the columns
/// ordered so the work is balanced by data size.
fn schedule(sizes: &[usize], workers: usize) -> Vec<Vec<usize>> {
    let tile_cols = sizes.len();
    let mut order: Vec<usize> = (0..tile_cols).collect();
    order.sort_by(|a, b| sizes[*b].cmp(&sizes[*a]));

    if workers == tile_cols {
        // The largest tile goes to the last worker.
        order.rotate_left(1);
    } else {
        let mut start = 0;
        let mut end = tile_cols as isize - 2;
        while (start as isize) < end {
            order.swap(start, end as usize);
            start += 2;
            end -= 2;
        }
    }

    let base = tile_cols / workers;
    let remain = tile_cols % workers;
    let mut runs = Vec::with_capacity(workers);
    let mut first = 0;
    for n in 0..workers {
        let count = base + (remain + n) / workers;
        runs.push(order[first..first + count].to_vec());
        first += count;
    }

    runs
}

fn decode_parallel(
    frame: &FrameState,
    columns: Vec<TileColumn>,
    buffers: &[&[u8]],
    threads: usize,
) -> Result<FrameCounts, DecodeError> {
    let hdr = frame.modes.hdr;
    let workers = threads.min(columns.len());
    let sizes: Vec<usize> = buffers.iter().map(|b| b.len()).collect();
    let runs = schedule(&sizes, workers);
    debug!("decoding {} tile columns on {} threads", columns.len(), workers);

    let mut columns: Vec<Option<TileColumn>> = columns.into_iter().map(Some).collect();
    let runs: Vec<Vec<(TileColumn, &[u8])>> = runs
        .iter()
        .map(|run| {
            run.iter()
                .filter_map(|&c| columns[c].take().map(|tile| (tile, buffers[c])))
                .collect()
        })
        .collect();

    let results: Vec<Result<FrameCounts, DecodeError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = runs
            .into_iter()
            .map(|run| {
                scope.spawn(move || -> Result<FrameCounts, DecodeError> {
                    let mut state = TileWorkerState::default();
                    for (mut tile, data) in run {
                        decode_tile(frame, &mut tile, &mut state, data, 0..hdr.mi_rows())?;
                    }
                    Ok(state.counts)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(DecodeError::Error("tile worker panicked".into())))
            })
            .collect()
    });

    let mut counts = FrameCounts::default();
    for res in results {
        counts += &res?;
    }

    Ok(counts)
}

/// Decodes all the tiles of a frame from `data` into `bufs` and returns the symbol counts.
///
/// Tile columns are decoded in parallel when `threads` allows it and the frame has a single row
/// of tiles. The result does not depend on the number of threads.
pub fn decode_tiles(
    frame: &FrameState,
    bufs: FrameBuffers,
    data: &[u8],
    threads: usize,
) -> Result<FrameCounts, DecodeError> {
    let hdr = frame.modes.hdr;
    let tile_cols = 1 << hdr.tile_cols_log2;
    let tile_rows = 1 << hdr.tile_rows_log2;
    let buffers = tile_buffers(data, tile_rows, tile_cols)?;
    let mut columns = tile_columns(hdr, bufs);

    if threads > 1 && tile_cols > 1 && tile_rows == 1 {
        return decode_parallel(frame, columns, &buffers, threads);
    }

    let mut state = TileWorkerState::default();
    for (row, row_buffers) in buffers.chunks(tile_cols).enumerate() {
        let mi_rows = tile_offset(row, hdr.mi_rows(), hdr.tile_rows_log2)
            ..tile_offset(row + 1, hdr.mi_rows(), hdr.tile_rows_log2);
        for (tile, data) in columns.iter_mut().zip(row_buffers) {
            decode_tile(frame, tile, &mut state, data, mi_rows.clone())?;
        }
    }

    Ok(state.counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::bool_encoder::BoolEncoder;
    use crate::decoders::vp9::compressed_header::CompressedHeader;
    use crate::decoders::vp9::entropy::FrameContext;
    use crate::decoders::vp9::modes::ModeReader;
    use crate::decoders::vp9::parser::BitDepth;
    use crate::decoders::vp9::probs::INTRA_MODE_TREE;
    use crate::decoders::vp9::probs::KF_PARTITION_PROBS;
    use crate::decoders::vp9::probs::KF_UV_MODE_PROBS;
    use crate::decoders::vp9::probs::KF_Y_MODE_PROBS;
    use crate::decoders::vp9::probs::PARTITION_TREE;
    use crate::decoders::vp9::quant::segment_dequant;
    use crate::decoders::vp9::types::Partition;
    use crate::decoders::vp9::types::PredictionMode;
    use crate::decoders::vp9::types::TxMode;

    #[test]
    fn tile_sizes_are_big_endian() {
        let data = [0, 0, 0, 3, 1, 2, 3, 4, 5];
        let buffers = tile_buffers(&data, 1, 2).unwrap();
        assert_eq!(buffers, vec![&[1u8, 2, 3][..], &[4, 5][..]]);

        let buffers = tile_buffers(&data, 1, 1).unwrap();
        assert_eq!(buffers, vec![&data[..]]);
    }

    #[test]
    fn oversized_tile_is_corrupt() {
        let data = [0, 0, 1, 0, 1, 2, 3];
        assert!(matches!(
            tile_buffers(&data, 1, 2),
            Err(DecodeError::CorruptFrame(_))
        ));

        assert!(matches!(
            tile_buffers(&[0, 0], 2, 1),
            Err(DecodeError::CorruptFrame(_))
        ));
    }

    #[test]
    fn largest_tile_goes_last_with_one_thread_per_column() {
        assert_eq!(
            schedule(&[10, 40, 20, 30], 4),
            vec![vec![3], vec![2], vec![0], vec![1]]
        );
    }

    #[test]
    fn fewer_threads_get_balanced_runs() {
        let sizes = [10, 40, 20, 30];
        let runs = schedule(&sizes, 2);
        assert_eq!(runs, vec![vec![2, 3], vec![1, 0]]);

        let work: Vec<usize> = runs
            .iter()
            .map(|run| run.iter().map(|&c| sizes[c]).sum())
            .collect();
        assert_eq!(work, vec![50, 50]);

        let runs = schedule(&[5, 4, 3, 2, 1], 2);
        assert_eq!(runs.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 3]);
        let mut all: Vec<usize> = runs.concat();
        all.sort();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    /// Two 64x64 skipped intra superblocks side by side, each in its own tile.
    fn two_tiles(modes: [PredictionMode; 2]) -> Vec<u8> {
        let mut out = vec![];
        for (i, mode) in modes.into_iter().enumerate() {
            let fc = FrameContext::default();
            let mut enc = BoolEncoder::new();
            enc.write_tree(&PARTITION_TREE, &KF_PARTITION_PROBS[12], Partition::None as u8);
            enc.write_bool(true, fc.skip[0]);
            enc.write_tree(&INTRA_MODE_TREE, &KF_Y_MODE_PROBS[0][0], mode as u8);
            enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[mode as usize], mode as u8);
            let tile = enc.finish();

            if i == 0 {
                out.extend_from_slice(&(tile.len() as u32).to_be_bytes());
            }
            out.extend_from_slice(&tile);
        }

        out
    }

    fn decode(data: &[u8], threads: usize) -> (Result<FrameCounts, DecodeError>, Surface) {
        let hdr = Header {
            width: 128,
            height: 64,
            tile_cols_log2: 1,
            ..Default::default()
        };
        let ch = CompressedHeader {
            tx_mode: TxMode::Allow32x32,
            ..Default::default()
        };
        let fc = FrameContext::default();
        let frame = FrameState {
            modes: ModeReader {
                hdr: &hdr,
                ch: &ch,
                fc: &fc,
                prev_segment_ids: None,
                prev_mvs: None,
                ref_valid: [false; 3],
            },
            dequant: segment_dequant(&hdr),
            refs: [None; 3],
            strict_padding: true,
        };

        let mut surface = Surface::new(128, 64, BitDepth::Depth8, false, false).unwrap();
        let mis = hdr.mi_cols() * hdr.mi_rows();
        let mut grid = vec![ModeInfo::default(); mis];
        let mut segment_ids = vec![0; mis];
        let mut mvs = vec![MvRef::default(); mis];
        let bufs = FrameBuffers {
            surface: &mut surface,
            grid: &mut grid,
            segment_ids: &mut segment_ids,
            mvs: &mut mvs,
        };

        let res = decode_tiles(&frame, bufs, data, threads);
        (res, surface)
    }

    #[test]
    fn parallel_tiles_match_sequential() {
        let data = two_tiles([PredictionMode::V, PredictionMode::H]);

        let (seq_counts, seq) = decode(&data, 1);
        let (par_counts, par) = decode(&data, 2);
        let seq_counts = seq_counts.unwrap();

        assert_eq!(seq_counts, par_counts.unwrap());
        assert_eq!(seq, par);
        assert_eq!(seq_counts.partition[12], [2, 0, 0, 0]);
        assert_eq!(seq_counts.skip[0], [0, 2]);

        // Nothing above the first tile and nothing left of the second one.
        let luma = &seq.planes[0];
        assert_eq!(luma.row(10)[5], 127);
        assert_eq!(luma.row(10)[70], 129);
    }

    #[test]
    fn corrupt_tile_fails_on_every_path() {
        let mut data = two_tiles([PredictionMode::Dc, PredictionMode::Dc]);
        // Drop the second tile entirely.
        let first = BigEndian::read_u32(&data) as usize;
        data.truncate(TILE_SIZE_BYTES + first);

        for threads in [1, 2] {
            let (res, _) = decode(&data, threads);
            assert!(matches!(res, Err(DecodeError::CorruptFrame(_))));
        }
    }
}
