// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame and stream level decoding.
//!
//! [`decode_frame`] reconstructs a single frame from its tile data once both headers are known.
//! [`Decoder`] drives it over a stream: it keeps the reference slots, the saved probability
//! contexts and everything else one frame inherits from the previous ones.

use std::sync::Arc;

use log::debug;
use log::error;

use crate::decoders::vp9::compressed_header;
use crate::decoders::vp9::compressed_header::CompressedHeader;
use crate::decoders::vp9::entropy::adapt_coef_probs;
use crate::decoders::vp9::entropy::adapt_mode_probs;
use crate::decoders::vp9::entropy::adapt_mv_probs;
use crate::decoders::vp9::entropy::FrameContext;
use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::frame::MvBuffer;
use crate::decoders::vp9::frame::Surface;
use crate::decoders::vp9::inter::ScaleFactors;
use crate::decoders::vp9::loopfilter::filter_frame;
use crate::decoders::vp9::loopfilter::sync_range;
use crate::decoders::vp9::modes::ModeReader;
use crate::decoders::vp9::parser::FrameType;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::InterpolationFilter;
use crate::decoders::vp9::parser::Parser;
use crate::decoders::vp9::parser::FRAME_CONTEXTS;
use crate::decoders::vp9::parser::REFS_PER_FRAME;
use crate::decoders::vp9::parser::REF_FRAMES;
use crate::decoders::vp9::quant::segment_dequant;
use crate::decoders::vp9::scheduler::decode_tiles;
use crate::decoders::vp9::scheduler::FrameBuffers;
use crate::decoders::vp9::tile::FrameState;
use crate::decoders::vp9::tile::RefFrame;
use crate::decoders::vp9::types::ModeInfo;
use crate::decoders::vp9::types::TxMode;
use crate::decoders::DecodeError;

/// Upper bound of the default number of threads.
const MAX_DEFAULT_THREADS: usize = 8;

/// Decoder tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Threads used for tile decoding and loop filtering.
    pub threads: usize,
    /// How many superblocks a loop filter row stays behind the row above. Derived from the
    /// frame width when `None`.
    pub lf_sync_range: Option<usize>,
    /// Whether nonzero padding bits after the tile data fail the frame.
    pub strict_padding: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_THREADS);

        Self {
            threads,
            lf_sync_range: None,
            strict_padding: false,
        }
    }
}

/// Per-frame inputs of [`decode_frame`].
pub struct FrameParams<'a> {
    pub hdr: &'a Header,
    pub ch: &'a CompressedHeader,
    /// Probabilities the tiles are decoded with.
    pub fc: &'a FrameContext,
    /// Receives the symbol counts of the frame.
    pub counts: &'a mut FrameCounts,
    /// Surfaces of the LAST, GOLDEN and ALTREF references.
    pub refs: [Option<&'a Surface>; REFS_PER_FRAME],
    /// Motion vectors of the previous frame, if they may be used for prediction.
    pub prev_mvs: Option<&'a MvBuffer>,
    pub prev_segment_ids: Option<&'a [u8]>,
    /// Receives the segmentation map of the frame, one entry per mode-info unit.
    pub segment_ids: &'a mut [u8],
}

/// Splits the data of a frame into its compressed header and its tile data.
pub(crate) fn split_frame<'a>(
    hdr: &Header,
    data: &'a [u8],
) -> Result<(&'a [u8], &'a [u8]), DecodeError> {
    let first = usize::from(hdr.uncompressed_header_size_in_bytes);
    let size = usize::from(hdr.header_size_in_bytes);

    if size == 0 {
        return Err(DecodeError::CorruptFrame("invalid header size".into()));
    }

    if first + size > data.len() {
        return Err(DecodeError::CorruptFrame(
            "truncated packet or corrupt header length".into(),
        ));
    }

    Ok((&data[first..first + size], &data[first + size..]))
}

/// Pairs every usable reference with the scale factors from its size to the frame size.
fn reference_frames<'a>(
    hdr: &Header,
    refs: &[Option<&'a Surface>; REFS_PER_FRAME],
) -> Result<[Option<RefFrame<'a>>; REFS_PER_FRAME], DecodeError> {
    let mut out = [None; REFS_PER_FRAME];
    if hdr.frame_is_intra() {
        return Ok(out);
    }

    for (slot, surface) in out.iter_mut().zip(refs) {
        let Some(surface) = *surface else {
            continue;
        };

        if !surface.same_format(hdr.bit_depth, hdr.subsampling_x, hdr.subsampling_y) {
            return Err(DecodeError::CorruptFrame(
                "referenced frame has incompatible color format".into(),
            ));
        }

        *slot = ScaleFactors::new(surface.width, surface.height, hdr.width, hdr.height)
            .map(|scale| RefFrame { surface, scale });
    }

    if out.iter().all(Option::is_none) {
        return Err(DecodeError::CorruptFrame(
            "referenced frame has invalid size".into(),
        ));
    }

    Ok(out)
}

/// Decodes the tiles in `data` into `output`, then deblocks it. Returns the motion vectors of
/// the frame.
///
/// `output` must already have the size and format of the frame.
pub fn decode_frame(
    params: FrameParams,
    output: &mut Surface,
    data: &[u8],
    config: &DecoderConfig,
) -> Result<MvBuffer, DecodeError> {
    let FrameParams {
        hdr,
        ch,
        fc,
        counts,
        refs,
        prev_mvs,
        prev_segment_ids,
        segment_ids,
    } = params;
    let (mi_cols, mi_rows) = (hdr.mi_cols(), hdr.mi_rows());

    if output.width != hdr.width
        || output.height != hdr.height
        || !output.same_format(hdr.bit_depth, hdr.subsampling_x, hdr.subsampling_y)
    {
        return Err(DecodeError::InvalidParam(format!(
            "output surface {}x{} does not match the {}x{} frame",
            output.width, output.height, hdr.width, hdr.height
        )));
    }

    let mis = mi_cols * mi_rows;
    if segment_ids.len() != mis {
        return Err(DecodeError::InvalidParam(format!(
            "segmentation map has {} entries, expected {}",
            segment_ids.len(),
            mis
        )));
    }

    let refs = reference_frames(hdr, &refs)?;
    let prev_mvs = prev_mvs
        .filter(|m| !hdr.error_resilient_mode && m.mi_cols == mi_cols && m.mi_rows == mi_rows);
    let prev_segment_ids = prev_segment_ids.filter(|s| s.len() == mis);

    let frame = FrameState {
        modes: ModeReader {
            hdr,
            ch,
            fc,
            prev_segment_ids,
            prev_mvs,
            ref_valid: refs.map(|r| r.is_some()),
        },
        dequant: segment_dequant(hdr),
        refs,
        strict_padding: config.strict_padding,
    };

    let mut grid = vec![ModeInfo::default(); mis];
    let mut mvs = MvBuffer::new(mi_cols, mi_rows);
    let bufs = FrameBuffers {
        surface: &mut *output,
        grid: &mut grid,
        segment_ids,
        mvs: &mut mvs.refs,
    };
    *counts = decode_tiles(&frame, bufs, data, config.threads)?;

    let nsync = config
        .lf_sync_range
        .unwrap_or_else(|| sync_range(hdr.width));
    filter_frame(output, &grid, hdr, config.threads, nsync);

    Ok(mvs)
}

/// A frame ready for display.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub header: Header,
    pub surface: Arc<Surface>,
}

/// What the next frame needs to know about the last decoded one.
#[derive(Clone, Debug)]
struct LastFrame {
    width: u32,
    height: u32,
    frame_type: FrameType,
    intra_only: bool,
    show_frame: bool,
    mvs: MvBuffer,
}

/// A VP9 stream decoder.
pub struct Decoder {
    config: DecoderConfig,
    parser: Parser,
    frame_contexts: [FrameContext; FRAME_CONTEXTS],
    ref_slots: [Option<Arc<Surface>>; REF_FRAMES],
    last: Option<LastFrame>,
    /// Segmentation map of the last frame that had segmentation enabled.
    segment_ids: Vec<u8>,
    /// Set after a failure. Only a frame that does not depend on earlier ones can clear it.
    need_resync: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            parser: Default::default(),
            frame_contexts: Default::default(),
            ref_slots: Default::default(),
            last: None,
            segment_ids: Vec::new(),
            need_resync: true,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The surface in reference slot `idx`, if any.
    pub fn reference(&self, idx: usize) -> Option<&Arc<Surface>> {
        self.ref_slots.get(idx).and_then(Option::as_ref)
    }

    /// Decodes a chunk of the stream, which holds one frame or a superframe. Returns the frames
    /// to display, in order.
    ///
    /// A failed frame leaves the reference slots untouched. Inter frames are then refused until
    /// a key frame or an intra-only frame comes.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<DecodedFrame>, DecodeError> {
        let frames = self.parser.parse_chunk(chunk)?;
        let mut shown = vec![];

        for frame in frames {
            let data = frame.as_ref();
            let hdr = frame.header.clone();

            if hdr.show_existing_frame {
                let surface = self.ref_slots[usize::from(hdr.frame_to_show_map_idx)]
                    .clone()
                    .ok_or_else(|| {
                        DecodeError::UnsupBitstream(format!(
                            "slot {} does not hold a decoded frame",
                            hdr.frame_to_show_map_idx
                        ))
                    })?;
                debug!("showing existing frame {}", hdr.frame_to_show_map_idx);
                if let Some(last) = self.last.as_mut() {
                    last.show_frame = true;
                }
                shown.push(DecodedFrame {
                    header: hdr,
                    surface,
                });
                continue;
            }

            let surface = match self.decode_one(&hdr, data) {
                Ok(surface) => surface,
                Err(e) => {
                    error!("dropping {:?}: {}", hdr.frame_type, e);
                    self.need_resync = true;
                    return Err(e);
                }
            };

            if hdr.show_frame {
                shown.push(DecodedFrame {
                    header: hdr,
                    surface,
                });
            }
        }

        Ok(shown)
    }

    /// Restores the probability contexts a frame that does not depend on earlier ones starts
    /// from.
    fn reset_frame_contexts(&mut self, hdr: &Header) {
        let defaults = FrameContext::default();

        if hdr.frame_type == FrameType::KeyFrame
            || hdr.error_resilient_mode
            || hdr.reset_frame_context == 3
        {
            self.frame_contexts = std::array::from_fn(|_| defaults.clone());
        } else if hdr.reset_frame_context == 2 {
            self.frame_contexts[usize::from(hdr.coded_frame_context_idx)] = defaults;
        }
    }

    fn decode_one(&mut self, hdr: &Header, data: &[u8]) -> Result<Arc<Surface>, DecodeError> {
        if self.need_resync && !hdr.frame_is_intra() {
            return Err(DecodeError::CorruptFrame(
                "a key frame or intra-only frame is required to resume decoding".into(),
            ));
        }

        let (compressed, tiles) = split_frame(hdr, data)?;
        let (mi_cols, mi_rows) = (hdr.mi_cols(), hdr.mi_rows());

        let past_independence = hdr.frame_is_intra() || hdr.error_resilient_mode;
        if past_independence {
            self.reset_frame_contexts(hdr);
        }

        if past_independence || self.segment_ids.len() != mi_cols * mi_rows {
            self.segment_ids = vec![0; mi_cols * mi_rows];
        }

        let pre_fc = &self.frame_contexts[usize::from(hdr.frame_context_idx)];
        let mut fc = pre_fc.clone();
        let ch = compressed_header::parse(compressed, hdr, &mut fc)?;

        let prev_mvs = self
            .last
            .as_ref()
            .filter(|last| {
                !hdr.error_resilient_mode
                    && last.width == hdr.width
                    && last.height == hdr.height
                    && !last.intra_only
                    && last.show_frame
            })
            .map(|last| &last.mvs);

        let refs = hdr
            .ref_frame_idx
            .map(|idx| self.ref_slots[usize::from(idx)].as_deref());

        let mut output = Surface::new(
            hdr.width,
            hdr.height,
            hdr.bit_depth,
            hdr.subsampling_x,
            hdr.subsampling_y,
        )?;
        let mut counts = FrameCounts::default();
        let mut segment_ids = vec![0; mi_cols * mi_rows];

        let params = FrameParams {
            hdr,
            ch: &ch,
            fc: &fc,
            counts: &mut counts,
            refs,
            prev_mvs,
            prev_segment_ids: Some(self.segment_ids.as_slice()),
            segment_ids: &mut segment_ids,
        };
        let mvs = decode_frame(params, &mut output, tiles, &self.config)?;

        if !hdr.error_resilient_mode && !hdr.frame_parallel_decoding_mode {
            let last_frame_was_key = self
                .last
                .as_ref()
                .map_or(false, |last| last.frame_type == FrameType::KeyFrame);
            adapt_coef_probs(
                &mut fc,
                pre_fc,
                &counts,
                hdr.frame_is_intra(),
                last_frame_was_key,
            );

            if !hdr.frame_is_intra() {
                adapt_mode_probs(
                    &mut fc,
                    pre_fc,
                    &counts,
                    hdr.interpolation_filter == InterpolationFilter::Switchable,
                    ch.tx_mode == TxMode::Select,
                );
                adapt_mv_probs(&mut fc, pre_fc, &counts, hdr.allow_high_precision_mv);
            }
        }

        if hdr.refresh_frame_context {
            self.frame_contexts[usize::from(hdr.frame_context_idx)] = fc;
        }

        let surface = Arc::new(output);
        for (i, slot) in self.ref_slots.iter_mut().enumerate() {
            if hdr.refresh_frame_flags & (1 << i) != 0 {
                *slot = Some(Arc::clone(&surface));
            }
        }

        if hdr.seg.enabled {
            self.segment_ids = segment_ids;
        }

        self.last = Some(LastFrame {
            width: hdr.width,
            height: hdr.height,
            frame_type: hdr.frame_type,
            intra_only: hdr.intra_only,
            show_frame: hdr.show_frame,
            mvs,
        });
        self.need_resync = false;

        debug!(
            "decoded {:?} {}x{}, refreshed slots {:#04x}",
            hdr.frame_type, hdr.width, hdr.height, hdr.refresh_frame_flags
        );

        Ok(surface)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decoders::vp9::bool_decoder::DIFF_UPDATE_PROB;
    use crate::decoders::vp9::bool_encoder::BoolEncoder;
    use crate::decoders::vp9::parser::tests::write_header;
    use crate::decoders::vp9::parser::tests::HeaderSpec;
    use crate::decoders::vp9::probs::INTER_MODE_TREE;
    use crate::decoders::vp9::probs::INTRA_MODE_TREE;
    use crate::decoders::vp9::probs::KF_PARTITION_PROBS;
    use crate::decoders::vp9::probs::KF_UV_MODE_PROBS;
    use crate::decoders::vp9::probs::KF_Y_MODE_PROBS;
    use crate::decoders::vp9::probs::PARTITION_TREE;
    use crate::decoders::vp9::types::Partition;
    use crate::decoders::vp9::types::PredictionMode;

    /// A compressed header selecting 32x32 transforms without any probability update.
    pub(crate) fn compressed_header() -> Vec<u8> {
        let mut enc = BoolEncoder::new();
        enc.write_literal(2, 3);
        enc.write_bit(false);
        // Coefficient updates for the four transform sizes.
        for _ in 0..4 {
            enc.write_bit(false);
        }
        // Enough update flags for every remaining probability of an inter frame.
        for _ in 0..300 {
            enc.write_bool(false, DIFF_UPDATE_PROB);
        }

        enc.finish()
    }

    pub(crate) fn frame(spec: HeaderSpec, tile: &[u8]) -> Vec<u8> {
        let ch = compressed_header();
        let mut out = write_header(&HeaderSpec {
            compressed_header_size: ch.len() as u16,
            ..spec
        });
        out.extend_from_slice(&ch);
        out.extend_from_slice(tile);
        out
    }

    /// A 64x64 key frame split in four skipped 32x32 blocks with different intra modes.
    pub(crate) fn quadrant_key_frame(spec: HeaderSpec) -> Vec<u8> {
        use PredictionMode::*;

        let fc = FrameContext::default();
        let mut enc = BoolEncoder::new();
        enc.write_tree(&PARTITION_TREE, &KF_PARTITION_PROBS[12], Partition::Split as u8);
        // Mode, skip context, above mode and left mode of every quadrant.
        let quadrants = [(Dc, 0, Dc, Dc), (V, 1, Dc, Dc), (H, 1, Dc, Dc), (Tm, 2, V, H)];
        for (mode, skip_ctx, above, left) in quadrants {
            enc.write_tree(&PARTITION_TREE, &KF_PARTITION_PROBS[8], Partition::None as u8);
            enc.write_bool(true, fc.skip[skip_ctx]);
            enc.write_tree(
                &INTRA_MODE_TREE,
                &KF_Y_MODE_PROBS[above as usize][left as usize],
                mode as u8,
            );
            enc.write_tree(&INTRA_MODE_TREE, &KF_UV_MODE_PROBS[mode as usize], mode as u8);
        }

        frame(spec, &enc.finish())
    }

    /// A 64x64 inter frame made of one skipped block predicted from LAST without motion.
    pub(crate) fn zero_motion_inter_frame(spec: HeaderSpec) -> Vec<u8> {
        let fc = FrameContext::default();
        let mut enc = BoolEncoder::new();
        enc.write_tree(&PARTITION_TREE, &fc.partition[12], Partition::None as u8);
        enc.write_bool(true, fc.skip[0]);
        enc.write_bool(true, fc.is_inter[0]);
        enc.write_bool(false, fc.single_ref[2][0]);
        enc.write_tree(
            &INTER_MODE_TREE,
            &fc.inter_mode[2],
            PredictionMode::ZeroMv.inter_offset() as u8,
        );

        frame(
            HeaderSpec {
                key_frame: false,
                ..spec
            },
            &enc.finish(),
        )
    }

    fn visible(surface: &Surface, plane: usize) -> Vec<u16> {
        let p = &surface.planes[plane];
        (0..p.height)
            .flat_map(|y| p.row(y)[..p.width].to_vec())
            .collect()
    }

    fn single_threaded() -> Decoder {
        Decoder::new(DecoderConfig {
            threads: 1,
            ..Default::default()
        })
    }

    #[test]
    fn default_config() {
        let config = DecoderConfig::default();
        assert!((1..=MAX_DEFAULT_THREADS).contains(&config.threads));
        assert_eq!(config.lf_sync_range, None);
        assert!(!config.strict_padding);
    }

    #[test]
    fn skipped_key_frame_quadrants() {
        let mut decoder = single_threaded();
        let frames = decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();
        assert_eq!(frames.len(), 1);

        let luma = &frames[0].surface.planes[0];
        assert_eq!(luma.row(0)[0], 128);
        // Nothing above the top right quadrant.
        assert_eq!(luma.row(0)[40], 127);
        // Nothing left of the bottom left quadrant.
        assert_eq!(luma.row(40)[0], 129);
        // 129 + 127 - 128
        assert_eq!(luma.row(63)[63], 128);

        let chroma = &frames[0].surface.planes[1];
        assert_eq!((chroma.width, chroma.height), (32, 32));
        assert_eq!(chroma.row(0)[20], 127);
        assert_eq!(chroma.row(20)[0], 129);

        // A key frame refreshes every slot.
        for i in 0..REF_FRAMES {
            assert!(Arc::ptr_eq(decoder.reference(i).unwrap(), &frames[0].surface));
        }
    }

    #[test]
    fn zero_motion_copies_the_reference() {
        let mut decoder = single_threaded();
        let key = decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();
        let inter = decoder
            .decode_chunk(&zero_motion_inter_frame(Default::default()))
            .unwrap();
        assert_eq!(inter.len(), 1);
        assert!(!Arc::ptr_eq(&key[0].surface, &inter[0].surface));

        for plane in 0..3 {
            assert_eq!(
                visible(&inter[0].surface, plane),
                visible(&key[0].surface, plane)
            );
        }
    }

    #[test]
    fn inter_frame_needs_a_key_frame_first() {
        let mut decoder = single_threaded();
        assert!(decoder
            .decode_chunk(&zero_motion_inter_frame(Default::default()))
            .is_err());
    }

    #[test]
    fn empty_compressed_header_is_corrupt() {
        let mut decoder = single_threaded();
        let data = write_header(&HeaderSpec::default());

        assert!(matches!(
            decoder.decode_chunk(&data),
            Err(DecodeError::CorruptFrame(_))
        ));
    }

    #[test]
    fn failed_frame_requires_a_resync() {
        let mut decoder = single_threaded();
        decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();

        // Cut the tile data of an inter frame.
        let mut broken = zero_motion_inter_frame(Default::default());
        let ch = compressed_header().len();
        let hdr_len = write_header(&HeaderSpec {
            key_frame: false,
            compressed_header_size: ch as u16,
            ..Default::default()
        })
        .len();
        broken.truncate(hdr_len + ch);
        assert!(decoder.decode_chunk(&broken).is_err());

        assert!(decoder
            .decode_chunk(&zero_motion_inter_frame(Default::default()))
            .is_err());
        decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();
        decoder
            .decode_chunk(&zero_motion_inter_frame(Default::default()))
            .unwrap();
    }

    #[test]
    fn hidden_frame_shown_from_a_superframe() {
        use crate::bitstream_utils::BitWriter;
        use crate::decoders::vp9::parser::FRAME_MARKER;

        let hidden = quadrant_key_frame(HeaderSpec {
            show_frame: false,
            ..Default::default()
        });

        let mut show_existing = vec![];
        {
            let mut w = BitWriter::new(&mut show_existing);
            w.write_f(2, FRAME_MARKER).unwrap();
            w.write_f(2, 0u32).unwrap(); // profile
            w.write_bit(true).unwrap();
            w.write_f(3, 0u32).unwrap();
            w.flush().unwrap();
        }

        // Two frames with 4 byte sizes.
        let marker = 0xc0 | (3 << 3) | 1;
        let mut chunk = [hidden.clone(), show_existing.clone()].concat();
        chunk.push(marker);
        chunk.extend_from_slice(&(hidden.len() as u32).to_le_bytes());
        chunk.extend_from_slice(&(show_existing.len() as u32).to_le_bytes());
        chunk.push(marker);

        let mut decoder = single_threaded();
        let frames = decoder.decode_chunk(&chunk).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].header.show_existing_frame);
        assert!(Arc::ptr_eq(&frames[0].surface, decoder.reference(0).unwrap()));
        assert_eq!(frames[0].surface.planes[0].row(0)[40], 127);
    }

    #[test]
    fn frame_contexts_are_saved_after_adaptation() {
        let mut decoder = single_threaded();
        decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();
        // Key frames only adapt the coefficient probabilities, and no coefficient was coded.
        let defaults = FrameContext::default();
        assert_eq!(decoder.frame_contexts[0], defaults);

        decoder
            .decode_chunk(&zero_motion_inter_frame(Default::default()))
            .unwrap();
        // The only skip flag read was set.
        assert!(decoder.frame_contexts[0].skip[0] < defaults.skip[0]);
        assert_eq!(decoder.frame_contexts[1], defaults);
    }

    #[test]
    fn frame_parallel_mode_keeps_the_probabilities() {
        let mut decoder = single_threaded();
        decoder
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();
        decoder
            .decode_chunk(&zero_motion_inter_frame(HeaderSpec {
                frame_parallel: true,
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(decoder.frame_contexts[0], FrameContext::default());
    }

    #[test]
    fn mismatched_output_is_rejected() {
        let hdr = Header {
            width: 64,
            height: 64,
            ..Default::default()
        };
        let ch = CompressedHeader::default();
        let fc = FrameContext::default();
        let mut counts = FrameCounts::default();
        let mut segment_ids = vec![0; 64];
        let mut output = Surface::new(32, 32, hdr.bit_depth, false, false).unwrap();

        let params = FrameParams {
            hdr: &hdr,
            ch: &ch,
            fc: &fc,
            counts: &mut counts,
            refs: [None; REFS_PER_FRAME],
            prev_mvs: None,
            prev_segment_ids: None,
            segment_ids: &mut segment_ids,
        };
        let res = decode_frame(params, &mut output, &[], &DecoderConfig::default());
        assert!(matches!(res, Err(DecodeError::InvalidParam(_))));
    }
}
