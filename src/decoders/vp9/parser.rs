// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Superframe splitting and uncompressed frame header parsing.

use anyhow::anyhow;
use bitreader::BitReader;
use enumn::N;
use log::debug;

pub const REFS_PER_FRAME: usize = 3;

pub const MAX_REF_LF_DELTAS: usize = 4;
pub const MAX_MODE_LF_DELTAS: usize = 2;

pub const MAX_SEGMENTS: usize = 8;
pub const SEG_TREE_PROBS: usize = MAX_SEGMENTS - 1;
pub const PREDICTION_PROBS: usize = 3;

pub const SEG_LVL_ALT_Q: usize = 0;
pub const SEG_LVL_ALT_L: usize = 1;
pub const SEG_LVL_REF_FRAME: usize = 2;
pub const SEG_LVL_SKIP: usize = 3;
pub const SEG_LVL_MAX: usize = 4;

pub const MAX_LOOP_FILTER: u8 = 63;

pub const REF_FRAMES_LOG2: usize = 3;
pub const REF_FRAMES: usize = 1 << REF_FRAMES_LOG2;

pub const FRAME_CONTEXTS: usize = 4;

pub const SUPERFRAME_MARKER: u32 = 0x06;

pub const FRAME_MARKER: u32 = 0x02;
pub const SYNC_CODE: u32 = 0x498342;

pub const MIN_TILE_WIDTH_B64: u32 = 4;
pub const MAX_TILE_WIDTH_B64: u32 = 64;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum InterpolationFilter {
    #[default]
    EightTap = 0,
    EightTapSmooth = 1,
    EightTapSharp = 2,
    Bilinear = 3,
    Switchable = 4,
}

/// Reference frame of a block. `None` marks the unused second reference of single prediction
/// blocks and positions without motion information.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, N)]
pub enum ReferenceFrameType {
    None = -1,
    #[default]
    Intra = 0,
    Last = 1,
    Golden = 2,
    AltRef = 3,
}

impl ReferenceFrameType {
    /// Index into per-reference tables such as the sign bias or loop filter deltas.
    pub fn index(self) -> usize {
        (self as i8).max(0) as usize
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum FrameType {
    #[default]
    KeyFrame = 0,
    InterFrame = 1,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum Profile {
    #[default]
    Profile0 = 0,
    Profile1 = 1,
    Profile2 = 2,
    Profile3 = 3,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum BitDepth {
    #[default]
    Depth8 = 8,
    Depth10 = 10,
    Depth12 = 12,
}

impl BitDepth {
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Largest sample value.
    pub fn max_value(self) -> i32 {
        (1 << self.bits()) - 1
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum ColorSpace {
    #[default]
    Unknown = 0,
    Bt601 = 1,
    Bt709 = 2,
    Smpte170 = 3,
    Smpte240 = 4,
    Bt2020 = 5,
    Reserved2 = 6,
    CsSrgb = 7,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
pub enum ColorRange {
    #[default]
    StudioSwing = 0,
    FullSwing = 1,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopFilterParams {
    /// Filter strength. Zero disables the loop filter for the frame.
    pub level: u8,
    pub sharpness: u8,
    /// Whether the filter level is adjusted by reference frame and mode.
    pub delta_enabled: bool,
    pub delta_update: bool,
    pub update_ref_delta: [bool; MAX_REF_LF_DELTAS],
    /// Level adjustment per reference frame. Persists across frames until updated.
    pub ref_deltas: [i8; MAX_REF_LF_DELTAS],
    pub update_mode_delta: [bool; MAX_MODE_LF_DELTAS],
    /// Level adjustment for `ZeroMv` (index 0) and other inter modes (index 1).
    pub mode_deltas: [i8; MAX_MODE_LF_DELTAS],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuantizationParams {
    /// Base quantizer index, used as is for luma AC coefficients.
    pub base_q_idx: u8,
    pub delta_q_y_dc: i8,
    pub delta_q_uv_dc: i8,
    pub delta_q_uv_ac: i8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentationParams {
    pub enabled: bool,
    /// Whether segment ids are coded in this frame. If unset they are copied from the previous
    /// segmentation map.
    pub update_map: bool,
    pub tree_probs: [u8; SEG_TREE_PROBS],
    pub pred_probs: [u8; PREDICTION_PROBS],
    /// Whether segment ids are predicted from the previous segmentation map.
    pub temporal_update: bool,
    pub update_data: bool,
    /// If set, feature data replaces the frame values instead of adjusting them.
    pub abs_or_delta_update: bool,
    pub feature_enabled: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
    pub feature_data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],
}

impl SegmentationParams {
    /// Whether `feature` is active for `segment_id`.
    pub fn feature_active(&self, segment_id: u8, feature: usize) -> bool {
        self.enabled && self.feature_enabled[segment_id as usize][feature]
    }
}

/// A VP9 uncompressed frame header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub profile: Profile,
    pub bit_depth: BitDepth,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
    /// If set, the frame in slot `frame_to_show_map_idx` is output and nothing else is coded.
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u8,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub error_resilient_mode: bool,
    pub width: u32,
    pub height: u32,
    pub render_and_frame_size_different: bool,
    pub render_width: u32,
    pub render_height: u32,
    pub intra_only: bool,
    /// 0 or 1: no reset, 2: reset the selected context, 3: reset all contexts.
    pub reset_frame_context: u8,
    /// Reference slots that receive the decoded frame.
    pub refresh_frame_flags: u8,
    /// Slots of the LAST, GOLDEN and ALTREF references.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    /// Per reference frame, whether it lies forward in display order.
    pub ref_frame_sign_bias: [u8; 4],
    pub allow_high_precision_mv: bool,
    pub interpolation_filter: InterpolationFilter,
    /// Whether the probabilities in effect at the end of the frame are saved into
    /// `frame_context_idx`.
    pub refresh_frame_context: bool,
    pub frame_parallel_decoding_mode: bool,
    pub frame_context_idx: u8,
    /// The context slot as coded. Frames that reset their history decode with slot 0, but a
    /// `reset_frame_context` of 2 restores the defaults of this slot.
    pub coded_frame_context_idx: u8,
    pub lf: LoopFilterParams,
    pub quant: QuantizationParams,
    pub seg: SegmentationParams,
    pub tile_cols_log2: u8,
    pub tile_rows_log2: u8,
    /// Whether every block uses the Walsh-Hadamard transform.
    pub lossless: bool,
    /// Size of the compressed header in bytes.
    pub header_size_in_bytes: u16,
    /// Size of the uncompressed header in bytes.
    pub uncompressed_header_size_in_bytes: u16,
}

impl Header {
    /// Whether the frame only uses intra prediction.
    pub fn frame_is_intra(&self) -> bool {
        self.frame_type == FrameType::KeyFrame || self.intra_only
    }

    /// Number of 8x8 mode-info columns.
    pub fn mi_cols(&self) -> usize {
        (self.width as usize + 7) >> 3
    }

    /// Number of 8x8 mode-info rows.
    pub fn mi_rows(&self) -> usize {
        (self.height as usize + 7) >> 3
    }

    pub fn sb64_cols(&self) -> usize {
        (self.mi_cols() + 7) >> 3
    }

    pub fn sb64_rows(&self) -> usize {
        (self.mi_rows() + 7) >> 3
    }
}

/// Color format shared by the frames of a stream. Inter frames inherit it from the last frame
/// that coded one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ColorConfig {
    bit_depth: BitDepth,
    color_space: ColorSpace,
    color_range: ColorRange,
    subsampling_x: bool,
    subsampling_y: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::Depth8,
            color_space: ColorSpace::Unknown,
            color_range: ColorRange::StudioSwing,
            subsampling_x: true,
            subsampling_y: true,
        }
    }
}

impl ColorConfig {
    fn apply(&self, hdr: &mut Header) {
        hdr.bit_depth = self.bit_depth;
        hdr.color_space = self.color_space;
        hdr.color_range = self.color_range;
        hdr.subsampling_x = self.subsampling_x;
        hdr.subsampling_y = self.subsampling_y;
    }
}

/// One frame of a chunk: its parsed uncompressed header and all of its bytes, headers included.
pub struct Frame<'a> {
    pub header: Header,
    pub data: &'a [u8],
}

impl AsRef<[u8]> for Frame<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}

/// Returns the sizes listed in the superframe index at the end of `chunk`, or `None` if the chunk
/// holds a single frame.
///
/// The index starts and ends with the same marker byte, which gives the number of frames and the
/// width of their little-endian sizes.
fn superframe_index(chunk: &[u8]) -> anyhow::Result<Option<Vec<usize>>> {
    let Some(&marker) = chunk.last() else {
        return Err(anyhow!("Broken stream: empty chunk"));
    };

    if u32::from(marker >> 5) != SUPERFRAME_MARKER {
        return Ok(None);
    }

    let size_bytes = usize::from((marker >> 3) & 0x3) + 1;
    let num_frames = usize::from(marker & 0x7) + 1;
    let index_len = 2 + num_frames * size_bytes;

    // Frame data may end with bytes that look like a marker. Only a matching first byte makes
    // it an index.
    let Some(index_start) = chunk.len().checked_sub(index_len) else {
        return Ok(None);
    };
    if chunk[index_start] != marker {
        return Ok(None);
    }

    let sizes: Vec<usize> = chunk[index_start + 1..chunk.len() - 1]
        .chunks_exact(size_bytes)
        .map(|bytes| {
            bytes
                .iter()
                .rev()
                .fold(0usize, |size, b| (size << 8) | usize::from(*b))
        })
        .collect();

    let total: usize = sizes.iter().sum();
    if total > index_start {
        return Err(anyhow!(
            "Broken stream: superframe of {} bytes holds {} bytes of frames",
            index_start,
            total
        ));
    }

    Ok(Some(sizes))
}

fn read_signed(r: &mut BitReader, bits: u8) -> anyhow::Result<i8> {
    let magnitude = r.read_u8(bits)? as i8;
    Ok(if r.read_bool()? { -magnitude } else { magnitude })
}

/// Reads an optionally coded probability. Uncoded probabilities are 255.
fn read_optional_prob(r: &mut BitReader) -> anyhow::Result<u8> {
    Ok(if r.read_bool()? { r.read_u8(8)? } else { 255 })
}

fn read_profile(r: &mut BitReader) -> anyhow::Result<Profile> {
    let low = r.read_u8(1)?;
    let high = r.read_u8(1)?;
    let profile = (high << 1) | low;

    // Profile 3 is followed by a reserved zero bit.
    if profile == 3 && r.read_bool()? {
        return Err(anyhow!("Unsupported: profile beyond 3"));
    }

    Profile::n(profile).ok_or_else(|| anyhow!("Broken stream: profile {}", profile))
}

fn check_sync_code(r: &mut BitReader) -> anyhow::Result<()> {
    let code = r.read_u32(24)?;
    if code != SYNC_CODE {
        return Err(anyhow!("Broken stream: invalid sync code {:#08x}", code));
    }

    Ok(())
}

fn read_color_config(r: &mut BitReader, profile: Profile) -> anyhow::Result<ColorConfig> {
    let bit_depth = match profile {
        Profile::Profile2 | Profile::Profile3 if r.read_bool()? => BitDepth::Depth12,
        Profile::Profile2 | Profile::Profile3 => BitDepth::Depth10,
        _ => BitDepth::Depth8,
    };

    let raw = r.read_u8(3)?;
    let color_space =
        ColorSpace::n(raw).ok_or_else(|| anyhow!("Broken stream: color space {}", raw))?;
    let odd_profile = matches!(profile, Profile::Profile1 | Profile::Profile3);

    let mut config = ColorConfig {
        bit_depth,
        color_space,
        ..Default::default()
    };

    if color_space == ColorSpace::CsSrgb {
        // RGB is always full range 4:4:4.
        if !odd_profile {
            return Err(anyhow!("Broken stream: RGB in profile {:?}", profile));
        }
        config.color_range = ColorRange::FullSwing;
        config.subsampling_x = false;
        config.subsampling_y = false;
    } else {
        config.color_range = if r.read_bool()? {
            ColorRange::FullSwing
        } else {
            ColorRange::StudioSwing
        };

        if !odd_profile {
            return Ok(config);
        }

        config.subsampling_x = r.read_bool()?;
        config.subsampling_y = r.read_bool()?;
        if config.subsampling_x && config.subsampling_y {
            return Err(anyhow!("Broken stream: 4:2:0 in profile {:?}", profile));
        }
    }

    if r.read_bool()? {
        return Err(anyhow!("Unsupported: reserved bit in color config"));
    }

    Ok(config)
}

fn read_size(r: &mut BitReader) -> anyhow::Result<(u32, u32)> {
    let width = r.read_u32(16)? + 1;
    let height = r.read_u32(16)? + 1;
    Ok((width, height))
}

fn read_render_size(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    hdr.render_and_frame_size_different = r.read_bool()?;
    (hdr.render_width, hdr.render_height) = if hdr.render_and_frame_size_different {
        read_size(r)?
    } else {
        (hdr.width, hdr.height)
    };

    Ok(())
}

fn read_interpolation_filter(r: &mut BitReader) -> anyhow::Result<InterpolationFilter> {
    // The literal order differs from the order of the filter types.
    const FROM_LITERAL: [InterpolationFilter; 4] = [
        InterpolationFilter::EightTapSmooth,
        InterpolationFilter::EightTap,
        InterpolationFilter::EightTapSharp,
        InterpolationFilter::Bilinear,
    ];

    if r.read_bool()? {
        Ok(InterpolationFilter::Switchable)
    } else {
        Ok(FROM_LITERAL[usize::from(r.read_u8(2)?)])
    }
}

fn read_loop_filter(r: &mut BitReader, lf: &mut LoopFilterParams) -> anyhow::Result<()> {
    lf.level = r.read_u8(6)?;
    lf.sharpness = r.read_u8(3)?;
    lf.delta_enabled = r.read_bool()?;
    lf.delta_update = lf.delta_enabled && r.read_bool()?;
    lf.update_ref_delta = [false; MAX_REF_LF_DELTAS];
    lf.update_mode_delta = [false; MAX_MODE_LF_DELTAS];

    if !lf.delta_update {
        return Ok(());
    }

    for (update, delta) in lf.update_ref_delta.iter_mut().zip(&mut lf.ref_deltas) {
        *update = r.read_bool()?;
        if *update {
            *delta = read_signed(r, 6)?;
        }
    }

    for (update, delta) in lf.update_mode_delta.iter_mut().zip(&mut lf.mode_deltas) {
        *update = r.read_bool()?;
        if *update {
            *delta = read_signed(r, 6)?;
        }
    }

    Ok(())
}

fn read_delta_q(r: &mut BitReader) -> anyhow::Result<i8> {
    Ok(if r.read_bool()? { read_signed(r, 4)? } else { 0 })
}

fn read_quantization(r: &mut BitReader) -> anyhow::Result<QuantizationParams> {
    Ok(QuantizationParams {
        base_q_idx: r.read_u8(8)?,
        delta_q_y_dc: read_delta_q(r)?,
        delta_q_uv_dc: read_delta_q(r)?,
        delta_q_uv_ac: read_delta_q(r)?,
    })
}

fn read_segmentation(r: &mut BitReader, seg: &mut SegmentationParams) -> anyhow::Result<()> {
    // Width of the magnitude of each feature and whether a sign follows.
    const FEATURE_BITS: [(u8, bool); SEG_LVL_MAX] = [(8, true), (6, true), (2, false), (0, false)];

    seg.enabled = r.read_bool()?;
    seg.update_map = seg.enabled && r.read_bool()?;

    if seg.update_map {
        for prob in &mut seg.tree_probs {
            *prob = read_optional_prob(r)?;
        }

        seg.temporal_update = r.read_bool()?;
        for prob in &mut seg.pred_probs {
            *prob = if seg.temporal_update {
                read_optional_prob(r)?
            } else {
                255
            };
        }
    }

    seg.update_data = seg.enabled && r.read_bool()?;
    if !seg.update_data {
        return Ok(());
    }

    seg.abs_or_delta_update = r.read_bool()?;
    for (enabled, data) in seg.feature_enabled.iter_mut().zip(&mut seg.feature_data) {
        for (feature, &(bits, signed)) in FEATURE_BITS.iter().enumerate() {
            enabled[feature] = r.read_bool()?;
            data[feature] = 0;
            if !enabled[feature] {
                continue;
            }

            let magnitude = r.read_u16(bits)? as i16;
            data[feature] = if signed && r.read_bool()? {
                -magnitude
            } else {
                magnitude
            };
        }
    }

    Ok(())
}

/// Smallest number of tile columns, as a log2, that keeps tiles at most 64 superblocks wide.
pub(crate) fn min_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut log2 = 0;
    while (MAX_TILE_WIDTH_B64 << log2) < sb64_cols {
        log2 += 1;
    }
    log2
}

/// Largest number of tile columns, as a log2, that keeps tiles at least 4 superblocks wide.
pub(crate) fn max_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut log2 = 1;
    while (sb64_cols >> log2) >= MIN_TILE_WIDTH_B64 {
        log2 += 1;
    }
    log2 - 1
}

fn read_tile_info(r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
    let sb64_cols = hdr.sb64_cols() as u32;
    let max_log2 = max_log2_tile_cols(sb64_cols);

    // Columns are coded as unary increments over the minimum.
    hdr.tile_cols_log2 = min_log2_tile_cols(sb64_cols);
    while hdr.tile_cols_log2 < max_log2 && r.read_bool()? {
        hdr.tile_cols_log2 += 1;
    }

    hdr.tile_rows_log2 = r.read_u8(1)?;
    if hdr.tile_rows_log2 == 1 {
        hdr.tile_rows_log2 += r.read_u8(1)?;
    }

    Ok(())
}

/// A VP9 bitstream parser.
///
/// Keeps the state that later headers depend on: the color configuration, the size of every
/// reference slot and the loop filter and segmentation parameters, which persist until updated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parser {
    color: ColorConfig,
    lf: LoopFilterParams,
    seg: SegmentationParams,
    /// Width and height of the frame in each reference slot. Empty slots are 0x0.
    slot_sizes: [(u32, u32); REF_FRAMES],
}

impl Parser {
    /// Resets what frames that do not depend on earlier ones may not inherit.
    fn setup_past_independence(&mut self, hdr: &mut Header) {
        self.seg.feature_enabled = Default::default();
        self.seg.feature_data = Default::default();
        self.seg.abs_or_delta_update = false;

        self.lf.delta_enabled = true;
        self.lf.ref_deltas = [1, 0, -1, -1];
        self.lf.mode_deltas = [0; MAX_MODE_LF_DELTAS];

        hdr.ref_frame_sign_bias = [0; 4];
        hdr.frame_context_idx = 0;
    }

    /// Reads the size of an inter frame, which may be copied from one of its references.
    fn read_size_with_refs(&self, r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
        let mut copied = None;
        for &idx in &hdr.ref_frame_idx {
            if r.read_bool()? {
                copied = Some(self.slot_sizes[usize::from(idx)]);
                break;
            }
        }

        (hdr.width, hdr.height) = match copied {
            Some((0, _)) | Some((_, 0)) => {
                return Err(anyhow!("Broken stream: size copied from an empty slot"))
            }
            Some(size) => size,
            None => read_size(r)?,
        };

        // Whether the references can predict a frame of this size is up to the decoder.
        read_render_size(r, hdr)
    }

    /// Reads the fields between the frame type and the frame context flags, which depend on
    /// the kind of frame.
    fn read_frame_kind(&mut self, r: &mut BitReader, hdr: &mut Header) -> anyhow::Result<()> {
        if hdr.frame_type == FrameType::KeyFrame {
            check_sync_code(r)?;
            self.color = read_color_config(r, hdr.profile)?;
            self.color.apply(hdr);
            (hdr.width, hdr.height) = read_size(r)?;
            hdr.refresh_frame_flags = 0xff;
            return read_render_size(r, hdr);
        }

        hdr.intra_only = !hdr.show_frame && r.read_bool()?;
        hdr.reset_frame_context = if hdr.error_resilient_mode {
            0
        } else {
            r.read_u8(2)?
        };

        if hdr.intra_only {
            check_sync_code(r)?;
            if hdr.profile == Profile::Profile0 {
                self.color = ColorConfig {
                    color_space: ColorSpace::Bt601,
                    color_range: self.color.color_range,
                    ..Default::default()
                };
            } else {
                self.color = read_color_config(r, hdr.profile)?;
            }
            self.color.apply(hdr);
            hdr.refresh_frame_flags = r.read_u8(8)?;
            (hdr.width, hdr.height) = read_size(r)?;
            return read_render_size(r, hdr);
        }

        self.color.apply(hdr);
        hdr.refresh_frame_flags = r.read_u8(8)?;
        for i in 0..REFS_PER_FRAME {
            hdr.ref_frame_idx[i] = r.read_u8(REF_FRAMES_LOG2 as u8)?;
            hdr.ref_frame_sign_bias[ReferenceFrameType::Last.index() + i] = r.read_u8(1)?;
        }

        self.read_size_with_refs(r, hdr)?;
        hdr.allow_high_precision_mv = r.read_bool()?;
        hdr.interpolation_filter = read_interpolation_filter(r)?;

        Ok(())
    }

    /// Parses the uncompressed header at the start of `data`.
    fn parse_header(&mut self, data: &[u8]) -> anyhow::Result<Header> {
        let mut r = BitReader::new(data);
        let mut hdr = Header::default();

        let marker = r.read_u32(2)?;
        if marker != FRAME_MARKER {
            return Err(anyhow!("Broken stream: invalid frame marker {}", marker));
        }

        hdr.profile = read_profile(&mut r)?;
        hdr.show_existing_frame = r.read_bool()?;
        if hdr.show_existing_frame {
            hdr.frame_to_show_map_idx = r.read_u8(REF_FRAMES_LOG2 as u8)?;
            return Ok(hdr);
        }

        hdr.frame_type = if r.read_bool()? {
            FrameType::InterFrame
        } else {
            FrameType::KeyFrame
        };
        hdr.show_frame = r.read_bool()?;
        hdr.error_resilient_mode = r.read_bool()?;

        self.read_frame_kind(&mut r, &mut hdr)?;

        if hdr.error_resilient_mode {
            hdr.frame_parallel_decoding_mode = true;
        } else {
            hdr.refresh_frame_context = r.read_bool()?;
            hdr.frame_parallel_decoding_mode = r.read_bool()?;
        }

        hdr.frame_context_idx = r.read_u8(2)?;
        hdr.coded_frame_context_idx = hdr.frame_context_idx;

        if hdr.frame_is_intra() || hdr.error_resilient_mode {
            self.setup_past_independence(&mut hdr);
        }

        read_loop_filter(&mut r, &mut self.lf)?;

        hdr.quant = read_quantization(&mut r)?;
        hdr.lossless = hdr.quant == QuantizationParams::default();

        read_segmentation(&mut r, &mut self.seg)?;
        read_tile_info(&mut r, &mut hdr)?;
        hdr.header_size_in_bytes = r.read_u16(16)?;
        hdr.uncompressed_header_size_in_bytes = r.position().div_ceil(8) as u16;

        hdr.lf = self.lf.clone();
        hdr.seg = self.seg.clone();

        for (i, size) in self.slot_sizes.iter_mut().enumerate() {
            if hdr.refresh_frame_flags & (1 << i) != 0 {
                *size = (hdr.width, hdr.height);
            }
        }

        debug!(
            "{:?} {}x{} intra_only {} show {} refresh {:#04x}",
            hdr.frame_type,
            hdr.width,
            hdr.height,
            hdr.intra_only,
            hdr.show_frame,
            hdr.refresh_frame_flags
        );

        Ok(hdr)
    }

    /// Parses the header of a single frame occupying all of `data`.
    pub fn parse_frame<'a>(&mut self, data: &'a [u8]) -> anyhow::Result<Frame<'a>> {
        let header = self.parse_header(data)?;
        Ok(Frame { header, data })
    }

    /// Parses the frames of `chunk`, which holds either a single frame or a superframe.
    ///
    /// Empty entries of a superframe index carry nothing to decode and are skipped.
    pub fn parse_chunk<'a>(&mut self, chunk: &'a [u8]) -> anyhow::Result<Vec<Frame<'a>>> {
        let Some(sizes) = superframe_index(chunk)? else {
            return Ok(vec![self.parse_frame(chunk)?]);
        };

        let mut frames = Vec::with_capacity(sizes.len());
        let mut rest = chunk;
        for size in sizes {
            let (data, tail) = rest.split_at(size);
            rest = tail;
            if size > 0 {
                frames.push(self.parse_frame(data)?);
            }
        }

        Ok(frames)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bitstream_utils::BitWriter;

    /// Fields of a synthesized uncompressed header.
    #[derive(Clone)]
    pub(crate) struct HeaderSpec {
        pub key_frame: bool,
        pub intra_only: bool,
        pub show_frame: bool,
        pub width: u32,
        pub height: u32,
        pub refresh_frame_flags: u8,
        pub ref_frame_idx: [u8; 3],
        pub size_from_ref: Option<usize>,
        pub interp_filter: Option<u32>,
        pub base_q_idx: u8,
        pub lf_level: u8,
        pub lf_sharpness: u8,
        pub tile_cols_log2_increments: u8,
        pub refresh_frame_context: bool,
        pub frame_parallel: bool,
        pub compressed_header_size: u16,
    }

    impl Default for HeaderSpec {
        fn default() -> Self {
            Self {
                key_frame: true,
                intra_only: false,
                show_frame: true,
                width: 64,
                height: 64,
                refresh_frame_flags: 0x01,
                ref_frame_idx: [0, 1, 2],
                size_from_ref: None,
                interp_filter: Some(1),
                base_q_idx: 60,
                lf_level: 0,
                lf_sharpness: 0,
                tile_cols_log2_increments: 0,
                refresh_frame_context: true,
                frame_parallel: false,
                compressed_header_size: 0,
            }
        }
    }

    /// Writes a profile 0 uncompressed header. The compressed header must follow on a byte
    /// boundary, which the writer guarantees by flushing.
    pub(crate) fn write_header(spec: &HeaderSpec) -> Vec<u8> {
        let mut out = vec![];
        {
            let mut w = BitWriter::new(&mut out);
            let mut f = |bits: usize, value: u32| {
                w.write_f(bits, value).unwrap();
            };

            f(2, FRAME_MARKER);
            f(1, 0); // profile low
            f(1, 0); // profile high
            f(1, 0); // show_existing_frame
            f(1, !spec.key_frame as u32);
            f(1, spec.show_frame as u32);
            f(1, 0); // error_resilient_mode

            if spec.key_frame {
                f(24, SYNC_CODE);
                f(3, 0); // color space
                f(1, 0); // color range
                f(16, spec.width - 1);
                f(16, spec.height - 1);
                f(1, 0); // render size
            } else {
                if !spec.show_frame {
                    f(1, spec.intra_only as u32);
                }
                f(2, 0); // reset_frame_context

                if spec.intra_only {
                    f(24, SYNC_CODE);
                    f(8, spec.refresh_frame_flags as u32);
                    f(16, spec.width - 1);
                    f(16, spec.height - 1);
                    f(1, 0);
                } else {
                    f(8, spec.refresh_frame_flags as u32);
                    for idx in spec.ref_frame_idx {
                        f(3, idx as u32);
                        f(1, 0); // sign bias
                    }

                    match spec.size_from_ref {
                        Some(i) => {
                            for _ in 0..i {
                                f(1, 0);
                            }
                            f(1, 1);
                        }
                        None => {
                            f(3, 0);
                            f(16, spec.width - 1);
                            f(16, spec.height - 1);
                        }
                    }
                    f(1, 0); // render size
                    f(1, 0); // allow_high_precision_mv

                    match spec.interp_filter {
                        Some(literal) => {
                            f(1, 0);
                            f(2, literal);
                        }
                        None => f(1, 1),
                    }
                }
            }

            f(1, spec.refresh_frame_context as u32);
            f(1, spec.frame_parallel as u32);
            f(2, 0); // frame_context_idx

            f(6, spec.lf_level as u32);
            f(3, spec.lf_sharpness as u32);
            f(1, 0); // mode_ref_delta_enabled

            f(8, spec.base_q_idx as u32);
            f(1, 0);
            f(1, 0);
            f(1, 0);

            f(1, 0); // segmentation

            let sb64_cols = (spec.width + 63) / 64;
            let min_log2 = min_log2_tile_cols(sb64_cols);
            let max_log2 = max_log2_tile_cols(sb64_cols);
            let mut log2 = min_log2;
            for _ in 0..spec.tile_cols_log2_increments {
                f(1, 1);
                log2 += 1;
            }
            if log2 < max_log2 {
                f(1, 0);
            }
            f(1, 0); // tile rows

            f(16, spec.compressed_header_size as u32);
            w.flush().unwrap();
        }

        out
    }

    #[test]
    fn parse_key_frame() {
        let data = write_header(&HeaderSpec {
            width: 352,
            height: 288,
            base_q_idx: 0,
            compressed_header_size: 17,
            ..Default::default()
        });

        let mut parser = Parser::default();
        let frames = parser.parse_chunk(&data).unwrap();
        assert_eq!(frames.len(), 1);

        let h = &frames[0].header;
        assert_eq!(h.frame_type, FrameType::KeyFrame);
        assert_eq!(h.profile, Profile::Profile0);
        assert_eq!(h.bit_depth, BitDepth::Depth8);
        assert!(h.subsampling_x && h.subsampling_y);
        assert_eq!((h.width, h.height), (352, 288));
        assert_eq!((h.render_width, h.render_height), (352, 288));
        assert_eq!(h.refresh_frame_flags, 0xff);
        assert!(h.lossless);
        assert_eq!(h.mi_cols(), 44);
        assert_eq!(h.sb64_cols(), 6);
        assert_eq!(h.header_size_in_bytes, 17);
        assert_eq!(h.uncompressed_header_size_in_bytes as usize, data.len());
        // Past independence: intra frames use the default loop filter deltas.
        assert_eq!(h.lf.ref_deltas, [1, 0, -1, -1]);
    }

    #[test]
    fn parse_inter_frame_with_size_from_ref() {
        let mut parser = Parser::default();

        let key = write_header(&HeaderSpec {
            width: 128,
            height: 96,
            ..Default::default()
        });
        parser.parse_chunk(&key).unwrap();

        let inter = write_header(&HeaderSpec {
            key_frame: false,
            size_from_ref: Some(1),
            interp_filter: None,
            ..Default::default()
        });
        let frames = parser.parse_chunk(&inter).unwrap();
        let h = &frames[0].header;

        assert_eq!(h.frame_type, FrameType::InterFrame);
        assert_eq!((h.width, h.height), (128, 96));
        assert_eq!(h.ref_frame_idx, [0, 1, 2]);
        assert_eq!(h.interpolation_filter, InterpolationFilter::Switchable);
        assert!(!h.frame_is_intra());
    }

    #[test]
    fn size_copied_from_an_empty_slot() {
        let inter = write_header(&HeaderSpec {
            key_frame: false,
            size_from_ref: Some(0),
            ..Default::default()
        });
        assert!(Parser::default().parse_chunk(&inter).is_err());

        // Explicit sizes are not checked against the references here.
        let inter = write_header(&HeaderSpec {
            key_frame: false,
            width: 64 * 17,
            ..Default::default()
        });
        let frames = Parser::default().parse_chunk(&inter).unwrap();
        assert_eq!(frames[0].header.width, 64 * 17);
    }

    #[test]
    fn invalid_sync_code() {
        let mut data = write_header(&HeaderSpec::default());
        // The sync code starts right after the first byte.
        data[2] ^= 0x10;

        let err = Parser::default().parse_chunk(&data).err().unwrap();
        assert!(format!("{:#}", err).contains("sync code"));
    }

    #[test]
    fn invalid_frame_marker() {
        let data = [0x00u8, 0x00, 0x00, 0x00];
        assert!(Parser::default().parse_chunk(&data).is_err());
    }

    #[test]
    fn empty_chunk() {
        assert!(Parser::default().parse_chunk(&[]).is_err());
    }

    #[test]
    fn parse_superframe() {
        let first = write_header(&HeaderSpec::default());
        let second = write_header(&HeaderSpec {
            key_frame: false,
            show_frame: false,
            intra_only: true,
            ..Default::default()
        });

        let mut chunk = first.clone();
        chunk.extend_from_slice(&second);
        // Marker with 2 bytes per size and 2 frames.
        let marker = 0xc0 | (1 << 3) | 1;
        let index = [
            marker,
            first.len() as u8,
            0,
            second.len() as u8,
            0,
            marker,
        ];
        chunk.extend_from_slice(&index);

        let mut parser = Parser::default();
        let frames = parser.parse_chunk(&chunk).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, first.as_slice());
        assert_eq!(frames[1].data, second.as_slice());
        assert!(frames[1].header.intra_only);
    }

    #[test]
    fn superframe_index_larger_than_chunk() {
        let first = write_header(&HeaderSpec::default());
        let mut chunk = first.clone();
        let marker = 0xc0;
        chunk.extend_from_slice(&[marker, 0xff, marker]);

        assert!(Parser::default().parse_chunk(&chunk).is_err());
    }

    #[test]
    fn trailing_marker_without_index_is_frame_data() {
        let mut data = write_header(&HeaderSpec::default());
        data.push(0xc0);

        let frames = Parser::default().parse_chunk(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.len(), data.len());
    }

    #[test]
    fn empty_superframe_entries_are_skipped() {
        let frame = write_header(&HeaderSpec::default());
        let mut chunk = frame.clone();
        chunk.extend_from_slice(&[0xc1, frame.len() as u8, 0, 0xc1]);

        let frames = Parser::default().parse_chunk(&chunk).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, frame.as_slice());
    }

    #[test]
    fn reference_frame_ordering() {
        assert!(ReferenceFrameType::None < ReferenceFrameType::Intra);
        assert!(ReferenceFrameType::Intra < ReferenceFrameType::Last);
        assert_eq!(ReferenceFrameType::None.index(), 0);
        assert_eq!(ReferenceFrameType::AltRef.index(), 3);
        assert_eq!(ReferenceFrameType::n(2), Some(ReferenceFrameType::Golden));
    }
}
