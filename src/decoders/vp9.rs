// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A software VP9 decoder.
//!
//! Frames go through the same stages as in any block based codec: header parsing, mode and
//! motion vector decoding, coefficient decoding, prediction plus inverse transform and finally
//! deblocking. Tiles are independent until the loop filter and may be decoded in parallel.

pub mod bool_decoder;
#[cfg(test)]
mod bool_encoder;
pub mod compressed_header;
pub mod decoder;
pub mod detokenize;
pub mod entropy;
pub mod frame;
pub mod idct;
pub mod inter;
pub mod intra;
pub mod loopfilter;
pub mod modes;
pub mod mvref;
pub mod parser;
pub mod probs;
pub mod quant;
pub mod scheduler;
pub mod tile;
pub mod types;

use log::error;

use crate::decoders::vp9::decoder::decode_frame;
use crate::decoders::vp9::decoder::split_frame;
use crate::decoders::vp9::decoder::DecoderConfig;
use crate::decoders::vp9::decoder::FrameParams;
use crate::decoders::vp9::entropy::FrameContext;
use crate::decoders::vp9::entropy::FrameCounts;
use crate::decoders::vp9::frame::MvBuffer;
use crate::decoders::vp9::frame::Surface;
use crate::decoders::vp9::parser::Header;
use crate::decoders::vp9::parser::REFS_PER_FRAME;
use crate::decoders::DecodeError;

fn try_decode(
    hdr: &Header,
    fc: &mut FrameContext,
    counts: &mut FrameCounts,
    output: &mut Surface,
    refs: [Option<&Surface>; REFS_PER_FRAME],
    bitstream: &[u8],
    prev_mvs: Option<&MvBuffer>,
) -> Result<MvBuffer, DecodeError> {
    let (compressed, tiles) = split_frame(hdr, bitstream)?;
    let ch = compressed_header::parse(compressed, hdr, fc)?;
    let mut segment_ids = vec![0; hdr.mi_cols() * hdr.mi_rows()];

    let params = FrameParams {
        hdr,
        ch: &ch,
        fc: &*fc,
        counts,
        refs,
        prev_mvs,
        prev_segment_ids: None,
        segment_ids: &mut segment_ids,
    };

    decode_frame(params, output, tiles, &DecoderConfig::default())
}

/// Decodes one frame of `bitstream`, whose uncompressed header has already been parsed into
/// `hdr`.
///
/// `fc` holds the probabilities to start from and receives the updates of the compressed header.
/// `counts` receives the symbols counts for adaptation, which is left to the caller like the
/// lifetime of both tables. `prev_mvs` are the motion vectors returned for the previous frame,
/// when the caller allows their use.
///
/// Returns whether the frame was decoded, and if so its motion vectors. `output` is not modified
/// when one of the headers is invalid.
pub fn decode(
    hdr: &Header,
    fc: &mut FrameContext,
    counts: &mut FrameCounts,
    output: &mut Surface,
    refs: [Option<&Surface>; REFS_PER_FRAME],
    bitstream: &[u8],
    prev_mvs: Option<&MvBuffer>,
) -> (bool, Option<MvBuffer>) {
    match try_decode(hdr, fc, counts, output, refs, bitstream, prev_mvs) {
        Ok(mvs) => (true, Some(mvs)),
        Err(e) => {
            error!("failed to decode frame: {}", e);
            (false, None)
        }
    }
}
