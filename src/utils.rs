// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

use std::io::Write;

use log::warn;

use crate::decoders::vp9::decoder::DecodedFrame;
use crate::decoders::vp9::decoder::Decoder;
use crate::decoders::DecodeError;

/// Outcome of [`simple_playback_loop`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Number of chunks submitted to the decoder.
    pub chunks: usize,
    /// Number of frames handed to the callback.
    pub shown_frames: usize,
    /// Number of chunks the decoder rejected.
    pub failed_chunks: usize,
}

/// Simple decoding loop that plays the stream once from start to finish.
///
/// Chunks the decoder rejects are skipped and decoding resumes at the next frame that does not
/// depend on earlier ones, unless `stop_on_error` is set.
pub fn simple_playback_loop<R, I>(
    decoder: &mut Decoder,
    stream_iter: I,
    on_new_frame: &mut dyn FnMut(DecodedFrame),
    stop_on_error: bool,
) -> Result<PlaybackStats, DecodeError>
where
    R: AsRef<[u8]>,
    I: Iterator<Item = R>,
{
    let mut stats = PlaybackStats::default();

    for (chunk_num, chunk) in stream_iter.enumerate() {
        stats.chunks += 1;

        match decoder.decode_chunk(chunk.as_ref()) {
            Ok(frames) => {
                for frame in frames {
                    stats.shown_frames += 1;
                    on_new_frame(frame);
                }
            }
            Err(e) if stop_on_error => return Err(e),
            Err(e) => {
                warn!("skipping chunk {}: {}", chunk_num, e);
                stats.failed_chunks += 1;
            }
        }
    }

    Ok(stats)
}

/// Writes the visible samples of `frame` to `writer` in planar layout.
pub fn write_planar_frame(frame: &DecodedFrame, writer: &mut impl Write) -> std::io::Result<()> {
    let mut planar = Vec::new();
    frame.surface.write_planar(&mut planar);
    writer.write_all(&planar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::vp9::decoder::tests::quadrant_key_frame;
    use crate::decoders::vp9::decoder::tests::zero_motion_inter_frame;
    use crate::decoders::vp9::decoder::DecoderConfig;

    fn decoder() -> Decoder {
        Decoder::new(DecoderConfig {
            threads: 1,
            ..Default::default()
        })
    }

    #[test]
    fn playback_skips_frames_until_a_key_frame() {
        let stream = vec![
            zero_motion_inter_frame(Default::default()),
            quadrant_key_frame(Default::default()),
            zero_motion_inter_frame(Default::default()),
        ];

        let mut crcs = vec![];
        let stats = simple_playback_loop(
            &mut decoder(),
            stream.iter(),
            &mut |frame| crcs.push(frame.surface.crc32()),
            false,
        )
        .unwrap();

        assert_eq!(
            stats,
            PlaybackStats {
                chunks: 3,
                shown_frames: 2,
                failed_chunks: 1,
            }
        );
        // The inter frame copies the key frame.
        assert_eq!(crcs[0], crcs[1]);
    }

    #[test]
    fn playback_can_stop_at_the_first_error() {
        let stream = [zero_motion_inter_frame(Default::default())];
        let res = simple_playback_loop(&mut decoder(), stream.iter(), &mut |_| (), true);
        assert!(matches!(res, Err(DecodeError::CorruptFrame(_))));
    }

    #[test]
    fn planar_output_has_every_visible_sample() {
        let frames = decoder()
            .decode_chunk(&quadrant_key_frame(Default::default()))
            .unwrap();

        let mut out = vec![];
        write_planar_frame(&frames[0], &mut out).unwrap();
        assert_eq!(out.len(), 64 * 64 + 2 * 32 * 32);
        assert_eq!(out[0], 128);
    }
}
