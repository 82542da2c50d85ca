// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! vp9dec, a simple program decoding IVF files with the software VP9 decoder. Capable of
//! computing MD5 checksums from the input and writing the raw decoded frames to a file.

use std::fs::File;
use std::io::Read;
use std::io::Write;

use cros_vp9dec::bitstream_utils::IvfFileHeader;
use cros_vp9dec::bitstream_utils::IvfIterator;
use cros_vp9dec::decoders::vp9::decoder::DecodedFrame;
use cros_vp9dec::decoders::vp9::decoder::Decoder;
use cros_vp9dec::decoders::vp9::decoder::DecoderConfig;
use cros_vp9dec::utils::simple_playback_loop;

use crate::util::decide_output_file_name;
use crate::util::golden_md5s;
use crate::util::Args;
use crate::util::Md5Computation;

mod util;

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = {
        let mut buf = Vec::new();
        File::open(&args.input)
            .expect("error opening input file")
            .read_to_end(&mut buf)
            .expect("error reading input file");
        buf
    };

    let ivf_header = IvfFileHeader::parse(&input).expect("invalid IVF file");
    if ivf_header.codec != IvfFileHeader::CODEC_VP9 {
        log::warn!(
            "IVF file announces codec {:?}, decoding as VP9 anyway",
            String::from_utf8_lossy(&ivf_header.codec)
        );
    }

    let mut output = if !args.multiple_output_files {
        args.output
            .as_ref()
            .map(|p| File::create(p).expect("error creating output file"))
    } else {
        None
    };

    let mut golden_iter = golden_md5s(&args.golden).into_iter();
    let need_per_frame_md5 = args.compute_md5 == Some(Md5Computation::Frame) || args.golden.is_some();
    let mut stream_md5 = md5::Context::new();
    let mut frame_idx = 0;

    let mut on_new_frame = |frame: DecodedFrame| {
        let mut frame_data = Vec::new();
        frame.surface.write_planar(&mut frame_data);

        if args.multiple_output_files {
            let file_name = decide_output_file_name(
                args.output
                    .as_ref()
                    .expect("multiple_output_files need output to be set"),
                frame_idx,
            );
            let mut output = File::create(file_name).expect("error creating output file");
            output
                .write_all(&frame_data)
                .expect("failed to write to output file");
        } else if let Some(output) = &mut output {
            output
                .write_all(&frame_data)
                .expect("failed to write to output file");
        }

        if args.compute_md5 == Some(Md5Computation::Stream) {
            stream_md5.consume(&frame_data);
        }

        if need_per_frame_md5 {
            let frame_md5 = format!("{:x}", md5::compute(&frame_data));
            if args.compute_md5 == Some(Md5Computation::Frame) {
                println!("{}", frame_md5);
            }

            if let Some(golden) = golden_iter.next() {
                assert_eq!(frame_md5, golden, "frame {} does not match its golden MD5", frame_idx);
            }
        }

        frame_idx += 1;
    };

    let mut decoder = Decoder::new(DecoderConfig {
        threads: args.threads.unwrap_or(DecoderConfig::default().threads),
        lf_sync_range: args.lf_sync_range,
        strict_padding: args.strict_padding,
    });

    let stats = simple_playback_loop(
        &mut decoder,
        IvfIterator::new(&input).expect("invalid IVF file"),
        &mut on_new_frame,
        args.stop_on_error,
    )
    .expect("decoding failed");

    log::info!(
        "decoded {} chunks into {} frames, {} chunks failed",
        stats.chunks,
        stats.shown_frames,
        stats.failed_chunks
    );

    if args.compute_md5 == Some(Md5Computation::Stream) {
        println!("{:x}", stream_md5.compute());
    }
}
