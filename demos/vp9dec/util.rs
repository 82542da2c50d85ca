// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Md5Computation {
    Stream,
    Frame,
}

impl FromStr for Md5Computation {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Md5Computation::Stream),
            "frame" => Ok(Md5Computation::Frame),
            _ => Err("unrecognized MD5 computation option. Valid values: stream, frame"),
        }
    }
}

/// Software VP9 decoder reading IVF files
#[derive(Debug, FromArgs)]
pub struct Args {
    /// input IVF file
    #[argh(positional)]
    pub input: PathBuf,

    /// output file to write the decoded frames to, in planar layout
    #[argh(option)]
    pub output: Option<PathBuf>,

    /// whether to decode a frame per file. Requires "output" to be set.
    #[argh(switch)]
    pub multiple_output_files: bool,

    /// number of tile and loop filter threads. Default: one per core, at most 8.
    #[argh(option)]
    pub threads: Option<usize>,

    /// rows of superblocks the loop filter may lag behind the reconstruction
    #[argh(option)]
    pub lf_sync_range: Option<usize>,

    /// reject frames whose tiles do not end with zero padding
    #[argh(switch)]
    pub strict_padding: bool,

    /// stop at the first frame that fails to decode
    #[argh(switch)]
    pub stop_on_error: bool,

    /// whether to display the MD5 of the decoded stream, and at which granularity (stream or
    /// frame)
    #[argh(option)]
    pub compute_md5: Option<Md5Computation>,

    /// path to a file with the golden MD5 sum of each frame, one per line
    #[argh(option)]
    pub golden: Option<PathBuf>,
}

/// Decide the output file name when multiple_output_files is set
pub fn decide_output_file_name(output: &Path, index: usize) -> PathBuf {
    let stem = output.file_stem().and_then(OsStr::to_str).unwrap_or("frame");
    let file_name = match output.extension().and_then(OsStr::to_str) {
        Some(extension) => format!("{}_{}.{}", stem, index, extension),
        None => format!("{}_{}", stem, index),
    };

    output.with_file_name(file_name)
}

/// Reads the golden MD5 sums of `path`. Only the first word of each line is used, so files
/// produced by `md5sum` work too.
pub fn golden_md5s(path: &Option<PathBuf>) -> Vec<String> {
    let Some(path) = path else {
        return vec![];
    };

    let contents = fs::read_to_string(path).expect("error reading golden file");
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_lowercase)
        .collect()
}
