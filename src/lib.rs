// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A software VP9 decoder.
//!
//! The entry point is [`decoders::vp9::decoder::Decoder`], which turns VP9 chunks (possibly
//! superframes) into reconstructed [`decoders::vp9::frame::Surface`]s. Lower-level access to a
//! single already-parsed frame is available through [`decoders::vp9::decode`].

pub mod bitstream_utils;
pub mod decoders;
pub mod utils;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Whether `self` can contain `other`.
    pub fn can_contain(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// Copies the first `width` x `height` 8-bit samples of a planar `u16` buffer with stride
/// `stride` into `dst`, removing any extra padding.
pub fn plane_copy_8bit(src: &[u16], stride: usize, dst: &mut Vec<u8>, width: usize, height: usize) {
    for row in src.chunks(stride).take(height) {
        dst.extend(row[..width].iter().map(|&s| s as u8));
    }
}

/// Copies the first `width` x `height` samples of a planar high bit depth buffer into `dst` as
/// little-endian 16-bit words, removing any extra padding.
pub fn plane_copy_16bit(
    src: &[u16],
    stride: usize,
    dst: &mut Vec<u8>,
    width: usize,
    height: usize,
) {
    for row in src.chunks(stride).take(height) {
        for &s in &row[..width] {
            dst.extend_from_slice(&s.to_le_bytes());
        }
    }
}
