// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

pub mod vp9;

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Failure kinds reported by the decoder.
///
/// Success is `Ok(_)`; every other outcome maps to exactly one variant. The scope of a failure
/// follows from its kind: `CorruptFrame` only invalidates the frame being decoded, while
/// `UnsupBitstream` and `UnsupFeature` mean the rest of the stream cannot be trusted either.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decoder error: {0}")]
    Error(String),
    #[error("memory error: {0}")]
    MemError(String),
    #[error("ABI mismatch: {0}")]
    AbiMismatch(String),
    #[error("decoder incapable: {0}")]
    Incapable(String),
    #[error("unsupported bitstream: {0}")]
    UnsupBitstream(String),
    #[error("unsupported feature: {0}")]
    UnsupFeature(String),
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("end of list")]
    ListEnd,
}

impl DecodeError {
    /// Whether the error only affects the current frame, i.e. decoding may resume with the next
    /// frame of the stream.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, DecodeError::CorruptFrame(_) | DecodeError::InvalidParam(_))
    }
}

impl From<anyhow::Error> for DecodeError {
    fn from(err: anyhow::Error) -> Self {
        // Header parsing errors are reported with a "Broken stream" prefix. Anything else the
        // parser rejects is a feature we recognize but do not handle.
        let msg = format!("{:#}", err);
        if msg.starts_with("Unsupported") {
            DecodeError::UnsupFeature(msg)
        } else {
            DecodeError::UnsupBitstream(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::DecodeError;

    #[test]
    fn anyhow_errors_are_classified() {
        let err: DecodeError = anyhow!("Broken stream: expected sync code").into();
        assert!(matches!(err, DecodeError::UnsupBitstream(_)));
        assert!(!err.is_frame_local());

        let err: DecodeError = anyhow!("Unsupported: reserved bit set").into();
        assert!(matches!(err, DecodeError::UnsupFeature(_)));

        assert!(DecodeError::CorruptFrame("tile".into()).is_frame_local());
    }
}
