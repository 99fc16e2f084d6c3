//! Sample format descriptors for buffer uploads.
//!
//! Uploaded payloads are interleaved: for stereo, `[L0, R0, L1, R1, ...]`.
//! Backends convert to their internal representation at upload time; the
//! caller's bytes are never retained past the call.

use crate::error::{Result, SonaraError};

/// Encoding of a single sample in an uploaded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Unsigned 8-bit, midpoint 128.
    U8,
    /// Signed 16-bit, native endianness.
    I16,
    /// 32-bit float in [-1.0, 1.0].
    F32,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn channel_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Format of one uploaded buffer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFormat {
    pub encoding: SampleEncoding,
    pub layout: ChannelLayout,
}

impl BufferFormat {
    pub fn new(encoding: SampleEncoding, layout: ChannelLayout) -> Self {
        Self { encoding, layout }
    }

    pub fn bytes_per_frame(self) -> usize {
        self.encoding.bytes_per_sample() * self.layout.channel_count()
    }

    /// Number of frames in `data`, or an error if the payload is not a whole
    /// number of frames.
    pub fn frame_count(self, data: &[u8]) -> Result<usize> {
        let stride = self.bytes_per_frame();
        if data.len() % stride != 0 {
            return Err(SonaraError::AudioFormat(format!(
                "Payload of {} bytes is not a multiple of the {}-byte frame size",
                data.len(),
                stride
            )));
        }
        Ok(data.len() / stride)
    }
}
