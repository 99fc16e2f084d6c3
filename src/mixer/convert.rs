//! Upload-time sample conversion and resampling for the software mixer.
//!
//! Upload is the designated slow path: payloads are decoded to interleaved
//! f32 and, when the device is already configured at a different rate,
//! resampled to the device rate so the mix loop never converts.

use crate::error::{Result, SonaraError};
use crate::format::{BufferFormat, SampleEncoding};

/// Decode an uploaded payload to interleaved f32 in [-1.0, 1.0].
pub(crate) fn decode_samples(format: BufferFormat, data: &[u8]) -> Result<Vec<f32>> {
    let frames = format.frame_count(data)?;
    let channels = format.layout.channel_count();
    let mut samples = Vec::with_capacity(frames * channels);

    match format.encoding {
        SampleEncoding::U8 => {
            for &byte in data {
                samples.push((f32::from(byte) - 128.0) / 128.0);
            }
        }
        SampleEncoding::I16 => {
            for chunk in data.chunks_exact(2) {
                let value = i16::from_ne_bytes([chunk[0], chunk[1]]);
                samples.push(f32::from(value) / 32768.0);
            }
        }
        SampleEncoding::F32 => {
            for chunk in data.chunks_exact(4) {
                samples.push(f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
    }
    Ok(samples)
}

/// Resample interleaved f32 audio from `source_rate` to `target_rate`.
///
/// Processes per channel in fixed chunks; the tail is zero-padded, so the
/// output length is within one chunk of the exact ratio.
pub(crate) fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(SonaraError::AudioFormat(
            "Sample rates must be greater than 0".to_owned(),
        ));
    }

    use rubato::{FftFixedIn, Resampler};

    const CHUNK_SIZE: usize = 1024;

    let frames = samples.len() / channels;
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in frame.iter().enumerate() {
            planar[channel].push(sample);
        }
    }

    let mut resampled: Vec<Vec<f32>> = Vec::with_capacity(channels);
    for channel_samples in &planar {
        let mut resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            CHUNK_SIZE,
            2,
            1,
        )
        .map_err(|e| SonaraError::AudioFormat(format!("Failed to create resampler: {e}")))?;

        let mut output = Vec::new();
        let mut index = 0;
        while index < channel_samples.len() {
            let take = (channel_samples.len() - index).min(CHUNK_SIZE);
            let mut chunk = vec![0.0f32; CHUNK_SIZE];
            chunk[..take].copy_from_slice(&channel_samples[index..index + take]);

            let waves_out = resampler
                .process(&[chunk], None)
                .map_err(|e| SonaraError::AudioFormat(format!("Resampling error: {e}")))?;
            if let Some(first) = waves_out.first() {
                output.extend_from_slice(first);
            }
            index += take;
        }
        resampled.push(output);
    }

    let out_frames = resampled.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(out_frames * channels);
    for frame in 0..out_frames {
        for channel_samples in &resampled {
            interleaved.push(channel_samples[frame]);
        }
    }
    Ok(interleaved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelLayout;

    #[test]
    fn test_decode_u8_midpoint_is_silence() {
        let fmt = BufferFormat::new(SampleEncoding::U8, ChannelLayout::Mono);
        let samples = decode_samples(fmt, &[128, 0, 255]).unwrap();
        assert_eq!(samples[0], 0.0);
        assert!(samples[1] < -0.99);
        assert!(samples[2] > 0.98);
    }

    #[test]
    fn test_decode_i16_scaling() {
        let fmt = BufferFormat::new(SampleEncoding::I16, ChannelLayout::Mono);
        let data: Vec<u8> = [0i16, i16::MAX, i16::MIN]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let samples = decode_samples(fmt, &data).unwrap();
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 1.0).abs() < 1e-3);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_decode_f32_passthrough() {
        let fmt = BufferFormat::new(SampleEncoding::F32, ChannelLayout::Stereo);
        let data: Vec<u8> = [0.5f32, -0.25, 1.0, 0.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let samples = decode_samples(fmt, &data).unwrap();
        assert_eq!(samples, vec![0.5, -0.25, 1.0, 0.0]);
    }

    #[test]
    fn test_resample_halves_frame_count() {
        let samples = vec![0.1f32; 8192];
        let out = resample_interleaved(&samples, 1, 44100, 22050).unwrap();
        let ratio = out.len() as f64 / samples.len() as f64;
        assert!((ratio - 0.5).abs() < 0.15, "ratio was {ratio}");
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.25f32, -0.5, 0.75];
        let out = resample_interleaved(&samples, 1, 48000, 48000).unwrap();
        assert_eq!(out, samples);
    }
}
