//! Voices: the mixer's per-source render state.
//!
//! A voice is the deep copy of a source's committed parameters plus the mix
//! cursor. Mono content is spatialized against the owning context's
//! listener (inverse-distance attenuation, constant-power pan); stereo
//! content plays back unspatialized.

use crate::context::ListenerParams;
use crate::source::{SourceParams, SourceState};
use std::sync::Arc;

/// Converted, device-resident content of one buffer.
#[derive(Debug, Clone)]
pub(crate) struct MixerBuffer {
    /// Interleaved f32 samples.
    pub samples: Arc<Vec<f32>>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl MixerBuffer {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Voice {
    /// Context token this voice belongs to.
    pub ctx: u64,
    /// Committed copy of the source's staged block.
    pub params: SourceParams,
    /// Render-side playback state; diverges from `params.state` when a
    /// non-looping voice runs off the end of its buffer.
    pub play_state: SourceState,
    /// Fractional frame cursor into the attached buffer.
    pub cursor: f64,
}

impl Voice {
    pub fn new(ctx: u64) -> Self {
        Self {
            ctx,
            params: SourceParams::default(),
            play_state: SourceState::Initial,
            cursor: 0.0,
        }
    }

    /// Apply a freshly committed parameter block.
    pub fn apply(&mut self, params: &SourceParams) {
        let previous = self.play_state;
        match params.state {
            SourceState::Playing => {
                if previous != SourceState::Playing && previous != SourceState::Paused {
                    self.cursor = 0.0;
                }
                self.play_state = SourceState::Playing;
            }
            SourceState::Stopped | SourceState::Initial => {
                self.cursor = 0.0;
                self.play_state = params.state;
            }
            SourceState::Paused => {
                if previous == SourceState::Playing {
                    self.play_state = SourceState::Paused;
                }
            }
        }
        if self.params.buffer != params.buffer {
            self.cursor = 0.0;
        }
        self.params = *params;
    }

    /// Mix this voice into `out` (interleaved, `out_channels` wide) at
    /// `device_rate`. Advances the cursor; a non-looping voice that reaches
    /// the end of its buffer stops.
    pub fn mix(
        &mut self,
        out: &mut [f32],
        out_channels: usize,
        device_rate: u32,
        buffer: &MixerBuffer,
        listener: &ListenerParams,
    ) {
        if self.play_state != SourceState::Playing {
            return;
        }
        let frames_total = buffer.frame_count();
        if frames_total == 0 || device_rate == 0 {
            return;
        }

        // Pitch shift and any rate mismatch fold into one cursor step.
        let step =
            f64::from(self.params.pitch) * f64::from(buffer.sample_rate) / f64::from(device_rate);
        if step <= 0.0 {
            return;
        }

        let (left_gain, right_gain) = self.frame_gains(buffer.channels, listener);

        for frame in out.chunks_exact_mut(out_channels) {
            if self.cursor >= frames_total as f64 {
                if self.params.looping {
                    self.cursor %= frames_total as f64;
                } else {
                    self.play_state = SourceState::Stopped;
                    self.cursor = 0.0;
                    break;
                }
            }

            let index = (self.cursor as usize).min(frames_total - 1) * buffer.channels;
            let (left, right) = if buffer.channels >= 2 {
                (buffer.samples[index], buffer.samples[index + 1])
            } else {
                let sample = buffer.samples[index];
                (sample, sample)
            };

            match frame {
                [mono] => *mono += 0.5 * (left * left_gain + right * right_gain),
                [l, r, ..] => {
                    *l += left * left_gain;
                    *r += right * right_gain;
                }
                [] => {}
            }

            self.cursor += step;
        }
    }

    /// Per-channel gains for the current listener. Stereo content skips
    /// spatialization and only scales by source and listener gain.
    fn frame_gains(&self, buffer_channels: usize, listener: &ListenerParams) -> (f32, f32) {
        let base = self.params.gain * listener.gain;
        if buffer_channels >= 2 {
            return (base, base);
        }

        let offset = self.params.position - listener.pose.position;
        let distance = offset.length();
        let attenuation = 1.0 / (1.0 + distance);
        let lateral = if distance > 1e-6 {
            (offset / distance).dot(listener.pose.right()).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let overall = base * attenuation;
        (
            overall * ((1.0 - lateral) * 0.5).sqrt(),
            overall * ((1.0 + lateral) * 0.5).sqrt(),
        )
    }
}
