//! The built-in software mixer backend.
//!
//! Implements the full capability contract in software: a fixed-capacity
//! voice pool (sources are a deliberately finite resource), an unbounded
//! buffer map holding content converted at upload time, and per-context
//! listener blocks. Rendering either feeds the default host output through
//! a ring buffer or, for headless use, mixes into a discarded scratch block
//! on every upkeep call.

mod convert;
mod output;
mod voice;

use crate::backend::{
    BackendDriver, BufferToken, BufferView, ContextToken, ContextView, DeviceBackend, SourceToken,
    SourceView,
};
use crate::config::{self, ContextAttr};
use crate::context::ListenerParams;
use crate::error::{Result, SonaraError};
use crate::format::BufferFormat;
use output::OutputHandle;
use ringbuf::HeapProd;
use ringbuf::traits::{Observer, Producer};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use voice::{MixerBuffer, Voice};

/// The device name the mixer claims; it also claims the default open.
pub const MIXER_DEVICE_NAME: &str = "Sonara Software Mixer";

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_CHANNELS: u16 = 2;

#[derive(Debug, Clone)]
pub struct MixerSettings {
    /// Hard ceiling on simultaneously allocated sources.
    pub max_voices: usize,
    /// Frames rendered per mix block.
    pub block_size: usize,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            max_voices: 64,
            block_size: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    /// Mix and discard; upkeep is the render pass. For headless use and
    /// tests.
    Discard,
    /// Feed the default host output through a ring buffer.
    HostOutput,
}

/// Driver entry for the software mixer. Not a singleton: every open mints
/// an independent device.
pub struct MixerDriver {
    settings: MixerSettings,
    sink: SinkKind,
}

impl MixerDriver {
    /// A headless mixer: renders on upkeep, discards the result.
    pub fn new() -> Self {
        Self {
            settings: MixerSettings::default(),
            sink: SinkKind::Discard,
        }
    }

    pub fn with_settings(settings: MixerSettings) -> Self {
        Self {
            settings,
            sink: SinkKind::Discard,
        }
    }

    /// Route rendered audio to the default host output device.
    pub fn with_host_output(mut self) -> Self {
        self.sink = SinkKind::HostOutput;
        self
    }
}

impl Default for MixerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendDriver for MixerDriver {
    fn enumerate(&self, callback: &mut dyn FnMut(&str)) {
        callback(MIXER_DEVICE_NAME);
    }

    fn open(&self, name: Option<&str>) -> Option<Box<dyn DeviceBackend>> {
        match name {
            None => {}
            Some(requested) if requested == MIXER_DEVICE_NAME => {}
            Some(_) => return None,
        }
        Some(Box::new(MixerDevice::new(self.settings.clone(), self.sink)))
    }
}

#[derive(Debug, Clone, Copy)]
struct MixerConfig {
    sample_rate: u32,
    channels: u16,
}

struct MixerState {
    config: Option<MixerConfig>,
    contexts: HashSet<u64>,
    listeners: HashMap<u64, ListenerParams>,
    voices: Vec<Option<Voice>>,
    buffers: HashMap<u64, MixerBuffer>,
    next_token: u64,
}

impl MixerState {
    fn mint(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

pub struct MixerDevice {
    settings: MixerSettings,
    sink: SinkKind,
    state: Mutex<MixerState>,
    // Lock order: state, then producer, then output.
    producer: Mutex<Option<HeapProd<f32>>>,
    output: Mutex<Option<OutputHandle>>,
}

impl MixerDevice {
    fn new(settings: MixerSettings, sink: SinkKind) -> Self {
        let voices = (0..settings.max_voices).map(|_| None).collect();
        Self {
            settings,
            sink,
            state: Mutex::new(MixerState {
                config: None,
                contexts: HashSet::new(),
                listeners: HashMap::new(),
                voices,
                buffers: HashMap::new(),
                next_token: 0,
            }),
            producer: Mutex::new(None),
            output: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mix every playing voice into `out`. Voices are taken out of the
    /// state for the duration so they can borrow the buffer map.
    fn mix_into(state: &mut MixerState, out: &mut [f32], channels: usize, sample_rate: u32) {
        let mut voices = std::mem::take(&mut state.voices);
        for voice in voices.iter_mut().flatten() {
            let Some(buffer_token) = voice.params.buffer else {
                continue;
            };
            let Some(buffer) = state.buffers.get(&buffer_token.raw()) else {
                continue;
            };
            let listener = state
                .listeners
                .get(&voice.ctx)
                .copied()
                .unwrap_or_default();
            voice.mix(out, channels, sample_rate, buffer, &listener);
        }
        state.voices = voices;
    }

    #[cfg(test)]
    fn buffer(&self, buf: BufferToken) -> Option<MixerBuffer> {
        self.lock_state().buffers.get(&buf.raw()).cloned()
    }

    #[cfg(test)]
    fn voice_cursor(&self, src: SourceToken) -> Option<f64> {
        self.lock_state()
            .voices
            .get(src.raw() as usize)
            .and_then(|slot| slot.as_ref().map(|voice| voice.cursor))
    }
}

impl DeviceBackend for MixerDevice {
    fn configure(&self, attrs: &[ContextAttr]) -> Result<()> {
        let requested_rate = config::requested_sample_rate(attrs);
        let requested_channels = config::requested_channels(attrs);

        let mut state = self.lock_state();
        if let Some(existing) = state.config {
            // One physical format per open; a conflicting re-configure is a
            // legitimate failure that leaves the first configuration alone.
            if requested_rate.is_some_and(|rate| rate != existing.sample_rate) {
                return Err(SonaraError::Configuration(format!(
                    "device already configured at {} Hz",
                    existing.sample_rate
                )));
            }
            if requested_channels.is_some_and(|channels| channels != existing.channels) {
                return Err(SonaraError::Configuration(format!(
                    "device already configured with {} channels",
                    existing.channels
                )));
            }
            return Ok(());
        }

        let config = MixerConfig {
            sample_rate: requested_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: requested_channels.unwrap_or(DEFAULT_CHANNELS),
        };
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(SonaraError::Configuration(
                "sample rate and channel count must be greater than 0".to_owned(),
            ));
        }

        if self.sink == SinkKind::HostOutput {
            let ring_capacity = self.settings.block_size * config.channels as usize * 8;
            let (producer, handle) =
                output::start_output(config.sample_rate, config.channels, ring_capacity)?;
            *self.producer.lock().unwrap_or_else(PoisonError::into_inner) = Some(producer);
            *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        state.config = Some(config);
        log::debug!(
            "mixer configured: {} Hz, {} channels",
            config.sample_rate,
            config.channels
        );
        Ok(())
    }

    fn close(&self) {
        // Stop playback before returning; close is synchronous.
        if let Some(mut handle) = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.stop();
        }
        *self.producer.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let mut state = self.lock_state();
        state.config = None;
        state.contexts.clear();
        state.listeners.clear();
        state.buffers.clear();
        for slot in &mut state.voices {
            *slot = None;
        }
    }

    fn allocate_context(&self) -> Option<ContextToken> {
        let mut state = self.lock_state();
        state.config?;
        let token = state.mint();
        state.contexts.insert(token);
        Some(ContextToken::new(token))
    }

    fn free_context(&self, ctx: ContextToken) {
        let mut state = self.lock_state();
        state.contexts.remove(&ctx.raw());
        state.listeners.remove(&ctx.raw());
        for slot in &mut state.voices {
            if slot.as_ref().is_some_and(|voice| voice.ctx == ctx.raw()) {
                *slot = None;
            }
        }
    }

    fn allocate_source(&self, ctx: ContextToken) -> Option<SourceToken> {
        let mut state = self.lock_state();
        if !state.contexts.contains(&ctx.raw()) {
            return None;
        }
        // The pool is the declared ceiling; no slow-path fallback.
        let slot = state.voices.iter().position(Option::is_none)?;
        state.voices[slot] = Some(Voice::new(ctx.raw()));
        Some(SourceToken::new(slot as u64))
    }

    fn free_source(&self, src: SourceToken) {
        let mut state = self.lock_state();
        if let Some(slot) = state.voices.get_mut(src.raw() as usize) {
            *slot = None;
        }
    }

    fn allocate_buffer(&self) -> Option<BufferToken> {
        let mut state = self.lock_state();
        let token = state.mint();
        state.buffers.insert(
            token,
            MixerBuffer {
                samples: Arc::new(Vec::new()),
                channels: 1,
                sample_rate: 0,
            },
        );
        Some(BufferToken::new(token))
    }

    fn free_buffer(&self, buf: BufferToken) {
        self.lock_state().buffers.remove(&buf.raw());
    }

    fn upload(
        &self,
        buf: BufferToken,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        if sample_rate == 0 {
            return Err(SonaraError::AudioFormat(
                "sample rate must be greater than 0".to_owned(),
            ));
        }
        let device_rate = {
            let state = self.lock_state();
            if !state.buffers.contains_key(&buf.raw()) {
                return Err(SonaraError::InvalidHandle(format!(
                    "buffer token {}",
                    buf.raw()
                )));
            }
            state.config.map(|config| config.sample_rate)
        };

        // Convert (and resample) outside the lock; this is the slow path and
        // the caller's bytes must not be retained past this call.
        let channels = format.layout.channel_count();
        let mut samples = convert::decode_samples(format, data)?;
        let mut stored_rate = sample_rate;
        if let Some(device_rate) = device_rate {
            if device_rate != sample_rate {
                samples = convert::resample_interleaved(&samples, channels, sample_rate, device_rate)?;
                stored_rate = device_rate;
            }
        }

        let replacement = MixerBuffer {
            samples: Arc::new(samples),
            channels,
            sample_rate: stored_rate,
        };

        // Swap in the fully built content; a reader sees either the old
        // payload or the new one, never a mix.
        let mut state = self.lock_state();
        if !state.buffers.contains_key(&buf.raw()) {
            return Err(SonaraError::InvalidHandle(format!(
                "buffer token {}",
                buf.raw()
            )));
        }
        state.buffers.insert(buf.raw(), replacement);
        Ok(())
    }

    fn commit_source(&self, view: SourceView<'_>) -> Result<()> {
        let mut state = self.lock_state();
        let voice = state
            .voices
            .get_mut(view.token.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                SonaraError::InvalidHandle(format!("source token {}", view.token.raw()))
            })?;
        voice.apply(view.params);
        Ok(())
    }

    fn commit_buffer(&self, view: BufferView<'_>) -> Result<()> {
        // Content became device-resident at upload; just validate liveness.
        let state = self.lock_state();
        if !state.buffers.contains_key(&view.token.raw()) {
            return Err(SonaraError::InvalidHandle(format!(
                "buffer token {}",
                view.token.raw()
            )));
        }
        Ok(())
    }

    fn commit_context(&self, view: ContextView<'_>) -> Result<()> {
        let mut state = self.lock_state();
        if !state.contexts.contains(&view.token.raw()) {
            return Err(SonaraError::InvalidHandle(format!(
                "context token {}",
                view.token.raw()
            )));
        }
        state.listeners.insert(view.token.raw(), *view.listener);
        Ok(())
    }

    fn upkeep(&self) {
        let mut state = self.lock_state();
        let Some(config) = state.config else {
            return;
        };
        let channels = config.channels as usize;
        let block_samples = self.settings.block_size * channels;

        match self.sink {
            SinkKind::Discard => {
                let mut block = vec![0.0f32; block_samples];
                Self::mix_into(&mut state, &mut block, channels, config.sample_rate);
            }
            SinkKind::HostOutput => {
                let mut producer = self.producer.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(producer) = producer.as_mut() else {
                    return;
                };
                while producer.vacant_len() >= block_samples {
                    let mut block = vec![0.0f32; block_samples];
                    Self::mix_into(&mut state, &mut block, channels, config.sample_rate);
                    for sample in block {
                        let _ = producer.try_push(sample);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleEncoding};
    use crate::source::{SourceParams, SourceState};

    fn configured_mixer(max_voices: usize, sample_rate: u32) -> MixerDevice {
        let device = MixerDevice::new(
            MixerSettings {
                max_voices,
                block_size: 64,
            },
            SinkKind::Discard,
        );
        device
            .configure(&[ContextAttr::SampleRate(sample_rate)])
            .unwrap();
        device
    }

    fn f32_payload(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_driver_claims_only_its_names() {
        let driver = MixerDriver::new();
        assert!(driver.open(Some("null-device")).is_none());
        assert!(driver.open(Some(MIXER_DEVICE_NAME)).is_some());
        assert!(driver.open(None).is_some());

        let mut names = Vec::new();
        driver.enumerate(&mut |name| names.push(name.to_owned()));
        assert_eq!(names, vec![MIXER_DEVICE_NAME.to_owned()]);
    }

    #[test]
    fn test_conflicting_reconfigure_fails() {
        let device = configured_mixer(4, 44100);
        let err = device
            .configure(&[ContextAttr::SampleRate(22050)])
            .unwrap_err();
        assert!(matches!(err, SonaraError::Configuration(_)));

        // The first configuration is untouched: the original rate is still
        // accepted, and contexts keep allocating.
        device.configure(&[ContextAttr::SampleRate(44100)]).unwrap();
        device.configure(&[]).unwrap();
        assert!(device.allocate_context().is_some());
    }

    #[test]
    fn test_context_allocation_requires_configuration() {
        let device = MixerDevice::new(MixerSettings::default(), SinkKind::Discard);
        assert!(device.allocate_context().is_none());
    }

    #[test]
    fn test_voice_pool_ceiling() {
        let device = configured_mixer(2, 48000);
        let ctx = device.allocate_context().unwrap();

        let first = device.allocate_source(ctx).unwrap();
        let _second = device.allocate_source(ctx).unwrap();
        assert!(device.allocate_source(ctx).is_none());
        assert!(device.allocate_source(ctx).is_none());

        device.free_source(first);
        assert!(device.allocate_source(ctx).is_some());
        assert!(device.allocate_source(ctx).is_none());
    }

    #[test]
    fn test_upload_replaces_content_wholesale() {
        let device = configured_mixer(4, 48000);
        let buf = device.allocate_buffer().unwrap();
        let fmt = BufferFormat::new(SampleEncoding::F32, ChannelLayout::Mono);

        device
            .upload(buf, fmt, &f32_payload(&[0.1, 0.2, 0.3]), 48000)
            .unwrap();
        assert_eq!(*device.buffer(buf).unwrap().samples, vec![0.1, 0.2, 0.3]);

        device
            .upload(buf, fmt, &f32_payload(&[0.9, 0.8]), 48000)
            .unwrap();
        // Exactly the second payload, never a mix.
        assert_eq!(*device.buffer(buf).unwrap().samples, vec![0.9, 0.8]);
    }

    #[test]
    fn test_upload_resamples_to_device_rate() {
        let device = configured_mixer(4, 24000);
        let buf = device.allocate_buffer().unwrap();
        let fmt = BufferFormat::new(SampleEncoding::F32, ChannelLayout::Mono);

        let payload = f32_payload(&vec![0.1f32; 8192]);
        device.upload(buf, fmt, &payload, 48000).unwrap();

        let stored = device.buffer(buf).unwrap();
        assert_eq!(stored.sample_rate, 24000);
        let ratio = stored.samples.len() as f64 / 8192.0;
        assert!((ratio - 0.5).abs() < 0.15, "ratio was {ratio}");
    }

    #[test]
    fn test_upload_to_freed_buffer_fails() {
        let device = configured_mixer(4, 48000);
        let buf = device.allocate_buffer().unwrap();
        device.free_buffer(buf);

        let fmt = BufferFormat::new(SampleEncoding::F32, ChannelLayout::Mono);
        let err = device
            .upload(buf, fmt, &f32_payload(&[0.5]), 48000)
            .unwrap_err();
        assert!(matches!(err, SonaraError::InvalidHandle(_)));
    }

    #[test]
    fn test_upkeep_advances_committed_voice() {
        let device = configured_mixer(4, 48000);
        let ctx = device.allocate_context().unwrap();
        let src = device.allocate_source(ctx).unwrap();
        let buf = device.allocate_buffer().unwrap();
        let fmt = BufferFormat::new(SampleEncoding::F32, ChannelLayout::Mono);
        device
            .upload(buf, fmt, &f32_payload(&vec![0.5f32; 4096]), 48000)
            .unwrap();

        let params = SourceParams {
            state: SourceState::Playing,
            buffer: Some(buf),
            ..SourceParams::default()
        };
        device
            .commit_source(SourceView {
                token: src,
                context: ctx,
                params: &params,
            })
            .unwrap();

        assert_eq!(device.voice_cursor(src), Some(0.0));
        device.upkeep();
        let after_one = device.voice_cursor(src).unwrap();
        assert!(after_one > 0.0);
        device.upkeep();
        assert!(device.voice_cursor(src).unwrap() > after_one);
    }

    #[test]
    fn test_freeing_context_drops_its_voices() {
        let device = configured_mixer(4, 48000);
        let ctx = device.allocate_context().unwrap();
        let src = device.allocate_source(ctx).unwrap();

        device.free_context(ctx);
        assert!(device.voice_cursor(src).is_none());

        // The slot is reusable by a fresh context.
        let ctx2 = device.allocate_context().unwrap();
        assert!(device.allocate_source(ctx2).is_some());
    }

    #[test]
    fn test_close_invalidates_unfreed_children() {
        let device = configured_mixer(4, 48000);
        let ctx = device.allocate_context().unwrap();
        let _src = device.allocate_source(ctx).unwrap();
        let buf = device.allocate_buffer().unwrap();

        device.close();
        assert!(device.buffer(buf).is_none());
        // Unconfigured again after close.
        assert!(device.allocate_context().is_none());
    }
}
