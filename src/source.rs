//! Sources: per-context emitters with staged playback state.
//!
//! Mutators write the staged block and flip the dirty flag; nothing here
//! touches the device commit lock, so application threads never wait on the
//! render path. The staged state reaches the backend at the next commit.

use crate::backend::{BufferToken, ContextToken, SourceToken};
use crate::buffer::SonaraBuffer;
use crate::math::Vec3;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Playback state staged on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// The staged parameter block committed to the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    pub position: Vec3,
    pub gain: f32,
    pub pitch: f32,
    pub looping: bool,
    pub state: SourceState,
    /// Backend token of the attached buffer, if any.
    pub buffer: Option<BufferToken>,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            gain: 1.0,
            pitch: 1.0,
            looping: false,
            state: SourceState::Initial,
            buffer: None,
        }
    }
}

pub struct SonaraSource {
    pub(crate) id: Uuid,
    pub(crate) token: SourceToken,
    pub(crate) context: ContextToken,
    pub(crate) params: Mutex<SourceParams>,
    pub(crate) dirty: AtomicBool,
}

impl SonaraSource {
    pub(crate) fn new(token: SourceToken, context: ContextToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            context,
            params: Mutex::new(SourceParams::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Snapshot of the staged parameters.
    pub fn params(&self) -> SourceParams {
        *crate::device::lock_ignore_poison(&self.params)
    }

    /// Whether the source has staged state not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_position(&self, position: Vec3) {
        self.stage(|params| params.position = position);
    }

    pub fn set_gain(&self, gain: f32) {
        self.stage(|params| params.gain = gain.max(0.0));
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.stage(|params| params.pitch = pitch.max(0.0));
    }

    pub fn set_looping(&self, looping: bool) {
        self.stage(|params| params.looping = looping);
    }

    /// Attach a buffer (or detach with `None`). Buffers are shared across
    /// all contexts of the owning device.
    pub fn set_buffer(&self, buffer: Option<&SonaraBuffer>) {
        let token = buffer.map(SonaraBuffer::token);
        self.stage(|params| params.buffer = token);
    }

    pub fn play(&self) {
        self.stage(|params| params.state = SourceState::Playing);
    }

    pub fn pause(&self) {
        self.stage(|params| params.state = SourceState::Paused);
    }

    pub fn stop(&self) {
        self.stage(|params| params.state = SourceState::Stopped);
    }

    fn stage(&self, mutate: impl FnOnce(&mut SourceParams)) {
        let mut params = crate::device::lock_ignore_poison(&self.params);
        mutate(&mut params);
        drop(params);
        self.dirty.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_marks_dirty() {
        let src = SonaraSource::new(SourceToken::new(1), ContextToken::new(1));
        assert!(!src.is_dirty());

        src.set_gain(0.5);
        assert!(src.is_dirty());
        assert_eq!(src.params().gain, 0.5);
        assert_eq!(src.params().state, SourceState::Initial);
    }

    #[test]
    fn test_negative_gain_clamped() {
        let src = SonaraSource::new(SourceToken::new(1), ContextToken::new(1));
        src.set_gain(-2.0);
        assert_eq!(src.params().gain, 0.0);
    }
}
