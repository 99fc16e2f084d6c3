//! Contexts: per-device rendering scopes.
//!
//! A context owns its sources and a listener/global parameter block. All
//! rendering proceeds per-context; the device tracks which context is
//! currently selected for rendering and refuses to free it.

use crate::backend::ContextToken;
use crate::device::{SonaraDevice, lock_ignore_poison};
use crate::error::{Result, SonaraError};
use crate::math::Pose;
use crate::source::SonaraSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Per-context state not owned by any single source or buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerParams {
    pub pose: Pose,
    pub gain: f32,
}

impl Default for ListenerParams {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            gain: 1.0,
        }
    }
}

pub struct SonaraContext {
    pub(crate) id: Uuid,
    pub(crate) token: ContextToken,
    pub(crate) device: Weak<SonaraDevice>,
    pub(crate) sources: Mutex<HashMap<Uuid, Arc<SonaraSource>>>,
    pub(crate) listener: Mutex<ListenerParams>,
    pub(crate) dirty: AtomicBool,
}

impl SonaraContext {
    pub(crate) fn new(token: ContextToken, device: Weak<SonaraDevice>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            device,
            sources: Mutex::new(HashMap::new()),
            listener: Mutex::new(ListenerParams::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Allocate a source on this context. Source slots are a finite,
    /// backend-declared resource; exhaustion is an expected, recoverable
    /// failure and callers may probe the ceiling by allocating until it
    /// fails.
    pub fn create_source(&self) -> Result<Arc<SonaraSource>> {
        self.device()?.allocate_source(self)
    }

    /// Free a source. Its backend slot may be reused by a later allocation
    /// on the same device.
    pub fn delete_source(&self, source: &SonaraSource) -> Result<()> {
        self.device()?.release_source(self, source)
    }

    pub fn source_count(&self) -> usize {
        lock_ignore_poison(&self.sources).len()
    }

    /// Snapshot of the staged listener block.
    pub fn listener(&self) -> ListenerParams {
        *lock_ignore_poison(&self.listener)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_listener_pose(&self, pose: Pose) {
        self.stage(|listener| listener.pose = pose);
    }

    pub fn set_listener_gain(&self, gain: f32) {
        self.stage(|listener| listener.gain = gain.max(0.0));
    }

    fn stage(&self, mutate: impl FnOnce(&mut ListenerParams)) {
        let mut listener = lock_ignore_poison(&self.listener);
        mutate(&mut listener);
        drop(listener);
        self.dirty.store(true, Ordering::Release);
    }

    fn device(&self) -> Result<Arc<SonaraDevice>> {
        self.device.upgrade().ok_or(SonaraError::DeviceClosed)
    }
}

impl fmt::Debug for SonaraContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SonaraContext")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("sources", &self.source_count())
            .finish_non_exhaustive()
    }
}
