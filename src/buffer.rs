//! Buffers: device-scoped sample storage, shared across contexts.
//!
//! Content is immutable to the application once uploaded; a re-upload
//! replaces it wholesale. The descriptor here only changes after the backend
//! has accepted an upload, so a failed upload leaves the buffer in its
//! pre-upload state.

use crate::backend::BufferToken;
use crate::format::BufferFormat;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// What the core knows about a buffer's committed content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferDesc {
    /// Format of the last accepted upload; `None` before the first upload.
    pub format: Option<BufferFormat>,
    pub sample_rate: u32,
    pub frames: usize,
}

pub struct SonaraBuffer {
    pub(crate) id: Uuid,
    pub(crate) token: BufferToken,
    pub(crate) desc: Mutex<BufferDesc>,
    pub(crate) dirty: AtomicBool,
}

impl SonaraBuffer {
    pub(crate) fn new(token: BufferToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            desc: Mutex::new(BufferDesc::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn token(&self) -> BufferToken {
        self.token
    }

    /// Descriptor of the most recently accepted upload.
    pub fn desc(&self) -> BufferDesc {
        *crate::device::lock_ignore_poison(&self.desc)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}
