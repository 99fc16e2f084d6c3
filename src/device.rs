//! Devices: the root object binding one backend to its contexts and buffers.
//!
//! A device is created by a successful claim from the backend registry and
//! keeps that binding for its whole lifetime. Contexts and sources are
//! device-scoped; buffers are shared between all contexts on the device and
//! never cross devices.
//!
//! Lock order is commit lock, then a resource table, then an object's staged
//! block. Allocation and free paths take the commit lock so a commit walk in
//! flight can never hold a view of an object mid-free, and a fresh
//! allocation can never observe a half-released slot.

use crate::backend::DeviceBackend;
use crate::buffer::SonaraBuffer;
use crate::config::ContextAttr;
use crate::context::SonaraContext;
use crate::error::{Result, SonaraError};
use crate::format::BufferFormat;
use crate::source::SonaraSource;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
/// The commit-lock invariant must survive a failed call, so a poisoned lock
/// is treated as released rather than as corruption.
pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SonaraDevice {
    backend: Arc<dyn DeviceBackend>,
    /// The per-device commit lock: held while dirty state is pushed to the
    /// backend and while resources are allocated or freed. Never held during
    /// rendering or upkeep.
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) contexts: Mutex<HashMap<Uuid, Arc<SonaraContext>>>,
    pub(crate) buffers: Mutex<HashMap<Uuid, Arc<SonaraBuffer>>>,
    current_context: Mutex<Option<Uuid>>,
    closed: AtomicBool,
}

impl SonaraDevice {
    /// Wrap a freshly claimed backend binding. Called by the registry.
    pub(crate) fn bind(backend: Arc<dyn DeviceBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            commit_lock: Mutex::new(()),
            contexts: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            current_context: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SonaraError::DeviceClosed);
        }
        Ok(())
    }

    /// Configure the device and allocate a context on it. Configuration is
    /// associated with context creation and may therefore run once per
    /// context over the device's lifetime; a backend rejecting an
    /// incompatible re-configuration surfaces here, with the earlier
    /// configuration left intact.
    pub fn create_context(self: &Arc<Self>, attrs: &[ContextAttr]) -> Result<Arc<SonaraContext>> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        self.backend.configure(attrs)?;
        let token = self
            .backend
            .allocate_context()
            .ok_or_else(|| SonaraError::CapacityExhausted("context".to_owned()))?;

        let context = Arc::new(SonaraContext::new(token, Arc::downgrade(self)));
        lock_ignore_poison(&self.contexts).insert(context.id, Arc::clone(&context));
        Ok(context)
    }

    /// Free a context and any sources still on it. Refused for the context
    /// currently selected for rendering.
    pub fn destroy_context(&self, context: &SonaraContext) -> Result<()> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let current = *lock_ignore_poison(&self.current_context);
        if current == Some(context.id) {
            return Err(SonaraError::ContractViolation(
                "cannot free the context currently selected for rendering".to_owned(),
            ));
        }

        let removed = lock_ignore_poison(&self.contexts).remove(&context.id);
        let Some(removed) = removed else {
            return Err(SonaraError::InvalidHandle(format!(
                "context {}",
                context.id
            )));
        };

        for source in lock_ignore_poison(&removed.sources).drain() {
            self.backend.free_source(source.1.token);
        }
        self.backend.free_context(removed.token);
        Ok(())
    }

    /// Select the context rendering proceeds against, or none.
    ///
    /// Runs under the commit lock so the selection can never race a
    /// concurrent `destroy_context`: either the destroy sees the context as
    /// current and refuses, or it removes the context first and the
    /// selection fails as an invalid handle.
    pub fn set_current_context(&self, context: Option<&SonaraContext>) -> Result<()> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let id = match context {
            Some(ctx) => {
                if !lock_ignore_poison(&self.contexts).contains_key(&ctx.id) {
                    return Err(SonaraError::InvalidHandle(format!("context {}", ctx.id)));
                }
                Some(ctx.id)
            }
            None => None,
        };
        *lock_ignore_poison(&self.current_context) = id;
        Ok(())
    }

    pub fn current_context_id(&self) -> Option<Uuid> {
        *lock_ignore_poison(&self.current_context)
    }

    /// Allocate a buffer name. Effectively unbounded; real capacity pressure
    /// surfaces at upload time.
    pub fn create_buffer(&self) -> Result<Arc<SonaraBuffer>> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let token = self
            .backend
            .allocate_buffer()
            .ok_or_else(|| SonaraError::CapacityExhausted("buffer".to_owned()))?;

        let buffer = Arc::new(SonaraBuffer::new(token));
        lock_ignore_poison(&self.buffers).insert(buffer.id, Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Free a buffer along with any backend-held converted copies.
    pub fn delete_buffer(&self, buffer: &SonaraBuffer) -> Result<()> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let removed = lock_ignore_poison(&self.buffers).remove(&buffer.id);
        let Some(removed) = removed else {
            return Err(SonaraError::InvalidHandle(format!("buffer {}", buffer.id)));
        };
        self.backend.free_buffer(removed.token);
        Ok(())
    }

    /// Upload sample data into a buffer. The backend copies (and may convert
    /// or resample) synchronously; `data` may be reused by the caller the
    /// moment this returns. On failure the buffer keeps its previous
    /// content and descriptor.
    pub fn upload(
        &self,
        buffer: &SonaraBuffer,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        self.ensure_open()?;
        if !lock_ignore_poison(&self.buffers).contains_key(&buffer.id) {
            return Err(SonaraError::InvalidHandle(format!("buffer {}", buffer.id)));
        }
        if sample_rate == 0 {
            return Err(SonaraError::AudioFormat(
                "sample rate must be greater than 0".to_owned(),
            ));
        }
        let frames = format.frame_count(data)?;

        self.backend.upload(buffer.token, format, data, sample_rate)?;

        let mut desc = lock_ignore_poison(&buffer.desc);
        desc.format = Some(format);
        desc.sample_rate = sample_rate;
        desc.frames = frames;
        drop(desc);
        buffer.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn allocate_source(&self, context: &SonaraContext) -> Result<Arc<SonaraSource>> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let token = self
            .backend
            .allocate_source(context.token)
            .ok_or_else(|| SonaraError::CapacityExhausted("source".to_owned()))?;

        let source = Arc::new(SonaraSource::new(token, context.token));
        lock_ignore_poison(&context.sources).insert(source.id, Arc::clone(&source));
        Ok(source)
    }

    pub(crate) fn release_source(
        &self,
        context: &SonaraContext,
        source: &SonaraSource,
    ) -> Result<()> {
        self.ensure_open()?;
        let _guard = lock_ignore_poison(&self.commit_lock);
        let removed = lock_ignore_poison(&context.sources).remove(&source.id);
        let Some(removed) = removed else {
            return Err(SonaraError::InvalidHandle(format!("source {}", source.id)));
        };
        self.backend.free_source(removed.token);
        Ok(())
    }

    pub fn context_count(&self) -> usize {
        lock_ignore_poison(&self.contexts).len()
    }

    pub fn buffer_count(&self) -> usize {
        lock_ignore_poison(&self.buffers).len()
    }

    /// Stop playback and release the device. Contexts, sources and buffers
    /// that were never explicitly freed are invalidated here; the backend
    /// tolerates unfreed children. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let _guard = lock_ignore_poison(&self.commit_lock);
            *lock_ignore_poison(&self.current_context) = None;
            for (_, context) in lock_ignore_poison(&self.contexts).drain() {
                for (_, source) in lock_ignore_poison(&context.sources).drain() {
                    self.backend.free_source(source.token);
                }
                self.backend.free_context(context.token);
            }
            for (_, buffer) in lock_ignore_poison(&self.buffers).drain() {
                self.backend.free_buffer(buffer.token);
            }
        }

        self.backend.close();
        log::debug!("device closed");
        Ok(())
    }
}

impl Drop for SonaraDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for SonaraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SonaraDevice")
            .field("contexts", &self.context_count())
            .field("buffers", &self.buffer_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
