//! The commit engine: deferred propagation of staged state to the backend.
//!
//! Every mutable object carries a clean/dirty flag. Application-side
//! mutators only stage fields and flip the flag; this walk, run on demand or
//! on the pump's cadence, acquires the device commit lock, pushes every
//! dirty object through the matching backend hook, and releases the lock
//! before upkeep runs. Rendering never happens under the lock, so
//! application threads block for at most the cost of copying small state
//! blocks.
//!
//! A dirty flag is swapped off before the staged block is copied: a
//! mutation racing with the walk re-marks the object and the next commit
//! picks it up. A failed hook re-marks it too, so nothing is ever lost
//! between dirty and clean.

use crate::backend::{BufferView, ContextView, SourceView};
use crate::buffer::SonaraBuffer;
use crate::context::SonaraContext;
use crate::device::{SonaraDevice, lock_ignore_poison};
use crate::error::{Result, SonaraError};
use crate::source::SonaraSource;
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl SonaraDevice {
    /// Publish all staged state to the backend, then run its upkeep hook.
    ///
    /// Buffers commit first (a source may reference one), then each
    /// context's global block and its sources. Hooks that fail leave their
    /// object dirty and the walk continues; the first error is returned
    /// once upkeep has run. Everything committed before this call returns
    /// is visible to the next render pass.
    pub fn commit(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SonaraError::DeviceClosed);
        }

        let mut first_err: Option<SonaraError> = None;
        {
            let _guard = lock_ignore_poison(&self.commit_lock);

            let buffers: Vec<Arc<SonaraBuffer>> =
                lock_ignore_poison(&self.buffers).values().cloned().collect();
            for buffer in &buffers {
                if let Err(err) = self.commit_buffer(buffer) {
                    log::warn!("buffer {} commit failed: {err}", buffer.id);
                    first_err.get_or_insert(err);
                }
            }

            let contexts: Vec<Arc<SonaraContext>> = lock_ignore_poison(&self.contexts)
                .values()
                .cloned()
                .collect();
            for context in &contexts {
                if let Err(err) = self.commit_context(context) {
                    log::warn!("context {} commit failed: {err}", context.id);
                    first_err.get_or_insert(err);
                }
                let sources: Vec<Arc<SonaraSource>> = lock_ignore_poison(&context.sources)
                    .values()
                    .cloned()
                    .collect();
                for source in &sources {
                    if let Err(err) = self.commit_source(source) {
                        log::warn!("source {} commit failed: {err}", source.id);
                        first_err.get_or_insert(err);
                    }
                }
            }
        }

        // The lock is released before any rendering-side work.
        self.backend().upkeep();

        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn commit_buffer(&self, buffer: &SonaraBuffer) -> Result<()> {
        if !buffer.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let desc = *lock_ignore_poison(&buffer.desc);
        let result = self.backend().commit_buffer(BufferView {
            token: buffer.token,
            desc: &desc,
        });
        if result.is_err() {
            buffer.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn commit_context(&self, context: &SonaraContext) -> Result<()> {
        if !context.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let listener = *lock_ignore_poison(&context.listener);
        let result = self.backend().commit_context(ContextView {
            token: context.token,
            listener: &listener,
        });
        if result.is_err() {
            context.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn commit_source(&self, source: &SonaraSource) -> Result<()> {
        if !source.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let params = *lock_ignore_poison(&source.params);
        let result = self.backend().commit_source(SourceView {
            token: source.token,
            context: source.context,
            params: &params,
        });
        if result.is_err() {
            source.dirty.store(true, Ordering::Release);
        }
        result
    }
}
