//! The capability contract every rendering backend implements.
//!
//! A backend is a pluggable renderer: the built-in software mixer, glue to a
//! host audio API, or a hardware-accelerated implementation. The core never
//! renders; it dispatches lifecycle and state-commit calls through these two
//! traits and otherwise stays out of the way.
//!
//! Threading: the core is multithreaded and synchronizes above this
//! interface. Commit hooks run while the core holds the device's commit
//! lock; `upkeep` and any rendering the backend does on its own thread run
//! without it. The views passed to commit hooks borrow core-owned state and
//! are only valid for the duration of the call; a backend that retains
//! state must copy it.

pub mod registry;

use crate::buffer::BufferDesc;
use crate::config::ContextAttr;
use crate::context::ListenerParams;
use crate::error::Result;
use crate::format::BufferFormat;
use crate::source::SourceParams;

/// Backend-minted identifier for a context. The core stores and forwards
/// these tokens but never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(u64);

/// Backend-minted identifier for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceToken(u64);

/// Backend-minted identifier for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferToken(u64);

macro_rules! impl_token {
    ($name:ident) => {
        impl $name {
            pub fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

impl_token!(ContextToken);
impl_token!(SourceToken);
impl_token!(BufferToken);

/// Read-only view of a source handed to [`DeviceBackend::commit_source`].
#[derive(Debug, Clone, Copy)]
pub struct SourceView<'a> {
    pub token: SourceToken,
    pub context: ContextToken,
    pub params: &'a SourceParams,
}

/// Read-only view of a buffer handed to [`DeviceBackend::commit_buffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    pub token: BufferToken,
    pub desc: &'a BufferDesc,
}

/// Read-only view of a context's global block handed to
/// [`DeviceBackend::commit_context`].
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    pub token: ContextToken,
    pub listener: &'a ListenerParams,
}

/// An installable backend, consulted at device-open time.
///
/// Drivers are not singletons: a driver that can support several
/// simultaneous opens of the same logical device should, though refusing a
/// second open is legitimate.
pub trait BackendDriver: Send + Sync {
    /// Report the device names this driver is willing to open. Drivers that
    /// cannot reasonably enumerate (a daemon-routed output, say) may report
    /// an incomplete list or none at all; `open` may still be asked about
    /// names that were never enumerated. Callable with or without an open
    /// device.
    fn enumerate(&self, callback: &mut dyn FnMut(&str));

    /// Examine the device name and claim it or decline. `None` asks for the
    /// driver's default device. Opening acquires resources but does not
    /// configure an output format; that happens in
    /// [`DeviceBackend::configure`].
    fn open(&self, name: Option<&str>) -> Option<Box<dyn DeviceBackend>>;
}

/// One opened device. All methods are only valid between the `open` that
/// produced the binding and the matching `close`.
pub trait DeviceBackend: Send + Sync {
    /// Configure the device for output. Associated with context creation, so
    /// it may run several times over a device's lifetime; most attributes
    /// are hints and may be ignored. Rejecting a second configuration with
    /// an incompatible fixed parameter is a legitimate failure, and must
    /// leave the existing configuration untouched.
    fn configure(&self, attrs: &[ContextAttr]) -> Result<()>;

    /// Stop all playback, release device resources, and prepare for a future
    /// `open`. Child contexts, sources and buffers are not guaranteed to
    /// have been freed first; invalidate whatever remains.
    fn close(&self);

    fn allocate_context(&self) -> Option<ContextToken>;

    /// Free a context. The core guarantees this is never the context
    /// currently selected for rendering.
    fn free_context(&self, ctx: ContextToken);

    /// Allocate a source on `ctx`. Sources are a finite resource with a
    /// backend-declared ceiling; once exhausted, fail by returning `None`
    /// rather than degrading to a slower path. Applications probe capacity
    /// by allocating in a loop until failure, so repeated calls must
    /// eventually and stably fail.
    fn allocate_source(&self, ctx: ContextToken) -> Option<SourceToken>;

    /// Free a source. The slot may be handed out again by a later
    /// `allocate_source` on the same device.
    fn free_source(&self, src: SourceToken);

    /// Allocate a buffer. Buffer names should be effectively unbounded;
    /// capacity pressure belongs in `upload`, where real resources are at
    /// stake.
    fn allocate_buffer(&self) -> Option<BufferToken>;

    /// Free a buffer along with any backend-held converted copies.
    fn free_buffer(&self, buf: BufferToken);

    /// Upload sample data into a buffer. A deliberately slow path: the
    /// backend must copy, and may convert or resample, because `data` is
    /// read-only for the duration of the call and may be freed by the caller
    /// immediately after return. Format or allocation failures are reported
    /// synchronously here even if the backend defers the real
    /// hardware-resident upload until the buffer is attached to a source.
    fn upload(
        &self,
        buf: BufferToken,
        format: BufferFormat,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<()>;

    /// Apply a source's staged state. Runs under the device commit lock;
    /// the view dies when the call returns.
    fn commit_source(&self, view: SourceView<'_>) -> Result<()>;

    /// Apply a buffer's staged state. Same locking rules as
    /// [`Self::commit_source`].
    fn commit_buffer(&self, view: BufferView<'_>) -> Result<()>;

    /// Apply a context's global (listener) state. Same locking rules as
    /// [`Self::commit_source`].
    fn commit_context(&self, view: ContextView<'_>) -> Result<()>;

    /// Render, or perform general device upkeep. Called regularly, always
    /// outside the commit lock; a backend rendering on its own thread may
    /// treat this as a no-op.
    fn upkeep(&self);
}
