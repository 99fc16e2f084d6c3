//! sonara: the dispatch core of a 3D audio rendering library.
//!
//! The crate owns device, context, source and buffer lifecycle and forwards
//! rendering work to pluggable backends through one capability contract
//! ([`backend::DeviceBackend`]). Application threads mutate staged object
//! state without blocking the render path; a lock-protected commit
//! ([`SonaraDevice::commit`], driven manually or by a [`CommitPump`])
//! publishes a consistent snapshot to the backend, and rendering proceeds
//! lock-free against that snapshot until the next commit.
//!
//! # Architecture
//!
//! - **Application thread(s)**: open a device through a [`BackendRegistry`],
//!   create contexts/sources/buffers, stage parameter changes, trigger
//!   commits.
//! - **Render thread/timer**: backend-owned; observes only committed state
//!   and never takes the commit lock.
//!
//! The built-in [`mixer::MixerDriver`] is the reference backend: a software
//! PCM mixer with an optional host-output sink.

pub mod backend;
pub mod buffer;
pub mod commit;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod math;
pub mod mixer;
pub mod pump;
pub mod source;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::registry::BackendRegistry;
pub use buffer::{BufferDesc, SonaraBuffer};
pub use config::ContextAttr;
pub use context::{ListenerParams, SonaraContext};
pub use device::SonaraDevice;
pub use error::{Result, SonaraError};
pub use format::{BufferFormat, ChannelLayout, SampleEncoding};
pub use math::{Pose, Quat, Vec3};
pub use mixer::{MIXER_DEVICE_NAME, MixerDriver, MixerSettings};
pub use pump::CommitPump;
pub use source::{SonaraSource, SourceParams, SourceState};
