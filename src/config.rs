//! Context-creation attributes.
//!
//! An attribute list is an ordered sequence of typed hints handed to the
//! backend's `configure` hook when a context is created. Backends may honor
//! or ignore any of them; re-configuring an already-configured device with an
//! incompatible value (e.g. a different fixed sample rate) is a legitimate,
//! surfaced failure.

/// One typed configuration hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAttr {
    /// Output sample rate in Hz.
    SampleRate(u32),
    /// Output channel count.
    Channels(u16),
    /// Desired refresh/mix cadence in Hz.
    Refresh(u32),
    /// Whether the context expects synchronous (caller-driven) rendering.
    Sync(bool),
    /// Hint for how many mono sources the application intends to use.
    MonoSources(u32),
    /// Hint for how many stereo sources the application intends to use.
    StereoSources(u32),
}

/// Looks up the last sample-rate hint in an attribute list, if any.
pub fn requested_sample_rate(attrs: &[ContextAttr]) -> Option<u32> {
    attrs.iter().rev().find_map(|attr| match attr {
        ContextAttr::SampleRate(rate) => Some(*rate),
        _ => None,
    })
}

/// Looks up the last channel-count hint in an attribute list, if any.
pub fn requested_channels(attrs: &[ContextAttr]) -> Option<u16> {
    attrs.iter().rev().find_map(|attr| match attr {
        ContextAttr::Channels(channels) => Some(*channels),
        _ => None,
    })
}
