//! Error types for sonara

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonaraError {
    /// No registered backend claimed the requested device name.
    #[error("No such device: {0}")]
    NoDevice(String),

    /// The backend registry refuses new registrations once a device is open.
    #[error("Backend registry is sealed; register drivers before the first open")]
    RegistrySealed,

    /// The backend rejected the requested configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A backend-declared capacity ceiling was reached.
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Unsupported or malformed sample data.
    #[error("Audio format error: {0}")]
    AudioFormat(String),

    /// The handle does not belong to a live object on this device.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The device has already been closed.
    #[error("Device is closed")]
    DeviceClosed,

    /// Misuse of the lifecycle contract, e.g. freeing the context currently
    /// selected for rendering. Fatal to the call, never to the device.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// An error reported by the backend implementation.
    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, SonaraError>;
