//! Registry of installed backend drivers.
//!
//! Drivers are registered before the first device opens; `open` walks them
//! in registration order and the first driver to claim the name wins. Once a
//! device exists the registry is sealed and further registration fails, so
//! the driver list never mutates under a live device.

use crate::backend::BackendDriver;
use crate::device::SonaraDevice;
use crate::error::{Result, SonaraError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct BackendRegistry {
    drivers: Vec<Box<dyn BackendDriver>>,
    sealed: AtomicBool,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Install a driver. Fails once any device has been opened.
    pub fn register(&mut self, driver: Box<dyn BackendDriver>) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(SonaraError::RegistrySealed);
        }
        self.drivers.push(driver);
        Ok(())
    }

    /// Collect the device names every driver is willing to report. The list
    /// may be incomplete: drivers that cannot enumerate simply contribute
    /// nothing, and such devices can still be opened by name.
    pub fn enumerate(&self) -> Vec<String> {
        let mut names = Vec::new();
        for driver in &self.drivers {
            driver.enumerate(&mut |name| names.push(name.to_owned()));
        }
        names
    }

    /// Open a device. Drivers are consulted in registration order; the first
    /// one whose `open` hook returns a binding claims the device and
    /// iteration stops. If none claims the name, the open fails with a
    /// no-such-device error.
    pub fn open(&self, name: Option<&str>) -> Result<Arc<SonaraDevice>> {
        for driver in &self.drivers {
            if let Some(backend) = driver.open(name) {
                self.sealed.store(true, Ordering::Release);
                log::debug!("device {:?} claimed by a registered driver", name);
                return Ok(SonaraDevice::bind(Arc::from(backend)));
            }
        }
        Err(SonaraError::NoDevice(
            name.unwrap_or("<default>").to_owned(),
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
