//! The commit pump: periodic commits for asynchronously rendering contexts.
//!
//! An application that renders synchronously calls [`SonaraDevice::commit`]
//! itself. For a context rendered on a backend thread or timer, the pump
//! supplies the "regular frequency" commit cadence: a background thread that
//! commits (and thereby runs backend upkeep) at a fixed interval until
//! stopped.

use crate::device::SonaraDevice;
use crossbeam_channel::{Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

pub struct CommitPump {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
}

impl CommitPump {
    /// Spawn a pump committing `device` every `interval`.
    pub fn start(device: Arc<SonaraDevice>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let is_running = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&is_running);

        let thread = std::thread::spawn(move || {
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if device.is_closed() {
                            log::debug!("commit pump exiting: device closed");
                            break;
                        }
                        if let Err(err) = device.commit() {
                            log::warn!("periodic commit failed: {err}");
                        }
                    }
                    // Shutdown requested, or the pump handle was dropped.
                    _ => break,
                }
            }
            running.store(false, Ordering::Release);
        });

        Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            is_running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Stop the pump and wait for its thread to exit.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CommitPump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registry::BackendRegistry;
    use crate::testutil::{Call, MockDriver};

    #[test]
    fn test_pump_commits_on_cadence() {
        let driver = MockDriver::claiming("mock");
        let log = driver.call_log();
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(driver)).unwrap();
        let device = registry.open(Some("mock")).unwrap();
        let ctx = device.create_context(&[]).unwrap();
        let src = ctx.create_source().unwrap();

        let mut pump = CommitPump::start(Arc::clone(&device), Duration::from_millis(5));
        assert!(pump.is_running());

        src.set_gain(0.5);
        std::thread::sleep(Duration::from_millis(60));
        pump.stop();
        assert!(!pump.is_running());

        let calls = log.calls();
        assert!(calls.iter().filter(|c| **c == Call::Upkeep).count() >= 2);
        assert_eq!(log.last_committed_source().unwrap().gain, 0.5);
        device.close().unwrap();
    }

    #[test]
    fn test_pump_exits_when_device_closes() {
        let driver = MockDriver::claiming("mock");
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(driver)).unwrap();
        let device = registry.open(Some("mock")).unwrap();

        let pump = CommitPump::start(Arc::clone(&device), Duration::from_millis(5));
        device.close().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(!pump.is_running());
    }
}
