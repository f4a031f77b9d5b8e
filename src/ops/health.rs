//! Disk health collaborator.
//!
//! The read dispatcher answers health-check requests synchronously from
//! this service. The real implementation probes the data directory with
//! periodic write/read checks; tests and local mode use the static
//! implementations below.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Disk health check service.
pub trait DiskHealth: Send + Sync {
    /// Whether local storage is currently healthy.
    fn is_healthy(&self) -> bool;

    /// Last observed failure, if any.
    fn error_message(&self) -> Option<String>;
}

/// Disk health that always reports healthy.
#[derive(Debug, Default)]
pub struct AlwaysHealthy;

impl DiskHealth for AlwaysHealthy {
    fn is_healthy(&self) -> bool {
        true
    }

    fn error_message(&self) -> Option<String> {
        None
    }
}

/// Settable disk health, used by tests and local mode.
#[derive(Debug)]
pub struct StaticDiskHealth {
    healthy: AtomicBool,
    message: RwLock<Option<String>>,
}

impl StaticDiskHealth {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            message: RwLock::new(None),
        }
    }

    /// Flip the reported health state.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Set the failure message reported alongside an unhealthy state.
    pub fn set_error_message(&self, message: impl Into<String>) {
        *self.message.write().unwrap() = Some(message.into());
    }
}

impl DiskHealth for StaticDiskHealth {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn error_message(&self) -> Option<String> {
        self.message.read().unwrap().clone()
    }
}
