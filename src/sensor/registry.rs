// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide driver reference counting
//!
//! Driver libraries expect a single initialise/shutdown pair per process.
//! Every open device holds a [`DriverLease`]; the first lease for a backend
//! initialises it, dropping the last one shuts it down.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::SensorBackend;
use crate::errors::SensorError;

/// Open leases per backend name
static OPEN_DEVICES: LazyLock<Mutex<HashMap<String, usize>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Keeps a backend initialised while alive
pub struct DriverLease {
    backend: Arc<dyn SensorBackend>,
}

impl DriverLease {
    /// Take a lease, initialising the backend if nobody else holds one
    pub fn acquire(backend: Arc<dyn SensorBackend>) -> Result<Self, SensorError> {
        let mut open = OPEN_DEVICES.lock();
        let count = open.get(backend.name()).copied().unwrap_or(0);

        if count == 0 {
            info!(backend = backend.name(), "Initializing sensor driver");
            backend.initialize()?;
        }

        open.insert(backend.name().to_string(), count + 1);
        debug!(backend = backend.name(), leases = count + 1, "Driver lease acquired");

        Ok(Self { backend })
    }

    pub fn backend(&self) -> &Arc<dyn SensorBackend> {
        &self.backend
    }
}

impl Drop for DriverLease {
    fn drop(&mut self) {
        let mut open = OPEN_DEVICES.lock();
        let name = self.backend.name();
        let remaining = open.get(name).copied().unwrap_or(1).saturating_sub(1);

        if remaining == 0 {
            open.remove(name);
            info!(backend = name, "Shutting down sensor driver");
            self.backend.shutdown();
        } else {
            open.insert(name.to_string(), remaining);
            debug!(backend = name, leases = remaining, "Driver lease released");
        }
    }
}

/// Number of live leases for a backend
pub fn open_count(backend_name: &str) -> usize {
    OPEN_DEVICES.lock().get(backend_name).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::synthetic::SyntheticBackend;

    #[test]
    fn test_init_on_first_teardown_on_last() {
        let backend = Arc::new(SyntheticBackend::new("registry-unit-refcount"));
        let dyn_backend: Arc<dyn SensorBackend> = backend.clone();

        let first = DriverLease::acquire(dyn_backend.clone()).unwrap();
        let second = DriverLease::acquire(dyn_backend).unwrap();
        assert_eq!(backend.initialize_calls(), 1);
        assert_eq!(open_count("registry-unit-refcount"), 2);

        drop(first);
        assert_eq!(backend.shutdown_calls(), 0);

        drop(second);
        assert_eq!(backend.shutdown_calls(), 1);
        assert_eq!(open_count("registry-unit-refcount"), 0);
    }

    #[test]
    fn test_failed_init_leaves_no_lease() {
        let backend = Arc::new(SyntheticBackend::new("registry-unit-failing").fail_initialize());
        let result = DriverLease::acquire(backend.clone());
        assert!(result.is_err());
        assert_eq!(open_count("registry-unit-failing"), 0);
        assert_eq!(backend.shutdown_calls(), 0);
    }
}
