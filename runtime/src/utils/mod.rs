//! Utility functions for interacting with any runtime.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod handle;
pub use handle::Handle;

mod resource;
pub use resource::{Acquire, Resource, ResourceGuard};

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::new();
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Extension trait to read virtual time as an offset from the start of a run.
///
/// Every runtime in this crate starts its clock at [UNIX_EPOCH].
pub trait SystemTimeExt {
    /// Returns the duration since the start of the run.
    ///
    /// # Panics
    ///
    /// Panics if the time is before [UNIX_EPOCH].
    fn epoch(&self) -> Duration;

    /// Returns the number of milliseconds (rounded down) since the start of the run.
    fn epoch_millis(&self) -> u64;
}

impl SystemTimeExt for SystemTime {
    fn epoch(&self) -> Duration {
        self.duration_since(UNIX_EPOCH)
            .expect("failed to get epoch time")
    }

    fn epoch_millis(&self) -> u64 {
        self.epoch().as_millis().min(u64::MAX as u128) as u64
    }
}
