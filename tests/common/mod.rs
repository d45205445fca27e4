//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod strategies;

use blobdrain::{DrainerConfig, Item, SharedBuffer};
use std::time::Duration;

/// Upper bound for any wait in the integration tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Drainer config without watchdog, so tests control timing
pub fn quiet_config() -> DrainerConfig {
    DrainerConfig::new().with_deadlock_handler(false)
}

pub fn ints(values: impl IntoIterator<Item = i64>) -> Vec<Item> {
    values.into_iter().map(Item::Int).collect()
}

/// Empty `buffer` and return its contents as integers.
pub fn drain_ints(buffer: &SharedBuffer<Item>) -> Vec<i64> {
    buffer
        .read_all(buffer.size())
        .unwrap()
        .unwrap_or_default()
        .iter()
        .map(|item| item.as_int().expect("integer item"))
        .collect()
}

/// Poll `condition` until it holds or the test timeout elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + test_timeout();
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
