//! Metrics collection using metrics-rs.

use metrics::{counter, gauge, Unit};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const STORAGE_GROWS: &str = "cmdring_storage_grows";
const STORAGE_SHRINKS: &str = "cmdring_storage_shrinks";
const STORAGES_RETIRED: &str = "cmdring_storages_retired";
const STORAGES_DROPPED: &str = "cmdring_storages_dropped";
const CAPACITY_BYTES: &str = "cmdring_capacity_bytes";
const LIVE_BYTES: &str = "cmdring_live_bytes";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        STORAGE_GROWS,
        Unit::Count,
        "Ring storage capacity increases on exhaustion"
    );
    metrics::describe_counter!(
        STORAGE_SHRINKS,
        Unit::Count,
        "Adaptive ring storage capacity decreases"
    );
    metrics::describe_counter!(
        STORAGES_RETIRED,
        Unit::Count,
        "Storages moved to the retired list pending release"
    );
    metrics::describe_counter!(
        STORAGES_DROPPED,
        Unit::Count,
        "Retired storages freed by checkpoint release"
    );
    metrics::describe_gauge!(
        CAPACITY_BYTES,
        Unit::Bytes,
        "Usable capacity of the current ring storage"
    );
    metrics::describe_gauge!(
        LIVE_BYTES,
        Unit::Bytes,
        "Live bytes in the ring after the latest release"
    );
}

/// Record a capacity change from a resize.
#[inline]
pub(crate) fn record_resize(old_capacity: usize, new_capacity: usize) {
    if new_capacity >= old_capacity {
        counter!(STORAGE_GROWS).increment(1);
    } else {
        counter!(STORAGE_SHRINKS).increment(1);
    }
    gauge!(CAPACITY_BYTES).set(new_capacity as f64);
}

/// Record a storage moved to the retired list.
#[inline]
pub(crate) fn record_storage_retired() {
    counter!(STORAGES_RETIRED).increment(1);
}

/// Record a retired storage freed by a release.
#[inline]
pub(crate) fn record_storage_dropped() {
    counter!(STORAGES_DROPPED).increment(1);
}

/// Record the live byte count after a release.
#[inline]
pub(crate) fn record_live_bytes(live: usize) {
    gauge!(LIVE_BYTES).set(live as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS_INITIALIZED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recording_without_exporter_is_a_no_op() {
        record_resize(0, 1024);
        record_resize(1024, 512);
        record_storage_retired();
        record_storage_dropped();
        record_live_bytes(100);
    }
}
