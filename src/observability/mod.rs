//! Observability features: metrics and structured logging.
//!
//! The allocator emits `tracing` events inline on its cold paths
//! (resize, retire, drop) and records the following metrics via the
//! `metrics` facade:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `cmdring_storage_grows` | Counter | Capacity increases on exhaustion |
//! | `cmdring_storage_shrinks` | Counter | Adaptive capacity decreases |
//! | `cmdring_storages_retired` | Counter | Storages moved to the retired list |
//! | `cmdring_storages_dropped` | Counter | Retired storages freed by release |
//! | `cmdring_capacity_bytes` | Gauge | Usable capacity of the current storage |
//! | `cmdring_live_bytes` | Gauge | Live bytes after the latest release |
//!
//! Install a metrics exporter (prometheus, statsd, ...) to collect
//! them; without one, recording is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmdring::observability::init_metrics;
//!
//! // Initialize metric descriptions (call once at startup).
//! init_metrics();
//! ```

mod metrics;

pub use metrics::init_metrics;
pub(crate) use metrics::{
    record_live_bytes, record_resize, record_storage_dropped, record_storage_retired,
};
