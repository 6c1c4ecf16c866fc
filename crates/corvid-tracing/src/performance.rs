//! Timing helpers for launches, transfers and migrations.
//!
//! ```rust
//! use corvid_tracing::performance::{PerformanceSpan, record_transfer};
//!
//! let span = PerformanceSpan::new("enqueue_nd_range_kernel", Some(100));
//! drop(span); // logged only if it took at least 100us
//!
//! record_transfer(4096, "H2D", 250);
//! ```

use std::time::Instant;

/// RAII guard that times a region and logs it on drop.
///
/// When a threshold is set the completion event is only emitted if the
/// elapsed time reached it.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = tracing::debug_span!("perf", name = %name);
        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host/device transfer with its bandwidth.
///
/// `direction` is `"H2D"`, `"D2H"` or `"D2D"`.
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth_mbps,
        "data_transfer"
    );
}

/// Record a completed kernel launch.
pub fn record_launch(kernel: &str, work_groups: [u32; 3], local_size: [u32; 3], duration_us: u64) {
    let work_items = work_groups.iter().chain(local_size.iter()).map(|&d| d as u64).product::<u64>();
    tracing::debug!(
        event = "launch",
        kernel = kernel,
        work_groups = ?work_groups,
        local_size = ?local_size,
        work_items = work_items,
        duration_us = duration_us,
        "kernel_launch"
    );
}

/// Record a device-to-device migration.
pub fn record_migration(relocated: usize, globals: usize, bytes: usize, duration_us: u64) {
    tracing::debug!(
        event = "migration",
        relocated = relocated,
        globals = globals,
        bytes = bytes,
        duration_us = duration_us,
        "device_migration"
    );
}
