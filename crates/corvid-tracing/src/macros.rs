//! Convenience macros for performance instrumentation.

/// Create a [`crate::performance::PerformanceSpan`] guard, optionally with fields.
///
/// ```rust
/// use corvid_tracing::perf_span;
///
/// {
///     let _span = perf_span!("bind_parameters", args = 3, block_bytes = 20);
/// } // duration logged here
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let _span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        ).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug-level performance event with named metrics.
///
/// ```rust
/// use corvid_tracing::perf_event;
///
/// perf_event!("parameter_block", size_bytes = 20, args = 3);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}
