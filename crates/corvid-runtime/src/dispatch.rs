//! Launch dispatcher
//!
//! Validates launch geometry, normalizes it to three dimensions and drives
//! the back-end launch. A launch moves through
//!
//! ```text
//! Idle ─► Validating ─► Dispatched ─┬─► Succeeded
//!                                   └─► Failed
//! ```
//!
//! and the first violated constraint determines the reported error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corvid_backends::{BackendError, LaunchDescriptor, StreamId, TraceCollector};
use corvid_tracing::diagnostics;
use corvid_tracing::performance::{record_launch, PerformanceSpan};

use crate::device::Device;
use crate::error::{Error, Result};

/// Dimensions the dispatcher normalizes to
pub const MAX_WORK_DIM: u32 = 3;

/// Launch geometry as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdRange {
    pub work_dim: u32,
    pub global_offset: Option<Vec<usize>>,
    pub global_size: Option<Vec<usize>>,
    pub local_size: Option<Vec<usize>>,
}

impl NdRange {
    /// Range of `global_size.len()` dimensions.
    pub fn new(global_size: &[usize]) -> Self {
        Self {
            work_dim: global_size.len() as u32,
            global_offset: None,
            global_size: Some(global_size.to_vec()),
            local_size: None,
        }
    }

    pub fn with_local(mut self, local_size: &[usize]) -> Self {
        self.local_size = Some(local_size.to_vec());
        self
    }

    pub fn with_offset(mut self, global_offset: &[usize]) -> Self {
        self.global_offset = Some(global_offset.to_vec());
        self
    }
}

/// Completion event of an enqueued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event(pub u64);

/// Events a command waits on, and whether the caller wants one back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventWaitList {
    pub num_events: u32,
    pub events: Option<Vec<Event>>,
    pub want_event: bool,
}

impl EventWaitList {
    pub fn none() -> Self {
        Self::default()
    }

    /// Reject inconsistent lists, then anything that needs event support.
    pub(crate) fn check(&self) -> Result<()> {
        let listed = self.events.as_ref().map_or(0, Vec::len);
        let consistent = match &self.events {
            None => self.num_events == 0,
            Some(events) => self.num_events as usize == events.len() && !events.is_empty(),
        };
        if !consistent {
            return Err(Error::EventWaitList);
        }
        if listed > 0 {
            return Err(Error::Unimplemented("event wait lists"));
        }
        if self.want_event {
            return Err(Error::Unimplemented("command events"));
        }
        Ok(())
    }
}

/// Normalized three-dimensional launch geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub work_dim: u32,
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub groups: [usize; 3],
}

impl Geometry {
    /// Validate `range`, pad it to three dimensions and compute group counts.
    pub fn from_range(range: &NdRange) -> Result<Self> {
        let dims = range.work_dim as usize;
        if !(1..=MAX_WORK_DIM).contains(&range.work_dim) {
            return Err(Error::WorkDimension(range.work_dim));
        }

        let global_size = range
            .global_size
            .as_deref()
            .ok_or_else(|| Error::GlobalWorkSize("no global work size".to_string()))?;
        if global_size.len() < dims {
            return Err(Error::GlobalWorkSize(format!(
                "{} sizes for {dims} dimensions",
                global_size.len()
            )));
        }
        for (dimension, &size) in global_size[..dims].iter().enumerate() {
            if size == 0 || size > u32::MAX as usize {
                return Err(Error::GlobalWorkSize(format!("{size} in dimension {dimension}")));
            }
        }

        if let Some(offset) = range.global_offset.as_deref() {
            if offset.iter().take(dims).any(|&o| o != 0) {
                return Err(Error::Unimplemented("global work offset"));
            }
        }

        let mut global = [1usize; 3];
        global[..dims].copy_from_slice(&global_size[..dims]);

        let mut local = global;
        if let Some(local_size) = range.local_size.as_deref() {
            for dimension in 0..dims {
                let size = local_size.get(dimension).copied().unwrap_or(0);
                if size == 0 || global[dimension] % size != 0 {
                    return Err(Error::WorkGroupSize {
                        dimension,
                        local: size,
                        global: global[dimension],
                    });
                }
                local[dimension] = size;
            }
        }

        let groups = [global[0] / local[0], global[1] / local[1], global[2] / local[2]];
        Ok(Self {
            work_dim: range.work_dim,
            global,
            local,
            groups,
        })
    }

    fn as_u32(values: [usize; 3]) -> [u32; 3] {
        // Bounded by the global-size check in from_range.
        values.map(|v| v as u32)
    }
}

/// Everything needed to dispatch one enqueue, computed under the lock
pub(crate) struct Invocation {
    pub(crate) module: String,
    pub(crate) kernel: String,
    pub(crate) stream: StreamId,
    pub(crate) geometry: Geometry,
    pub(crate) parameters: Vec<u8>,
    pub(crate) collectors: Vec<Arc<dyn TraceCollector>>,
}

/// Clears the executing flag on every exit path.
struct ExecutingGuard<'a>(&'a AtomicBool);

impl<'a> ExecutingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Launch `invocation` on `device`.
///
/// Execution faults are written to the diagnostic channel and returned as
/// [`Error::LaunchFailed`]. Any other back-end failure surfaces as
/// [`Error::Backend`].
pub(crate) fn dispatch(
    device: &mut Device,
    invocation: &Invocation,
    executing: &AtomicBool,
    diagnostic_prefix: &str,
) -> Result<()> {
    let span = PerformanceSpan::new("dispatch", None);
    let work_groups = Geometry::as_u32(invocation.geometry.groups);
    let local_size = Geometry::as_u32(invocation.geometry.local);
    let descriptor = LaunchDescriptor {
        module: &invocation.module,
        kernel: &invocation.kernel,
        stream: invocation.stream,
        work_groups,
        local_size,
        parameters: &invocation.parameters,
        collectors: &invocation.collectors,
    };
    tracing::debug!(device = device.name(), ?descriptor, "dispatch");

    let result = {
        let _executing = ExecutingGuard::enter(executing);
        let mut selected = device.select();
        selected.launch(&descriptor)
    };

    match result {
        Ok(()) => {
            record_launch(&invocation.kernel, work_groups, local_size, span.elapsed_us());
            Ok(())
        }
        Err(BackendError::Execution(message)) => {
            diagnostics::report(diagnostic_prefix, &message);
            Err(Error::LaunchFailed {
                kernel: invocation.kernel.clone(),
                message,
            })
        }
        Err(other) => Err(Error::Backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_count() {
        let geometry = Geometry::from_range(&NdRange::new(&[1024]).with_local(&[256])).unwrap();
        assert_eq!(geometry.groups, [4, 1, 1]);
        assert_eq!(geometry.local, [256, 1, 1]);
        assert_eq!(geometry.global, [1024, 1, 1]);
    }

    #[test]
    fn test_local_must_divide_global() {
        let err = Geometry::from_range(&NdRange::new(&[1024]).with_local(&[300])).unwrap_err();
        assert!(matches!(err, Error::WorkGroupSize { dimension: 0, local: 300, .. }));
    }

    #[test]
    fn test_absent_local_is_global() {
        let geometry = Geometry::from_range(&NdRange::new(&[64, 8])).unwrap();
        assert_eq!(geometry.local, [64, 8, 1]);
        assert_eq!(geometry.groups, [1, 1, 1]);
    }

    #[test]
    fn test_work_dimension_bounds() {
        let mut range = NdRange::new(&[1, 1, 1, 1]);
        assert!(matches!(Geometry::from_range(&range), Err(Error::WorkDimension(4))));
        range.work_dim = 0;
        assert!(matches!(Geometry::from_range(&range), Err(Error::WorkDimension(0))));
    }

    #[test]
    fn test_global_size_checks() {
        let range = NdRange {
            work_dim: 2,
            global_size: Some(vec![16]),
            ..NdRange::default()
        };
        assert!(matches!(Geometry::from_range(&range), Err(Error::GlobalWorkSize(_))));

        let range = NdRange {
            work_dim: 1,
            ..NdRange::default()
        };
        assert!(matches!(Geometry::from_range(&range), Err(Error::GlobalWorkSize(_))));

        assert!(matches!(
            Geometry::from_range(&NdRange::new(&[8, 0])),
            Err(Error::GlobalWorkSize(_))
        ));
    }

    #[test]
    fn test_offset_is_unimplemented_unless_zero() {
        assert!(Geometry::from_range(&NdRange::new(&[8]).with_offset(&[0])).is_ok());
        let err = Geometry::from_range(&NdRange::new(&[8]).with_offset(&[2])).unwrap_err();
        assert!(matches!(err, Error::Unimplemented(_)));
    }

    #[test]
    fn test_error_precedence() {
        // Bad global size is reported before a non-dividing local size.
        let range = NdRange::new(&[0]).with_local(&[3]);
        assert!(matches!(Geometry::from_range(&range), Err(Error::GlobalWorkSize(_))));
    }

    #[test]
    fn test_event_wait_list() {
        assert!(EventWaitList::none().check().is_ok());

        let mismatch = EventWaitList {
            num_events: 2,
            events: Some(vec![Event(1)]),
            want_event: false,
        };
        assert!(matches!(mismatch.check(), Err(Error::EventWaitList)));

        let missing = EventWaitList {
            num_events: 1,
            ..EventWaitList::none()
        };
        assert!(matches!(missing.check(), Err(Error::EventWaitList)));

        let consistent = EventWaitList {
            num_events: 1,
            events: Some(vec![Event(1)]),
            want_event: false,
        };
        assert!(matches!(consistent.check(), Err(Error::Unimplemented(_))));

        let out = EventWaitList {
            want_event: true,
            ..EventWaitList::none()
        };
        assert!(matches!(out.check(), Err(Error::Unimplemented(_))));
    }

    #[test]
    fn test_executing_guard_clears() {
        let flag = AtomicBool::new(false);
        {
            let _guard = ExecutingGuard::enter(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
