//! API objects tracked by the registry

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use corvid_backends::{DevicePtr, StreamId, TraceCollector};

use crate::arena::Handle;
use crate::device::Device;
use crate::dispatch::Geometry;

/// Whether a trace collector survives the launch it observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Attached to every launch in the context until cleared
    Persistent,
    /// Attached to the next launch in the context only
    OneShot,
}

/// Fixed set of devices sharing programs, queues and memory objects
pub struct Context {
    pub(crate) devices: Vec<Handle<Device>>,
    pub(crate) programs: Vec<Handle<Program>>,
    pub(crate) queues: Vec<Handle<CommandQueue>>,
    pub(crate) memory: Vec<Handle<MemoryObject>>,
    pub(crate) persistent_collectors: Vec<Arc<dyn TraceCollector>>,
    pub(crate) oneshot_collectors: Vec<Arc<dyn TraceCollector>>,
}

impl Context {
    pub(crate) fn new(devices: Vec<Handle<Device>>) -> Self {
        Self {
            devices,
            programs: Vec::new(),
            queues: Vec::new(),
            memory: Vec::new(),
            persistent_collectors: Vec::new(),
            oneshot_collectors: Vec::new(),
        }
    }

    pub(crate) fn has_device(&self, device: Handle<Device>) -> bool {
        self.devices.contains(&device)
    }

    /// Collectors for the next launch. One-shot collectors are consumed.
    pub(crate) fn take_launch_collectors(&mut self) -> Vec<Arc<dyn TraceCollector>> {
        let mut collectors = self.persistent_collectors.clone();
        collectors.append(&mut self.oneshot_collectors);
        collectors
    }
}

/// Per-device result of a program build
pub(crate) struct DeviceBinary {
    pub(crate) device: Handle<Device>,
    pub(crate) module: String,
    pub(crate) binary: Vec<u8>,
}

/// Program source and, once built, its per-device modules
pub struct Program {
    pub(crate) context: Handle<Context>,
    pub(crate) source: String,
    pub(crate) binaries: Option<Vec<DeviceBinary>>,
    pub(crate) kernels: Vec<Handle<Kernel>>,
}

impl Program {
    pub(crate) fn is_built(&self) -> bool {
        self.binaries.is_some()
    }

    /// Module this program was built into for `device`.
    pub(crate) fn module_for(&self, device: Handle<Device>) -> Option<&str> {
        self.binaries
            .as_deref()?
            .iter()
            .find(|b| b.device == device)
            .map(|b| b.module.as_str())
    }
}

/// Kernel entry point with its bound arguments
pub struct Kernel {
    pub(crate) program: Handle<Program>,
    pub(crate) context: Handle<Context>,
    pub(crate) name: String,
    /// Argument bytes by parameter index
    pub(crate) args: Vec<Option<Vec<u8>>>,
    /// Geometry of the most recent enqueue that passed validation
    pub(crate) geometry: Option<Geometry>,
}

impl Kernel {
    pub(crate) fn bound_args(&self) -> usize {
        self.args.iter().filter(|a| a.is_some()).count()
    }
}

/// Buffer flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemFlags(pub u64);

impl MemFlags {
    pub const READ_WRITE: Self = Self(1 << 0);
    pub const WRITE_ONLY: Self = Self(1 << 1);
    pub const READ_ONLY: Self = Self(1 << 2);
    pub const USE_HOST_PTR: Self = Self(1 << 3);
    pub const ALLOC_HOST_PTR: Self = Self(1 << 4);
    pub const COPY_HOST_PTR: Self = Self(1 << 5);

    const ALL: u64 = (1 << 6) - 1;

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn has_unknown_bits(self) -> bool {
        self.0 & !Self::ALL != 0
    }

    /// Number of access qualifiers set. At most one is allowed.
    pub(crate) const fn access_qualifiers(self) -> u32 {
        (self.0 & (Self::READ_WRITE.0 | Self::WRITE_ONLY.0 | Self::READ_ONLY.0)).count_ones()
    }
}

impl BitOr for MemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemFlags({:#x})", self.0)
    }
}

/// Buffer with one allocation per device of its context
pub struct MemoryObject {
    pub(crate) context: Handle<Context>,
    pub(crate) size: usize,
    pub(crate) flags: MemFlags,
    pub(crate) allocations: Vec<(Handle<Device>, DevicePtr)>,
}

impl MemoryObject {
    pub(crate) fn allocation_on(&self, device: Handle<Device>) -> Option<DevicePtr> {
        self.allocations
            .iter()
            .find(|(d, _)| *d == device)
            .map(|(_, ptr)| *ptr)
    }
}

/// Command queue properties
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueueProperties(pub u64);

impl QueueProperties {
    pub const NONE: Self = Self(0);
    pub const OUT_OF_ORDER_EXEC_MODE_ENABLE: Self = Self(1 << 0);
    pub const PROFILING_ENABLE: Self = Self(1 << 1);

    const ALL: u64 = (1 << 2) - 1;

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn has_unknown_bits(self) -> bool {
        self.0 & !Self::ALL != 0
    }
}

impl BitOr for QueueProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for QueueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueProperties({:#x})", self.0)
    }
}

/// In-order, blocking queue on one device of a context
pub struct CommandQueue {
    pub(crate) context: Handle<Context>,
    pub(crate) device: Handle<Device>,
    pub(crate) properties: QueueProperties,
    pub(crate) stream: StreamId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_backends::RecordingCollector;

    #[test]
    fn test_access_qualifiers() {
        assert_eq!(MemFlags::default().access_qualifiers(), 0);
        assert_eq!((MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR).access_qualifiers(), 1);
        assert_eq!((MemFlags::READ_ONLY | MemFlags::WRITE_ONLY).access_qualifiers(), 2);
        assert!(MemFlags(1 << 40).has_unknown_bits());
    }

    #[test]
    fn test_oneshot_collectors_are_consumed() {
        let mut context = Context::new(Vec::new());
        context.persistent_collectors.push(Arc::new(RecordingCollector::new()));
        context.oneshot_collectors.push(Arc::new(RecordingCollector::new()));

        assert_eq!(context.take_launch_collectors().len(), 2);
        assert_eq!(context.take_launch_collectors().len(), 1);
    }

    #[test]
    fn test_queue_properties() {
        let props = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE | QueueProperties::PROFILING_ENABLE;
        assert!(props.contains(QueueProperties::PROFILING_ENABLE));
        assert!(!props.has_unknown_bits());
        assert!(QueueProperties(1 << 5).has_unknown_bits());
    }
}
