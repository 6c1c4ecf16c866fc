//! Types shared between the runtime and execution devices

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::Arc;

use crate::trace::TraceCollector;

/// Width in bytes of a device address as it appears in a parameter block.
pub const POINTER_SIZE: usize = std::mem::size_of::<u64>();

/// Address of an allocation on an execution device.
///
/// The value is opaque to the runtime; it is copied into parameter blocks
/// and used as the key for migration mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const fn new(addr: u64) -> Self {
        DevicePtr(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    /// Little-endian encoding written into a parameter block.
    pub const fn to_le_bytes(self) -> [u8; POINTER_SIZE] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Execution stream handed out by [`crate::ExecutionDevice::create_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

/// Class of execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// General-purpose accelerator (GPU hardware, emulated GPU, remote GPU)
    Gpu,
    /// Host-CPU-class device (JIT or interpreter on the host)
    Cpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Gpu => f.write_str("gpu"),
            DeviceType::Cpu => f.write_str("cpu"),
        }
    }
}

/// Capability level of a device, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability {
    pub major: u32,
    pub minor: u32,
}

impl Capability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Static description of an execution device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub vendor: String,
    pub driver_version: String,
    pub device_type: DeviceType,
    pub capability: Capability,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
    pub global_memory_bytes: u64,
    pub address_bits: u32,
}

impl DeviceProperties {
    /// Properties of a generic accelerator with `global_memory_bytes` of memory.
    pub fn gpu(name: impl Into<String>, global_memory_bytes: u64) -> Self {
        Self {
            name: name.into(),
            vendor: "Corvid".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            device_type: DeviceType::Gpu,
            capability: Capability::new(2, 0),
            compute_units: 16,
            max_work_group_size: 1024,
            max_work_item_sizes: [1024, 1024, 64],
            global_memory_bytes,
            address_bits: 64,
        }
    }

    /// Properties of a host-CPU-class device.
    pub fn cpu(name: impl Into<String>, global_memory_bytes: u64) -> Self {
        Self {
            device_type: DeviceType::Cpu,
            capability: Capability::new(1, 0),
            compute_units: 1,
            max_work_group_size: 1024,
            ..Self::gpu(name, global_memory_bytes)
        }
    }
}

/// Flags attached to a host-visible allocation. Preserved across migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HostAllocFlags(pub u32);

impl HostAllocFlags {
    pub const NONE: Self = Self(0);
    pub const PORTABLE: Self = Self(1 << 0);
    pub const MAPPED: Self = Self(1 << 1);
    pub const WRITE_COMBINED: Self = Self(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HostAllocFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Residency class of a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// Device-only memory
    Private,
    /// Host-visible memory with its allocation flags
    HostResident(HostAllocFlags),
    /// Mirrored storage of a module-scope global symbol
    Global,
}

/// A live allocation as reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub ptr: DevicePtr,
    pub size: usize,
    pub kind: AllocationKind,
}

/// Optimization level applied by a device when it loads a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptimizationLevel {
    #[default]
    None,
    Debug,
    Basic,
    Aggressive,
    Speculative,
    Full,
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "debug" => Ok(Self::Debug),
            "basic" | "1" => Ok(Self::Basic),
            "aggressive" | "2" => Ok(Self::Aggressive),
            "speculative" => Ok(Self::Speculative),
            "full" | "3" => Ok(Self::Full),
            other => Err(format!("unknown optimization level '{other}'")),
        }
    }
}

/// Everything a device needs to launch one kernel.
pub struct LaunchDescriptor<'a> {
    pub module: &'a str,
    pub kernel: &'a str,
    /// Stream of the issuing command queue
    pub stream: StreamId,
    /// Work-group count per dimension
    pub work_groups: [u32; 3],
    /// Work-items per work-group per dimension
    pub local_size: [u32; 3],
    /// Packed, aligned kernel arguments
    pub parameters: &'a [u8],
    /// Observers attached to the launching context
    pub collectors: &'a [Arc<dyn TraceCollector>],
}

impl fmt::Debug for LaunchDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchDescriptor")
            .field("module", &self.module)
            .field("kernel", &self.kernel)
            .field("stream", &self.stream)
            .field("work_groups", &self.work_groups)
            .field("local_size", &self.local_size)
            .field("parameter_bytes", &self.parameters.len())
            .field("collectors", &self.collectors.len())
            .finish()
    }
}
