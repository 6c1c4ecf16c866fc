//! Execution device trait and shared types

mod traits;
mod types;

pub use traits::ExecutionDevice;
pub use types::{
    AllocationInfo, AllocationKind, Capability, DevicePtr, DeviceProperties, DeviceType, HostAllocFlags,
    LaunchDescriptor, OptimizationLevel, StreamId, POINTER_SIZE,
};
