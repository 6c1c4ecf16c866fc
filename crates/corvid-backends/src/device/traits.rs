//! Execution device trait
//!
//! Every back-end (GPU hardware, CPU JIT, emulator, remote accelerator)
//! implements [`ExecutionDevice`]. The runtime owns one boxed device per
//! enumerated API device and never talks to back-end internals directly.

use super::types::{
    AllocationInfo, DevicePtr, DeviceProperties, HostAllocFlags, LaunchDescriptor, OptimizationLevel, StreamId,
};
use crate::error::Result;
use crate::ir::ModuleIr;

/// Contract between the host runtime and one execution device.
///
/// # Selection
///
/// A device binds its execution context to the calling thread between
/// [`select`](ExecutionDevice::select) and
/// [`unselect`](ExecutionDevice::unselect). All operations other than
/// [`properties`](ExecutionDevice::properties), [`host_view`](ExecutionDevice::host_view) and the allocation listings
/// require the device to be selected. Selections never nest.
///
/// ```text
/// select() ─► load_module / allocate / read / write / launch ... ─► unselect()
/// ```
///
/// # Memory Model
///
/// - **Private** allocations live only on the device (`allocate`).
/// - **Host-resident** allocations are host-visible (`allocate_host`) and
///   expose their bytes through [`host_view`](ExecutionDevice::host_view).
/// - **Global** allocations mirror module-scope symbols; they are created by
///   the device when a module is loaded and released when it is unloaded.
pub trait ExecutionDevice: Send {
    /// Static properties of this device.
    fn properties(&self) -> &DeviceProperties;

    /// Bind this device's execution context to the calling thread.
    fn select(&mut self);

    /// Release the binding made by [`select`](ExecutionDevice::select).
    fn unselect(&mut self);

    fn is_selected(&self) -> bool;

    // ============================================================================================
    // Modules
    // ============================================================================================

    /// Load a parsed module, allocating storage for its globals.
    fn load_module(&mut self, module: &ModuleIr) -> Result<()>;

    /// Unload a module by name. Unloading a module that is not loaded is not an error.
    fn unload_module(&mut self, name: &str) -> Result<()>;

    /// Optimization level for subsequent module translation.
    fn set_optimization_level(&mut self, level: OptimizationLevel);

    // ============================================================================================
    // Memory
    // ============================================================================================

    /// Allocate `size` bytes of device-private memory.
    fn allocate(&mut self, size: usize) -> Result<DevicePtr>;

    /// Allocate `size` bytes of host-visible memory.
    fn allocate_host(&mut self, size: usize, flags: HostAllocFlags) -> Result<DevicePtr>;

    fn free(&mut self, ptr: DevicePtr) -> Result<()>;

    /// Copy `data` into the allocation at `ptr`, starting `offset` bytes in.
    fn write(&mut self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy from the allocation at `ptr`, starting `offset` bytes in, into `data`.
    fn read(&self, ptr: DevicePtr, offset: usize, data: &mut [u8]) -> Result<()>;

    /// Direct view of a host-resident allocation. `None` for device-private memory.
    fn host_view(&self, ptr: DevicePtr) -> Option<&[u8]>;

    /// Live private and host-resident allocations, in allocation order.
    fn allocations(&self) -> Vec<AllocationInfo>;

    /// Storage mirroring global `symbol` of a loaded `module`.
    fn global_allocation(&self, module: &str, symbol: &str) -> Option<AllocationInfo>;

    // ============================================================================================
    // Execution
    // ============================================================================================

    /// Create an execution stream for a command queue.
    fn create_stream(&mut self) -> Result<StreamId>;

    /// Launch a kernel and block until it completes.
    ///
    /// Faults raised by the running kernel are reported as
    /// [`BackendError::Execution`](crate::BackendError::Execution).
    fn launch(&mut self, launch: &LaunchDescriptor<'_>) -> Result<()>;

    /// Release every back-end resource. Called once at runtime teardown.
    fn release(&mut self);
}
