//! # corvid-runtime - Heterogeneous Compute Host Runtime
//!
//! Host-side core of a compute API: callers discover devices, build
//! programs from pre-translated IR modules, manage device memory and launch
//! kernels over an N-dimensional range. Execution itself is delegated to
//! back-ends implementing [`corvid_backends::ExecutionDevice`].
//!
//! ## Architecture
//!
//! ```text
//!               ┌──────────────────────────────┐
//!               │      Runtime (one lock)      │
//!               └──┬────────┬────────┬─────────┘
//!                  │        │        │
//!         ┌────────▼──┐ ┌───▼────┐ ┌─▼──────────┐
//!         │ Registry  │ │ Module │ │ Dispatcher │──► ExecutionDevice
//!         │ (handles) │ │ Loader │ │ + Binder   │
//!         └───────────┘ └────────┘ └────────────┘
//! ```
//!
//! - **Registry**: typed generational handles for every API object; a handle
//!   is valid until the runtime is torn down
//! - **Module loader**: named IR modules, loaded lazily onto each device
//! - **Parameter binder**: aligned parameter blocks with memory-object
//!   arguments resolved to device addresses
//! - **Launch dispatcher**: geometry validation and blocking launches
//! - **Migration engine**: relocates one device's allocations onto another
//!
//! Every enqueue is blocking; events, asynchronous transfers and
//! out-of-order queues report [`Status::Unimplemented`].
//!
//! ## Example
//!
//! ```rust
//! use corvid_runtime::{DeviceTypeMask, PlatformInfo};
//!
//! let rt = corvid_runtime::global();
//! let platform = rt.get_platform_ids()?[0];
//! let name = rt.get_platform_info(platform, PlatformInfo::Name)?;
//! assert_eq!(name.as_str(), Some("Corvid"));
//! assert!(!rt.get_device_ids(platform, DeviceTypeMask::ALL)?.is_empty());
//! # Ok::<(), corvid_runtime::Error>(())
//! ```

pub mod arena;
pub mod binder;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod info;
pub mod migration;
mod module_loader;
pub mod objects;
mod registry;
pub mod runtime;

pub use arena::Handle;
pub use binder::ParamLayout;
pub use config::{DeviceKind, RuntimeConfig};
pub use device::{Device, Platform};
pub use dispatch::{Event, EventWaitList, Geometry, NdRange, MAX_WORK_DIM};
pub use error::{Error, ErrorClass, HandleKind, Result, Status};
pub use info::{
    ContextInfo, DeviceInfo, DeviceTypeMask, InfoValue, KernelInfoParam, MemInfo, PlatformInfo, ProgramInfo,
    QueueInfo,
};
pub use migration::MigrationMap;
pub use objects::{CommandQueue, Context, Kernel, MemFlags, MemoryObject, Persistence, Program, QueueProperties};
pub use runtime::{Notify, Runtime};

lazy_static::lazy_static! {
    /// Process-wide runtime configured from the environment
    static ref GLOBAL_RUNTIME: Runtime = Runtime::new(RuntimeConfig::from_env());
}

/// The process-wide runtime, created on first use.
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}
