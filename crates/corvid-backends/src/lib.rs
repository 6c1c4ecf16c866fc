//! Back-end contract for the Corvid runtime
//!
//! This crate provides:
//! - **ExecutionDevice**: the trait every back-end device implements
//! - **IR modules**: the parsed interface of a pre-translated module
//! - **Trace collectors**: observers that receive launch events
//! - **ReferenceDevice**: an in-memory device honouring the whole contract
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  corvid-runtime facade                  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │  ExecutionDevice
//!         ┌─────────────┼─────────────┬─────────────┐
//!         ▼             ▼             ▼             ▼
//!   ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌───────────┐
//!   │   GPU   │  │ CPU JIT │  │Emulator │  │  Remote   │
//!   └─────────┘  └─────────┘  └─────────┘  └───────────┘
//! ```

pub mod device;
pub mod error;
pub mod ir;
pub mod reference;
pub mod trace;

pub use device::{
    AllocationInfo, AllocationKind, Capability, DevicePtr, DeviceProperties, DeviceType, ExecutionDevice,
    HostAllocFlags, LaunchDescriptor, OptimizationLevel, StreamId, POINTER_SIZE,
};
pub use error::{BackendError, Result};
pub use ir::{GlobalDecl, KernelSignature, ModuleIr, ParamDecl, ParamType, ScalarType};
pub use reference::{LaunchRecord, ReferenceDevice, ReferenceProbe};
pub use trace::{LaunchSummary, ProfileKind, ProfileRecord, RecordingCollector, TraceCollector, TraceEvent};
