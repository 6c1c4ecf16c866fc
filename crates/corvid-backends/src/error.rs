//! Error types for back-end device operations

use crate::device::DevicePtr;

/// Result type for back-end operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by an execution device or while reading an IR module
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Operation issued while the device was not selected by the caller
    #[error("device '{0}' used without being selected")]
    NotSelected(String),

    /// Pointer does not name a live allocation on this device
    #[error("invalid device pointer: {0}")]
    InvalidPointer(DevicePtr),

    /// Access outside an allocation
    #[error("access out of bounds: offset {offset} + len {len} > allocation size {size} at {ptr}")]
    OutOfBounds {
        ptr: DevicePtr,
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Device memory exhausted
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// Module referenced before it was loaded on this device
    #[error("module '{0}' is not loaded")]
    ModuleNotLoaded(String),

    /// Kernel name not present in a loaded module
    #[error("kernel '{kernel}' not found in module '{module}'")]
    KernelNotFound { module: String, kernel: String },

    /// Execution stream could not be created
    #[error("failed to create execution stream: {0}")]
    StreamCreation(String),

    /// Fault raised while the kernel was running
    #[error("execution failure: {0}")]
    Execution(String),

    /// IR text could not be parsed into a module
    #[error("failed to parse module '{module}': {reason}")]
    Parse { module: String, reason: String },

    /// Feature not available on this device
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Create an execution failure
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a parse failure for `module`
    pub fn parse(module: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            module: module.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error was raised by a running kernel rather than by
    /// bookkeeping around it
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}
