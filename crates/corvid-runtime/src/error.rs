//! Error types for runtime operations
//!
//! Every facade operation returns [`Result`]. An [`Error`] carries the
//! context of the first violated constraint; [`Error::status`] reduces it to
//! the conventional host-API [`Status`] code and [`Status::class`] to one of
//! five [`ErrorClass`]es.

use std::fmt;

use corvid_backends::BackendError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure category of a [`Status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A handle did not name a live object of the expected kind
    InvalidHandle,
    /// An argument value was out of range or malformed
    InvalidValue,
    /// The object was not in a state that permits the operation
    InvalidState,
    /// Allocation or device resources were exhausted
    Resource,
    /// The request is valid but not supported by this runtime
    Unimplemented,
}

/// Concrete status codes in the conventional host-API numbering.
///
/// Codes below -1000 are runtime-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    DeviceNotFound = -1,
    MemObjectAllocationFailure = -4,
    OutOfResources = -5,
    OutOfHostMemory = -6,
    BuildProgramFailure = -11,
    InvalidValue = -30,
    InvalidDeviceType = -31,
    InvalidPlatform = -32,
    InvalidDevice = -33,
    InvalidContext = -34,
    InvalidCommandQueue = -36,
    InvalidHostPtr = -37,
    InvalidMemObject = -38,
    InvalidProgram = -44,
    InvalidProgramExecutable = -45,
    InvalidKernelName = -46,
    InvalidKernel = -48,
    InvalidArgIndex = -49,
    InvalidArgValue = -50,
    InvalidArgSize = -51,
    InvalidKernelArgs = -52,
    InvalidWorkDimension = -53,
    InvalidWorkGroupSize = -54,
    InvalidEventWaitList = -57,
    InvalidBufferSize = -61,
    InvalidGlobalWorkSize = -63,
    LaunchFailed = -1001,
    InvalidModule = -1002,
    Unimplemented = -1003,
}

impl Status {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn class(self) -> ErrorClass {
        match self {
            Status::InvalidPlatform
            | Status::InvalidDevice
            | Status::InvalidContext
            | Status::InvalidCommandQueue
            | Status::InvalidMemObject
            | Status::InvalidProgram
            | Status::InvalidKernel
            | Status::InvalidModule => ErrorClass::InvalidHandle,

            Status::DeviceNotFound
            | Status::BuildProgramFailure
            | Status::InvalidValue
            | Status::InvalidDeviceType
            | Status::InvalidHostPtr
            | Status::InvalidKernelName
            | Status::InvalidArgIndex
            | Status::InvalidArgValue
            | Status::InvalidArgSize
            | Status::InvalidWorkDimension
            | Status::InvalidWorkGroupSize
            | Status::InvalidEventWaitList
            | Status::InvalidBufferSize
            | Status::InvalidGlobalWorkSize => ErrorClass::InvalidValue,

            Status::InvalidProgramExecutable | Status::InvalidKernelArgs => ErrorClass::InvalidState,

            Status::MemObjectAllocationFailure
            | Status::OutOfResources
            | Status::OutOfHostMemory
            | Status::LaunchFailed => ErrorClass::Resource,

            Status::Unimplemented => ErrorClass::Unimplemented,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

/// Kind of object a handle was expected to name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Platform,
    Device,
    Context,
    Program,
    Kernel,
    MemObject,
    CommandQueue,
}

impl HandleKind {
    const fn status(self) -> Status {
        match self {
            HandleKind::Platform => Status::InvalidPlatform,
            HandleKind::Device => Status::InvalidDevice,
            HandleKind::Context => Status::InvalidContext,
            HandleKind::Program => Status::InvalidProgram,
            HandleKind::Kernel => Status::InvalidKernel,
            HandleKind::MemObject => Status::InvalidMemObject,
            HandleKind::CommandQueue => Status::InvalidCommandQueue,
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Platform => "platform",
            HandleKind::Device => "device",
            HandleKind::Context => "context",
            HandleKind::Program => "program",
            HandleKind::Kernel => "kernel",
            HandleKind::MemObject => "memory object",
            HandleKind::CommandQueue => "command queue",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Handle is not registered
    #[error("invalid {0} handle")]
    InvalidHandle(HandleKind),

    /// Device is valid but not part of the context in use
    #[error("device is not part of the context")]
    DeviceNotInContext,

    /// Objects from two different contexts were combined
    #[error("{0} belongs to a different context")]
    ContextMismatch(HandleKind),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// No device of the requested type
    #[error("no device matches type mask {0:#x}")]
    DeviceNotFound(u64),

    #[error("invalid device type mask {0:#x}")]
    InvalidDeviceType(u64),

    #[error("invalid host pointer: {0}")]
    InvalidHostPtr(String),

    #[error("invalid buffer size {0}")]
    InvalidBufferSize(usize),

    /// Device memory for a buffer or parameter block could not be obtained
    #[error("memory allocation failed on '{device}': {reason}")]
    MemAllocation { device: String, reason: String },

    #[error("failed to create command queue stream: {0}")]
    StreamCreation(String),

    /// IR text of a module could not be parsed
    #[error("build of module '{module}' failed: {reason}")]
    BuildFailure { module: String, reason: String },

    #[error("program is not built for the requested device")]
    ProgramNotBuilt,

    #[error("kernel '{0}' not found in program")]
    KernelNotFound(String),

    #[error("argument index {index} out of range ({count} parameters)")]
    ArgIndex { index: usize, count: usize },

    #[error("argument {index} has no value")]
    ArgValue { index: usize },

    #[error("argument {index} is {actual} bytes, parameter expects {expected}")]
    ArgSize { index: usize, expected: usize, actual: usize },

    #[error("{bound} arguments bound, kernel declares {declared}")]
    KernelArgs { bound: usize, declared: usize },

    #[error("work dimension {0} not in 1..=3")]
    WorkDimension(u32),

    #[error("invalid global work size: {0}")]
    GlobalWorkSize(String),

    #[error("local size {local} does not divide global size {global} in dimension {dimension}")]
    WorkGroupSize {
        dimension: usize,
        local: usize,
        global: usize,
    },

    #[error("event wait list does not match its count")]
    EventWaitList,

    /// Back-end fault while the kernel was running
    #[error("launch of '{kernel}' failed: {message}")]
    LaunchFailed { kernel: String, message: String },

    #[error("module '{0}' is already registered")]
    ModuleExists(String),

    #[error("module '{0}' is not registered")]
    ModuleNotFound(String),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// Unrecognized back-end failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Error::InvalidHandle(kind) => kind.status(),
            Error::DeviceNotInContext => Status::InvalidDevice,
            Error::ContextMismatch(_) => Status::InvalidContext,
            Error::InvalidValue(_) | Error::ModuleExists(_) => Status::InvalidValue,
            Error::DeviceNotFound(_) => Status::DeviceNotFound,
            Error::InvalidDeviceType(_) => Status::InvalidDeviceType,
            Error::InvalidHostPtr(_) => Status::InvalidHostPtr,
            Error::InvalidBufferSize(_) => Status::InvalidBufferSize,
            Error::MemAllocation { .. } => Status::MemObjectAllocationFailure,
            Error::StreamCreation(_) => Status::OutOfResources,
            Error::BuildFailure { .. } => Status::BuildProgramFailure,
            Error::ProgramNotBuilt => Status::InvalidProgramExecutable,
            Error::KernelNotFound(_) => Status::InvalidKernelName,
            Error::ArgIndex { .. } => Status::InvalidArgIndex,
            Error::ArgValue { .. } => Status::InvalidArgValue,
            Error::ArgSize { .. } => Status::InvalidArgSize,
            Error::KernelArgs { .. } => Status::InvalidKernelArgs,
            Error::WorkDimension(_) => Status::InvalidWorkDimension,
            Error::GlobalWorkSize(_) => Status::InvalidGlobalWorkSize,
            Error::WorkGroupSize { .. } => Status::InvalidWorkGroupSize,
            Error::EventWaitList => Status::InvalidEventWaitList,
            Error::LaunchFailed { .. } => Status::LaunchFailed,
            Error::ModuleNotFound(_) => Status::InvalidModule,
            Error::Unimplemented(_) => Status::Unimplemented,
            Error::Backend(_) => Status::OutOfHostMemory,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.status().class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_errors_map_per_kind() {
        assert_eq!(Error::InvalidHandle(HandleKind::Device).status(), Status::InvalidDevice);
        assert_eq!(Error::InvalidHandle(HandleKind::Platform).status(), Status::InvalidPlatform);
        assert_eq!(
            Error::InvalidHandle(HandleKind::MemObject).class(),
            ErrorClass::InvalidHandle
        );
        assert_eq!(Error::ModuleNotFound("m".into()).class(), ErrorClass::InvalidHandle);
    }

    #[test]
    fn test_classes() {
        assert_eq!(Error::KernelArgs { bound: 0, declared: 2 }.class(), ErrorClass::InvalidState);
        assert_eq!(Error::Unimplemented("events").class(), ErrorClass::Unimplemented);
        let alloc = Error::MemAllocation {
            device: "gpu".into(),
            reason: "no allocation".into(),
        };
        assert_eq!(alloc.class(), ErrorClass::Resource);
    }

    #[test]
    fn test_unrecognized_backend_faults_are_host_memory() {
        let err = Error::from(BackendError::Unsupported("x".into()));
        assert_eq!(err.status(), Status::OutOfHostMemory);
        assert_eq!(err.class(), ErrorClass::Resource);
    }

    #[test]
    fn test_codes() {
        assert_eq!(Status::InvalidValue.code(), -30);
        assert_eq!(Status::InvalidWorkGroupSize.code(), -54);
        assert_eq!(Status::InvalidKernelArgs.to_string(), "InvalidKernelArgs (-52)");
    }

    #[test]
    fn test_work_group_message_names_dimension() {
        let err = Error::WorkGroupSize {
            dimension: 0,
            local: 300,
            global: 1024,
        };
        assert!(err.to_string().contains("dimension 0"));
    }
}
