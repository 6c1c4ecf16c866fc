//! Object queries
//!
//! Every `get_*_info` call returns an [`InfoValue`]. Callers that need the
//! C-style byte layout use [`InfoValue::copy_into`].

use std::ops::BitOr;

use corvid_backends::DeviceType;

use crate::arena::Handle;
use crate::device::{Device, Platform};
use crate::error::{Error, Result};
use crate::objects::{Context, MemFlags, Program, QueueProperties};

/// Device type filter for device enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTypeMask(pub u64);

impl DeviceTypeMask {
    /// First device of the platform
    pub const DEFAULT: Self = Self(1 << 0);
    pub const CPU: Self = Self(1 << 1);
    pub const GPU: Self = Self(1 << 2);
    pub const ACCELERATOR: Self = Self(1 << 3);
    pub const ALL: Self = Self(0xFFFF_FFFF);

    const KNOWN: u64 = (1 << 4) - 1;

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub(crate) const fn is_valid(self) -> bool {
        self.0 & Self::KNOWN != 0 && (self.0 == Self::ALL.0 || self.0 & !Self::KNOWN == 0)
    }

    pub(crate) fn matches(self, device_type: DeviceType) -> bool {
        if self == Self::ALL {
            return true;
        }
        match device_type {
            DeviceType::Gpu => self.0 & Self::GPU.0 != 0,
            DeviceType::Cpu => self.0 & Self::CPU.0 != 0,
        }
    }

    pub(crate) fn of(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::Gpu => Self::GPU,
            DeviceType::Cpu => Self::CPU,
        }
    }
}

impl BitOr for DeviceTypeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformInfo {
    Profile,
    Version,
    Name,
    Vendor,
    Extensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceInfo {
    Type,
    Name,
    Vendor,
    DriverVersion,
    Version,
    Platform,
    Capability,
    MaxComputeUnits,
    MaxWorkGroupSize,
    MaxWorkItemDimensions,
    MaxWorkItemSizes,
    GlobalMemSize,
    AddressBits,
    Available,
    CompilerAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextInfo {
    Devices,
    NumDevices,
    ReferenceCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramInfo {
    Context,
    NumDevices,
    Devices,
    Source,
    BinarySizes,
    Binaries,
    NumKernels,
    KernelNames,
    ReferenceCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelInfoParam {
    FunctionName,
    NumArgs,
    Program,
    Context,
    /// Work-group counts of the most recent launch, zeros before the first
    WorkGroupCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemInfo {
    Size,
    Flags,
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueInfo {
    Context,
    Device,
    Properties,
}

/// Result of an object query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Str(String),
    Uint(u32),
    Ulong(u64),
    Size(usize),
    Sizes(Vec<usize>),
    Bool(bool),
    DeviceType(DeviceTypeMask),
    MemFlags(MemFlags),
    QueueProperties(QueueProperties),
    Platform(Handle<Platform>),
    Device(Handle<Device>),
    Devices(Vec<Handle<Device>>),
    Context(Handle<Context>),
    Program(Handle<Program>),
    Binaries(Vec<Vec<u8>>),
}

impl InfoValue {
    /// C-style encoding: strings NUL-terminated, integers and handles
    /// little-endian, booleans as 32-bit, binaries concatenated.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            InfoValue::Str(s) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                bytes
            }
            InfoValue::Uint(v) => v.to_le_bytes().to_vec(),
            InfoValue::Ulong(v) => v.to_le_bytes().to_vec(),
            InfoValue::Size(v) => v.to_le_bytes().to_vec(),
            InfoValue::Sizes(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
            InfoValue::Bool(v) => u32::from(*v).to_le_bytes().to_vec(),
            InfoValue::DeviceType(mask) => mask.bits().to_le_bytes().to_vec(),
            InfoValue::MemFlags(flags) => flags.bits().to_le_bytes().to_vec(),
            InfoValue::QueueProperties(props) => props.bits().to_le_bytes().to_vec(),
            InfoValue::Platform(h) => h.to_le_bytes().to_vec(),
            InfoValue::Device(h) => h.to_le_bytes().to_vec(),
            InfoValue::Devices(hs) => hs.iter().flat_map(|h| h.to_le_bytes()).collect(),
            InfoValue::Context(h) => h.to_le_bytes().to_vec(),
            InfoValue::Program(h) => h.to_le_bytes().to_vec(),
            InfoValue::Binaries(bins) => bins.concat(),
        }
    }

    /// Copy the encoded value into `out` and/or report its size.
    ///
    /// A buffer smaller than the value fails with `InvalidValue` and leaves
    /// both outputs untouched.
    pub fn copy_into(&self, out: Option<&mut [u8]>, size_ret: Option<&mut usize>) -> Result<()> {
        let bytes = self.to_bytes();
        if let Some(out) = out {
            if out.len() < bytes.len() {
                return Err(Error::invalid_value(format!(
                    "info buffer of {} bytes is smaller than the {}-byte value",
                    out.len(),
                    bytes.len()
                )));
            }
            out[..bytes.len()].copy_from_slice(&bytes);
        }
        if let Some(size_ret) = size_ret {
            *size_ret = bytes.len();
        }
        Ok(())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Any scalar integer value widened to `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            InfoValue::Uint(v) => Some(u64::from(*v)),
            InfoValue::Ulong(v) => Some(*v),
            InfoValue::Size(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_sizes(&self) -> Option<&[usize]> {
        match self {
            InfoValue::Sizes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_devices(&self) -> Option<&[Handle<Device>]> {
        match self {
            InfoValue::Devices(v) => Some(v),
            _ => None,
        }
    }
}
