//! Platforms, devices and scoped device selection

use std::ops::{Deref, DerefMut};

use corvid_backends::{Capability, DeviceType, ExecutionDevice};

use crate::arena::Handle;

/// Back-end grouping of devices. The runtime creates exactly one.
pub struct Platform {
    pub(crate) name: String,
    pub(crate) vendor: String,
    pub(crate) devices: Vec<Handle<Device>>,
}

impl Platform {
    pub(crate) const PROFILE: &'static str = "FULL_PROFILE";
    pub(crate) const VERSION: &'static str = concat!("Corvid 1.2 ", env!("CARGO_PKG_VERSION"));
    pub(crate) const EXTENSIONS: &'static str = "corvid_trace_collectors corvid_device_migration";
}

/// One API device wrapping a back-end [`ExecutionDevice`]
pub struct Device {
    pub(crate) platform: Handle<Platform>,
    pub(crate) device_type: DeviceType,
    pub(crate) capability: Capability,
    pub(crate) backend: Box<dyn ExecutionDevice>,
}

impl Device {
    pub(crate) fn new(platform: Handle<Platform>, backend: Box<dyn ExecutionDevice>) -> Self {
        let properties = backend.properties();
        Self {
            platform,
            device_type: properties.device_type,
            capability: properties.capability,
            backend,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.backend.properties().name
    }

    /// Select the back-end for the lifetime of the returned guard.
    pub(crate) fn select(&mut self) -> SelectedDevice<'_> {
        self.backend.select();
        SelectedDevice { device: self }
    }
}

/// A device bound to the calling thread. Unselects on drop.
///
/// Holding the guard borrows the device mutably, so a second selection of
/// the same device cannot be taken while one is live.
pub(crate) struct SelectedDevice<'a> {
    device: &'a mut Device,
}

impl Deref for SelectedDevice<'_> {
    type Target = dyn ExecutionDevice;

    fn deref(&self) -> &Self::Target {
        self.device.backend.as_ref()
    }
}

impl DerefMut for SelectedDevice<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device.backend.as_mut()
    }
}

impl Drop for SelectedDevice<'_> {
    fn drop(&mut self) {
        self.device.backend.unselect();
    }
}
