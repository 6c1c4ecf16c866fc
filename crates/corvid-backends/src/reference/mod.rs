//! Reference execution device
//!
//! An in-memory device that honours the whole [`ExecutionDevice`] contract
//! (memory, module loading, global mirroring, streams, selection discipline,
//! trace delivery) without executing kernel bodies. It is what the runtime
//! enumerates by default and what the test suites run against.
//!
//! A [`ReferenceProbe`] stays with the caller after the device is boxed and
//! handed to the runtime. It observes what the runtime asked the device to do
//! and can inject faults.
//!
//! ```rust
//! use corvid_backends::{ExecutionDevice, ReferenceDevice};
//!
//! let mut device = ReferenceDevice::gpu("emulated-gpu");
//! let probe = device.probe();
//!
//! device.select();
//! let ptr = device.allocate(64).unwrap();
//! device.write(ptr, 0, &[7; 64]).unwrap();
//! device.unselect();
//!
//! assert_eq!(probe.selects(), 1);
//! ```

mod memory;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{
    AllocationInfo, AllocationKind, DevicePtr, DeviceProperties, ExecutionDevice, HostAllocFlags, LaunchDescriptor,
    OptimizationLevel, StreamId,
};
use crate::error::{BackendError, Result};
use crate::ir::ModuleIr;
use crate::trace::{LaunchSummary, ProfileRecord, TraceEvent};
use memory::MemoryManager;

/// Default memory of a reference device
pub const DEFAULT_MEMORY_BYTES: u64 = 256 << 20;

/// Each device draws addresses from its own 4 GiB window.
static NEXT_DEVICE_WINDOW: AtomicU64 = AtomicU64::new(1);

/// A launch as the device received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub module: String,
    pub kernel: String,
    pub stream: StreamId,
    pub work_groups: [u32; 3],
    pub local_size: [u32; 3],
    pub parameters: Vec<u8>,
    pub collectors: usize,
}

#[derive(Default)]
struct ProbeState {
    selects: u64,
    unselects: u64,
    nesting_violations: u64,
    unselected_accesses: u64,
    loads: Vec<String>,
    unloads: Vec<String>,
    launches: Vec<LaunchRecord>,
    optimization: Option<OptimizationLevel>,
    streams: u32,
    released: bool,
    fail_next_launch: Option<String>,
    fail_allocations: bool,
    fail_streams: bool,
}

/// Observer and fault injector shared with a [`ReferenceDevice`]
#[derive(Clone, Default)]
pub struct ReferenceProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ReferenceProbe {
    pub fn selects(&self) -> u64 {
        self.state.lock().selects
    }

    pub fn unselects(&self) -> u64 {
        self.state.lock().unselects
    }

    /// `select` calls made while the device was already selected
    pub fn nesting_violations(&self) -> u64 {
        self.state.lock().nesting_violations
    }

    /// Operations attempted while the device was not selected
    pub fn unselected_accesses(&self) -> u64 {
        self.state.lock().unselected_accesses
    }

    pub fn loads(&self) -> Vec<String> {
        self.state.lock().loads.clone()
    }

    pub fn unloads(&self) -> Vec<String> {
        self.state.lock().unloads.clone()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn optimization_level(&self) -> Option<OptimizationLevel> {
        self.state.lock().optimization
    }

    pub fn streams_created(&self) -> u32 {
        self.state.lock().streams
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Make the next launch fail with an execution fault carrying `message`.
    pub fn fail_next_launch(&self, message: impl Into<String>) {
        self.state.lock().fail_next_launch = Some(message.into());
    }

    /// Make every allocation fail while `fail` is set.
    pub fn fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }

    /// Make stream creation fail while `fail` is set.
    pub fn fail_stream_creation(&self, fail: bool) {
        self.state.lock().fail_streams = fail;
    }
}

struct LoadedModule {
    ir: ModuleIr,
    globals: HashMap<String, DevicePtr>,
}

/// In-memory execution device
pub struct ReferenceDevice {
    properties: DeviceProperties,
    selected: bool,
    memory: MemoryManager,
    modules: HashMap<String, LoadedModule>,
    probe: ReferenceProbe,
}

impl ReferenceDevice {
    pub fn new(properties: DeviceProperties) -> Self {
        let window = NEXT_DEVICE_WINDOW.fetch_add(1, Ordering::Relaxed);
        let capacity = properties.global_memory_bytes;
        Self {
            properties,
            selected: false,
            memory: MemoryManager::new(window << 32, capacity),
            modules: HashMap::new(),
            probe: ReferenceProbe::default(),
        }
    }

    /// Accelerator-class reference device
    pub fn gpu(name: impl Into<String>) -> Self {
        Self::new(DeviceProperties::gpu(name, DEFAULT_MEMORY_BYTES))
    }

    /// Host-CPU-class reference device
    pub fn cpu(name: impl Into<String>) -> Self {
        Self::new(DeviceProperties::cpu(name, DEFAULT_MEMORY_BYTES))
    }

    pub fn probe(&self) -> ReferenceProbe {
        self.probe.clone()
    }

    fn ensure_selected(&self) -> Result<()> {
        if self.selected {
            Ok(())
        } else {
            self.probe.state.lock().unselected_accesses += 1;
            Err(BackendError::NotSelected(self.properties.name.clone()))
        }
    }

    fn allocate_kind(&mut self, size: usize, kind: AllocationKind) -> Result<DevicePtr> {
        self.ensure_selected()?;
        if self.probe.state.lock().fail_allocations {
            return Err(BackendError::OutOfMemory {
                requested: size,
                available: 0,
            });
        }
        self.memory.allocate(size, kind)
    }
}

impl ExecutionDevice for ReferenceDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn select(&mut self) {
        let mut state = self.probe.state.lock();
        if self.selected {
            state.nesting_violations += 1;
        }
        state.selects += 1;
        self.selected = true;
    }

    fn unselect(&mut self) {
        self.probe.state.lock().unselects += 1;
        self.selected = false;
    }

    fn is_selected(&self) -> bool {
        self.selected
    }

    fn load_module(&mut self, module: &ModuleIr) -> Result<()> {
        self.ensure_selected()?;
        if self.modules.contains_key(&module.name) {
            return Ok(());
        }

        let mut globals = HashMap::new();
        for global in &module.globals {
            let ptr = self.allocate_kind(global.size, AllocationKind::Global)?;
            if let Some(init) = &global.init {
                self.memory.write(ptr, 0, init)?;
            }
            globals.insert(global.name.clone(), ptr);
        }

        tracing::debug!(device = %self.properties.name, module = %module.name, globals = globals.len(), "module_loaded");
        self.modules.insert(
            module.name.clone(),
            LoadedModule {
                ir: module.clone(),
                globals,
            },
        );
        self.probe.state.lock().loads.push(module.name.clone());
        Ok(())
    }

    fn unload_module(&mut self, name: &str) -> Result<()> {
        self.ensure_selected()?;
        if let Some(module) = self.modules.remove(name) {
            for ptr in module.globals.values() {
                self.memory.free(*ptr)?;
            }
        }
        self.probe.state.lock().unloads.push(name.to_string());
        Ok(())
    }

    fn set_optimization_level(&mut self, level: OptimizationLevel) {
        self.probe.state.lock().optimization = Some(level);
    }

    fn allocate(&mut self, size: usize) -> Result<DevicePtr> {
        self.allocate_kind(size, AllocationKind::Private)
    }

    fn allocate_host(&mut self, size: usize, flags: HostAllocFlags) -> Result<DevicePtr> {
        self.allocate_kind(size, AllocationKind::HostResident(flags))
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        self.ensure_selected()?;
        self.memory.free(ptr)
    }

    fn write(&mut self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        self.ensure_selected()?;
        self.memory.write(ptr, offset, data)
    }

    fn read(&self, ptr: DevicePtr, offset: usize, data: &mut [u8]) -> Result<()> {
        self.ensure_selected()?;
        self.memory.read(ptr, offset, data)
    }

    fn host_view(&self, ptr: DevicePtr) -> Option<&[u8]> {
        self.memory.host_view(ptr)
    }

    fn allocations(&self) -> Vec<AllocationInfo> {
        self.memory.non_global()
    }

    fn global_allocation(&self, module: &str, symbol: &str) -> Option<AllocationInfo> {
        let ptr = self.modules.get(module)?.globals.get(symbol)?;
        self.memory.info(*ptr)
    }

    fn create_stream(&mut self) -> Result<StreamId> {
        self.ensure_selected()?;
        let mut state = self.probe.state.lock();
        if state.fail_streams {
            return Err(BackendError::StreamCreation(format!(
                "stream limit reached on '{}'",
                self.properties.name
            )));
        }
        state.streams += 1;
        Ok(StreamId(state.streams))
    }

    fn launch(&mut self, launch: &LaunchDescriptor<'_>) -> Result<()> {
        self.ensure_selected()?;
        let _span = corvid_tracing::perf_span!("reference_launch", kernel = launch.kernel);
        let module = self
            .modules
            .get(launch.module)
            .ok_or_else(|| BackendError::ModuleNotLoaded(launch.module.to_string()))?;
        if module.ir.kernel(launch.kernel).is_none() {
            return Err(BackendError::KernelNotFound {
                module: launch.module.to_string(),
                kernel: launch.kernel.to_string(),
            });
        }

        let summary = LaunchSummary {
            device: self.properties.name.clone(),
            module: launch.module.to_string(),
            kernel: launch.kernel.to_string(),
            work_groups: launch.work_groups,
            local_size: launch.local_size,
        };
        for collector in launch.collectors {
            collector.initialize(&summary);
            collector.event(&TraceEvent::LaunchBegin(summary.clone()));
        }

        let fault = self.probe.state.lock().fail_next_launch.take();
        for collector in launch.collectors {
            if fault.is_none() {
                collector.event(&TraceEvent::Profile(ProfileRecord::InstructionCount {
                    instructions: summary.work_items(),
                }));
            }
            collector.event(&TraceEvent::LaunchEnd {
                kernel: summary.kernel.clone(),
                succeeded: fault.is_none(),
            });
            collector.finish();
        }

        if let Some(message) = fault {
            return Err(BackendError::Execution(message));
        }

        self.probe.state.lock().launches.push(LaunchRecord {
            module: summary.module,
            kernel: summary.kernel,
            stream: launch.stream,
            work_groups: launch.work_groups,
            local_size: launch.local_size,
            parameters: launch.parameters.to_vec(),
            collectors: launch.collectors.len(),
        });
        Ok(())
    }

    fn release(&mut self) {
        self.modules.clear();
        self.memory.clear();
        self.selected = false;
        self.probe.state.lock().released = true;
    }
}
