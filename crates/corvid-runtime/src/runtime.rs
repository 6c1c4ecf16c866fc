//! Runtime facade
//!
//! [`Runtime`] is the thread-safe entry surface. It owns a single lock over
//! all runtime state; every public operation takes it, validates handles
//! against the registry before touching anything, delegates to a private
//! `*_locked` helper on the held state and releases the lock on return.
//!
//! ```text
//! caller ─► Runtime::op ─► lock ─► validate ─► *_locked ─► unlock ─► Result<T>
//! ```
//!
//! ## Example
//!
//! ```rust
//! use corvid_runtime::{DeviceTypeMask, EventWaitList, MemFlags, NdRange, QueueProperties, Runtime};
//!
//! let rt = Runtime::default();
//! let platform = rt.get_platform_ids()?[0];
//! let devices = rt.get_device_ids(platform, DeviceTypeMask::GPU)?;
//! let context = rt.create_context(&devices, None)?;
//! let queue = rt.create_command_queue(context, devices[0], QueueProperties::NONE)?;
//!
//! let program = rt.create_program_with_source(
//!     context,
//!     &[r#"{"kernels":[{"name":"fill","params":[{"type":{"kind":"device_ptr"}}]}]}"#],
//! )?;
//! rt.build_program(program, None, None, None)?;
//! let kernel = rt.create_kernel(program, "fill")?;
//!
//! let buffer = rt.create_buffer(context, MemFlags::READ_WRITE, 1024, None)?;
//! rt.set_kernel_arg(kernel, 0, &buffer.to_le_bytes())?;
//! rt.enqueue_nd_range_kernel(queue, kernel, &NdRange::new(&[256]).with_local(&[64]), &EventWaitList::none())?;
//! # Ok::<(), corvid_runtime::Error>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use corvid_backends::{DevicePtr, ExecutionDevice, HostAllocFlags, OptimizationLevel, TraceCollector};
use corvid_tracing::performance::record_transfer;
use parking_lot::Mutex;

use crate::arena::Handle;
use crate::binder;
use crate::config::RuntimeConfig;
use crate::device::{Device, Platform};
use crate::dispatch::{self, EventWaitList, Geometry, Invocation, NdRange};
use crate::error::{Error, HandleKind, Result};
use crate::info::{
    ContextInfo, DeviceInfo, DeviceTypeMask, InfoValue, KernelInfoParam, MemInfo, PlatformInfo, ProgramInfo,
    QueueInfo,
};
use crate::migration::{self, MigrationMap};
use crate::module_loader::ModuleLoader;
use crate::objects::{
    CommandQueue, Context, DeviceBinary, Kernel, MemFlags, MemoryObject, Persistence, Program, QueueProperties,
};
use crate::registry::{CheckedArena, Registry};

/// Notification callback accepted by context creation and program builds
pub type Notify = Box<dyn Fn(&str) + Send + Sync>;

/// Thread-safe host runtime
pub struct Runtime {
    state: Mutex<RuntimeState>,
    executing: AtomicBool,
}

struct RuntimeState {
    config: RuntimeConfig,
    /// Back-ends supplied by the embedder, consumed at first enumeration
    pending_devices: Option<Vec<Box<dyn ExecutionDevice>>>,
    optimization_level: OptimizationLevel,
    registry: Registry,
    modules: ModuleLoader,
    next_program_module: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// Runtime whose devices are created from `config.devices` on first enumeration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::build(config, None)
    }

    /// Runtime whose platform exposes exactly `devices`, in order.
    pub fn with_devices(config: RuntimeConfig, devices: Vec<Box<dyn ExecutionDevice>>) -> Self {
        Self::build(config, Some(devices))
    }

    fn build(config: RuntimeConfig, pending_devices: Option<Vec<Box<dyn ExecutionDevice>>>) -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                optimization_level: config.optimization_level,
                config,
                pending_devices,
                registry: Registry::default(),
                modules: ModuleLoader::default(),
                next_program_module: 0,
            }),
            executing: AtomicBool::new(false),
        }
    }

    /// Whether a back-end launch is in progress. Does not take the lock.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    // ============================================================================================
    // Platforms and devices
    // ============================================================================================

    pub fn get_platform_ids(&self) -> Result<Vec<Handle<Platform>>> {
        let mut state = self.state.lock();
        Ok(vec![state.enumerate_locked()])
    }

    pub fn get_platform_info(&self, platform: Handle<Platform>, param: PlatformInfo) -> Result<InfoValue> {
        let state = self.state.lock();
        let platform = state.registry.platforms.checked(platform)?;
        Ok(match param {
            PlatformInfo::Profile => InfoValue::Str(Platform::PROFILE.to_string()),
            PlatformInfo::Version => InfoValue::Str(Platform::VERSION.to_string()),
            PlatformInfo::Name => InfoValue::Str(platform.name.clone()),
            PlatformInfo::Vendor => InfoValue::Str(platform.vendor.clone()),
            PlatformInfo::Extensions => InfoValue::Str(Platform::EXTENSIONS.to_string()),
        })
    }

    pub fn get_device_ids(&self, platform: Handle<Platform>, mask: DeviceTypeMask) -> Result<Vec<Handle<Device>>> {
        self.state.lock().get_device_ids_locked(platform, mask)
    }

    pub fn get_device_info(&self, device: Handle<Device>, param: DeviceInfo) -> Result<InfoValue> {
        let state = self.state.lock();
        let device = state.registry.devices.checked(device)?;
        let props = device.backend.properties();
        Ok(match param {
            DeviceInfo::Type => InfoValue::DeviceType(DeviceTypeMask::of(device.device_type)),
            DeviceInfo::Name => InfoValue::Str(props.name.clone()),
            DeviceInfo::Vendor => InfoValue::Str(props.vendor.clone()),
            DeviceInfo::DriverVersion => InfoValue::Str(props.driver_version.clone()),
            DeviceInfo::Version => InfoValue::Str(format!("Corvid {}", device.capability)),
            DeviceInfo::Platform => InfoValue::Platform(device.platform),
            DeviceInfo::Capability => InfoValue::Str(device.capability.to_string()),
            DeviceInfo::MaxComputeUnits => InfoValue::Uint(props.compute_units),
            DeviceInfo::MaxWorkGroupSize => InfoValue::Size(props.max_work_group_size),
            DeviceInfo::MaxWorkItemDimensions => InfoValue::Uint(dispatch::MAX_WORK_DIM),
            DeviceInfo::MaxWorkItemSizes => InfoValue::Sizes(props.max_work_item_sizes.to_vec()),
            DeviceInfo::GlobalMemSize => InfoValue::Ulong(props.global_memory_bytes),
            DeviceInfo::AddressBits => InfoValue::Uint(props.address_bits),
            DeviceInfo::Available | DeviceInfo::CompilerAvailable => InfoValue::Bool(true),
        })
    }

    // ============================================================================================
    // Contexts and queues
    // ============================================================================================

    pub fn create_context(&self, devices: &[Handle<Device>], notify: Option<Notify>) -> Result<Handle<Context>> {
        self.state.lock().create_context_locked(devices, notify)
    }

    pub fn get_context_info(&self, context: Handle<Context>, param: ContextInfo) -> Result<InfoValue> {
        let state = self.state.lock();
        let context = state.registry.contexts.checked(context)?;
        Ok(match param {
            ContextInfo::Devices => InfoValue::Devices(context.devices.clone()),
            ContextInfo::NumDevices => InfoValue::Uint(context.devices.len() as u32),
            ContextInfo::ReferenceCount => InfoValue::Uint(1),
        })
    }

    /// Attach a trace collector to every subsequent launch in `context`, or
    /// to the next one only.
    pub fn add_trace_collector(
        &self,
        context: Handle<Context>,
        collector: Arc<dyn TraceCollector>,
        persistence: Persistence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let context = state.registry.contexts.checked_mut(context)?;
        match persistence {
            Persistence::Persistent => context.persistent_collectors.push(collector),
            Persistence::OneShot => context.oneshot_collectors.push(collector),
        }
        Ok(())
    }

    pub fn clear_trace_collectors(&self, context: Handle<Context>) -> Result<()> {
        let mut state = self.state.lock();
        let context = state.registry.contexts.checked_mut(context)?;
        context.persistent_collectors.clear();
        context.oneshot_collectors.clear();
        Ok(())
    }

    pub fn create_command_queue(
        &self,
        context: Handle<Context>,
        device: Handle<Device>,
        properties: QueueProperties,
    ) -> Result<Handle<CommandQueue>> {
        self.state.lock().create_command_queue_locked(context, device, properties)
    }

    pub fn get_command_queue_info(&self, queue: Handle<CommandQueue>, param: QueueInfo) -> Result<InfoValue> {
        let state = self.state.lock();
        let queue = state.registry.queues.checked(queue)?;
        Ok(match param {
            QueueInfo::Context => InfoValue::Context(queue.context),
            QueueInfo::Device => InfoValue::Device(queue.device),
            QueueInfo::Properties => InfoValue::QueueProperties(queue.properties),
        })
    }

    /// Every enqueue blocks, so there is never outstanding work.
    pub fn finish(&self, queue: Handle<CommandQueue>) -> Result<()> {
        if self.state.lock().registry.is_valid(queue) {
            Ok(())
        } else {
            Err(Error::InvalidHandle(HandleKind::CommandQueue))
        }
    }

    pub fn flush(&self, queue: Handle<CommandQueue>) -> Result<()> {
        self.finish(queue)
    }

    // ============================================================================================
    // Programs and kernels
    // ============================================================================================

    /// Create a program from source fragments, concatenated in order.
    pub fn create_program_with_source(&self, context: Handle<Context>, sources: &[&str]) -> Result<Handle<Program>> {
        let mut state = self.state.lock();
        state.registry.contexts.checked(context)?;
        if sources.iter().all(|s| s.is_empty()) {
            return Err(Error::invalid_value("program source is empty"));
        }
        Ok(state.registry.create(Program {
            context,
            source: sources.concat(),
            binaries: None,
            kernels: Vec::new(),
        }))
    }

    /// Build `program` for `devices`, or for every device of its context.
    ///
    /// Building an already built program succeeds without doing anything.
    #[tracing::instrument(skip(self, notify))]
    pub fn build_program(
        &self,
        program: Handle<Program>,
        devices: Option<&[Handle<Device>]>,
        options: Option<&str>,
        notify: Option<Notify>,
    ) -> Result<()> {
        self.state.lock().build_program_locked(program, devices, options, notify)
    }

    pub fn get_program_info(&self, program: Handle<Program>, param: ProgramInfo) -> Result<InfoValue> {
        self.state.lock().get_program_info_locked(program, param)
    }

    pub fn create_kernel(&self, program: Handle<Program>, name: &str) -> Result<Handle<Kernel>> {
        self.state.lock().create_kernel_locked(program, name)
    }

    /// Bind `value` to parameter `index`, replacing any previous binding.
    ///
    /// Pass a memory object's [`Handle::to_le_bytes`] to reference a buffer.
    pub fn set_kernel_arg(&self, kernel: Handle<Kernel>, index: usize, value: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let kernel = state.registry.kernels.checked_mut(kernel)?;
        if index >= kernel.args.len() {
            return Err(Error::ArgIndex {
                index,
                count: kernel.args.len(),
            });
        }
        if value.is_empty() {
            return Err(Error::ArgValue { index });
        }
        kernel.args[index] = Some(value.to_vec());
        Ok(())
    }

    pub fn get_kernel_info(&self, kernel: Handle<Kernel>, param: KernelInfoParam) -> Result<InfoValue> {
        let state = self.state.lock();
        let kernel = state.registry.kernels.checked(kernel)?;
        Ok(match param {
            KernelInfoParam::FunctionName => InfoValue::Str(kernel.name.clone()),
            KernelInfoParam::NumArgs => InfoValue::Uint(kernel.args.len() as u32),
            KernelInfoParam::Program => InfoValue::Program(kernel.program),
            KernelInfoParam::Context => InfoValue::Context(kernel.context),
            KernelInfoParam::WorkGroupCount => {
                InfoValue::Sizes(kernel.geometry.map_or([0; 3], |g| g.groups).to_vec())
            }
        })
    }

    // ============================================================================================
    // Memory
    // ============================================================================================

    /// Create a buffer of `size` bytes allocated on every device of `context`.
    pub fn create_buffer(
        &self,
        context: Handle<Context>,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<Handle<MemoryObject>> {
        self.state.lock().create_buffer_locked(context, flags, size, host_data)
    }

    pub fn get_mem_object_info(&self, buffer: Handle<MemoryObject>, param: MemInfo) -> Result<InfoValue> {
        let state = self.state.lock();
        let buffer = state.registry.memory.checked(buffer)?;
        Ok(match param {
            MemInfo::Size => InfoValue::Size(buffer.size),
            MemInfo::Flags => InfoValue::MemFlags(buffer.flags),
            MemInfo::Context => InfoValue::Context(buffer.context),
        })
    }

    /// Copy `data` into `buffer` at `offset` on the queue's device.
    pub fn enqueue_write_buffer(
        &self,
        queue: Handle<CommandQueue>,
        buffer: Handle<MemoryObject>,
        blocking: bool,
        offset: usize,
        data: &[u8],
        events: &EventWaitList,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let start = Instant::now();
        let (device, ptr) = state.transfer_target_locked(queue, buffer, blocking, offset, data.len(), events)?;
        state.registry.devices.checked_mut(device)?.select().write(ptr, offset, data)?;
        record_transfer(data.len(), "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Copy `out.len()` bytes of `buffer` starting at `offset` into `out`.
    pub fn enqueue_read_buffer(
        &self,
        queue: Handle<CommandQueue>,
        buffer: Handle<MemoryObject>,
        blocking: bool,
        offset: usize,
        out: &mut [u8],
        events: &EventWaitList,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let start = Instant::now();
        let (device, ptr) = state.transfer_target_locked(queue, buffer, blocking, offset, out.len(), events)?;
        state.registry.devices.checked_mut(device)?.select().read(ptr, offset, out)?;
        record_transfer(out.len(), "D2H", start.elapsed().as_micros() as u64);
        Ok(())
    }

    // ============================================================================================
    // Execution
    // ============================================================================================

    /// Validate, bind and launch `kernel` on the queue's device, blocking
    /// until it completes.
    #[tracing::instrument(skip(self))]
    pub fn enqueue_nd_range_kernel(
        &self,
        queue: Handle<CommandQueue>,
        kernel: Handle<Kernel>,
        range: &NdRange,
        events: &EventWaitList,
    ) -> Result<()> {
        self.state
            .lock()
            .enqueue_nd_range_kernel_locked(queue, kernel, range, events, &self.executing)
    }

    // ============================================================================================
    // Modules, optimization and migration
    // ============================================================================================

    /// Register IR `text` under `name`.
    pub fn register_module(&self, name: &str, text: &str) -> Result<()> {
        self.state.lock().modules.register(name, text)
    }

    /// Unregister `name`, unloading it from every enumerated device.
    pub fn unregister_module(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let RuntimeState { registry, modules, .. } = &mut *state;
        modules.unregister(name, registry.devices.iter_mut().map(|(_, device)| device))
    }

    /// Optimization level applied to modules on their next device binding.
    pub fn set_optimization_level(&self, level: OptimizationLevel) {
        self.state.lock().optimization_level = level;
        tracing::debug!(?level, "optimization_level_set");
    }

    /// Relocate every allocation of `src` onto `dst`.
    ///
    /// Returns the old → new address of each relocated allocation. Memory
    /// objects that lived on `src` are repointed at their `dst` copy; an
    /// object that already had storage on `dst` keeps it and the migrated
    /// copy is released. Nothing moves when a global loaded on `src` has no
    /// counterpart on `dst`.
    #[tracing::instrument(skip(self))]
    pub fn migrate_device(&self, src: Handle<Device>, dst: Handle<Device>) -> Result<MigrationMap> {
        self.state.lock().migrate_device_locked(src, dst)
    }
}

impl RuntimeState {
    fn is_enumerated(&self) -> bool {
        !self.registry.platforms.is_empty()
    }

    /// The platform, creating it and its devices on first use.
    fn enumerate_locked(&mut self) -> Handle<Platform> {
        if let Some(platform) = self.registry.platforms.handles().first() {
            return *platform;
        }

        let backends = match self.pending_devices.take() {
            Some(backends) => backends,
            None => self
                .config
                .devices
                .iter()
                .enumerate()
                .map(|(ordinal, kind)| kind.instantiate(ordinal))
                .collect(),
        };

        let platform = self.registry.create(Platform {
            name: self.config.platform_name.clone(),
            vendor: self.config.platform_vendor.clone(),
            devices: Vec::new(),
        });
        let devices: Vec<_> = backends
            .into_iter()
            .map(|backend| self.registry.create(Device::new(platform, backend)))
            .collect();

        tracing::info!(
            platform = %self.config.platform_name,
            devices = devices.len(),
            "platform_enumerated"
        );
        if let Some(entry) = self.registry.platforms.get_mut(platform) {
            entry.devices = devices;
        }
        platform
    }

    fn get_device_ids_locked(&mut self, platform: Handle<Platform>, mask: DeviceTypeMask) -> Result<Vec<Handle<Device>>> {
        let platform = self.registry.platforms.checked(platform)?;
        if !mask.is_valid() {
            return Err(Error::InvalidDeviceType(mask.bits()));
        }

        let mut selected: Vec<_> = platform
            .devices
            .iter()
            .copied()
            .filter(|d| {
                self.registry
                    .devices
                    .get(*d)
                    .is_some_and(|device| mask.matches(device.device_type))
            })
            .collect();
        if mask.bits() & DeviceTypeMask::DEFAULT.bits() != 0 {
            if let Some(first) = platform.devices.first() {
                if !selected.contains(first) {
                    selected.insert(0, *first);
                }
            }
        }

        if selected.is_empty() {
            return Err(Error::DeviceNotFound(mask.bits()));
        }
        Ok(selected)
    }

    fn create_context_locked(&mut self, devices: &[Handle<Device>], notify: Option<Notify>) -> Result<Handle<Context>> {
        if devices.is_empty() {
            return Err(Error::invalid_value("context needs at least one device"));
        }
        for (index, device) in devices.iter().enumerate() {
            self.registry.devices.checked(*device)?;
            if devices[..index].contains(device) {
                return Err(Error::invalid_value("device listed twice"));
            }
        }
        if notify.is_some() {
            tracing::warn!("context notification callbacks are not supported");
            return Err(Error::Unimplemented("context notification callback"));
        }
        Ok(self.registry.create(Context::new(devices.to_vec())))
    }

    fn create_command_queue_locked(
        &mut self,
        context: Handle<Context>,
        device: Handle<Device>,
        properties: QueueProperties,
    ) -> Result<Handle<CommandQueue>> {
        let ctx = self.registry.contexts.checked(context)?;
        self.registry.devices.checked(device)?;
        if !ctx.has_device(device) {
            return Err(Error::DeviceNotInContext);
        }
        if properties.has_unknown_bits() {
            return Err(Error::invalid_value(format!("unknown queue properties {properties:?}")));
        }
        if properties.contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE) {
            tracing::warn!("out-of-order queues are not supported");
            return Err(Error::Unimplemented("out-of-order execution"));
        }
        if properties.contains(QueueProperties::PROFILING_ENABLE) {
            tracing::warn!("queue profiling is not supported");
            return Err(Error::Unimplemented("queue profiling"));
        }

        let stream = self
            .registry
            .devices
            .checked_mut(device)?
            .select()
            .create_stream()
            .map_err(|e| Error::StreamCreation(e.to_string()))?;
        Ok(self.registry.create(CommandQueue {
            context,
            device,
            properties,
            stream,
        }))
    }

    fn build_program_locked(
        &mut self,
        program: Handle<Program>,
        devices: Option<&[Handle<Device>]>,
        options: Option<&str>,
        notify: Option<Notify>,
    ) -> Result<()> {
        let prog = self.registry.programs.checked(program)?;
        let ctx = self.registry.contexts.checked(prog.context)?;

        let targets = match devices {
            Some([]) => return Err(Error::invalid_value("empty device list")),
            Some(list) => {
                for device in list {
                    self.registry.devices.checked(*device)?;
                    if !ctx.has_device(*device) {
                        return Err(Error::DeviceNotInContext);
                    }
                }
                list.to_vec()
            }
            None => ctx.devices.clone(),
        };
        if options.is_some_and(|o| !o.trim().is_empty()) {
            tracing::warn!(?options, "build options are not supported");
            return Err(Error::Unimplemented("build options"));
        }
        if notify.is_some() {
            tracing::warn!("build notification callbacks are not supported");
            return Err(Error::Unimplemented("build notification callback"));
        }
        if prog.is_built() {
            tracing::debug!(?program, "program_already_built");
            return Ok(());
        }

        let source = prog.source.clone();
        let module = format!("program{}", self.next_program_module);
        self.next_program_module += 1;
        self.modules.register(&module, &source)?;

        for device in &targets {
            let target = self.registry.devices.checked_mut(*device)?;
            if let Err(e) = self.modules.bind(&module, *device, target, self.optimization_level) {
                let devices = self.registry.devices.iter_mut().map(|(_, d)| d);
                if let Err(rollback) = self.modules.unregister(&module, devices) {
                    tracing::warn!(error = %rollback, module = %module, "failed to roll back partial build");
                }
                return Err(e);
            }
        }

        let binaries = targets
            .iter()
            .map(|device| DeviceBinary {
                device: *device,
                module: module.clone(),
                binary: source.as_bytes().to_vec(),
            })
            .collect();
        self.registry.programs.checked_mut(program)?.binaries = Some(binaries);
        tracing::info!(?program, module = %module, devices = targets.len(), "program_built");
        Ok(())
    }

    fn get_program_info_locked(&self, program: Handle<Program>, param: ProgramInfo) -> Result<InfoValue> {
        let prog = self.registry.programs.checked(program)?;
        let ctx = self.registry.contexts.checked(prog.context)?;
        let binary_for = |device: &Handle<Device>| {
            prog.binaries
                .as_deref()
                .and_then(|bins| bins.iter().find(|b| b.device == *device))
                .map(|b| b.binary.as_slice())
                .unwrap_or_default()
        };

        Ok(match param {
            ProgramInfo::Context => InfoValue::Context(prog.context),
            ProgramInfo::NumDevices => InfoValue::Uint(ctx.devices.len() as u32),
            ProgramInfo::Devices => InfoValue::Devices(ctx.devices.clone()),
            ProgramInfo::Source => InfoValue::Str(prog.source.clone()),
            ProgramInfo::BinarySizes => InfoValue::Sizes(ctx.devices.iter().map(|d| binary_for(d).len()).collect()),
            ProgramInfo::Binaries => InfoValue::Binaries(ctx.devices.iter().map(|d| binary_for(d).to_vec()).collect()),
            ProgramInfo::NumKernels => InfoValue::Size(self.program_module(prog)?.kernels.len()),
            ProgramInfo::KernelNames => {
                let names: Vec<_> = self
                    .program_module(prog)?
                    .kernels
                    .iter()
                    .map(|k| k.name.as_str())
                    .collect();
                InfoValue::Str(names.join(";"))
            }
            ProgramInfo::ReferenceCount => InfoValue::Uint(1),
        })
    }

    /// Parsed module of a built program.
    fn program_module(&self, program: &Program) -> Result<&corvid_backends::ModuleIr> {
        let binaries = program.binaries.as_deref().ok_or(Error::ProgramNotBuilt)?;
        let module = binaries.first().ok_or(Error::ProgramNotBuilt)?;
        self.modules
            .get(&module.module)
            .map(|m| &m.ir)
            .ok_or(Error::ProgramNotBuilt)
    }

    fn create_kernel_locked(&mut self, program: Handle<Program>, name: &str) -> Result<Handle<Kernel>> {
        let prog = self.registry.programs.checked(program)?;
        let context = prog.context;
        let params = self
            .program_module(prog)?
            .kernel(name)
            .ok_or_else(|| Error::KernelNotFound(name.to_string()))?
            .params
            .len();

        let kernel = self.registry.create(Kernel {
            program,
            context,
            name: name.to_string(),
            args: vec![None; params],
            geometry: None,
        });
        self.registry.programs.checked_mut(program)?.kernels.push(kernel);
        Ok(kernel)
    }

    fn create_buffer_locked(
        &mut self,
        context: Handle<Context>,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<Handle<MemoryObject>> {
        let devices = self.registry.contexts.checked(context)?.devices.clone();
        if flags.has_unknown_bits() {
            return Err(Error::invalid_value(format!("unknown memory flags {flags:?}")));
        }
        if flags.access_qualifiers() > 1 {
            return Err(Error::invalid_value("conflicting access flags"));
        }
        if flags.contains(MemFlags::USE_HOST_PTR) {
            tracing::warn!("USE_HOST_PTR buffers are not supported");
            return Err(Error::Unimplemented("USE_HOST_PTR"));
        }
        if size == 0 {
            return Err(Error::InvalidBufferSize(size));
        }
        let copy = flags.contains(MemFlags::COPY_HOST_PTR);
        let initial = match (copy, host_data) {
            (true, None) => return Err(Error::InvalidHostPtr("COPY_HOST_PTR without host data".into())),
            (false, Some(_)) => return Err(Error::InvalidHostPtr("host data without COPY_HOST_PTR".into())),
            (true, Some(data)) if data.len() < size => {
                return Err(Error::InvalidHostPtr(format!(
                    "{} bytes of host data for a {size}-byte buffer",
                    data.len()
                )))
            }
            (true, Some(data)) => Some(&data[..size]),
            (false, None) => None,
        };
        let host_resident = flags.contains(MemFlags::ALLOC_HOST_PTR);

        let mut allocations: Vec<(Handle<Device>, DevicePtr)> = Vec::with_capacity(devices.len());
        for handle in devices {
            let device = self.registry.devices.checked_mut(handle)?;
            match allocate_buffer(device, size, host_resident, initial) {
                Ok(ptr) => allocations.push((handle, ptr)),
                Err(e) => {
                    let failure = Error::MemAllocation {
                        device: device.name().to_string(),
                        reason: e.to_string(),
                    };
                    for (handle, ptr) in allocations {
                        if let Some(device) = self.registry.devices.get_mut(handle) {
                            if let Err(e) = device.select().free(ptr) {
                                tracing::warn!(error = %e, "failed to release partial buffer");
                            }
                        }
                    }
                    return Err(failure);
                }
            }
        }

        Ok(self.registry.create(MemoryObject {
            context,
            size,
            flags,
            allocations,
        }))
    }

    /// Validate a buffer transfer and return the queue's device and the
    /// buffer's address there.
    fn transfer_target_locked(
        &self,
        queue: Handle<CommandQueue>,
        buffer: Handle<MemoryObject>,
        blocking: bool,
        offset: usize,
        len: usize,
        events: &EventWaitList,
    ) -> Result<(Handle<Device>, DevicePtr)> {
        let queue = self.registry.queues.checked(queue)?;
        let buffer = self.registry.memory.checked(buffer)?;
        if buffer.context != queue.context {
            return Err(Error::ContextMismatch(HandleKind::MemObject));
        }
        if offset.checked_add(len).is_none_or(|end| end > buffer.size) {
            return Err(Error::invalid_value(format!(
                "range {offset}+{len} exceeds buffer size {}",
                buffer.size
            )));
        }
        events.check()?;
        if !blocking {
            return Err(Error::Unimplemented("non-blocking transfers"));
        }

        let device = self.registry.devices.checked(queue.device)?;
        let ptr = buffer.allocation_on(queue.device).ok_or_else(|| Error::MemAllocation {
            device: device.name().to_string(),
            reason: "buffer has no allocation on the queue's device".to_string(),
        })?;
        Ok((queue.device, ptr))
    }

    fn enqueue_nd_range_kernel_locked(
        &mut self,
        queue: Handle<CommandQueue>,
        kernel: Handle<Kernel>,
        range: &NdRange,
        events: &EventWaitList,
        executing: &AtomicBool,
    ) -> Result<()> {
        let (context, device, stream) = {
            let queue = self.registry.queues.checked(queue)?;
            (queue.context, queue.device, queue.stream)
        };
        let (program, declared) = {
            let kernel = self.registry.kernels.checked(kernel)?;
            if kernel.context != context {
                return Err(Error::ContextMismatch(HandleKind::Kernel));
            }
            if kernel.bound_args() == 0 {
                return Err(Error::KernelArgs {
                    bound: 0,
                    declared: kernel.args.len(),
                });
            }
            (kernel.program, kernel.args.len())
        };
        let geometry = Geometry::from_range(range)?;
        events.check()?;

        self.registry.kernels.checked_mut(kernel)?.geometry = Some(geometry);

        let module = self
            .registry
            .programs
            .checked(program)?
            .module_for(device)
            .ok_or(Error::ProgramNotBuilt)?
            .to_string();
        let ir = &self.modules.get(&module).ok_or(Error::ProgramNotBuilt)?.ir;
        let kernel_ref = self.registry.kernels.checked(kernel)?;
        let signature = ir
            .kernel(&kernel_ref.name)
            .ok_or_else(|| Error::KernelNotFound(kernel_ref.name.clone()))?;
        let device_name = self.registry.devices.checked(device)?.name().to_string();
        let parameters = binder::bind(kernel_ref, signature, device, &device_name, &self.registry.memory)?;
        tracing::debug!(kernel = %kernel_ref.name, declared, bytes = parameters.len(), "parameters_bound");

        let invocation = Invocation {
            module,
            kernel: kernel_ref.name.clone(),
            stream,
            geometry,
            parameters,
            collectors: self.registry.contexts.checked_mut(context)?.take_launch_collectors(),
        };
        let target = self.registry.devices.checked_mut(device)?;
        dispatch::dispatch(target, &invocation, executing, &self.config.diagnostic_prefix)
    }

    fn migrate_device_locked(&mut self, src: Handle<Device>, dst: Handle<Device>) -> Result<MigrationMap> {
        if !self.is_enumerated() {
            return Ok(MigrationMap::new());
        }
        self.registry.devices.checked(src)?;
        self.registry.devices.checked(dst)?;
        if src == dst {
            return Err(Error::invalid_value("cannot migrate a device onto itself"));
        }

        let modules: Vec<_> = self.modules.loaded_on(src).collect();
        let (from, to) = self
            .registry
            .devices
            .get_pair_mut(src, dst)
            .ok_or(Error::InvalidHandle(HandleKind::Device))?;
        let mapping = migration::migrate(from, to, modules)?;
        self.remap_memory_objects(src, dst, &mapping);
        Ok(mapping)
    }

    /// Point memory objects at the allocations `mapping` moved from `src` to `dst`.
    fn remap_memory_objects(&mut self, src: Handle<Device>, dst: Handle<Device>, mapping: &MigrationMap) {
        let mut redundant = Vec::new();
        for (_, object) in self.registry.memory.iter_mut() {
            let Some(index) = object.allocations.iter().position(|(device, _)| *device == src) else {
                continue;
            };
            let (_, old) = object.allocations.remove(index);
            let Some(&moved) = mapping.get(&old) else {
                continue;
            };
            if object.allocation_on(dst).is_some() {
                redundant.push(moved);
            } else {
                object.allocations.push((dst, moved));
            }
        }

        if redundant.is_empty() {
            return;
        }
        tracing::debug!(count = redundant.len(), "releasing migrated copies already present on target");
        if let Some(device) = self.registry.devices.get_mut(dst) {
            let mut selected = device.select();
            for ptr in redundant {
                if let Err(error) = selected.free(ptr) {
                    tracing::warn!(%error, %ptr, "failed to release migrated copy");
                }
            }
        }
    }
}

/// Allocate one buffer on `device`, copying `initial` into it when given.
fn allocate_buffer(
    device: &mut Device,
    size: usize,
    host_resident: bool,
    initial: Option<&[u8]>,
) -> corvid_backends::Result<DevicePtr> {
    let mut selected = device.select();
    let ptr = if host_resident {
        selected.allocate_host(size, HostAllocFlags::MAPPED)?
    } else {
        selected.allocate(size)?
    };
    if let Some(data) = initial {
        if let Err(e) = selected.write(ptr, 0, data) {
            if let Err(cleanup) = selected.free(ptr) {
                tracing::warn!(error = %cleanup, %ptr, "failed to release buffer after initial write failed");
            }
            return Err(e);
        }
    }
    Ok(ptr)
}
