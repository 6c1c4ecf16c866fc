//! Migration engine
//!
//! Relocates every live allocation of one device onto another and copies
//! the contents of mirrored module globals. Private allocations are staged
//! through host memory; host-resident allocations are copied straight from
//! their host view. Each device is selected only for the single operation
//! issued to it.
//!
//! Globals are resolved on both devices before any allocation moves, and a
//! source allocation is freed only once its copy is written.

use std::collections::BTreeMap;

use corvid_backends::{AllocationInfo, AllocationKind, BackendError, DevicePtr, ModuleIr};
use corvid_tracing::performance::{record_migration, PerformanceSpan};

use crate::device::Device;
use crate::error::{Error, Result};

/// Source address → destination address of every relocated allocation
pub type MigrationMap = BTreeMap<DevicePtr, DevicePtr>;

/// Move `src`'s allocations to `dst` and copy the globals of `modules`.
pub(crate) fn migrate<'m>(
    src: &mut Device,
    dst: &mut Device,
    modules: impl IntoIterator<Item = &'m ModuleIr>,
) -> Result<MigrationMap> {
    let span = PerformanceSpan::new("migrate", None);
    let globals = mirrored_globals(src, dst, modules)?;
    let mut mapping = MigrationMap::new();
    let mut bytes = 0usize;

    for allocation in src.backend.allocations() {
        let moved = match allocation.kind {
            AllocationKind::Private => {
                let mut staged = vec![0u8; allocation.size];
                src.select().read(allocation.ptr, 0, &mut staged)?;
                let moved = dst.select().allocate(allocation.size)?;
                dst.select().write(moved, 0, &staged)?;
                moved
            }
            AllocationKind::HostResident(flags) => {
                let moved = dst.select().allocate_host(allocation.size, flags)?;
                let view = src
                    .backend
                    .host_view(allocation.ptr)
                    .ok_or(BackendError::InvalidPointer(allocation.ptr))?;
                dst.select().write(moved, 0, view)?;
                moved
            }
            AllocationKind::Global => continue,
        };
        src.select().free(allocation.ptr)?;
        tracing::trace!(from = %allocation.ptr, to = %moved, size = allocation.size, "allocation_migrated");
        bytes += allocation.size;
        mapping.insert(allocation.ptr, moved);
    }

    for (from, to) in &globals {
        let mut temp = vec![0u8; from.size.min(to.size)];
        src.select().read(from.ptr, 0, &mut temp)?;
        dst.select().write(to.ptr, 0, &temp)?;
        bytes += temp.len();
    }

    record_migration(mapping.len(), globals.len(), bytes, span.elapsed_us());
    tracing::info!(
        from = src.name(),
        to = dst.name(),
        relocated = mapping.len(),
        globals = globals.len(),
        "device_migrated"
    );
    Ok(mapping)
}

/// Source and destination storage of every global in `modules`.
fn mirrored_globals<'m>(
    src: &Device,
    dst: &Device,
    modules: impl IntoIterator<Item = &'m ModuleIr>,
) -> Result<Vec<(AllocationInfo, AllocationInfo)>> {
    let mut pairs = Vec::new();
    for module in modules {
        for global in &module.globals {
            let from = src.backend.global_allocation(&module.name, &global.name);
            let to = dst.backend.global_allocation(&module.name, &global.name);
            let (Some(from), Some(to)) = (from, to) else {
                return Err(Error::invalid_value(format!(
                    "global '{}' of module '{}' is not mirrored on both devices",
                    global.name, module.name
                )));
            };
            pairs.push((from, to));
        }
    }
    Ok(pairs)
}
