//! Memory manager for the reference device
//!
//! Allocations are heap vectors keyed by a synthetic device address. Each
//! device draws addresses from its own window so pointers from different
//! devices never collide, which keeps migration mappings unambiguous.

use std::collections::BTreeMap;

use crate::device::{AllocationInfo, AllocationKind, DevicePtr};
use crate::error::{BackendError, Result};

/// Address granularity of the reference device
pub(crate) const ALLOCATION_ALIGNMENT: u64 = 256;

struct Allocation {
    bytes: Vec<u8>,
    kind: AllocationKind,
}

pub(crate) struct MemoryManager {
    /// Live allocations ordered by address, which is also allocation order
    allocations: BTreeMap<u64, Allocation>,
    next_address: u64,
    capacity: u64,
    used: u64,
}

impl MemoryManager {
    pub(crate) fn new(base_address: u64, capacity: u64) -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_address: base_address,
            capacity,
            used: 0,
        }
    }

    pub(crate) fn allocate(&mut self, size: usize, kind: AllocationKind) -> Result<DevicePtr> {
        let available = self.capacity.saturating_sub(self.used);
        if size as u64 > available {
            return Err(BackendError::OutOfMemory {
                requested: size,
                available: available as usize,
            });
        }

        let address = self.next_address;
        let span = (size as u64).max(1).div_ceil(ALLOCATION_ALIGNMENT) * ALLOCATION_ALIGNMENT;
        self.next_address += span;
        self.used += size as u64;
        self.allocations.insert(
            address,
            Allocation {
                bytes: vec![0; size],
                kind,
            },
        );
        Ok(DevicePtr::new(address))
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        let allocation = self
            .allocations
            .remove(&ptr.addr())
            .ok_or(BackendError::InvalidPointer(ptr))?;
        self.used -= allocation.bytes.len() as u64;
        Ok(())
    }

    fn get(&self, ptr: DevicePtr) -> Result<&Allocation> {
        self.allocations.get(&ptr.addr()).ok_or(BackendError::InvalidPointer(ptr))
    }

    fn bounds(ptr: DevicePtr, allocation: &Allocation, offset: usize, len: usize) -> Result<()> {
        let size = allocation.bytes.len();
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(BackendError::OutOfBounds { ptr, offset, len, size });
        }
        Ok(())
    }

    pub(crate) fn write(&mut self, ptr: DevicePtr, offset: usize, data: &[u8]) -> Result<()> {
        let allocation = self
            .allocations
            .get_mut(&ptr.addr())
            .ok_or(BackendError::InvalidPointer(ptr))?;
        Self::bounds(ptr, allocation, offset, data.len())?;
        allocation.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read(&self, ptr: DevicePtr, offset: usize, data: &mut [u8]) -> Result<()> {
        let allocation = self.get(ptr)?;
        Self::bounds(ptr, allocation, offset, data.len())?;
        data.copy_from_slice(&allocation.bytes[offset..offset + data.len()]);
        Ok(())
    }

    pub(crate) fn host_view(&self, ptr: DevicePtr) -> Option<&[u8]> {
        match self.allocations.get(&ptr.addr()) {
            Some(Allocation {
                bytes,
                kind: AllocationKind::HostResident(_),
            }) => Some(bytes),
            _ => None,
        }
    }

    pub(crate) fn info(&self, ptr: DevicePtr) -> Option<AllocationInfo> {
        self.allocations.get(&ptr.addr()).map(|a| AllocationInfo {
            ptr,
            size: a.bytes.len(),
            kind: a.kind,
        })
    }

    /// Private and host-resident allocations, skipping module globals.
    pub(crate) fn non_global(&self) -> Vec<AllocationInfo> {
        self.allocations
            .iter()
            .filter(|(_, a)| a.kind != AllocationKind::Global)
            .map(|(&addr, a)| AllocationInfo {
                ptr: DevicePtr::new(addr),
                size: a.bytes.len(),
                kind: a.kind,
            })
            .collect()
    }

    #[cfg(test)]
    fn used(&self) -> u64 {
        self.used
    }

    pub(crate) fn clear(&mut self) {
        self.allocations.clear();
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostAllocFlags;

    #[test]
    fn test_allocate_and_copy() {
        let mut memory = MemoryManager::new(0x1000, 1 << 20);
        let ptr = memory.allocate(16, AllocationKind::Private).unwrap();
        memory.write(ptr, 4, b"abcd").unwrap();

        let mut out = [0u8; 8];
        memory.read(ptr, 0, &mut out).unwrap();
        assert_eq!(&out, b"\0\0\0\0abcd");
        assert_eq!(memory.used(), 16);
    }

    #[test]
    fn test_addresses_are_aligned_and_distinct() {
        let mut memory = MemoryManager::new(0x1000, 1 << 20);
        let a = memory.allocate(1, AllocationKind::Private).unwrap();
        let b = memory.allocate(300, AllocationKind::Private).unwrap();
        let c = memory.allocate(0, AllocationKind::Private).unwrap();
        assert_eq!(a.addr() % ALLOCATION_ALIGNMENT, 0);
        assert_eq!(b.addr() - a.addr(), ALLOCATION_ALIGNMENT);
        assert_eq!(c.addr() - b.addr(), 2 * ALLOCATION_ALIGNMENT);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut memory = MemoryManager::new(0x1000, 1 << 20);
        let ptr = memory.allocate(4, AllocationKind::Private).unwrap();
        let err = memory.write(ptr, 2, &[0; 4]).unwrap_err();
        assert!(matches!(err, BackendError::OutOfBounds { size: 4, .. }));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut memory = MemoryManager::new(0x1000, 64);
        memory.allocate(48, AllocationKind::Private).unwrap();
        let err = memory.allocate(32, AllocationKind::Private).unwrap_err();
        assert!(matches!(err, BackendError::OutOfMemory { requested: 32, available: 16 }));
    }

    #[test]
    fn test_host_view_only_for_host_memory() {
        let mut memory = MemoryManager::new(0x1000, 1 << 20);
        let private = memory.allocate(4, AllocationKind::Private).unwrap();
        let host = memory
            .allocate(4, AllocationKind::HostResident(HostAllocFlags::MAPPED))
            .unwrap();
        assert!(memory.host_view(private).is_none());
        assert_eq!(memory.host_view(host), Some(&[0u8; 4][..]));
    }

    #[test]
    fn test_free_releases_capacity() {
        let mut memory = MemoryManager::new(0x1000, 1 << 20);
        let ptr = memory.allocate(32, AllocationKind::Global).unwrap();
        assert!(memory.non_global().is_empty());
        memory.free(ptr).unwrap();
        assert_eq!(memory.used(), 0);
        assert!(matches!(memory.free(ptr), Err(BackendError::InvalidPointer(_))));
    }
}
