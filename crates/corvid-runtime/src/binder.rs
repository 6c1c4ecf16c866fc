//! Parameter binder
//!
//! Lays out a kernel's bound arguments into the aligned parameter block a
//! device expects. Each parameter starts at the running total rounded up to
//! its alignment:
//!
//! ```text
//! sizes      [4, 8, 4]
//! alignments [4, 8, 4]
//! offsets    [0, 8, 16]   block size 20
//! ```
//!
//! An 8-byte argument whose value is the handle of a registered memory
//! object is replaced by that object's address on the target device.

use corvid_backends::{KernelSignature, POINTER_SIZE};

use crate::arena::{Arena, Handle};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::objects::{Kernel, MemoryObject};

/// Offsets of each parameter and the total block size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
}

impl ParamLayout {
    /// Layout of parameters given as `(size, alignment)` pairs in declaration order.
    ///
    /// Alignments must be nonzero powers of two.
    pub fn compute(params: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut offsets = Vec::new();
        let mut size = 0usize;
        for (param_size, align) in params {
            let offset = size.next_multiple_of(align.max(1));
            offsets.push(offset);
            size = offset + param_size;
        }
        Self { offsets, size }
    }

    pub fn for_signature(signature: &KernelSignature) -> Self {
        Self::compute(signature.params.iter().map(|p| (p.size(), p.alignment())))
    }
}

/// Assemble the parameter block for `kernel` on `device`.
pub(crate) fn bind(
    kernel: &Kernel,
    signature: &KernelSignature,
    device: Handle<Device>,
    device_name: &str,
    memory: &Arena<MemoryObject>,
) -> Result<Vec<u8>> {
    let declared = signature.params.len();
    let bound = kernel.bound_args();
    if bound != declared {
        return Err(Error::KernelArgs { bound, declared });
    }

    let layout = ParamLayout::for_signature(signature);
    let mut block = Vec::new();
    block.try_reserve_exact(layout.size).map_err(|e| Error::MemAllocation {
        device: "host".to_string(),
        reason: e.to_string(),
    })?;
    block.resize(layout.size, 0);

    for (index, (param, offset)) in signature.params.iter().zip(&layout.offsets).enumerate() {
        let arg = kernel
            .args
            .get(index)
            .and_then(Option::as_deref)
            .ok_or(Error::ArgValue { index })?;
        let slot = &mut block[*offset..*offset + param.size()];

        if let Some(object) = memory_reference(arg, memory) {
            if param.size() != POINTER_SIZE {
                return Err(Error::ArgSize {
                    index,
                    expected: param.size(),
                    actual: POINTER_SIZE,
                });
            }
            let ptr = object.allocation_on(device).ok_or_else(|| Error::MemAllocation {
                device: device_name.to_string(),
                reason: format!("argument {index} has no allocation on this device"),
            })?;
            slot.copy_from_slice(&ptr.to_le_bytes());
            continue;
        }

        if arg.len() != param.size() {
            return Err(Error::ArgSize {
                index,
                expected: param.size(),
                actual: arg.len(),
            });
        }
        slot.copy_from_slice(arg);
    }

    corvid_tracing::perf_event!(
        "parameter_block",
        kernel = kernel.name.as_str(),
        size_bytes = layout.size,
        args = declared
    );
    Ok(block)
}

/// The memory object an argument names, if it is one.
fn memory_reference<'a>(arg: &[u8], memory: &'a Arena<MemoryObject>) -> Option<&'a MemoryObject> {
    let bits: [u8; 8] = arg.try_into().ok()?;
    memory.get(Handle::from_bits(u64::from_le_bytes(bits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::device::Platform;
    use crate::objects::{Context, MemFlags};
    use corvid_backends::{DevicePtr, ModuleIr};
    use proptest::prelude::*;

    const MODULE: &str = r#"{
        "kernels": [{
            "name": "k",
            "params": [
                { "name": "n", "type": { "kind": "scalar", "type": "u32" } },
                { "name": "buf", "type": { "kind": "device_ptr" } },
                { "name": "scale", "type": { "kind": "scalar", "type": "f32" } }
            ]
        }]
    }"#;

    struct Fixture {
        signature: KernelSignature,
        device: Handle<Device>,
        other_device: Handle<Device>,
        memory: Arena<MemoryObject>,
        buffer: Handle<MemoryObject>,
    }

    fn fixture() -> Fixture {
        let module = ModuleIr::parse("m", MODULE).unwrap();
        let mut devices = Arena::<Device>::new();
        let platform = Arena::<Platform>::new().insert(Platform {
            name: "p".into(),
            vendor: "v".into(),
            devices: Vec::new(),
        });
        let device = devices.insert(Device::new(
            platform,
            Box::new(corvid_backends::ReferenceDevice::gpu("a")),
        ));
        let other_device = devices.insert(Device::new(
            platform,
            Box::new(corvid_backends::ReferenceDevice::gpu("b")),
        ));
        let context = Arena::<Context>::new().insert(Context::new(vec![device, other_device]));

        let mut memory = Arena::new();
        let buffer = memory.insert(MemoryObject {
            context,
            size: 64,
            flags: MemFlags::READ_WRITE,
            allocations: vec![(device, DevicePtr::new(0xabc0))],
        });
        Fixture {
            signature: module.kernel("k").unwrap().clone(),
            device,
            other_device,
            memory,
            buffer,
        }
    }

    fn kernel(args: Vec<Option<Vec<u8>>>) -> Kernel {
        Kernel {
            program: Handle::from_bits(0),
            context: Handle::from_bits(0),
            name: "k".into(),
            args,
            geometry: None,
        }
    }

    #[test]
    fn test_layout_example() {
        let layout = ParamLayout::compute([(4, 4), (8, 8), (4, 4)]);
        assert_eq!(layout.offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 20);
    }

    #[test]
    fn test_binds_scalars_and_memory() {
        let f = fixture();
        let k = kernel(vec![
            Some(bytemuck::bytes_of(&7u32).to_vec()),
            Some(f.buffer.to_le_bytes().to_vec()),
            Some(bytemuck::bytes_of(&0.5f32).to_vec()),
        ]);

        let block = bind(&k, &f.signature, f.device, "a", &f.memory).unwrap();
        assert_eq!(block.len(), 20);
        assert_eq!(&block[0..4], bytemuck::bytes_of(&7u32));
        assert_eq!(&block[4..8], &[0; 4]);
        assert_eq!(&block[8..16], &0xabc0u64.to_le_bytes());
        assert_eq!(&block[16..20], bytemuck::bytes_of(&0.5f32));
    }

    #[test]
    fn test_missing_allocation_is_resource_error() {
        let f = fixture();
        let k = kernel(vec![
            Some(vec![0; 4]),
            Some(f.buffer.to_le_bytes().to_vec()),
            Some(vec![0; 4]),
        ]);
        let err = bind(&k, &f.signature, f.other_device, "b", &f.memory).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Resource);
    }

    #[test]
    fn test_memory_handle_in_scalar_slot() {
        let f = fixture();
        let k = kernel(vec![
            Some(f.buffer.to_le_bytes().to_vec()),
            Some(f.buffer.to_le_bytes().to_vec()),
            Some(vec![0; 4]),
        ]);
        let err = bind(&k, &f.signature, f.device, "a", &f.memory).unwrap_err();
        assert!(matches!(err, Error::ArgSize { index: 0, expected: 4, actual: 8 }));
    }

    #[test]
    fn test_scalar_size_mismatch() {
        let f = fixture();
        let k = kernel(vec![Some(vec![0; 2]), Some(vec![0; 8]), Some(vec![0; 4])]);
        let err = bind(&k, &f.signature, f.device, "a", &f.memory).unwrap_err();
        assert!(matches!(err, Error::ArgSize { index: 0, .. }));
    }

    #[test]
    fn test_unbound_argument_count() {
        let f = fixture();
        let k = kernel(vec![Some(vec![0; 4]), None, None]);
        let err = bind(&k, &f.signature, f.device, "a", &f.memory).unwrap_err();
        assert!(matches!(err, Error::KernelArgs { bound: 1, declared: 3 }));
    }

    proptest! {
        #[test]
        fn prop_layout_is_aligned_and_disjoint(
            params in prop::collection::vec((1usize..64, 0u32..5), 0..16),
        ) {
            let params: Vec<(usize, usize)> = params.into_iter().map(|(s, a)| (s, 1usize << a)).collect();
            let layout = ParamLayout::compute(params.iter().copied());

            prop_assert_eq!(layout.offsets.len(), params.len());
            let mut end = 0;
            for (&offset, &(size, align)) in layout.offsets.iter().zip(&params) {
                prop_assert_eq!(offset % align, 0);
                prop_assert!(offset >= end);
                prop_assert!(offset - end < align);
                end = offset + size;
            }
            prop_assert_eq!(layout.size, end);
        }
    }
}
