//! Object registry
//!
//! Owns every live API object. Objects enter through [`Registry::create`],
//! which also appends them to their owning context's list, and are released
//! together when the registry is dropped.

use crate::arena::{Arena, Handle};
use crate::device::{Device, Platform};
use crate::error::{Error, HandleKind, Result};
use crate::objects::{CommandQueue, Context, Kernel, MemoryObject, Program};

/// An object type with a registry container
pub(crate) trait Tracked: Sized {
    const KIND: HandleKind;

    fn arena(registry: &Registry) -> &Arena<Self>;

    fn arena_mut(registry: &mut Registry) -> &mut Arena<Self>;

    /// Context whose list this object is appended to.
    fn owner(&self) -> Option<Handle<Context>> {
        None
    }

    fn attach(_context: &mut Context, _handle: Handle<Self>) {}
}

macro_rules! tracked {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl Tracked for $ty {
            const KIND: HandleKind = HandleKind::$kind;

            fn arena(registry: &Registry) -> &Arena<Self> {
                &registry.$field
            }

            fn arena_mut(registry: &mut Registry) -> &mut Arena<Self> {
                &mut registry.$field
            }
        }
    };
    ($ty:ty, $kind:ident, $field:ident, in_context: $list:ident) => {
        impl Tracked for $ty {
            const KIND: HandleKind = HandleKind::$kind;

            fn arena(registry: &Registry) -> &Arena<Self> {
                &registry.$field
            }

            fn arena_mut(registry: &mut Registry) -> &mut Arena<Self> {
                &mut registry.$field
            }

            fn owner(&self) -> Option<Handle<Context>> {
                Some(self.context)
            }

            fn attach(context: &mut Context, handle: Handle<Self>) {
                context.$list.push(handle);
            }
        }
    };
}

tracked!(Platform, Platform, platforms);
tracked!(Device, Device, devices);
tracked!(Context, Context, contexts);
tracked!(Kernel, Kernel, kernels);
tracked!(Program, Program, programs, in_context: programs);
tracked!(MemoryObject, MemObject, memory, in_context: memory);
tracked!(CommandQueue, CommandQueue, queues, in_context: queues);

/// Handle lookups that fail with the Invalid-Handle error of the object's kind
pub(crate) trait CheckedArena<T> {
    fn checked(&self, handle: Handle<T>) -> Result<&T>;

    fn checked_mut(&mut self, handle: Handle<T>) -> Result<&mut T>;
}

impl<T: Tracked> CheckedArena<T> for Arena<T> {
    fn checked(&self, handle: Handle<T>) -> Result<&T> {
        self.get(handle).ok_or(Error::InvalidHandle(T::KIND))
    }

    fn checked_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        self.get_mut(handle).ok_or(Error::InvalidHandle(T::KIND))
    }
}

/// Global containers for every API object
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) platforms: Arena<Platform>,
    pub(crate) devices: Arena<Device>,
    pub(crate) contexts: Arena<Context>,
    pub(crate) programs: Arena<Program>,
    pub(crate) kernels: Arena<Kernel>,
    pub(crate) memory: Arena<MemoryObject>,
    pub(crate) queues: Arena<CommandQueue>,
}

impl Registry {
    /// Track `object` and return its handle.
    ///
    /// The owning context must already have been validated.
    pub(crate) fn create<T: Tracked>(&mut self, object: T) -> Handle<T> {
        let owner = object.owner();
        let handle = T::arena_mut(self).insert(object);
        if let Some(context) = owner.and_then(|c| self.contexts.get_mut(c)) {
            T::attach(context, handle);
        }
        tracing::debug!(kind = %T::KIND, handle = ?handle, "object_created");
        handle
    }

    pub(crate) fn is_valid<T: Tracked>(&self, handle: Handle<T>) -> bool {
        T::arena(self).contains(handle)
    }

    /// Release every object: devices first (cascading to the back-end),
    /// then contexts, programs, kernels, memory objects and queues.
    pub(crate) fn teardown(&mut self) {
        let devices = self.devices.drain();
        let released = devices.len();
        for mut device in devices {
            device.backend.release();
        }
        self.platforms.drain();
        self.contexts.drain();
        self.programs.drain();
        self.kernels.drain();
        self.memory.drain();
        self.queues.drain();
        if released > 0 {
            tracing::info!(devices = released, "runtime_teardown");
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.teardown();
    }
}
