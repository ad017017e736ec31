//! Handle-based ownership of GPU-backed objects.
//!
//! A [`ResourceRegistry`] owns heterogeneous resources behind opaque
//! [`ResourceHandle`]s. Consumers keep the handle (or a small `Copy` view of
//! the resource) instead of a reference, and destruction is always explicit:
//! the registry never decides on its own that the GPU is done with
//! something.
//!
//! ```
//! use vkframe_renderer::registry::{GpuResource, ResourceRegistry};
//!
//! struct Scratch(Vec<u8>);
//!
//! impl GpuResource<()> for Scratch {
//!     fn release(&mut self, _ctx: &()) {
//!         self.0.clear();
//!     }
//! }
//!
//! let mut registry = ResourceRegistry::<()>::new();
//! let handle = registry.register(Scratch(vec![0; 16]));
//! assert_eq!(registry.get::<Scratch>(handle).map(|s| s.0.len()), Some(16));
//! assert!(registry.destroy(handle, &()));
//! assert!(!registry.destroy(handle, &()));
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

/// Opaque identifier of a registered resource.
///
/// Handles increase monotonically and are never reused by the registry that
/// issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resource that owns GPU-side allocations.
///
/// `C` is the context needed to free them: the device context in the
/// application, a mock in tests.
pub trait GpuResource<C: ?Sized>: Any {
    /// Frees every GPU allocation the resource owns.
    ///
    /// Called at most once, and only when the caller has ensured the GPU no
    /// longer references the resource.
    fn release(&mut self, ctx: &C);
}

/// Owner of GPU-backed resources of any type.
///
/// Records are keyed by handle in a sorted map, so every traversal runs in
/// registration order. A destroyed record is removed outright; liveness is
/// simply presence in the map.
pub struct ResourceRegistry<C: ?Sized + 'static> {
    records: BTreeMap<ResourceHandle, Box<dyn GpuResource<C>>>,
    next: u64,
}

impl<C: ?Sized + 'static> Default for ResourceRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized + 'static> ResourceRegistry<C> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next: 1,
        }
    }

    /// Takes ownership of `resource` and returns its new handle.
    pub fn register<T: GpuResource<C>>(&mut self, resource: T) -> ResourceHandle {
        let handle = ResourceHandle(self.next);
        self.next += 1;
        self.records.insert(handle, Box::new(resource));
        handle
    }

    /// The resource behind `handle`, if it is live and of type `T`.
    pub fn get<T: GpuResource<C>>(&self, handle: ResourceHandle) -> Option<&T> {
        let any: &dyn Any = self.records.get(&handle)?.as_ref();
        any.downcast_ref::<T>()
    }

    pub fn get_mut<T: GpuResource<C>>(&mut self, handle: ResourceHandle) -> Option<&mut T> {
        let any: &mut dyn Any = self.records.get_mut(&handle)?.as_mut();
        any.downcast_mut::<T>()
    }

    /// Every live resource of type `T`, in registration order.
    pub fn iter<T: GpuResource<C>>(&self) -> impl Iterator<Item = (ResourceHandle, &T)> + '_ {
        self.records.iter().filter_map(|(&handle, resource)| {
            let any: &dyn Any = resource.as_ref();
            any.downcast_ref::<T>().map(|resource| (handle, resource))
        })
    }

    pub fn iter_mut<T: GpuResource<C>>(
        &mut self,
    ) -> impl Iterator<Item = (ResourceHandle, &mut T)> + '_ {
        self.records.iter_mut().filter_map(|(&handle, resource)| {
            let any: &mut dyn Any = resource.as_mut();
            any.downcast_mut::<T>().map(|resource| (handle, resource))
        })
    }

    /// Releases and removes the resource behind `handle`.
    ///
    /// Returns `false` (and does nothing) if the handle is not live.
    pub fn destroy(&mut self, handle: ResourceHandle, ctx: &C) -> bool {
        let Some(mut resource) = self.records.remove(&handle) else {
            return false;
        };
        resource.release(ctx);
        debug!("Destroyed resource {}", handle);
        true
    }

    /// Releases every resource, in registration order.
    pub fn destroy_all(&mut self, ctx: &C) {
        let count = self.records.len();
        for (_, mut resource) in std::mem::take(&mut self.records) {
            resource.release(ctx);
        }
        if count > 0 {
            debug!("Destroyed {} resource(s)", count);
        }
    }

    /// Removes the resource behind `handle` without releasing it.
    ///
    /// Returns `None`, leaving the registry untouched, if the handle is not
    /// live or the resource is not a `T`.
    pub fn take<T: GpuResource<C>>(&mut self, handle: ResourceHandle) -> Option<T> {
        self.get::<T>(handle)?;
        let any: Box<dyn Any> = self.records.remove(&handle)?;
        any.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.records.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live handles in registration order.
    pub fn handles(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.records.keys().copied()
    }
}

impl<C: ?Sized + 'static> fmt::Debug for ResourceRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.records.len())
            .field("next", &self.next)
            .finish()
    }
}
