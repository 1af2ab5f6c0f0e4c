//! Resource registry: stable handles to resources, generation
//! counters, identifier interning, and the access-control view used by pass
//! builders.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::vec::Vec;

use rg_core::{Error, Result, ResourceIdentifier};

/// A resource's stable 64-bit global id.
pub type ResourceId = u64;

fn next_resource_id() -> ResourceId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// An abstract resource entity: mip/slice extent, optional byte size, and
/// whether it carries a texture layout.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub mip_count: u32,
    pub slice_count: u32,
    /// Byte size for buffer-like resources; `None` for opaque textures whose
    /// footprint is computed by the backing allocator.
    pub byte_size: Option<u64>,
    pub has_layout: bool,
    /// Bumped every time the resource is (re)materialized.
    pub generation: u32,
    /// Whether this resource opts into the aliasing planner.
    pub allow_alias: bool,
}

impl Resource {
    pub fn new_texture(mip_count: u32, slice_count: u32) -> Self {
        Self {
            id: next_resource_id(),
            mip_count: mip_count.max(1),
            slice_count: slice_count.max(1),
            byte_size: None,
            has_layout: true,
            generation: 0,
            allow_alias: false,
        }
    }

    pub fn new_buffer(byte_size: u64) -> Self {
        Self {
            id: next_resource_id(),
            mip_count: 1,
            slice_count: 1,
            byte_size: Some(byte_size),
            has_layout: false,
            generation: 0,
            allow_alias: false,
        }
    }

    pub fn with_alias(mut self, allow: bool) -> Self {
        self.allow_alias = allow;
        self
    }
}

/// Stable opaque handle to a registry slot.
///
/// `(slot_index, slot_generation, epoch)` identify the slot; `global_id`,
/// `num_mips`, `num_slices` are cached from the resource at bind time so a
/// handle can answer extent queries without a registry round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHandle {
    pub slot_index: u32,
    pub slot_generation: u32,
    pub epoch: u32,
    pub global_id: ResourceId,
    pub num_mips: u32,
    pub num_slices: u32,
}

impl ResourceHandle {
    /// A handle with `slot_generation == 0` is unconditionally invalid.
    pub const INVALID: Self = Self {
        slot_index: u32::MAX,
        slot_generation: 0,
        epoch: 0,
        global_id: 0,
        num_mips: 0,
        num_slices: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.slot_generation != 0
    }
}

struct Slot {
    resource: Option<Resource>,
    generation: u32,
    identifier: Option<ResourceIdentifier>,
    alive: bool,
}

/// A resolver lazily returns resources for a namespace identifier; kept as a
/// trait object so callers can capture arbitrary closures/state.
pub trait Resolver: Send + Sync {
    fn resolve(&self) -> Vec<Resource>;
}

impl<F: Fn() -> Vec<Resource> + Send + Sync> Resolver for F {
    fn resolve(&self) -> Vec<Resource> {
        (self)()
    }
}

/// Slot table of `(resource, generation, identifier, alive)` plus a free list
/// and identifier-interning map.
pub struct ResourceRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    by_identifier: BTreeMap<ResourceIdentifier, u32>,
    resolvers: BTreeMap<ResourceIdentifier, std::sync::Arc<dyn Resolver>>,
    /// Bumped on registry reset; lets views detect cross-reset use.
    epoch: u32,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            by_identifier: BTreeMap::new(),
            resolvers: BTreeMap::new(),
            epoch: 0,
        }
    }

    fn allocate_slot(&mut self) -> u32 {
        if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                resource: None,
                generation: 0,
                identifier: None,
                alive: false,
            });
            index
        }
    }

    /// Idempotently allocate a slot for `id` without binding a resource yet.
    pub fn intern_key(&mut self, id: &ResourceIdentifier) -> u32 {
        if let Some(&index) = self.by_identifier.get(id) {
            return index;
        }
        let index = self.allocate_slot();
        self.slots[index as usize].identifier = Some(id.clone());
        self.by_identifier.insert(id.clone(), index);
        index
    }

    /// Bind `id`'s slot to `resource`. Generation increments, invalidating
    /// every prior handle bound to `id`.
    pub fn register_or_update(&mut self, id: &ResourceIdentifier, resource: Resource) -> ResourceHandle {
        let index = self.intern_key(id);
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.resource = Some(resource);
        slot.alive = true;
        self.handle_for_slot(index)
    }

    /// Allocate a slot for `resource` with no identifier.
    pub fn register_anonymous(&mut self, resource: Resource) -> ResourceHandle {
        let index = self.allocate_slot();
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.resource = Some(resource);
        slot.alive = true;
        slot.identifier = None;
        self.handle_for_slot(index)
    }

    /// Register a resolver under `id`, keyed by identifier like any other
    /// slot's binding.
    pub fn register_resolver(&mut self, id: &ResourceIdentifier, resolver: impl Resolver + 'static) {
        self.resolvers
            .insert(id.clone(), std::sync::Arc::new(resolver));
    }

    pub fn resolver_for(&self, id: &ResourceIdentifier) -> Option<std::sync::Arc<dyn Resolver>> {
        self.resolvers.get(id).cloned()
    }

    fn handle_for_slot(&self, index: u32) -> ResourceHandle {
        let slot = &self.slots[index as usize];
        let resource = slot.resource.as_ref().expect("slot just bound");
        ResourceHandle {
            slot_index: index,
            slot_generation: slot.generation,
            epoch: self.epoch,
            global_id: resource.id,
            num_mips: resource.mip_count,
            num_slices: resource.slice_count,
        }
    }

    /// The current valid handle for `id`, or [`ResourceHandle::INVALID`] if
    /// never bound.
    pub fn make_handle(&self, id: &ResourceIdentifier) -> ResourceHandle {
        self.by_identifier
            .get(id)
            .map(|&index| self.handle_for_slot(index))
            .unwrap_or(ResourceHandle::INVALID)
    }

    /// Resolve a handle to its resource. `None` if stale, unknown, or the
    /// epoch moved on since the handle was minted.
    pub fn resolve(&self, handle: ResourceHandle) -> Option<&Resource> {
        if handle.epoch != self.epoch {
            return None;
        }
        let slot = self.slots.get(handle.slot_index as usize)?;
        if !slot.alive || slot.generation != handle.slot_generation {
            return None;
        }
        slot.resource.as_ref()
    }

    /// Retire a slot: resource dropped, generation bumped so outstanding
    /// handles go stale.
    pub fn unregister(&mut self, handle: ResourceHandle) {
        if let Some(slot) = self.slots.get_mut(handle.slot_index as usize) {
            if slot.generation == handle.slot_generation {
                slot.resource = None;
                slot.alive = false;
                slot.generation = slot.generation.wrapping_add(1).max(1);
                self.free_list.push(handle.slot_index);
            }
        }
    }

    /// Reset the whole registry, bumping the epoch so every outstanding
    /// handle and view becomes unresolvable.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.by_identifier.clear();
        self.resolvers.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps the registry with a set of allowed identifier prefixes, the
/// access-control substrate for pass isolation.
pub struct ResourceView<'a> {
    registry: &'a ResourceRegistry,
    allowed_prefixes: Vec<ResourceIdentifier>,
}

impl<'a> ResourceView<'a> {
    pub fn new(registry: &'a ResourceRegistry, allowed_prefixes: Vec<ResourceIdentifier>) -> Self {
        Self {
            registry,
            allowed_prefixes,
        }
    }

    /// Resolve `id` to a handle, failing with [`Error::AccessDenied`] unless
    /// `id` equals or is prefixed by a declared namespace.
    pub fn request_handle(&self, id: &ResourceIdentifier) -> Result<ResourceHandle> {
        if !id.is_covered_by(&self.allowed_prefixes) {
            log::warn!(
                "access denied: `{id}` is not covered by any declared prefix ({:?})",
                self.allowed_prefixes
            );
            return Err(Error::AccessDenied {
                requested: id.clone(),
                declared: self.allowed_prefixes.clone(),
            });
        }
        Ok(self.registry.make_handle(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_or_update_invalidates_prior_handles() {
        let mut registry = ResourceRegistry::new();
        let id = ResourceIdentifier::parse("Gbuf::Normals");
        let h1 = registry.register_or_update(&id, Resource::new_texture(1, 1));
        assert!(registry.resolve(h1).is_some());

        let h2 = registry.register_or_update(&id, Resource::new_texture(1, 1));
        assert!(registry.resolve(h1).is_none());
        assert!(registry.resolve(h2).is_some());
    }

    #[test]
    fn unregister_then_reregister_recycles_slot() {
        let mut registry = ResourceRegistry::new();
        let id = ResourceIdentifier::parse("Scratch");
        let h1 = registry.register_or_update(&id, Resource::new_buffer(1024));
        registry.unregister(h1);
        assert!(registry.resolve(h1).is_none());

        let h2 = registry.register_anonymous(Resource::new_buffer(2048));
        assert_eq!(h2.slot_index, h1.slot_index);
    }

    #[test]
    fn reset_bumps_epoch_and_invalidates_everything() {
        let mut registry = ResourceRegistry::new();
        let id = ResourceIdentifier::parse("X");
        let h = registry.register_or_update(&id, Resource::new_texture(1, 1));
        registry.reset();
        assert!(registry.resolve(h).is_none());
    }

    #[test]
    fn view_denies_undeclared_identifier_e5() {
        let mut registry = ResourceRegistry::new();
        let normals = ResourceIdentifier::parse("Gbuf::Normals");
        let depth = ResourceIdentifier::parse("Gbuf::Depth");
        registry.register_or_update(&normals, Resource::new_texture(1, 1));
        registry.register_or_update(&depth, Resource::new_texture(1, 1));

        let view = ResourceView::new(&registry, vec![normals.clone()]);
        assert!(view.request_handle(&depth).is_err());
        assert!(view
            .request_handle(&ResourceIdentifier::parse("Gbuf::Normals::Packed"))
            .is_ok());
    }
}
