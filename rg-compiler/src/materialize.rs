//! Materialization manager: decides, frame to frame, which resolver
//! outputs need a backing allocation, retires ones that have gone idle, and
//! detects the generation bumps that invalidate a previously compiled
//! schedule.

use std::collections::BTreeMap;

use rg_core::ResourceIdentifier;

use crate::resource::{Resource, ResourceHandle, ResourceRegistry};

/// Per-identifier bookkeeping the manager needs across frames.
struct Tracked {
    last_used_frame: u64,
    last_seen_generation: u32,
}

/// Tracks resolver-backed resources across frames and decides materialize /
/// retire.
pub struct MaterializationManager {
    tracked: BTreeMap<ResourceIdentifier, Tracked>,
    retire_idle_frames: u64,
    current_frame: u64,
}

/// What changed since the last `begin_frame`, consumed by the compiler to
/// decide whether a cached `CompiledSchedule` can be reused.
#[derive(Debug, Default, Clone)]
pub struct FrameDelta {
    pub newly_materialized: Vec<ResourceIdentifier>,
    pub retired: Vec<ResourceIdentifier>,
    /// Identifiers whose generation changed since last frame — any cached
    /// plan referencing one of these must be recompiled.
    pub generation_changed: Vec<ResourceIdentifier>,
}

impl MaterializationManager {
    pub fn new(retire_idle_frames: u32) -> Self {
        Self {
            tracked: BTreeMap::new(),
            retire_idle_frames: retire_idle_frames.max(1) as u64,
            current_frame: 0,
        }
    }

    /// Record that `id` was touched this frame. A resolver's first resolution
    /// this frame counts as "used", even if it hasn't been touched by a pass
    /// yet — a newly resolved resource is never retired on the same frame it
    /// appears.
    pub fn mark_used(&mut self, id: &ResourceIdentifier, generation: u32) -> bool {
        let frame = self.current_frame;
        match self.tracked.get_mut(id) {
            Some(entry) => {
                entry.last_used_frame = frame;
                entry.last_seen_generation = generation;
                false
            }
            None => {
                self.tracked.insert(
                    id.clone(),
                    Tracked {
                        last_used_frame: frame,
                        last_seen_generation: generation,
                    },
                );
                true
            }
        }
    }

    /// Materialize `id` via `resolver` into `registry` if it isn't already
    /// bound this frame, returning the handle either way. Lazy: the resolver
    /// only runs when `id` is actually requested.
    pub fn materialize(
        &mut self,
        registry: &mut ResourceRegistry,
        id: &ResourceIdentifier,
        resolve: impl FnOnce() -> Resource,
    ) -> ResourceHandle {
        let existing = registry.make_handle(id);
        if registry.resolve(existing).is_some() {
            let generation = existing.slot_generation;
            self.mark_used(id, generation);
            return existing;
        }
        let resource = resolve();
        let handle = registry.register_or_update(id, resource);
        self.mark_used(id, handle.slot_generation);
        handle
    }

    /// Advance to the next frame, retiring anything idle past the configured
    /// threshold and reporting generation changes relative to what was
    /// tracked last frame.
    pub fn begin_frame(&mut self, registry: &mut ResourceRegistry) -> FrameDelta {
        self.current_frame += 1;
        let mut delta = FrameDelta::default();

        let mut to_retire = Vec::new();
        for (id, tracked) in &self.tracked {
            if self.current_frame - tracked.last_used_frame > self.retire_idle_frames {
                to_retire.push(id.clone());
            }
        }

        for id in &to_retire {
            let handle = registry.make_handle(id);
            if handle.is_valid() {
                registry.unregister(handle);
            }
            self.tracked.remove(id);
            delta.retired.push(id.clone());
        }

        for (id, tracked) in &self.tracked {
            let current = registry.make_handle(id);
            if current.is_valid() && current.slot_generation != tracked.last_seen_generation {
                delta.generation_changed.push(id.clone());
            }
        }

        delta
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }
}
