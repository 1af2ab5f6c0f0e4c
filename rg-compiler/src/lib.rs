//! Render-graph compiler and scheduler: pass declaration, dependency
//! analysis, multi-queue batching, aliasing, and execution.
//!
//! The crate is organized bottom-up, mirroring how a frame actually flows
//! through it: [`barrier`] and [`state`] model one resource's subresource
//! state; [`resource`] is the registry those states live behind; [`pass`] is
//! how a frame declares work against that registry; [`recorder`] is the
//! declarative bytecode a pass can emit inline; [`graph`] turns a frame's
//! declared passes into a scheduled, barriered, cross-queue-synchronized
//! plan; [`aliasing`] packs that plan's resources into shared memory;
//! [`materialize`] decides what needs allocating frame to frame; and
//! [`executor`] walks the compiled plan against a backend.

use std::collections::BTreeMap;

pub mod aliasing;
pub mod barrier;
pub mod executor;
pub mod graph;
pub mod materialize;
pub mod pass;
pub mod recorder;
pub mod resource;
pub mod state;

pub use aliasing::{AliasCandidate, AliasPlacementRange, AliasingPlan, ExclusionReason, Pool};
pub use barrier::{AccessFlags, Layout, ResourceState, ResourceTransition, SyncFlags};
pub use executor::{execute, Backend};
pub use graph::{compile, Batch, CompiledSchedule, SignalEntry, SignalPhase, WaitEntry, WaitPhase};
pub use materialize::{FrameDelta, MaterializationManager};
pub use pass::{Category, Pass, PassBuilder, PassKind, ResourceArg, ResourceRequirement};
pub use recorder::{AccessAccumulator, ImmediateRecorder, Op, OpcodeWriter, PinIndex, RecordedOp};
pub use resource::{Resolver, Resource, ResourceHandle, ResourceId, ResourceRegistry, ResourceView};

pub use rg_core::{
    AutoAliasMode, AutoAliasPackingStrategy, Bound, Error, Handle, HandleAllocator, RangeSpec,
    ResourceIdentifier, Result, Settings, SubresourceRange,
};
pub use rg_sync::{PipelineTimeline, QueueKind, TimelineSemaphore};

/// One frame's worth of declared work: the registry it was declared against
/// plus the passes themselves, in declaration order.
///
/// This is the thin façade a host application actually calls — `AddPass`,
/// `CompileStructural`, `Update`, `Execute` all read naturally as methods on
/// it, while the real logic stays in the per-concern modules above.
pub struct FrameGraph {
    registry: ResourceRegistry,
    passes: Vec<Pass>,
    materialize: MaterializationManager,
    timeline: PipelineTimeline,
}

impl FrameGraph {
    pub fn new() -> Self {
        let settings = rg_core::settings::current();
        Self {
            registry: ResourceRegistry::new(),
            passes: Vec::new(),
            materialize: MaterializationManager::new(settings.auto_alias_pool_retire_idle_frames),
            timeline: PipelineTimeline::new(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    /// Build a pass via `build` and append it to this frame's declaration
    /// order.
    pub fn add_pass(&mut self, name: impl Into<String>, kind: PassKind, build: impl FnOnce(&mut PassBuilder)) {
        let mut builder = PassBuilder::new(name, kind, &self.registry);
        build(&mut builder);
        self.passes.push(builder.finalize());
    }

    /// Advance materialization bookkeeping by one frame.
    /// Returns what changed so a cached [`CompiledSchedule`] can be
    /// invalidated when needed.
    pub fn update(&mut self) -> FrameDelta {
        self.materialize.begin_frame(&mut self.registry)
    }

    /// Run Phases 1-6 over this frame's declared passes, then Phase 7
    /// (aliasing) over the resulting schedule.
    pub fn compile_structural(&self) -> Result<(CompiledSchedule, AliasingPlan)> {
        let schedule = graph::compile(&self.passes, &self.timeline)?;
        let candidates = alias_candidates(&schedule, &self.passes, &self.registry);
        let settings = rg_core::settings::current();
        let plan = aliasing::plan(&candidates, &settings);
        Ok((schedule, plan))
    }

    /// Execute a previously compiled schedule against `backend`, then clear
    /// this frame's declared passes so the next frame starts from an empty
    /// declaration list, whether or not execution succeeded.
    pub fn execute(&mut self, schedule: &CompiledSchedule, backend: &mut impl Backend) -> Result<()> {
        let result = executor::execute(schedule, &self.passes, &self.registry, &self.timeline, backend);
        self.passes.clear();
        result
    }

    pub fn timeline(&self) -> &PipelineTimeline {
        &self.timeline
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder footprint for an opaque texture (`Resource::byte_size ==
/// None`): this crate has no backing allocator of its own to ask for the
/// real figure, so aliasing sizes every texture candidate generously rather
/// than under-reserving its pool.
const UNSIZED_TEXTURE_PLACEHOLDER_BYTES: u64 = 4 * 1024 * 1024;

struct AliasAccum {
    first_use: usize,
    last_use: usize,
    owners: std::collections::BTreeSet<usize>,
    allow_alias: bool,
    byte_size: u64,
    legacy_interop: bool,
}

/// Derive Phase 7 candidates from a compiled schedule: one entry per
/// resource touched by any pass, with its pass-index lifetime interval
/// taken from the resource's first and last touch in `schedule.order`.
fn alias_candidates(schedule: &CompiledSchedule, passes: &[Pass], registry: &ResourceRegistry) -> Vec<AliasCandidate> {
    let position: BTreeMap<usize, usize> = schedule
        .order
        .iter()
        .enumerate()
        .map(|(pos, &pass_index)| (pass_index, pos))
        .collect();

    let mut by_resource: BTreeMap<u64, AliasAccum> = BTreeMap::new();

    for (pass_index, pass) in passes.iter().enumerate() {
        let Some(&pos) = position.get(&pass_index) else {
            continue;
        };
        for req in &pass.requirements {
            let Some(resource) = registry.resolve(req.handle) else {
                continue;
            };
            let entry = by_resource.entry(req.handle.global_id).or_insert_with(|| AliasAccum {
                first_use: pos,
                last_use: pos,
                owners: std::collections::BTreeSet::new(),
                allow_alias: resource.allow_alias,
                byte_size: resource.byte_size.unwrap_or(UNSIZED_TEXTURE_PLACEHOLDER_BYTES),
                legacy_interop: false,
            });
            entry.first_use = entry.first_use.min(pos);
            entry.last_use = entry.last_use.max(pos);
            entry.owners.insert(pass_index);
            if req.category == Category::LegacyInterop {
                entry.legacy_interop = true;
            }
        }
    }

    by_resource
        .into_iter()
        .map(|(resource, acc)| AliasCandidate {
            resource,
            byte_size: acc.byte_size,
            alignment: 256,
            first_use: acc.first_use,
            last_use: acc.last_use,
            allow_alias: acc.allow_alias,
            materializable: true,
            legacy_interop: acc.legacy_interop,
            owners: acc.owners.len() as u32,
        })
        .collect()
}
