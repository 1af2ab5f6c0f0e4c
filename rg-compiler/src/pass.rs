//! Pass model & builder: fluent declaration of a pass's per-category
//! reads/writes, normalized into `(handle, range)` and a declared identifier
//! set for access control.

use std::string::String;
use std::vec::Vec;

use rg_core::{RangeSpec, ResourceIdentifier};

use crate::barrier::{AccessFlags, Layout, ResourceState, SyncFlags};
use crate::recorder::{ImmediateRecorder, RecordedOp};
use crate::resource::{ResourceHandle, ResourceRegistry, ResourceView};
use rg_sync::QueueKind;

/// One of the three pass kinds, modeled as a closed sum rather than an open
/// class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Render,
    Compute,
    Copy,
}

impl PassKind {
    pub fn queue(&self) -> QueueKind {
        match self {
            PassKind::Render => QueueKind::Graphics,
            PassKind::Compute => QueueKind::Compute,
            PassKind::Copy => QueueKind::Copy,
        }
    }
}

/// Resource usage categories a pass can declare into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    ShaderResource,
    RenderTarget,
    DepthRead,
    DepthReadWrite,
    ConstantBuffer,
    Uav,
    CopySource,
    CopyDest,
    Indirect,
    /// Legacy-interop buckets bypass the normal access->layout mapping and
    /// are excluded from aliasing eligibility.
    LegacyInterop,
}

impl Category {
    /// Map a category to `(access, layout, sync)` given the pass's queue
    /// kind. Graphics-only depth layouts are rejected off graphics; compute
    /// maps RT/DS onto UAV; copy maps everything onto copy src/dst.
    pub fn to_state(self, queue: QueueKind) -> ResourceState {
        use Category::*;
        match (self, queue) {
            (ShaderResource, _) => ResourceState::new(
                AccessFlags::SHADER_READ,
                Layout::ShaderResource,
                SyncFlags::PIXEL_SHADING | SyncFlags::COMPUTE_SHADING,
            ),
            (RenderTarget, QueueKind::Graphics) => ResourceState::new(
                AccessFlags::RENDER_TARGET,
                Layout::RenderTarget,
                SyncFlags::RENDER_TARGET,
            ),
            (RenderTarget, _) => ResourceState::new(
                AccessFlags::UAV,
                Layout::UnorderedAccess,
                SyncFlags::COMPUTE_SHADING,
            ),
            (DepthRead, QueueKind::Graphics) => ResourceState::new(
                AccessFlags::DEPTH_READ,
                Layout::DepthStencilRead,
                SyncFlags::DEPTH_STENCIL,
            ),
            (DepthRead, _) => ResourceState::new(
                AccessFlags::SHADER_READ,
                Layout::UnorderedAccess,
                SyncFlags::COMPUTE_SHADING,
            ),
            (DepthReadWrite, QueueKind::Graphics) => ResourceState::new(
                AccessFlags::DEPTH_WRITE,
                Layout::DepthStencilWrite,
                SyncFlags::DEPTH_STENCIL,
            ),
            (DepthReadWrite, _) => ResourceState::new(
                AccessFlags::UAV,
                Layout::UnorderedAccess,
                SyncFlags::COMPUTE_SHADING,
            ),
            (ConstantBuffer, _) => ResourceState::new(
                AccessFlags::CONSTANT_BUFFER,
                Layout::Common,
                SyncFlags::VERTEX_SHADING | SyncFlags::PIXEL_SHADING | SyncFlags::COMPUTE_SHADING,
            ),
            (Uav, _) => ResourceState::new(
                AccessFlags::UAV,
                Layout::UnorderedAccess,
                SyncFlags::COMPUTE_SHADING | SyncFlags::PIXEL_SHADING,
            ),
            (CopySource, _) => {
                ResourceState::new(AccessFlags::COPY_SOURCE, Layout::CopySource, SyncFlags::COPY)
            }
            (CopyDest, _) => {
                ResourceState::new(AccessFlags::COPY_DEST, Layout::CopyDest, SyncFlags::COPY)
            }
            (Indirect, _) => ResourceState::new(
                AccessFlags::INDIRECT_ARGUMENT,
                Layout::Common,
                SyncFlags::INDIRECT_ARGUMENT,
            ),
            (LegacyInterop, _) => ResourceState::COMMON,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Category::RenderTarget
                | Category::DepthReadWrite
                | Category::Uav
                | Category::CopyDest
        )
    }
}

/// `(resource_handle, range, desired_state)` — what the compiler actually
/// consumes.
#[derive(Debug, Clone)]
pub struct ResourceRequirement {
    pub handle: ResourceHandle,
    pub range: RangeSpec,
    pub state: ResourceState,
    pub category: Category,
}

/// Any of the forms a builder call accepts: a concrete handle, an
/// identifier, either paired with an explicit range, or a resolver that
/// expands to many resources at `Finalize` time.
#[derive(Clone)]
pub enum ResourceArg {
    Handle(ResourceHandle, RangeSpec),
    Identifier(ResourceIdentifier, RangeSpec),
    Resolver(ResourceIdentifier, RangeSpec),
}

impl ResourceArg {
    fn identifier_if_named(&self) -> Option<ResourceIdentifier> {
        match self {
            ResourceArg::Handle(..) => None,
            ResourceArg::Identifier(id, _) | ResourceArg::Resolver(id, _) => Some(id.clone()),
        }
    }
}

impl From<ResourceHandle> for ResourceArg {
    fn from(h: ResourceHandle) -> Self {
        ResourceArg::Handle(h, RangeSpec::ALL)
    }
}

impl From<(ResourceHandle, RangeSpec)> for ResourceArg {
    fn from((h, r): (ResourceHandle, RangeSpec)) -> Self {
        ResourceArg::Handle(h, r)
    }
}

impl From<&str> for ResourceArg {
    fn from(s: &str) -> Self {
        ResourceArg::Identifier(ResourceIdentifier::parse(s), RangeSpec::ALL)
    }
}

impl From<(&str, RangeSpec)> for ResourceArg {
    fn from((s, r): (&str, RangeSpec)) -> Self {
        ResourceArg::Identifier(ResourceIdentifier::parse(s), r)
    }
}

impl From<ResourceIdentifier> for ResourceArg {
    fn from(id: ResourceIdentifier) -> Self {
        ResourceArg::Identifier(id, RangeSpec::ALL)
    }
}

struct BucketEntry {
    arg: ResourceArg,
    category: Category,
}

/// A pass as declared to the compiler: its kind, declared identifier set,
/// the category buckets it populated, and optional internal transitions /
/// immediate bytecode.
pub struct Pass {
    pub name: String,
    pub kind: PassKind,
    pub identifier_set: Vec<ResourceIdentifier>,
    pub requirements: Vec<ResourceRequirement>,
    /// End-state overrides emitted after the pass.
    pub internal_transitions: Vec<(ResourceHandle, RangeSpec, ResourceState)>,
    /// Bytecode recorded via [`PassBuilder::record_immediate`], replayed
    /// by the executor in place of a user callback.
    pub ops: Vec<RecordedOp>,
    /// If a requirement's handle is stale at execute time, treat the pass
    /// as a no-op instead of failing the whole `Execute` call.
    pub allow_failure: bool,
}

/// Fluent builder normalizing declared arguments into `(handle, range)` pairs
/// per category.
pub struct PassBuilder<'a> {
    name: String,
    kind: PassKind,
    buckets: Vec<BucketEntry>,
    identifier_set: Vec<ResourceIdentifier>,
    internal_transitions: Vec<(ResourceHandle, RangeSpec, ResourceState)>,
    recorded_ops: Vec<RecordedOp>,
    recorded_touches: Vec<u64>,
    allow_failure: bool,
    registry: &'a ResourceRegistry,
}

impl<'a> PassBuilder<'a> {
    pub fn new(name: impl Into<String>, kind: PassKind, registry: &'a ResourceRegistry) -> Self {
        Self {
            name: name.into(),
            kind,
            buckets: Vec::new(),
            identifier_set: Vec::new(),
            internal_transitions: Vec::new(),
            recorded_ops: Vec::new(),
            recorded_touches: Vec::new(),
            allow_failure: false,
            registry,
        }
    }

    /// Mark this pass as tolerant of a stale resource handle at execute
    /// time: the executor skips it as a no-op instead of failing the whole
    /// `Execute` call.
    pub fn allow_failure(&mut self, allow: bool) -> &mut Self {
        self.allow_failure = allow;
        self
    }

    fn push(&mut self, category: Category, arg: impl Into<ResourceArg>) -> &mut Self {
        let arg = arg.into();
        if let Some(id) = arg.identifier_if_named() {
            self.identifier_set.push(id);
        }
        self.buckets.push(BucketEntry { arg, category });
        self
    }

    /// Push every element of an iterable of resource args into one category
    /// (the "iterable of any of the above" accepted form).
    fn push_many(
        &mut self,
        category: Category,
        args: impl IntoIterator<Item = impl Into<ResourceArg>>,
    ) -> &mut Self {
        for arg in args {
            self.push(category, arg);
        }
        self
    }

    pub fn read_texture(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::ShaderResource, arg)
    }

    pub fn read_textures(
        &mut self,
        args: impl IntoIterator<Item = impl Into<ResourceArg>>,
    ) -> &mut Self {
        self.push_many(Category::ShaderResource, args)
    }

    pub fn write_color(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::RenderTarget, arg)
    }

    pub fn write_depth(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::DepthReadWrite, arg)
    }

    pub fn read_depth(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::DepthRead, arg)
    }

    pub fn constant_buffer(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::ConstantBuffer, arg)
    }

    pub fn storage_image(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::Uav, arg)
    }

    pub fn storage_buffer(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::Uav, arg)
    }

    pub fn copy_source(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::CopySource, arg)
    }

    pub fn copy_dest(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::CopyDest, arg)
    }

    pub fn indirect_args(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::Indirect, arg)
    }

    pub fn legacy_interop(&mut self, arg: impl Into<ResourceArg>) -> &mut Self {
        self.push(Category::LegacyInterop, arg)
    }

    /// Record declarative bytecode for this pass (clears, copies). Resources
    /// the bytecode touches must already be declared through one of the
    /// category methods above — the recorder has no access-control view of
    /// its own, so a touch with no matching declared requirement is dropped
    /// with a debug log at `Finalize` rather than silently trusted.
    pub fn record_immediate(&mut self, build: impl FnOnce(&mut ImmediateRecorder)) -> &mut Self {
        let mut recorder = ImmediateRecorder::new();
        build(&mut recorder);
        let (ops, accumulator) = recorder.finish();
        self.recorded_ops.extend(ops);
        self.recorded_touches
            .extend(accumulator.touched_resources());
        self
    }

    /// Override the end-state of `arg` after the pass executes.
    pub fn internal_transition(
        &mut self,
        arg: impl Into<ResourceArg>,
        state: ResourceState,
    ) -> &mut Self {
        let arg = arg.into();
        let (handle, range) = self.resolve_arg(&arg);
        self.internal_transitions.push((handle, range, state));
        self
    }

    fn resolve_arg(&self, arg: &ResourceArg) -> (ResourceHandle, RangeSpec) {
        match arg {
            ResourceArg::Handle(h, r) => (*h, *r),
            ResourceArg::Identifier(id, r) | ResourceArg::Resolver(id, r) => {
                (self.registry.make_handle(id), *r)
            }
        }
    }

    /// Run every bucket entry through its category's access->state mapping
    /// and through a fresh per-resource tracker that unions overlapping
    /// requests into a single end state.
    pub fn finalize(self) -> Pass {
        use crate::state::SymbolicStateTracker;
        use std::collections::BTreeMap;

        let queue = self.kind.queue();
        let mut per_resource: BTreeMap<u64, (ResourceHandle, SymbolicStateTracker)> =
            BTreeMap::new();
        let mut requirements = Vec::new();

        for entry in &self.buckets {
            let (handle, range_spec) = self.resolve_arg(&entry.arg);
            if !handle.is_valid() {
                continue;
            }
            let resolved = range_spec.resolve(handle.num_mips, handle.num_slices);
            if resolved.is_empty() {
                log::debug!(
                    "pass `{}`: dropping empty-range requirement on resource {}",
                    self.name,
                    handle.global_id
                );
                continue;
            }
            let state = entry.category.to_state(queue);

            per_resource
                .entry(handle.global_id)
                .or_insert_with(|| {
                    (
                        handle,
                        SymbolicStateTracker::new(handle.global_id, handle.num_mips, handle.num_slices),
                    )
                });
            // unioning is implemented by the tracker itself: overlapping
            // requests within one pass just apply in bucket order, and the
            // last write to a given subresource wins as the declared state.
            let mut discard_transitions = Vec::new();
            per_resource
                .get_mut(&handle.global_id)
                .unwrap()
                .1
                .apply(resolved, state, &mut discard_transitions);

            requirements.push(ResourceRequirement {
                handle,
                range: range_spec,
                state,
                category: entry.category,
            });
        }

        for resource in &self.recorded_touches {
            if !per_resource.contains_key(resource) {
                log::debug!(
                    "pass `{}`: recorder touched resource {} with no matching declared requirement",
                    self.name,
                    resource
                );
            }
        }

        Pass {
            name: self.name,
            kind: self.kind,
            identifier_set: self.identifier_set,
            requirements,
            internal_transitions: self.internal_transitions,
            ops: self.recorded_ops,
            allow_failure: self.allow_failure,
        }
    }

    /// An access-control view scoped to this builder's declared identifiers
    /// so far — lets a pass's dynamic `declare_usage` hook request further
    /// handles without bypassing isolation.
    pub fn view(&self) -> ResourceView<'_> {
        ResourceView::new(self.registry, self.identifier_set.clone())
    }
}
