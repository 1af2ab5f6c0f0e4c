//! Subresource state: access, layout, and sync-stage bits, and the
//! transitions the tracker emits when that state changes.

use std::fmt;

use rg_core::SubresourceRange;

/// Resource access bits. Hand-rolled rather than `bitflags!` to match the
/// surrounding crate's style of exposing raw `const` masks plus `BitOr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags(u32);

impl AccessFlags {
    pub const NONE: Self = Self(0);
    pub const COMMON: Self = Self(0);
    pub const SHADER_READ: Self = Self(1 << 0);
    pub const SHADER_WRITE: Self = Self(1 << 1);
    pub const RENDER_TARGET: Self = Self(1 << 2);
    pub const DEPTH_READ: Self = Self(1 << 3);
    pub const DEPTH_WRITE: Self = Self(1 << 4);
    pub const CONSTANT_BUFFER: Self = Self(1 << 5);
    pub const COPY_SOURCE: Self = Self(1 << 6);
    pub const COPY_DEST: Self = Self(1 << 7);
    pub const INDIRECT_ARGUMENT: Self = Self(1 << 8);
    pub const UAV: Self = Self(Self::SHADER_READ.0 | Self::SHADER_WRITE.0);

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether this access is a UAV read-modify-write (both read and write
    /// bits set), the access the batcher tracks separately for cross-queue
    /// hazard detection.
    pub fn is_uav(self) -> bool {
        self.contains(Self::SHADER_READ) && self.contains(Self::SHADER_WRITE)
    }

    pub fn is_write(self) -> bool {
        self.contains(Self::SHADER_WRITE)
            || self.contains(Self::RENDER_TARGET)
            || self.contains(Self::DEPTH_WRITE)
            || self.contains(Self::COPY_DEST)
    }
}

impl core::ops::BitOr for AccessFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for AccessFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Resource layout. Textures carry a real layout; buffers are always
/// `Common` (the data model's "has layout" bit is false for them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Common,
    RenderTarget,
    DepthStencilWrite,
    DepthStencilRead,
    ShaderResource,
    UnorderedAccess,
    CopySource,
    CopyDest,
}

/// Pipeline sync stage bits the transition waits on/signals from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncFlags(u32);

impl SyncFlags {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u32::MAX);
    pub const VERTEX_SHADING: Self = Self(1 << 0);
    pub const PIXEL_SHADING: Self = Self(1 << 1);
    pub const COMPUTE_SHADING: Self = Self(1 << 2);
    pub const RENDER_TARGET: Self = Self(1 << 3);
    pub const DEPTH_STENCIL: Self = Self(1 << 4);
    pub const COPY: Self = Self(1 << 5);
    pub const INDIRECT_ARGUMENT: Self = Self(1 << 6);

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl core::ops::BitOr for SyncFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// `(access, layout, sync)`. Equality ignores `sync` — sync determines when
/// a barrier completes, not whether one is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceState {
    pub access: AccessFlags,
    pub layout: Layout,
    pub sync: SyncFlags,
}

impl ResourceState {
    pub const COMMON: Self = Self {
        access: AccessFlags::COMMON,
        layout: Layout::Common,
        sync: SyncFlags::NONE,
    };

    pub fn new(access: AccessFlags, layout: Layout, sync: SyncFlags) -> Self {
        Self {
            access,
            layout,
            sync,
        }
    }
}

impl PartialEq for ResourceState {
    fn eq(&self, other: &Self) -> bool {
        self.access == other.access && self.layout == other.layout
    }
}

impl Eq for ResourceState {}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.access, self.layout)
    }
}

/// A change of a subresource's `(access, layout, sync)` state, carrying the
/// exact overlap range so the executor issues only the barrier that's
/// actually needed.
#[derive(Debug, Clone)]
pub struct ResourceTransition {
    pub resource: u64,
    pub range: SubresourceRange,
    pub prev: ResourceState,
    pub next: ResourceState,
    /// Set when `prev.layout == Common` and the resource is about to be fully
    /// overwritten — the executor may skip a decompress/initializer.
    pub discard: bool,
}

impl ResourceTransition {
    pub fn is_layout_transition(&self) -> bool {
        self.prev.layout != self.next.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_equality_ignores_sync() {
        let a = ResourceState::new(AccessFlags::UAV, Layout::UnorderedAccess, SyncFlags::COMPUTE_SHADING);
        let b = ResourceState::new(AccessFlags::UAV, Layout::UnorderedAccess, SyncFlags::PIXEL_SHADING);
        assert_eq!(a, b);
    }

    #[test]
    fn uav_access_detected() {
        assert!(AccessFlags::UAV.is_uav());
        assert!(!AccessFlags::SHADER_READ.is_uav());
    }
}
