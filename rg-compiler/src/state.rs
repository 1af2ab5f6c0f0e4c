//! Per-resource symbolic state tracker.
//!
//! Stores a piecewise-constant map `subresource -> (access, layout, sync)` as
//! a flat list of segments. The segments always partition the resource's full
//! `(mips x slices)` rectangle: every `Apply` call replaces the affected
//! slice of that partition in place, never leaving gaps or overlaps.

use std::vec::Vec;

use smallvec::{smallvec, SmallVec};

use rg_core::SubresourceRange;

use crate::barrier::{ResourceState, ResourceTransition};

/// `(range, state)` — one piece of the partition.
#[derive(Debug, Clone)]
struct Segment {
    range: SubresourceRange,
    state: ResourceState,
}

/// Most resources settle into a handful of segments (whole-resource, or
/// split a few mips at a time) — inline storage avoids a heap allocation for
/// the common case.
type Segments = SmallVec<[Segment; 4]>;

/// Tracks one resource's subresource state as a partition of segments.
#[derive(Clone)]
pub struct SymbolicStateTracker {
    resource: u64,
    extent: SubresourceRange,
    segments: Segments,
}

impl SymbolicStateTracker {
    /// Construct with one segment covering the whole resource in
    /// `(Common, Common, All)`.
    pub fn new(resource: u64, total_mips: u32, total_slices: u32) -> Self {
        let extent = SubresourceRange::all(total_mips, total_slices);
        Self {
            resource,
            extent,
            segments: smallvec![Segment {
                range: extent,
                state: ResourceState::COMMON,
            }],
        }
    }

    /// Pure predicate: would applying `new_state` to `range` change anything?
    /// Used by the batcher to decide if a pass needs a barrier before joining
    /// a batch, without mutating the tracker.
    pub fn would_modify(&self, range: SubresourceRange, new_state: ResourceState) -> bool {
        if range.is_empty() {
            return false;
        }
        self.segments.iter().any(|seg| {
            seg.range.intersects(&range) && seg.state != new_state
        })
    }

    /// Apply `new_state` to `range`, splitting/merging segments as needed and
    /// appending any emitted transitions to `out_transitions`.
    ///
    /// `Apply(r, s); Apply(r, s)` emits exactly one transition: the second
    /// call observes `seg.state == new_state` everywhere and leaves the
    /// partition untouched.
    pub fn apply(
        &mut self,
        range: SubresourceRange,
        new_state: ResourceState,
        out_transitions: &mut Vec<ResourceTransition>,
    ) {
        if range.is_empty() {
            return;
        }

        let mut next_segments: Segments = SmallVec::with_capacity(self.segments.len() + 2);
        for seg in self.segments.drain(..) {
            if !seg.range.intersects(&range) || seg.state == new_state {
                next_segments.push(seg);
                continue;
            }

            let overlap = seg
                .range
                .intersection(&range)
                .expect("intersects() implies intersection() is Some");

            let prev_state = seg.state;
            for outside in seg.range.subtract(&overlap) {
                next_segments.push(Segment {
                    range: outside,
                    state: prev_state,
                });
            }

            out_transitions.push(ResourceTransition {
                resource: self.resource,
                range: overlap,
                prev: prev_state,
                next: new_state,
                discard: prev_state.layout == crate::barrier::Layout::Common,
            });
            next_segments.push(Segment {
                range: overlap,
                state: new_state,
            });
        }

        coalesce(&mut next_segments);
        self.segments = next_segments;
        debug_assert!(self.partitions(), "segments must partition the resource");
    }

    /// Debug-only check that segments still partition the full extent, with
    /// no gaps and no overlaps.
    #[cfg(debug_assertions)]
    fn partitions(&self) -> bool {
        let mut covered: u64 = 0;
        let total_cells = self.extent.mip_count as u64 * self.extent.slice_count as u64;
        for a in &self.segments {
            for b in &self.segments {
                if !std::ptr::eq(a, b) && a.range.intersects(&b.range) {
                    return false;
                }
            }
            covered += a.range.mip_count as u64 * a.range.slice_count as u64;
        }
        covered == total_cells
    }

    #[cfg(not(debug_assertions))]
    fn partitions(&self) -> bool {
        true
    }

    /// Current state covering the given cell, if any segment contains it.
    #[cfg(test)]
    fn state_at(&self, mip: u32, slice: u32) -> Option<ResourceState> {
        self.segments
            .iter()
            .find(|seg| {
                mip >= seg.range.base_mip
                    && mip < seg.range.mip_end()
                    && slice >= seg.range.base_slice
                    && slice < seg.range.slice_end()
            })
            .map(|seg| seg.state)
    }

    #[cfg(test)]
    fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// Coalesce adjacent segments sharing identical state, preferring mip-major
/// coalescing on ties. Runs to a fixed point since merging two
/// segments can expose a further mip-major merge opportunity.
fn coalesce(segments: &mut Segments) {
    loop {
        let mut merged = false;
        'outer: for i in 0..segments.len() {
            for j in (i + 1)..segments.len() {
                let (a, b) = (&segments[i], &segments[j]);
                if a.state != b.state {
                    continue;
                }
                if a.range.mip_adjacent(&b.range) {
                    let new_range = a.range.coalesce(&b.range);
                    let state = a.state;
                    segments.remove(j);
                    segments[i] = Segment {
                        range: new_range,
                        state,
                    };
                    merged = true;
                    break 'outer;
                }
                if a.range.slice_adjacent(&b.range) {
                    let new_range = a.range.coalesce(&b.range);
                    let state = a.state;
                    segments.remove(j);
                    segments[i] = Segment {
                        range: new_range,
                        state,
                    };
                    merged = true;
                    break 'outer;
                }
            }
        }
        if !merged {
            break;
        }
    }
}
