//! Aliasing planner: pack disjoint-lifetime resources into shared
//! memory pools once the schedule is known.

use std::collections::BTreeMap;
use std::vec::Vec;

use rg_core::{AutoAliasMode, AutoAliasPackingStrategy, Settings};

/// One candidate resource as seen by the planner: its byte footprint,
/// alignment, and the pass-index interval over which it's live.
#[derive(Debug, Clone, Copy)]
pub struct AliasCandidate {
    pub resource: u64,
    pub byte_size: u64,
    pub alignment: u64,
    pub first_use: usize,
    pub last_use: usize,
    pub allow_alias: bool,
    pub materializable: bool,
    /// Resources touched by a legacy-interop bucket are excluded.
    pub legacy_interop: bool,
    /// Distinct passes that declared a requirement against this resource.
    /// A resource declared by more than one owner is excluded from
    /// aliasing — packing it into a shared pool would let one owner's
    /// lifetime assumptions be silently invalidated by another's.
    pub owners: u32,
}

/// Why a candidate was excluded from aliasing, kept for
/// `autoAliasLogExclusionReasons`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Declared by more than one owner, so aliasing is disabled for it.
    AliasingDisabled,
    OptedOut,
    NotMaterializable,
    LegacyInterop,
    PersistsBeyondRetireThreshold,
}

/// `(pool_id, [start_byte, end_byte))` assigned to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasPlacementRange {
    pub pool_id: u32,
    pub start_byte: u64,
    pub end_byte: u64,
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub id: u32,
    pub alignment: u64,
    /// Peak concurrent footprint packed into this pool.
    pub required_bytes: u64,
    pub reserved_bytes: u64,
}

pub struct AliasingPlan {
    pub placements: BTreeMap<u64, AliasPlacementRange>,
    pub pools: Vec<Pool>,
    pub exclusions: Vec<(u64, ExclusionReason)>,
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return offset;
    }
    (offset + alignment - 1) / alignment * alignment
}

/// Eligibility filtering: an opted-in, materializable, singly-owned,
/// non-legacy-interop candidate that won't outlive the pool's retire
/// threshold.
fn eligible(candidate: &AliasCandidate, retire_idle_frames: u32) -> Result<(), ExclusionReason> {
    if !candidate.allow_alias {
        return Err(ExclusionReason::OptedOut);
    }
    if !candidate.materializable {
        return Err(ExclusionReason::NotMaterializable);
    }
    if candidate.legacy_interop {
        return Err(ExclusionReason::LegacyInterop);
    }
    if candidate.owners > 1 {
        return Err(ExclusionReason::AliasingDisabled);
    }
    // A lifetime spanning the whole retire window is treated as
    // cross-frame-persistent and excluded from packing.
    if (candidate.last_use - candidate.first_use) as u64 >= retire_idle_frames as u64 {
        return Err(ExclusionReason::PersistsBeyondRetireThreshold);
    }
    Ok(())
}

fn disjoint(a: &AliasCandidate, b: &AliasCandidate) -> bool {
    a.last_use < b.first_use || b.last_use < a.first_use
}

/// Greedy sweep-line packing (default strategy): walk candidates in start
/// order, placing each at the lowest free byte offset of any pool whose
/// already-placed occupants are all lifetime-disjoint with it.
fn pack_greedy_sweep_line(candidates: &[AliasCandidate]) -> (BTreeMap<u64, AliasPlacementRange>, Vec<Pool>) {
    let mut order: Vec<&AliasCandidate> = candidates.iter().collect();
    order.sort_by_key(|c| (c.first_use, c.resource));

    let mut pools: Vec<Pool> = Vec::new();
    // Per pool: resources placed so far, for disjointness checks.
    let mut pool_occupants: Vec<Vec<AliasCandidate>> = Vec::new();
    let mut placements: BTreeMap<u64, AliasPlacementRange> = BTreeMap::new();

    for candidate in order {
        let mut placed = false;
        for (pool_index, occupants) in pool_occupants.iter_mut().enumerate() {
            if occupants.iter().all(|o| disjoint(o, candidate)) {
                let offset = align_up(
                    occupants
                        .iter()
                        .map(|o| placements[&o.resource].end_byte)
                        .max()
                        .unwrap_or(0),
                    candidate.alignment,
                );
                placements.insert(
                    candidate.resource,
                    AliasPlacementRange {
                        pool_id: pools[pool_index].id,
                        start_byte: offset,
                        end_byte: offset + candidate.byte_size,
                    },
                );
                occupants.push(*candidate);
                pools[pool_index].required_bytes = pools[pool_index].required_bytes.max(offset + candidate.byte_size);
                placed = true;
                break;
            }
        }
        if !placed {
            let pool_id = pools.len() as u32;
            let offset = align_up(0, candidate.alignment);
            placements.insert(
                candidate.resource,
                AliasPlacementRange {
                    pool_id,
                    start_byte: offset,
                    end_byte: offset + candidate.byte_size,
                },
            );
            pools.push(Pool {
                id: pool_id,
                alignment: candidate.alignment,
                required_bytes: offset + candidate.byte_size,
                reserved_bytes: 0,
            });
            pool_occupants.push(vec![*candidate]);
        }
    }

    (placements, pools)
}

/// Branch-and-bound packing: explores assignments up to `node_budget`,
/// keeping the minimum-total-bytes assignment; falls back to greedy once the
/// budget is exhausted.
fn pack_branch_and_bound(
    candidates: &[AliasCandidate],
    node_budget: u32,
) -> (BTreeMap<u64, AliasPlacementRange>, Vec<Pool>) {
    // Small inputs only: beyond the budget, defer to the deterministic
    // greedy packer rather than spend unbounded CPU on an NP-hard bin-pack.
    if candidates.len() > 12 || node_budget == 0 {
        return pack_greedy_sweep_line(candidates);
    }

    let mut order: Vec<&AliasCandidate> = candidates.iter().collect();
    order.sort_by_key(|c| (c.first_use, c.resource));

    let mut best: Option<(u64, Vec<Vec<AliasCandidate>>)> = None;
    let mut nodes_explored: u32 = 0;

    fn recurse<'a>(
        remaining: &[&'a AliasCandidate],
        pools: &mut Vec<Vec<AliasCandidate>>,
        nodes_explored: &mut u32,
        budget: u32,
        best: &mut Option<(u64, Vec<Vec<AliasCandidate>>)>,
    ) {
        if *nodes_explored >= budget {
            return;
        }
        *nodes_explored += 1;

        if remaining.is_empty() {
            let total: u64 = pools
                .iter()
                .map(|pool| pool.iter().map(|c| c.byte_size).max().unwrap_or(0))
                .sum();
            if best.as_ref().map(|(b, _)| total < *b).unwrap_or(true) {
                *best = Some((total, pools.clone()));
            }
            return;
        }

        let (first, rest) = remaining.split_first().unwrap();
        for pool_index in 0..pools.len() {
            if pools[pool_index].iter().all(|o| disjoint(o, first)) {
                pools[pool_index].push(**first);
                recurse(rest, pools, nodes_explored, budget, best);
                pools[pool_index].pop();
            }
        }
        pools.push(vec![**first]);
        recurse(rest, pools, nodes_explored, budget, best);
        pools.pop();
    }

    let mut pools: Vec<Vec<AliasCandidate>> = Vec::new();
    recurse(&order, &mut pools, &mut nodes_explored, node_budget, &mut best);

    match best {
        Some((_, assignment)) => {
            let mut placements = BTreeMap::new();
            let mut out_pools = Vec::new();
            for (pool_index, occupants) in assignment.iter().enumerate() {
                let pool_id = pool_index as u32;
                let mut offset = 0u64;
                let mut required = 0u64;
                let mut sorted = occupants.clone();
                sorted.sort_by_key(|c| (c.first_use, c.resource));
                for c in &sorted {
                    let start = align_up(offset, c.alignment);
                    placements.insert(
                        c.resource,
                        AliasPlacementRange {
                            pool_id,
                            start_byte: start,
                            end_byte: start + c.byte_size,
                        },
                    );
                    offset = start + c.byte_size;
                    required = required.max(offset);
                }
                out_pools.push(Pool {
                    id: pool_id,
                    alignment: occupants.first().map(|c| c.alignment).unwrap_or(1),
                    required_bytes: required,
                    reserved_bytes: 0,
                });
            }
            (placements, out_pools)
        }
        None => pack_greedy_sweep_line(candidates),
    }
}

/// Plan aliasing over `candidates` under the given settings. With
/// `autoAliasMode == Off`, returns an empty plan.
pub fn plan(candidates: &[AliasCandidate], settings: &Settings) -> AliasingPlan {
    if matches!(settings.auto_alias_mode, AutoAliasMode::Off) {
        return AliasingPlan {
            placements: BTreeMap::new(),
            pools: Vec::new(),
            exclusions: Vec::new(),
        };
    }

    let mut eligible_candidates = Vec::new();
    let mut exclusions = Vec::new();
    for candidate in candidates {
        match eligible(candidate, settings.auto_alias_pool_retire_idle_frames) {
            Ok(()) => eligible_candidates.push(*candidate),
            Err(reason) => exclusions.push((candidate.resource, reason)),
        }
    }

    let (placements, mut pools) = match settings.auto_alias_packing_strategy {
        AutoAliasPackingStrategy::GreedySweepLine => pack_greedy_sweep_line(&eligible_candidates),
        AutoAliasPackingStrategy::BranchAndBound => pack_branch_and_bound(&eligible_candidates, 4096),
    };

    for pool in &mut pools {
        pool.reserved_bytes =
            (pool.required_bytes as f64 * settings.auto_alias_pool_growth_headroom as f64).ceil() as u64;
    }

    AliasingPlan {
        placements,
        pools,
        exclusions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rg_core::AutoAliasMode;

    fn candidate(resource: u64, size: u64, first: usize, last: usize) -> AliasCandidate {
        AliasCandidate {
            resource,
            byte_size: size,
            alignment: 256,
            first_use: first,
            last_use: last,
            allow_alias: true,
            materializable: true,
            legacy_interop: false,
            owners: 1,
        }
    }

    #[test]
    fn off_mode_emits_no_placements_boundary_12() {
        let mut settings = Settings::default();
        settings.auto_alias_mode = AutoAliasMode::Off;
        let candidates = vec![candidate(1, 1 << 20, 0, 2), candidate(2, 1 << 20, 3, 5)];
        let result = plan(&candidates, &settings);
        assert!(result.placements.is_empty());
        assert!(result.pools.is_empty());
    }

    #[test]
    fn disjoint_lifetimes_share_one_pool_e4() {
        let mut settings = Settings::default();
        settings.auto_alias_mode = AutoAliasMode::Balanced;
        let mib = 1u64 << 20;
        let candidates = vec![candidate(1, mib, 0, 2), candidate(2, mib, 3, 5)];
        let result = plan(&candidates, &settings);

        let px = result.placements[&1];
        let py = result.placements[&2];
        assert_eq!(px.pool_id, py.pool_id);
        assert_eq!(px.start_byte, 0);
        assert_eq!(py.start_byte, 0);

        let pool = &result.pools[px.pool_id as usize];
        assert_eq!(pool.reserved_bytes, (mib as f64 * 1.5).ceil() as u64);
    }

    #[test]
    fn overlapping_lifetimes_get_distinct_pools() {
        let mut settings = Settings::default();
        settings.auto_alias_mode = AutoAliasMode::Aggressive;
        let mib = 1u64 << 20;
        let candidates = vec![candidate(1, mib, 0, 5), candidate(2, mib, 2, 3)];
        let result = plan(&candidates, &settings);
        assert_ne!(result.placements[&1].pool_id, result.placements[&2].pool_id);
    }

    #[test]
    fn legacy_interop_is_excluded_with_reason() {
        let mut settings = Settings::default();
        settings.auto_alias_mode = AutoAliasMode::Conservative;
        let mut c = candidate(1, 1024, 0, 1);
        c.legacy_interop = true;
        let result = plan(&[c], &settings);
        assert!(result.placements.is_empty());
        assert_eq!(result.exclusions, vec![(1, ExclusionReason::LegacyInterop)]);
    }

    #[test]
    fn multiple_owners_are_excluded_with_reason() {
        let mut settings = Settings::default();
        settings.auto_alias_mode = AutoAliasMode::Conservative;
        let mut c = candidate(1, 1024, 0, 1);
        c.owners = 2;
        let result = plan(&[c], &settings);
        assert!(result.placements.is_empty());
        assert_eq!(result.exclusions, vec![(1, ExclusionReason::AliasingDisabled)]);
    }
}
