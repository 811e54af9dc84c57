//! Output shape: resolved call sites, callers, and phase counters.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Guid, ModuleId};

/// Identity of one indirect call site: which function it's in, and the
/// position of the `Call` instruction within that function's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSiteId(pub u32);

#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller: Guid,
    pub module: ModuleId,
    pub instr_index: u32,
    /// Cached from the `Call` instruction at push time, so a caller scanning
    /// `CallGraph.sites` for indirect ones doesn't have to re-look-up the
    /// owning function/module just to check the callee's shape.
    pub is_indirect: bool,
}

/// The resolved call graph: every call site's current candidate callee set,
/// plus the optional reverse map (`MAP_CALLER_TO_CALLEE`).
#[derive(Debug, Default)]
pub struct CallGraph {
    pub sites: Vec<CallSite>,
    pub callees: FxHashMap<CallSiteId, FxHashSet<Guid>>,
    pub callers: Option<FxHashMap<Guid, FxHashSet<CallSiteId>>>,
}

impl CallGraph {
    #[must_use]
    pub fn new(build_caller_map: bool) -> Self {
        Self {
            sites: Vec::new(),
            callees: FxHashMap::default(),
            callers: build_caller_map.then(FxHashMap::default),
        }
    }

    pub fn push_site(&mut self, site: CallSite, callees: FxHashSet<Guid>) -> CallSiteId {
        let id = CallSiteId(self.sites.len() as u32);
        if let Some(callers) = &mut self.callers {
            for &callee in &callees {
                callers.entry(callee).or_default().insert(id);
            }
        }
        self.sites.push(site);
        self.callees.insert(id, callees);
        id
    }

    /// Replace the candidate set for `id`, keeping the caller map in sync.
    pub fn set_callees(&mut self, id: CallSiteId, callees: FxHashSet<Guid>) {
        if let Some(callers) = &mut self.callers {
            if let Some(old) = self.callees.get(&id) {
                for callee in old {
                    if let Some(set) = callers.get_mut(callee) {
                        set.remove(&id);
                    }
                }
            }
            for &callee in &callees {
                callers.entry(callee).or_default().insert(id);
            }
        }
        self.callees.insert(id, callees);
    }

    #[must_use]
    pub fn total_targets(&self) -> usize {
        self.callees.values().map(FxHashSet::len).sum()
    }
}

/// Per-TyPM-iteration counters, mirroring the original's target- and
/// module-reduction percentages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseReport {
    pub old_target_count: u64,
    pub new_target_count: u64,
    pub out_of_scope_count: u64,
    pub old_module_count: u64,
    pub new_module_count: u64,
}

impl PhaseReport {
    #[must_use]
    pub fn target_reduction_pct(&self) -> Option<f64> {
        (self.old_target_count > 0)
            .then(|| (self.old_target_count - self.new_target_count) as f64 * 100.0 / self.old_target_count as f64)
    }

    #[must_use]
    pub fn module_reduction_pct(&self) -> Option<f64> {
        (self.old_module_count > 0)
            .then(|| (self.old_module_count - self.new_module_count) as f64 * 100.0 / self.old_module_count as f64)
    }

    /// Per `resolveFunctionTargets`: the phase has converged once nothing
    /// removable survived only because it was preserved as out-of-scope.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.new_target_count + self.out_of_scope_count == self.old_target_count
    }
}
