//! Type-based per-module dependency analysis.
//!
//! Builds a `(sink module, type) -> {source modules}` relation from
//! argument/return/global data flow, then uses it to answer "which modules
//! could this caller's module exchange a value of this type with" — the
//! query MLTA's candidate callee sets are pruned against.
//!
//! Direct-call and global-derived edges are stable: computed once, they
//! never change across phases. Indirect-call-derived edges are volatile:
//! since they depend on the call's *current* candidate callee set, they are
//! cleared and rebuilt every TyPM iteration as that set narrows.

use std::collections::{HashSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::callgraph::{CallGraph, CallSite, CallSiteId, PhaseReport};
use crate::config::AnalysisConfig;
use crate::hash::{byte_pointer_hash, hash_type, is_flow_relevant, TypeHash};
use crate::index::ProgramIndex;
use crate::ir::{Call, Callee, FunctionBody, Instr, MemoryEffect, Module, ModuleId, Ty, ValueId};
use crate::layers::next_layer_base_type;

/// The `(sink, type) -> {source}` propagation relation, split into a
/// stable half and a volatile half that's rebuilt each TyPM iteration.
#[derive(Debug, Default)]
pub struct PropagationGraph {
    stable: FxHashMap<(ModuleId, TypeHash), FxHashSet<ModuleId>>,
    volatile: FxHashMap<(ModuleId, TypeHash), FxHashSet<ModuleId>>,
}

impl PropagationGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stable(&mut self, sink: ModuleId, ty: TypeHash, source: ModuleId) {
        self.stable.entry((sink, ty)).or_default().insert(source);
    }

    pub fn add_volatile(&mut self, sink: ModuleId, ty: TypeHash, source: ModuleId) {
        self.volatile.entry((sink, ty)).or_default().insert(source);
    }

    pub fn add(&mut self, sink: ModuleId, ty: TypeHash, source: ModuleId, is_indirect: bool) {
        if is_indirect {
            self.add_volatile(sink, ty, source);
        } else {
            self.add_stable(sink, ty, source);
        }
    }

    /// Cleared at the start of every TyPM iteration, since it was
    /// built from the previous iteration's (wider) candidate callee sets.
    pub fn clear_volatile(&mut self) {
        self.volatile.clear();
    }

    fn for_each_source(&self, sink: ModuleId, ty: TypeHash, mut f: impl FnMut(ModuleId)) {
        if let Some(set) = self.stable.get(&(sink, ty)) {
            set.iter().copied().for_each(&mut f);
        }
        if let Some(set) = self.volatile.get(&(sink, ty)) {
            set.iter().copied().for_each(&mut f);
        }
    }

    /// `getDependentModulesTy`: the set of modules reachable from `module`
    /// by following `ty`-labeled edges, plus one extra hop through the
    /// byte-pointer channel at every step (a generic pointer can carry a
    /// value of `ty` cast through it without the cast site itself knowing
    /// `ty`'s identity).
    #[must_use]
    pub fn dependent_modules_ty(&self, ty: TypeHash, module: ModuleId, byte_pointer: TypeHash) -> FxHashSet<ModuleId> {
        let mut visited = FxHashSet::default();
        let mut result = FxHashSet::default();
        let mut worklist = VecDeque::from([module]);
        while let Some(m) = worklist.pop_front() {
            if !visited.insert(m) {
                continue;
            }
            self.for_each_source(m, ty, |src| {
                if result.insert(src) {
                    worklist.push_back(src);
                }
            });
            self.for_each_source(m, byte_pointer, |src| {
                worklist.push_back(src);
            });
        }
        result
    }
}

/// Resolves `getDependentModulesV`: the externality-check type-elevation
/// step, followed by a (module, type)-memoized graph query.
#[derive(Debug)]
pub struct DependencyResolver {
    type_elevation: bool,
    max_type_layer: u32,
    byte_pointer: TypeHash,
    cache: FxHashMap<(ModuleId, TypeHash), FxHashSet<ModuleId>>,
}

impl DependencyResolver {
    #[must_use]
    pub fn new(type_elevation: bool, max_type_layer: u32) -> Self {
        Self {
            type_elevation,
            max_type_layer,
            byte_pointer: byte_pointer_hash(),
            cache: FxHashMap::default(),
        }
    }

    /// Drop the resolved-module cache: every entry in it was computed
    /// against the graph's volatile half, which the caller is about to
    /// rebuild.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn dependent_modules_for_value(
        &mut self,
        graph: &PropagationGraph,
        index: &ProgramIndex,
        body: &FunctionBody,
        value: ValueId,
        declared_ty: &Ty,
        module: ModuleId,
    ) -> FxHashSet<ModuleId> {
        let chain = next_layer_base_type(body, value, self.max_type_layer);
        let elevated = self.type_elevation.then(|| chain.first()).flatten().filter(|layer| {
            !index.field_ever_stored(module, hash_type(&layer.container_ty), layer.field_index)
        });

        let query_ty = match elevated {
            Some(layer) => layer.container_ty.clone(),
            None => declared_ty.clone(),
        };

        // Query both the type as declared (matching how a global or
        // argument's own type is keyed at ingestion) and its fully
        // pointer-stripped form (matching how a bare container/target type
        // is keyed when passed by value) — conventions that differ across
        // the program index's ingestion sites, so querying only one would
        // silently miss real dependencies rather than over-approximate.
        let stripped = strip_pointers(&query_ty);
        let mut resolved = self.resolve_cached(graph, hash_type(&query_ty), module);
        if stripped != query_ty {
            resolved.extend(self.resolve_cached(graph, hash_type(&stripped), module));
        }
        resolved
    }

    fn resolve_cached(&mut self, graph: &PropagationGraph, ty_hash: TypeHash, module: ModuleId) -> FxHashSet<ModuleId> {
        if let Some(cached) = self.cache.get(&(module, ty_hash)) {
            return cached.clone();
        }
        let resolved = graph.dependent_modules_ty(ty_hash, module, self.byte_pointer);
        self.cache.insert((module, ty_hash), resolved.clone());
        resolved
    }
}

fn strip_pointers(ty: &Ty) -> Ty {
    match ty {
        Ty::Pointer(inner) => strip_pointers(inner),
        other => other.clone(),
    }
}

/// `parseUsesOfValue`: a bounded, intraprocedural fixpoint over which
/// instructions derive from `root` (through field-addressing, casts, or
/// loads), classifying each derived value's appearance in a `Store` as a
/// written type and in a `Load` as a read type.
///
/// Returns `(reads, writes, escaped)`. `escaped` is true when the fixpoint
/// finds no local use at all — the value flows onward opaquely — which is
/// the signal callers use to fall back to whole-type propagation instead
/// (the escape policy).
fn parse_uses_of_value(body: &FunctionBody, root: ValueId) -> (FxHashSet<TypeHash>, FxHashSet<TypeHash>, bool) {
    let mut derived: FxHashSet<ValueId> = FxHashSet::default();
    derived.insert(root);

    loop {
        let mut grew = false;
        for (idx, instr) in body.instrs.iter().enumerate() {
            let produced = ValueId::Instr(idx as u32);
            if derived.contains(&produced) {
                continue;
            }
            let base_derived = match instr {
                Instr::FieldAddr { base, .. } => derived.contains(base),
                Instr::Cast { operand, .. } => derived.contains(operand),
                Instr::Load { ptr, .. } => derived.contains(ptr),
                _ => false,
            };
            if base_derived {
                derived.insert(produced);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    let mut reads = FxHashSet::default();
    let mut writes = FxHashSet::default();
    let mut used = false;
    for instr in &body.instrs {
        match instr {
            Instr::Load { ptr, ty } if derived.contains(ptr) => {
                reads.insert(hash_type(ty));
                used = true;
            }
            Instr::Store { value, ty, .. } if derived.contains(value) => {
                writes.insert(hash_type(ty));
                used = true;
            }
            Instr::Store { ptr, .. } if derived.contains(ptr) => {
                used = true;
            }
            Instr::Call(call) if call.args.iter().any(|a| derived.contains(a)) => {
                used = true;
            }
            _ => {}
        }
    }
    (reads, writes, !used && derived.len() <= 1)
}

/// `parseTargetTypesInCalls`: derive propagation edges for one call site
/// paired with one of its current candidate callees. Direct calls land in
/// the stable half of `graph`; indirect calls land in the volatile half,
/// since the pairing depends on a candidate set that narrows each
/// iteration.
#[allow(clippy::too_many_arguments)]
pub fn record_call_propagation(
    graph: &mut PropagationGraph,
    index: &ProgramIndex,
    config: &AnalysisConfig,
    caller_module: ModuleId,
    caller_body: &FunctionBody,
    call: &Call,
    callee: crate::ir::Guid,
    is_indirect: bool,
) {
    let Some(callee_module) = index.defining_module(callee) else { return };
    if caller_module == callee_module {
        return;
    }
    let callee_effect = index.function(callee).map(|r| r.memory_effect).unwrap_or(MemoryEffect::Unconstrained);

    let reads_ok = !config.flow_direction || !matches!(callee_effect, MemoryEffect::WritesOnly);
    let writes_ok = !config.flow_direction || !matches!(callee_effect, MemoryEffect::ReadsOnly);

    for (i, arg_ty) in call.arg_tys.iter().enumerate() {
        if is_flow_relevant(arg_ty, config.target_policy, &config.critical_structs) {
            graph.add(callee_module, hash_type(arg_ty), caller_module, is_indirect);
            continue;
        }
        let Ty::Pointer(inner) = arg_ty else { continue };
        if !is_flow_relevant(inner, config.target_policy, &config.critical_structs) {
            continue;
        }
        if let Some(ValueId::Function(guid)) = call.args.get(i) {
            if let Some(defining_module) = index.defining_module(*guid) {
                graph.add(caller_module, hash_type(inner), defining_module, is_indirect);
            }
        }
        graph.add(callee_module, hash_type(inner), caller_module, is_indirect);

        if config.parse_value_uses {
            if let Some(ValueId::Argument(n)) = call.args.get(i) {
                let (reads, writes, escaped) = parse_uses_of_value(caller_body, ValueId::Argument(*n));
                if !escaped {
                    if reads_ok {
                        for ty in reads {
                            graph.add(callee_module, ty, caller_module, is_indirect);
                        }
                    }
                    if writes_ok {
                        for ty in writes {
                            graph.add(caller_module, ty, callee_module, is_indirect);
                        }
                    }
                }
            }
        }
    }

    if is_flow_relevant(&call.ret_ty, config.target_policy, &config.critical_structs) {
        graph.add(caller_module, hash_type(&call.ret_ty), callee_module, is_indirect);
    }
}

/// Stable edges from the global-variable summary: every module that
/// reads a type from a global depends, for that type, on every module that
/// writes it.
pub fn record_global_propagation(graph: &mut PropagationGraph, index: &ProgramIndex) {
    for (&(global, ty), writers) in index.global_relations() {
        let Some(readers) = index.global_reader_modules(global, ty) else { continue };
        for &reader in readers {
            for &writer in writers {
                if reader != writer {
                    graph.add_stable(reader, ty, writer);
                }
            }
        }
    }
}

/// `resolveFunctionTargets`: prune every indirect call site's candidate set
/// to callees whose defining module is dependent on the caller's module
/// (or to out-of-scope names, which are never removed). Returns the
/// aggregate counters used to detect a fixpoint and to report reduction
/// rates.
pub fn refine_indirect_calls(
    call_graph: &mut CallGraph,
    modules: &[Module],
    index: &ProgramIndex,
    graph: &PropagationGraph,
    resolver: &mut DependencyResolver,
    out_of_scope: &HashSet<String>,
    total_modules: u64,
) -> PhaseReport {
    let mut report = PhaseReport::default();

    let sites: Vec<(CallSiteId, CallSite)> = call_graph
        .sites
        .iter()
        .enumerate()
        .map(|(i, site)| (CallSiteId(i as u32), site.clone()))
        .collect();

    for (id, site) in sites {
        // A direct call's singleton is never a refinement candidate — only
        // indirect sites contribute to the reduction counters, so a
        // direct-call-only program correctly reports no removals (and
        // converges on the first TyPM iteration) instead of stalling on
        // counts that can never be matched. Checking the cached flag first
        // skips the module/function lookup below for every direct-call
        // site, which otherwise dominates this loop's cost on programs
        // where direct calls vastly outnumber indirect ones.
        if !site.is_indirect {
            continue;
        }
        let Some(candidates) = call_graph.callees.get(&id).cloned() else { continue };

        let Some(module) = modules.iter().find(|m| m.id == site.module) else { continue };
        let Some(function) = module.functions.iter().find(|f| f.guid == site.caller) else { continue };
        let Some(body) = &function.body else { continue };
        let Some(Instr::Call(call)) = body.instrs.get(site.instr_index as usize) else { continue };
        let Callee::Indirect(value) = &call.callee else { continue };
        let value = *value;

        report.old_target_count += candidates.len() as u64;
        report.old_module_count += total_modules;

        // With no field chain to elevate from (a bare function-pointer
        // global or argument, not a composite slot), the relevant type is
        // the callee value's own declared type — e.g. a global's or a
        // parameter's pointer-to-function type — recovered the same way
        // The global-write classification elsewhere recovers a stored value's
        // type, not the call's return type alone.
        let declared_ty = body.value_type(&function.params, value);
        let mut dependent = resolver.dependent_modules_for_value(graph, index, body, value, &declared_ty, site.module);
        dependent.insert(site.module);
        report.new_module_count += dependent.len() as u64;

        let mut kept = FxHashSet::default();
        for callee in candidates {
            let callee_module = index.defining_module(callee);
            let in_scope_module = callee_module.is_some_and(|m| dependent.contains(&m));
            if in_scope_module {
                kept.insert(callee);
                report.new_target_count += 1;
            } else if let Some(record) = index.function(callee) {
                if out_of_scope.contains(&record.name) {
                    kept.insert(callee);
                    report.out_of_scope_count += 1;
                } else {
                    tracing::trace!(call_site = id.0, removed = ?callee, "REMOVED");
                }
            } else {
                tracing::trace!(call_site = id.0, removed = ?callee, "REMOVED");
            }
        }
        call_graph.set_callees(id, kept);
    }

    report
}
