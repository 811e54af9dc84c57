//! The phase driver: `Init -> Phase1 (MLTA) -> PhaseN (TyPM, to a
//! fixpoint, bounded by `max_phase_cg`) -> Done`.
//!
//! Single-threaded, cooperative: one [`Driver`] owns the whole [`Module`]
//! set and runs its phases to completion in `run`. The original pass ran
//! under LLVM's legacy pass manager, which could in principle schedule
//! independent modules' `doModulePass` calls concurrently; nothing here
//! does, since every module-ingestion step writes into the same program
//! index. A host wanting that parallelism would shard [`ProgramIndex`]
//! ingestion per module and merge, then run phases 2 onward as today —
//! an extension point, not something this crate implements.

use crate::callgraph::{CallGraph, CallSite, PhaseReport};
use crate::config::AnalysisConfig;
use crate::error::ConfigError;
use crate::index::ProgramIndex;
use crate::ir::{Callee, Instr, Module};
use crate::mlta::MltaResolver;
use crate::typm::{record_call_propagation, record_global_propagation, refine_indirect_calls, DependencyResolver, PropagationGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Mlta,
    Typm(u32),
    Done,
}

/// Lifecycle hooks mirroring the original tool's `doInitialization` /
/// `doModulePass` / `doFinalization`.
pub trait ModulePassLifecycle {
    fn do_initialization(&mut self);
    fn do_module_pass(&mut self, module_index: usize);
    fn do_finalization(&mut self);
}

pub struct Driver {
    modules: Vec<Module>,
    config: AnalysisConfig,
    index: ProgramIndex,
    graph: PropagationGraph,
    resolver: DependencyResolver,
    call_graph: CallGraph,
    phase: Phase,
    reports: Vec<PhaseReport>,
}

impl Driver {
    pub fn new(modules: Vec<Module>, config: AnalysisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let index = ProgramIndex::new(config.max_type_layer);
        let resolver = DependencyResolver::new(config.type_elevation, config.max_type_layer);
        let call_graph = CallGraph::new(config.build_caller_map);
        Ok(Self {
            modules,
            config,
            index,
            graph: PropagationGraph::new(),
            resolver,
            call_graph,
            phase: Phase::Init,
            reports: Vec::new(),
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn phase_reports(&self) -> &[PhaseReport] {
        &self.reports
    }

    #[must_use]
    pub fn index(&self) -> &ProgramIndex {
        &self.index
    }

    /// Run every phase to completion and hand back the resolved call
    /// graph.
    pub fn run(&mut self) -> &CallGraph {
        let init_span = tracing::info_span!("init", modules = self.modules.len()).entered();
        self.do_initialization();
        for i in 0..self.modules.len() {
            self.do_module_pass(i);
        }
        self.do_finalization();
        drop(init_span);

        self.phase = Phase::Mlta;
        let mlta_span = tracing::info_span!("mlta_phase").entered();
        self.run_mlta_phase();
        tracing::info!(
            sites = self.call_graph.sites.len(),
            targets = self.call_graph.total_targets(),
            "mlta phase resolved initial candidate sets"
        );
        drop(mlta_span);

        if self.config.enable_typm {
            let mut iteration = 1;
            while iteration < self.config.max_phase_cg {
                iteration += 1;
                self.phase = Phase::Typm(iteration);
                let typm_span = tracing::info_span!("typm_phase", iteration).entered();
                let report = self.run_typm_phase();
                let converged = report.converged();
                tracing::info!(
                    target_reduction_pct = report.target_reduction_pct(),
                    module_reduction_pct = report.module_reduction_pct(),
                    converged,
                    "typm phase complete"
                );
                drop(typm_span);
                self.reports.push(report);
                if converged {
                    break;
                }
            }
        }

        self.phase = Phase::Done;
        tracing::info!(total_targets = self.call_graph.total_targets(), "call graph resolution done");
        &self.call_graph
    }

    #[must_use]
    pub fn into_call_graph(self) -> CallGraph {
        self.call_graph
    }

    /// Records a call site for every `call`/`invoke`-equivalent instruction
    /// except inline assembly (opaque, contributes no constraint): direct
    /// calls resolve to their single-element singleton (`CallGraph.cc`'s
    /// `FS->insert(CF)`), indirect calls go through the configured MLTA
    /// mode. Both land in `CallGraph.callees` so invariant 3 (a direct
    /// call's singleton survives untouched) has something to hold onto —
    /// `refine_indirect_calls` only ever touches the indirect ones.
    fn run_mlta_phase(&mut self) {
        let mut resolver = MltaResolver::new(&self.index, self.config.mlta_mode, self.config.max_type_layer);
        let mut new_sites = Vec::new();
        for module in &self.modules {
            for function in &module.functions {
                let Some(body) = &function.body else { continue };
                for (idx, instr) in body.instrs.iter().enumerate() {
                    let Instr::Call(call) = instr else { continue };
                    if matches!(call.callee, Callee::InlineAsm) {
                        continue;
                    }
                    let resolved = resolver.resolve_call(body, call, &self.config.out_of_scope_funcs);
                    let site = CallSite {
                        caller: function.guid,
                        module: module.id,
                        instr_index: idx as u32,
                        is_indirect: matches!(call.callee, Callee::Indirect(_)),
                    };
                    new_sites.push((site, resolved));
                }
            }
        }
        for (site, resolved) in new_sites {
            self.call_graph.push_site(site, resolved);
        }
    }

    fn run_typm_phase(&mut self) -> PhaseReport {
        self.graph.clear_volatile();
        self.resolver.invalidate();

        // Direct-call sites already have their stable edges recorded once
        // in `do_finalization`; only an indirect call's edges are
        // re-derived every iteration, since they depend on the current
        // (narrowing) candidate set. Filtering on the cached `is_indirect`
        // flag first skips the module/function lookup entirely for every
        // direct-call site, rather than paying for it only to discard the
        // result.
        for (idx, site) in self.call_graph.sites.iter().enumerate() {
            if !site.is_indirect {
                continue;
            }
            let id = crate::callgraph::CallSiteId(idx as u32);
            let Some(candidates) = self.call_graph.callees.get(&id) else { continue };
            let Some(module) = self.modules.iter().find(|m| m.id == site.module) else { continue };
            let Some(function) = module.functions.iter().find(|f| f.guid == site.caller) else { continue };
            let Some(body) = &function.body else { continue };
            let Some(Instr::Call(call)) = body.instrs.get(site.instr_index as usize) else { continue };
            for callee in candidates.clone() {
                record_call_propagation(&mut self.graph, &self.index, &self.config, site.module, body, call, callee, true);
            }
        }

        refine_indirect_calls(
            &mut self.call_graph,
            &self.modules,
            &self.index,
            &self.graph,
            &mut self.resolver,
            &self.config.out_of_scope_funcs,
            self.modules.len() as u64,
        )
    }
}

impl ModulePassLifecycle for Driver {
    fn do_initialization(&mut self) {
        self.phase = Phase::Init;
    }

    fn do_module_pass(&mut self, module_index: usize) {
        let module = &self.modules[module_index];
        self.index.ingest_module(module, self.config.target_policy, &self.config.critical_structs);
    }

    fn do_finalization(&mut self) {
        record_global_propagation(&mut self.graph, &self.index);
        for module in &self.modules {
            for function in &module.functions {
                let Some(body) = &function.body else { continue };
                for instr in &body.instrs {
                    let Instr::Call(call) = instr else { continue };
                    if let Callee::Direct(guid) = call.callee {
                        record_call_propagation(&mut self.graph, &self.index, &self.config, module.id, body, call, guid, false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, MltaMode};
    use crate::hash::hash_type;
    use crate::ir::{
        Call, FunctionBody, Function, Global, GlobalId, Guid, Initializer, MemoryEffect, ModuleId, Scalar, Ty, ValueId,
    };
    use std::collections::HashSet;

    fn ops_ty() -> Ty {
        Ty::Composite {
            name: Some("struct.ops".into()),
            fields: vec![Ty::Pointer(Box::new(Ty::Function {
                params: vec![],
                ret: Box::new(Ty::Scalar(Scalar::Int(32))),
            }))],
        }
    }

    /// Module 0 defines `handler` and stores it into a global ops table.
    /// Module 1 defines `other_handler`, address-taken but never stored
    /// into that table. Module 2 dispatches through the table. MLTA alone
    /// should already exclude `other_handler` (it was never stored into
    /// the matching field); TyPM additionally narrows module reachability
    /// when two unrelated handlers share a slot.
    fn build_scenario() -> Vec<Module> {
        let handler = Guid(1);
        let m0 = Module {
            id: ModuleId(0),
            name: "m0".into(),
            functions: vec![Function {
                guid: handler,
                name: "handler".into(),
                module: ModuleId(0),
                params: vec![],
                ret: Ty::Scalar(Scalar::Int(32)),
                is_declaration: false,
                address_taken: true,
                external_linkage: true,
                intrinsic: false,
                memory_effect: MemoryEffect::Unconstrained,
                body: Some(FunctionBody::default()),
            }],
            globals: vec![Global {
                id: GlobalId(ModuleId(0), 0),
                name: "ops_table".into(),
                ty: ops_ty(),
                initializer: Some(Initializer::Composite(vec![Initializer::FunctionPointer(handler)])),
            }],
        };

        let m1 = Module {
            id: ModuleId(1),
            name: "m1".into(),
            functions: vec![Function {
                guid: Guid(2),
                name: "other_handler".into(),
                module: ModuleId(1),
                params: vec![],
                ret: Ty::Scalar(Scalar::Int(32)),
                is_declaration: false,
                address_taken: true,
                external_linkage: true,
                intrinsic: false,
                memory_effect: MemoryEffect::Unconstrained,
                body: Some(FunctionBody::default()),
            }],
            globals: vec![],
        };

        let dispatch_body = FunctionBody {
            instrs: vec![
                Instr::FieldAddr {
                    base: ValueId::Argument(0),
                    container_ty: ops_ty(),
                    field_index: 0,
                },
                Instr::Load {
                    ptr: ValueId::Instr(0),
                    ty: Ty::Pointer(Box::new(Ty::Function {
                        params: vec![],
                        ret: Box::new(Ty::Scalar(Scalar::Int(32))),
                    })),
                },
                Instr::Call(Call {
                    callee: Callee::Indirect(ValueId::Instr(1)),
                    args: vec![],
                    arg_tys: vec![],
                    ret_ty: Ty::Scalar(Scalar::Int(32)),
                }),
            ],
        };
        let m2 = Module {
            id: ModuleId(2),
            name: "m2".into(),
            functions: vec![Function {
                guid: Guid(3),
                name: "dispatch".into(),
                module: ModuleId(2),
                params: vec![Ty::Pointer(Box::new(ops_ty()))],
                ret: Ty::Scalar(Scalar::Int(32)),
                is_declaration: false,
                address_taken: false,
                external_linkage: true,
                intrinsic: false,
                memory_effect: MemoryEffect::Unconstrained,
                body: Some(dispatch_body),
            }],
            globals: vec![],
        };

        vec![m0, m1, m2]
    }

    #[test]
    fn multi_layer_mlta_excludes_function_never_stored_in_slot() {
        let modules = build_scenario();
        let config = AnalysisConfig {
            mlta_mode: MltaMode::MultiLayer,
            enable_typm: false,
            ..AnalysisConfig::default()
        };
        let mut driver = Driver::new(modules, config).unwrap();
        let graph = driver.run();
        assert_eq!(graph.sites.len(), 1);
        let resolved = &graph.callees[&crate::callgraph::CallSiteId(0)];
        assert!(resolved.contains(&Guid(1)));
        assert!(!resolved.contains(&Guid(2)));
    }

    #[test]
    fn fuzzy_mode_matches_by_signature_alone() {
        let modules = build_scenario();
        let config = AnalysisConfig {
            mlta_mode: MltaMode::Fuzzy,
            enable_typm: false,
            ..AnalysisConfig::default()
        };
        let mut driver = Driver::new(modules, config).unwrap();
        let graph = driver.run();
        let resolved = &graph.callees[&crate::callgraph::CallSiteId(0)];
        // Fuzzy mode ignores the stored-field slot entirely: both
        // same-signature address-taken functions are candidates.
        assert!(resolved.contains(&Guid(1)));
        assert!(resolved.contains(&Guid(2)));
    }

    #[test]
    fn driver_reaches_done_phase_after_run() {
        let modules = build_scenario();
        let config = AnalysisConfig::default();
        let mut driver = Driver::new(modules, config).unwrap();
        driver.run();
        assert_eq!(driver.phase(), Phase::Done);
    }

    #[test]
    fn invalid_config_rejected_before_any_phase_runs() {
        let config = AnalysisConfig {
            max_phase_cg: 0,
            ..AnalysisConfig::default()
        };
        assert!(Driver::new(vec![], config).is_err());
    }

    #[test]
    fn out_of_scope_function_survives_module_pruning() {
        let mut modules = build_scenario();
        // Replace the dispatch body's call args so arg/ret typing engages
        // TyPM, and register an out-of-scope callee that would otherwise
        // be pruned as module-unreachable.
        let config = AnalysisConfig {
            mlta_mode: MltaMode::Fuzzy,
            out_of_scope_funcs: HashSet::from(["handler".to_string()]),
            ..AnalysisConfig::default()
        };
        let handler_sig = hash_type(&Ty::Function {
            params: vec![],
            ret: Box::new(Ty::Scalar(Scalar::Int(32))),
        });
        let _ = handler_sig;
        modules[0].functions[0].address_taken = true;
        let mut driver = Driver::new(modules, config).unwrap();
        driver.run();
        let resolved = &driver.call_graph.callees[&crate::callgraph::CallSiteId(0)];
        assert!(resolved.contains(&Guid(1)));
    }
}
