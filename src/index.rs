//! The program index: one pass over every [`Module`], producing the
//! whole-program tables MLTA and TyPM query against.
//!
//! The original tool keyed its equivalent tables by raw `Function*`/`Type*`
//! pointers, which differ per module even for the same logical symbol or
//! structural type, and needed a `mapDeclToActualFuncs` rewrite pass to
//! reconcile a declaration's pointer with its definition's. Keying instead
//! by [`Guid`] and [`TypeHash`] — identities that are already the same
//! value everywhere a symbol or a shape recurs — makes that rewrite pass
//! unnecessary by construction: a [`Guid`] found in a candidate set already
//! denotes the right logical function, whether or not *this* occurrence of
//! it happens to be a declaration. What the original rewrite pass actually
//! guarded against — a candidate whose `Guid` never resolves to a body
//! anywhere in the program — is still handled, by [`ProgramIndex::canonicalize_callee_set`].

use std::collections::HashSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::TargetPolicy;
use crate::hash::hash_type;
use crate::ir::{GlobalId, Guid, Initializer, Instr, MemoryEffect, Module, ModuleId, Ty, ValueId};
use crate::layers::next_layer_base_type;
use crate::hash::TypeHash;

/// What the index knows about one logical function, merged across every
/// occurrence (declaration or definition) seen across all ingested modules.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: String,
    /// `Some` once a module supplying a body has been ingested.
    pub defined_in: Option<ModuleId>,
    pub address_taken: bool,
    pub external_linkage: bool,
    pub intrinsic: bool,
    pub signature_hash: TypeHash,
    pub memory_effect: MemoryEffect,
}

impl FunctionRecord {
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.defined_in.is_some()
    }
}

/// Whole-program tables built by one pass over every [`Module`].
#[derive(Debug, Default)]
pub struct ProgramIndex {
    max_type_layer: u32,

    functions: FxHashMap<Guid, FunctionRecord>,
    /// Address-taken functions, keyed by signature hash (one-layer and
    /// fuzzy MLTA candidate source).
    sig_funcs: FxHashMap<TypeHash, FxHashSet<Guid>>,
    /// Functions ever literally stored into a `(container, field)` slot,
    /// anywhere in the program (the multi-layer MLTA candidate source).
    stored_field_funcs: FxHashMap<(TypeHash, u32), FxHashSet<Guid>>,
    /// Per-module stored-field index, for the externality check: a
    /// field never stored to in a module licenses elevating a query to its
    /// outer layer without losing soundness.
    stored_field_idx: FxHashMap<ModuleId, FxHashMap<TypeHash, FxHashSet<u32>>>,
    cast_to: FxHashMap<ModuleId, FxHashMap<TypeHash, FxHashSet<TypeHash>>>,
    cast_from: FxHashMap<ModuleId, FxHashMap<TypeHash, FxHashSet<TypeHash>>>,
    /// Modules containing a stack, static, or global allocation of a given
    /// container type (the "allocation record").
    alloc_modules: FxHashMap<TypeHash, FxHashSet<ModuleId>>,
    /// Modules that write a value of type `T` into global `G` (the
    /// "global-variable summary").
    global_writers: FxHashMap<(GlobalId, TypeHash), FxHashSet<ModuleId>>,
    /// Modules that read a value of type `T` out of global `G`.
    global_readers: FxHashMap<(GlobalId, TypeHash), FxHashSet<ModuleId>>,
}

impl ProgramIndex {
    #[must_use]
    pub fn new(max_type_layer: u32) -> Self {
        Self {
            max_type_layer,
            ..Self::default()
        }
    }

    /// Ingest one module: record its globals' target types and literal
    /// function stores, its functions' identity and address-taken status,
    /// and walk every defined function's body for casts, stored-field
    /// indices, and allocations.
    pub fn ingest_module(&mut self, module: &Module, policy: TargetPolicy, critical_structs: &FxHashSet<TypeHash>) {
        for global in &module.globals {
            if global.ty.is_container() {
                self.alloc_modules.entry(hash_type(&global.ty)).or_default().insert(module.id);
            }
            if let Some(initializer) = &global.initializer {
                self.global_writers
                    .entry((global.id, hash_type(&global.ty)))
                    .or_default()
                    .insert(module.id);
                self.walk_initializer(&global.ty, initializer, module.id);
            }
        }

        for function in &module.functions {
            let signature_hash = hash_type(&function.signature());
            let record = self.functions.entry(function.guid).or_insert_with(|| FunctionRecord {
                name: function.name.clone(),
                defined_in: None,
                address_taken: false,
                external_linkage: function.external_linkage,
                intrinsic: function.intrinsic,
                signature_hash,
                memory_effect: function.memory_effect,
            });
            record.signature_hash = signature_hash;
            record.memory_effect = function.memory_effect;
            record.address_taken |= function.address_taken;
            if !function.is_declaration {
                record.defined_in = Some(module.id);
            }
            if record.address_taken {
                self.sig_funcs.entry(signature_hash).or_default().insert(function.guid);
            }

            let Some(body) = &function.body else { continue };
            for instr in &body.instrs {
                match instr {
                    Instr::Store { value, ptr, .. } => {
                        let chain = next_layer_base_type(body, *ptr, self.max_type_layer);
                        if let Some(innermost) = chain.first() {
                            let container_hash = hash_type(&innermost.container_ty);
                            self.stored_field_idx
                                .entry(module.id)
                                .or_default()
                                .entry(container_hash)
                                .or_default()
                                .insert(innermost.field_index);
                            if let ValueId::Function(guid) = value {
                                self.stored_field_funcs
                                    .entry((container_hash, innermost.field_index))
                                    .or_default()
                                    .insert(*guid);
                            }
                        }
                        if let ValueId::Global(gid) = ptr {
                            let value_ty = field_value_type(function, body, *value);
                            if crate::hash::is_flow_relevant(&value_ty, policy, critical_structs) {
                                self.global_writers
                                    .entry((*gid, hash_type(&value_ty)))
                                    .or_default()
                                    .insert(module.id);
                            }
                        }
                    }
                    Instr::Load { ptr, ty } => {
                        if let ValueId::Global(gid) = ptr {
                            self.global_readers.entry((*gid, hash_type(ty))).or_default().insert(module.id);
                        }
                    }
                    Instr::Cast { operand: _, from_ty, to_ty } => {
                        let (from, to) = (hash_type(from_ty), hash_type(to_ty));
                        self.cast_to.entry(module.id).or_default().entry(from).or_default().insert(to);
                        self.cast_from.entry(module.id).or_default().entry(to).or_default().insert(from);
                    }
                    Instr::Alloc { ty } => {
                        if ty.is_container() {
                            self.alloc_modules.entry(hash_type(ty)).or_default().insert(module.id);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn walk_initializer(&mut self, ty: &Ty, init: &Initializer, module: ModuleId) {
        match init {
            Initializer::FunctionPointer(_) | Initializer::Opaque => {}
            Initializer::Cast { from_ty, to_ty, inner } => {
                let (from, to) = (hash_type(from_ty), hash_type(to_ty));
                self.cast_to.entry(module).or_default().entry(from).or_default().insert(to);
                self.cast_from.entry(module).or_default().entry(to).or_default().insert(from);
                self.walk_initializer(from_ty, inner, module);
            }
            Initializer::Composite(items) => {
                let Some(fields) = ty.as_composite_fields() else { return };
                let container_hash = hash_type(ty);
                for (idx, (field_ty, item)) in fields.iter().zip(items.iter()).enumerate() {
                    if let Initializer::FunctionPointer(guid) = item {
                        self.stored_field_funcs
                            .entry((container_hash, idx as u32))
                            .or_default()
                            .insert(*guid);
                        self.stored_field_idx
                            .entry(module)
                            .or_default()
                            .entry(container_hash)
                            .or_default()
                            .insert(idx as u32);
                    }
                    self.walk_initializer(field_ty, item, module);
                }
            }
        }
    }

    #[must_use]
    pub fn function(&self, guid: Guid) -> Option<&FunctionRecord> {
        self.functions.get(&guid)
    }

    #[must_use]
    pub fn is_defined(&self, guid: Guid) -> bool {
        self.functions.get(&guid).is_some_and(FunctionRecord::is_defined)
    }

    #[must_use]
    pub fn defining_module(&self, guid: Guid) -> Option<ModuleId> {
        self.functions.get(&guid).and_then(|r| r.defined_in)
    }

    #[must_use]
    pub fn address_taken_by_signature(&self, signature: TypeHash) -> Option<&FxHashSet<Guid>> {
        self.sig_funcs.get(&signature)
    }

    #[must_use]
    pub fn stored_at(&self, container: TypeHash, field_index: u32) -> Option<&FxHashSet<Guid>> {
        self.stored_field_funcs.get(&(container, field_index))
    }

    #[must_use]
    pub fn field_ever_stored(&self, module: ModuleId, container: TypeHash, field_index: u32) -> bool {
        self.stored_field_idx
            .get(&module)
            .and_then(|by_ty| by_ty.get(&container))
            .is_some_and(|fields| fields.contains(&field_index))
    }

    #[must_use]
    pub fn allocating_modules(&self, container: TypeHash) -> Option<&FxHashSet<ModuleId>> {
        self.alloc_modules.get(&container)
    }

    #[must_use]
    pub fn casts_from(&self, module: ModuleId, source: TypeHash) -> Option<&FxHashSet<TypeHash>> {
        self.cast_to.get(&module).and_then(|m| m.get(&source))
    }

    #[must_use]
    pub fn casts_to(&self, module: ModuleId, target: TypeHash) -> Option<&FxHashSet<TypeHash>> {
        self.cast_from.get(&module).and_then(|m| m.get(&target))
    }

    #[must_use]
    pub fn global_writer_modules(&self, global: GlobalId, ty: TypeHash) -> Option<&FxHashSet<ModuleId>> {
        self.global_writers.get(&(global, ty))
    }

    #[must_use]
    pub fn global_reader_modules(&self, global: GlobalId, ty: TypeHash) -> Option<&FxHashSet<ModuleId>> {
        self.global_readers.get(&(global, ty))
    }

    #[must_use]
    pub fn global_relations(&self) -> impl Iterator<Item = (&(GlobalId, TypeHash), &FxHashSet<ModuleId>)> {
        self.global_writers.iter()
    }

    /// Drop any callee whose `Guid` resolves to no definition anywhere in
    /// the program, unless its name is in `out_of_scope`. Applied wherever
    /// a fresh candidate set is produced (MLTA's output, and TyPM's
    /// refinement on every phase boundary), mirroring `mapDeclToActualFuncs`.
    pub fn canonicalize_callee_set(&self, callees: &mut FxHashSet<Guid>, out_of_scope: &HashSet<String>) {
        callees.retain(|guid| match self.functions.get(guid) {
            Some(record) => record.is_defined() || out_of_scope.contains(&record.name),
            None => false,
        });
    }
}

/// Best-effort type recovery for a stored value, used only to classify
/// global writes by type. Falls back to an opaque pointer type when the
/// value's producer cannot be resolved (an escape, handled the same way
/// the value-use parsing elsewhere handles any other escape).
fn field_value_type(function: &crate::ir::Function, body: &crate::ir::FunctionBody, value: ValueId) -> Ty {
    body.value_type(&function.params, value)
}
