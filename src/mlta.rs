//! Multi-layer type analysis: indirect-call resolution.
//!
//! Three policies, selected by [`crate::config::MltaMode`]:
//!
//! - `Fuzzy`/`OneLayer` match a call's signature hash against every
//!   address-taken function sharing it, the former caching by signature so
//!   repeat call sites with the same shape skip the lookup.
//! - `MultiLayer` climbs the field-addressing chain above the callee value
//!   (innermost layer first) and matches against functions ever literally
//!   stored into that exact `(container, field)` slot anywhere in the
//!   program, falling back to a signature match only if no layer yields a
//!   non-empty set.
//!
//! Struct-mode target policy (`TargetPolicy::Struct`) asks a different
//! question — which critical structures a function's stores touch, not
//! which functions an indirect call could reach — and is served by
//! [`record_struct_touches`] instead of [`MltaResolver::resolve_call`].

use std::collections::HashSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::MltaMode;
use crate::hash::{hash_type, TypeHash};
use crate::index::ProgramIndex;
use crate::ir::{Call, Callee, FunctionBody, Guid, Instr, Ty};
use crate::layers::next_layer_base_type;

/// Resolves indirect calls against a [`ProgramIndex`], per the configured
/// [`MltaMode`].
pub struct MltaResolver<'a> {
    index: &'a ProgramIndex,
    mode: MltaMode,
    max_type_layer: u32,
    fuzzy_cache: FxHashMap<TypeHash, FxHashSet<Guid>>,
}

impl<'a> MltaResolver<'a> {
    #[must_use]
    pub fn new(index: &'a ProgramIndex, mode: MltaMode, max_type_layer: u32) -> Self {
        Self {
            index,
            mode,
            max_type_layer,
            fuzzy_cache: FxHashMap::default(),
        }
    }

    /// Resolve one call site to its candidate callee set, already
    /// canonicalized against `out_of_scope`.
    pub fn resolve_call(&mut self, body: &FunctionBody, call: &Call, out_of_scope: &HashSet<String>) -> FxHashSet<Guid> {
        let mut resolved = match &call.callee {
            Callee::Direct(guid) => {
                let mut set = FxHashSet::default();
                set.insert(*guid);
                set
            }
            Callee::InlineAsm => FxHashSet::default(),
            Callee::Indirect(value) => {
                let signature_hash = hash_type(&call_signature(call));
                match self.mode {
                    MltaMode::Fuzzy => self.fuzzy_match(signature_hash),
                    MltaMode::OneLayer => self.signature_match(signature_hash),
                    MltaMode::MultiLayer => self
                        .layered_match(body, *value, signature_hash)
                        .unwrap_or_else(|| self.signature_match(signature_hash)),
                }
            }
        };
        self.index.canonicalize_callee_set(&mut resolved, out_of_scope);
        resolved
    }

    fn signature_match(&self, signature_hash: TypeHash) -> FxHashSet<Guid> {
        self.index.address_taken_by_signature(signature_hash).cloned().unwrap_or_default()
    }

    fn fuzzy_match(&mut self, signature_hash: TypeHash) -> FxHashSet<Guid> {
        if let Some(cached) = self.fuzzy_cache.get(&signature_hash) {
            return cached.clone();
        }
        let set = self.signature_match(signature_hash);
        self.fuzzy_cache.insert(signature_hash, set.clone());
        set
    }

    /// Climb from the callee value's layers, innermost first. The candidate
    /// set at every layer is intersected with the call site's own
    /// signature match — never the raw stored-field set alone — so that a
    /// function stored into the matching `(container, field)` slot under an
    /// incompatible signature can never be admitted (invariant 4:
    /// `Callees(c) ⊆ {f : address-taken(f) ∧ sig-hash(f) = h}`). Returns the
    /// first layer whose intersection is non-empty; `None` means no layer
    /// produced anything, leaving the signature fallback to the caller.
    fn layered_match(&self, body: &FunctionBody, value: crate::ir::ValueId, signature_hash: TypeHash) -> Option<FxHashSet<Guid>> {
        let signature_candidates = self.signature_match(signature_hash);
        let chain = next_layer_base_type(body, value, self.max_type_layer);
        for layer in &chain {
            let container_hash = hash_type(&layer.container_ty);
            if let Some(stored) = self.index.stored_at(container_hash, layer.field_index) {
                let matched: FxHashSet<Guid> = stored.intersection(&signature_candidates).copied().collect();
                if !matched.is_empty() {
                    return Some(matched);
                }
            }
        }
        None
    }
}

fn call_signature(call: &Call) -> Ty {
    Ty::Function {
        params: call.arg_tys.clone(),
        ret: Box::new(call.ret_ty.clone()),
    }
}

/// Struct-mode target policy supplement (`resolveStructTargets`): walk a
/// function's store instructions and report which critical structures, if
/// any, are written to through a recovered field-addressing chain.
///
/// This answers a different question than call-graph resolution — "does
/// this function touch a critical structure" rather than "what can this
/// call site reach" — so it returns type hashes, not callees.
#[must_use]
pub fn record_struct_touches(body: &FunctionBody, critical_structs: &FxHashSet<TypeHash>, max_type_layer: u32) -> FxHashSet<TypeHash> {
    let mut touched = FxHashSet::default();
    for instr in &body.instrs {
        let Instr::Store { ptr, .. } = instr else { continue };
        let chain = next_layer_base_type(body, *ptr, max_type_layer);
        for layer in &chain {
            let hash = hash_type(&layer.container_ty);
            if critical_structs.contains(&hash) {
                touched.insert(hash);
            }
        }
    }
    touched
}
