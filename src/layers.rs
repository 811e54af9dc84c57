//! Field-layer climbing (`nextLayerBaseType`).
//!
//! A single routine serves three callers that all need the same walk: the
//! program index (finding which `(container, field)` slot a store targets),
//! MLTA (recovering the layer chain above an indirect call's callee value),
//! and TyPM's externality-check type elevation. Keeping it here
//! instead of duplicating it in each of those modules is what keeps their
//! climbing behavior identical.

use crate::ir::{FunctionBody, Instr, Ty, ValueId};

/// One layer recovered while climbing from a value toward its allocation:
/// the container type addressed, and which field within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub container_ty: Ty,
    pub field_index: u32,
}

/// Climb from `start` toward its base, innermost layer first, transparently
/// passing through casts and loads, stopping at a field-addressing
/// operation each time one is found.
///
/// Bounded by `max_layers` (`MAX_TYPE_LAYER`): a cyclic or pathologically
/// deep chain yields a truncated, non-empty prefix rather than looping.
#[must_use]
pub fn next_layer_base_type(body: &FunctionBody, start: ValueId, max_layers: u32) -> Vec<Layer> {
    let mut layers = Vec::new();
    let mut current = start;
    for _ in 0..max_layers {
        let ValueId::Instr(idx) = current else {
            break;
        };
        let Some(instr) = body.instrs.get(idx as usize) else {
            break;
        };
        match instr {
            Instr::FieldAddr {
                base,
                container_ty,
                field_index,
            } => {
                layers.push(Layer {
                    container_ty: container_ty.clone(),
                    field_index: *field_index,
                });
                current = *base;
            }
            Instr::Cast { operand, .. } => current = *operand,
            Instr::Load { ptr, .. } => current = *ptr,
            _ => break,
        }
    }
    layers
}
