//! Structural type hashing and target/container classification.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::config::TargetPolicy;
use crate::ir::{Scalar, Ty};

/// A structural hash over a [`Ty`] tree: stable across modules, blind to
/// composite names, sensitive to field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeHash(pub u64);

impl std::fmt::Display for TypeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ty:{:016x}", self.0)
    }
}

/// Hash a type structurally, ignoring composite names.
///
/// Two types with identical shape — across different modules, possibly
/// with different composite names — hash identically. This is what lets
/// the program index key its per-`(type, field)` tables by [`TypeHash`]
/// instead of by module-local type pointers.
#[must_use]
pub fn hash_type(ty: &Ty) -> TypeHash {
    let mut hasher = FxHasher::default();
    hash_type_into(ty, &mut hasher);
    TypeHash(hasher.finish())
}

fn hash_type_into(ty: &Ty, hasher: &mut FxHasher) {
    std::mem::discriminant(ty).hash(hasher);
    match ty {
        Ty::Scalar(s) => hash_scalar_into(s, hasher),
        Ty::Pointer(inner) => hash_type_into(inner, hasher),
        Ty::OpaquePointer => {}
        Ty::Function { params, ret } => {
            params.len().hash(hasher);
            for p in params {
                hash_type_into(p, hasher);
            }
            hash_type_into(ret, hasher);
        }
        Ty::Composite { fields, .. } => {
            // name is intentionally not hashed
            fields.len().hash(hasher);
            for f in fields {
                hash_type_into(f, hasher);
            }
        }
        Ty::Array { elem, len } => {
            len.hash(hasher);
            hash_type_into(elem, hasher);
        }
    }
}

fn hash_scalar_into(s: &Scalar, hasher: &mut FxHasher) {
    match s {
        Scalar::Void => 0u32.hash(hasher),
        Scalar::Int(bits) => {
            1u32.hash(hasher);
            bits.hash(hasher);
        }
        Scalar::Float(bits) => {
            2u32.hash(hasher);
            bits.hash(hasher);
        }
    }
}

/// Hash a composite-structure *name*, for struct-mode target matching.
///
/// Mirrors the original tool's `hash<string>()("struct." + name)` used to
/// build the critical-structure set from a plain-text name list.
#[must_use]
pub fn hash_struct_name(name: &str) -> TypeHash {
    let mut hasher = FxHasher::default();
    "struct.".hash(&mut hasher);
    name.hash(&mut hasher);
    TypeHash(hasher.finish())
}

/// A composite, or array-of-container (a "container type").
#[must_use]
pub fn is_container(ty: &Ty) -> bool {
    ty.is_container()
}

/// Whether `ty` is a target type under `policy`.
#[must_use]
pub fn is_target(ty: &Ty, policy: TargetPolicy, critical_structs: &rustc_hash::FxHashSet<TypeHash>) -> bool {
    match policy {
        TargetPolicy::Function => matches!(ty, Ty::Function { .. }),
        TargetPolicy::Struct => match ty.composite_name() {
            Some(name) => critical_structs.contains(&hash_struct_name(name)),
            None => false,
        },
    }
}

/// A target type, or a container a target could be reached through without
/// narrowing (the global-write classification and the argument/return
/// propagation gating — both ask this same question, not just `is_target`).
#[must_use]
pub fn is_flow_relevant(ty: &Ty, policy: TargetPolicy, critical_structs: &rustc_hash::FxHashSet<TypeHash>) -> bool {
    is_target(ty, policy, critical_structs) || ty.is_container()
}

/// The normalized byte-pointer representative type for a module.
///
/// All opaque pointer-element types within one module hash to this single
/// value so that casts through `i8*`-equivalents compare equal regardless
/// of which concrete opaque pointer syntax the host IR used.
#[must_use]
pub fn byte_pointer_type() -> Ty {
    Ty::OpaquePointer
}

#[must_use]
pub fn byte_pointer_hash() -> TypeHash {
    hash_type(&byte_pointer_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(bits: u32) -> Ty {
        Ty::Scalar(Scalar::Int(bits))
    }

    #[test]
    fn identical_shapes_hash_equal_regardless_of_name() {
        let a = Ty::Composite {
            name: Some("struct.foo".into()),
            fields: vec![int(32), int(64)],
        };
        let b = Ty::Composite {
            name: Some("struct.bar".into()),
            fields: vec![int(32), int(64)],
        };
        assert_eq!(hash_type(&a), hash_type(&b));
    }

    #[test]
    fn field_order_is_significant() {
        let a = Ty::Composite {
            name: None,
            fields: vec![int(32), int(64)],
        };
        let b = Ty::Composite {
            name: None,
            fields: vec![int(64), int(32)],
        };
        assert_ne!(hash_type(&a), hash_type(&b));
    }

    #[test]
    fn container_predicate() {
        assert!(is_container(&Ty::Composite {
            name: None,
            fields: vec![]
        }));
        assert!(is_container(&Ty::Array {
            elem: Box::new(Ty::Composite {
                name: None,
                fields: vec![]
            }),
            len: Some(4)
        }));
        assert!(!is_container(&int(32)));
    }

    #[test]
    fn byte_pointer_is_stable() {
        assert_eq!(byte_pointer_hash(), hash_type(&byte_pointer_type()));
    }
}
