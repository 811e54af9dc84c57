//! The IR data model the core consumes.
//!
//! Loading real bitcode or textual LLVM IR into this shape is an external
//! collaborator's job; this module only defines the
//! shape. A host adapter walks its own IR once and produces [`Module`]
//! values, after which nothing downstream needs to know where they came
//! from.

use std::fmt;

/// A function's stable identity, derived from its linkage name.
///
/// Two [`Function`]s across different [`Module`]s with the same `Guid`
/// are the same symbol (a declaration and its definition, typically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(pub u64);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "guid:{:016x}", self.0)
    }
}

/// Index of a [`Module`] within the set the driver was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleId(pub u32);

/// Index of a [`Global`] within its owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub ModuleId, pub u32);

/// A scalar leaf of a type tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Void,
    Int(u32),
    Float(u32),
}

/// A structural type tree.
///
/// Composite field order is significant to the structural hash (see
/// [`crate::hash`]); composite *names* are not — `name` is carried only so
/// that struct-mode [`crate::config::TargetPolicy::Struct`] can match
/// against the configured critical-structure list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Scalar(Scalar),
    /// A pointer with a known pointee.
    Pointer(Box<Ty>),
    /// A pointer whose pointee is unknown/opaque (`i8*`-style byte pointer),
    /// normalized per-module to a single representative by the program
    /// index.
    OpaquePointer,
    Function {
        params: Vec<Ty>,
        ret: Box<Ty>,
    },
    Composite {
        name: Option<String>,
        fields: Vec<Ty>,
    },
    Array {
        elem: Box<Ty>,
        len: Option<u64>,
    },
}

impl Ty {
    /// A composite, or an array whose element is (transitively) a container.
    #[must_use]
    pub fn is_container(&self) -> bool {
        match self {
            Ty::Composite { .. } => true,
            Ty::Array { elem, .. } => elem.is_container(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_composite_fields(&self) -> Option<&[Ty]> {
        match self {
            Ty::Composite { fields, .. } => Some(fields),
            _ => None,
        }
    }

    #[must_use]
    pub fn composite_name(&self) -> Option<&str> {
        match self {
            Ty::Composite { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

/// How a function's body may touch memory, for the argument/return
/// propagation gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEffect {
    ReadsOnly,
    WritesOnly,
    NoMemoryAccess,
    Unconstrained,
}

/// A local value within a function body.
///
/// Values are addressed by where they originate rather than through a
/// side-table: an instruction's own position in [`FunctionBody::instrs`] is
/// its value id, so climbing a def-use chain is an O(1) index, not a hash
/// lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueId {
    /// The `n`th formal parameter.
    Argument(u32),
    /// The result produced by `instrs[n]`.
    Instr(u32),
    /// A reference to a global variable.
    Global(GlobalId),
    /// The literal address of a function (`&f`), as used when a function
    /// pointer is stored into a composite field.
    Function(Guid),
    /// Any other constant (integer literal, null, undef, ...); opaque.
    Constant,
}

#[derive(Debug, Clone)]
pub enum Callee {
    Direct(Guid),
    Indirect(ValueId),
    InlineAsm,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<ValueId>,
    pub arg_tys: Vec<Ty>,
    pub ret_ty: Ty,
}

/// One instruction in a function body.
///
/// This is deliberately flat (no basic blocks): nothing in MLTA or TyPM
/// needs control flow, only def-use chains and the full set of
/// instructions of each kind in the function.
#[derive(Debug, Clone)]
pub enum Instr {
    Load {
        ptr: ValueId,
        ty: Ty,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
        ty: Ty,
    },
    /// A `getelementptr`-style field-addressing operation.
    FieldAddr {
        base: ValueId,
        container_ty: Ty,
        field_index: u32,
    },
    Cast {
        operand: ValueId,
        from_ty: Ty,
        to_ty: Ty,
    },
    Alloc {
        ty: Ty,
    },
    Call(Call),
    Return {
        value: Option<ValueId>,
    },
    /// A call through inline assembly: opaque, contributes no constraint.
    InlineAsm,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionBody {
    pub instrs: Vec<Instr>,
}

impl FunctionBody {
    /// Best-effort recovery of a value's declared type from where it's
    /// produced: the formal parameter list for an argument, or the
    /// producing instruction for a local value. Falls back to an opaque
    /// pointer type when the value is a global, a literal function
    /// address, a constant, or an instruction kind with no naturally
    /// associated result type — the same fallback the rest of the core
    /// uses for any other escape (the escape policy never loses
    /// soundness, only precision).
    #[must_use]
    pub fn value_type(&self, params: &[Ty], value: ValueId) -> Ty {
        match value {
            ValueId::Argument(n) => params.get(n as usize).cloned().unwrap_or(Ty::OpaquePointer),
            ValueId::Instr(i) => match self.instrs.get(i as usize) {
                Some(Instr::Load { ty, .. }) => ty.clone(),
                Some(Instr::Cast { to_ty, .. }) => to_ty.clone(),
                Some(Instr::Alloc { ty }) => Ty::Pointer(Box::new(ty.clone())),
                Some(Instr::Call(call)) => call.ret_ty.clone(),
                Some(Instr::FieldAddr { container_ty, field_index, .. }) => container_ty
                    .as_composite_fields()
                    .and_then(|fields| fields.get(*field_index as usize))
                    .cloned()
                    .unwrap_or(Ty::OpaquePointer),
                _ => Ty::OpaquePointer,
            },
            ValueId::Global(_) | ValueId::Function(_) | ValueId::Constant => Ty::OpaquePointer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub guid: Guid,
    pub name: String,
    pub module: ModuleId,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_declaration: bool,
    pub address_taken: bool,
    pub external_linkage: bool,
    pub intrinsic: bool,
    pub memory_effect: MemoryEffect,
    /// `None` for pure declarations (no body to scan).
    pub body: Option<FunctionBody>,
}

impl Function {
    #[must_use]
    pub fn signature(&self) -> Ty {
        Ty::Function {
            params: self.params.clone(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

/// A literal value tree stored into a global's initializer.
#[derive(Debug, Clone)]
pub enum Initializer {
    FunctionPointer(Guid),
    Composite(Vec<Initializer>),
    Cast {
        to_ty: Ty,
        from_ty: Ty,
        inner: Box<Initializer>,
    },
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub id: GlobalId,
    pub name: String,
    pub ty: Ty,
    pub initializer: Option<Initializer>,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    #[must_use]
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }
}
