//! Small hand-built IR fixtures shared by the end-to-end scenario tests,
//! built entirely through the public `ir` types (no private crate access),
//! mirroring how a host adapter would populate them from a real IR.
#![allow(dead_code)]

use typm_callgraph::ir::{
    Call, Callee, Function, FunctionBody, Global, GlobalId, Guid, Initializer, Instr, MemoryEffect, Module, ModuleId,
    Scalar, Ty, ValueId,
};

pub fn int(bits: u32) -> Ty {
    Ty::Scalar(Scalar::Int(bits))
}

pub fn void_fn_ptr() -> Ty {
    Ty::Pointer(Box::new(Ty::Function {
        params: vec![],
        ret: Box::new(Ty::Scalar(Scalar::Void)),
    }))
}

pub fn ops_struct(name: &str) -> Ty {
    Ty::Composite {
        name: Some(name.into()),
        fields: vec![void_fn_ptr()],
    }
}

pub fn empty_fn(guid: Guid, name: &str, module: ModuleId, address_taken: bool, is_declaration: bool) -> Function {
    Function {
        guid,
        name: name.into(),
        module,
        params: vec![],
        ret: Ty::Scalar(Scalar::Void),
        is_declaration,
        address_taken,
        external_linkage: true,
        intrinsic: false,
        memory_effect: MemoryEffect::Unconstrained,
        body: if is_declaration { None } else { Some(FunctionBody::default()) },
    }
}

/// A function body with a single direct call to `target`.
pub fn direct_call_body(target: Guid) -> FunctionBody {
    FunctionBody {
        instrs: vec![Instr::Call(Call {
            callee: Callee::Direct(target),
            args: vec![],
            arg_tys: vec![],
            ret_ty: Ty::Scalar(Scalar::Void),
        })],
    }
}

/// A function body that loads a function pointer out of field 0 of
/// `container_ty` (addressed through argument 0) and calls through it.
pub fn indirect_dispatch_body(container_ty: Ty) -> FunctionBody {
    FunctionBody {
        instrs: vec![
            Instr::FieldAddr {
                base: ValueId::Argument(0),
                container_ty: container_ty.clone(),
                field_index: 0,
            },
            Instr::Load {
                ptr: ValueId::Instr(0),
                ty: void_fn_ptr(),
            },
            Instr::Call(Call {
                callee: Callee::Indirect(ValueId::Instr(1)),
                args: vec![],
                arg_tys: vec![],
                ret_ty: Ty::Scalar(Scalar::Void),
            }),
        ],
    }
}

/// A global of `container_ty` whose slot 0 is statically initialized to
/// `&target`.
pub fn ops_table_global(id: GlobalId, container_ty: Ty, target: Guid) -> Global {
    Global {
        id,
        name: "ops_table".into(),
        ty: container_ty,
        initializer: Some(Initializer::Composite(vec![Initializer::FunctionPointer(target)])),
    }
}

/// A global of raw function-pointer type holding `&target` directly, with
/// no wrapping struct or field.
pub fn fn_ptr_global(id: GlobalId, target: Guid) -> Global {
    Global {
        id,
        name: "fn_slot".into(),
        ty: void_fn_ptr(),
        initializer: Some(Initializer::FunctionPointer(target)),
    }
}

/// A function body that loads a function pointer directly out of `global`
/// (no intervening field addressing) and calls through it.
pub fn global_dispatch_body(global: GlobalId) -> FunctionBody {
    FunctionBody {
        instrs: vec![
            Instr::Load {
                ptr: ValueId::Global(global),
                ty: void_fn_ptr(),
            },
            Instr::Call(Call {
                callee: Callee::Indirect(ValueId::Instr(0)),
                args: vec![],
                arg_tys: vec![],
                ret_ty: Ty::Scalar(Scalar::Void),
            }),
        ],
    }
}

pub fn module(id: u32, name: &str, functions: Vec<Function>, globals: Vec<Global>) -> Module {
    Module {
        id: ModuleId(id),
        name: name.into(),
        functions,
        globals,
    }
}

/// Locate the recorded call site belonging to `caller`'s function body in
/// `module` — both direct and indirect calls now land in `CallGraph.sites`,
/// so a scenario with more than one call per module can no longer assume a
/// particular `CallSiteId` by construction.
pub fn find_call_site(graph: &typm_callgraph::CallGraph, caller: Guid, module: ModuleId) -> typm_callgraph::CallSiteId {
    graph
        .sites
        .iter()
        .position(|site| site.caller == caller && site.module == module)
        .map(|i| typm_callgraph::CallSiteId(i as u32))
        .expect("expected a recorded call site for this caller/module")
}
