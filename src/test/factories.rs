//! Factories for the modules the tests patch.
//!
//! Every factory returns its module the way it reads back from disk, so a module compares
//! equal to the result of writing and loading it again.

use crate::{
    assembly::{Body, Instruction, OpCode},
    metadata::{
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{encode_method_signature, SignatureMethod, TypeSignature},
    },
    module::{
        AssemblyName, MethodDef, MethodRef, MethodRefSpec, Module, ModuleBuilder, SigType,
        TypeName, TYPE_STATIC_CLASS,
    },
    patch::LEGACY_MARKER,
};

pub const ANCHOR_TYPE: &str = "GameContext";
pub const ANCHOR_METHOD: &str = "Awake";
pub const ENTRY_TYPE: &str = "SRML2.Main";
pub const ENTRY_METHOD: &str = "PreLoad";

const UNITY: &str = "UnityEngine";

fn reload(mut module: Module) -> Module {
    let image = module.to_bytes().unwrap();
    Module::from_mem(image).unwrap()
}

fn unity_call(type_name: &str, name: &str, params: Vec<SigType>) -> MethodRefSpec {
    MethodRefSpec::new_static(AssemblyName::new(UNITY), type_name, name, SigType::Void, params)
}

fn game(awake: Body, host_types: bool) -> Module {
    let mut builder = ModuleBuilder::new("Assembly-CSharp.dll")
        .assembly(AssemblyName::new("Assembly-CSharp"))
        .mvid(uguid::guid!("6f1f2a8e-3c55-4b7a-9d0e-21c4b5e8a913"));
    builder.module_mut().core_library();

    if host_types {
        for host in ["UnityEngine.Debug", "UnityEngine.Application"] {
            builder
                .module_mut()
                .import_type(&TypeName::new(UNITY, host))
                .unwrap();
        }
    }
    let behaviour = TypeName::new(UNITY, "UnityEngine.MonoBehaviour");
    let ty = builder.class(ANCHOR_TYPE, Some(&behaviour)).unwrap();

    let mut base_ctor = MethodRefSpec::new_static(
        AssemblyName::new(UNITY),
        "UnityEngine.MonoBehaviour",
        ".ctor",
        SigType::Void,
        vec![],
    );
    base_ctor.has_this = true;
    let mut ctor = Body::new();
    ctor.instructions.push(Instruction::simple(OpCode::Ldarg0));
    ctor.instructions.push(Instruction::call(base_ctor));
    ctor.instructions.push(Instruction::simple(OpCode::Ret));
    builder
        .method(
            ty,
            ".ctor",
            MethodAttributes::PUBLIC
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RTSPECIAL_NAME,
            SigType::Void,
            vec![],
            Some(ctor),
        )
        .unwrap();

    builder
        .method(
            ty,
            ANCHOR_METHOD,
            MethodAttributes::PRIVATE,
            SigType::Void,
            vec![],
            Some(awake),
        )
        .unwrap();

    reload(builder.build())
}

/// `Assembly-CSharp.dll`: `GameContext::Awake` logs a message, and the module references
/// `UnityEngine.Debug` and `UnityEngine.Application`
pub fn game_module() -> Module {
    let mut awake = Body::new();
    awake.instructions.push(Instruction::ldstr("GameContext awake"));
    awake.instructions.push(Instruction::call(unity_call(
        "UnityEngine.Debug",
        "Log",
        vec![SigType::Object],
    )));
    awake.instructions.push(Instruction::simple(OpCode::Ret));
    game(awake, true)
}

/// Like [`game_module`], with an anchor body of a single `ret`
pub fn plain_anchor_module() -> Module {
    let mut awake = Body::new();
    awake.instructions.push(Instruction::simple(OpCode::Ret));
    game(awake, true)
}

/// An anchor body of a single `ret` in a module referencing neither host type
pub fn module_without_host_types() -> Module {
    let mut awake = Body::new();
    awake.instructions.push(Instruction::simple(OpCode::Ret));
    game(awake, false)
}

/// [`game_module`] as an earlier release patched it: a static `LoadSRML2` on the anchor type,
/// called by the first instruction of the anchor
pub fn legacy_patched_module() -> Module {
    let mut module = game_module();
    let ty = module.find_type(ANCHOR_TYPE).unwrap();

    let mut body = Body::new();
    body.instructions.push(Instruction::call(entry_point()));
    body.instructions.push(Instruction::simple(OpCode::Ret));
    let signature =
        encode_method_signature(&SignatureMethod::new_static(TypeSignature::Void, vec![])).unwrap();
    let legacy = module
        .add_method(
            ty,
            MethodDef {
                flags: MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                impl_flags: MethodImplAttributes::empty(),
                name: LEGACY_MARKER.to_string(),
                signature,
                params: vec![],
                body: Some(body),
                rva: 0,
            },
        )
        .unwrap();

    let awake = module.find_method(ty, ANCHOR_METHOD, |_| true).unwrap();
    let awake = module.method_mut(awake).unwrap().body.as_mut().unwrap();
    awake
        .instructions
        .push_front(Instruction::call(MethodRef::Def(legacy)));
    reload(module)
}

/// `SRML2.dll`: static class `SRML2.Main` with `static void PreLoad()`
pub fn loader_module() -> Module {
    let mut builder = ModuleBuilder::new("SRML2.dll")
        .assembly(AssemblyName::new("SRML2").with_version([1, 0, 0, 0]))
        .mvid(uguid::guid!("0b6d3f1c-8e27-4f9a-a5c2-7d41e9b0c356"));
    builder.module_mut().core_library();

    let object = TypeName::new("mscorlib", "System.Object");
    let ty = builder
        .add_type(ENTRY_TYPE, TYPE_STATIC_CLASS, Some(&object))
        .unwrap();
    let mut body = Body::new();
    body.instructions.push(Instruction::simple(OpCode::Ret));
    builder
        .method(
            ty,
            ENTRY_METHOD,
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            SigType::Void,
            vec![],
            Some(body),
        )
        .unwrap();

    reload(builder.build())
}

/// `void [SRML2]SRML2.Main::PreLoad()`
pub fn entry_point() -> MethodRefSpec {
    MethodRefSpec::new_static(
        AssemblyName::new("SRML2").with_version([1, 0, 0, 0]),
        ENTRY_TYPE,
        ENTRY_METHOD,
        SigType::Void,
        vec![],
    )
}
