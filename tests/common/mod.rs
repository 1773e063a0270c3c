//! Synthetic game and loader modules written to a temporary directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cilpatch::{
    assembly::{Body, Instruction, OpCode},
    metadata::method::MethodAttributes,
    module::{AssemblyName, MethodRefSpec, Module, ModuleBuilder, SigType, TypeName},
    Result,
};

pub const GAME: &str = "Assembly-CSharp.dll";
pub const LOADER: &str = "SRML2.dll";

fn ret() -> Body {
    let mut body = Body::new();
    body.instructions.push(Instruction::simple(OpCode::Ret));
    body
}

/// A game module whose `GameContext::Awake` body is `awake`.
pub fn game(awake: Body) -> Result<Module> {
    let mut builder = ModuleBuilder::new(GAME).assembly(AssemblyName::new("Assembly-CSharp"));
    builder.module_mut().core_library();
    for host in ["UnityEngine.Debug", "UnityEngine.Application"] {
        builder
            .module_mut()
            .import_type(&TypeName::new("UnityEngine", host))?;
    }

    let behaviour = TypeName::new("UnityEngine", "UnityEngine.MonoBehaviour");
    let ty = builder.class("GameContext", Some(&behaviour))?;
    builder.method(
        ty,
        "Awake",
        MethodAttributes::PRIVATE,
        SigType::Void,
        vec![],
        Some(awake),
    )?;
    Ok(builder.build())
}

/// The game module with an anchor body of `[ret]`
pub fn plain_game() -> Result<Module> {
    game(ret())
}

/// A game module whose anchor logs a line before returning
pub fn logging_game() -> Result<Module> {
    let log = MethodRefSpec::new_static(
        AssemblyName::new("UnityEngine"),
        "UnityEngine.Debug",
        "Log",
        SigType::Void,
        vec![SigType::Object],
    );
    let mut awake = Body::new();
    let ret = awake.instructions.push(Instruction::simple(OpCode::Ret));
    let call = awake.instructions.insert_before(ret, Instruction::call(log))?;
    awake
        .instructions
        .insert_before(call, Instruction::ldstr("GameContext awake"))?;
    game(awake)
}

/// `SRML2.dll` with `static void SRML2.Main::PreLoad()`
pub fn loader() -> Result<Module> {
    let mut builder = ModuleBuilder::new(LOADER)
        .assembly(AssemblyName::new("SRML2").with_version([1, 0, 0, 0]));
    let object = TypeName::new("mscorlib", "System.Object");
    let ty = builder.class("SRML2.Main", Some(&object))?;
    builder.method(
        ty,
        "PreLoad",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        SigType::Void,
        vec![],
        Some(ret()),
    )?;
    Ok(builder.build())
}

pub fn entry_point() -> MethodRefSpec {
    MethodRefSpec::new_static(
        AssemblyName::new("SRML2").with_version([1, 0, 0, 0]),
        "SRML2.Main",
        "PreLoad",
        SigType::Void,
        vec![],
    )
}

/// Write `game` and the loader into `dir`, returning the game's path
pub fn install_files(dir: &Path, mut game: Module) -> Result<PathBuf> {
    let path = dir.join(GAME);
    game.write(&path)?;
    loader()?.write(dir.join(LOADER))?;
    Ok(path)
}

/// Opcode mnemonics of routine `name` on `GameContext`
pub fn listing(module: &Module, name: &str) -> Vec<String> {
    let Some(ty) = module.find_type("GameContext") else {
        return Vec::new();
    };
    module
        .find_method(ty, name, |_| true)
        .and_then(|id| module.method(id))
        .and_then(|m| m.body.as_ref())
        .map(|body| {
            body.instructions
                .iter()
                .map(|(_, i)| i.opcode.to_string())
                .collect()
        })
        .unwrap_or_default()
}
