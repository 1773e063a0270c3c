//! End to end patch, upgrade and uninstall of modules on disk.

mod common;

use std::{fs, path::Path};

use cilpatch::{
    assembly::OpCode,
    metadata::tables::TableId,
    module::{Cell, MethodRef, RetainedRow, RowRef},
    patch::{
        classify, locate_anchor, PatchConfig, PatchState, Patcher, UninstallPath, CURRENT_MARKER,
    },
    Error, Module, Result,
};
use tempfile::tempdir;

fn yes(_: &Path) -> bool {
    true
}

fn no(_: &Path) -> bool {
    false
}

fn open(path: &Path) -> Result<Patcher> {
    Patcher::open(path, common::entry_point(), PatchConfig::default())
}

#[test]
fn patched_anchor_calls_the_bootstrap_routine() -> Result<()> {
    let dir = tempdir()?;
    let path = common::install_files(dir.path(), common::plain_game()?)?;

    let mut patcher = open(&path)?;
    assert_eq!(patcher.state(), PatchState::Unpatched);
    patcher.patch()?;
    patcher.save(&mut yes)?;

    let module = Module::from_path(&path)?;
    let anchor = locate_anchor(&module, &PatchConfig::default())?;
    assert_eq!(classify(&module, anchor.method), PatchState::CurrentPatch);

    let body = module.method(anchor.method).unwrap().body.as_ref().unwrap();
    let first = body.instructions.get(body.instructions.first().unwrap()).unwrap();
    assert_eq!(first.opcode, OpCode::Call);
    let MethodRef::Def(routine) = first.method().unwrap() else {
        panic!("anchor calls {:?}", first.method());
    };
    assert_eq!(module.method(*routine).unwrap().name, CURRENT_MARKER);
    assert_eq!(common::listing(&module, "Awake"), ["call", "ret"]);

    let backup = dir.path().join("Assembly-CSharp_old.dll");
    assert!(backup.exists());
    assert!(!dir.path().join("Assembly-CSharp_patched.dll").exists());
    Ok(())
}

#[test]
fn patched_image_keeps_sections_and_attributes() -> Result<()> {
    let dir = tempdir()?;
    let mut game = common::plain_game()?;
    let anchor = game.find_type("GameContext").unwrap();
    let awake = game.find_method(anchor, "Awake", |_| true).unwrap();
    let attribute = RetainedRow(vec![
        Cell::Ref(RowRef::Token(anchor.token())),
        Cell::Ref(RowRef::Method(awake)),
        Cell::Blob(vec![1, 0, 0, 0]),
    ]);
    game.add_retained(TableId::CustomAttribute, attribute.clone())?;
    let path = common::install_files(dir.path(), game)?;
    let before = goblin::pe::PE::parse(&fs::read(&path)?)?.sections.len();

    let mut patcher = open(&path)?;
    patcher.patch()?;
    patcher.save(&mut yes)?;

    let data = fs::read(&path)?;
    let pe = goblin::pe::PE::parse(&data)?;
    assert_eq!(pe.sections.len(), before);
    assert_eq!(&pe.sections[0].name[..5], b".text");
    assert_eq!(&pe.sections[before - 1].name, b".cilmeta");

    let module = Module::from_path(&path)?;
    assert_eq!(module.retained(TableId::CustomAttribute), &[attribute]);
    Ok(())
}

#[test]
fn uninstall_from_backup_restores_bytes() -> Result<()> {
    let dir = tempdir()?;
    let path = common::install_files(dir.path(), common::logging_game()?)?;
    let clean = fs::read(&path)?;

    let mut patcher = open(&path)?;
    patcher.patch()?;
    patcher.save(&mut yes)?;
    assert_ne!(fs::read(&path)?, clean);

    let patcher = open(&path)?;
    assert!(patcher.has_backup());
    assert_eq!(patcher.uninstall(&mut no)?, UninstallPath::Backup);

    assert_eq!(fs::read(&path)?, clean);
    assert!(!dir.path().join("Assembly-CSharp_old.dll").exists());
    Ok(())
}

#[test]
fn forceful_uninstall_restores_code() -> Result<()> {
    let dir = tempdir()?;
    let path = common::install_files(dir.path(), common::logging_game()?)?;
    let clean = Module::from_path(&path)?;

    let mut patcher = open(&path)?;
    patcher.patch()?;
    patcher.save(&mut yes)?;
    fs::remove_file(dir.path().join("Assembly-CSharp_old.dll"))?;

    let patcher = open(&path)?;
    assert_eq!(patcher.uninstall(&mut yes)?, UninstallPath::Forceful);

    let restored = Module::from_path(&path)?;
    let anchor = locate_anchor(&restored, &PatchConfig::default())?;
    assert_eq!(classify(&restored, anchor.method), PatchState::Unpatched);
    assert_eq!(restored.methods().count(), clean.methods().count());
    for ((_, before), (_, after)) in clean.methods().zip(restored.methods()) {
        assert_eq!(before.name, after.name);
        assert_eq!(before.signature, after.signature);
        assert_eq!(before.body, after.body);
    }
    assert_eq!(restored.type_refs(), clean.type_refs());
    assert_eq!(restored.member_refs(), clean.member_refs());
    assert_eq!(restored.assembly_refs(), clean.assembly_refs());
    Ok(())
}

#[test]
fn legacy_patch_is_upgraded() -> Result<()> {
    let dir = tempdir()?;
    let path = common::install_files(dir.path(), common::plain_game()?)?;

    // install once, then rename the routine the way earlier releases named it
    let mut module = Module::from_path(&path)?;
    let config = PatchConfig::default();
    let anchor = locate_anchor(&module, &config)?;
    let routine =
        cilpatch::patch::install_patch(&mut module, &anchor, &common::entry_point(), &config)?;
    module.method_mut(routine).unwrap().name = cilpatch::patch::LEGACY_MARKER.to_string();
    module.write(&path)?;

    let mut patcher = open(&path)?;
    assert_eq!(patcher.state(), PatchState::LegacyPatch);
    assert_eq!(patcher.patch()?, PatchState::LegacyPatch);
    patcher.save(&mut yes)?;

    let module = Module::from_path(&path)?;
    let anchor = locate_anchor(&module, &config)?;
    assert_eq!(classify(&module, anchor.method), PatchState::CurrentPatch);
    assert_eq!(common::listing(&module, "Awake"), ["call", "ret"]);
    assert!(common::listing(&module, cilpatch::patch::LEGACY_MARKER).is_empty());
    let routines = module
        .type_def(anchor.ty)
        .unwrap()
        .methods
        .iter()
        .filter(|id| module.method(**id).unwrap().name == CURRENT_MARKER)
        .count();
    assert_eq!(routines, 1);
    Ok(())
}

#[test]
fn declined_collision_leaves_files_alone() -> Result<()> {
    let dir = tempdir()?;
    let path = common::install_files(dir.path(), common::plain_game()?)?;
    let patched = dir.path().join("Assembly-CSharp_patched.dll");
    let backup = dir.path().join("Assembly-CSharp_old.dll");
    fs::write(&patched, b"left over")?;
    fs::write(&backup, b"older backup")?;
    let original = fs::read(&path)?;

    let mut patcher = open(&path)?;
    patcher.patch()?;
    let err = patcher.save(&mut no).unwrap_err();
    assert!(matches!(err, Error::Collision(_)));

    assert_eq!(fs::read(&path)?, original);
    assert_eq!(fs::read(&patched)?, b"left over");
    assert_eq!(fs::read(&backup)?, b"older backup");
    Ok(())
}

#[test]
fn missing_host_type_is_reported() -> Result<()> {
    let mut builder = cilpatch::module::ModuleBuilder::new(common::GAME);
    let ty = builder.class("GameContext", None)?;
    let mut body = cilpatch::assembly::Body::new();
    body.instructions
        .push(cilpatch::assembly::Instruction::simple(OpCode::Ret));
    builder.method(
        ty,
        "Awake",
        cilpatch::metadata::method::MethodAttributes::PRIVATE,
        cilpatch::module::SigType::Void,
        vec![],
        Some(body),
    )?;

    let mut patcher = Patcher::new(
        builder.build(),
        common::GAME,
        common::entry_point(),
        PatchConfig::default(),
    )?;
    let err = patcher.patch().unwrap_err();
    assert_eq!(err.to_string(), "Couldn't find UnityEngine.Debug!");
    assert_eq!(patcher.state(), PatchState::Unpatched);
    Ok(())
}
