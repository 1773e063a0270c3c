//! Structural integrity of edited instruction streams.

mod common;

use cilpatch::{
    assembly::{Body, ExceptionRegion, Instruction, OpCode, RegionKind},
    module::{MethodRef, Module},
    patch::{
        build_injected_routine, classify, install_patch, locate_anchor, strip_patch,
        LoadFailurePolicy, PatchConfig, PatchState, LEGACY_MARKER,
    },
    Result,
};

fn assert_intact(module: &Module) {
    for (id, method) in module.methods() {
        let Some(body) = method.body.as_ref() else {
            continue;
        };
        body.instructions
            .validate()
            .unwrap_or_else(|e| panic!("{} ({id:?}): {e}", method.name));

        for (_, instruction) in body.instructions.iter() {
            for target in instruction.targets() {
                assert!(body.instructions.get(target).is_some());
            }
        }
        for region in body.instructions.regions() {
            for boundary in region.boundaries() {
                assert!(body.instructions.position(boundary).is_some());
            }
        }
    }
}

#[test]
fn bootstrap_routine_is_well_formed() -> Result<()> {
    for policy in [LoadFailurePolicy::Continue, LoadFailurePolicy::Abort] {
        let mut module = common::logging_game()?;
        let config = PatchConfig {
            load_failure: policy,
            ..PatchConfig::default()
        };
        let anchor = locate_anchor(&module, &config)?;
        let routine =
            build_injected_routine(&mut module, &anchor, &common::entry_point(), &config)?;
        assert_intact(&module);

        let reloaded = Module::from_mem(module.to_bytes()?)?;
        assert_intact(&reloaded);

        let body = reloaded.method(routine).unwrap().body.as_ref().unwrap();
        let expected = match policy {
            LoadFailurePolicy::Continue => 2,
            LoadFailurePolicy::Abort => 1,
        };
        assert_eq!(body.instructions.regions().len(), expected);
        assert!(body
            .instructions
            .regions()
            .iter()
            .all(|r| matches!(r.kind, RegionKind::Catch(_))));
        assert_eq!(body.local_types().len(), 2);
    }
    Ok(())
}

#[test]
fn patching_classifies_as_current() -> Result<()> {
    let mut module = common::plain_game()?;
    let config = PatchConfig::default();
    let anchor = locate_anchor(&module, &config)?;
    let routine = install_patch(&mut module, &anchor, &common::entry_point(), &config)?;

    assert_eq!(classify(&module, anchor.method), PatchState::CurrentPatch);
    let body = module.method(anchor.method).unwrap().body.as_ref().unwrap();
    let first = body.instructions.get(body.instructions.first().unwrap()).unwrap();
    // the anchor calls the generated routine, never the entry point itself
    assert_eq!(first.method(), Some(&MethodRef::Def(routine)));
    assert_intact(&module);
    Ok(())
}

#[test]
fn stripping_a_legacy_marker_leaves_ret() -> Result<()> {
    let mut module = common::plain_game()?;
    let config = PatchConfig::default();
    let anchor = locate_anchor(&module, &config)?;

    // a copy of the anchor stands in for the legacy routine
    let mut legacy = module.method(anchor.method).unwrap().clone();
    legacy.name = LEGACY_MARKER.to_string();
    let legacy = module.add_method(anchor.ty, legacy)?;
    let body = module.method_mut(anchor.method).unwrap().body.as_mut().unwrap();
    body.instructions
        .push_front(Instruction::call(MethodRef::Def(legacy)));
    assert_eq!(classify(&module, anchor.method), PatchState::LegacyPatch);

    let stripped = strip_patch(&mut module, &anchor)?;
    assert_eq!((stripped.marker_calls, stripped.routines), (1, 1));
    assert_eq!(common::listing(&module, "Awake"), ["ret"]);
    assert!(module.method(legacy).is_none());
    assert_intact(&module);
    Ok(())
}

#[test]
fn strip_without_patch_changes_nothing() -> Result<()> {
    let mut module = common::logging_game()?;
    let before = module.clone();
    let anchor = locate_anchor(&module, &PatchConfig::default())?;
    assert!(strip_patch(&mut module, &anchor)?.is_empty());
    assert_eq!(module, before);
    assert_eq!(module.to_bytes()?, before.clone().to_bytes()?);
    Ok(())
}

#[test]
fn branch_into_removed_instruction_moves_forward() -> Result<()> {
    let mut module = common::logging_game()?;
    let anchor = locate_anchor(&module, &PatchConfig::default())?;
    let body = module.method_mut(anchor.method).unwrap().body.as_mut().unwrap();

    let nop = body.instructions.push_front(Instruction::simple(OpCode::Nop));
    let ret = body.instructions.last().unwrap();
    body.instructions
        .insert_before(nop, Instruction::branch(OpCode::BrS, nop))?;
    body.instructions.remove(nop)?;

    let first = body.instructions.first().unwrap();
    let branch = body.instructions.get(first).unwrap();
    assert_eq!(branch.opcode, OpCode::BrS);
    assert_ne!(branch.targets()[0], ret);
    assert_eq!(body.instructions.position(branch.targets()[0]), Some(1));
    assert_intact(&module);
    Ok(())
}

/// `try { nop } finally { nop }` opening the body
fn guarded_anchor() -> Result<Body> {
    let mut awake = Body::new();
    let try_start = awake.instructions.push(Instruction::simple(OpCode::Nop));
    let ret = awake.instructions.push(Instruction::simple(OpCode::Ret));
    let leave = awake
        .instructions
        .insert_before(ret, Instruction::branch(OpCode::LeaveS, ret))?;
    let handler = awake
        .instructions
        .insert_before(ret, Instruction::simple(OpCode::Nop))?;
    let end = awake
        .instructions
        .insert_before(ret, Instruction::simple(OpCode::Endfinally))?;
    awake.instructions.add_region(ExceptionRegion {
        kind: RegionKind::Finally,
        try_start,
        try_end: leave,
        handler_start: handler,
        handler_end: end,
    })?;
    Ok(awake)
}

/// A loop whose back edge targets the first instruction
fn looping_anchor() -> Result<Body> {
    let mut awake = Body::new();
    let head = awake.instructions.push(Instruction::simple(OpCode::Nop));
    let ret = awake.instructions.push(Instruction::simple(OpCode::Ret));
    awake
        .instructions
        .insert_before(ret, Instruction::simple(OpCode::LdcI40))?;
    awake
        .instructions
        .insert_before(ret, Instruction::branch(OpCode::BrtrueS, head))?;
    Ok(awake)
}

#[test]
fn patch_and_strip_leave_regions_and_back_edges_alone() -> Result<()> {
    let config = PatchConfig::default();
    for awake in [guarded_anchor()?, looping_anchor()?] {
        let original = Module::from_mem(common::game(awake)?.to_bytes()?)?;
        let anchor = locate_anchor(&original, &config)?;
        let before = original.method(anchor.method).unwrap().body.clone().unwrap();

        let mut module = original.clone();
        install_patch(&mut module, &anchor, &common::entry_point(), &config)?;
        assert_intact(&module);
        let body = module.method(anchor.method).unwrap().body.as_ref().unwrap();
        let call = body.instructions.first().unwrap();
        // the marker call stays outside the anchor's own region and loop
        for region in body.instructions.regions() {
            assert_ne!(region.try_start, call);
        }
        for (_, instruction) in body.instructions.iter() {
            assert!(!instruction.targets().contains(&call));
        }

        let mut patched = Module::from_mem(module.to_bytes()?)?;
        assert_intact(&patched);
        let anchor = locate_anchor(&patched, &config)?;
        assert_eq!(classify(&patched, anchor.method), PatchState::CurrentPatch);

        strip_patch(&mut patched, &anchor)?;
        assert_intact(&patched);
        let restored = Module::from_mem(patched.to_bytes()?)?;
        let anchor = locate_anchor(&restored, &config)?;
        assert_eq!(classify(&restored, anchor.method), PatchState::Unpatched);
        assert_eq!(
            restored.method(anchor.method).unwrap().body.as_ref(),
            Some(&before)
        );
        assert_intact(&restored);
    }
    Ok(())
}
