//! Installing and removing the patch on an in-memory module.

use crate::{
    assembly::Instruction,
    module::{MethodId, MethodRef, MethodRefSpec, Module},
    patch::{bootstrap::build_injected_routine, state::marker_call, Anchor, PatchConfig, MARKERS},
    Error, Result,
};

/// What [`strip_patch`] removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stripped {
    /// Marker calls removed from the head of the anchor routine
    pub marker_calls: usize,
    /// Bootstrap routines removed from the anchor type
    pub routines: usize,
    /// Reference rows left unused by the removed routines
    pub references: usize,
}

impl Stripped {
    /// True if nothing was removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marker_calls == 0 && self.routines == 0
    }
}

/// Remove every trace of a legacy or current patch.
///
/// Leading marker calls are removed from the anchor routine, then every routine of the anchor
/// type named after a marker. Reference rows imported for those routines are dropped once
/// nothing uses them. A module without a patch is left unchanged.
///
/// # Errors
/// Returns an error if the anchor routine disappeared or a removal would leave a dangling
/// branch target.
pub fn strip_patch(module: &mut Module, anchor: &Anchor) -> Result<Stripped> {
    let mut stripped = Stripped::default();

    while let Some(marker) = marker_call(module, anchor.method) {
        let body = module
            .method_mut(anchor.method)
            .and_then(|m| m.body.as_mut())
            .ok_or_else(|| Error::Uninstall("anchor routine has no body".to_string()))?;
        if let Some(first) = body.instructions.first() {
            body.instructions.remove(first)?;
        }
        log::debug!("Removed call to {}", marker);
        stripped.marker_calls += 1;
    }

    let routines: Vec<MethodId> = module
        .type_def(anchor.ty)
        .map(|ty| ty.methods.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|id| {
            module
                .method(*id)
                .is_some_and(|m| MARKERS.contains(&m.name.as_str()))
        })
        .collect();
    for id in routines {
        let method = module.remove_method(id)?;
        log::debug!("Removed routine {}", method.name);
        stripped.routines += 1;
    }

    if stripped.routines > 0 {
        stripped.references = module.trim_references();
    }

    if !stripped.is_empty() {
        log::info!(
            "Stripped {} marker call(s), {} routine(s) and {} reference row(s) from {}",
            stripped.marker_calls,
            stripped.routines,
            stripped.references,
            module.name()
        );
    }
    Ok(stripped)
}

/// Install the current patch: strip any earlier one, add the bootstrap routine and call it
/// from the head of the anchor routine.
///
/// # Errors
/// Returns an error if stripping or building the routine fails.
pub fn install_patch(
    module: &mut Module,
    anchor: &Anchor,
    entry_point: &MethodRefSpec,
    config: &PatchConfig,
) -> Result<MethodId> {
    strip_patch(module, anchor)?;
    let routine = build_injected_routine(module, anchor, entry_point, config)?;

    let body = module
        .method_mut(anchor.method)
        .and_then(|m| m.body.as_mut())
        .ok_or_else(|| Error::Error("anchor routine has no body".to_string()))?;
    body.instructions
        .push_front(Instruction::call(MethodRef::Def(routine)));
    Ok(routine)
}
