//! Patch state detection.

use crate::{
    assembly::OpCode,
    module::{MethodId, Module},
    patch::{CURRENT_MARKER, LEGACY_MARKER, MARKERS},
};

/// Patch state of a module, read from the first instruction of its anchor routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum PatchState {
    /// No marker call
    #[strum(serialize = "unpatched")]
    Unpatched,
    /// The anchor calls the legacy bootstrap routine
    #[strum(serialize = "patched (legacy)")]
    LegacyPatch,
    /// The anchor calls the current bootstrap routine
    #[strum(serialize = "patched")]
    CurrentPatch,
}

impl PatchState {
    /// True for either patched state
    #[must_use]
    pub fn is_patched(self) -> bool {
        self != PatchState::Unpatched
    }
}

/// Marker name called by the first instruction of `method`, if any
#[must_use]
pub fn marker_call(module: &Module, method: MethodId) -> Option<&'static str> {
    let body = module.method(method)?.body.as_ref()?;
    let first = body.instructions.get(body.instructions.first()?)?;
    if first.opcode != OpCode::Call {
        return None;
    }

    let name = module.method_ref_simple_name(first.method()?)?;
    MARKERS.iter().copied().find(|marker| *marker == name)
}

/// Classify the anchor routine `anchor`.
///
/// Reads only the first instruction; the module is not modified.
#[must_use]
pub fn classify(module: &Module, anchor: MethodId) -> PatchState {
    match marker_call(module, anchor) {
        Some(CURRENT_MARKER) => PatchState::CurrentPatch,
        Some(LEGACY_MARKER) => PatchState::LegacyPatch,
        _ => PatchState::Unpatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Instruction,
        patch::{locate_anchor, PatchConfig},
        test::factories::{game_module, legacy_patched_module},
    };

    #[test]
    fn unpatched() {
        let module = game_module();
        let anchor = locate_anchor(&module, &PatchConfig::default()).unwrap();
        assert_eq!(classify(&module, anchor.method), PatchState::Unpatched);
        assert_eq!(classify(&module, anchor.method), PatchState::Unpatched);
        assert!(!PatchState::Unpatched.is_patched());
    }

    #[test]
    fn legacy() {
        let module = legacy_patched_module();
        let anchor = locate_anchor(&module, &PatchConfig::default()).unwrap();
        assert_eq!(classify(&module, anchor.method), PatchState::LegacyPatch);
        assert_eq!(PatchState::LegacyPatch.to_string(), "patched (legacy)");
    }

    #[test]
    fn marker_must_be_the_first_instruction() {
        let mut module = legacy_patched_module();
        let anchor = locate_anchor(&module, &PatchConfig::default()).unwrap();
        let body = module.method_mut(anchor.method).unwrap().body.as_mut().unwrap();
        body.instructions.push_front(Instruction::simple(OpCode::Nop));
        assert_eq!(classify(&module, anchor.method), PatchState::Unpatched);
    }
}
