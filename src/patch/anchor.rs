//! Locating the anchor routine and the entry point.

use crate::{
    module::{MethodId, MethodRefSpec, Module, TypeId},
    patch::PatchConfig,
    Error, Result,
};

/// The anchor routine and the type declaring it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    /// Declaring type
    pub ty: TypeId,
    /// The routine whose first instruction carries the patch marker
    pub method: MethodId,
}

/// Find the anchor routine named by `config`.
///
/// The first routine of the anchor type with the anchor name and a body is selected.
///
/// # Errors
/// Returns [`Error::TargetNotFound`] if the type or the routine is absent.
pub fn locate_anchor(module: &Module, config: &PatchConfig) -> Result<Anchor> {
    let Some(ty) = module.find_type(&config.anchor_type) else {
        return Err(Error::TargetNotFound {
            type_name: config.anchor_type.clone(),
            method: None,
        });
    };

    let Some(method) = module.find_method(ty, &config.anchor_method, |m| m.body.is_some()) else {
        return Err(Error::TargetNotFound {
            type_name: config.anchor_type.clone(),
            method: Some(config.anchor_method.clone()),
        });
    };

    log::debug!(
        "Anchor {}::{} found in {}",
        config.anchor_type,
        config.anchor_method,
        module.name()
    );
    Ok(Anchor { ty, method })
}

/// Describe routine `method` of type `type_name` in `module` as a cross-module reference.
///
/// # Errors
/// Returns [`Error::TargetNotFound`] if the routine does not exist, or
/// [`Error::NotSupported`] if its signature can not be described symbolically.
pub fn resolve_entry_point(module: &Module, type_name: &str, method: &str) -> Result<MethodRefSpec> {
    let not_found = |method: Option<&str>| Error::TargetNotFound {
        type_name: type_name.to_string(),
        method: method.map(str::to_string),
    };

    let ty = module.find_type(type_name).ok_or_else(|| not_found(None))?;
    let id = module
        .find_method(ty, method, |m| m.flags.is_static())
        .ok_or_else(|| not_found(Some(method)))?;
    module.method_ref_spec(ty, id)
}
