//! The [`Patcher`] front end tying the patch components together.

use std::path::{Path, PathBuf};

use crate::{
    module::{MethodRefSpec, Module},
    patch::{
        classify, locate_anchor,
        persist::{commit, Confirm, PatchPaths},
        revision::{install_patch, strip_patch, Stripped},
        uninstall::{uninstall, UninstallPath},
        Anchor, PatchConfig, PatchState,
    },
    Error, Result,
};

/// A module opened for patching.
///
/// The module is loaded once and its anchor located up front; every operation after that works
/// on the in-memory model until [`Patcher::save`] or [`Patcher::uninstall`] consumes it.
///
/// # Example
///
/// ```rust,no_run
/// use cilpatch::{
///     module::{AssemblyName, MethodRefSpec, SigType},
///     patch::{PatchConfig, Patcher},
/// };
///
/// let entry = MethodRefSpec::new_static(
///     AssemblyName::new("SRML2"), "SRML2.Main", "PreLoad", SigType::Void, vec![]);
/// let mut patcher = Patcher::open("Managed/Assembly-CSharp.dll", entry, PatchConfig::default())?;
/// println!("{}", patcher.state());
/// patcher.patch()?;
/// patcher.save(&mut |path: &std::path::Path| {
///     println!("removing {}", path.display());
///     true
/// })?;
/// # Ok::<(), cilpatch::Error>(())
/// ```
#[derive(Debug)]
pub struct Patcher {
    module: Module,
    anchor: Anchor,
    entry_point: MethodRefSpec,
    config: PatchConfig,
    paths: PatchPaths,
}

impl Patcher {
    /// Load the module at `path` and locate its anchor.
    ///
    /// If the assembly declaring `entry_point` can be found next to the module, the entry point
    /// must exist in it; an assembly that can not be found is only reported.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the module can not be loaded and [`Error::TargetNotFound`] if
    /// the anchor or the entry point is missing.
    pub fn open(
        path: impl AsRef<Path>,
        entry_point: MethodRefSpec,
        config: PatchConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut module = Module::from_path(path)?;
        check_entry_point(&mut module, &entry_point)?;
        Self::new(module, path, entry_point, config)
    }

    /// Wrap an already loaded `module` that lives at `path`.
    ///
    /// # Errors
    /// Returns [`Error::TargetNotFound`] if the anchor is missing.
    pub fn new(
        module: Module,
        path: impl Into<PathBuf>,
        entry_point: MethodRefSpec,
        config: PatchConfig,
    ) -> Result<Self> {
        let anchor = locate_anchor(&module, &config)?;
        let paths = PatchPaths::new(path, &config);
        Ok(Patcher {
            module,
            anchor,
            entry_point,
            config,
            paths,
        })
    }

    /// Current patch state of the anchor routine
    #[must_use]
    pub fn state(&self) -> PatchState {
        classify(&self.module, self.anchor.method)
    }

    /// True if a legacy or current patch is installed
    #[must_use]
    pub fn is_patched(&self) -> bool {
        self.state().is_patched()
    }

    /// Install the current patch, replacing any earlier one, and return the previous state.
    ///
    /// # Errors
    /// Returns [`Error::MissingDependencyType`] if the host log or terminate type is not
    /// referenced, or an error from importing the entry point.
    pub fn patch(&mut self) -> Result<PatchState> {
        let previous = self.state();
        install_patch(&mut self.module, &self.anchor, &self.entry_point, &self.config)?;
        self.module.resolve_references()?;
        log::info!("Patched {} (was {})", self.module.name(), previous);
        Ok(previous)
    }

    /// Remove any installed patch from the in-memory module.
    ///
    /// # Errors
    /// Returns an error if a removal would leave a dangling reference.
    pub fn unpatch(&mut self) -> Result<Stripped> {
        strip_patch(&mut self.module, &self.anchor)
    }

    /// Commit the module over the original file, keeping a backup.
    ///
    /// # Errors
    /// Returns [`Error::Collision`] if a stale file may not be deleted, or any write error.
    pub fn save(mut self, confirm: &mut dyn Confirm) -> Result<()> {
        commit(&mut self.module, &self.paths, confirm)
    }

    /// Remove the patch from the file on disk, from the backup if one exists.
    ///
    /// # Errors
    /// Returns [`Error::Uninstall`] if the forceful path is refused, or any load or write error.
    pub fn uninstall(mut self, confirm: &mut dyn Confirm) -> Result<UninstallPath> {
        let path = uninstall(&mut self.module, &self.paths, &self.config, confirm)?;
        log::info!("Uninstalled from {} ({} path)", self.paths.original.display(), path);
        Ok(path)
    }

    /// The module being patched
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The module being patched, for further edits
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// The anchor routine
    #[must_use]
    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// The configuration in use
    #[must_use]
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// The file names a save or uninstall works with
    #[must_use]
    pub fn paths(&self) -> &PatchPaths {
        &self.paths
    }

    /// True if a backup from an earlier save exists
    #[must_use]
    pub fn has_backup(&self) -> bool {
        self.paths.has_backup()
    }
}

fn check_entry_point(module: &mut Module, entry_point: &MethodRefSpec) -> Result<()> {
    let assembly = &entry_point.assembly.name;
    match module.resolver_mut().resolve(assembly)? {
        Some(dependency) => {
            let type_name = entry_point.type_full_name();
            let found = dependency.find_type(&type_name).is_some_and(|ty| {
                dependency
                    .find_method(ty, &entry_point.name, |m| m.flags.is_static())
                    .is_some()
            });
            if !found {
                return Err(Error::TargetNotFound {
                    type_name,
                    method: Some(entry_point.name.clone()),
                });
            }
            log::debug!("Entry point {} found in {}", entry_point, dependency.name());
        }
        None => log::warn!(
            "Assembly {} not found, entry point {} is not checked",
            assembly,
            entry_point
        ),
    }
    Ok(())
}
