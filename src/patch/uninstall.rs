//! Removing an installed patch from disk.

use std::fs;

use crate::{
    module::Module,
    patch::{
        locate_anchor,
        persist::{clear_paths, Confirm, PatchPaths},
        revision::strip_patch,
        PatchConfig,
    },
    Error, Result,
};

/// How an uninstall restored the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UninstallPath {
    /// The backup of the original was patched clean and written back
    #[strum(serialize = "backup")]
    Backup,
    /// No backup existed; the patch was stripped from the current module
    #[strum(serialize = "forceful")]
    Forceful,
}

/// Restore `paths.original` from the backup left by an earlier commit.
///
/// The backup is stripped of any patch it carries, written over the original and deleted.
///
/// # Errors
/// Returns an error if the backup can not be loaded or has no anchor, or on any file error.
pub fn restore_backup(paths: &PatchPaths, config: &PatchConfig) -> Result<()> {
    let mut module = Module::from_path(&paths.backup)?;
    let anchor = locate_anchor(&module, config)?;
    strip_patch(&mut module, &anchor)?;

    fs::remove_file(&paths.original)?;
    module.write(&paths.original)?;
    fs::remove_file(&paths.backup)?;
    log::info!(
        "Restored {} from {}",
        paths.original.display(),
        paths.backup.display()
    );
    Ok(())
}

/// Strip the patch from `module` and write it over `paths.original` without a backup.
///
/// The clean image is written to `paths.patched` first, which must be cleared with the caller's
/// consent if it exists.
///
/// # Errors
/// Returns [`Error::Uninstall`] if a stale patched file may not be deleted, or any
/// serialization or file error.
pub fn strip_in_place(
    module: &mut Module,
    paths: &PatchPaths,
    config: &PatchConfig,
    confirm: &mut dyn Confirm,
) -> Result<()> {
    log::warn!(
        "No backup at {}, removing the patch from {} itself",
        paths.backup.display(),
        paths.original.display()
    );

    let anchor = locate_anchor(module, config)?;
    strip_patch(module, &anchor)?;

    match clear_paths(&[&paths.patched], confirm) {
        Err(Error::Collision(path)) => {
            return Err(Error::Uninstall(format!(
                "{} exists and may not be deleted",
                path.display()
            )))
        }
        other => other?,
    }

    module.write(&paths.patched)?;
    fs::remove_file(&paths.original)?;
    fs::rename(&paths.patched, &paths.original)?;
    Ok(())
}

/// Remove the patch from the module at `paths.original`.
///
/// Uses the backup if one exists, otherwise strips `module`, the loaded original.
///
/// # Errors
/// See [`restore_backup`] and [`strip_in_place`].
pub fn uninstall(
    module: &mut Module,
    paths: &PatchPaths,
    config: &PatchConfig,
    confirm: &mut dyn Confirm,
) -> Result<UninstallPath> {
    if paths.has_backup() {
        restore_backup(paths, config)?;
        Ok(UninstallPath::Backup)
    } else {
        strip_in_place(module, paths, config, confirm)?;
        Ok(UninstallPath::Forceful)
    }
}
