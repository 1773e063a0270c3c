//! Committing a patched module to disk.
//!
//! A commit never writes over the module file in place. The new image goes to a sibling file
//! first; only once it is complete is the original renamed to the backup name and the new file
//! renamed into its place:
//!
//! ```text
//! Assembly-CSharp.dll           ->  Assembly-CSharp_old.dll
//! Assembly-CSharp_patched.dll   ->  Assembly-CSharp.dll
//! ```
//!
//! Stale sibling files from an earlier run are only deleted after the caller confirms each of
//! them through a [`Confirm`] implementation.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{file::output::Output, module::Module, patch::PatchConfig, Error, Result};

/// Asks whether an existing file may be deleted
pub trait Confirm {
    /// Return `true` to allow deleting `path`
    fn confirm(&mut self, path: &Path) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&Path) -> bool,
{
    fn confirm(&mut self, path: &Path) -> bool {
        self(path)
    }
}

/// The three file names involved in a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPaths {
    /// The module file
    pub original: PathBuf,
    /// Where the new image is written before it replaces the original
    pub patched: PathBuf,
    /// Where the original is kept after a commit
    pub backup: PathBuf,
}

fn sibling(original: &Path, suffix: &str) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = original
        .extension()
        .map_or_else(|| "dll".to_string(), |e| e.to_string_lossy().into_owned());
    original.with_file_name(format!("{stem}{suffix}.{extension}"))
}

impl PatchPaths {
    /// Derive the sibling names of `original` from the suffixes in `config`
    #[must_use]
    pub fn new(original: impl Into<PathBuf>, config: &PatchConfig) -> Self {
        let original = original.into();
        PatchPaths {
            patched: sibling(&original, &config.patched_suffix),
            backup: sibling(&original, &config.backup_suffix),
            original,
        }
    }

    /// True if a backup from an earlier commit exists
    #[must_use]
    pub fn has_backup(&self) -> bool {
        self.backup.exists()
    }
}

/// Make sure none of `paths` exists, deleting them with the caller's consent.
///
/// Every existing path is confirmed before any is deleted, so a refusal leaves the file system
/// untouched.
///
/// # Errors
/// Returns [`Error::Collision`] for the first path the caller refuses to delete, or the I/O
/// error of a failed deletion.
pub fn clear_paths(paths: &[&Path], confirm: &mut dyn Confirm) -> Result<()> {
    let existing: Vec<&Path> = paths.iter().copied().filter(|p| p.exists()).collect();
    for path in &existing {
        if !confirm.confirm(path) {
            return Err(Error::Collision(path.to_path_buf()));
        }
    }

    for path in existing {
        log::info!("Deleting {}", path.display());
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Write `module` over `paths.original`, keeping the original as `paths.backup`.
///
/// # Errors
/// Returns [`Error::Collision`] if a stale patched or backup file may not be deleted, or any
/// serialization or file error. The original file is untouched until the new image is
/// completely written.
pub fn commit(module: &mut Module, paths: &PatchPaths, confirm: &mut dyn Confirm) -> Result<()> {
    clear_paths(&[&paths.patched, &paths.backup], confirm)?;

    let image = module.to_bytes()?;
    Output::write_file(&paths.patched, &image)?;
    log::debug!("Wrote {}", paths.patched.display());

    fs::rename(&paths.original, &paths.backup)?;
    fs::rename(&paths.patched, &paths.original)?;
    log::info!(
        "Committed {} (original kept as {})",
        paths.original.display(),
        paths.backup.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::factories::game_module;
    use tempfile::tempdir;

    #[test]
    fn sibling_names() {
        let paths = PatchPaths::new("/game/Managed/Assembly-CSharp.dll", &PatchConfig::default());
        assert_eq!(paths.patched, Path::new("/game/Managed/Assembly-CSharp_patched.dll"));
        assert_eq!(paths.backup, Path::new("/game/Managed/Assembly-CSharp_old.dll"));

        let paths = PatchPaths::new("Game", &PatchConfig::default());
        assert_eq!(paths.backup, Path::new("Game_old.dll"));
    }

    #[test]
    fn commit_keeps_backup() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("Assembly-CSharp.dll");
        let mut module = game_module();
        let before = module.to_bytes().unwrap();
        fs::write(&original, &before).unwrap();

        let paths = PatchPaths::new(&original, &PatchConfig::default());
        let mut asked = Vec::new();
        commit(&mut module, &paths, &mut |p: &Path| {
            asked.push(p.to_path_buf());
            true
        })
        .unwrap();

        assert!(asked.is_empty());
        assert!(!paths.patched.exists());
        assert_eq!(fs::read(&paths.backup).unwrap(), before);
        assert_eq!(fs::read(&original).unwrap(), before);
    }

    #[test]
    fn refusal_changes_nothing() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("Assembly-CSharp.dll");
        let paths = PatchPaths::new(&original, &PatchConfig::default());
        fs::write(&original, b"original").unwrap();
        fs::write(&paths.patched, b"stale patched").unwrap();
        fs::write(&paths.backup, b"stale backup").unwrap();

        let mut module = game_module();
        let mut asked = 0;
        let err = commit(&mut module, &paths, &mut |p: &Path| {
            asked += 1;
            !p.ends_with("Assembly-CSharp_old.dll")
        })
        .unwrap_err();

        assert!(matches!(err, Error::Collision(ref p) if *p == paths.backup));
        assert_eq!(asked, 2);
        assert_eq!(fs::read(&original).unwrap(), b"original");
        assert_eq!(fs::read(&paths.patched).unwrap(), b"stale patched");
        assert_eq!(fs::read(&paths.backup).unwrap(), b"stale backup");
    }

    #[test]
    fn confirmed_stale_files_are_replaced() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("Assembly-CSharp.dll");
        let paths = PatchPaths::new(&original, &PatchConfig::default());
        fs::write(&original, b"original").unwrap();
        fs::write(&paths.backup, b"stale backup").unwrap();

        let mut module = game_module();
        commit(&mut module, &paths, &mut |_: &Path| true).unwrap();
        assert_eq!(fs::read(&paths.backup).unwrap(), b"original");
        assert!(Module::from_path(&original).is_ok());
    }
}
