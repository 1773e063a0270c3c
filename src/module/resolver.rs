//! Resolution of referenced assemblies from disk.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{module::Module, Result};

/// File extensions tried for an assembly, in order
const EXTENSIONS: [&str; 2] = ["dll", "exe"];

/// Locates and caches the modules referenced by a [`Module`].
///
/// Assemblies are looked up by simple name as `<name>.dll` or `<name>.exe` in each search
/// directory, in order. Results, including misses, are cached for the lifetime of the resolver.
#[derive(Debug, Clone, Default)]
pub struct AssemblyResolver {
    search_dirs: Vec<PathBuf>,
    cache: HashMap<String, Option<Module>>,
}

impl AssemblyResolver {
    /// Create a resolver searching `dirs`
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        AssemblyResolver {
            search_dirs: dirs,
            cache: HashMap::new(),
        }
    }

    /// Append a search directory
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_dirs.push(dir.into());
    }

    /// Directories searched, in order
    #[must_use]
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Path of the file defining assembly `name`, if one exists in a search directory
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.search_dirs.iter().find_map(|dir| find_in(dir, name))
    }

    /// Load assembly `name`, caching the result.
    ///
    /// Returns `Ok(None)` if no search directory holds the assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::Load`] if a file was found but could not be loaded.
    pub fn resolve(&mut self, name: &str) -> Result<Option<&Module>> {
        let key = name.to_ascii_lowercase();
        if !self.cache.contains_key(&key) {
            let loaded = match self.locate(name) {
                Some(path) => {
                    log::debug!("Resolved assembly {} to {}", name, path.display());
                    Some(Module::from_path(&path)?)
                }
                None => {
                    log::debug!("Assembly {} not found in {:?}", name, self.search_dirs);
                    None
                }
            };
            self.cache.insert(key.clone(), loaded);
        }

        Ok(self.cache.get(&key).and_then(Option::as_ref))
    }

    /// A previously resolved assembly
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<&Module> {
        self.cache
            .get(&name.to_ascii_lowercase())
            .and_then(Option::as_ref)
    }

    /// Drop every cached module
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Find `<name>.<ext>` in `dir`, comparing file names without regard to ASCII case
fn find_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file());
    if exact.is_some() {
        return exact;
    }

    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();

    EXTENSIONS.iter().find_map(|ext| {
        let wanted = format!("{name}.{ext}");
        entries
            .iter()
            .find(|path| {
                path.file_name()
                    .and_then(|f| f.to_str())
                    .is_some_and(|f| f.eq_ignore_ascii_case(&wanted))
            })
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::factories::game_module;

    #[test]
    fn locate_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut dependency = game_module();
        dependency.write(dir.path().join("SRML2.dll")).unwrap();

        let mut resolver = AssemblyResolver::new(vec![dir.path().to_path_buf()]);
        assert_eq!(resolver.locate("SRML2"), Some(dir.path().join("SRML2.dll")));
        assert!(resolver.locate("Missing").is_none());

        assert!(resolver.resolve("srml2").unwrap().is_some());
        assert!(resolver.cached("SRML2").is_some());
        assert!(resolver.resolve("Missing").unwrap().is_none());

        std::fs::remove_file(dir.path().join("SRML2.dll")).unwrap();
        assert!(resolver.resolve("SRML2").unwrap().is_some());
        resolver.clear();
        assert!(resolver.cached("SRML2").is_none());
    }

    #[test]
    fn names_are_matched_without_case() {
        let dir = tempfile::tempdir().unwrap();
        game_module().write(dir.path().join("SRML2.dll")).unwrap();

        let resolver = AssemblyResolver::new(vec![dir.path().to_path_buf()]);
        assert_eq!(resolver.locate("srml2"), Some(dir.path().join("SRML2.dll")));
        assert_eq!(resolver.locate("Srml2"), Some(dir.path().join("SRML2.dll")));
        assert!(resolver.locate("srml").is_none());
    }

    #[test]
    fn invalid_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.dll"), b"not a module").unwrap();

        let mut resolver = AssemblyResolver::new(vec![dir.path().to_path_buf()]);
        assert!(matches!(
            resolver.resolve("Broken"),
            Err(crate::Error::Load { .. })
        ));
    }
}
