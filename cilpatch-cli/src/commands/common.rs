use std::{
    io::{self, BufRead, Write},
    path::Path,
};

use anyhow::Context;
use cilpatch::{patch::Confirm, Module};

/// Load a module, attaching the path to any error.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    Module::from_path(path).with_context(|| format!("failed to load module: {}", path.display()))
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

/// Asks on the terminal before a stale file is deleted, or agrees right away with `--yes`.
pub struct Prompt {
    assume_yes: bool,
}

impl Prompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Confirm for Prompt {
    fn confirm(&mut self, path: &Path) -> bool {
        if self.assume_yes {
            log::debug!("Deleting {} without asking", path.display());
            return true;
        }

        eprint!("{} already exists. Delete it? (y/n) ", path.display());
        if io::stderr().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
            Err(_) => false,
        }
    }
}
