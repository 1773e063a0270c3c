use std::path::{Path, PathBuf};

use anyhow::Context;
use cilpatch::{
    patch::{resolve_entry_point, PatchConfig, PatchState, Patcher},
    Module,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_module, Prompt},
    output::print_output,
};

/// Name of the loader assembly looked up next to the game module
const DEFAULT_LOADER: &str = "SRML2.dll";

pub struct PatchOptions<'a> {
    pub entry_module: Option<&'a Path>,
    pub entry_type: &'a str,
    pub entry_method: &'a str,
    pub plugin_dir: Option<&'a str>,
    pub glob: Option<&'a str>,
    pub abort_on_load_failure: bool,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
pub struct PatchReport {
    pub module: String,
    pub entry_point: String,
    pub previous_state: String,
    pub state: String,
    pub backup: String,
}

fn loader_path(path: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(loader) => loader.to_path_buf(),
        None => path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_LOADER),
    }
}

fn config_for(opts: &PatchOptions) -> PatchConfig {
    let mut config = if opts.abort_on_load_failure {
        PatchConfig::abort_on_load_failure()
    } else {
        PatchConfig::default()
    };

    if opts.plugin_dir.is_some() || opts.glob.is_some() {
        let dir = opts.plugin_dir.unwrap_or(&config.plugin_dir).to_string();
        let glob = opts.glob.unwrap_or(&config.plugin_glob).to_string();
        config = config.with_plugins(dir, glob);
    }
    config
}

pub fn run(path: &Path, opts: &PatchOptions) -> anyhow::Result<()> {
    let loader_file = loader_path(path, opts.entry_module);
    let loader = Module::from_path(&loader_file).with_context(|| {
        format!(
            "failed to load entry point module: {}",
            loader_file.display()
        )
    })?;
    let entry_point = resolve_entry_point(&loader, opts.entry_type, opts.entry_method)?;
    log::debug!("Entry point {entry_point}");

    let config = config_for(opts);
    let module = load_module(path)?;
    let mut patcher = Patcher::new(module, path, entry_point.clone(), config)?;
    let previous = patcher.patch()?;
    let backup = file_display_name(&patcher.paths().backup);

    let mut prompt = Prompt::new(opts.global.yes);
    patcher
        .save(&mut prompt)
        .with_context(|| format!("failed to write {}", path.display()))?;

    let report = PatchReport {
        module: file_display_name(path),
        entry_point: entry_point.to_string(),
        previous_state: previous.to_string(),
        state: PatchState::CurrentPatch.to_string(),
        backup,
    };

    print_output(&report, opts.global, |report| {
        if previous == PatchState::Unpatched {
            println!(
                "Installation complete (old assembly stored as {})",
                report.backup
            );
        } else {
            println!("Update complete (was {})", report.previous_state);
        }
    })
}
