use std::path::Path;

use anyhow::Context;
use cilpatch::patch::{classify, locate_anchor, uninstall, PatchConfig, PatchPaths};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_module, Prompt},
    output::print_output,
};

#[derive(Debug, Serialize)]
pub struct UninstallReport {
    pub module: String,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let config = PatchConfig::default();
    let mut module = load_module(path)?;
    let paths = PatchPaths::new(path, &config);

    let anchor = locate_anchor(&module, &config)?;
    let patched = classify(&module, anchor.method).is_patched();

    let report = if !patched && !paths.has_backup() {
        log::debug!("{} carries no patch and has no backup", path.display());
        UninstallReport {
            module: file_display_name(path),
            removed: false,
            path: None,
        }
    } else {
        let mut prompt = Prompt::new(opts.yes);
        let used = uninstall(&mut module, &paths, &config, &mut prompt)
            .with_context(|| format!("failed to uninstall from {}", path.display()))?;
        UninstallReport {
            module: file_display_name(path),
            removed: true,
            path: Some(used.to_string()),
        }
    };

    print_output(&report, opts, |report| match &report.path {
        Some(used) => println!("Uninstallation complete ({used} path)"),
        None => println!("{} is not patched", report.module),
    })
}
