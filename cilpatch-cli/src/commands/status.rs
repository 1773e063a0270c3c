use std::path::Path;

use cilpatch::patch::{classify, locate_anchor, PatchConfig, PatchPaths};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_module},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
    pub anchor: String,
    pub state: String,
    pub patched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let module = load_module(path)?;
    let config = PatchConfig::default();
    let anchor = locate_anchor(&module, &config)?;
    let state = classify(&module, anchor.method);
    let paths = PatchPaths::new(path, &config);

    let info = StatusInfo {
        module: file_display_name(path),
        assembly: module.assembly_name().map(ToString::to_string),
        anchor: format!("{}::{}", config.anchor_type, config.anchor_method),
        state: state.to_string(),
        patched: state.is_patched(),
        backup: paths
            .has_backup()
            .then(|| file_display_name(&paths.backup)),
    };

    print_output(&info, opts, |info| {
        let mut tw = TabWriter::new(&[("Property", Align::Left), ("Value", Align::Left)]);
        tw.row(vec!["Module".into(), info.module.clone()]);
        if let Some(assembly) = &info.assembly {
            tw.row(vec!["Assembly".into(), assembly.clone()]);
        }
        tw.row(vec!["Anchor".into(), info.anchor.clone()]);
        tw.row(vec!["State".into(), info.state.clone()]);
        tw.row(vec![
            "Backup".into(),
            info.backup.clone().unwrap_or_else(|| "none".into()),
        ]);
        tw.print("");
    })
}
