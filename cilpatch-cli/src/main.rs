mod app;
mod commands;
mod output;

use anyhow::Context;
use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // Show cilpatch info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("cilpatch", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Status { path } => commands::status::run(path, &cli.global),
        Command::Patch {
            path,
            entry_module,
            entry_type,
            entry_method,
            plugin_dir,
            glob,
            abort_on_load_failure,
        } => commands::patch::run(
            path,
            &commands::patch::PatchOptions {
                entry_module: entry_module.as_deref(),
                entry_type,
                entry_method,
                plugin_dir: plugin_dir.as_deref(),
                glob: glob.as_deref(),
                abort_on_load_failure: *abort_on_load_failure,
                global: &cli.global,
            },
        ),
        Command::Uninstall { path } => commands::uninstall::run(path, &cli.global),
    }
}
