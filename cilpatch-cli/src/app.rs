use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cilpatch - install, inspect and remove the mod loader bootstrap patch
#[derive(Debug, Parser)]
#[command(name = "cilpatch", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Default, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Delete stale output files without asking.
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the anchor routine, patch state and backup of a module.
    Status {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Install or update the bootstrap patch.
    Patch {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Module declaring the entry point (default: SRML2.dll next to FILE).
        #[arg(long, value_name = "PATH")]
        entry_module: Option<PathBuf>,

        /// Type declaring the entry point.
        #[arg(long, value_name = "NAME", default_value = "SRML2.Main")]
        entry_type: String,

        /// Static entry point routine called after the plugins are loaded.
        #[arg(long, value_name = "NAME", default_value = "PreLoad")]
        entry_method: String,

        /// Directory the bootstrap routine enumerates at runtime.
        #[arg(long, value_name = "DIR")]
        plugin_dir: Option<String>,

        /// File name pattern of plugin files.
        #[arg(long, value_name = "PATTERN")]
        glob: Option<String>,

        /// Stop at the first plugin that fails to load instead of skipping it.
        #[arg(long)]
        abort_on_load_failure: bool,
    },

    /// Remove the bootstrap patch, from the backup if one exists.
    Uninstall {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_defaults() {
        let cli = Cli::try_parse_from(["cilpatch", "patch", "Assembly-CSharp.dll", "-y"]).unwrap();
        assert!(cli.global.yes);
        match cli.command {
            Command::Patch {
                entry_type,
                entry_method,
                plugin_dir,
                abort_on_load_failure,
                ..
            } => {
                assert_eq!(entry_type, "SRML2.Main");
                assert_eq!(entry_method, "PreLoad");
                assert!(plugin_dir.is_none());
                assert!(!abort_on_load_failure);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn only_installer_commands_are_accepted() {
        for command in ["status", "patch", "uninstall"] {
            assert!(Cli::try_parse_from(["cilpatch", command, "a.dll"]).is_ok());
        }
        assert!(
            Cli::try_parse_from(["cilpatch", "disasm", "a.dll", "--type", "GameContext"]).is_err()
        );
    }
}
