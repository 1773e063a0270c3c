//! Installing, detecting and removing the bootstrap patch.
//!
//! A patched module carries a bootstrap routine on the type declaring its anchor routine, and
//! the anchor's first instruction calls it. The name of the called routine is the marker that
//! tells the patch version apart:
//!
//! - [`LEGACY_MARKER`] for patches installed by earlier releases
//! - [`CURRENT_MARKER`] for patches installed by this one
//!
//! Patching always strips whatever patch is present first, so patching a legacy module upgrades
//! it. [`Patcher`] drives the whole flow for a module on disk; the free functions expose the
//! individual steps for modules held in memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilpatch::{
//!     module::{AssemblyName, MethodRefSpec, SigType},
//!     patch::{PatchConfig, PatchState, Patcher},
//! };
//!
//! let entry = MethodRefSpec::new_static(
//!     AssemblyName::new("SRML2"), "SRML2.Main", "PreLoad", SigType::Void, vec![]);
//! let patcher = Patcher::open("Assembly-CSharp.dll", entry, PatchConfig::default())?;
//! if patcher.state() != PatchState::Unpatched {
//!     patcher.uninstall(&mut |_: &std::path::Path| true)?;
//! }
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod anchor;
mod bootstrap;
mod config;
mod patcher;
mod persist;
mod revision;
mod state;
mod uninstall;

pub use anchor::{locate_anchor, resolve_entry_point, Anchor};
pub use bootstrap::{build_injected_routine, host_routines, BootstrapBuilder};
pub use config::{LoadFailurePolicy, PatchConfig, CURRENT_MARKER, LEGACY_MARKER, MARKERS};
pub use patcher::Patcher;
pub use persist::{clear_paths, commit, Confirm, PatchPaths};
pub use revision::{install_patch, strip_patch, Stripped};
pub use state::{classify, marker_call, PatchState};
pub use uninstall::{restore_backup, strip_in_place, uninstall, UninstallPath};
