//! Patch configuration
//!
//! Names the anchor routine, the plugin directory the bootstrap routine enumerates, the host
//! routines the failure handler calls and the file name suffixes used while committing.

/// Name of the bootstrap routine installed by earlier releases
pub const LEGACY_MARKER: &str = "LoadSRML2";

/// Name of the bootstrap routine installed by this release
pub const CURRENT_MARKER: &str = "LoadSRModLoader2";

/// Every recognized marker, newest last
pub const MARKERS: [&str; 2] = [LEGACY_MARKER, CURRENT_MARKER];

/// What the bootstrap routine does when loading one plugin file throws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LoadFailurePolicy {
    /// Discard the exception and continue with the next file
    #[default]
    Continue,
    /// Let the exception reach the outer handler, which logs it and quits
    Abort,
}

/// Configuration of a patch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Full name of the type declaring the anchor routine
    pub anchor_type: String,
    /// Name of the anchor routine
    pub anchor_method: String,

    /// Directory enumerated at runtime, relative to the working directory of the host
    pub plugin_dir: String,
    /// File name pattern of plugin files
    pub plugin_glob: String,
    /// Search subdirectories of `plugin_dir` as well
    pub recursive: bool,
    /// Handling of a plugin file that fails to load
    pub load_failure: LoadFailurePolicy,

    /// Full name of the host type whose `log_method` receives the caught exception
    pub log_type: String,
    /// Static `void (object)` routine on `log_type`
    pub log_method: String,
    /// Full name of the host type whose `terminate_method` ends the process
    pub terminate_type: String,
    /// Static `void ()` routine on `terminate_type`
    pub terminate_method: String,

    /// Appended to the file stem of the module for the freshly written file
    pub patched_suffix: String,
    /// Appended to the file stem of the module for the backup of the original
    pub backup_suffix: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            anchor_type: "GameContext".to_string(),
            anchor_method: "Awake".to_string(),
            plugin_dir: "SRML2/Libs".to_string(),
            plugin_glob: "*.dll".to_string(),
            recursive: true,
            load_failure: LoadFailurePolicy::Continue,
            log_type: "UnityEngine.Debug".to_string(),
            log_method: "Log".to_string(),
            terminate_type: "UnityEngine.Application".to_string(),
            terminate_method: "Quit".to_string(),
            patched_suffix: "_patched".to_string(),
            backup_suffix: "_old".to_string(),
        }
    }
}

impl PatchConfig {
    /// The default configuration with an unguarded enumeration loop
    ///
    /// The first plugin that fails to load aborts the bootstrap through the outer handler.
    #[must_use]
    pub fn abort_on_load_failure() -> Self {
        Self {
            load_failure: LoadFailurePolicy::Abort,
            ..Self::default()
        }
    }

    /// Set the plugin directory and file pattern
    #[must_use]
    pub fn with_plugins(mut self, dir: impl Into<String>, glob: impl Into<String>) -> Self {
        self.plugin_dir = dir.into();
        self.plugin_glob = glob.into();
        self
    }

    /// Set the anchor type and routine
    #[must_use]
    pub fn with_anchor(mut self, ty: impl Into<String>, method: impl Into<String>) -> Self {
        self.anchor_type = ty.into();
        self.anchor_method = method.into();
        self
    }
}
