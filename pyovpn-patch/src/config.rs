//! Pipeline configuration
//!
//! Defaults describe a stock OpenVPN Access Server installation. The CLI
//! overrides individual fields from flags and environment variables.

use crate::module_patch::ModuleLayout;
use std::path::PathBuf;

/// Directory holding the installed egg
pub const DEFAULT_EGG_DIR: &str = "/usr/local/openvpn_as/lib/python";

/// Glob matched against file names in [`DEFAULT_EGG_DIR`]
pub const DEFAULT_EGG_PATTERN: &str = "pyovpn-*.egg";

/// Directory timestamped backups are written to
pub const DEFAULT_BACKUP_DIR: &str = "/tmp";

/// Interpreter used to byte-compile the facade module
pub const DEFAULT_PYTHON: &str = "python3";

/// Prefix of the per-run temporary directory
pub const DEFAULT_WORKSPACE_PREFIX: &str = "pyovpn_patch_";

/// Everything a pipeline run needs to know
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Directory scanned (non-recursively) for the source egg
    pub egg_dir: PathBuf,
    /// Glob pattern for the egg file name
    pub egg_pattern: String,
    /// Directory receiving the pre-patch backup
    pub backup_dir: PathBuf,
    /// Live archive to overwrite; the located source egg when `None`
    pub deploy_target: Option<PathBuf>,
    /// Compiler executable
    pub python: String,
    /// Prefix for the temporary workspace directory
    pub workspace_prefix: String,
    /// Parent of the workspace; the system temp directory when `None`
    pub workspace_parent: Option<PathBuf>,
    /// Where the module pair lives inside the egg
    pub module: ModuleLayout,
    /// Keep the workspace and the facade source for inspection
    pub debug: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            egg_dir: PathBuf::from(DEFAULT_EGG_DIR),
            egg_pattern: DEFAULT_EGG_PATTERN.to_string(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            deploy_target: None,
            python: DEFAULT_PYTHON.to_string(),
            workspace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
            workspace_parent: None,
            module: ModuleLayout::default(),
            debug: false,
        }
    }
}

impl PatchConfig {
    /// Set the egg directory
    pub fn with_egg_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.egg_dir = dir.into();
        self
    }

    /// Set the egg file name pattern
    pub fn with_egg_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.egg_pattern = pattern.into();
        self
    }

    /// Set the backup directory
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Deploy to a fixed live path instead of the located egg
    pub fn with_deploy_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.deploy_target = Some(target.into());
        self
    }

    /// Set the compiler executable
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Create workspaces beneath `dir` instead of the system temp directory
    pub fn with_workspace_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_parent = Some(dir.into());
        self
    }

    /// Enable or disable debug retention
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_installation_layout() {
        let config = PatchConfig::default();
        assert_eq!(config.egg_dir, PathBuf::from("/usr/local/openvpn_as/lib/python"));
        assert_eq!(config.egg_pattern, "pyovpn-*.egg");
        assert_eq!(config.backup_dir, PathBuf::from("/tmp"));
        assert_eq!(config.python, "python3");
        assert!(config.deploy_target.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PatchConfig::default()
            .with_egg_dir("/opt/eggs")
            .with_egg_pattern("*.egg")
            .with_deploy_target("/opt/live.egg")
            .with_debug(true);
        assert_eq!(config.egg_dir, PathBuf::from("/opt/eggs"));
        assert_eq!(config.egg_pattern, "*.egg");
        assert_eq!(config.deploy_target, Some(PathBuf::from("/opt/live.egg")));
        assert!(config.debug);
    }
}
