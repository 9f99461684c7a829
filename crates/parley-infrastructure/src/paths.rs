//! Unified path management for Parley files.
//!
//! Platform directories come from the `dirs` crate (XDG on Linux,
//! `Application Support` on macOS, `AppData` on Windows).

use std::path::PathBuf;

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Path resolution for Parley.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/parley/            # Config directory
/// └── config.toml              # Engine configuration
///
/// ~/.local/share/parley/       # Data directory
/// ├── global/                  # Application-scoped blobs (transfers)
/// └── workspaces/
///     └── <workspace_id>/      # Workspace-scoped blobs (session table)
/// ```
///
/// A root override places both trees under one directory, which keeps
/// tests and portable installs away from the user's real profile.
#[derive(Debug, Clone, Default)]
pub struct ParleyPaths {
    root_override: Option<PathBuf>,
}

impl ParleyPaths {
    pub fn new(root_override: Option<PathBuf>) -> Self {
        Self { root_override }
    }

    /// Returns the configuration directory (e.g. `~/.config/parley/`).
    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        if let Some(root) = &self.root_override {
            return Ok(root.join("config"));
        }
        dirs::config_dir()
            .map(|dir| dir.join("parley"))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the data directory (e.g. `~/.local/share/parley/`).
    pub fn data_dir(&self) -> Result<PathBuf, PathError> {
        if let Some(root) = &self.root_override {
            return Ok(root.join("data"));
        }
        dirs::data_dir()
            .map(|dir| dir.join("parley"))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    /// Directory backing the application-scoped blob store.
    pub fn global_storage_dir(&self) -> Result<PathBuf, PathError> {
        Ok(self.data_dir()?.join("global"))
    }

    /// Directory backing one workspace's blob store.
    pub fn workspace_storage_dir(&self, workspace_id: &str) -> Result<PathBuf, PathError> {
        let safe: String = workspace_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Ok(self.data_dir()?.join("workspaces").join(safe))
    }
}
