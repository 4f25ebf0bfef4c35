//! Settings loaders

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::{SecurityError, SecurityResult};

use super::Settings;

/// Directory holding project-level settings
const PROJECT_SETTINGS_DIR: &str = ".shadow";
/// Shared project settings file
const PROJECT_SETTINGS_FILE: &str = "settings.json";
/// Uncommitted per-checkout overrides
const LOCAL_SETTINGS_FILE: &str = "settings.local.json";

/// Produces the settings the sandbox builds its permission matcher from
pub trait SettingsLoader: Send + Sync {
    /// Load settings for the given project root
    fn load(&self, project_root: &Path) -> SecurityResult<Settings>;
}

/// Implement SettingsLoader for closures
impl<F> SettingsLoader for F
where
    F: Fn(&Path) -> SecurityResult<Settings> + Send + Sync,
{
    fn load(&self, project_root: &Path) -> SecurityResult<Settings> {
        (self)(project_root)
    }
}

/// Loader that never configures a policy
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

impl SettingsLoader for NoSettings {
    fn load(&self, _project_root: &Path) -> SecurityResult<Settings> {
        Ok(Settings::default())
    }
}

/// Layered JSON settings
///
/// Layers, lowest precedence first:
/// 1. `<config dir>/shadow/settings.json` (per user)
/// 2. `<project>/.shadow/settings.json`
/// 3. `<project>/.shadow/settings.local.json`
///
/// Missing files are skipped. Rule lists are concatenated across layers.
#[derive(Debug, Clone)]
pub struct FileSettingsLoader {
    user_settings: Option<PathBuf>,
}

impl FileSettingsLoader {
    /// Create a loader that includes the user-level settings file
    pub fn new() -> Self {
        Self {
            user_settings: dirs::config_dir().map(|dir| dir.join("shadow").join(PROJECT_SETTINGS_FILE)),
        }
    }

    /// Use a specific user-level settings file
    pub fn with_user_settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_settings = Some(path.into());
        self
    }

    /// Only read project-level files
    pub fn without_user_settings(mut self) -> Self {
        self.user_settings = None;
        self
    }

    /// Files consulted for a project, lowest precedence first
    pub fn layer_paths(&self, project_root: &Path) -> Vec<PathBuf> {
        let project_dir = project_root.join(PROJECT_SETTINGS_DIR);
        self.user_settings
            .iter()
            .cloned()
            .chain([
                project_dir.join(PROJECT_SETTINGS_FILE),
                project_dir.join(LOCAL_SETTINGS_FILE),
            ])
            .collect()
    }

    fn read_layer(path: &Path) -> SecurityResult<Option<Settings>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SecurityError::inspect(path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let settings = serde_json::from_str(&content).map_err(|source| SecurityError::InvalidSettings {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(settings))
    }
}

impl Default for FileSettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader for FileSettingsLoader {
    fn load(&self, project_root: &Path) -> SecurityResult<Settings> {
        let mut settings = Settings::default();
        for path in self.layer_paths(project_root) {
            if let Some(layer) = Self::read_layer(&path)? {
                tracing::debug!("Loaded settings layer: {}", path.display());
                settings.merge(layer);
            }
        }
        Ok(settings)
    }
}
