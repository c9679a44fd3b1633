//! Configuration: repository list, directories, pin default
//!
//! Loaded from `~/.hublock/config.toml`; every field has a working default so
//! a missing file means a usable out-of-the-box setup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default repository fallback order. Order matters: earlier entries are
/// tried first and the first non-empty resolution wins.
pub const DEFAULT_REPOSITORIES: &[&str] = &[
    "SteamAutoCracks/ManifestHub",
    "ikun0014/ManifestHub",
    "Auiowu/ManifestAutoUpdate",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ordered candidate repositories, `owner/name` form.
    #[serde(default = "default_repositories")]
    pub repositories: Vec<String>,

    /// Flat cache of `<depot>_<manifest>.manifest` files.
    #[serde(default = "crate::default_cache_path")]
    pub cache_dir: PathBuf,

    /// Output directory for synthesized `<appid>.lua` scripts.
    #[serde(default = "crate::default_scripts_path")]
    pub scripts_dir: PathBuf,

    /// Whether synthesized scripts pin manifest revisions by default.
    /// Overridable per run from the CLI.
    #[serde(default = "default_pin")]
    pub pin_versions: bool,
}

fn default_repositories() -> Vec<String> {
    DEFAULT_REPOSITORIES.iter().map(ToString::to_string).collect()
}

fn default_pin() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: default_repositories(),
            cache_dir: crate::default_cache_path(),
            scripts_dir: crate::default_scripts_path(),
            pin_versions: default_pin(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.repositories.len(), DEFAULT_REPOSITORIES.len());
        assert!(config.pin_versions);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "repositories = [\"me/fork\"]\npin_versions = false\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.repositories, vec!["me/fork"]);
        assert!(!config.pin_versions);
        assert!(config.cache_dir.ends_with("depotcache"));
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "repositories = 5\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
