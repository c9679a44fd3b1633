//! hublock - manifest resolution and unlock script engine
//!
//! Resolves per-app depot metadata and decryption keys from a prioritized
//! list of community manifest repositories, synthesizes SteamTools-style
//! unlock scripts, and converts/repairs legacy encrypted `.st` containers.
//!
//! # Architecture
//!
//! - **Sequential fallback**: repositories are tried in order, one attempt
//!   per repository, first non-empty result wins (`ops::resolve`).
//! - **Typed attempts**: each repository attempt returns a typed result
//!   instead of using errors as control flow.
//! - **Structured scripts**: unlock scripts are parsed into typed directives
//!   and re-rendered, never patched with ad-hoc string edits
//!   (`core::script`).
//!
//! # Directory Layout
//!
//! ```text
//! ~/.hublock/
//! ├── config.toml   # Repository list, paths, pin default
//! ├── depotcache/   # Downloaded <depot>_<manifest>.manifest files
//! └── scripts/      # Synthesized <appid>.lua unlock scripts
//! ```

pub mod core;
pub mod io;
pub mod ops;

// Re-exports for convenience
pub use crate::core::config::Config;
pub use crate::core::script;
pub use crate::core::types;
pub use crate::io::http::RateLimitClient;

use std::path::PathBuf;

/// Returns the primary configuration directory, or None if the user's home cannot be resolved.
pub fn try_hublock_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("HUBLOCK_HOME") {
        return Some(PathBuf::from(val));
    }
    dirs::home_dir().map(|h| h.join(".hublock"))
}

/// Returns the canonical hublock home directory (`~/.hublock`).
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn hublock_home() -> PathBuf {
    try_hublock_home().expect("Could not determine home directory")
}

/// Config file path: ~/.hublock/config.toml
pub fn config_path() -> PathBuf {
    hublock_home().join("config.toml")
}

/// Default manifest cache: ~/.hublock/depotcache
pub fn default_cache_path() -> PathBuf {
    hublock_home().join("depotcache")
}

/// Default script output: ~/.hublock/scripts
pub fn default_scripts_path() -> PathBuf {
    hublock_home().join("scripts")
}

/// User agent presented to every remote source. The community hubs sit behind
/// ordinary CDN rules, so this matches a desktop browser profile.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
