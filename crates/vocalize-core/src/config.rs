//! Persisted optimization flags and cache locations.
//!
//! The configuration is loaded once by the host and passed by value into the
//! components that need it. Setters persist immediately and hand back the new
//! [`OptimizationState`] so callers can rebuild whatever depends on it.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{VocalizeError, VocalizeResult};

/// File name of the configuration file inside the config directory
pub const CONFIG_FILENAME: &str = "config.toml";

/// File name of the persistent token cache at the cache root
pub const TOKEN_CACHE_FILENAME: &str = "token_cache.db";

/// File name of the voice side-cache at the model cache root
pub const VOICE_CACHE_FILENAME: &str = "voice_cache.json";

fn project_dirs() -> VocalizeResult<ProjectDirs> {
    ProjectDirs::from("ai", "Vocalize", "vocalize")
        .ok_or_else(|| VocalizeError::configuration("Failed to determine project directories"))
}

/// Optimization switches read from `[optimizations]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationState {
    /// Use the persistent token cache
    #[serde(default)]
    pub token_cache_enabled: bool,
    /// Prefer the quantized model variant when it is on disk
    #[serde(default)]
    pub quantization_enabled: bool,
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocalizeConfig {
    /// Optimization flags
    #[serde(default)]
    pub optimizations: OptimizationState,
}

/// Loaded configuration together with the file it persists to
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: VocalizeConfig,
}

impl ConfigStore {
    /// Load configuration from `path`.
    ///
    /// A missing file yields defaults. A file that fails to parse is treated
    /// as absent and replaced on the next save.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str::<VocalizeConfig>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {}", path.display(), e);
                    VocalizeConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VocalizeConfig::default(),
            Err(e) => {
                warn!("Could not read config {}: {}", path.display(), e);
                VocalizeConfig::default()
            }
        };

        debug!("Loaded optimizations from {}: {:?}", path.display(), config.optimizations);
        Self { path, config }
    }

    /// Load from the platform config directory
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn load_default() -> VocalizeResult<Self> {
        let dirs = project_dirs()?;
        Ok(Self::load(dirs.config_dir().join(CONFIG_FILENAME)))
    }

    /// Path the configuration persists to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration value
    #[must_use]
    pub const fn config(&self) -> &VocalizeConfig {
        &self.config
    }

    /// Current optimization flags
    #[must_use]
    pub const fn optimizations(&self) -> OptimizationState {
        self.config.optimizations
    }

    /// Enable or disable the token cache and persist the change
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn set_token_cache_enabled(&mut self, enabled: bool) -> VocalizeResult<OptimizationState> {
        self.config.optimizations.token_cache_enabled = enabled;
        self.save()?;
        Ok(self.config.optimizations)
    }

    /// Enable or disable the quantized variant and persist the change
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn set_quantization_enabled(&mut self, enabled: bool) -> VocalizeResult<OptimizationState> {
        self.config.optimizations.quantization_enabled = enabled;
        self.save()?;
        Ok(self.config.optimizations)
    }

    /// Write the configuration to disk
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self) -> VocalizeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// On-disk locations derived from one cache root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// Use `root` as the cache root
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform application-cache directory
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn platform_default() -> VocalizeResult<Self> {
        let dirs = project_dirs()?;
        Ok(Self::new(dirs.cache_dir()))
    }

    /// Cache root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of the model cache (`<root>/models`)
    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Token cache store (`<root>/token_cache.db`)
    #[must_use]
    pub fn token_cache_file(&self) -> PathBuf {
        self.root.join(TOKEN_CACHE_FILENAME)
    }

    /// Voice side-cache (`<root>/models/voice_cache.json`)
    #[must_use]
    pub fn voice_cache_file(&self) -> PathBuf {
        self.models_dir().join(VOICE_CACHE_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(dir.path().join(CONFIG_FILENAME));
        assert_eq!(store.optimizations(), OptimizationState::default());
        assert!(!store.optimizations().token_cache_enabled);
        assert!(!store.optimizations().quantization_enabled);
    }

    #[test]
    fn test_setters_persist_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);

        let mut store = ConfigStore::load(&path);
        let state = store.set_token_cache_enabled(true).unwrap();
        assert!(state.token_cache_enabled);
        assert!(!state.quantization_enabled);

        let state = store.set_quantization_enabled(true).unwrap();
        assert!(state.quantization_enabled);

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.optimizations(), state);
    }

    #[test]
    fn test_partial_table_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[optimizations]\nquantization_enabled = true\n").unwrap();

        let store = ConfigStore::load(&path);
        assert!(store.optimizations().quantization_enabled);
        assert!(!store.optimizations().token_cache_enabled);
    }

    #[test]
    fn test_corrupted_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "optimizations = [[[not toml").unwrap();

        let mut store = ConfigStore::load(&path);
        assert_eq!(store.optimizations(), OptimizationState::default());

        store.set_token_cache_enabled(true).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("token_cache_enabled = true"));
    }

    #[test]
    fn test_cache_paths_layout() {
        let paths = CachePaths::new("/tmp/vocalize-cache");
        assert_eq!(paths.models_dir(), PathBuf::from("/tmp/vocalize-cache/models"));
        assert_eq!(
            paths.token_cache_file(),
            PathBuf::from("/tmp/vocalize-cache/token_cache.db")
        );
        assert_eq!(
            paths.voice_cache_file(),
            PathBuf::from("/tmp/vocalize-cache/models/voice_cache.json")
        );
    }
}
