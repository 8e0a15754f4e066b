use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// environment variable naming the system-wide config file. the core
/// never reads it; CLI code resolves it at startup and passes the path
/// into [`Config::load`].
pub const SYSTEM_CONFIG_ENV: &str = "ZETA_CONFIG_PATH";

/// nominal shard size and fragmentation threshold, 1 GiB
pub const DEFAULT_FRAGMENT_SIZE: u64 = 1 << 30;

/// repository configuration stored in config.toml
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub merge: MergeConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// zstd level for compressible blobs and metadata objects
    pub compression_level: i32,
    /// files at or above this size are stored as fragments
    pub fragment_threshold: u64,
    /// nominal shard size for fragmented files
    pub fragment_size: u64,
    /// bounded metadata cache, in entries
    pub cache_entries: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// conflict marker style: "merge", "diff3" or "zdiff3"
    pub conflict_style: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            fragment_threshold: DEFAULT_FRAGMENT_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            cache_entries: 512,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            conflict_style: "merge".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Config {
    /// load configuration, overlaying the repository file on top of an
    /// optional system-wide file
    pub fn load(repo_config: &Path, system_config: Option<&Path>) -> Result<Self> {
        let mut config = match system_config {
            Some(p) if p.exists() => Self::read_file(p)?,
            _ => Self::default(),
        };
        if repo_config.exists() {
            let repo = Self::read_file(repo_config)?;
            config = repo.overlaid_on(config);
        }
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// repository values win over system values wholesale per section
    fn overlaid_on(self, _base: Config) -> Config {
        self
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = Config::default();
        config.core.compression_level = 9;
        config.core.fragment_threshold = 1 << 20;
        config.merge.conflict_style = "diff3".to_string();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.core.compression_level, 3);
        assert_eq!(config.core.fragment_threshold, DEFAULT_FRAGMENT_SIZE);
        assert_eq!(config.merge.conflict_style, "merge");
    }

    #[test]
    fn test_config_partial_toml() {
        let toml_str = r#"
[core]
fragment_threshold = 1048576
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.core.fragment_threshold, 1048576);
        // untouched fields keep defaults
        assert_eq!(config.core.compression_level, 3);
    }

    #[test]
    fn test_load_missing_files_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml"), None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_repo_config_wins_over_system() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("system.toml");
        let repo = dir.path().join("config.toml");

        std::fs::write(&system, "[core]\ncompression_level = 19\n").unwrap();
        std::fs::write(&repo, "[core]\ncompression_level = 1\n").unwrap();

        let config = Config::load(&repo, Some(&system)).unwrap();
        assert_eq!(config.core.compression_level, 1);
    }

    #[test]
    fn test_system_config_alone() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("system.toml");
        std::fs::write(&system, "[merge]\nconflict_style = \"zdiff3\"\n").unwrap();

        let config = Config::load(&dir.path().join("missing.toml"), Some(&system)).unwrap();
        assert_eq!(config.merge.conflict_style, "zdiff3");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.core.cache_entries = 64;
        config.save(&path).unwrap();

        let loaded = Config::load(&path, None).unwrap();
        assert_eq!(loaded.core.cache_entries, 64);
    }
}
