use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{FfrunError, Result};

/// File looked up in the current directory when no config path is given
pub const DEFAULT_CONFIG_FILE: &str = "ffrun.toml";

fn default_event_buffer() -> usize {
    64
}

fn default_verify() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub binary: BinaryConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryConfig {
    /// File name of the installed executable
    pub name: String,
    /// Directory the bundled executable is installed into
    pub install_dir: PathBuf,
    /// Executable used as-is when no asset matches the host architecture.
    /// Resolved through PATH when it is a bare name.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Run `<binary> -version` after installation
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// Bundled executables keyed by architecture (`x86_64`, `aarch64`, `arm`, `x86`, ...)
    #[serde(default)]
    pub assets: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Capacity of the per-run event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Working directory for launched commands
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            working_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary: BinaryConfig {
                name: "ffmpeg".to_string(),
                install_dir: PathBuf::from(".ffrun").join("bin"),
                fallback: Some("ffmpeg".to_string()),
                verify: true,
                assets: BTreeMap::new(),
            },
            runner: RunnerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FfrunError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| FfrunError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FfrunError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| FfrunError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load the explicit path if given, else `ffrun.toml` from the current
    /// directory, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                if Path::new(DEFAULT_CONFIG_FILE).exists() {
                    info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                    Self::from_file(DEFAULT_CONFIG_FILE)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [binary]
            name = "ffmpeg"
            install_dir = "/tmp/ffrun"

            [binary.assets]
            aarch64 = "assets/arm64/ffmpeg"
            "#,
        )
        .unwrap();

        assert!(config.binary.verify);
        assert_eq!(config.binary.fallback, None);
        assert_eq!(config.runner.event_buffer, 64);
        assert_eq!(
            config.binary.assets.get("aarch64"),
            Some(&PathBuf::from("assets/arm64/ffmpeg"))
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffrun.toml");

        let mut config = Config::default();
        config.runner.working_dir = Some(PathBuf::from("/var/tmp"));
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.binary.name, "ffmpeg");
        assert_eq!(loaded.runner.working_dir, Some(PathBuf::from("/var/tmp")));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[binary\nname = ").unwrap();

        assert!(matches!(Config::from_file(&path), Err(FfrunError::Config(_))));
    }
}
