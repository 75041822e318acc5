use std::path::{Path, PathBuf};

use tokio::fs as async_fs;
use tokio::process::Command as ProcessCommand;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{BinaryConfig, RunnerConfig};
use crate::error::{FfrunError, Result};
use crate::runner::CommandRunner;

/// A binary that is installed and runnable on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub(crate) path: PathBuf,
    pub(crate) arch: String,
    pub(crate) version: Option<String>,
    pub(crate) installed: bool,
}

impl Loaded {
    /// Executable that commands are launched with
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// First line of `-version` output, when verification ran
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether the binary came from a bundled asset rather than the fallback
    pub fn installed(&self) -> bool {
        self.installed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loaded(Loaded),
    Unsupported(String),
}

/// Installs the bundled ffmpeg for the host architecture, once.
///
/// The first `load` decides the outcome; every later call, concurrent or not,
/// returns the same result without touching the filesystem again.
pub struct BinaryLoader {
    config: BinaryConfig,
    arch: String,
    outcome: OnceCell<std::result::Result<Loaded, String>>,
}

impl BinaryLoader {
    pub fn new(config: BinaryConfig) -> Self {
        Self {
            config,
            arch: std::env::consts::ARCH.to_string(),
            outcome: OnceCell::new(),
        }
    }

    pub fn state(&self) -> LoadState {
        match self.outcome.get() {
            None => LoadState::Unloaded,
            Some(Ok(loaded)) => LoadState::Loaded(loaded.clone()),
            Some(Err(reason)) => LoadState::Unsupported(reason.clone()),
        }
    }

    pub async fn load(&self) -> Result<Loaded> {
        let outcome = self
            .outcome
            .get_or_init(|| async {
                self.install().await.map_err(|e| {
                    warn!("FFmpeg binary unavailable: {}", e);
                    match e {
                        FfrunError::NotSupported(reason) => reason,
                        other => other.to_string(),
                    }
                })
            })
            .await;

        outcome.clone().map_err(FfrunError::NotSupported)
    }

    /// Runner for the loaded binary. Refuses when loading failed or never ran.
    pub fn runner(&self, config: RunnerConfig) -> Result<CommandRunner> {
        match self.state() {
            LoadState::Loaded(loaded) => Ok(CommandRunner::new(&loaded, config)),
            LoadState::Unsupported(reason) => Err(FfrunError::NotSupported(reason)),
            LoadState::Unloaded => Err(FfrunError::NotLoaded),
        }
    }

    async fn install(&self) -> Result<Loaded> {
        info!("Loading ffmpeg binary for architecture {}", self.arch);

        let (path, installed) = match self.config.assets.get(&self.arch) {
            Some(asset) => (self.install_asset(asset).await?, true),
            None => match &self.config.fallback {
                Some(fallback) => {
                    info!("No bundled binary for {}, using {}", self.arch, fallback);
                    (PathBuf::from(fallback), false)
                }
                None => {
                    return Err(FfrunError::NotSupported(format!(
                        "no ffmpeg binary for architecture {}",
                        self.arch
                    )));
                }
            },
        };

        let version = if self.config.verify {
            Some(self.verify(&path).await?)
        } else {
            None
        };

        info!("FFmpeg binary ready at {}", path.display());
        Ok(Loaded {
            path,
            arch: self.arch.clone(),
            version,
            installed,
        })
    }

    async fn install_asset(&self, asset: &Path) -> Result<PathBuf> {
        let asset_meta = async_fs::metadata(asset).await.map_err(|e| {
            FfrunError::NotSupported(format!("bundled binary {} missing: {}", asset.display(), e))
        })?;

        let target = self.config.install_dir.join(&self.config.name);

        if let Ok(existing) = async_fs::metadata(&target).await {
            if existing.len() == asset_meta.len() {
                debug!("FFmpeg binary already installed at {}", target.display());
                return Ok(target);
            }
        }

        info!("Installing {} to {}", asset.display(), target.display());
        async_fs::create_dir_all(&self.config.install_dir).await?;

        let temp_path = target.with_extension("tmp");
        async_fs::copy(asset, &temp_path).await?;
        make_executable(&temp_path).await?;
        async_fs::rename(&temp_path, &target).await?;

        Ok(target)
    }

    async fn verify(&self, path: &Path) -> Result<String> {
        debug!("Verifying {} -version", path.display());

        let output = ProcessCommand::new(path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                FfrunError::NotSupported(format!("cannot execute {}: {}", path.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfrunError::NotSupported(format!(
                "{} -version failed: {}",
                path.display(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or("Unknown version").to_string();
        info!("FFmpeg version: {}", version);
        Ok(version)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    async_fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
