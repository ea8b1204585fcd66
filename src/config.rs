//! Server configuration, read from a TOML file.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tubedrop_core::artifacts::ArtifactConfig;
use tubedrop_core::jobs::JobConfig;
use tubedrop_core::utils;

/// The name of the configuration directory under the platform config directory.
const APP_DIR: &str = "tubedrop";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub downloads: DownloadsConfig,
    pub tool: ToolConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory of the web front end, served for every path outside the API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub dir: PathBuf,
    pub cleanup_delay_secs: u64,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("downloads"),
            cleanup_delay_secs: 5 * 60,
            retention_hours: 24,
            sweep_interval_secs: 60 * 60,
            max_concurrent_jobs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    pub executable: PathBuf,
    pub info_timeout_secs: u64,
    /// Stderr lines starting with one of these never fail a job.
    pub benign_stderr_prefixes: Vec<String>,
    pub download_url_prefix: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(utils::find_executable("yt-dlp")),
            info_timeout_secs: 30,
            benign_stderr_prefixes: Vec::new(),
            download_url_prefix: "/api/file".to_string(),
        }
    }
}

impl Config {
    /// Reads the configuration.
    ///
    /// With an explicit `path` the file must exist. Otherwise the default location is used, and a
    /// file with the default settings is written there if there is none yet.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(path) = path {
            let content = fs::read_to_string(path)?;
            return Ok(toml::from_str(&content)?);
        }

        let Some(config_path) = default_path() else {
            warn!("Could not find a valid config directory, using the default settings.");
            return Ok(Self::default());
        };

        if config_path.is_file() && fs::metadata(&config_path)?.len() != 0 {
            let content = fs::read_to_string(&config_path)?;
            return Ok(toml::from_str(&content)?);
        }

        let config = Self::default();
        if let Err(e) = config.save(&config_path) {
            warn!("Failed to write the default config to {}: {}", config_path.display(), e);
        } else {
            info!("Default configuration saved to: {}", config_path.display());
        }
        Ok(config)
    }

    /// Writes the configuration as TOML, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            executable: self.tool.executable.clone(),
            download_url_prefix: self.tool.download_url_prefix.clone(),
            benign_stderr_prefixes: self.tool.benign_stderr_prefixes.clone(),
            max_concurrent_jobs: self.downloads.max_concurrent_jobs,
        }
    }

    pub fn artifact_config(&self) -> ArtifactConfig {
        ArtifactConfig::new(
            Duration::from_secs(self.downloads.cleanup_delay_secs),
            Duration::from_secs(self.downloads.retention_hours * 60 * 60),
        )
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_secs(self.tool.info_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.downloads.sweep_interval_secs.max(1))
    }
}

/// `<config dir>/tubedrop/config.toml`, if the platform has a config directory.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}
