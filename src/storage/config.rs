//! Configuration handling for dcmview
//!
//! Configuration is stored in `~/.config/dcmview/config.toml` (or the
//! platform equivalent) unless an explicit file is given. Every section is
//! optional; missing keys fall back to the defaults below.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ExclusionRules, FilterError, DEFAULT_PATTERNS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Conversion pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Concurrent conversion processes (defaults to the logical core count)
    pub jobs: Option<usize>,

    /// Seconds before a conversion is terminated (0 disables the timeout)
    pub timeout_secs: u64,

    /// Frame rate for previews of files that do not record one
    pub framerate: f64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            timeout_secs: 30,
            framerate: 25.0,
        }
    }
}

impl ConversionConfig {
    /// Returns the worker pool size
    pub fn effective_jobs(&self) -> usize {
        self.jobs
            .or_else(|| std::thread::available_parallelism().ok().map(usize::from))
            .unwrap_or(1)
            .max(1)
    }

    /// Returns the conversion timeout, if enabled
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Artifact cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the platform cache directory)
    pub dir: Option<PathBuf>,
}

/// Rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Width of the attribute name column; longer names are truncated
    pub field_width: usize,

    /// Height of directory thumbnails in pixels
    pub thumbnail_size: u32,

    /// Height of the image shown for single files
    pub image_size: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            field_width: 30,
            thumbnail_size: 128,
            image_size: 512,
        }
    }
}

/// Attribute exclusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Attribute names to hide
    pub names: Vec<String>,

    /// Regex patterns of attribute names to hide
    pub patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl FilterConfig {
    pub fn rules(&self) -> Result<ExclusionRules, FilterError> {
        ExclusionRules::new(self.names.iter().cloned(), &self.patterns)
    }
}

/// External tool names or paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Writes the XML attribute dump
    pub dump: String,

    /// Converts a file to PNG
    pub image: String,

    /// Writes all frames of a file to stdout
    pub frames: String,

    /// Arguments of the frames tool, before the source path
    pub frame_args: Vec<String>,

    /// Encodes frames read from stdin into a video
    pub encoder: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dump: "dcm2xml".to_string(),
            image: "dcmj2pnm".to_string(),
            frames: "dcmj2pnm".to_string(),
            frame_args: vec!["--all-frames".to_string(), "--write-bmp".to_string()],
            encoder: "ffmpeg".to_string(),
        }
    }
}

/// Video player settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Player executable
    pub command: String,

    /// Option template (placeholders: {title}, {file})
    pub options: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: "mpv".to_string(),
            options: "--loop-file=inf --title={title}".to_string(),
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub conversion: ConversionConfig,
    pub cache: CacheConfig,
    pub display: DisplayConfig,
    pub filter: FilterConfig,
    pub tools: ToolsConfig,
    pub player: PlayerConfig,
}

impl Config {
    /// Returns the config directory
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "dcmview", "dcmview").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns the default config file location
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Loads configuration from an explicit file, or from the default
    /// location when present
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Checks value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversion.jobs == Some(0) {
            return Err(ConfigError::Invalid("conversion.jobs must be at least 1".into()));
        }
        if !(self.conversion.framerate > 0.0) {
            return Err(ConfigError::Invalid("conversion.framerate must be positive".into()));
        }
        if self.display.field_width < 2 {
            return Err(ConfigError::Invalid("display.field_width must be at least 2".into()));
        }
        if self.display.thumbnail_size == 0 || self.display.image_size == 0 {
            return Err(ConfigError::Invalid("display sizes must be positive".into()));
        }
        Ok(())
    }

    /// Returns the cache directory
    pub fn cache_dir(&self) -> Result<PathBuf> {
        self.cache
            .dir
            .clone()
            .or_else(crate::storage::DiskCache::default_root)
            .ok_or_else(|| anyhow::anyhow!("Could not determine cache directory"))
    }

    /// Saves the configuration
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }
}
