use crate::validate_enum;
use anyhow::{Context, Result};
use common::ChannelLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub decoder: DecoderSettings,

    #[serde(default)]
    pub gpu: GpuSettings,
}

/// General settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Playback pacing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// Default speed multiplier applied when the caller does not pick one
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Interval between statistics log lines (0 disables them)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_speed() -> f64 {
    1.0
}
fn default_stats_interval() -> u64 {
    5
}

/// Decoder pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderSettings {
    /// Pixel layout requested from the decoder ("bgra" or "bgr")
    #[serde(default = "default_output_format")]
    pub output_format: String,

    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,

    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            open_timeout_secs: default_open_timeout(),
            pull_timeout_secs: default_pull_timeout(),
        }
    }
}

fn default_output_format() -> String {
    "bgra".to_string()
}
fn default_open_timeout() -> u64 {
    10
}
fn default_pull_timeout() -> u64 {
    5
}

impl DecoderSettings {
    pub fn layout(&self) -> ChannelLayout {
        match self.output_format.as_str() {
            "bgr" => ChannelLayout::Bgr,
            _ => ChannelLayout::Bgra,
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

/// GPU upload settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuSettings {
    /// Texture upload strategy ("auto", "direct" or "staged")
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            upload_path: default_upload_path(),
        }
    }
}

fn default_upload_path() -> String {
    "auto".to_string()
}

impl GpuSettings {
    pub fn upload_path(&self) -> UploadPath {
        UploadPath::parse(&self.upload_path).unwrap_or_default()
    }
}

/// Which texture upload strategy to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadPath {
    /// Pick from the adapter's capabilities
    #[default]
    Auto,
    /// Write straight into the texture through the queue
    Direct,
    /// Fill a staging buffer and copy it into the texture
    Staged,
}

impl UploadPath {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "direct" => Some(Self::Direct),
            "staged" => Some(Self::Staged),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::Staged => "staged",
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("videotex");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_log_level(&self.general.log_level)?;
        validate_speed(self.playback.speed)?;
        validate_output_format(&self.decoder.output_format)?;

        if self.decoder.open_timeout_secs == 0 {
            anyhow::bail!("decoder.open_timeout_secs must be at least 1");
        }
        if self.decoder.pull_timeout_secs == 0 {
            anyhow::bail!("decoder.pull_timeout_secs must be at least 1");
        }

        validate_upload_path(&self.gpu.upload_path)
    }

    /// Interval for periodic statistics logging, if enabled
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.playback.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn validate_log_level(level: &str) -> Result<()> {
    validate_enum!(level, "trace", "debug", "info", "warn", "error")
}

fn validate_output_format(format: &str) -> Result<()> {
    validate_enum!(format, "bgra", "bgr")
}

fn validate_upload_path(path: &str) -> Result<()> {
    validate_enum!(path, "auto", "direct", "staged")
}

/// Check a playback speed multiplier
pub fn validate_speed(speed: f64) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        anyhow::bail!("Invalid playback speed: {} (must be a positive number)", speed);
    }
    Ok(())
}
