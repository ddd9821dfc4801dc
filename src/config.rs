use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Upper bound for awaited commands, in seconds. 0 waits forever.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_volume")]
    pub initial_volume: f64,

    /// Step used by the front-end's forward/rewind commands.
    #[serde(default = "default_seek_step")]
    pub seek_step_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_element")]
    pub element: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_sink: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_sink: Option<String>,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Config {
    /// Loads the user config, writing the defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        info!("Config loaded successfully");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let volume = self.playback.initial_volume;
        ensure!(
            volume.is_finite() && (0.0..=1.0).contains(&volume),
            "playback.initial_volume must be between 0.0 and 1.0, got {}",
            volume
        );
        ensure!(
            !self.engine.element.trim().is_empty(),
            "engine.element must not be empty"
        );
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("async-playbin").join("config.toml"))
    }
}

impl PlaybackConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn seek_step(&self) -> Duration {
        Duration::from_secs(self.seek_step_secs)
    }
}

impl EngineConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            initial_volume: default_volume(),
            seek_step_secs: default_seek_step(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            element: default_element(),
            audio_sink: None,
            video_sink: None,
            startup_timeout_ms: default_startup_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

// Default value functions
fn default_command_timeout() -> u64 { 30 }
fn default_volume() -> f64 { 1.0 }
fn default_seek_step() -> u64 { 10 }
fn default_element() -> String { "playbin".to_string() }
fn default_startup_timeout() -> u64 { 5000 }
fn default_shutdown_timeout() -> u64 { 2000 }
