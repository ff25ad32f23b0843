//! Audio source configuration
//!
//! The configuration is an explicit value handed to
//! [`Session::start`](crate::session::Session::start) and shared read-only
//! with the pipeline. It can be built in code or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_PTIME_MS, DEFAULT_SOURCE_CHANNELS, DEFAULT_SOURCE_RATE};
use crate::error::ConfigError;

/// Sample format of captured or encoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    #[default]
    S16le,
    /// 32-bit float
    Float,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn sample_size(&self) -> usize {
        match self {
            SampleFormat::S16le => 2,
            SampleFormat::Float => 4,
        }
    }
}

/// How the drain routine is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxMode {
    /// Drain inline from the capture callback
    #[default]
    Poll,
    /// Drain from a dedicated pacing thread
    Thread,
}

/// What the drain does with a frame after one or more filters failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterErrorPolicy {
    /// Log the failures and encode the frame anyway
    #[default]
    Continue,
    /// Drop the frame once the whole chain has run
    DropFrame,
}

/// Configuration of one audio source session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture backend module name (e.g. "cpal")
    pub src_mod: String,

    /// Capture device name; empty or "default" selects the default device
    pub src_dev: String,

    /// Sample format delivered by the capture backend
    pub src_fmt: SampleFormat,

    /// Sample format handed to the encoder
    pub enc_fmt: SampleFormat,

    /// Capture sample rate; 0 selects the default
    pub srate_src: u32,

    /// Capture channel count; 0 selects the default
    pub channels_src: u16,

    /// Optional announcement played before the microphone takes over
    pub announcement: Option<PathBuf>,

    /// Scheduling discipline
    pub txmode: TxMode,

    /// Packet interval in milliseconds
    pub ptime_ms: u32,

    /// Filter failure handling
    pub filter_error_policy: FilterErrorPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            src_mod: "cpal".to_string(),
            src_dev: "default".to_string(),
            src_fmt: SampleFormat::S16le,
            enc_fmt: SampleFormat::S16le,
            srate_src: 0,
            channels_src: 0,
            announcement: None,
            txmode: TxMode::Poll,
            ptime_ms: DEFAULT_PTIME_MS,
            filter_error_policy: FilterErrorPolicy::Continue,
        }
    }
}

impl AudioConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the per-user config file, or fall back to defaults if absent
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ptime_ms == 0 || self.ptime_ms > 1000 {
            return Err(ConfigError::Invalid {
                field: "ptime_ms",
                reason: format!("{} is outside 1..=1000", self.ptime_ms),
            });
        }
        if self.channels_src > 2 {
            return Err(ConfigError::Invalid {
                field: "channels_src",
                reason: format!("{} channels not supported", self.channels_src),
            });
        }
        if self.src_mod.is_empty() {
            return Err(ConfigError::Invalid {
                field: "src_mod",
                reason: "capture module must be set".to_string(),
            });
        }
        Ok(())
    }

    /// Effective capture sample rate
    pub fn source_rate(&self) -> u32 {
        if self.srate_src == 0 {
            DEFAULT_SOURCE_RATE
        } else {
            self.srate_src
        }
    }

    /// Effective capture channel count
    pub fn source_channels(&self) -> u16 {
        if self.channels_src == 0 {
            DEFAULT_SOURCE_CHANNELS
        } else {
            self.channels_src
        }
    }
}

/// Location of the per-user configuration file
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "rtp-audio-source", "rtp-audio-source")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
