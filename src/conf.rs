//! Settings file: `~/.config/velvet-recorder/config.toml`

use crate::audio::{AnalyserConfig, DEFAULT_CHUNK_SIZE};
use crate::error::{RecorderError, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Preferred audio input device name
    /// If None, uses system default device
    #[serde(default)]
    pub audio_device: Option<String>,

    /// Requested sample rate in Hz
    /// If None, records at the device's native rate
    #[serde(default)]
    pub sample_rate: Option<u32>,

    /// Samples per captured chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Analysis window for the level meter (bins = fft_size / 2)
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Level meter smoothing between redraws (0.0-1.0)
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,

    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,

    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,

    /// Where recordings are written when no output path is given
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_fft_size() -> usize {
    AnalyserConfig::default().fft_size
}

fn default_smoothing() -> f32 {
    AnalyserConfig::default().smoothing
}

fn default_min_decibels() -> f32 {
    AnalyserConfig::default().min_decibels
}

fn default_max_decibels() -> f32 {
    AnalyserConfig::default().max_decibels
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_device: None,
            sample_rate: None,
            chunk_size: default_chunk_size(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            recordings_dir: None,
        }
    }
}

impl Settings {
    /// Load config from the default location
    /// Returns default settings if file doesn't exist or fails to parse
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            log::warn!("[config] Could not determine config directory, using defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(settings) => {
                    log::info!("[config] Loaded settings from: {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("[config] {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!(
                    "[config] No config file found at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| RecorderError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RecorderError::Config(format!("failed to serialize settings: {}", e)))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path().ok_or_else(|| {
            RecorderError::Config("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        log::info!("[config] Saved settings to: {}", path.display());
        Ok(())
    }

    /// Level meter configuration, validated
    pub fn analyser_config(&self) -> Result<AnalyserConfig> {
        let config = AnalyserConfig {
            fft_size: self.fft_size,
            smoothing: self.smoothing,
            min_decibels: self.min_decibels,
            max_decibels: self.max_decibels,
        };
        config.validate()?;
        Ok(config)
    }

    /// Configured recordings directory, or `<data dir>/velvet-recorder/recordings`
    pub fn recordings_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.recordings_dir {
            return Ok(dir.clone());
        }
        let data_dir = BaseDirs::new()
            .ok_or_else(|| RecorderError::Config("could not find data directory".to_string()))?
            .data_local_dir()
            .join("velvet-recorder")
            .join("recordings");
        Ok(data_dir)
    }

    /// Timestamped WAV path inside the recordings directory
    pub fn recording_path(&self) -> Result<PathBuf> {
        let timestamp = jiff::Zoned::now().strftime("%Y-%m-%d_%H-%M-%S");
        Ok(self.recordings_dir()?.join(format!("{}.wav", timestamp)))
    }
}

/// Get the path to the config file: ~/.config/velvet-recorder/config.toml
pub fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "velvet-recorder").map(|dirs| dirs.config_dir().join("config.toml"))
}
