//! Process-launch configuration: CLI flags plus the static JSON document they
//! can override. Distinct from `preferences`, which is the small, durable,
//! hub-mutable document (active wake words, volume, LED count).

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Parser, Debug)]
#[command(name = "voice-satellite")]
#[command(about = "Voice-satellite endpoint for a home-automation hub")]
pub struct Args {
    /// Path to the static JSON configuration document.
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Satellite display name advertised to the hub.
    #[arg(long)]
    pub name: Option<String>,

    /// Audio input device identifier (cpal device name).
    #[arg(long)]
    pub input_device: Option<String>,

    /// Audio output device identifier (passed through to the media player).
    #[arg(long)]
    pub output_device: Option<String>,

    /// Listening host for the satellite protocol.
    #[arg(long)]
    pub host: Option<String>,

    /// Listening port for the satellite protocol.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory containing wake-word manifests (repeatable).
    #[arg(long = "wake-word-dir")]
    pub wake_word_dirs: Vec<PathBuf>,

    /// Model ID used as the dedicated stop-word detector.
    #[arg(long)]
    pub stop_model: Option<String>,

    /// Refractory period, in seconds, applied to newly loaded detectors.
    #[arg(long)]
    pub refractory_seconds: Option<f64>,

    /// Path to the durable preferences document.
    #[arg(long)]
    pub preferences_file: Option<PathBuf>,

    /// List available audio input devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub input_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1024
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordConfig {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    #[serde(default = "default_stop_model")]
    pub stop_model: String,
    #[serde(default = "default_refractory")]
    pub refractory_seconds: f64,
}

fn default_stop_model() -> String {
    "stop".to_string()
}

fn default_refractory() -> f64 {
    2.0
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            stop_model: default_stop_model(),
            refractory_seconds: default_refractory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6053
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    #[serde(default = "default_led_count")]
    pub num_leds: u32,
}

fn default_led_count() -> u32 {
    3
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            num_leds: default_led_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_wakeup_sound")]
    pub wakeup_sound: String,
    #[serde(default = "default_timer_sound")]
    pub timer_finished_sound: String,
    #[serde(default = "default_preferences_file")]
    pub preferences_file: PathBuf,
}

fn default_name() -> String {
    "voice-satellite".to_string()
}
fn default_wakeup_sound() -> String {
    "sounds/wake_word_triggered.flac".to_string()
}
fn default_timer_sound() -> String {
    "sounds/timer_finished.flac".to_string()
}
fn default_preferences_file() -> PathBuf {
    PathBuf::from("preferences.json")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            wakeup_sound: default_wakeup_sound(),
            timer_finished_sound: default_timer_sound(),
            preferences_file: default_preferences_file(),
        }
    }
}

/// Static, process-launch configuration. Loaded once at startup and merged
/// with CLI overrides; never mutated afterward (contrast `Preferences`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub wake_word: WakeWordConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub led: LedConfig,
}

impl AppConfig {
    /// Load from `path` if it exists; otherwise fall back to defaults. A
    /// missing config file is not an error — only a malformed one is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply CLI flag overrides on top of the loaded document.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(name) = &args.name {
            self.app.name = name.clone();
        }
        if let Some(device) = &args.input_device {
            self.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &args.output_device {
            self.audio.output_device = Some(device.clone());
        }
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if !args.wake_word_dirs.is_empty() {
            self.wake_word.directories = args.wake_word_dirs.clone();
        }
        if let Some(stop_model) = &args.stop_model {
            self.wake_word.stop_model = stop_model.clone();
        }
        if let Some(refractory) = args.refractory_seconds {
            self.wake_word.refractory_seconds = refractory;
        }
        if let Some(preferences_file) = &args.preferences_file {
            self.app.preferences_file = preferences_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = AppConfig::load(Path::new("/nonexistent/voice-satellite.json")).unwrap();
        assert_eq!(config.server.port, 6053);
        assert_eq!(config.wake_word.stop_model, "stop");
    }

    #[test]
    fn loads_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"port": 9000}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn args_override_loaded_config() {
        let mut config = AppConfig::default();
        let args = Args {
            config: PathBuf::from("config.json"),
            name: Some("kitchen".to_string()),
            input_device: None,
            output_device: None,
            host: None,
            port: Some(7000),
            wake_word_dirs: Vec::new(),
            stop_model: None,
            refractory_seconds: None,
            preferences_file: None,
            list_devices: false,
            verbose: 0,
        };
        config.apply_args(&args);
        assert_eq!(config.app.name, "kitchen");
        assert_eq!(config.server.port, 7000);
    }
}
