//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where finished recordings and intermediate files are stored.
    pub output_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Encoded video width.
    pub width: u32,

    /// Encoded video height.
    pub height: u32,

    /// Video bit rate in bits per second.
    pub video_bit_rate: u32,

    /// Microphone sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Capture stereo (true) or mono (false).
    pub audio_stereo: bool,

    /// Audio bit rate in bits per second.
    pub audio_bit_rate: u32,

    /// Maximum recording length in microseconds (0 = unlimited).
    pub max_duration_us: i64,

    /// Whether sessions record the microphone.
    pub audio_enabled: bool,

    /// Upper bound for draining an encoder after end-of-stream, in milliseconds.
    pub drain_timeout_ms: u64,

    /// File name prefix for finished recordings.
    pub file_prefix: String,

    /// File name suffix (extension) for finished recordings.
    pub file_suffix: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "duotrack=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            video_bit_rate: 6_693_560,
            audio_sample_rate: 44_100,
            audio_stereo: true,
            audio_bit_rate: 128_000,
            max_duration_us: 60_000_000,
            audio_enabled: true,
            drain_timeout_ms: 5_000,
            file_prefix: "bc_media_".to_string(),
            file_suffix: ".mp4".to_string(),
        }
    }
}

impl RecordingDefaults {
    /// Drain bound as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Location the config is read from and written to.
    pub fn path() -> PathBuf {
        config_file_path()
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("duotrack").join("config.json")
}

/// Default recordings directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("duotrack").join("recordings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_recording_section_fills_defaults() {
        let json = r#"{
            "output_dir": "/tmp/out",
            "recording": { "width": 1080, "audio_enabled": false },
            "logging": { "level": "debug", "json": false, "file": null }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.recording.width, 1080);
        assert!(!config.recording.audio_enabled);
        assert_eq!(config.recording.audio_sample_rate, 44_100);
        assert_eq!(config.recording.drain_timeout(), Duration::from_secs(5));
    }
}
