use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application configuration for the subtitle burner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the ffmpeg binary (resolved through PATH when bare)
    pub ffmpeg_bin: PathBuf,
    /// Telemetry binary queried by the system monitor
    pub monitor_bin: PathBuf,
    /// Arguments passed to the telemetry binary
    pub monitor_args: Vec<String>,
    /// Seconds between two telemetry samples
    pub monitor_interval_secs: u64,
    /// Upper bound for a single telemetry query
    pub monitor_timeout_secs: u64,
    /// Duration assumed when the probe finds no duration marker
    pub fallback_duration_secs: f64,
    /// Grace period after a termination request before the process is killed
    pub terminate_grace_secs: u64,
    /// Idle delay bound of the pause wait in milliseconds
    pub pause_idle_ms: u64,
    /// Name of the output folder created next to the first input
    pub output_dir_name: String,
    /// Constant quality value handed to the hardware encoder
    pub video_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl AppConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            monitor_bin: PathBuf::from("nvidia-smi"),
            monitor_args: vec![
                "--query-gpu=utilization.gpu".to_string(),
                "--format=csv,noheader,nounits".to_string(),
            ],
            monitor_interval_secs: 2,
            monitor_timeout_secs: 5,
            fallback_duration_secs: 100.0,
            terminate_grace_secs: 5,
            pause_idle_ms: 500,
            output_dir_name: "Output_V3".to_string(),
            video_quality: 22,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_secs.max(1))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn pause_idle(&self) -> Duration {
        Duration::from_millis(self.pause_idle_ms.max(10))
    }
}

/// NVENC speed/quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncodePreset {
    Fast,
    #[default]
    Balanced,
    Best,
}

impl EncodePreset {
    pub fn nvenc_name(&self) -> &'static str {
        match self {
            EncodePreset::Fast => "p1",
            EncodePreset::Balanced => "p4",
            EncodePreset::Best => "p7",
        }
    }
}

/// How audio streams are carried into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AudioMode {
    #[default]
    Copy,
    ReEncode,
    Normalize,
}

/// Side effect executed once a batch reaches a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FinishAction {
    #[default]
    None,
    Notify,
    CloseApp,
    ShutdownHost,
}

/// Subtitle primary colour, either from the palette or a raw ASS colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleColor {
    White,
    Yellow,
    Cyan,
    Green,
    /// ASS colour literal such as `&H00FFFF&` (BGR order)
    Custom(String),
}

impl Default for SubtitleColor {
    fn default() -> Self {
        SubtitleColor::White
    }
}

impl SubtitleColor {
    pub fn ass_value(&self) -> &str {
        match self {
            SubtitleColor::White => "&HFFFFFF&",
            SubtitleColor::Yellow => "&H00FFFF&",
            SubtitleColor::Cyan => "&HFFFF00&",
            SubtitleColor::Green => "&H00FF00&",
            SubtitleColor::Custom(value) => value,
        }
    }
}

/// Per-batch encode settings, snapshotted when a batch starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub font_name: String,
    pub font_size: u32,
    pub color: SubtitleColor,
    pub preset: EncodePreset,
    pub audio_mode: AudioMode,
    pub finish_action: FinishAction,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            font_name: "Arial".to_string(),
            font_size: 24,
            color: SubtitleColor::White,
            preset: EncodePreset::Balanced,
            audio_mode: AudioMode::Copy,
            finish_action: FinishAction::None,
        }
    }
}

impl EncodeSettings {
    /// Check the invariants a batch relies on
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.font_name.trim().is_empty() {
            return Err("font name must not be empty".to_string());
        }
        if self.font_size == 0 {
            return Err("font size must be greater than zero".to_string());
        }
        if let SubtitleColor::Custom(value) = &self.color {
            let hex = value
                .strip_prefix("&H")
                .and_then(|rest| rest.strip_suffix('&'))
                .unwrap_or("");
            if hex.is_empty() || hex.len() > 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("invalid ASS colour: {}", value));
            }
        }
        Ok(())
    }

    /// ASS `force_style` string applied to the burned subtitles
    pub fn force_style(&self) -> String {
        format!(
            "FontName={},Fontsize={},PrimaryColour={},Bold=1,Outline=2,Shadow=1,MarginV=25",
            self.font_name,
            self.font_size,
            self.color.ass_value()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.fallback_duration_secs, 100.0);
        assert_eq!(cfg.monitor_interval(), Duration::from_secs(2));
        assert_eq!(cfg.terminate_grace(), Duration::from_secs(5));
        assert_eq!(cfg.output_dir_name, "Output_V3");
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let cfg = AppConfig::load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_load_toml_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burner.toml");
        std::fs::write(&path, "ffmpeg_bin = \"/opt/ffmpeg/bin/ffmpeg\"\nterminate_grace_secs = 9\n").unwrap();

        let cfg = AppConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(cfg.terminate_grace_secs, 9);
        assert_eq!(cfg.monitor_bin, PathBuf::from("nvidia-smi"));
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burner.json");
        std::fs::write(&path, r#"{"fallback_duration_secs": 42.5}"#).unwrap();

        let cfg = AppConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.fallback_duration_secs, 42.5);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burner.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(AppConfig::load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_force_style() {
        let settings = EncodeSettings {
            color: SubtitleColor::Yellow,
            ..Default::default()
        };
        assert_eq!(
            settings.force_style(),
            "FontName=Arial,Fontsize=24,PrimaryColour=&H00FFFF&,Bold=1,Outline=2,Shadow=1,MarginV=25"
        );
    }

    #[test]
    fn test_preset_names() {
        assert_eq!(EncodePreset::Fast.nvenc_name(), "p1");
        assert_eq!(EncodePreset::Balanced.nvenc_name(), "p4");
        assert_eq!(EncodePreset::Best.nvenc_name(), "p7");
    }

    #[test]
    fn test_validate_custom_color() {
        let mut settings = EncodeSettings::default();
        settings.color = SubtitleColor::Custom("&H0000FF&".to_string());
        assert!(settings.validate().is_ok());

        settings.color = SubtitleColor::Custom("red".to_string());
        assert!(settings.validate().is_err());
    }

    proptest! {
        #[test]
        fn test_font_size_validation(size in 0u32..200u32) {
            let settings = EncodeSettings { font_size: size, ..Default::default() };
            prop_assert_eq!(settings.validate().is_ok(), size > 0);
        }
    }
}
