use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::overlay::PalettePreset;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LiveViewConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub polling: PollingConfig,
    pub buffer: BufferConfig,
    pub overlay: OverlayConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame rate requested from the backend's image stream.
    pub fps: u32,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OverlayConfig {
    pub palette: PalettePreset,
    pub line_width: f64,
    pub refresh_hz: u32,
    pub surface_width: u32,
    pub surface_height: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub health_check_interval_sec: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl OverlayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

impl MonitoringConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_sec.max(1))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/api".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 6,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_attempts: 8,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 20 }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            palette: PalettePreset::Status,
            line_width: 2.0,
            refresh_hz: 30,
            surface_width: 640,
            surface_height: 480,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval_sec: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Layers an optional config file under `LIVEWATCH__*` environment overrides.
pub fn load_config(path: &str) -> Result<LiveViewConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("LIVEWATCH").separator("__"))
        .build()?;

    let config: LiveViewConfig = settings.try_deserialize()?;
    if config.buffer.capacity == 0 {
        return Err(crate::error::LiveViewError::Config(
            "buffer.capacity must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let reconnect = ReconnectConfig {
            initial_backoff_ms: 500,
            max_backoff_ms: 3000,
            max_attempts: 5,
        };
        assert_eq!(reconnect.backoff(1), Duration::from_millis(500));
        assert_eq!(reconnect.backoff(2), Duration::from_millis(1000));
        assert_eq!(reconnect.backoff(3), Duration::from_millis(2000));
        assert_eq!(reconnect.backoff(4), Duration::from_millis(3000));
        assert_eq!(reconnect.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/livewatch-config").unwrap();
        assert_eq!(config.buffer.capacity, 20);
        assert_eq!(config.polling.interval_ms, 3000);
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.overlay.palette, PalettePreset::Status);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = std::env::temp_dir().join(format!("livewatch-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("viewer.toml");
        std::fs::write(&path, "[buffer]\ncapacity = 5\n\n[overlay]\npalette = \"classic\"\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.buffer.capacity, 5);
        assert_eq!(config.overlay.palette, PalettePreset::Classic);
        assert_eq!(config.stream.fps, 6);

        std::fs::remove_dir_all(dir).ok();
    }
}
