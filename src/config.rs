//! Application configuration
//!
//! Settings are grouped by subsystem and loaded from a TOML file. Every field
//! has a default, so a partial (or missing) file is valid.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
}

/// UDP transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds to
    pub bind_address: IpAddr,
    /// Server port; clients send here, the server listens here
    pub server_port: u16,
    /// Datagrams above this size are dropped
    pub max_datagram_size: usize,
    /// SO_SNDBUF, if set
    pub send_buffer_size: Option<usize>,
    /// SO_RCVBUF, if set
    pub recv_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server_port: DEFAULT_SERVER_PORT,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

/// Handshake, heartbeat and liveness timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub join_retry_interval_ms: u64,
    pub join_max_attempts: u32,
    pub heartbeat_interval_ms: u64,
    /// 0 disables inactivity eviction on the server
    pub client_timeout_secs: u64,
    pub eviction_check_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_retry_interval_ms: JOIN_RETRY_INTERVAL.as_millis() as u64,
            join_max_attempts: JOIN_MAX_ATTEMPTS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL.as_millis() as u64,
            client_timeout_secs: CLIENT_TIMEOUT.as_secs(),
            eviction_check_interval_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn join_retry_interval(&self) -> Duration {
        Duration::from_millis(self.join_retry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Inactivity limit, or `None` when eviction is disabled
    pub fn client_timeout(&self) -> Option<Duration> {
        (self.client_timeout_secs > 0).then(|| Duration::from_secs(self.client_timeout_secs))
    }

    pub fn eviction_check_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_check_interval_ms)
    }
}

/// Audio pipeline and device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub frames_per_block: usize,
    pub vad_threshold: f32,
    pub speaking_hold_ms: u64,
    /// zlib level, 0-9
    pub compression_level: u32,
    pub outbound_queue_capacity: usize,
    pub max_peer_queue_frames: usize,
    /// Input device name; default device when unset
    pub input_device: Option<String>,
    /// Output device name; default device when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_block: DEFAULT_FRAMES_PER_BLOCK,
            vad_threshold: VAD_THRESHOLD,
            speaking_hold_ms: SPEAKING_HOLD.as_millis() as u64,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            max_peer_queue_frames: MAX_PEER_QUEUE_FRAMES,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn speaking_hold(&self) -> Duration {
        Duration::from_millis(self.speaking_hold_ms)
    }

    /// Interleaved samples in one frame
    pub fn samples_per_block(&self) -> usize {
        self.frames_per_block * self.channels as usize
    }
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/speekchat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "speekchat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the default location); defaults if the file is absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Ok(Self::default()),
        };

        if path.exists() {
            tracing::info!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.frames_per_block == 0 {
            return Err(Error::Config("audio.frames_per_block must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(Error::Config("audio.channels must be > 0".into()));
        }
        if self.audio.compression_level > 9 {
            return Err(Error::Config("audio.compression_level must be 0-9".into()));
        }
        if self.audio.outbound_queue_capacity == 0 || self.audio.max_peer_queue_frames == 0 {
            return Err(Error::Config("audio queue capacities must be > 0".into()));
        }
        if self.session.join_max_attempts == 0 {
            return Err(Error::Config("session.join_max_attempts must be > 0".into()));
        }
        if self.network.max_datagram_size == 0 || self.network.max_datagram_size > 65_507 {
            return Err(Error::Config("network.max_datagram_size must be 1-65507".into()));
        }
        if self.session.join_retry_interval_ms == 0
            || self.session.heartbeat_interval_ms == 0
            || self.session.eviction_check_interval_ms == 0
        {
            return Err(Error::Config("session intervals must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = AppConfig::default();
        assert_eq!(config.network.server_port, 50005);
        assert_eq!(config.network.max_datagram_size, 8192);
        assert_eq!(config.session.join_max_attempts, 15);
        assert_eq!(config.session.join_retry_interval(), Duration::from_secs(2));
        assert_eq!(config.audio.frames_per_block, 1024);
        assert_eq!(config.audio.samples_per_block(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [session]
            join_max_attempts = 3

            [audio]
            channels = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.session.join_max_attempts, 3);
        assert_eq!(config.session.heartbeat_interval_ms, 5000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.samples_per_block(), 2048);
        assert_eq!(config.network.server_port, 50005);
    }

    #[test]
    fn test_zero_timeout_disables_eviction() {
        let session = SessionConfig {
            client_timeout_secs: 0,
            ..Default::default()
        };
        assert!(session.client_timeout().is_none());
        assert_eq!(
            SessionConfig::default().client_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_validate_rejects_zero_block() {
        let mut config = AppConfig::default();
        config.audio.frames_per_block = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("speekchat-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.audio.input_device = Some("USB Mic".into());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
