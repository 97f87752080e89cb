//! Configuration management for the streaming core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Signaling, transport, and reconciliation configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signaling endpoint configuration.
    pub signaling: SignalingConfig,

    /// Transport (peer connection / data channel) configuration.
    pub transport: TransportConfig,

    /// Rendering geometry configuration.
    pub geometry: GeometryConfig,

    /// File upload pipeline configuration.
    pub upload: UploadConfig,

    /// Stats aggregator configuration.
    pub stats: StatsConfig,

    /// Persisted settings store configuration.
    pub persist: PersistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Base URL of the signaling websocket endpoint (e.g. "wss://host/ws").
    pub base_url: String,

    /// URL of the TURN/ICE configuration endpoint (e.g. "https://host/turn").
    pub turn_config_url: Option<String>,

    /// Initial reconnect backoff delay, in milliseconds.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect backoff ceiling, in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Force relay-only ICE candidates (TURN-only).
    #[serde(default)]
    pub force_relay: bool,

    /// High water mark for data channel `bufferedAmount`, in bytes, above
    /// which senders must back off.
    #[serde(default = "default_buffered_amount_high")]
    pub buffered_amount_high: u64,

    /// Low water mark, in bytes, below which a sender waiting on
    /// back-pressure may resume.
    #[serde(default = "default_buffered_amount_low")]
    pub buffered_amount_low: u64,

    /// Minimum yield interval while back-pressured, in milliseconds.
    #[serde(default = "default_backpressure_yield_ms")]
    pub backpressure_yield_ms: u64,

    /// Jitter-buffer minimize-latency re-assert interval, in milliseconds.
    #[serde(default = "default_jitter_buffer_tick_ms")]
    pub jitter_buffer_tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Trailing-edge resize debounce, in milliseconds.
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum chunk size in bytes (must stay under 64 KiB to fit the
    /// binary frame's length prefix budget).
    #[serde(default = "default_upload_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Stats snapshot interval, in milliseconds.
    #[serde(default = "default_stats_interval_ms")]
    pub snapshot_interval_ms: u64,

    /// Client fps/latency push interval, in milliseconds.
    #[serde(default = "default_client_stats_interval_ms")]
    pub client_push_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Directory backing the file-based persisted settings store.
    #[serde(default = "default_persist_dir")]
    pub store_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig {
                base_url: "ws://localhost:8080/ws".to_string(),
                turn_config_url: None,
                reconnect_base_ms: default_reconnect_base_ms(),
                reconnect_max_ms: default_reconnect_max_ms(),
            },
            transport: TransportConfig {
                force_relay: false,
                buffered_amount_high: default_buffered_amount_high(),
                buffered_amount_low: default_buffered_amount_low(),
                backpressure_yield_ms: default_backpressure_yield_ms(),
                jitter_buffer_tick_ms: default_jitter_buffer_tick_ms(),
            },
            geometry: GeometryConfig {
                resize_debounce_ms: default_resize_debounce_ms(),
            },
            upload: UploadConfig {
                chunk_size: default_upload_chunk_size(),
            },
            stats: StatsConfig {
                snapshot_interval_ms: default_stats_interval_ms(),
                client_push_interval_ms: default_client_stats_interval_ms(),
            },
            persist: PersistConfig {
                store_dir: default_persist_dir(),
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(ClientConfig::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.signaling.base_url.is_empty() {
            return Err("signaling.base_url must not be empty".into());
        }

        if self.signaling.reconnect_base_ms == 0 {
            return Err("signaling.reconnect_base_ms must be non-zero".into());
        }

        if self.signaling.reconnect_max_ms < self.signaling.reconnect_base_ms {
            return Err("signaling.reconnect_max_ms cannot be less than reconnect_base_ms".into());
        }

        if self.transport.buffered_amount_low >= self.transport.buffered_amount_high {
            return Err("transport.buffered_amount_low must be less than buffered_amount_high".into());
        }

        if self.upload.chunk_size == 0 || self.upload.chunk_size >= 64 * 1024 {
            return Err("upload.chunk_size must be non-zero and under 64 KiB".into());
        }

        if self.stats.snapshot_interval_ms == 0 {
            return Err("stats.snapshot_interval_ms must be non-zero".into());
        }

        Ok(())
    }
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_buffered_amount_high() -> u64 {
    1 << 20 // 1 MiB
}

fn default_buffered_amount_low() -> u64 {
    256 * 1024 // 256 KiB
}

fn default_backpressure_yield_ms() -> u64 {
    50
}

fn default_jitter_buffer_tick_ms() -> u64 {
    15
}

fn default_resize_debounce_ms() -> u64 {
    500
}

fn default_upload_chunk_size() -> usize {
    64 * 1024 - 1
}

fn default_stats_interval_ms() -> u64 {
    1_000
}

fn default_client_stats_interval_ms() -> u64 {
    5_000
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("./selkies-state")
}

#[cfg(test)]
mod tests {
    use super::ClientConfig;

    #[test]
    fn validate_accepts_defaults() {
        let cfg = ClientConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_signaling_url() {
        let mut cfg = ClientConfig::default();
        cfg.signaling.base_url.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_water_marks() {
        let mut cfg = ClientConfig::default();
        cfg.transport.buffered_amount_low = cfg.transport.buffered_amount_high;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_chunk() {
        let mut cfg = ClientConfig::default();
        cfg.upload.chunk_size = 64 * 1024;
        assert!(cfg.validate().is_err());
    }
}
