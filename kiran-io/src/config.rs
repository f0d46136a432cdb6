//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [adapter]
//! local_ip = "192.168.1.100"
//! discovery_probe = "ascii"     # or "framed", per firmware
//! discovery_window_ms = 2000
//!
//! [session]
//! command_timeout_ms = 20000
//! image_timeout_ms = 1000
//! heartbeat = true
//! heartbeat_interval_ms = 1000
//! lines_per_frame = 1024
//! header_mode = false
//!
//! [correction]
//! offset = true
//! gain = true
//! baseline = false
//! target_baseline = 0
//! ```
//!
//! Every field has a default; an empty file is a valid configuration for
//! a host on 0.0.0.0 with factory detector settings.

use crate::discovery::DiscoveryProbe;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

/// Network adapter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Local IPv4 address of the acquisition NIC.
    #[serde(default = "default_local_ip")]
    pub local_ip: Ipv4Addr,

    /// Probe dialect the detector firmware answers.
    #[serde(default)]
    pub discovery_probe: DiscoveryProbe,

    /// Reply-collection window for discovery.
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,
}

fn default_local_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_discovery_window_ms() -> u64 {
    2000
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            local_ip: default_local_ip(),
            discovery_probe: DiscoveryProbe::default(),
            discovery_window_ms: default_discovery_window_ms(),
        }
    }
}

/// Per-session timing and acquisition configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Control-channel transaction deadline.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Image-socket receive deadline.
    #[serde(default = "default_image_timeout_ms")]
    pub image_timeout_ms: u64,

    /// Start the liveness monitor when the session opens.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: bool,

    /// Liveness probe interval.
    ///
    /// **Valid range**: 200..=10000 ms. One probe per second is the
    /// firmware's expectation; faster probing steals control-channel
    /// bandwidth from the host.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Lines per assembled frame.
    #[serde(default = "default_lines_per_frame")]
    pub lines_per_frame: u32,

    /// Whether the detector prefixes line packets with headers.
    #[serde(default)]
    pub header_mode: bool,
}

fn default_command_timeout_ms() -> u64 {
    20_000
}

fn default_image_timeout_ms() -> u64 {
    1000
}

fn default_heartbeat() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_lines_per_frame() -> u32 {
    1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            image_timeout_ms: default_image_timeout_ms(),
            heartbeat: default_heartbeat(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            lines_per_frame: default_lines_per_frame(),
            header_mode: false,
        }
    }
}

/// Correction stage configuration applied to a session's engine.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default = "default_true")]
    pub offset: bool,
    #[serde(default = "default_true")]
    pub gain: bool,
    #[serde(default)]
    pub baseline: bool,
    #[serde(default)]
    pub target_baseline: u16,
}

fn default_true() -> bool {
    true
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            offset: true,
            gain: true,
            baseline: false,
            target_baseline: 0,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
}

const MIN_HEARTBEAT_INTERVAL_MS: u64 = 200;
const MAX_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse and validate TOML configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = basic_toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let interval = self.session.heartbeat_interval_ms;
        if !(MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&interval) {
            return Err(Error::Config(format!(
                "heartbeat_interval_ms must be between {}ms and {}ms (got {}ms)",
                MIN_HEARTBEAT_INTERVAL_MS, MAX_HEARTBEAT_INTERVAL_MS, interval
            )));
        }
        if self.session.lines_per_frame == 0 {
            return Err(Error::Config("lines_per_frame must be nonzero".into()));
        }
        if self.session.command_timeout_ms == 0 || self.session.image_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.session.lines_per_frame, 1024);
        assert_eq!(config.session.command_timeout_ms, 20_000);
        assert!(config.session.heartbeat);
        assert_eq!(config.adapter.discovery_probe, DiscoveryProbe::Ascii);
    }

    #[test]
    fn test_full_config_round_trip() {
        let toml = r#"
[adapter]
local_ip = "192.168.1.100"
discovery_probe = "framed"
discovery_window_ms = 500

[session]
command_timeout_ms = 5000
lines_per_frame = 512
header_mode = true

[correction]
baseline = true
target_baseline = 2048
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.adapter.local_ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(config.adapter.discovery_probe, DiscoveryProbe::Framed);
        assert_eq!(config.session.lines_per_frame, 512);
        assert!(config.session.header_mode);
        assert!(config.correction.baseline);
        assert_eq!(config.correction.target_baseline, 2048);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiran.toml");
        std::fs::write(&path, "[session]\nlines_per_frame = 256\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.session.lines_per_frame, 256);
        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_heartbeat_interval_validated() {
        let toml = "[session]\nheartbeat_interval_ms = 50\n";
        assert!(matches!(Config::parse(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_lines_rejected() {
        let toml = "[session]\nlines_per_frame = 0\n";
        assert!(Config::parse(toml).is_err());
    }
}
