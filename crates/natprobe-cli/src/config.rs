//! Configuration system for the natprobe CLI.

use natprobe_discovery::nat::types::{DEFAULT_SOFTWARE, DEFAULT_STUN_SERVER};
use natprobe_discovery::{DetectorConfig, RetransmitPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// natprobe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// STUN server configuration
    #[serde(default)]
    pub stun: StunConfig,
    /// Retransmission configuration
    #[serde(default)]
    pub retransmit: RetransmitConfig,
    /// Detection run configuration
    #[serde(default)]
    pub detect: DetectConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// STUN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StunConfig {
    /// STUN server (host:port)
    #[serde(default = "default_server")]
    pub server: String,
    /// Local bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// SOFTWARE attribute; empty disables it
    #[serde(default = "default_software")]
    pub software: String,
}

/// Retransmission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetransmitConfig {
    /// Initial retransmission timeout in milliseconds
    #[serde(default = "default_initial_rto_ms")]
    pub initial_rto_ms: u64,
    /// Maximum retransmission timeout in milliseconds
    #[serde(default = "default_max_rto_ms")]
    pub max_rto_ms: u64,
    /// Transmissions per probe
    #[serde(default = "default_max_transmissions")]
    pub max_transmissions: u32,
}

/// Detection run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Overall deadline for one classification in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_server() -> String {
    DEFAULT_STUN_SERVER.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_software() -> String {
    DEFAULT_SOFTWARE.to_string()
}

fn default_initial_rto_ms() -> u64 {
    100
}

fn default_max_rto_ms() -> u64 {
    1600
}

fn default_max_transmissions() -> u32 {
    9
}

fn default_deadline_secs() -> u64 {
    // Four probes at the full default schedule (9.5 s each) plus slack
    45
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            bind_addr: default_bind_addr(),
            software: default_software(),
        }
    }
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            initial_rto_ms: default_initial_rto_ms(),
            max_rto_ms: default_max_rto_ms(),
            max_transmissions: default_max_transmissions(),
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("natprobe/config.toml")
    }

    /// Load the config at `path`, falling back to defaults when the default
    /// path does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file is missing or any file
    /// fails to parse.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse bind address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stun.bind_addr.parse()?)
    }

    /// Overall classification deadline
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.detect.deadline_secs)
    }

    /// Build the detector settings
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid.
    pub fn detector_config(&self) -> anyhow::Result<DetectorConfig> {
        let software = Some(self.stun.software.clone()).filter(|s| !s.is_empty());

        Ok(DetectorConfig {
            server: self.stun.server.clone(),
            bind_addr: self.parse_bind_addr()?,
            software,
            retransmit: RetransmitPolicy {
                initial_rto: Duration::from_millis(self.retransmit.initial_rto_ms),
                max_rto: Duration::from_millis(self.retransmit.max_rto_ms),
                max_transmissions: self.retransmit.max_transmissions,
            },
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host_port(&self.stun.server, "STUN server")?;
        self.parse_bind_addr()?;

        let retransmit = &self.retransmit;
        if retransmit.initial_rto_ms == 0 || retransmit.initial_rto_ms > retransmit.max_rto_ms {
            anyhow::bail!(
                "Initial RTO must be between 1 and max RTO ({} ms), got {} ms",
                retransmit.max_rto_ms,
                retransmit.initial_rto_ms
            );
        }
        if retransmit.max_transmissions == 0 || retransmit.max_transmissions > 32 {
            anyhow::bail!("Max transmissions must be between 1 and 32");
        }

        if self.detect.deadline_secs == 0 {
            anyhow::bail!("Deadline must be at least 1 second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!(
            "{} '{}' missing port (expected format: host:port)",
            name,
            addr
        );
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{} '{}' has invalid port: {}", name, addr, port_str))?;

    if port == 0 {
        anyhow::bail!("{} '{}' has invalid port: 0", name, addr);
    }

    if host.is_empty() || host == "[]" {
        anyhow::bail!("{} '{}' has empty hostname", name, addr);
    }

    if host.contains('/') || host.contains('\\') || host.contains(char::is_whitespace) {
        anyhow::bail!("{} '{}' contains invalid characters", name, addr);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.stun.server, DEFAULT_STUN_SERVER);
        assert_eq!(config.stun.server, "stun.ekiga.net:3478");
        assert_eq!(config.stun.bind_addr, "0.0.0.0:0");
        assert_eq!(config.retransmit.initial_rto_ms, 100);
        assert_eq!(config.retransmit.max_transmissions, 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.stun.server = "stun.example.com".to_string();
        assert!(config.validate().is_err());

        config.stun.server = "stun.example.com:0".to_string();
        assert!(config.validate().is_err());

        config.stun.server = "[2001:db8::1]:3478".to_string();
        assert!(config.validate().is_ok());

        config.retransmit.initial_rto_ms = 5000;
        assert!(config.validate().is_err());

        config.retransmit.initial_rto_ms = 100;
        config.retransmit.max_transmissions = 0;
        assert!(config.validate().is_err());

        config.retransmit.max_transmissions = 9;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        config.stun.bind_addr = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_config() {
        let mut config = Config::default();
        config.stun.software = String::new();
        config.retransmit.initial_rto_ms = 50;

        let detector = config.detector_config().unwrap();
        assert_eq!(detector.software, None);
        assert_eq!(detector.retransmit.initial_rto, Duration::from_millis(50));
        assert_eq!(detector.retransmit.max_rto, Duration::from_millis(1600));
        assert!(detector.bind_addr.ip().is_unspecified());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [stun]
            server = "stun.example.net:3478"
            "#,
        )
        .unwrap();

        assert_eq!(config.stun.server, "stun.example.net:3478");
        assert_eq!(config.stun.bind_addr, "0.0.0.0:0");
        assert_eq!(config.retransmit.max_rto_ms, 1600);
        assert_eq!(config.detect.deadline_secs, 45);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[retransmit]\ninitial_rto_ms = 20\nmax_rto_ms = 40\nmax_transmissions = 2\n",
        )
        .unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.retransmit.initial_rto_ms, 20);
        assert_eq!(config.retransmit.max_transmissions, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(Config::load_or_default(Some(&path)).is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.stun.server, deserialized.stun.server);
        assert_eq!(
            config.retransmit.max_rto_ms,
            deserialized.retransmit.max_rto_ms
        );
    }
}
