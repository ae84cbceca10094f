//! Configuration system for the RECIPE CLI.

use crate::output::TraceFormat;
use recipe_core::table::{DEFAULT_MAX_DEGREE, DEFAULT_MAX_HOPS};
use recipe_core::{DriverConfig, HashVariant, HopConfig, RestartPolicy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RECIPE configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probability table
    pub table: TableConfig,
    /// Fingerprint strategy
    pub hash: HashConfig,
    /// Packet lifecycle driver
    pub driver: DriverSection,
    /// Hop emulator
    pub hop: HopSection,
    /// Trace output
    pub output: OutputConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Probability table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table file (one line per hop, `a_0, r_0, a_1, r_1, ...`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Hop dimension
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Degree dimension
    #[serde(default = "default_max_degree")]
    pub max_degree: usize,
}

/// Fingerprint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashConfig {
    /// Strategy
    #[serde(default)]
    pub variant: HashVariant,
    /// Seed for the mixing strategy; random per run when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    /// Schedule file for the precomputed strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<PathBuf>,
}

/// Driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSection {
    /// Hop address packets are sent to
    #[serde(default = "default_hop_addr")]
    pub hop_addr: String,
    /// Hop count at which packets terminate
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u8,
    /// Per-hop timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Resends per hop before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Packets in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Hop emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopSection {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Restart branch behavior
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

/// Trace output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory per-packet traces are written to
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Trace file format
    #[serde(default)]
    pub format: TraceFormat,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

fn default_max_degree() -> usize {
    DEFAULT_MAX_DEGREE
}

fn default_hop_addr() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_max_iterations() -> u8 {
    64
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_retries() -> u32 {
    3
}

fn default_max_in_flight() -> usize {
    256
}

fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recipe-traces")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_hops: default_max_hops(),
            max_degree: default_max_degree(),
        }
    }
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            hop_addr: default_hop_addr(),
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for HopSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            restart_policy: RestartPolicy::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: TraceFormat::default(),
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

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("recipe/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the driver's hop address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn hop_addr(&self) -> anyhow::Result<SocketAddr> {
        self.driver
            .hop_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid hop address '{}': {}", self.driver.hop_addr, e))
    }

    /// Parse the hop emulator's listen address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.hop.listen_addr.parse().map_err(|e| {
            anyhow::anyhow!("Invalid listen address '{}': {}", self.hop.listen_addr, e)
        })
    }

    /// Lifecycle driver settings
    ///
    /// # Errors
    ///
    /// Returns an error if the hop address is invalid.
    pub fn driver_config(&self) -> anyhow::Result<DriverConfig> {
        Ok(DriverConfig {
            hop_addr: self.hop_addr()?,
            max_iterations: self.driver.max_iterations,
            hop_timeout: Duration::from_millis(self.driver.timeout_ms),
            retry: RetryConfig {
                max_retries: self.driver.retries,
                ..RetryConfig::default()
            },
            max_in_flight: self.driver.max_in_flight,
        })
    }

    /// Hop emulator settings
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid.
    pub fn hop_config(&self) -> anyhow::Result<HopConfig> {
        Ok(HopConfig {
            listen_addr: self.listen_addr()?,
            restart_policy: self.hop.restart_policy,
            ..HopConfig::default()
        })
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.hop_addr()?;
        self.listen_addr()?;

        if self.table.max_hops == 0 || self.table.max_hops > DEFAULT_MAX_HOPS {
            anyhow::bail!("Table max_hops must be between 1 and {}", DEFAULT_MAX_HOPS);
        }
        if self.table.max_degree == 0 || self.table.max_degree > DEFAULT_MAX_DEGREE {
            anyhow::bail!(
                "Table max_degree must be between 1 and {}",
                DEFAULT_MAX_DEGREE
            );
        }

        if self.hash.variant == HashVariant::Precomputed && self.hash.schedule.is_none() {
            anyhow::bail!("Precomputed hash variant selected but no schedule file specified");
        }

        if self.driver.max_iterations == 0 {
            anyhow::bail!("Driver max_iterations must be positive");
        }
        if self.driver.timeout_ms == 0 || self.driver.timeout_ms > 60_000 {
            anyhow::bail!("Driver timeout_ms must be between 1 and 60000");
        }
        if self.driver.max_in_flight == 0 || self.driver.max_in_flight > 65_535 {
            anyhow::bail!("Driver max_in_flight must be between 1 and 65535");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.driver.hop_addr, "127.0.0.1:9000");
        assert_eq!(config.driver.max_iterations, 64);
        assert_eq!(config.table.max_degree, 256);
        assert_eq!(config.hash.variant, HashVariant::Mix);
        assert_eq!(config.hop.restart_policy, RestartPolicy::TwoThreshold);
        assert_eq!(config.output.format, TraceFormat::Csv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.hash.variant = HashVariant::Precomputed;
        assert!(config.validate().is_err());
        config.hash.schedule = Some(PathBuf::from("hashes.csv"));
        assert!(config.validate().is_ok());

        config.driver.timeout_ms = 0;
        assert!(config.validate().is_err());
        config.driver.timeout_ms = 500;

        config.table.max_degree = 300;
        assert!(config.validate().is_err());
        config.table.max_degree = 64;

        config.driver.hop_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());
        config.driver.hop_addr = "10.0.0.1:9000".to_string();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_driver_config_conversion() {
        let mut config = Config::default();
        config.driver.timeout_ms = 250;
        config.driver.retries = 7;

        let driver = config.driver_config().unwrap();
        assert_eq!(driver.hop_timeout, Duration::from_millis(250));
        assert_eq!(driver.retry.max_retries, 7);
        assert_eq!(driver.hop_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(driver.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [hash]
            variant = "crc32"

            [hop]
            restart_policy = "unconditional"
            "#,
        )
        .unwrap();

        assert_eq!(config.hash.variant, HashVariant::Crc32);
        assert_eq!(config.hop.restart_policy, RestartPolicy::Unconditional);
        assert_eq!(config.driver.max_iterations, 64);
        assert_eq!(config.hop.listen_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.table.path = Some(PathBuf::from("/srv/recipe/table.txt"));
        config.hash.seed = Some(42);
        config.output.format = TraceFormat::Json;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.table.path, config.table.path);
        assert_eq!(loaded.hash.seed, Some(42));
        assert_eq!(loaded.output.format, TraceFormat::Json);
    }
}
