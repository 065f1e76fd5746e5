//! Configuration for mailsift

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Milter listener configuration
    #[serde(default)]
    pub milter: MilterConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Shared cache configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// DNS / GeoIP resolver configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Rule engine configuration
    #[serde(default)]
    pub rules: RulesConfig,

    /// Feature extraction configuration
    #[serde(default)]
    pub filter: FilterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Milter listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilterConfig {
    /// Listen address: `host:port` or `unix:/path/to/socket`
    #[serde(default = "default_milter_listen")]
    pub listen: String,

    /// Maximum concurrent MTA connections
    #[serde(default = "default_milter_max_connections")]
    pub max_connections: usize,

    /// Idle read timeout in seconds
    #[serde(default = "default_milter_read_timeout")]
    pub read_timeout_secs: u64,

    /// Largest accepted frame (opcode + payload) in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Action flags offered during option negotiation
    #[serde(default = "default_milter_actions")]
    pub actions: u32,

    /// Protocol flags offered during option negotiation
    #[serde(default)]
    pub protocol: u32,
}

impl Default for MilterConfig {
    fn default() -> Self {
        Self {
            listen: default_milter_listen(),
            max_connections: default_milter_max_connections(),
            read_timeout_secs: default_milter_read_timeout(),
            max_frame_size: default_max_frame_size(),
            actions: default_milter_actions(),
            protocol: 0,
        }
    }
}

fn default_milter_listen() -> String {
    "127.0.0.1:11332".to_string()
}

fn default_milter_max_connections() -> usize {
    256
}

fn default_milter_read_timeout() -> u64 {
    300
}

fn default_max_frame_size() -> usize {
    // 64 KiB body chunks plus room for the opcode and headers
    65535 + 1024
}

fn default_milter_actions() -> u32 {
    // ADDHDRS | CHGBODY | ADDRCPT | DELRCPT | CHGHDRS | QUARANTINE | CHGFROM
    0x7f
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (PostgreSQL)
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Shared cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL; when unset an in-process cache is used
    pub url: Option<String>,
}

/// DNS / GeoIP resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Nameservers (`ip` or `ip:port`); empty means system configuration
    #[serde(default)]
    pub nameservers: Vec<String>,

    /// Per-lookup timeout in milliseconds
    #[serde(default = "default_resolver_timeout")]
    pub timeout_ms: u64,

    /// How long PTR answers are kept in the shared cache, in seconds
    #[serde(default = "default_ptr_cache_ttl")]
    pub ptr_cache_ttl_secs: u64,

    /// Evaluate SPF at MAIL FROM
    #[serde(default = "default_true")]
    pub spf: bool,

    /// Static network-to-region table used for the region features
    #[serde(default)]
    pub regions: Vec<RegionEntry>,
}

/// One network of the region table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionEntry {
    /// CIDR network, e.g. `203.0.113.0/24`
    pub network: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            timeout_ms: default_resolver_timeout(),
            ptr_cache_ttl_secs: default_ptr_cache_ttl(),
            spf: true,
            regions: Vec::new(),
        }
    }
}

fn default_resolver_timeout() -> u64 {
    1500
}

fn default_ptr_cache_ttl() -> u64 {
    6 * 3600
}

fn default_true() -> bool {
    true
}

/// Rule engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Poll interval for rule-set changes, in seconds
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    5
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Inputs shorter than this are not fuzzy hashed
    #[serde(default = "default_min_hash_size")]
    pub min_hash_size: usize,

    /// Bytes taken from each end of a large input
    #[serde(default = "default_hash_window")]
    pub hash_window: usize,

    /// TTL of cached field/metric definitions, in seconds
    #[serde(default = "default_definition_cache_ttl")]
    pub definition_cache_ttl_secs: u64,

    /// Write a filter log record at end of body
    #[serde(default = "default_true")]
    pub filter_log: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_hash_size: default_min_hash_size(),
            hash_window: default_hash_window(),
            definition_cache_ttl_secs: default_definition_cache_ttl(),
            filter_log: true,
        }
    }
}

fn default_min_hash_size() -> usize {
    128
}

fn default_hash_window() -> usize {
    10 * 1024
}

fn default_definition_cache_ttl() -> u64 {
    300
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MAILSIFT_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("MAILSIFT_CONFIG") {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./mailsift.toml"),
            PathBuf::from("/etc/mailsift/mailsift.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    fn validate(&self) -> crate::Result<()> {
        if self.milter.max_frame_size < 1024 {
            return Err(crate::Error::Config(
                "milter.max_frame_size must be at least 1024".to_string(),
            ));
        }
        if self.milter.max_connections == 0 {
            return Err(crate::Error::Config(
                "milter.max_connections must be positive".to_string(),
            ));
        }
        if self.filter.hash_window == 0 {
            return Err(crate::Error::Config(
                "filter.hash_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
