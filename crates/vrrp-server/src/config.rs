//! Configuration loading and validation for the VRRP server

use crate::types::{ServerConfig, StoreBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vrrp::{EtcdSettings, RenderPaths, StatePaths};
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "VRRP_SERVER_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub control: ControlSettings,

    /// Interface → CIDR used in instance names
    #[serde(default)]
    pub interfaces: HashMap<String, String>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.store.validate()?;
        self.daemon.validate()?;
        self.control.validate()?;
        Ok(())
    }
}

/// Coordination store settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,

    #[validate(length(min = 1))]
    pub endpoints: Vec<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_dial_timeout")]
    pub dial_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_lock_ttl")]
    pub lock_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub lock_poll: Duration,

    #[validate(length(min = 1))]
    pub lock_path: String,

    #[validate(length(min = 1))]
    pub state_path: String,
}

/// keepalived daemon settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DaemonSettings {
    #[validate(length(min = 1))]
    pub binary: String,

    pub config_dir: PathBuf,
    pub run_dir: PathBuf,
    pub script_dir: PathBuf,
    pub track_script: PathBuf,

    /// Start daemons inside the VRF network namespace
    pub netns_exec: bool,

    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,
}

/// Control socket settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControlSettings {
    #[validate(length(min = 1), custom = "validate_socket_path")]
    pub socket: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

impl Default for StoreSettings {
    fn default() -> Self {
        let etcd = EtcdSettings::default();
        let paths = StatePaths::default();
        Self {
            backend: StoreBackend::Etcd,
            endpoints: etcd.endpoints,
            dial_timeout: etcd.dial_timeout,
            request_timeout: etcd.request_timeout,
            lock_ttl: etcd.lock_ttl,
            lock_poll: etcd.lock_poll,
            lock_path: paths.lock_path,
            state_path: paths.state_path,
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        let paths = RenderPaths::default();
        Self {
            binary: "keepalived".to_string(),
            config_dir: paths.config_dir,
            run_dir: paths.run_dir,
            script_dir: paths.script_dir,
            track_script: paths.track_script,
            netns_exec: true,
            start_delay: Duration::from_secs(10),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            socket: "/var/run/vrrp-server.sock".to_string(),
        }
    }
}

// Custom validators

fn validate_socket_path(path: &str) -> Result<(), ValidationError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("socket_path_empty"));
    }

    // Must be absolute path or relative (starting with ./)
    if !trimmed.starts_with('/') && !trimmed.starts_with("./") {
        return Err(ValidationError::new("socket_path_invalid_format"));
    }

    Ok(())
}

fn validate_dial_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(100..=60_000).contains(&millis) {
        return Err(ValidationError::new("dial_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_lock_ttl(ttl: &Duration) -> Result<(), ValidationError> {
    let secs = ttl.as_secs();
    if !(1..=300).contains(&secs) {
        return Err(ValidationError::new("lock_ttl_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `$VRRP_SERVER_CONFIG` or the default search paths
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound);
            }
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/vrrp/vrrp-server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./vrrp-server.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/vrrp/vrrp-server.yaml"))
    }

    /// Convert to the server's runtime configuration
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            store_backend: self.store.backend,
            etcd: EtcdSettings {
                endpoints: self.store.endpoints.clone(),
                dial_timeout: self.store.dial_timeout,
                request_timeout: self.store.request_timeout,
                lock_ttl: self.store.lock_ttl,
                lock_poll: self.store.lock_poll,
            },
            state_paths: StatePaths {
                lock_path: self.store.lock_path.clone(),
                state_path: self.store.state_path.clone(),
            },
            render_paths: RenderPaths {
                config_dir: self.daemon.config_dir.clone(),
                run_dir: self.daemon.run_dir.clone(),
                script_dir: self.daemon.script_dir.clone(),
                track_script: self.daemon.track_script.clone(),
            },
            daemon_binary: self.daemon.binary.clone(),
            netns_exec: self.daemon.netns_exec,
            start_delay: self.daemon.start_delay,
            control_socket: self.control.socket.clone(),
            interfaces: self.interfaces.clone(),
        }
    }
}
