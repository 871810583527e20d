use crate::registry::TokenRange;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "RELAY_";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024; // 500 MiB

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// TLS material for serving over HTTPS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Layered by figment: defaults, then the TOML file, then `RELAY_*`
/// environment variables, then command line flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub storage_root: PathBuf,
    pub max_upload_bytes: u64,
    pub session_ttl_seconds: u64,
    pub token_range: TokenRange,
    pub sweep_interval_seconds: u64,
    pub consumed_grace_seconds: u64,
    pub io_timeout_seconds: u64,
    pub min_free_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            storage_root: std::env::temp_dir().join("relaydrop-uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            session_ttl_seconds: 5 * 60,
            token_range: TokenRange::default(),
            sweep_interval_seconds: 30,
            consumed_grace_seconds: 5 * 60,
            io_timeout_seconds: 30,
            min_free_bytes: 64 * 1024 * 1024,
            tls: None,
        }
    }
}

impl RelayConfig {
    pub fn figment(path: Option<&Path>, overrides: &ConfigOverrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let config: RelayConfig = Self::figment(path, overrides)
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_upload_bytes", self.max_upload_bytes),
            ("session_ttl_seconds", self.session_ttl_seconds),
            ("sweep_interval_seconds", self.sweep_interval_seconds),
            ("io_timeout_seconds", self.io_timeout_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be above zero", name)));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn consumed_grace(&self) -> Duration {
        Duration::from_secs(self.consumed_grace_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_seconds)
    }
}

/// Command line overrides, merged last. Unset flags leave lower layers alone.
#[derive(Debug, Clone, Default, clap::Args, Serialize)]
pub struct ConfigOverrides {
    /// Address to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<SocketAddr>,

    /// Directory blobs are written to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Largest accepted file, in bytes
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes: Option<u64>,

    /// Seconds an invite code stays valid
    #[arg(long = "ttl")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ttl_seconds: Option<u64>,

    /// Invite codes are drawn from this range, e.g. 1024-65535
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_range: Option<TokenRange>,

    /// Seconds between expiry sweeps
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_seconds: Option<u64>,
}
