pub mod config;
pub mod errors;

pub use config::{ConfigError, ConfigOverrides, RelayConfig, TlsConfig};
pub use errors::AppError;
