/// Server configuration, read from the environment.
///
/// | Variable               | Default          |
/// |------------------------|------------------|
/// | `TIDECHAT_BIND`        | `0.0.0.0:5000`   |
/// | `TIDECHAT_LOG_FILE`    | `server_log.txt` (empty disables) |
/// | `TIDECHAT_ANONYMOUS`   | `true`           |
/// | `TIDECHAT_READ_BUFFER` | `1024`           |
use std::net::SocketAddr;
use std::path::PathBuf;

use super::codec::DEFAULT_READ_BUFFER;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_LOG_FILE: &str = "server_log.txt";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
    #[error("{var} must be true or false, got {value:?}")]
    InvalidFlag { var: &'static str, value: String },
    #[error("read buffer must be a positive byte count, got {0:?}")]
    InvalidReadBuffer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds.
    pub bind: SocketAddr,
    /// Append log location; `None` disables it.
    pub log_file: Option<PathBuf>,
    /// Whether a connection that skips `/user` may chat as `Anonymous`.
    pub allow_anonymous: bool,
    /// Largest chunk a single read yields.
    pub read_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 5000).into(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            allow_anonymous: true,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Unset variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("TIDECHAT_BIND") {
            config.bind = bind
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;
        }

        if let Some(path) = lookup("TIDECHAT_LOG_FILE") {
            let path = path.trim();
            config.log_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }

        if let Some(flag) = lookup("TIDECHAT_ANONYMOUS") {
            config.allow_anonymous = parse_flag("TIDECHAT_ANONYMOUS", &flag)?;
        }

        if let Some(size) = lookup("TIDECHAT_READ_BUFFER") {
            config.read_buffer = size
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidReadBuffer(size.clone()))?;
        }

        Ok(config)
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_owned(),
        }),
    }
}
