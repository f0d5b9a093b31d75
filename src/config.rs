use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_OUTBOUND_BUFFER: usize = 64;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_START_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

/// Per-connection outbound queue settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionSettings {
    /// Messages buffered per connection before sends start waiting
    pub outbound_buffer: usize,
    /// How long a single delivery may wait on a full buffer
    pub send_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

/// Server configuration, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Redis URL; the in-memory broker is used when unset
    pub broker_url: Option<String>,
    pub connection: ConnectionSettings,
    /// Upper bound on establishing a room's broker subscription
    pub start_timeout: Duration,
    /// Upper bound on waiting for a room's subscription task to exit
    pub stop_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr: SocketAddr = parse_or(&lookup, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;
        let broker_url = lookup("BROKER_URL").filter(|url| !url.trim().is_empty());
        let outbound_buffer: usize = parse_or(&lookup, "OUTBOUND_BUFFER", Some(DEFAULT_OUTBOUND_BUFFER))?;
        let send_timeout_ms = parse_or(&lookup, "SEND_TIMEOUT_MS", Some(DEFAULT_SEND_TIMEOUT_MS))?;
        let start_timeout_ms = parse_or(&lookup, "START_TIMEOUT_MS", Some(DEFAULT_START_TIMEOUT_MS))?;
        let stop_timeout_ms = parse_or(&lookup, "STOP_TIMEOUT_MS", Some(DEFAULT_STOP_TIMEOUT_MS))?;

        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                name: "OUTBOUND_BUFFER",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            broker_url,
            connection: ConnectionSettings {
                outbound_buffer,
                send_timeout: Duration::from_millis(send_timeout_ms),
            },
            start_timeout: Duration::from_millis(start_timeout_ms),
            stop_timeout: Duration::from_millis(stop_timeout_ms),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => {
            let parsed = value.trim().parse();
            parsed.map_err(|_| ConfigError::InvalidValue { name, value })
        }
        None => default.ok_or(ConfigError::InvalidValue {
            name,
            value: String::new(),
        }),
    }
}
