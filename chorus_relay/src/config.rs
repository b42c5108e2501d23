// Relay configuration.
//
// `ServerConfig` and `ClientConfig` are plain structs with sensible defaults;
// library callers build them directly. The `relay` binary can also load a
// `ServerConfig` from a TOML file:
//
//   host = "0.0.0.0"
//   port = 7878
//   poll_interval_ms = 100
//   max_pending_bytes = 67108864
//
// Every key is optional. The file is parsed into `ConfigFile` and converted,
// so the on-disk shape (milliseconds, flat host/port) can differ from the
// in-memory one (`Duration`, `Address`).

use std::ffi::OsStr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chorus_protocol::{Address, MAX_PENDING_BYTES};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default wait between poll-loop iterations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default relay listen port.
pub const DEFAULT_PORT: u16 = 7878;

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Listen address. Port 0 lets the OS pick a free port.
    pub bind: Address,
    pub poll_interval: Duration,
    /// Per-client cap on output queued behind a full send buffer. A client
    /// that falls further behind is disconnected.
    pub max_pending_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Address::localhost(DEFAULT_PORT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_pending_bytes: MAX_PENDING_BYTES,
        }
    }
}

/// Configuration for connecting a relay client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub poll_interval: Duration,
    /// Upper bound on the initial TCP connect. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: None,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    poll_interval_ms: Option<u64>,
    max_pending_bytes: Option<usize>,
}

impl FromStr for ConfigFile {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl From<ConfigFile> for ServerConfig {
    fn from(
        ConfigFile {
            host,
            port,
            poll_interval_ms,
            max_pending_bytes,
        }: ConfigFile,
    ) -> Self {
        let defaults = Self::default();
        Self {
            bind: Address::new(
                host.unwrap_or(defaults.bind.host),
                port.unwrap_or(defaults.bind.port),
            ),
            poll_interval: poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_pending_bytes: max_pending_bytes.unwrap_or(defaults.max_pending_bytes),
        }
    }
}

impl ServerConfig {
    /// Loads a .toml file from the filesystem, parses it, and initializes a
    /// [`ServerConfig`].
    ///
    /// ## Error cases:
    /// - File extension is not .toml
    /// - File access is unsuccessful
    /// - TOML parsing failure
    pub fn load_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.extension() != Some(OsStr::new("toml")) {
            return Err(ConfigError::FileExtension(path.to_path_buf()));
        }
        let toml = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file = ConfigFile::from_str(&toml).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into())
    }
}
