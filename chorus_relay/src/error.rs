use std::io;
use std::path::PathBuf;

use chorus_protocol::{Address, StreamError};

/// Errors surfaced by `RelayServer` and `RelayClient`.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: Address,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: Address,
        #[source]
        source: io::Error,
    },

    #[error("{0} did not resolve to any socket address")]
    Resolve(Address),

    #[error("failed to configure socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to spawn poll thread: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("connection is closed")]
    Closed,
}

/// Errors from loading a relay configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("refusing to load {0}, file extension isn't .toml")]
    FileExtension(PathBuf),

    #[error("failed to read config file {path}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
