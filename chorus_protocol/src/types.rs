// Endpoint address type shared by the relay server, its clients, and the wire
// format.
//
// `Address` is a plain `(host, port)` value. The relay keys its client
// registry by the remote address of each accepted socket, and every broadcast
// is tagged with the sender's `Address`, so it must be hashable, ordered (for
// deterministic roster snapshots), and serializable. It is deliberately not a
// `SocketAddr`: a bind or connect target may be a hostname that only resolves
// at connect time.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::vec;

use serde::{Deserialize, Serialize};

/// A network endpoint: host name or IP literal plus port.
///
/// Port 0 on a bind address means "let the OS pick a free port".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback address on the given port.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl ToSocketAddrs for Address {
    type Iter = vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        // Bracketed IPv6 literals come from `FromStr`/`Display` round-trips.
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        (host, self.port).to_socket_addrs()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Error returned when parsing a `host:port` string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("missing ':' port separator in {0:?}")]
    MissingPort(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv6Addr};

    use super::*;

    #[test]
    fn display_ipv4() {
        assert_eq!(Address::new("127.0.0.1", 8080).to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn display_brackets_ipv6() {
        let addr = Address::from(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 9000));
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "[::1]:9000");
    }

    #[test]
    fn parse_roundtrips_display() {
        for text in ["127.0.0.1:7878", "localhost:1", "[::1]:9000"] {
            let addr: Address = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            "localhost".parse::<Address>(),
            Err(AddressParseError::MissingPort("localhost".into()))
        );
        assert_eq!(
            ":80".parse::<Address>(),
            Err(AddressParseError::EmptyHost(":80".into()))
        );
        assert_eq!(
            "host:99999".parse::<Address>(),
            Err(AddressParseError::InvalidPort("host:99999".into()))
        );
    }

    #[test]
    fn resolves_ip_literal() {
        let resolved: Vec<SocketAddr> = Address::localhost(4242)
            .to_socket_addrs()
            .unwrap()
            .collect();
        assert_eq!(resolved, vec!["127.0.0.1:4242".parse().unwrap()]);
    }

    #[test]
    fn usable_as_set_key() {
        let mut set = HashSet::new();
        set.insert(Address::localhost(1));
        set.insert(Address::localhost(1));
        set.insert(Address::localhost(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serializes_as_host_port_object() {
        let json = serde_json::to_string(&Address::localhost(5)).unwrap();
        assert_eq!(json, r#"{"host":"127.0.0.1","port":5}"#);
    }
}
