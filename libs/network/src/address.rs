//! Server addresses
//!
//! - `tcp://host:port` dials out to a peer
//! - `bind://host:port` listens for peers
//! - `tcp://*:port` listens on every interface

use crate::error::ConnectionError;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    Connect { host: String, port: u16 },
    Bind { host: String, port: u16 },
}

impl ServerAddress {
    pub fn parse(address: &str) -> Result<Self, ConnectionError> {
        let invalid = |reason: &str| ConnectionError::address_invalid(address, reason);

        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| invalid("expected scheme://host:port"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        match scheme {
            "tcp" if host == "*" => Ok(Self::Bind {
                host: "0.0.0.0".to_string(),
                port,
            }),
            "tcp" => Ok(Self::Connect {
                host: host.to_string(),
                port,
            }),
            "bind" => Ok(Self::Bind {
                host: if host == "*" { "0.0.0.0" } else { host }.to_string(),
                port,
            }),
            other => Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
    }

    pub fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }

    fn host_port(&self) -> (&str, u16) {
        match self {
            Self::Connect { host, port } | Self::Bind { host, port } => (host.as_str(), *port),
        }
    }

    /// Resolve to socket addresses in resolver order
    pub fn resolve(&self) -> Result<Vec<SocketAddr>, ConnectionError> {
        let (host, port) = self.host_port();
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectionError::address_invalid(self.to_string(), e.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectionError::address_invalid(
                self.to_string(),
                "host resolved to no addresses",
            ));
        }
        Ok(addrs)
    }
}

impl FromStr for ServerAddress {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scheme, (host, port)) = match self {
            Self::Connect { .. } => ("tcp", self.host_port()),
            Self::Bind { .. } => ("bind", self.host_port()),
        };
        if host.contains(':') {
            write!(f, "{scheme}://[{host}]:{port}")
        } else {
            write!(f, "{scheme}://{host}:{port}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_address() {
        let addr = ServerAddress::parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(
            addr,
            ServerAddress::Connect {
                host: "127.0.0.1".to_string(),
                port: 5555
            }
        );
        assert!(!addr.is_bind());
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_bind_forms() {
        assert_eq!(
            "tcp://*:7000".parse::<ServerAddress>().unwrap(),
            ServerAddress::Bind {
                host: "0.0.0.0".to_string(),
                port: 7000
            }
        );
        let addr = ServerAddress::parse("bind://127.0.0.1:0").unwrap();
        assert!(addr.is_bind());
        assert_eq!(addr.resolve().unwrap()[0].port(), 0);
    }

    #[test]
    fn test_ipv6_brackets() {
        let addr = ServerAddress::parse("tcp://[::1]:9000").unwrap();
        assert_eq!(addr.to_string(), "tcp://[::1]:9000");
        assert!(addr.resolve().unwrap()[0].is_ipv6());
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "127.0.0.1:80",
            "tcp://127.0.0.1",
            "tcp://127.0.0.1:http",
            "tcp://:80",
            "udp://127.0.0.1:80",
            "tcp://127.0.0.1:70000",
        ] {
            assert!(
                matches!(
                    ServerAddress::parse(bad),
                    Err(ConnectionError::AddressInvalid { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }
}
