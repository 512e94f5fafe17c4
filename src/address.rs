//! RPC addressing: `scheme://host:port`, where the port may be `*`.
//!
//! A wildcard port is only meaningful at request time; the spawning layer
//! binds a concrete port and reports the resolved address back.

use std::fmt;
use std::str::FromStr;

/// Literal for an unresolved port, or a host listening on every interface.
pub const WILDCARD: &str = "*";

/// Host announced for listeners bound on every interface.
const LOOPBACK: &str = "127.0.0.1";

/// Errors produced when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address {0:?} has no scheme (expected scheme://host:port)")]
    MissingScheme(String),

    #[error("address {0:?} has no port")]
    MissingPort(String),

    #[error("address {0:?} has no host")]
    MissingHost(String),

    #[error("invalid port {port:?} in address {address:?}")]
    InvalidPort { address: String, port: String },

    #[error("address {0} has a wildcard port and cannot be dialed")]
    Unresolved(String),
}

/// Port component of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Fixed(u16),
    Wildcard,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Fixed(port) => write!(f, "{}", port),
            Port::Wildcard => f.write_str(WILDCARD),
        }
    }
}

/// A parsed RPC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    host: String,
    port: Port,
}

impl Address {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Port) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse `scheme://host:port`.
    ///
    /// The host is everything between `//` and the last `:`, so bracketed
    /// IPv6 literals survive intact.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(address.to_string()))?;
        if scheme.is_empty() {
            return Err(AddressError::MissingScheme(address.to_string()));
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::MissingHost(address.to_string()));
        }

        let port = match port {
            WILDCARD => Port::Wildcard,
            p => p.parse().map(Port::Fixed).map_err(|_| AddressError::InvalidPort {
                address: address.to_string(),
                port: p.to_string(),
            })?,
        };

        Ok(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Bare hostname of the machine this address points at.
    pub fn hostname(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.port == Port::Wildcard
    }

    /// Same scheme and host, port left for the spawning layer to choose.
    pub fn with_wildcard_port(&self) -> Self {
        Self::new(self.scheme.clone(), self.host.clone(), Port::Wildcard)
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.scheme.clone(), self.host.clone(), Port::Fixed(port))
    }

    /// Address peers can dial once a listener for `self` is bound on `port`.
    ///
    /// A `*` host listens on every interface, so loopback is announced.
    pub fn bound_at(&self, port: u16) -> Self {
        let host = if self.host == WILDCARD {
            LOOPBACK
        } else {
            self.host.as_str()
        };
        Self::new(self.scheme.clone(), host, Port::Fixed(port))
    }

    /// URI a gRPC channel dials for this address.
    pub fn endpoint_uri(&self) -> Result<String, AddressError> {
        match self.port {
            Port::Fixed(port) => Ok(format!("http://{}:{}", self.host, port)),
            Port::Wildcard => Err(AddressError::Unresolved(self.to_string())),
        }
    }

    /// `host:port` suitable for binding a listener.
    ///
    /// `*` as host binds every interface; a wildcard port lets the OS pick.
    pub fn bind_target(&self) -> String {
        let host = if self.host == WILDCARD {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        let port = match self.port {
            Port::Fixed(port) => port,
            Port::Wildcard => 0,
        };
        format!("{}:{}", host, port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_port() {
        let addr = Address::parse("tcp://127.0.0.1:5000").unwrap();
        assert_eq!(addr.scheme(), "tcp");
        assert_eq!(addr.hostname(), "127.0.0.1");
        assert_eq!(addr.port(), Port::Fixed(5000));
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:5000");
    }

    #[test]
    fn test_parse_wildcard_port() {
        let addr: Address = "tcp://10.0.0.7:*".parse().unwrap();
        assert!(addr.is_wildcard());
        assert_eq!(addr.to_string(), "tcp://10.0.0.7:*");
    }

    #[test]
    fn test_bound_at_replaces_wildcard_host() {
        let any = Address::parse("tcp://*:*").unwrap();
        let bound = any.bound_at(41000);
        assert_eq!(bound.to_string(), "tcp://127.0.0.1:41000");
        assert_eq!(bound.endpoint_uri().unwrap(), "http://127.0.0.1:41000");

        let named = Address::parse("tcp://10.0.0.7:*").unwrap();
        assert_eq!(named.bound_at(41000).to_string(), "tcp://10.0.0.7:41000");
    }

    #[test]
    fn test_parse_ipv6_host_keeps_brackets() {
        let addr = Address::parse("tcp://[::1]:7000").unwrap();
        assert_eq!(addr.hostname(), "[::1]");
        assert_eq!(addr.endpoint_uri().unwrap(), "http://[::1]:7000");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Address::parse("127.0.0.1:5000"),
            Err(AddressError::MissingScheme(_))
        ));
        assert!(matches!(
            Address::parse("tcp://localhost"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            Address::parse("tcp://:5000"),
            Err(AddressError::MissingHost(_))
        ));
        assert!(matches!(
            Address::parse("tcp://localhost:http"),
            Err(AddressError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_with_wildcard_port() {
        let addr = Address::parse("tcp://192.168.1.4:5300").unwrap();
        assert_eq!(addr.with_wildcard_port().to_string(), "tcp://192.168.1.4:*");
        assert_eq!(addr.with_port(6000).to_string(), "tcp://192.168.1.4:6000");
    }

    #[test]
    fn test_wildcard_cannot_be_dialed() {
        let addr = Address::parse("tcp://127.0.0.1:*").unwrap();
        assert!(matches!(
            addr.endpoint_uri(),
            Err(AddressError::Unresolved(_))
        ));
    }

    #[test]
    fn test_bind_target() {
        assert_eq!(
            Address::parse("tcp://*:*").unwrap().bind_target(),
            "0.0.0.0:0"
        );
        assert_eq!(
            Address::parse("tcp://127.0.0.1:5000").unwrap().bind_target(),
            "127.0.0.1:5000"
        );
    }
}
