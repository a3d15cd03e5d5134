//! Transport address parsing.
//!
//! Dial and listen take transport-prefixed URLs and pass them to the engine
//! verbatim. This module gives the engine (and the fuzzers) one parser so that
//! a malformed string is rejected with `InvalidAddress` before any endpoint is
//! created.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Status;

/// Maximum address length in bytes, including the terminator.
pub const MAX_ADDRESS_LEN: usize = 128;

/// Transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// In-process transport: `inproc://name`
    Inproc(String),
    /// IPC transport: `ipc:///path/to/socket`
    Ipc(PathBuf),
    /// TCP transport: `tcp://host:port`, `tcp4://`, `tcp6://`
    Tcp { host: String, port: u16 },
    /// TLS over TCP: `tls+tcp://host:port`
    Tls { host: String, port: u16 },
}

impl Address {
    /// Parse an address from a string.
    ///
    /// Supported formats:
    /// - `inproc://name`
    /// - `ipc:///tmp/socket.sock`
    /// - `tcp://127.0.0.1:5555`, `tcp://[::1]:5555`, `tcp://*:5555`
    /// - `tls+tcp://example.com:443`
    ///
    /// # Examples
    ///
    /// ```
    /// use carapace_core::address::Address;
    ///
    /// let address = Address::parse("inproc://jobs").unwrap();
    /// assert!(address.is_inproc());
    ///
    /// let address = Address::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert_eq!(address.scheme(), "tcp");
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        s.parse()
    }

    /// URL scheme of this address.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Inproc(_) => "inproc",
            Self::Ipc(_) => "ipc",
            Self::Tcp { .. } => "tcp",
            Self::Tls { .. } => "tls+tcp",
        }
    }

    /// Returns true if this is an inproc address.
    #[must_use]
    pub const fn is_inproc(&self) -> bool {
        matches!(self, Self::Inproc(_))
    }

    /// Returns true for TCP and TLS addresses.
    #[must_use]
    pub const fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp { .. } | Self::Tls { .. })
    }

    /// Returns true if this is a TLS address.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Returns true if this is an IPC address.
    #[must_use]
    pub const fn is_ipc(&self) -> bool {
        matches!(self, Self::Ipc(_))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() >= MAX_ADDRESS_LEN {
            return Err(AddressError::TooLong(s.len()));
        }
        if s.contains('\0') {
            return Err(AddressError::InteriorNul);
        }
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(s.to_string()))?;

        match scheme {
            "inproc" => {
                if rest.is_empty() {
                    Err(AddressError::EmptyName)
                } else {
                    Ok(Self::Inproc(rest.to_string()))
                }
            }
            "ipc" => {
                if rest.is_empty() {
                    Err(AddressError::EmptyName)
                } else {
                    Ok(Self::Ipc(PathBuf::from(rest)))
                }
            }
            "tcp" | "tcp4" | "tcp6" => {
                let (host, port) = split_host_port(rest)?;
                Ok(Self::Tcp { host, port })
            }
            "tls+tcp" | "tls+tcp4" | "tls+tcp6" => {
                let (host, port) = split_host_port(rest)?;
                Ok(Self::Tls { host, port })
            }
            other => Err(AddressError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals and an empty or `*`
/// host as the wildcard.
fn split_host_port(s: &str) -> Result<(String, u16), AddressError> {
    let (host, port) = if let Some(inner) = s.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| AddressError::InvalidHost(s.to_string()))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| AddressError::InvalidPort(s.to_string()))?;
        (host, port)
    } else {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::InvalidPort(s.to_string()))?;
        if host.contains(':') {
            return Err(AddressError::InvalidHost(host.to_string()));
        }
        (host, port)
    };

    if host
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '[' || c == ']')
    {
        return Err(AddressError::InvalidHost(host.to_string()));
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidPort(port.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidPort(port.to_string()))?;

    let host = if host == "*" { String::new() } else { host.to_string() };
    Ok((host, port))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inproc(name) => write!(f, "inproc://{name}"),
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Tls { host, port } if host.contains(':') => {
                write!(f, "tls+tcp://[{host}]:{port}")
            }
            Self::Tls { host, port } => write!(f, "tls+tcp://{host}:{port}"),
        }
    }
}

/// Errors that can occur when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address of {0} bytes exceeds the 128 byte limit")]
    TooLong(usize),

    #[error("address contains a NUL byte")]
    InteriorNul,

    #[error("missing scheme in address: {0}")]
    MissingScheme(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("empty name or path")]
    EmptyName,

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),
}

impl AddressError {
    /// Status the engine reports for this parse failure.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::UnsupportedScheme(_) => Status::NOT_SUPPORTED,
            _ => Status::INVALID_ADDRESS,
        }
    }
}

/// Socket address value of the `local-address` and `remote-address` options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SockAddr {
    #[default]
    Unspecified,
    Inproc(String),
    Ipc(PathBuf),
    Inet(SocketAddr),
}

impl From<&Address> for SockAddr {
    fn from(address: &Address) -> Self {
        match address {
            Address::Inproc(name) => Self::Inproc(name.clone()),
            Address::Ipc(path) => Self::Ipc(path.clone()),
            Address::Tcp { host, port } | Address::Tls { host, port } => {
                match format!("{host}:{port}").parse::<SocketAddr>() {
                    Ok(addr) => Self::Inet(addr),
                    Err(_) => match format!("[{host}]:{port}").parse::<SocketAddr>() {
                        Ok(addr) => Self::Inet(addr),
                        Err(_) => Self::Unspecified,
                    },
                }
            }
        }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("unspecified"),
            Self::Inproc(name) => write!(f, "inproc://{name}"),
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Self::Inet(addr) => write!(f, "{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_ipv4() {
        let address = Address::parse("tcp://127.0.0.1:5555").unwrap();
        assert!(matches!(address, Address::Tcp { port: 5555, .. }));
        assert_eq!(address.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_parse_tcp_ipv6() {
        let address = Address::parse("tcp://[::1]:5555").unwrap();
        assert_eq!(
            address,
            Address::Tcp {
                host: "::1".to_string(),
                port: 5555
            }
        );
        assert_eq!(address.to_string(), "tcp://[::1]:5555");
    }

    #[test]
    fn test_parse_wildcard_host() {
        let address = Address::parse("tcp://*:7000").unwrap();
        assert_eq!(
            address,
            Address::Tcp {
                host: String::new(),
                port: 7000
            }
        );
        assert!(Address::parse("tcp://:7000").is_ok());
    }

    #[test]
    fn test_parse_ipc() {
        let address = Address::parse("ipc:///tmp/test.sock").unwrap();
        assert!(address.is_ipc());
        assert_eq!(address.to_string(), "ipc:///tmp/test.sock");
    }

    #[test]
    fn test_parse_tls() {
        let address = Address::parse("tls+tcp://example.com:443").unwrap();
        assert!(address.is_tls());
        assert!(address.is_tcp());
    }

    #[test]
    fn test_parse_inproc() {
        let address = Address::parse("inproc://my-endpoint").unwrap();
        assert!(address.is_inproc());
        assert_eq!(address.to_string(), "inproc://my-endpoint");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "no scheme at all",
            "tcp://",
            "tcp://127.0.0.1",
            "tcp://127.0.0.1:notaport",
            "tcp://127.0.0.1:70000",
            "tcp://a:b:5555",
            "tcp://[::1:5555",
            "inproc://",
            "ipc://",
        ] {
            let err = Address::parse(bad).unwrap_err();
            assert_eq!(err.status(), Status::INVALID_ADDRESS, "{bad}");
        }
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = Address::parse("ws://127.0.0.1:80/path").unwrap_err();
        assert!(matches!(err, AddressError::UnsupportedScheme(_)));
        assert_eq!(err.status(), Status::NOT_SUPPORTED);
    }

    #[test]
    fn test_length_limit_includes_terminator() {
        let name = "x".repeat(MAX_ADDRESS_LEN - "inproc://".len() - 1);
        let fits = format!("inproc://{name}");
        assert_eq!(fits.len(), MAX_ADDRESS_LEN - 1);
        assert!(Address::parse(&fits).is_ok());

        let too_long = format!("{fits}x");
        assert!(matches!(
            Address::parse(&too_long),
            Err(AddressError::TooLong(_))
        ));
    }

    #[test]
    fn test_sockaddr_from_address() {
        let address = Address::parse("tcp://127.0.0.1:9000").unwrap();
        assert_eq!(
            SockAddr::from(&address),
            SockAddr::Inet("127.0.0.1:9000".parse().unwrap())
        );
        let address = Address::parse("tcp://[::1]:9000").unwrap();
        assert_eq!(
            SockAddr::from(&address),
            SockAddr::Inet("[::1]:9000".parse().unwrap())
        );
        let address = Address::parse("inproc://a").unwrap();
        assert_eq!(SockAddr::from(&address), SockAddr::Inproc("a".to_string()));
    }
}
