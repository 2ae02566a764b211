//! Endpoint abstraction for transport-agnostic socket addressing.
//!
//! Provides unified addressing for TCP and in-process transports with
//! parsing support. Publishers bind to one endpoint; subscribers connect
//! to one or more. An endpoint is validated once at parse time and is
//! immutable afterwards.

use std::fmt;
use std::str::FromStr;

/// Transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`. The host may be `*` on the bind
    /// side, meaning "every local interface".
    Tcp {
        /// Host name, IP address, or `*` for wildcard binds
        host: String,
        /// TCP port
        port: u16,
    },
    /// In-process transport: `inproc://name`
    Inproc(String),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// Supported formats:
    /// - `tcp://127.0.0.1:5555`
    /// - `tcp://*:5555` (wildcard host, bind side)
    /// - `inproc://name`
    ///
    /// # Examples
    ///
    /// ```
    /// use manifold_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(endpoint.is_tcp());
    ///
    /// let endpoint = Endpoint::parse("inproc://market-data").unwrap();
    /// assert!(endpoint.is_inproc());
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Returns true if this is a TCP endpoint.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Endpoint::Tcp { .. })
    }

    /// Returns true if this is an inproc endpoint.
    pub fn is_inproc(&self) -> bool {
        matches!(self, Endpoint::Inproc(_))
    }

    /// Returns true if both endpoints use the same transport scheme.
    pub fn same_scheme(&self, other: &Endpoint) -> bool {
        matches!(
            (self, other),
            (Endpoint::Tcp { .. }, Endpoint::Tcp { .. })
                | (Endpoint::Inproc(_), Endpoint::Inproc(_))
        )
    }

    /// Address to pass to a TCP listener for this endpoint.
    ///
    /// A `*` host binds every interface. Returns `None` for non-TCP
    /// endpoints.
    pub fn bind_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => {
                let host = if host == "*" { "0.0.0.0" } else { host.as_str() };
                Some(format!("{host}:{port}"))
            }
            Endpoint::Inproc(_) => None,
        }
    }

    /// Address to dial for this endpoint.
    ///
    /// Connecting to a `*` host is interpreted as loopback. Returns `None`
    /// for non-TCP endpoints.
    pub fn connect_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => {
                let host = if host == "*" { "127.0.0.1" } else { host.as_str() };
                Some(format!("{host}:{port}"))
            }
            Endpoint::Inproc(_) => None,
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(EndpointError::Blank);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EndpointError::InvalidTcpAddress(addr.to_string()))?;
            if host.is_empty() {
                return Err(EndpointError::InvalidTcpAddress(addr.to_string()));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| EndpointError::InvalidTcpAddress(addr.to_string()))?;
            Ok(Endpoint::Tcp {
                host: host.to_string(),
                port,
            })
        } else if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                Err(EndpointError::InvalidInprocName(
                    "inproc name cannot be empty".to_string(),
                ))
            } else {
                Ok(Endpoint::Inproc(name.to_string()))
            }
        } else {
            Err(EndpointError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Errors that can occur when parsing or using endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint must not be blank (expected e.g. 'tcp://*:54321')")]
    Blank,

    #[error("at least one endpoint is required")]
    NoEndpoints,

    #[error("endpoints must all use the same transport scheme")]
    MixedSchemes,

    #[error("invalid scheme in endpoint: {0} (expected tcp:// or inproc://)")]
    InvalidScheme(String),

    #[error("invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("invalid inproc name: {0}")]
    InvalidInprocName(String),
}
