use std::{convert::Infallible, fmt, str::FromStr};

use crate::error::TunnelError;

/// A host and port pair, as used in `direct-tcpip` requests.
///
/// Parses `host:port` and bracketed IPv6 literals such as `[::1]:22`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HostPort {
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl FromStr for HostPort {
    type Err = TunnelError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = || TunnelError::InvalidAddress(address.into());
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        // Bracketed IPv6 literals, i.e. [::1]:22
        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(HostPort {
            host: host.into(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// An SSH destination given as `user@host:port`.
///
/// The user part is optional when parsing; a missing user is kept empty so that
/// validation reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub user: String,
    pub address: String,
}

impl FromStr for Destination {
    type Err = Infallible;

    fn from_str(destination: &str) -> Result<Self, Self::Err> {
        let (user, address) = destination.rsplit_once('@').unwrap_or(("", destination));
        Ok(Destination {
            user: user.into(),
            address: address.into(),
        })
    }
}
