//! Service addresses.
//!
//! Accepted forms:
//! - `tcp://127.0.0.1:9999`
//! - `unix:///run/tamdb.socket`
//! - bare `host:port` (TCP)
//! - bare filesystem path containing `/` (Unix socket)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ProtoError;

/// Where the service listens, or where a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for BindAddress {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("tcp://") {
            if rest.is_empty() {
                return Err(ProtoError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Tcp(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("unix://") {
            if rest.is_empty() {
                return Err(ProtoError::InvalidAddress(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(rest)));
        }
        if s.contains('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        if s.contains(':') {
            return Ok(Self::Tcp(s.to_string()));
        }
        Err(ProtoError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
