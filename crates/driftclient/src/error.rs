//! # Error Definitions
//!
//! Everything a client call can fail with. Remote application failures arrive as
//! `Remote` with the server's error string.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Wire(driftwire::Error),
    Registry(driftreg::Error),
    /// No live connection appeared within the wait timeout, or the client stopped.
    NoAvailableConnection,
    /// Live connections exist, but none offers this service key.
    NoConnectionForService(String),
    Timeout {
        call_id: String,
        interface: String,
        method: String,
        after: Duration,
    },
    /// The server answered with an error.
    Remote(String),
    /// The connection carrying the call went away before the response.
    ConnectionClosed(String),
    Unsupported(&'static str),
    Stopped,
    Runtime(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Registry(e) => write!(f, "registry error: {}", e),
            Self::NoAvailableConnection => write!(f, "no available connection"),
            Self::NoConnectionForService(key) => write!(f, "no connection for service {}", key),
            Self::Timeout { call_id, interface, method, after } => write!(
                f,
                "call {} to {}.{} timed out after {:?}",
                call_id, interface, method, after
            ),
            Self::Remote(msg) => write!(f, "remote error: {}", msg),
            Self::ConnectionClosed(peer) => write!(f, "connection to {} closed", peer),
            Self::Unsupported(op) => write!(f, "unsupported operation: {}", op),
            Self::Stopped => write!(f, "client stopped"),
            Self::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<driftwire::Error> for Error {
    fn from(e: driftwire::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<driftreg::Error> for Error {
    fn from(e: driftreg::Error) -> Self {
        Self::Registry(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
