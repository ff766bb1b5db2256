use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Wire(driftwire::Error),
    Registry(driftreg::Error),
    Bind { addr: String, reason: String },
    Io(String),
    /// The published endpoint would advertise no services.
    NoServices(SocketAddr),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Registry(e) => write!(f, "registry error: {}", e),
            Self::Bind { addr, reason } => write!(f, "failed to bind {}: {}", addr, reason),
            Self::Io(msg) => write!(f, "io error: {}", msg),
            Self::NoServices(addr) => write!(f, "server at {} has no registered services", addr),
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

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
