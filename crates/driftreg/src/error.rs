//! # Error Definitions

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No node exists at the path.
    NoNode(String),
    /// The path is empty, relative, or has no parent.
    InvalidPath(String),
    /// A raw event tag that is not one of the known child events.
    UnknownEvent(String),
    /// The registry has been closed.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoNode(path) => write!(f, "no node at {}", path),
            Self::InvalidPath(path) => write!(f, "invalid registry path '{}'", path),
            Self::UnknownEvent(tag) => write!(f, "unknown registry event '{}'", tag),
            Self::Closed => write!(f, "registry closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
