//! # Error Definitions
//!
//! Failures of the wire layer itself. Remote application failures never show up here;
//! they travel inside a `Response`.

/// Serialization and framing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The serializer could not turn a message into bytes.
    Serialize(String),
    /// The payload bytes do not describe a valid message.
    Deserialize(String),
    /// A length prefix announced more bytes than the codec accepts.
    FrameTooLarge { len: usize, max: usize },
    /// The underlying stream failed or closed in the middle of a frame.
    Io(String),
    /// A configuration file or variable holds an unusable value.
    Config(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(msg) => write!(f, "serialization failed: {}", msg),
            Self::Deserialize(msg) => write!(f, "deserialization failed: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds the {} byte limit", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
