//! # Driftwire
//!
//! The contract shared by drift clients and servers: the endpoint model that the
//! registry publishes, the Request/Response payloads, the pluggable serializer, and the
//! length-prefixed frame codec that carries them over a stream.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------+------------------------+
//! | length (u32 BE)| payload (length bytes) |
//! +----------------+------------------------+
//! ```
//!
//! The payload is whatever the configured `Serializer` produces for one `Message`.

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod serializer;

pub use codec::FrameCodec;
pub use codec::FrameReader;
pub use config::ClientConfig;
pub use config::ServerConfig;
pub use config::Strategy;
pub use endpoint::Endpoint;
pub use endpoint::ServiceDescriptor;
pub use endpoint::service_key;
pub use error::Error;
pub use error::Result;
pub use message::HEARTBEAT_CALL_ID;
pub use message::Message;
pub use message::Request;
pub use message::Response;
pub use message::Value;
pub use serializer::JsonSerializer;
pub use serializer::Serializer;
