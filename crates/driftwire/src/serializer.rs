//! # Serializer Seam
//!
//! The codec never looks inside a payload; it hands messages to a `Serializer` and
//! frames whatever bytes come back.

use crate::error::Error;
use crate::error::Result;
use crate::message::Message;

/// Turns messages into payload bytes and back.
///
/// This trait is designed to be object-safe (`Arc<dyn Serializer>`), so client and
/// server can agree on a format at runtime.
pub trait Serializer: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn serialize(&self, message: &Message) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Message>;
}

/// JSON payloads via serde_json.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| Error::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialize(e.to_string()))
    }
}
