//! Membership events delivered to watchers.

use crate::error::Error;
use crate::error::Result;

/// What happened to a child node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

impl EventKind {
    /// The tag a registry uses on the wire for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Added => "CHILD_ADDED",
            Self::Updated => "CHILD_UPDATED",
            Self::Removed => "CHILD_REMOVED",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    /// Accepts only the three child tags. Anything else is a caller bug and fails.
    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "CHILD_ADDED" => Ok(Self::Added),
            "CHILD_UPDATED" => Ok(Self::Updated),
            "CHILD_REMOVED" => Ok(Self::Removed),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A change to one child of a watched parent, with the node's data.
///
/// For `Removed` the data is the last value the node held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEvent {
    pub kind: EventKind,
    pub path: String,
    pub data: Vec<u8>,
}

impl ChildEvent {
    pub fn data_str(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Child(ChildEvent),
    /// The watcher may have missed events and should re-list the children.
    Resync,
}
