//! # Driftreg
//!
//! The registry contract drift uses for membership: a tree of nodes whose children
//! can be listed, read, and watched. Servers publish one ephemeral sequential node per
//! process under [`REGISTRY_PATH`]; clients list and watch those children.
//!
//! [`MemoryRegistry`] is an in-process implementation for tests and single-host use.

pub mod error;
pub mod event;
pub mod memory;
pub mod registry;

pub use error::Error;
pub use error::Result;
pub use event::ChildEvent;
pub use event::EventKind;
pub use event::WatchEvent;
pub use memory::MemoryRegistry;
pub use registry::ChildWatch;
pub use registry::Registry;

/// Parent of every published endpoint node.
pub const REGISTRY_PATH: &str = "/registry";

/// Prefix handed to sequential node creation; the registry appends the sequence number.
pub const DATA_PATH: &str = "/registry/data-";

/// Joins a parent path and a child name.
pub fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}
