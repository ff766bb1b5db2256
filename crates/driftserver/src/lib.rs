//! # Driftserver
//!
//! The server side of drift. Services are registered explicitly by interface and
//! version; the server listens for framed requests, runs each one on a bounded blocking
//! pool, and answers with a response frame. With a registry, the server also publishes
//! its endpoint so clients can find it.

pub mod dispatcher;
pub mod error;
pub mod publisher;
pub mod server;
pub mod service;

pub use dispatcher::Dispatcher;
pub use error::Error;
pub use error::Result;
pub use publisher::Publication;
pub use server::Server;
pub use server::ServerHandle;
pub use service::MethodTable;
pub use service::Service;
pub use service::ServiceResult;
pub use service::arg;
