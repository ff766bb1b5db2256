//! # Driftclient
//!
//! The client side of drift: it keeps one connection per live server endpoint, picks a
//! connection for each call with a pluggable balancer, and hands back an
//! [`InvocationFuture`] that resolves when the matching response frame arrives.
//!
//! ```text
//! registry ──► Discovery ──► ConnectionRegistry ──► Connection ──► socket
//!                                   ▲                   │
//!                 Client::call ─────┘  InvocationFuture ◄┘ (PendingTable)
//! ```

pub mod balancer;
pub mod client;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod future;
pub mod pending;
pub mod registry;

#[cfg(test)]
mod mock_connector;

pub use balancer::LoadBalancer;
pub use balancer::RouteTable;
pub use client::Client;
pub use client::ServiceStub;
pub use connection::Connection;
pub use connection::ConnectionOptions;
pub use connection::Connector;
pub use connection::TcpConnector;
pub use discovery::Discovery;
pub use error::Error;
pub use error::Result;
pub use future::InvocationFuture;
pub use pending::PendingTable;
pub use registry::ConnectionRegistry;
