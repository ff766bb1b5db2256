//! # Endpoints and Services
//!
//! An `Endpoint` is one server process as the registry describes it: where to connect
//! and which versioned services it exports. Its JSON form is exactly the registry node
//! payload, so the same type is written by servers and read back by clients.

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Joins a service name and its version into a service key.
pub const SERVICE_KEY_SEPARATOR: &str = "#";

/// Builds the routing key for a service.
///
/// A blank version yields the bare name, so unversioned services keep a stable key.
pub fn service_key(name: &str, version: &str) -> String {
    if version.trim().is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", name, SERVICE_KEY_SEPARATOR, version)
    }
}

/// One exported service: an interface name plus a version string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn key(&self) -> String {
        service_key(&self.name, &self.version)
    }
}

/// One reachable server process and the services it offers, in registration order.
///
/// Equality covers every field: a node whose service list changes is a different
/// endpoint, which is what lets an update be handled as remove + add.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            services: Vec::new(),
        }
    }

    /// Appends a service descriptor.
    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.services.push(ServiceDescriptor::new(name, version));
        self
    }

    /// The `host:port` string used to open a socket.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service keys of everything this endpoint exports, in registration order.
    pub fn service_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.services.iter().map(ServiceDescriptor::key)
    }

    pub fn offers(&self, key: &str) -> bool {
        self.service_keys().any(|k| k == key)
    }

    /// Encodes the registry node payload.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialize(e.to_string()))
    }

    /// Decodes a registry node payload.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Deserialize(e.to_string()))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
