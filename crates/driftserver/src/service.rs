//! # Services
//!
//! A [`Service`] is invoked by method name with the decoded argument list. Failures are
//! plain strings; they travel back in the response's error field.

use std::collections::HashMap;

use driftwire::Value;
use serde::de::DeserializeOwned;

pub type ServiceResult<T = Value> = std::result::Result<T, String>;

/// One exported implementation.
///
/// Runs on the blocking worker pool, so implementations may block.
pub trait Service: Send + Sync + 'static {
    fn invoke(&self, method: &str, args: Vec<Value>) -> ServiceResult;
}

type Handler = Box<dyn Fn(Vec<Value>) -> ServiceResult + Send + Sync>;

/// A service assembled from named closures.
///
/// ```ignore
/// let hello = MethodTable::new()
///     .method("hello", |args| Ok(json!(format!("Hi {}", arg::<i64>(&args, 0)?))));
/// ```
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> ServiceResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Service for MethodTable {
    fn invoke(&self, method: &str, args: Vec<Value>) -> ServiceResult {
        match self.methods.get(method) {
            Some(handler) => handler(args),
            None => Err(format!("no such method: {}", method)),
        }
    }
}

/// Decodes argument `index` as `T`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> ServiceResult<T> {
    let value = args
        .get(index)
        .ok_or_else(|| format!("missing argument {}", index))?;
    serde_json::from_value(value.clone()).map_err(|e| format!("bad argument {}: {}", index, e))
}
