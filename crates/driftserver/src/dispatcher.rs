//! # Server Dispatcher
//!
//! Turns one request into at most one response. Heartbeats get no response. Known
//! services run on the blocking pool, at most `worker_pool_size` at a time. Every
//! failure (missing service, unknown method, panic) becomes a response error; none of
//! them touch the connection.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use driftwire::Request;
use driftwire::Response;
use driftwire::ServiceDescriptor;
use driftwire::service_key;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::service::Service;

struct Registered {
    descriptor: ServiceDescriptor,
    service: Arc<dyn Service>,
}

pub struct Dispatcher {
    services: DashMap<String, Registered>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(worker_pool_size: usize) -> Self {
        Self {
            services: DashMap::new(),
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Registers `service` under `interface` and `version`, replacing any previous one.
    pub fn register(&self, interface: &str, version: &str, service: Arc<dyn Service>) {
        let key = service_key(interface, version);
        info!(%key, "registering service");
        self.services.insert(
            key,
            Registered {
                descriptor: ServiceDescriptor::new(interface, version),
                service,
            },
        );
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    /// Registered services, ordered by key.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut descriptors: Vec<ServiceDescriptor> =
            self.services.iter().map(|e| e.value().descriptor.clone()).collect();
        descriptors.sort_by_key(ServiceDescriptor::key);
        descriptors
    }

    /// Refuses further work; requests already running finish.
    pub fn close(&self) {
        self.workers.close();
    }

    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        if request.is_heartbeat() {
            debug!("server read heartbeat ping");
            return None;
        }

        let key = request.service_key();
        let Some(service) = self.services.get(&key).map(|e| e.value().service.clone()) else {
            error!(interface = %request.interface, version = %request.version, "can not find service implementation");
            return Some(Response::failed(request.call_id, format!("no service {}", key)));
        };

        let Ok(permit) = self.workers.clone().acquire_owned().await else {
            return Some(Response::failed(request.call_id, "server is shutting down"));
        };

        debug!(call_id = %request.call_id, %key, method = %request.method, "receive request");
        let Request { call_id, method, parameters, .. } = request;
        let invoked = method.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            service.invoke(&invoked, parameters)
        })
        .await;

        let response = match outcome {
            Ok(Ok(value)) => Response::ok(call_id, value),
            Ok(Err(message)) => {
                error!(%call_id, %method, error = %message, "service returned an error");
                Response::failed(call_id, message)
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(%call_id, %method, error = %message, "service panicked");
                Response::failed(call_id, message)
            }
            Err(e) => Response::failed(call_id, e.to_string()),
        };
        Some(response)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}
