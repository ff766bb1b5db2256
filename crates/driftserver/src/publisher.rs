//! Writes this server's endpoint node into the registry and removes it on shutdown.

use std::sync::Arc;

use driftreg::DATA_PATH;
use driftreg::Registry;
use driftwire::Endpoint;
use tracing::info;
use tracing::warn;

use crate::error::Result;

pub struct Publication {
    registry: Arc<dyn Registry>,
    path: String,
    endpoint: Endpoint,
}

impl Publication {
    /// Creates a sequential node under the data prefix holding `endpoint` as JSON.
    pub async fn publish(registry: Arc<dyn Registry>, endpoint: Endpoint) -> Result<Self> {
        let data = endpoint.to_json()?;
        let path = registry.create_sequential(DATA_PATH, data.into_bytes()).await?;
        info!(%path, %endpoint, services = endpoint.services.len(), "register service");
        Ok(Self {
            registry,
            path,
            endpoint,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Replaces the node's payload, for example after registering another service.
    pub async fn update(&mut self, endpoint: Endpoint) -> Result<()> {
        self.registry.set_data(&self.path, endpoint.to_json()?.into_bytes()).await?;
        self.endpoint = endpoint;
        Ok(())
    }

    pub async fn unpublish(self) {
        match self.registry.delete(&self.path).await {
            Ok(()) => info!(path = %self.path, "unregister service"),
            Err(e) => warn!(path = %self.path, error = %e, "delete node failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use driftreg::MemoryRegistry;
    use driftreg::REGISTRY_PATH;

    use super::*;

    #[tokio::test]
    async fn test_publish_update_unpublish() {
        let store = Arc::new(MemoryRegistry::new());
        let endpoint = Endpoint::new("127.0.0.1", 18866).with_service("Hello", "1.0");

        let mut publication = Publication::publish(store.clone(), endpoint.clone()).await.unwrap();
        assert!(publication.path().starts_with(DATA_PATH));
        let stored = store.get_data(publication.path()).await.unwrap();
        assert_eq!(Endpoint::from_json(&String::from_utf8(stored).unwrap()).unwrap(), endpoint);

        let wider = endpoint.clone().with_service("Echo", "");
        publication.update(wider.clone()).await.unwrap();
        let stored = store.get_data(publication.path()).await.unwrap();
        assert_eq!(Endpoint::from_json(&String::from_utf8(stored).unwrap()).unwrap(), wider);

        publication.unpublish().await;
        assert!(store.children(REGISTRY_PATH).await.unwrap().is_empty());
    }
}
