//! Services this agent publishes to the mesh

use mesh_wire::{ServiceKey, ServiceRecord};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::set::HubSet;

/// In-memory list of locally hosted services
///
/// Every change is pushed to every hub as the full `(name, protocol)` list.
/// Host and port never leave the agent.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: Mutex<Vec<ServiceRecord>>,
    hubs: Arc<HubSet>,
}

impl ServiceRegistry {
    /// Create an empty registry syncing to `hubs`
    pub fn new(hubs: Arc<HubSet>) -> Self {
        Self {
            services: Mutex::new(Vec::new()),
            hubs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServiceRecord>> {
        self.services.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace the service `protocol/name`
    pub fn publish(&self, protocol: &str, name: &str, host: &str, port: u16) -> ServiceRecord {
        let record = ServiceRecord {
            name: name.to_string(),
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
        };

        {
            // Lists reach the hubs in the order they were computed
            let mut services = self.lock();
            match services
                .iter_mut()
                .find(|s| s.protocol == protocol && s.name == name)
            {
                Some(existing) => *existing = record.clone(),
                None => services.push(record.clone()),
            }
            self.hubs.update_service_list(&keys(&services));
        }

        info!("Published service {}/{} at {}:{}", protocol, name, host, port);
        record
    }

    /// Remove the service `protocol/name`; returns whether it existed
    pub fn delete(&self, protocol: &str, name: &str) -> bool {
        {
            let mut services = self.lock();
            let before = services.len();
            services.retain(|s| !(s.protocol == protocol && s.name == name));
            if services.len() == before {
                return false;
            }
            self.hubs.update_service_list(&keys(&services));
        }

        info!("Deleted service {}/{}", protocol, name);
        true
    }

    /// Routing keys of every published service
    pub fn list(&self) -> Vec<ServiceKey> {
        keys(&self.lock())
    }

    /// Local address of the service `protocol/name`
    pub fn find(&self, protocol: &str, name: &str) -> Option<ServiceRecord> {
        self.lock()
            .iter()
            .find(|s| s.protocol == protocol && s.name == name)
            .cloned()
    }
}

fn keys(services: &[ServiceRecord]) -> Vec<ServiceKey> {
    services.iter().map(ServiceRecord::key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use crate::testing::MockChannel;
    use std::time::Duration;

    #[test]
    fn test_publish_same_key_updates_in_place() {
        let registry = ServiceRegistry::new(Arc::new(HubSet::default()));

        registry.publish("tcp", "db", "localhost", 5432);
        registry.publish("tcp", "web", "localhost", 80);
        registry.publish("tcp", "db", "10.0.0.2", 5433);

        assert_eq!(
            registry.list(),
            vec![ServiceKey::new("tcp", "db"), ServiceKey::new("tcp", "web")]
        );
        let db = registry.find("tcp", "db").unwrap();
        assert_eq!((db.host.as_str(), db.port), ("10.0.0.2", 5433));

        // Protocol is part of the key
        assert!(registry.find("udp", "db").is_none());
    }

    #[test]
    fn test_delete_reports_presence() {
        let registry = ServiceRegistry::new(Arc::new(HubSet::default()));
        registry.publish("tcp", "db", "localhost", 5432);

        assert!(registry.delete("tcp", "db"));
        assert!(!registry.delete("tcp", "db"));
        assert!(registry.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_sync_to_hubs() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let hub = Hub::new(channel.clone(), "agent-1", "edge", HubConfig::default());
        let registry = ServiceRegistry::new(Arc::new(HubSet::new(vec![hub])));

        registry.publish("tcp", "db", "localhost", 5432);
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.delete("tcp", "missing");
        registry.delete("tcp", "db");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            channel.service_lists(),
            vec![vec![ServiceKey::new("tcp", "db")], vec![]]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_leave_hub_with_latest_list() {
        let channel = Arc::new(MockChannel::new("hub:1"));
        let hub = Hub::new(channel.clone(), "agent-1", "edge", HubConfig::default());
        let registry = Arc::new(ServiceRegistry::new(Arc::new(HubSet::new(vec![hub.clone()]))));

        let publishers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for i in 0..20 {
                        registry.publish("tcp", &format!("svc-{}-{}", worker, i), "127.0.0.1", 1000);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !hub.is_synced() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let expected = registry.list();
        assert_eq!(expected.len(), 80);
        assert_eq!(channel.service_lists().last(), Some(&expected));
    }
}
