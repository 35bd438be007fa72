//! In-process discovery registry.
//!
//! Publications live in a shared map; browsers receive the current matching
//! records as `found` events when they start, then live updates.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use super::{BoxFuture, Discovery, DiscoveryEvent, DiscoveryEvents, Publication, ServiceRecord};
use crate::error::{Result, WirelinkError};
use crate::transport::PeerAddr;

struct Browser {
    service_type: String,
    domain: String,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

#[derive(Default)]
struct Registry {
    services: BTreeMap<ServiceRecord, PeerAddr>,
    browsers: Vec<Browser>,
}

impl Registry {
    fn notify(&mut self, event: DiscoveryEvent) {
        let record = event.record().clone();
        self.browsers.retain(|browser| {
            if !record.matches(&browser.service_type, &browser.domain) {
                return !browser.tx.is_closed();
            }
            browser.tx.send(event.clone()).is_ok()
        });
    }
}

/// Shared in-process service registry.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct LocalDiscovery {
    inner: Arc<Mutex<Registry>>,
}

impl LocalDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of currently published services.
    pub fn len(&self) -> usize {
        self.lock().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn withdraw(registry: &Weak<Mutex<Registry>>, record: &ServiceRecord) {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.services.remove(record).is_some() {
            tracing::debug!("Withdrew service {}", record);
            registry.notify(DiscoveryEvent::Lost {
                record: record.clone(),
                more_coming: false,
            });
        }
    }
}

impl Discovery for LocalDiscovery {
    fn publish(&self, record: ServiceRecord, addr: PeerAddr) -> Result<Publication> {
        let mut registry = self.lock();
        if registry.services.contains_key(&record) {
            return Err(WirelinkError::Config(format!(
                "service {} is already published",
                record
            )));
        }

        tracing::debug!("Published service {} at {}", record, addr);
        registry.services.insert(record.clone(), addr);
        registry.notify(DiscoveryEvent::Found {
            record: record.clone(),
            more_coming: false,
        });

        let weak = Arc::downgrade(&self.inner);
        let withdrawn = record.clone();
        Ok(Publication::new(record, move || {
            LocalDiscovery::withdraw(&weak, &withdrawn)
        }))
    }

    fn browse(&self, service_type: &str, domain: &str) -> Result<DiscoveryEvents> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();

        let existing: Vec<ServiceRecord> = registry
            .services
            .keys()
            .filter(|record| record.matches(service_type, domain))
            .cloned()
            .collect();
        let last = existing.len().saturating_sub(1);
        for (i, record) in existing.into_iter().enumerate() {
            let _ = tx.send(DiscoveryEvent::Found {
                record,
                more_coming: i < last,
            });
        }

        registry.browsers.push(Browser {
            service_type: service_type.to_string(),
            domain: domain.to_string(),
            tx,
        });
        Ok(rx)
    }

    fn resolve(&self, record: &ServiceRecord) -> BoxFuture<'static, Result<PeerAddr>> {
        let result = self
            .lock()
            .services
            .get(record)
            .cloned()
            .ok_or_else(|| WirelinkError::Resolution(record.to_string()));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DEFAULT_SERVICE_DOMAIN, DEFAULT_SERVICE_TYPE};

    fn addr(port: u16) -> PeerAddr {
        PeerAddr::tcp("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_publish_then_resolve() {
        let discovery = LocalDiscovery::new();
        let record = ServiceRecord::named("alpha");
        let _publication = discovery.publish(record.clone(), addr(4000)).unwrap();

        assert_eq!(discovery.resolve(&record).await.unwrap(), addr(4000));
        assert_eq!(discovery.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_fails() {
        let discovery = LocalDiscovery::new();
        let err = discovery
            .resolve(&ServiceRecord::named("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, WirelinkError::Resolution(_)));
    }

    #[test]
    fn test_duplicate_publish_rejected() {
        let discovery = LocalDiscovery::new();
        let _first = discovery.publish(ServiceRecord::named("a"), addr(1)).unwrap();
        assert!(discovery.publish(ServiceRecord::named("a"), addr(2)).is_err());
    }

    #[tokio::test]
    async fn test_browse_replays_existing_with_more_coming() {
        let discovery = LocalDiscovery::new();
        let _a = discovery.publish(ServiceRecord::named("a"), addr(1)).unwrap();
        let _b = discovery.publish(ServiceRecord::named("b"), addr(2)).unwrap();
        let _other = discovery
            .publish(ServiceRecord::new("c", "_other._tcp.", ""), addr(3))
            .unwrap();

        let mut events = discovery
            .browse(DEFAULT_SERVICE_TYPE, DEFAULT_SERVICE_DOMAIN)
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Found {
                record: ServiceRecord::named("a"),
                more_coming: true
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Found {
                record: ServiceRecord::named("b"),
                more_coming: false
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_browse_sees_live_publish_and_withdraw() {
        let discovery = LocalDiscovery::new();
        let mut events = discovery.browse(DEFAULT_SERVICE_TYPE, "").unwrap();

        let publication = discovery.publish(ServiceRecord::named("live"), addr(9)).unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Found { ref record, .. } if record.name == "live"
        ));

        drop(publication);
        assert!(matches!(
            events.recv().await.unwrap(),
            DiscoveryEvent::Lost { ref record, .. } if record.name == "live"
        ));
        assert!(discovery.is_empty());
    }

    #[test]
    fn test_closed_browsers_are_pruned() {
        let discovery = LocalDiscovery::new();
        let events = discovery.browse(DEFAULT_SERVICE_TYPE, "").unwrap();
        drop(events);

        let _p = discovery.publish(ServiceRecord::named("x"), addr(1)).unwrap();
        assert!(discovery.lock().browsers.is_empty());
    }
}
