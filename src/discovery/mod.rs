//! Discovery module - the service advertisement/browsing collaborator.
//!
//! The core never implements a discovery protocol itself. It consumes the
//! [`Discovery`] trait:
//! - `publish`: advertise a named service at an address
//! - `browse`: stream `found` / `lost` events for a service type
//! - `resolve`: turn a record into a connectable address
//!
//! [`LocalDiscovery`] is an in-process registry implementing the trait, for
//! peers living in the same process and for tests.

mod local;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::transport::PeerAddr;

pub use local::LocalDiscovery;

/// Default service type used by servers and clients.
pub const DEFAULT_SERVICE_TYPE: &str = "_wirelink._tcp.";

/// Default service domain.
pub const DEFAULT_SERVICE_DOMAIN: &str = "local.";

/// Boxed future returned by [`Discovery::resolve`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of browse results.
pub type DiscoveryEvents = mpsc::UnboundedReceiver<DiscoveryEvent>;

/// Reference to a discoverable peer. Owned by the discovery collaborator;
/// the core only compares and displays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRecord {
    pub name: String,
    pub service_type: String,
    pub domain: String,
}

impl ServiceRecord {
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            domain: domain.into(),
        }
    }

    /// Record with the default type and domain.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_SERVICE_TYPE, DEFAULT_SERVICE_DOMAIN)
    }

    /// Whether this record belongs to a browse of `service_type` in `domain`.
    pub fn matches(&self, service_type: &str, domain: &str) -> bool {
        self.service_type == service_type && normalize_domain(&self.domain) == normalize_domain(domain)
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.name, self.service_type, normalize_domain(&self.domain))
    }
}

/// An empty domain means the default one.
fn normalize_domain(domain: &str) -> &str {
    if domain.is_empty() {
        DEFAULT_SERVICE_DOMAIN
    } else {
        domain
    }
}

/// Browse result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found {
        record: ServiceRecord,
        more_coming: bool,
    },
    Lost {
        record: ServiceRecord,
        more_coming: bool,
    },
}

impl DiscoveryEvent {
    pub fn record(&self) -> &ServiceRecord {
        match self {
            DiscoveryEvent::Found { record, .. } | DiscoveryEvent::Lost { record, .. } => record,
        }
    }
}

/// Active advertisement. Dropping it withdraws the service.
pub struct Publication {
    record: ServiceRecord,
    withdraw: Option<Box<dyn FnOnce() + Send>>,
}

impl Publication {
    /// Build a publication that runs `withdraw` when dropped.
    pub fn new(record: ServiceRecord, withdraw: impl FnOnce() + Send + 'static) -> Self {
        Self {
            record,
            withdraw: Some(Box::new(withdraw)),
        }
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        if let Some(withdraw) = self.withdraw.take() {
            withdraw();
        }
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("record", &self.record)
            .finish()
    }
}

/// Service discovery collaborator.
pub trait Discovery: Send + Sync + 'static {
    /// Advertise `record` as reachable at `addr`.
    fn publish(&self, record: ServiceRecord, addr: PeerAddr) -> Result<Publication>;

    /// Start browsing for services of `service_type` in `domain`.
    fn browse(&self, service_type: &str, domain: &str) -> Result<DiscoveryEvents>;

    /// Resolve a record to a connectable address.
    fn resolve(&self, record: &ServiceRecord) -> BoxFuture<'static, Result<PeerAddr>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_display() {
        let record = ServiceRecord::new("printer", "_ipp._tcp.", "");
        assert_eq!(record.to_string(), "printer._ipp._tcp.local.");
    }

    #[test]
    fn test_record_matching_normalizes_domain() {
        let record = ServiceRecord::named("a");
        assert!(record.matches(DEFAULT_SERVICE_TYPE, ""));
        assert!(record.matches(DEFAULT_SERVICE_TYPE, "local."));
        assert!(!record.matches("_other._tcp.", "local."));
    }

    #[test]
    fn test_publication_withdraws_once_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let publication = Publication::new(ServiceRecord::named("x"), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(publication.record().name, "x");

        drop(publication);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
