//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use shipsync_core::{
    ExternalId, FilterKey, RemoteCustomer, RemotePackage, RemoteRecord, RetryPolicy,
};
use shipsync_store::MemoryStore;
use shipsync_sync::memory::MemorySource;
use shipsync_sync::SessionConfig;

/// Builds remote shipments with predictable ids.
///
/// Shipment `n` has external id `S-n`, one package per `packages_per_shipment`
/// with ids `P-n-k`, and belongs to customer `C-(n % customers)`.
#[derive(Debug, Clone)]
pub struct ShipmentFactory {
    pub customers: usize,
    pub packages_per_shipment: usize,
    /// Whether customers carry an external id or must be matched by name.
    pub customer_ids: bool,
}

impl Default for ShipmentFactory {
    fn default() -> Self {
        Self {
            customers: 5,
            packages_per_shipment: 1,
            customer_ids: true,
        }
    }
}

impl ShipmentFactory {
    pub fn shipment(&self, n: usize) -> RemoteRecord {
        self.shipment_with_status(n, "in_transit")
    }

    pub fn shipment_with_status(&self, n: usize, status: &str) -> RemoteRecord {
        let customer = n % self.customers.max(1);
        RemoteRecord {
            external_id: format!("S-{n}").into(),
            customer: RemoteCustomer {
                external_id: self
                    .customer_ids
                    .then(|| ExternalId::from(format!("C-{customer}"))),
                name: format!("Customer {customer}"),
                address: format!("{} Harbour Rd", customer + 1),
                phone: None,
            },
            packages: (0..self.packages_per_shipment.max(1))
                .map(|k| RemotePackage {
                    external_id: format!("P-{n}-{k}").into(),
                    tracking_number: format!("TRK{n:05}{k}"),
                    status: status.into(),
                    description: None,
                    weight_grams: Some(250 * (k as u32 + 1)),
                })
                .collect(),
            updated_at: 1_700_000_000_000 + n as i64,
        }
    }

    /// A shipment that fails mapping: it lists no packages.
    pub fn unmappable(&self, n: usize) -> RemoteRecord {
        let mut record = self.shipment(n);
        record.packages.clear();
        record
    }

    /// `count` shipments where the indices in `unmappable` fail mapping.
    pub fn batch(&self, count: usize, unmappable: &[usize]) -> Vec<RemoteRecord> {
        (0..count)
            .map(|n| {
                if unmappable.contains(&n) {
                    self.unmappable(n)
                } else {
                    self.shipment(n)
                }
            })
            .collect()
    }
}

/// A memory store and a scripted source sharing one filter key.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub source: Arc<MemorySource>,
    pub filter_key: FilterKey,
    pub factory: ShipmentFactory,
}

impl TestFixture {
    pub fn new(page_size: usize) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            source: Arc::new(MemorySource::new(page_size)),
            filter_key: FilterKey::from("warehouse-1"),
            factory: ShipmentFactory::default(),
        }
    }

    /// Register `count` shipments with the source.
    pub fn seed(&self, count: usize, unmappable: &[usize]) {
        for record in self.factory.batch(count, unmappable) {
            self.source.put(&self.filter_key, record);
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Session settings with generous timeouts and no retry delay.
pub fn fast_session_config(max_retries: u32, error_ceiling: u64) -> SessionConfig {
    SessionConfig {
        remote_timeout_ms: 5_000,
        error_ceiling,
        retry: RetryPolicy::new(max_retries, Duration::ZERO),
    }
}
