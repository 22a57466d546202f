//! Remote source abstraction.
//!
//! The engine only needs two things from the external shipment system:
//! a paginated "list records since checkpoint" and a single-record fetch.
//! Wire formats live in implementations.

use async_trait::async_trait;

use shipsync_core::{ExternalId, FilterKey, RemoteRecord};

use crate::error::Result;

/// One page of a remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<RemoteRecord>,
    /// Opaque token for the next page; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
    /// Total number of records in the listing, if the remote knows it.
    pub total_hint: Option<u64>,
}

/// Contract the engine requires of the external system.
///
/// Implementations must be thread-safe (Send + Sync). Errors should be
/// classified: `RemoteUnavailable` for network trouble, `RemoteRejected`
/// for requests the remote will never accept.
#[async_trait]
pub trait RemoteSyncSource: Send + Sync {
    /// List records for `filter_key`, starting at `page_token`.
    async fn list_since(&self, filter_key: &FilterKey, page_token: Option<&str>) -> Result<Page>;

    /// Fetch a single shipment by its external id.
    async fn fetch_one(&self, external_id: &ExternalId) -> Result<RemoteRecord>;
}

/// A scripted in-memory source for testing.
///
/// Pages are slices of the records registered under a filter key; the page
/// token is the offset of the next slice. Failures and latency can be
/// injected, and listing can be held open to keep a session running.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    use crate::error::SyncError;

    struct Inner {
        records: BTreeMap<FilterKey, Vec<RemoteRecord>>,
        page_size: usize,
        with_total_hint: bool,
        fail_lists: u32,
        fail_fetches: u32,
        reject_fetches: bool,
        latency: Duration,
        gate: Option<Arc<Semaphore>>,
    }

    /// In-memory remote source.
    pub struct MemorySource {
        inner: Mutex<Inner>,
        list_calls: AtomicU32,
        fetch_calls: AtomicU32,
    }

    impl MemorySource {
        pub fn new(page_size: usize) -> Self {
            Self {
                inner: Mutex::new(Inner {
                    records: BTreeMap::new(),
                    page_size: page_size.max(1),
                    with_total_hint: true,
                    fail_lists: 0,
                    fail_fetches: 0,
                    reject_fetches: false,
                    latency: Duration::ZERO,
                    gate: None,
                }),
                list_calls: AtomicU32::new(0),
                fetch_calls: AtomicU32::new(0),
            }
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Add or replace a record (matched by external id) under `filter_key`.
        pub fn put(&self, filter_key: &FilterKey, record: RemoteRecord) {
            let mut inner = self.lock();
            let records = inner.records.entry(filter_key.clone()).or_default();
            match records
                .iter_mut()
                .find(|r| r.external_id == record.external_id)
            {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        }

        /// Whether pages carry a `total_hint`.
        pub fn set_total_hint(&self, enabled: bool) {
            self.lock().with_total_hint = enabled;
        }

        /// Fail the next `count` listing calls with `RemoteUnavailable`.
        pub fn fail_next_lists(&self, count: u32) {
            self.lock().fail_lists = count;
        }

        /// Fail the next `count` fetches with `RemoteUnavailable`.
        pub fn fail_next_fetches(&self, count: u32) {
            self.lock().fail_fetches = count;
        }

        /// Reject every fetch with `RemoteRejected`.
        pub fn reject_fetches(&self, reject: bool) {
            self.lock().reject_fetches = reject;
        }

        /// Delay every call by `latency`.
        pub fn set_latency(&self, latency: Duration) {
            self.lock().latency = latency;
        }

        /// Block listing calls until [`release`](Self::release).
        pub fn hold(&self) {
            self.lock().gate = Some(Arc::new(Semaphore::new(0)));
        }

        /// Let held and future listing calls proceed.
        pub fn release(&self) {
            if let Some(gate) = self.lock().gate.take() {
                gate.close();
            }
        }

        pub fn list_calls(&self) -> u32 {
            self.list_calls.load(Ordering::SeqCst)
        }

        pub fn fetch_calls(&self) -> u32 {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        fn take_failure(counter: &mut u32) -> bool {
            if *counter > 0 {
                *counter -= 1;
                true
            } else {
                false
            }
        }
    }

    impl Default for MemorySource {
        fn default() -> Self {
            Self::new(10)
        }
    }

    #[async_trait]
    impl RemoteSyncSource for MemorySource {
        async fn list_since(
            &self,
            filter_key: &FilterKey,
            page_token: Option<&str>,
        ) -> Result<Page> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);

            let (gate, latency) = {
                let inner = self.lock();
                (inner.gate.clone(), inner.latency)
            };
            if let Some(gate) = gate {
                // Closed on release.
                let _ = gate.acquire().await;
            }
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut inner = self.lock();
            if Self::take_failure(&mut inner.fail_lists) {
                return Err(SyncError::unavailable("listing failed"));
            }

            let offset = match page_token {
                Some(token) => token
                    .parse::<usize>()
                    .map_err(|_| SyncError::rejected(format!("bad page token {token:?}")))?,
                None => 0,
            };
            let all = inner.records.get(filter_key).map(Vec::as_slice).unwrap_or(&[]);
            let end = (offset + inner.page_size).min(all.len());
            let records = all.get(offset..end).unwrap_or(&[]).to_vec();

            Ok(Page {
                records,
                next_page_token: (end < all.len()).then(|| end.to_string()),
                total_hint: inner.with_total_hint.then_some(all.len() as u64),
            })
        }

        async fn fetch_one(&self, external_id: &ExternalId) -> Result<RemoteRecord> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);

            let latency = self.lock().latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut inner = self.lock();
            if inner.reject_fetches {
                return Err(SyncError::rejected(format!("access to {external_id} denied")));
            }
            if Self::take_failure(&mut inner.fail_fetches) {
                return Err(SyncError::unavailable("fetch failed"));
            }

            inner
                .records
                .values()
                .flatten()
                .find(|r| &r.external_id == external_id)
                .cloned()
                .ok_or_else(|| SyncError::rejected(format!("unknown shipment {external_id}")))
        }
    }
}
