//! Status-triggered single-record sync.
//!
//! When a local record moves to one of the configured trigger statuses, the
//! shipment it belongs to is fetched from the remote system and re-applied.
//! Dispatch is fire-and-forget: the caller's write has already committed,
//! the sync runs on its own task, and failures end up in the monitoring log
//! instead of propagating back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use shipsync_core::{now_millis, ExternalId, RecordId, StatusValue};
use shipsync_store::{ConfigStore, RecordRepository};

use crate::config::AutoSyncRuntimeConfig;
use crate::error::{Result, SyncError};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::mapper::RecordMapper;
use crate::retry::RetryExecutor;
use crate::settings::AutoSyncSettings;
use crate::source::RemoteSyncSource;
use crate::MONITORING_TARGET;

/// A committed status change of a local child record.
///
/// Delivered at least once; duplicates are harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub record_id: RecordId,
    pub old_status: Option<StatusValue>,
    pub new_status: StatusValue,
    pub occurred_at: i64,
}

/// Why an event did not schedule a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    StatusNotTracked,
    /// A sync for the same record is still running.
    AlreadyInFlight,
    /// The configuration could not be read.
    ConfigUnavailable,
}

/// Result of handing an event to the trigger.
#[derive(Debug)]
pub enum Dispatch {
    Skipped(SkipReason),
    Scheduled(JoinHandle<AutoSyncOutcome>),
}

impl Dispatch {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Dispatch::Scheduled(_))
    }

    /// Wait for a scheduled sync. `None` if skipped or the task was lost.
    pub async fn outcome(self) -> Option<AutoSyncOutcome> {
        match self {
            Dispatch::Skipped(_) => None,
            Dispatch::Scheduled(handle) => handle.await.ok(),
        }
    }
}

/// How a scheduled single-record sync ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSyncOutcome {
    Synced {
        record_id: RecordId,
        shipment_id: ExternalId,
        attempts: u32,
        applied: IngestOutcome,
    },
    Failed {
        record_id: RecordId,
        attempts: u32,
        error: String,
    },
}

impl AutoSyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, AutoSyncOutcome::Synced { .. })
    }

    /// Remote calls made for the fetch, including retries.
    pub fn attempts(&self) -> u32 {
        match self {
            AutoSyncOutcome::Synced { attempts, .. } | AutoSyncOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

type InFlight = Arc<Mutex<HashSet<RecordId>>>;

/// Releases the record's in-flight slot when the task ends, even on panic.
struct InFlightSlot {
    in_flight: InFlight,
    record_id: RecordId,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        lock_in_flight(&self.in_flight).remove(&self.record_id);
    }
}

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashSet<RecordId>> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reacts to status changes with best-effort single-record syncs.
pub struct AutoSyncTrigger<S, R> {
    inner: Arc<TriggerInner<S, R>>,
}

struct TriggerInner<S, R> {
    store: Arc<S>,
    source: Arc<R>,
    settings: Arc<AutoSyncSettings<S>>,
    ingestor: Ingestor<S>,
    runtime: AutoSyncRuntimeConfig,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
}

impl<S, R> Clone for AutoSyncTrigger<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, R> AutoSyncTrigger<S, R>
where
    S: RecordRepository + ConfigStore + 'static,
    R: RemoteSyncSource + 'static,
{
    pub fn new(
        store: Arc<S>,
        source: Arc<R>,
        settings: Arc<AutoSyncSettings<S>>,
        mapper: RecordMapper,
        runtime: AutoSyncRuntimeConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(runtime.max_in_flight.max(1)));
        Self {
            inner: Arc::new(TriggerInner {
                ingestor: Ingestor::new(Arc::clone(&store), mapper),
                store,
                source,
                settings,
                runtime,
                permits,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    /// Number of records with a sync scheduled or running.
    pub fn in_flight(&self) -> usize {
        lock_in_flight(&self.inner.in_flight).len()
    }

    /// Handle a committed status change. Never fails.
    pub async fn on_status_changed(&self, event: StatusChangeEvent) -> Dispatch {
        let config = match self.inner.settings.get().await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    target: MONITORING_TARGET,
                    record_id = %event.record_id,
                    error = %e,
                    "auto-sync skipped: configuration unavailable"
                );
                return Dispatch::Skipped(SkipReason::ConfigUnavailable);
            }
        };

        if !config.enabled {
            trace!(record_id = %event.record_id, "auto-sync disabled");
            return Dispatch::Skipped(SkipReason::Disabled);
        }
        if !config.triggers_on(&event.new_status) {
            trace!(record_id = %event.record_id, status = %event.new_status, "status does not trigger auto-sync");
            return Dispatch::Skipped(SkipReason::StatusNotTracked);
        }
        if !lock_in_flight(&self.inner.in_flight).insert(event.record_id) {
            debug!(record_id = %event.record_id, "auto-sync already in flight");
            return Dispatch::Skipped(SkipReason::AlreadyInFlight);
        }

        let slot = InFlightSlot {
            in_flight: Arc::clone(&self.inner.in_flight),
            record_id: event.record_id,
        };
        let retry = RetryExecutor::new(config.retry_policy(), self.inner.runtime.remote_timeout());
        let trigger = self.clone();

        debug!(
            record_id = %event.record_id,
            old_status = ?event.old_status,
            new_status = %event.new_status,
            "auto-sync scheduled"
        );
        Dispatch::Scheduled(tokio::spawn(async move {
            let _slot = slot;
            trigger.sync(event, retry).await
        }))
    }

    async fn sync(&self, event: StatusChangeEvent, retry: RetryExecutor) -> AutoSyncOutcome {
        let record_id = event.record_id;
        let _permit = match Arc::clone(&self.inner.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return AutoSyncOutcome::Failed {
                    record_id,
                    attempts: 0,
                    error: "auto-sync worker pool closed".into(),
                }
            }
        };

        let (result, attempts) = self.fetch_and_apply(record_id, &retry).await;
        match result {
            Ok((shipment_id, applied)) => {
                info!(
                    record_id = %record_id,
                    shipment_id = %shipment_id,
                    attempts,
                    lag_ms = now_millis().saturating_sub(event.occurred_at),
                    "auto-sync completed"
                );
                AutoSyncOutcome::Synced {
                    record_id,
                    shipment_id,
                    attempts,
                    applied,
                }
            }
            Err(e) => {
                error!(
                    target: MONITORING_TARGET,
                    record_id = %record_id,
                    new_status = %event.new_status,
                    attempts,
                    error = %e,
                    "auto-sync failed"
                );
                AutoSyncOutcome::Failed {
                    record_id,
                    attempts,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn fetch_and_apply(
        &self,
        record_id: RecordId,
        retry: &RetryExecutor,
    ) -> (Result<(ExternalId, IngestOutcome)>, u32) {
        let child = match self.inner.store.get_child(record_id).await {
            Ok(Some(child)) => child,
            Ok(None) => return (Err(SyncError::RecordNotFound(record_id)), 0),
            Err(e) => return (Err(e.into()), 0),
        };

        let source = &*self.inner.source;
        let shipment_id = &child.fields.shipment_id;
        let (fetched, attempts) = retry
            .run_counted("fetch_one", || async move { source.fetch_one(shipment_id).await })
            .await;
        let record = match fetched {
            Ok(record) => record,
            Err(e) => return (Err(e), attempts),
        };

        if !record.contains_package(&child.external_id) {
            warn!(
                record_id = %record_id,
                shipment_id = %shipment_id,
                package_id = %child.external_id,
                "package no longer listed on its shipment"
            );
        }

        let applied = self.inner.ingestor.apply(&record, retry).await;
        (applied.map(|applied| (shipment_id.clone(), applied)), attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use shipsync_core::{
        AutoSyncConfigUpdate, FilterKey, RemoteCustomer, RemotePackage, RemoteRecord, RetryPolicy,
    };
    use shipsync_store::MemoryStore;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<MemorySource>,
        settings: Arc<AutoSyncSettings<MemoryStore>>,
        trigger: AutoSyncTrigger<MemoryStore, MemorySource>,
        record_id: RecordId,
    }

    fn shipment(status: &str) -> RemoteRecord {
        RemoteRecord {
            external_id: "S-1".into(),
            customer: RemoteCustomer {
                external_id: Some("C-1".into()),
                name: "Eve Moss".into(),
                address: "3 Pier Ln".into(),
                phone: None,
            },
            packages: vec![RemotePackage {
                external_id: "P-1".into(),
                tracking_number: "TRK-1".into(),
                status: status.into(),
                description: None,
                weight_grams: None,
            }],
            updated_at: 0,
        }
    }

    async fn harness(enabled: bool, retry_attempts: u32) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemorySource::default());
        source.put(&FilterKey::from("wh-1"), shipment("in_transit"));

        let ingestor = Ingestor::new(Arc::clone(&store), RecordMapper::default());
        let retry = RetryExecutor::new(RetryPolicy::none(), Duration::from_secs(1));
        ingestor.apply(&shipment("in_transit"), &retry).await.unwrap();
        let record_id = store
            .find_child_by_external_id(&"P-1".into())
            .await
            .unwrap()
            .unwrap()
            .id;

        let settings = Arc::new(AutoSyncSettings::new(Arc::clone(&store)));
        settings
            .update(&AutoSyncConfigUpdate {
                enabled: Some(enabled),
                retry_attempts: Some(retry_attempts),
                retry_delay_seconds: Some(0),
                ..Default::default()
            })
            .await
            .unwrap();

        let trigger = AutoSyncTrigger::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&settings),
            RecordMapper::default(),
            AutoSyncRuntimeConfig {
                max_in_flight: 2,
                remote_timeout_ms: 1_000,
            },
        );

        Harness {
            store,
            source,
            settings,
            trigger,
            record_id,
        }
    }

    fn event(record_id: RecordId, status: &str) -> StatusChangeEvent {
        StatusChangeEvent {
            record_id,
            old_status: Some("in_transit".into()),
            new_status: status.into(),
            occurred_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_skips_when_disabled_or_untracked() {
        let h = harness(false, 3).await;
        let dispatch = h.trigger.on_status_changed(event(h.record_id, "delivered")).await;
        assert!(matches!(dispatch, Dispatch::Skipped(SkipReason::Disabled)));

        h.settings
            .update(&AutoSyncConfigUpdate {
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let dispatch = h.trigger.on_status_changed(event(h.record_id, "picked_up")).await;
        assert!(matches!(dispatch, Dispatch::Skipped(SkipReason::StatusNotTracked)));
        assert_eq!(h.source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_syncs_tracked_status() {
        let h = harness(true, 3).await;
        h.source.put(&FilterKey::from("wh-1"), shipment("delivered"));

        let outcome = h
            .trigger
            .on_status_changed(event(h.record_id, "delivered"))
            .await
            .outcome()
            .await
            .unwrap();

        assert!(outcome.is_synced());
        assert_eq!(outcome.attempts(), 1);
        let child = h.store.get_child(h.record_id).await.unwrap().unwrap();
        assert_eq!(child.fields.status, StatusValue::from("delivered"));
        assert_eq!(h.trigger.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_swallowed() {
        let h = harness(true, 2).await;
        h.source.fail_next_fetches(100);

        let outcome = h
            .trigger
            .on_status_changed(event(h.record_id, "delivered"))
            .await
            .outcome()
            .await
            .unwrap();

        assert!(matches!(outcome, AutoSyncOutcome::Failed { attempts: 3, .. }));
        assert_eq!(h.source.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let h = harness(true, 5).await;
        h.source.reject_fetches(true);

        let outcome = h
            .trigger
            .on_status_changed(event(h.record_id, "exception"))
            .await
            .outcome()
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.is_synced());
    }

    #[tokio::test]
    async fn test_duplicate_events_coalesce() {
        let h = harness(true, 0).await;
        h.source.set_latency(Duration::from_millis(50));

        let first = h.trigger.on_status_changed(event(h.record_id, "delivered")).await;
        assert!(first.is_scheduled());
        let second = h.trigger.on_status_changed(event(h.record_id, "delivered")).await;
        assert!(matches!(second, Dispatch::Skipped(SkipReason::AlreadyInFlight)));

        assert!(first.outcome().await.unwrap().is_synced());
        let third = h.trigger.on_status_changed(event(h.record_id, "delivered")).await;
        assert!(third.is_scheduled());
        third.outcome().await;
    }

    #[tokio::test]
    async fn test_unknown_record_fails_quietly() {
        let h = harness(true, 3).await;

        let outcome = h
            .trigger
            .on_status_changed(event(RecordId(9_999), "delivered"))
            .await
            .outcome()
            .await
            .unwrap();

        assert!(matches!(outcome, AutoSyncOutcome::Failed { attempts: 0, .. }));
        assert_eq!(h.source.fetch_calls(), 0);
    }
}
