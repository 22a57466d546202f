//! Applying one remote shipment to the local store.
//!
//! Shared by bulk sessions and auto-sync so both write identically: parent
//! first, then every package as a child keyed by its external id. Re-applying
//! the same shipment only ever updates.

use std::sync::Arc;

use tracing::trace;

use shipsync_core::{RemoteRecord, UnitOutcome};
use shipsync_store::RecordRepository;

use crate::error::{Result, SyncError};
use crate::mapper::RecordMapper;
use crate::retry::RetryExecutor;

/// What applying one shipment changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub created_records: u64,
    pub updated_records: u64,
    /// Newly created parents.
    pub created_related: u64,
}

impl From<IngestOutcome> for UnitOutcome {
    fn from(outcome: IngestOutcome) -> Self {
        UnitOutcome::Applied {
            created_records: outcome.created_records,
            updated_records: outcome.updated_records,
            created_related: outcome.created_related,
        }
    }
}

/// Maps and upserts remote shipments.
pub struct Ingestor<S: ?Sized> {
    store: Arc<S>,
    mapper: RecordMapper,
}

impl<S: ?Sized> Clone for Ingestor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            mapper: self.mapper.clone(),
        }
    }
}

impl<S: RecordRepository + ?Sized> Ingestor<S> {
    pub fn new(store: Arc<S>, mapper: RecordMapper) -> Self {
        Self { store, mapper }
    }

    /// Map `record` and upsert its parent and children, each write under `retry`.
    pub async fn apply(&self, record: &RemoteRecord, retry: &RetryExecutor) -> Result<IngestOutcome> {
        let mapped = self.mapper.map(record)?;
        let store = &*self.store;
        let mut outcome = IngestOutcome::default();

        let parent_match = &mapped.parent_match;
        let parent_fields = &mapped.parent;
        let parent = retry
            .run("upsert_parent", || async move {
                store
                    .upsert_parent(parent_match, parent_fields)
                    .await
                    .map_err(SyncError::from)
            })
            .await?;
        if parent.created {
            outcome.created_related += 1;
        }

        for child in &mapped.children {
            let fields = child.fields(parent.id, &mapped.external_id);
            let fields = &fields;
            let external_id = &child.external_id;

            let written = retry
                .run("upsert_child", || async move {
                    store
                        .upsert_child(external_id, fields)
                        .await
                        .map_err(SyncError::from)
                })
                .await?;

            if written.created {
                outcome.created_records += 1;
            } else {
                outcome.updated_records += 1;
            }
        }

        trace!(
            external_id = %record.external_id,
            parent_id = %parent.id,
            created = outcome.created_records,
            updated = outcome.updated_records,
            "applied shipment"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsync_core::{RemoteCustomer, RemotePackage, RetryPolicy};
    use shipsync_store::MemoryStore;
    use std::time::Duration;

    fn shipment(id: &str, customer_id: Option<&str>, packages: &[&str]) -> RemoteRecord {
        RemoteRecord {
            external_id: id.into(),
            customer: RemoteCustomer {
                external_id: customer_id.map(Into::into),
                name: "Bo Park".into(),
                address: "4 Elm Rd".into(),
                phone: None,
            },
            packages: packages
                .iter()
                .map(|p| RemotePackage {
                    external_id: (*p).into(),
                    tracking_number: format!("TRK-{p}"),
                    status: "in_transit".into(),
                    description: None,
                    weight_grams: None,
                })
                .collect(),
            updated_at: 0,
        }
    }

    fn retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(2, Duration::ZERO), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), RecordMapper::default());
        let record = shipment("S-1", Some("C-1"), &["P-1", "P-2"]);

        let first = ingestor.apply(&record, &retry()).await.unwrap();
        assert_eq!(
            first,
            IngestOutcome {
                created_records: 2,
                updated_records: 0,
                created_related: 1
            }
        );

        let second = ingestor.apply(&record, &retry()).await.unwrap();
        assert_eq!(second.created_records, 0);
        assert_eq!(second.created_related, 0);
        assert_eq!(second.updated_records, 2);

        assert_eq!(store.count_parents().await.unwrap(), 1);
        assert_eq!(store.count_children().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_heuristic_match_reuses_parent() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), RecordMapper::default());

        ingestor.apply(&shipment("S-1", None, &["P-1"]), &retry()).await.unwrap();
        let outcome = ingestor
            .apply(&shipment("S-2", None, &["P-2"]), &retry())
            .await
            .unwrap();

        assert_eq!(outcome.created_related, 0);
        assert_eq!(store.count_parents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), RecordMapper::default());
        store.fail_next_writes(2);

        let outcome = ingestor
            .apply(&shipment("S-1", Some("C-1"), &["P-1"]), &retry())
            .await
            .unwrap();
        assert_eq!(outcome.created_records, 1);
    }
}
