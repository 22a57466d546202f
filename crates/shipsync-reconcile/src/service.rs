//! The reconciliation service.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use shipsync_core::{
    now_millis, ChildRecord, IssueKind, ParentFields, ParentRecord, ReconciliationIssue,
    ReconciliationReport, RecordId, Resolution, MONITORING_TARGET,
};
use shipsync_store::{DuplicateGroup, RecordRepository};

use crate::error::{ReconcileError, Result};

/// Name given to synthesized parents.
const PLACEHOLDER_NAME: &str = "Unknown customer";

/// Scans local records for broken invariants and repairs or flags them.
pub struct ReconciliationService<S: ?Sized> {
    store: Arc<S>,
    /// Serializes runs so two audits never repair the same orphan.
    run_lock: Mutex<()>,
}

impl<S: RecordRepository + ?Sized> ReconciliationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            run_lock: Mutex::new(()),
        }
    }

    /// Run both checks, repairing what policy allows.
    pub async fn audit_and_repair(&self) -> ReconciliationReport {
        let _guard = self.run_lock.lock().await;
        let mut report = ReconciliationReport::default();

        if let Err(e) = self.check_orphans(&mut report).await {
            error!(target: MONITORING_TARGET, error = %e, "orphan check failed");
            report.check_errors.push(format!("orphan check: {e}"));
        }
        if let Err(e) = self.check_duplicates(&mut report).await {
            error!(target: MONITORING_TARGET, error = %e, "duplicate check failed");
            report.check_errors.push(format!("duplicate check: {e}"));
        }

        info!(
            issues = report.issues.len(),
            fixed = report.fixed_count,
            orphans = report.count(IssueKind::OrphanedChild),
            duplicates = report.count(IssueKind::DuplicateIdentity),
            check_errors = report.check_errors.len(),
            "reconciliation finished"
        );
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orphans
    // ─────────────────────────────────────────────────────────────────────────

    async fn check_orphans(&self, report: &mut ReconciliationReport) -> Result<()> {
        let orphans = self.store.find_orphans().await?;

        let mut by_parent: BTreeMap<RecordId, Vec<ChildRecord>> = BTreeMap::new();
        for child in orphans {
            by_parent.entry(child.fields.parent_id).or_default().push(child);
        }

        for (parent_id, children) in by_parent {
            let mut affected_ids: Vec<RecordId> = children.iter().map(|c| c.id).collect();
            affected_ids.push(parent_id);
            let detected_at = now_millis();

            let issue = match self.materialize_parent(parent_id).await {
                Ok(placeholder) => {
                    info!(
                        parent_id = %parent_id,
                        children = children.len(),
                        placeholder,
                        "repaired orphaned children"
                    );
                    ReconciliationIssue {
                        kind: IssueKind::OrphanedChild,
                        affected_ids,
                        detected_at,
                        resolution: Resolution::AutoRepaired,
                        low_confidence: placeholder,
                        detail: if placeholder {
                            format!("synthesized placeholder parent {parent_id}")
                        } else {
                            format!("restored parent {parent_id} from profile")
                        },
                    }
                }
                Err(ReconcileError::IdTaken(_)) => {
                    warn!(parent_id = %parent_id, "orphan parent id is taken, flagging");
                    ReconciliationIssue {
                        kind: IssueKind::OrphanedChild,
                        affected_ids,
                        detected_at,
                        resolution: Resolution::Flagged,
                        low_confidence: false,
                        detail: format!("parent id {parent_id} is used by another record"),
                    }
                }
                Err(e) => return Err(e),
            };
            report.push(issue);
        }

        Ok(())
    }

    /// Insert a parent under `parent_id`. Returns whether it is a placeholder.
    async fn materialize_parent(&self, parent_id: RecordId) -> Result<bool> {
        let profile = self.store.find_profile(parent_id).await?;
        let placeholder = profile.is_none();
        let fields = match profile {
            Some(profile) => profile.to_parent_fields(),
            None => ParentFields {
                name: format!("{PLACEHOLDER_NAME} #{parent_id}"),
                address: String::new(),
                phone: None,
            },
        };

        let now = now_millis();
        let inserted = self
            .store
            .insert_parent(&ParentRecord {
                id: parent_id,
                external_id: None,
                identity_key: None,
                fields,
                placeholder,
                created_at: now,
                updated_at: now,
            })
            .await?;

        if !inserted {
            return Err(ReconcileError::IdTaken(parent_id));
        }
        Ok(placeholder)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Duplicates
    // ─────────────────────────────────────────────────────────────────────────

    async fn check_duplicates(&self, report: &mut ReconciliationReport) -> Result<()> {
        let groups = self.store.find_duplicate_identities().await?;

        for DuplicateGroup { identity, parent_ids } in groups {
            warn!(identity = %identity, parents = ?parent_ids, "duplicate parents flagged");
            report.push(ReconciliationIssue {
                kind: IssueKind::DuplicateIdentity,
                low_confidence: identity.starts_with("key:"),
                affected_ids: parent_ids,
                detected_at: now_millis(),
                resolution: Resolution::Flagged,
                detail: identity,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipsync_core::{ChildFields, ExternalId, ParentMatch, ProfileRecord, UpsertOutcome};
    use shipsync_store::{MemoryStore, SqliteStore};

    fn child(parent_id: RecordId, n: u32) -> (ExternalId, ChildFields) {
        (
            format!("P-{n}").into(),
            ChildFields {
                parent_id,
                shipment_id: format!("S-{n}").into(),
                tracking_number: format!("TRK-{n}"),
                status: "in_transit".into(),
                description: None,
                weight_grams: None,
            },
        )
    }

    async fn add_child(store: &MemoryStore, parent_id: RecordId, n: u32) -> UpsertOutcome {
        let (ext, fields) = child(parent_id, n);
        store.upsert_child(&ext, &fields).await.unwrap()
    }

    #[tokio::test]
    async fn test_clean_store_reports_nothing() {
        let store = Arc::new(MemoryStore::new());
        let parent = store
            .upsert_parent(
                &ParentMatch {
                    external_id: Some("C-1".into()),
                    identity_key: None,
                },
                &ParentFields {
                    name: "Kim".into(),
                    address: "8 Bay Rd".into(),
                    phone: None,
                },
            )
            .await
            .unwrap();
        add_child(&store, parent.id, 1).await;

        let report = ReconciliationService::new(store).audit_and_repair().await;
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_orphan_restored_from_profile() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_profile(&ProfileRecord {
                id: RecordId(500),
                name: "Lou".into(),
                address: Some("2 Hill St".into()),
                phone: None,
            })
            .await
            .unwrap();
        let first = add_child(&store, RecordId(500), 1).await;
        let second = add_child(&store, RecordId(500), 2).await;

        let service = ReconciliationService::new(Arc::clone(&store));
        let report = service.audit_and_repair().await;

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.fixed_count, 1);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::OrphanedChild);
        assert!(!issue.low_confidence);
        assert_eq!(issue.affected_ids, vec![first.id, second.id, RecordId(500)]);

        let parent = store.get_parent(RecordId(500)).await.unwrap().unwrap();
        assert_eq!(parent.fields.name, "Lou");
        assert!(!parent.placeholder);
    }

    #[tokio::test]
    async fn test_orphan_without_profile_gets_placeholder() {
        let store = Arc::new(MemoryStore::new());
        add_child(&store, RecordId(700), 1).await;

        let service = ReconciliationService::new(Arc::clone(&store));
        let report = service.audit_and_repair().await;

        assert_eq!(report.fixed_count, 1);
        assert!(report.issues[0].low_confidence);
        let parent = store.get_parent(RecordId(700)).await.unwrap().unwrap();
        assert!(parent.placeholder);

        // Converges.
        assert!(service.audit_and_repair().await.is_clean());
    }

    #[tokio::test]
    async fn test_duplicates_are_flagged_not_merged() {
        let store = Arc::new(MemoryStore::new());
        let now = now_millis();
        for id in [10, 11] {
            store
                .insert_parent(&ParentRecord {
                    id: RecordId(id),
                    external_id: Some("C-9".into()),
                    identity_key: None,
                    fields: ParentFields {
                        name: "Twin".into(),
                        address: String::new(),
                        phone: None,
                    },
                    placeholder: false,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        let service = ReconciliationService::new(Arc::clone(&store));
        let report = service.audit_and_repair().await;

        assert_eq!(report.count(IssueKind::DuplicateIdentity), 1);
        assert_eq!(report.fixed_count, 0);
        assert_eq!(report.flagged().count(), 1);
        assert_eq!(store.count_parents().await.unwrap(), 2);

        // Still flagged on the next run.
        assert_eq!(service.audit_and_repair().await.flagged().count(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_orphan_repair_converges() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let mut parents = Vec::new();
        for (n, customer) in ["C-A", "C-B"].into_iter().enumerate() {
            let parent = store
                .upsert_parent(
                    &ParentMatch {
                        external_id: Some(customer.into()),
                        identity_key: None,
                    },
                    &ParentFields {
                        name: customer.into(),
                        address: "1 Wharf Rd".into(),
                        phone: None,
                    },
                )
                .await
                .unwrap();
            let (ext, fields) = child(parent.id, n as u32);
            store.upsert_child(&ext, &fields).await.unwrap();
            parents.push(parent.id);
        }
        assert!(store.delete_parent(parents[1]).await.unwrap());

        let service = ReconciliationService::new(Arc::clone(&store));
        let report = service.audit_and_repair().await;
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.fixed_count, 1);
        assert!(report.issues[0].is_repaired());

        assert!(store.find_orphans().await.unwrap().is_empty());
        assert!(service.audit_and_repair().await.is_clean());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_repair_converges(dangling in prop::collection::vec(10_000i64..10_040, 1..20)) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                runtime.block_on(async {
                    let store = Arc::new(MemoryStore::new());
                    for (n, parent) in dangling.iter().enumerate() {
                        add_child(&store, RecordId(*parent), n as u32).await;
                    }
                    let service = ReconciliationService::new(Arc::clone(&store));

                    let mut parents = dangling.clone();
                    parents.sort_unstable();
                    parents.dedup();
                    let report = service.audit_and_repair().await;
                    assert_eq!(report.fixed_count, parents.len());
                    assert!(report.check_errors.is_empty());

                    assert!(store.find_orphans().await.unwrap().is_empty());
                    assert!(service.audit_and_repair().await.is_clean());
                });
            }
        }
    }
}
