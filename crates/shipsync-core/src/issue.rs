//! Reconciliation issues: broken invariants found by an audit pass.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A child whose parent reference resolves to nothing.
    OrphanedChild,
    /// Several parents collapsing to the same identity.
    DuplicateIdentity,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::OrphanedChild => f.write_str("orphaned_child"),
            IssueKind::DuplicateIdentity => f.write_str("duplicate_identity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AutoRepaired,
    Flagged,
}

/// One finding of an audit run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationIssue {
    pub kind: IssueKind,
    pub affected_ids: Vec<RecordId>,
    pub detected_at: i64,
    pub resolution: Resolution,
    /// Set when the repair synthesized data rather than copying it.
    pub low_confidence: bool,
    pub detail: String,
}

impl ReconciliationIssue {
    pub fn is_repaired(&self) -> bool {
        self.resolution == Resolution::AutoRepaired
    }
}

/// Outcome of `audit_and_repair`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub issues: Vec<ReconciliationIssue>,
    pub fixed_count: usize,
    /// Checks that could not run, with the reason. The other check's
    /// findings are still reported.
    pub check_errors: Vec<String>,
}

impl ReconciliationReport {
    pub fn push(&mut self, issue: ReconciliationIssue) {
        if issue.is_repaired() {
            self.fixed_count += 1;
        }
        self.issues.push(issue);
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.check_errors.is_empty()
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn flagged(&self) -> impl Iterator<Item = &ReconciliationIssue> {
        self.issues
            .iter()
            .filter(|i| i.resolution == Resolution::Flagged)
    }
}
