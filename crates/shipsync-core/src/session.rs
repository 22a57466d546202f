//! SyncSession: progress and outcome of one bulk import run.
//!
//! A session is owned by the manager that runs it. It moves
//! `pending -> in_progress -> completed | failed` and is immutable once
//! terminal. Counters only grow, and `processed_units <= total_units`,
//! `error_count <= processed_units` hold after every mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::{FilterKey, SessionId};

/// `last_error` of a session stopped by `cancel`.
pub const CANCELLED_REASON: &str = "cancelled";

/// `last_error` of a session found `in_progress` after a restart.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Completed and failed sessions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Result of applying one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Applied {
        created_records: u64,
        updated_records: u64,
        created_related: u64,
    },
    Failed {
        message: String,
    },
}

/// Snapshot of a bulk import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    pub filter_key: FilterKey,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub status: SessionStatus,
    pub total_units: u64,
    pub processed_units: u64,
    /// Children (packages) created.
    pub created_records: u64,
    /// Children (packages) updated in place.
    pub updated_records: u64,
    /// Parents (customers) created while resolving identities.
    pub created_related_entities: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl SyncSession {
    /// Create a pending session.
    pub fn new(id: SessionId, filter_key: FilterKey, now: i64) -> Self {
        Self {
            id,
            filter_key,
            started_at: now,
            completed_at: None,
            status: SessionStatus::Pending,
            total_units: 0,
            processed_units: 0,
            created_records: 0,
            updated_records: 0,
            created_related_entities: 0,
            error_count: 0,
            last_error: None,
        }
    }

    /// Move `pending -> in_progress`.
    pub fn begin(&mut self, now: i64) -> Result<(), CoreError> {
        if self.status != SessionStatus::Pending {
            return Err(self.transition_error(SessionStatus::InProgress));
        }
        self.status = SessionStatus::InProgress;
        self.started_at = now;
        Ok(())
    }

    /// Account for a freshly fetched page before its records are applied.
    ///
    /// Without a hint the total grows with the records seen so far; a hint
    /// smaller than reality is corrected upwards.
    pub fn observe_page(&mut self, page_len: u64, total_hint: Option<u64>) {
        let seen = self.processed_units + page_len;
        self.total_units = self.total_units.max(total_hint.unwrap_or(0)).max(seen);
    }

    /// Record the outcome of one unit of work.
    pub fn record_unit(&mut self, outcome: UnitOutcome) {
        self.processed_units += 1;
        self.total_units = self.total_units.max(self.processed_units);

        match outcome {
            UnitOutcome::Applied {
                created_records,
                updated_records,
                created_related,
            } => {
                self.created_records += created_records;
                self.updated_records += updated_records;
                self.created_related_entities += created_related;
            }
            UnitOutcome::Failed { message } => {
                self.error_count += 1;
                self.last_error = Some(message);
            }
        }
    }

    /// Finalize after the remote listing is exhausted.
    ///
    /// Completes when `error_count` stays below `error_ceiling`, otherwise
    /// fails with the last unresolved error.
    pub fn complete(&mut self, error_ceiling: u64, now: i64) -> Result<(), CoreError> {
        if self.status != SessionStatus::InProgress {
            return Err(self.transition_error(SessionStatus::Completed));
        }
        if self.error_count < error_ceiling {
            self.status = SessionStatus::Completed;
        } else {
            self.status = SessionStatus::Failed;
            if self.last_error.is_none() {
                self.last_error = Some(format!("error ceiling of {error_ceiling} reached"));
            }
        }
        self.completed_at = Some(now);
        Ok(())
    }

    /// Abort the run with a session-level reason.
    pub fn fail(&mut self, reason: impl Into<String>, now: i64) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(SessionStatus::Failed));
        }
        self.status = SessionStatus::Failed;
        self.last_error = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Whether any unit failed, regardless of the final status.
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn was_cancelled(&self) -> bool {
        self.status == SessionStatus::Failed
            && self.last_error.as_deref() == Some(CANCELLED_REASON)
    }

    /// Percentage of known units processed.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_units == 0 {
            if self.is_terminal() {
                100.0
            } else {
                0.0
            }
        } else {
            (self.processed_units as f64 / self.total_units as f64) * 100.0
        }
    }

    fn transition_error(&self, to: SessionStatus) -> CoreError {
        CoreError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> SyncSession {
        let mut session = SyncSession::new(SessionId::from_bytes([1; 16]), "k".into(), 10);
        session.begin(20).unwrap();
        session
    }

    fn applied(created: u64) -> UnitOutcome {
        UnitOutcome::Applied {
            created_records: created,
            updated_records: 0,
            created_related: 0,
        }
    }

    #[test]
    fn test_begin_only_from_pending() {
        let mut session = running();
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.started_at, 20);
        assert!(session.begin(30).is_err());
    }

    #[test]
    fn test_completes_below_error_ceiling() {
        let mut session = running();
        session.observe_page(42, Some(42));
        for i in 0..42 {
            if i % 14 == 0 {
                session.record_unit(UnitOutcome::Failed {
                    message: format!("unit {i}"),
                });
            } else {
                session.record_unit(applied(1));
            }
        }
        session.complete(10, 99).unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.processed_units, 42);
        assert_eq!(session.error_count, 3);
        assert_eq!(session.created_records, 39);
        assert!(session.has_errors());
        assert_eq!(session.completed_at, Some(99));
    }

    #[test]
    fn test_fails_at_error_ceiling_with_last_error() {
        let mut session = running();
        session.observe_page(2, None);
        session.record_unit(UnitOutcome::Failed { message: "first".into() });
        session.record_unit(UnitOutcome::Failed { message: "second".into() });
        session.complete(2, 50).unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.last_error.as_deref(), Some("second"));
    }

    #[test]
    fn test_terminal_sessions_are_immutable() {
        let mut session = running();
        session.complete(1, 5).unwrap();
        assert!(session.fail("late", 6).is_err());
        assert!(session.complete(1, 7).is_err());
        assert_eq!(session.completed_at, Some(5));
    }

    #[test]
    fn test_total_tracks_hint_and_reality() {
        let mut session = running();
        session.observe_page(10, Some(25));
        assert_eq!(session.total_units, 25);

        // Hint was low: reality wins.
        session.observe_page(30, Some(25));
        assert_eq!(session.total_units, 30);

        let mut unhinted = running();
        unhinted.observe_page(5, None);
        assert_eq!(unhinted.total_units, 5);
        for _ in 0..5 {
            unhinted.record_unit(applied(0));
        }
        unhinted.observe_page(3, None);
        assert_eq!(unhinted.total_units, 8);
    }

    #[test]
    fn test_cancelled_detection() {
        let mut session = running();
        session.fail(CANCELLED_REASON, 3).unwrap();
        assert!(session.was_cancelled());
        assert_eq!(session.progress_percentage(), 100.0);
    }

    #[test]
    fn test_status_parse() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("done".parse::<SessionStatus>().is_err());
    }
}
