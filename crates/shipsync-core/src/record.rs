//! Record shapes: what the external system sends and what is kept locally.
//!
//! A remote shipment maps 1:N into one local parent (the customer) and one
//! child per package. Children are keyed by their external id; parents are
//! resolved by external id first and an identity key second.

use serde::{Deserialize, Serialize};

use crate::types::{ExternalId, RecordId, StatusValue};

/// Customer block of a remote shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCustomer {
    pub external_id: Option<ExternalId>,
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
}

/// One package inside a remote shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePackage {
    pub external_id: ExternalId,
    pub tracking_number: String,
    pub status: StatusValue,
    pub description: Option<String>,
    pub weight_grams: Option<u32>,
}

/// A shipment as listed or fetched from the external system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub external_id: ExternalId,
    pub customer: RemoteCustomer,
    pub packages: Vec<RemotePackage>,
    /// Remote modification time (Unix ms).
    pub updated_at: i64,
}

impl RemoteRecord {
    /// Whether the shipment carries `package_id`.
    pub fn contains_package(&self, package_id: &ExternalId) -> bool {
        self.packages.iter().any(|p| &p.external_id == package_id)
    }
}

/// How an incoming parent is matched against existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentMatch {
    /// Exact match on the external system's customer id.
    pub external_id: Option<ExternalId>,
    /// Fallback heuristic key, see the sync crate's matchers.
    pub identity_key: Option<String>,
}

/// Writable fields of a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentFields {
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
}

/// Writable fields of a child. `parent_id` must reference a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildFields {
    pub parent_id: RecordId,
    pub shipment_id: ExternalId,
    pub tracking_number: String,
    pub status: StatusValue,
    pub description: Option<String>,
    pub weight_grams: Option<u32>,
}

/// A stored parent (customer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub id: RecordId,
    pub external_id: Option<ExternalId>,
    pub identity_key: Option<String>,
    pub fields: ParentFields,
    /// Synthesized by reconciliation without a trustworthy source.
    pub placeholder: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored child (package).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub id: RecordId,
    pub external_id: ExternalId,
    pub fields: ChildFields,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A profile-like record (e.g. a customer account) that shares its id
/// space with parents and can stand in for a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: RecordId,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

impl ProfileRecord {
    /// Parent fields derived from this profile.
    pub fn to_parent_fields(&self) -> ParentFields {
        ParentFields {
            name: self.name.clone(),
            address: self.address.clone().unwrap_or_default(),
            phone: self.phone.clone(),
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: RecordId,
    pub created: bool,
}

impl UpsertOutcome {
    pub fn created(id: RecordId) -> Self {
        Self { id, created: true }
    }

    pub fn updated(id: RecordId) -> Self {
        Self { id, created: false }
    }
}
