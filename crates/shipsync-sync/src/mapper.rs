//! Mapping remote shipments onto local parent/child records.
//!
//! A shipment maps to one parent (its customer) and one child per package.
//! Parent identity is resolved by the customer's external id when the remote
//! provides one, and otherwise by a heuristic identity key produced by a
//! pluggable [`ParentMatcher`].

use std::sync::Arc;

use shipsync_core::{
    ChildFields, ExternalId, ParentFields, ParentMatch, RecordId, RemoteCustomer, RemoteRecord,
    StatusValue,
};

use crate::error::{Result, SyncError};

/// Produces the fallback identity key for a remote customer.
///
/// Two customers with the same key are treated as the same parent when no
/// external id settles the question.
pub trait ParentMatcher: Send + Sync {
    fn identity_key(&self, customer: &RemoteCustomer) -> Option<String>;
}

/// Matches customers on normalized name and address.
///
/// Case, punctuation and runs of whitespace are ignored; the normalized pair
/// is fingerprinted with BLAKE3 so keys have a fixed width.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameAddressMatcher;

impl NameAddressMatcher {
    fn normalize(value: &str) -> String {
        value
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ParentMatcher for NameAddressMatcher {
    fn identity_key(&self, customer: &RemoteCustomer) -> Option<String> {
        let name = Self::normalize(&customer.name);
        if name.is_empty() {
            return None;
        }
        let address = Self::normalize(&customer.address);

        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        hasher.update(address.as_bytes());
        Some(hasher.finalize().to_hex().to_string())
    }
}

/// A package ready to be written as a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedChild {
    pub external_id: ExternalId,
    pub tracking_number: String,
    pub status: StatusValue,
    pub description: Option<String>,
    pub weight_grams: Option<u32>,
}

impl MappedChild {
    /// Child fields once the parent id is known.
    pub fn fields(&self, parent_id: RecordId, shipment_id: &ExternalId) -> ChildFields {
        ChildFields {
            parent_id,
            shipment_id: shipment_id.clone(),
            tracking_number: self.tracking_number.clone(),
            status: self.status.clone(),
            description: self.description.clone(),
            weight_grams: self.weight_grams,
        }
    }
}

/// A shipment ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedShipment {
    pub external_id: ExternalId,
    pub parent_match: ParentMatch,
    pub parent: ParentFields,
    pub children: Vec<MappedChild>,
}

/// Maps remote shipments, validating what the local schema requires.
#[derive(Clone)]
pub struct RecordMapper {
    matcher: Arc<dyn ParentMatcher>,
}

impl RecordMapper {
    pub fn new(matcher: Arc<dyn ParentMatcher>) -> Self {
        Self { matcher }
    }

    pub fn map(&self, record: &RemoteRecord) -> Result<MappedShipment> {
        let customer = &record.customer;
        let name = customer.name.trim();
        if name.is_empty() {
            return Err(SyncError::mapping(&record.external_id, "customer name is missing"));
        }
        if record.packages.is_empty() {
            return Err(SyncError::mapping(&record.external_id, "shipment has no packages"));
        }

        let children = record
            .packages
            .iter()
            .enumerate()
            .map(|(idx, package)| {
                if package.external_id.as_str().trim().is_empty() {
                    return Err(SyncError::mapping(
                        &record.external_id,
                        format!("package #{idx} has no external id"),
                    ));
                }
                if package.tracking_number.trim().is_empty() {
                    return Err(SyncError::mapping(
                        &record.external_id,
                        format!("package {} has no tracking number", package.external_id),
                    ));
                }
                Ok(MappedChild {
                    external_id: package.external_id.clone(),
                    tracking_number: package.tracking_number.trim().to_string(),
                    status: package.status.clone(),
                    description: package.description.clone(),
                    weight_grams: package.weight_grams,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MappedShipment {
            external_id: record.external_id.clone(),
            parent_match: ParentMatch {
                external_id: customer
                    .external_id
                    .clone()
                    .filter(|id| !id.as_str().trim().is_empty()),
                identity_key: self.matcher.identity_key(customer),
            },
            parent: ParentFields {
                name: name.to_string(),
                address: customer.address.trim().to_string(),
                phone: customer.phone.clone(),
            },
            children,
        })
    }
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self::new(Arc::new(NameAddressMatcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shipsync_core::RemotePackage;

    fn customer(name: &str, address: &str) -> RemoteCustomer {
        RemoteCustomer {
            external_id: None,
            name: name.into(),
            address: address.into(),
            phone: None,
        }
    }

    fn package(id: &str, tracking: &str) -> RemotePackage {
        RemotePackage {
            external_id: id.into(),
            tracking_number: tracking.into(),
            status: "in_transit".into(),
            description: None,
            weight_grams: Some(500),
        }
    }

    fn shipment(packages: Vec<RemotePackage>) -> RemoteRecord {
        RemoteRecord {
            external_id: "S-1".into(),
            customer: customer("Ann Lee", "1 Main St."),
            packages,
            updated_at: 0,
        }
    }

    #[test]
    fn test_map_one_to_many() {
        let mapper = RecordMapper::default();
        let mapped = mapper
            .map(&shipment(vec![package("P-1", "T1"), package("P-2", "T2")]))
            .unwrap();

        assert_eq!(mapped.children.len(), 2);
        assert_eq!(mapped.parent.name, "Ann Lee");
        assert!(mapped.parent_match.external_id.is_none());
        assert!(mapped.parent_match.identity_key.is_some());

        let fields = mapped.children[1].fields(RecordId(9), &mapped.external_id);
        assert_eq!(fields.parent_id, RecordId(9));
        assert_eq!(fields.shipment_id, ExternalId::from("S-1"));
    }

    #[test]
    fn test_map_rejects_incomplete_records() {
        let mapper = RecordMapper::default();

        assert!(matches!(
            mapper.map(&shipment(vec![])),
            Err(SyncError::Mapping { .. })
        ));
        assert!(mapper.map(&shipment(vec![package("", "T1")])).is_err());
        assert!(mapper.map(&shipment(vec![package("P-1", " ")])).is_err());

        let mut nameless = shipment(vec![package("P-1", "T1")]);
        nameless.customer.name = "  ".into();
        assert!(mapper.map(&nameless).is_err());
    }

    #[test]
    fn test_identity_key_ignores_formatting() {
        let matcher = NameAddressMatcher;
        let a = matcher.identity_key(&customer("Ann  LEE", "1 Main St."));
        let b = matcher.identity_key(&customer("ann lee", "1, main st"));
        let c = matcher.identity_key(&customer("Ann Lee", "2 Main St"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(matcher.identity_key(&customer("--", "1 Main St")).is_none());
    }

    proptest! {
        #[test]
        fn prop_identity_key_is_case_insensitive(name in "[a-zA-Z]{1,12}( [a-zA-Z]{1,12})?", address in "[a-zA-Z0-9 ]{0,24}") {
            let matcher = NameAddressMatcher;
            let lower = matcher.identity_key(&customer(&name.to_lowercase(), &address));
            let upper = matcher.identity_key(&customer(&name.to_uppercase(), &address.to_uppercase()));
            prop_assert_eq!(lower, upper);
        }
    }
}
