//! Sample datasets in the remote system's JSON shape.
//!
//! Used to check mapping and reconciliation against hand-written data with
//! known quirks rather than generated shipments.

use shipsync_core::RemoteRecord;

/// Three shipments for two customers. The second and third shipment belong to
/// the same customer without an external id, spelled differently, so they
/// must resolve to one parent through the name+address matcher.
pub const SAMPLE_SHIPMENTS_JSON: &str = r#"[
  {
    "external_id": "S-1001",
    "customer": { "external_id": "C-17", "name": "Ada Quinn", "address": "12 Canal St", "phone": "555-0101" },
    "packages": [
      { "external_id": "P-1001-1", "tracking_number": "1Z001", "status": "in_transit", "description": "books", "weight_grams": 1200 },
      { "external_id": "P-1001-2", "tracking_number": "1Z002", "status": "delivered", "description": null, "weight_grams": null }
    ],
    "updated_at": 1700000000000
  },
  {
    "external_id": "S-1002",
    "customer": { "external_id": null, "name": "Ben Ortiz", "address": "4 Mill Lane", "phone": null },
    "packages": [
      { "external_id": "P-1002-1", "tracking_number": "1Z003", "status": "in_transit", "description": "lamp", "weight_grams": 3100 }
    ],
    "updated_at": 1700000100000
  },
  {
    "external_id": "S-1003",
    "customer": { "external_id": null, "name": "BEN  ORTIZ", "address": "4, Mill Lane.", "phone": null },
    "packages": [
      { "external_id": "P-1003-1", "tracking_number": "1Z004", "status": "exception", "description": null, "weight_grams": 800 }
    ],
    "updated_at": 1700000200000
  }
]"#;

/// Parse a JSON array of remote shipments.
pub fn shipments_from_json(json: &str) -> serde_json::Result<Vec<RemoteRecord>> {
    serde_json::from_str(json)
}

/// The parsed [`SAMPLE_SHIPMENTS_JSON`].
pub fn sample_shipments() -> Vec<RemoteRecord> {
    shipments_from_json(SAMPLE_SHIPMENTS_JSON).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_parses() {
        let shipments = shipments_from_json(SAMPLE_SHIPMENTS_JSON).unwrap();
        assert_eq!(shipments.len(), 3);
        assert_eq!(shipments[0].packages.len(), 2);
        assert!(shipments[1].customer.external_id.is_none());
    }
}
