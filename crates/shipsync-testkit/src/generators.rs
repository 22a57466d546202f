//! Proptest generators for property-based testing.

use proptest::prelude::*;

use shipsync_core::{FilterKey, RemoteCustomer, RemotePackage, RemoteRecord, StatusValue};

/// Generate a package status.
pub fn status_value() -> impl Strategy<Value = StatusValue> {
    prop_oneof![
        Just("pending"),
        Just("in_transit"),
        Just("out_for_delivery"),
        Just("delivered"),
        Just("returned"),
        Just("exception"),
    ]
    .prop_map(StatusValue::from)
}

/// Generate a filter key.
pub fn filter_key() -> impl Strategy<Value = FilterKey> {
    "[a-z]{2,8}-[0-9]{1,3}".prop_map(FilterKey::from)
}

/// Generate a customer that maps cleanly.
pub fn remote_customer() -> impl Strategy<Value = RemoteCustomer> {
    (
        proptest::option::of("C-[0-9]{1,4}"),
        "[A-Z][a-z]{1,10} [A-Z][a-z]{1,10}",
        "[0-9]{1,4} [A-Z][a-z]{2,10} (St|Rd|Ave)",
        proptest::option::of("555-[0-9]{4}"),
    )
        .prop_map(|(external_id, name, address, phone)| RemoteCustomer {
            external_id: external_id.map(Into::into),
            name,
            address,
            phone,
        })
}

/// Generate a valid package whose id is unique within shipment `shipment`.
pub fn remote_package(shipment: usize, index: usize) -> impl Strategy<Value = RemotePackage> {
    (
        "[0-9A-Z]{6,12}",
        status_value(),
        proptest::option::of("[a-z ]{1,20}"),
        proptest::option::of(1u32..50_000),
    )
        .prop_map(move |(tracking_number, status, description, weight_grams)| RemotePackage {
            external_id: format!("P-{shipment}-{index}").into(),
            tracking_number,
            status,
            description,
            weight_grams,
        })
}

/// Generate a valid shipment with external id `S-<shipment>`.
pub fn remote_record(shipment: usize) -> impl Strategy<Value = RemoteRecord> {
    (
        remote_customer(),
        (1usize..=3).prop_flat_map(move |count| {
            (0..count)
                .map(|index| remote_package(shipment, index))
                .collect::<Vec<_>>()
        }),
        0i64..=i64::MAX / 2,
    )
        .prop_map(move |(customer, packages, updated_at)| RemoteRecord {
            external_id: format!("S-{shipment}").into(),
            customer,
            packages,
            updated_at,
        })
}

/// Generate a dataset of `1..=max` shipments with distinct ids.
pub fn dataset(max: usize) -> impl Strategy<Value = Vec<RemoteRecord>> {
    (1..=max.max(1)).prop_flat_map(|count| (0..count).map(remote_record).collect::<Vec<_>>())
}

/// Generate a chronologically ordered schedule of `(offset_ms, success)`
/// attempts for rate-limit properties.
pub fn attempt_schedule(max_len: usize) -> impl Strategy<Value = Vec<(i64, bool)>> {
    prop::collection::vec((0i64..120_000, any::<bool>()), 0..=max_len).prop_map(|steps| {
        let mut at = 0;
        steps
            .into_iter()
            .map(|(gap, success)| {
                at += gap;
                (at, success)
            })
            .collect()
    })
}
