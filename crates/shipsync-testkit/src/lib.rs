//! # Shipsync Testkit
//!
//! Testing utilities for the shipsync engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: shipment factories and a seeded memory store/source pair
//! - **Datasets**: hand-written shipments in the remote JSON shape
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust
//! use shipsync_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new(10);
//! fixture.seed(42, &[3, 17, 40]);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use shipsync_testkit::generators::dataset;
//!
//! proptest! {
//!     #[test]
//!     fn rerun_creates_nothing(records in dataset(20)) {
//!         // seed a source with `records`, run twice, compare counters
//!     }
//! }
//! ```

pub mod datasets;
pub mod fixtures;
pub mod generators;

pub use datasets::{sample_shipments, shipments_from_json, SAMPLE_SHIPMENTS_JSON};
pub use fixtures::{fast_session_config, ShipmentFactory, TestFixture};
