//! `bookstock-fulfillment` — the persisted outcome of satisfying a demand.
//!
//! A [`FulfillmentRecord`] carries the structured per-line breakdown
//! (requested, achieved, returned) and an append-only returns log; its status
//! is always derivable from the lines and never stored divergently. The
//! owning [`Bundle`] aggregate tracks the combined state of its issues.

pub mod bundle;
pub mod record;

pub use bundle::{Bundle, BundleStatus};
pub use record::{DemandLine, FulfillmentLine, FulfillmentRecord, FulfillmentStatus, ReturnRecord};
