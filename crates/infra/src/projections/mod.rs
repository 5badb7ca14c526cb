//! Read-only projections over the batch store and the ledger.
//!
//! Nothing here takes a lock or writes; every figure is recomputed from the
//! ledger and the batch counters on each call, so correctness rests entirely
//! on the write-side invariants holding.

mod availability;

pub use availability::{BatchDrift, TitleAvailability};
