//! `bookstock-infra` — storage backends and the stock workflows.
//!
//! The [`store`] module defines the transactional storage contract with an
//! in-memory backend (tests/dev) and a Postgres backend (production). The
//! [`engine`] module orchestrates the mutating workflows — receiving,
//! reservation, fulfillment and its reversals — each inside one store
//! transaction. [`projections`] holds the lock-free read side.

pub mod engine;
pub mod projections;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use engine::{EngineError, StockEngine};
pub use projections::{BatchDrift, TitleAvailability};
pub use store::{MemoryStockStore, PostgresStockStore, StockStore, StockTx, StoreError};
