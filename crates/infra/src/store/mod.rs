//! Transactional storage contract for batches, ledger entries, fulfillment
//! records and bundles.
//!
//! One [`StockTx`] spans exactly one mutating workflow call. Every read that
//! feeds a decision happens through the same transaction as the writes it
//! leads to, so a concurrent workflow can never spend the same units
//! (`lock_*` methods acquire the pessimistic locks). Dropping a transaction
//! without [`StockTx::commit`] discards all staged writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use bookstock_core::{BatchId, BundleId, FulfillmentId, TitleId};
use bookstock_fulfillment::{Bundle, FulfillmentRecord};
use bookstock_ledger::{Batch, ConsumerRef, LedgerEntry};

/// Infrastructure-level storage failure. Domain failures never appear here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("stored record failed to decode: {0}")]
    Decode(String),
}

/// Handle to a storage backend; one [`StockTx`] per workflow call.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StockTx>, StoreError>;
}

/// One storage transaction.
///
/// All entry queries return entries in ledger append order (oldest first);
/// reversal workflows walk them backwards for LIFO semantics. Batch queries
/// return batches in age order (ascending `sequence`).
#[async_trait]
pub trait StockTx: Send {
    // titles
    async fn title_exists(&mut self, title: TitleId) -> Result<bool, StoreError>;
    async fn upsert_title(&mut self, title: TitleId, name: &str) -> Result<(), StoreError>;

    // batches
    /// Next value of the store-wide receipt ordinal that defines FIFO age.
    async fn next_batch_sequence(&mut self) -> Result<i64, StoreError>;
    async fn insert_batch(&mut self, batch: &Batch) -> Result<(), StoreError>;
    /// Lock and read the title's batches that still hold stock, oldest first.
    async fn lock_title_batches(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError>;
    /// Lock and read specific batches (reversal credits).
    async fn lock_batches(&mut self, ids: &[BatchId]) -> Result<Vec<Batch>, StoreError>;
    /// Plain read of all batches of a title, empty ones included.
    async fn batches_for_title(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError>;
    async fn set_batch_available(&mut self, id: BatchId, available: i64)
        -> Result<(), StoreError>;

    // ledger
    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;
    /// Every entry booked against the fulfillment: withdrawals, returns and
    /// cancel compensations.
    async fn entries_for_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
    async fn entries_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
    async fn entries_for_title(&mut self, title: TitleId) -> Result<Vec<LedgerEntry>, StoreError>;

    // fulfillment records
    async fn insert_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError>;
    /// Lock and read one record; serializes concurrent return/cancel attempts.
    async fn lock_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Option<FulfillmentRecord>, StoreError>;
    async fn update_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError>;
    async fn fulfillments_for_bundle(
        &mut self,
        bundle: BundleId,
    ) -> Result<Vec<FulfillmentRecord>, StoreError>;
    async fn fulfillments_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<FulfillmentRecord>, StoreError>;

    // bundles
    async fn bundle(&mut self, id: BundleId) -> Result<Option<Bundle>, StoreError>;
    async fn upsert_bundle(&mut self, bundle: &Bundle) -> Result<(), StoreError>;

    /// Make all staged writes durable and release the locks.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

pub use memory::MemoryStockStore;
pub use postgres::PostgresStockStore;
