use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bookstock_core::{BatchId, BundleId, FulfillmentId, TitleId};
use bookstock_fulfillment::{Bundle, FulfillmentRecord};
use bookstock_ledger::{Batch, ConsumerRef, LedgerEntry};

use super::{StockStore, StockTx, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    titles: HashMap<TitleId, String>,
    batches: HashMap<BatchId, Batch>,
    entries: Vec<LedgerEntry>,
    fulfillments: HashMap<FulfillmentId, FulfillmentRecord>,
    bundles: HashMap<BundleId, Bundle>,
    next_sequence: i64,
}

/// In-memory store for tests and development.
///
/// A transaction takes the store-wide async mutex and works on a staged copy
/// of the state; commit swaps the copy in, drop discards it. The single mutex
/// is the coarse equivalent of the row locks the SQL backend takes: at most
/// one transaction is in flight, so the read-then-decide step of an
/// allocation can never race another one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStockStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockStore for MemoryStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTx {
    fn sorted_by_age(mut batches: Vec<Batch>) -> Vec<Batch> {
        batches.sort_by_key(|b| (b.sequence(), b.id()));
        batches
    }

    fn sorted_records(mut records: Vec<FulfillmentRecord>) -> Vec<FulfillmentRecord> {
        records.sort_by_key(|r| (r.created_at(), r.id()));
        records
    }
}

#[async_trait]
impl StockTx for MemoryTx {
    async fn title_exists(&mut self, title: TitleId) -> Result<bool, StoreError> {
        Ok(self.working.titles.contains_key(&title))
    }

    async fn upsert_title(&mut self, title: TitleId, name: &str) -> Result<(), StoreError> {
        self.working.titles.insert(title, name.to_string());
        Ok(())
    }

    async fn next_batch_sequence(&mut self) -> Result<i64, StoreError> {
        self.working.next_sequence += 1;
        Ok(self.working.next_sequence)
    }

    async fn insert_batch(&mut self, batch: &Batch) -> Result<(), StoreError> {
        self.working.batches.insert(batch.id(), batch.clone());
        Ok(())
    }

    async fn lock_title_batches(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError> {
        Ok(Self::sorted_by_age(
            self.working
                .batches
                .values()
                .filter(|b| b.title_id() == title && b.available() > 0)
                .cloned()
                .collect(),
        ))
    }

    async fn lock_batches(&mut self, ids: &[BatchId]) -> Result<Vec<Batch>, StoreError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let batch = self
                .working
                .batches
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::Backend(format!("batch {id} does not exist")))?;
            found.push(batch);
        }
        Ok(Self::sorted_by_age(found))
    }

    async fn batches_for_title(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError> {
        Ok(Self::sorted_by_age(
            self.working
                .batches
                .values()
                .filter(|b| b.title_id() == title)
                .cloned()
                .collect(),
        ))
    }

    async fn set_batch_available(
        &mut self,
        id: BatchId,
        available: i64,
    ) -> Result<(), StoreError> {
        let current = self
            .working
            .batches
            .get(&id)
            .ok_or_else(|| StoreError::Backend(format!("batch {id} does not exist")))?;
        let updated = Batch::from_parts(
            current.id(),
            current.title_id(),
            current.sequence(),
            available,
            current.received_at(),
        )
        .map_err(|e| StoreError::Decode(e.to_string()))?;
        self.working.batches.insert(id, updated);
        Ok(())
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.working.entries.push(entry.clone());
        Ok(())
    }

    async fn entries_for_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|e| {
                matches!(
                    e.consumer(),
                    ConsumerRef::Fulfillment(f)
                        | ConsumerRef::FulfillmentReturn(f)
                        | ConsumerRef::FulfillmentCancel(f)
                        if *f == id
                )
            })
            .cloned()
            .collect())
    }

    async fn entries_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|e| e.consumer() == consumer)
            .cloned()
            .collect())
    }

    async fn entries_for_title(&mut self, title: TitleId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|e| e.title_id() == title)
            .cloned()
            .collect())
    }

    async fn insert_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError> {
        self.working.fulfillments.insert(record.id(), record.clone());
        Ok(())
    }

    async fn lock_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Option<FulfillmentRecord>, StoreError> {
        Ok(self.working.fulfillments.get(&id).cloned())
    }

    async fn update_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError> {
        if !self.working.fulfillments.contains_key(&record.id()) {
            return Err(StoreError::Backend(format!(
                "fulfillment {} does not exist",
                record.id()
            )));
        }
        self.working.fulfillments.insert(record.id(), record.clone());
        Ok(())
    }

    async fn fulfillments_for_bundle(
        &mut self,
        bundle: BundleId,
    ) -> Result<Vec<FulfillmentRecord>, StoreError> {
        self.fulfillments_for_consumer(&ConsumerRef::Bundle(bundle))
            .await
    }

    async fn fulfillments_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<FulfillmentRecord>, StoreError> {
        Ok(Self::sorted_records(
            self.working
                .fulfillments
                .values()
                .filter(|r| r.consumer() == consumer)
                .cloned()
                .collect(),
        ))
    }

    async fn bundle(&mut self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        Ok(self.working.bundles.get(&id).copied())
    }

    async fn upsert_bundle(&mut self, bundle: &Bundle) -> Result<(), StoreError> {
        self.working.bundles.insert(bundle.id, *bundle);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
