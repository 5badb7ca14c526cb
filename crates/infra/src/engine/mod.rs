//! Stock workflows.
//!
//! [`StockEngine`] orchestrates every mutating operation: each call opens one
//! store transaction, performs all validation reads under it, stages the
//! writes, and commits — or bails, discarding everything. The capability
//! check runs once per call, before any write.

mod error;
mod fulfill;
mod reversal;

use chrono::Utc;
use tracing::{info, instrument};

use bookstock_auth::{authorize_consumer, authorize_intake, Actor};
use bookstock_core::{BatchId, EntryId, SchoolId, SupplierId, TitleId};
use bookstock_ledger::{sums, Batch, ConsumerRef, EntryKind, LedgerEntry};

use crate::store::{StockStore, StockTx};

pub use error::EngineError;

/// The inventory ledger and allocation engine over a storage backend.
pub struct StockEngine<S> {
    store: S,
}

impl<S> StockEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Resolve the school a consumer belongs to, for the capability check.
pub(crate) async fn owning_school(
    tx: &mut dyn StockTx,
    consumer: &ConsumerRef,
) -> Result<SchoolId, EngineError> {
    match consumer {
        ConsumerRef::School(school) => Ok(*school),
        ConsumerRef::Bundle(bundle_id) => {
            let bundle = tx
                .bundle(*bundle_id)
                .await?
                .ok_or(EngineError::BundleNotFound(*bundle_id))?;
            Ok(bundle.school)
        }
        other => Err(EngineError::validation(format!(
            "consumer kind '{}' does not resolve to a school",
            other.kind_str()
        ))),
    }
}

impl<S: StockStore> StockEngine<S> {
    /// Receive a batch of `quantity` units of `title` from a supplier.
    ///
    /// Registers the title on first receipt, assigns the batch its FIFO
    /// ordinal and writes the matching receipt entry.
    #[instrument(skip(self, actor, note), fields(actor = %actor.actor_id, title = %title))]
    pub async fn receive(
        &self,
        actor: &Actor,
        supplier: SupplierId,
        title: TitleId,
        title_name: &str,
        quantity: i64,
        note: Option<String>,
    ) -> Result<Batch, EngineError> {
        authorize_intake(actor)?;
        if quantity <= 0 {
            return Err(EngineError::validation(
                "received quantity must be positive",
            ));
        }
        if title_name.trim().is_empty() {
            return Err(EngineError::validation("title name cannot be empty"));
        }

        let mut tx = self.store.begin().await?;
        if !tx.title_exists(title).await? {
            tx.upsert_title(title, title_name).await?;
        }

        let sequence = tx.next_batch_sequence().await?;
        let now = Utc::now();
        let batch = Batch::new(BatchId::new(), title, sequence, quantity, now)?;
        tx.insert_batch(&batch).await?;

        let entry = LedgerEntry::new(
            EntryId::new(),
            EntryKind::Receipt,
            title,
            Some(batch.id()),
            quantity,
            ConsumerRef::Supplier(supplier),
            note,
            now,
        )?;
        tx.append_entry(&entry).await?;
        tx.commit().await?;

        info!(batch = %batch.id(), quantity, "stock received");
        Ok(batch)
    }

    /// Book a reservation of `quantity` units of `title` for a consumer.
    #[instrument(skip(self, actor, note), fields(actor = %actor.actor_id, title = %title))]
    pub async fn reserve(
        &self,
        actor: &Actor,
        consumer: ConsumerRef,
        title: TitleId,
        quantity: i64,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        if quantity <= 0 {
            return Err(EngineError::validation(
                "reserved quantity must be positive",
            ));
        }

        let mut tx = self.store.begin().await?;
        let school = owning_school(tx.as_mut(), &consumer).await?;
        authorize_consumer(actor, school)?;
        if !tx.title_exists(title).await? {
            return Err(EngineError::UnknownTitle(title));
        }

        let entry = LedgerEntry::new(
            EntryId::new(),
            EntryKind::Reserve,
            title,
            None,
            quantity,
            consumer,
            note,
            Utc::now(),
        )?;
        tx.append_entry(&entry).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Release part or all of a consumer's outstanding reservation.
    ///
    /// Releasing more than is outstanding is rejected with the outstanding
    /// figure; nothing is applied partially.
    #[instrument(skip(self, actor), fields(actor = %actor.actor_id, title = %title))]
    pub async fn release_reservation(
        &self,
        actor: &Actor,
        consumer: ConsumerRef,
        title: TitleId,
        quantity: i64,
    ) -> Result<(), EngineError> {
        if quantity <= 0 {
            return Err(EngineError::validation(
                "released quantity must be positive",
            ));
        }

        let mut tx = self.store.begin().await?;
        let school = owning_school(tx.as_mut(), &consumer).await?;
        authorize_consumer(actor, school)?;

        let entries = tx.entries_for_consumer(&consumer).await?;
        let outstanding = sums::reserved_outstanding(&entries, &consumer, title);
        if quantity > outstanding {
            return Err(EngineError::OverRelease {
                title,
                requested: quantity,
                outstanding,
            });
        }

        let entry = LedgerEntry::new(
            EntryId::new(),
            EntryKind::ReleaseReserve,
            title,
            None,
            quantity,
            consumer,
            None,
            Utc::now(),
        )?;
        tx.append_entry(&entry).await?;
        tx.commit().await?;
        Ok(())
    }
}
