use chrono::Utc;
use tracing::{info, instrument};

use bookstock_auth::{authorize_consumer, Actor};
use bookstock_core::{EntryId, FulfillmentId, TitleId};
use bookstock_fulfillment::{BundleStatus, DemandLine, FulfillmentRecord, FulfillmentStatus};
use bookstock_ledger::{allocate_fifo, ConsumerRef, EntryKind, LedgerEntry};

use crate::store::{StockStore, StoreError};

use super::{owning_school, EngineError, StockEngine};

impl<S: StockStore> StockEngine<S> {
    /// Satisfy a multi-line demand for a school or bundle.
    ///
    /// Every trackable line is allocated FIFO against the title's batches;
    /// one withdraw entry is written per (line, batch) take and the touched
    /// batches are decremented, all inside one transaction. Shortage is not
    /// an error: it surfaces as a partial or blocked status on the returned
    /// record. A blocked outcome writes no ledger entries and touches no
    /// batch.
    #[instrument(
        skip(self, actor, demand),
        fields(actor = %actor.actor_id, lines = demand.len())
    )]
    pub async fn fulfill(
        &self,
        actor: &Actor,
        consumer: ConsumerRef,
        demand: &[DemandLine],
        multiplier: i64,
    ) -> Result<FulfillmentRecord, EngineError> {
        let mut tx = self.store.begin().await?;
        let school = owning_school(tx.as_mut(), &consumer).await?;
        authorize_consumer(actor, school)?;

        if let ConsumerRef::Bundle(bundle_id) = consumer {
            let siblings = tx.fulfillments_for_bundle(bundle_id).await?;
            if siblings
                .iter()
                .any(|f| f.status() == FulfillmentStatus::Fulfilled)
            {
                return Err(EngineError::AlreadyFulfilled(bundle_id));
            }
        }

        let now = Utc::now();
        let mut record =
            FulfillmentRecord::open(FulfillmentId::new(), consumer, demand, multiplier, now)?;

        // Every trackable title must resolve before anything is written.
        for line in record.lines() {
            if let Some(title) = line.title() {
                if !tx.title_exists(title).await? {
                    return Err(EngineError::UnknownTitle(title));
                }
            }
        }

        let plan: Vec<(u32, TitleId, i64)> = record
            .lines()
            .iter()
            .filter_map(|l| l.title().map(|t| (l.line_no(), t, l.requested())))
            .filter(|(_, _, requested)| *requested > 0)
            .collect();

        for (line_no, title, requested) in plan {
            let mut batches = tx.lock_title_batches(title).await?;
            let allocation = allocate_fifo(&batches, requested);

            for take in &allocation.takes {
                let batch = batches
                    .iter_mut()
                    .find(|b| b.id() == take.batch_id)
                    .ok_or_else(|| {
                        StoreError::Backend(format!(
                            "allocated batch {} missing from locked set",
                            take.batch_id
                        ))
                    })?;
                batch.draw(take.quantity)?;
                tx.set_batch_available(batch.id(), batch.available()).await?;

                let entry = LedgerEntry::new(
                    EntryId::new(),
                    EntryKind::Withdraw,
                    title,
                    Some(take.batch_id),
                    take.quantity,
                    ConsumerRef::Fulfillment(record.id()),
                    None,
                    now,
                )?;
                tx.append_entry(&entry).await?;
            }

            record.record_allocation(line_no, allocation.total_taken())?;
        }

        record.finalize_status();
        tx.insert_fulfillment(&record).await?;

        if let ConsumerRef::Bundle(bundle_id) = consumer {
            let mut bundle = tx
                .bundle(bundle_id)
                .await?
                .ok_or(EngineError::BundleNotFound(bundle_id))?;
            let siblings = tx.fulfillments_for_bundle(bundle_id).await?;
            bundle.status = BundleStatus::from_siblings(siblings.iter().map(|f| f.status()));
            tx.upsert_bundle(&bundle).await?;
        }

        tx.commit().await?;

        info!(
            fulfillment = %record.id(),
            status = record.status().as_str(),
            achieved = record.total_achieved(),
            requested = record.total_requested(),
            "demand fulfilled"
        );
        Ok(record)
    }
}
