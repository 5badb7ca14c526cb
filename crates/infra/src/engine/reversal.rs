use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tracing::{info, instrument};

use bookstock_auth::{authorize_consumer, Actor};
use bookstock_core::{BatchId, EntryId, FulfillmentId, TitleId};
use bookstock_fulfillment::{BundleStatus, ReturnRecord};
use bookstock_ledger::{sums, ConsumerRef, EntryKind, LedgerEntry};

use crate::store::{StockStore, StoreError};

use super::{owning_school, EngineError, StockEngine};

impl<S: StockStore> StockEngine<S> {
    /// Take back previously withdrawn units of a fulfillment.
    ///
    /// The whole request is validated against what is still returnable per
    /// title before anything is applied; an over-request rejects the call
    /// with the remaining figure and no partial effect. Each accepted title
    /// is credited back LIFO across the original withdrawals: the newest
    /// withdrawal's batch is refilled first, up to whatever of that
    /// withdrawal has not been returned yet.
    #[instrument(skip(self, actor, requested), fields(actor = %actor.actor_id, fulfillment = %fulfillment_id))]
    pub async fn return_items(
        &self,
        actor: &Actor,
        fulfillment_id: FulfillmentId,
        requested: &[(TitleId, i64)],
    ) -> Result<Vec<ReturnRecord>, EngineError> {
        if requested.is_empty() {
            return Err(EngineError::validation("no return lines given"));
        }
        let mut seen = HashSet::new();
        for (title, quantity) in requested {
            if *quantity <= 0 {
                return Err(EngineError::validation(format!(
                    "return quantity for title {title} must be positive"
                )));
            }
            if !seen.insert(*title) {
                return Err(EngineError::validation(format!(
                    "title {title} appears more than once in the return request"
                )));
            }
        }

        let mut tx = self.store.begin().await?;
        let mut record = tx
            .lock_fulfillment(fulfillment_id)
            .await?
            .ok_or(EngineError::FulfillmentNotFound(fulfillment_id))?;
        if record.is_cancelled() {
            return Err(EngineError::AlreadyCancelled(fulfillment_id));
        }
        let consumer = *record.consumer();
        let school = owning_school(tx.as_mut(), &consumer).await?;
        authorize_consumer(actor, school)?;

        let entries = tx.entries_for_fulfillment(fulfillment_id).await?;

        // Whole-request validation first: nothing is applied partially.
        for (title, quantity) in requested {
            let issued = sums::withdrawn_for(&entries, fulfillment_id, *title);
            let already = sums::returned_for(&entries, fulfillment_id, *title);
            let returnable = issued - already;
            if *quantity > returnable {
                return Err(EngineError::OverReturn {
                    title: *title,
                    requested: *quantity,
                    returnable: returnable.max(0),
                });
            }
        }

        let splits = plan_lifo_returns(&entries, fulfillment_id, requested)?;

        let now = Utc::now();
        let mut batch_ids: Vec<BatchId> = splits.iter().map(|s| s.batch_id).collect();
        batch_ids.sort();
        batch_ids.dedup();
        let mut batches = tx.lock_batches(&batch_ids).await?;

        for split in &splits {
            let batch = batches
                .iter_mut()
                .find(|b| b.id() == split.batch_id)
                .ok_or_else(|| {
                    StoreError::Backend(format!("batch {} missing from locked set", split.batch_id))
                })?;
            batch.credit(split.quantity)?;
            tx.set_batch_available(batch.id(), batch.available()).await?;

            let entry = LedgerEntry::new(
                EntryId::new(),
                EntryKind::Return,
                split.title,
                Some(split.batch_id),
                split.quantity,
                ConsumerRef::FulfillmentReturn(fulfillment_id),
                None,
                now,
            )?;
            tx.append_entry(&entry).await?;
        }

        let mut applied = Vec::with_capacity(requested.len());
        for (title, quantity) in requested {
            applied.push(record.record_return(*title, *quantity, actor.actor_id, now)?);
        }
        tx.update_fulfillment(&record).await?;
        tx.commit().await?;

        info!(splits = splits.len(), "items returned");
        Ok(applied)
    }

    /// Cancel a fulfillment: credit back everything still outstanding and
    /// freeze the record.
    ///
    /// Prior returns have already refilled their batches, so the credit is
    /// the net withdrawn-minus-returned figure per batch, booked as one
    /// compensating receipt entry each. The owning bundle's status is
    /// recomputed from its remaining live issues.
    #[instrument(skip(self, actor), fields(actor = %actor.actor_id, fulfillment = %fulfillment_id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        fulfillment_id: FulfillmentId,
    ) -> Result<Vec<(BatchId, i64)>, EngineError> {
        let mut tx = self.store.begin().await?;
        let mut record = tx
            .lock_fulfillment(fulfillment_id)
            .await?
            .ok_or(EngineError::FulfillmentNotFound(fulfillment_id))?;
        if record.is_cancelled() {
            return Err(EngineError::AlreadyCancelled(fulfillment_id));
        }
        let consumer = *record.consumer();
        let school = owning_school(tx.as_mut(), &consumer).await?;
        authorize_consumer(actor, school)?;

        let entries = tx.entries_for_fulfillment(fulfillment_id).await?;
        let mut net: BTreeMap<BatchId, (TitleId, i64)> = BTreeMap::new();
        for entry in &entries {
            let Some(batch_id) = entry.batch_id() else {
                continue;
            };
            match (entry.kind(), entry.consumer()) {
                (EntryKind::Withdraw, ConsumerRef::Fulfillment(f)) if *f == fulfillment_id => {
                    net.entry(batch_id).or_insert((entry.title_id(), 0)).1 += entry.quantity();
                }
                (EntryKind::Return, ConsumerRef::FulfillmentReturn(f)) if *f == fulfillment_id => {
                    net.entry(batch_id).or_insert((entry.title_id(), 0)).1 -= entry.quantity();
                }
                _ => {}
            }
        }
        net.retain(|_, (_, quantity)| *quantity > 0);

        let now = Utc::now();
        let batch_ids: Vec<BatchId> = net.keys().copied().collect();
        let mut batches = tx.lock_batches(&batch_ids).await?;
        let mut reverted = Vec::with_capacity(net.len());

        for (batch_id, (title, quantity)) in &net {
            let batch = batches
                .iter_mut()
                .find(|b| b.id() == *batch_id)
                .ok_or_else(|| {
                    StoreError::Backend(format!("batch {batch_id} missing from locked set"))
                })?;
            batch.credit(*quantity)?;
            tx.set_batch_available(batch.id(), batch.available()).await?;

            let entry = LedgerEntry::new(
                EntryId::new(),
                EntryKind::Receipt,
                *title,
                Some(*batch_id),
                *quantity,
                ConsumerRef::FulfillmentCancel(fulfillment_id),
                Some("fulfillment cancelled".to_string()),
                now,
            )?;
            tx.append_entry(&entry).await?;
            reverted.push((*batch_id, *quantity));
        }

        record.mark_cancelled()?;
        tx.update_fulfillment(&record).await?;

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

        info!(batches = reverted.len(), "fulfillment cancelled");
        Ok(reverted)
    }
}

struct ReturnSplit {
    title: TitleId,
    batch_id: BatchId,
    quantity: i64,
}

/// Distribute the requested returns across the original withdrawals, newest
/// first.
///
/// Returns already posted are attributed to the newest withdrawals as well,
/// so the walk reproduces exactly which withdrawals are exhausted and only
/// refills what is still outstanding per withdrawal.
fn plan_lifo_returns(
    entries: &[LedgerEntry],
    fulfillment_id: FulfillmentId,
    requested: &[(TitleId, i64)],
) -> Result<Vec<ReturnSplit>, EngineError> {
    let mut splits = Vec::new();

    for (title, quantity) in requested {
        let withdrawals: Vec<&LedgerEntry> = entries
            .iter()
            .filter(|e| {
                e.kind() == EntryKind::Withdraw
                    && e.title_id() == *title
                    && *e.consumer() == ConsumerRef::Fulfillment(fulfillment_id)
            })
            .collect();

        let mut prior: HashMap<BatchId, i64> = HashMap::new();
        for entry in entries {
            if entry.kind() == EntryKind::Return
                && entry.title_id() == *title
                && *entry.consumer() == ConsumerRef::FulfillmentReturn(fulfillment_id)
            {
                if let Some(batch_id) = entry.batch_id() {
                    *prior.entry(batch_id).or_insert(0) += entry.quantity();
                }
            }
        }

        let mut remaining = *quantity;
        for withdrawal in withdrawals.iter().rev() {
            let batch_id = withdrawal.batch_id().ok_or_else(|| {
                StoreError::Decode(format!(
                    "withdraw entry {} carries no batch",
                    withdrawal.id()
                ))
            })?;
            let posted = prior.entry(batch_id).or_insert(0);
            let consumed = (*posted).min(withdrawal.quantity());
            *posted -= consumed;
            let outstanding = withdrawal.quantity() - consumed;
            if outstanding == 0 || remaining == 0 {
                continue;
            }

            let give = remaining.min(outstanding);
            splits.push(ReturnSplit {
                title: *title,
                batch_id,
                quantity: give,
            });
            remaining -= give;
        }

        if remaining > 0 {
            // The pre-check guarantees capacity; reaching this means the
            // ledger disagrees with itself.
            return Err(EngineError::Store(StoreError::Decode(format!(
                "withdrawals of title {title} cannot absorb the validated return"
            ))));
        }
    }

    Ok(splits)
}
