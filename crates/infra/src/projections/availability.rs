use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use bookstock_core::{BatchId, FulfillmentId, TitleId};
use bookstock_ledger::{sums, ConsumerRef, EntryKind};

use crate::engine::{EngineError, StockEngine};
use crate::store::StockStore;

/// Point-in-time stock picture for one title, seen from one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleAvailability {
    pub title: TitleId,
    /// Gross quantity the consumer has registered as its requirement.
    pub required: i64,
    /// Physical stock on hand across all batches of the title.
    pub available: i64,
    /// The consumer's reservation still outstanding (reserved − released).
    pub reserved: i64,
    /// Withdrawn under the consumer's live (non-cancelled) fulfillments.
    pub withdrawn: i64,
    /// Stock still promisable: on hand minus every consumer's outstanding
    /// reservations.
    pub free: i64,
}

/// Divergence between a batch's cached counter and its ledger-derived
/// balance. An empty reconciliation report means the caches are sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDrift {
    pub batch_id: BatchId,
    pub title: TitleId,
    pub cached: i64,
    pub derived: i64,
}

impl<S: StockStore> StockEngine<S> {
    /// Recompute the availability picture for a consumer over a set of
    /// titles.
    ///
    /// Pure read; the snapshot is point-in-time and may run concurrently
    /// with mutations. Calling it twice without an intervening mutation
    /// yields identical results.
    #[instrument(skip(self, titles), fields(titles = titles.len()))]
    pub async fn availability(
        &self,
        consumer: &ConsumerRef,
        titles: &[TitleId],
    ) -> Result<Vec<TitleAvailability>, EngineError> {
        let mut tx = self.store().begin().await?;

        let live: HashSet<FulfillmentId> = tx
            .fulfillments_for_consumer(consumer)
            .await?
            .iter()
            .filter(|f| !f.is_cancelled())
            .map(|f| f.id())
            .collect();

        let mut report = Vec::with_capacity(titles.len());
        for &title in titles {
            let batches = tx.batches_for_title(title).await?;
            let available: i64 = batches.iter().map(|b| b.available()).sum();

            let entries = tx.entries_for_title(title).await?;
            let required = sums::reserved_gross(&entries, consumer, title);
            let reserved = sums::reserved_outstanding(&entries, consumer, title);
            let withdrawn: i64 = entries
                .iter()
                .filter(|e| {
                    e.kind() == EntryKind::Withdraw
                        && matches!(e.consumer(), ConsumerRef::Fulfillment(f) if live.contains(f))
                })
                .map(|e| e.quantity())
                .sum();
            let free = (available - sums::reserved_outstanding_total(&entries, title)).max(0);

            report.push(TitleAvailability {
                title,
                required,
                available,
                reserved,
                withdrawn,
                free,
            });
        }

        // Read-only: the transaction is dropped, never committed.
        Ok(report)
    }

    /// Recompute every batch balance of the given titles from the ledger and
    /// report divergence from the cached counters.
    #[instrument(skip(self, titles), fields(titles = titles.len()))]
    pub async fn reconcile(&self, titles: &[TitleId]) -> Result<Vec<BatchDrift>, EngineError> {
        let mut tx = self.store().begin().await?;
        let mut drift = Vec::new();

        for &title in titles {
            let batches = tx.batches_for_title(title).await?;
            let entries = tx.entries_for_title(title).await?;
            for batch in &batches {
                let derived = sums::batch_balance(&entries, batch.id());
                if derived != batch.available() {
                    drift.push(BatchDrift {
                        batch_id: batch.id(),
                        title,
                        cached: batch.available(),
                        derived,
                    });
                }
            }
        }

        Ok(drift)
    }
}
