use serde::{Deserialize, Serialize};

use bookstock_core::BatchId;

use crate::batch::Batch;

/// Quantity taken from one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTake {
    pub batch_id: BatchId,
    pub quantity: i64,
}

/// Outcome of a FIFO allocation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    /// Takes in consumption order (oldest batch first).
    pub takes: Vec<BatchTake>,
    /// Portion of the need that could not be covered.
    pub shortfall: i64,
}

impl Allocation {
    pub fn total_taken(&self) -> i64 {
        self.takes.iter().map(|t| t.quantity).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// Plan how to satisfy `needed` units from the given batches, oldest first.
///
/// Greedy: takes `min(remaining, batch.available)` from each batch in age
/// order until the need is exhausted or the batches run out. Never takes more
/// than a batch currently holds and never emits a zero or negative take.
/// A need of zero or less is a no-op (empty plan, zero shortfall).
///
/// This is a pure planning step over a snapshot — the caller decrements the
/// batches and writes the matching withdraw entries under the same lock
/// acquisition, so two concurrent allocations can never spend the same units.
pub fn allocate_fifo(batches: &[Batch], needed: i64) -> Allocation {
    if needed <= 0 {
        return Allocation::default();
    }

    let mut by_age: Vec<&Batch> = batches.iter().filter(|b| b.available() > 0).collect();
    by_age.sort_by_key(|b| (b.sequence(), b.id()));

    let mut takes = Vec::new();
    let mut remaining = needed;
    for batch in by_age {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.available());
        takes.push(BatchTake {
            batch_id: batch.id(),
            quantity: take,
        });
        remaining -= take;
    }

    Allocation {
        takes,
        shortfall: remaining,
    }
}
