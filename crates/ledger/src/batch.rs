use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bookstock_core::{BatchId, DomainError, DomainResult, TitleId};

/// One receipt of stock for a title, with its remaining-quantity counter.
///
/// `available` is a cached figure kept in lockstep with the ledger; it is
/// only ever adjusted through [`Batch::draw`] and [`Batch::credit`], which
/// refuse to let it go negative. FIFO age is the store-assigned `sequence`,
/// strictly increasing with receipt order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    id: BatchId,
    title_id: TitleId,
    sequence: i64,
    available: i64,
    received_at: DateTime<Utc>,
}

impl Batch {
    /// A freshly received batch. The initial quantity must be positive.
    pub fn new(
        id: BatchId,
        title_id: TitleId,
        sequence: i64,
        initial: i64,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if initial <= 0 {
            return Err(DomainError::validation(
                "batch must be received with a positive quantity",
            ));
        }
        Ok(Self {
            id,
            title_id,
            sequence,
            available: initial,
            received_at,
        })
    }

    /// Rehydrate a batch from stored state. Used by store backends only.
    pub fn from_parts(
        id: BatchId,
        title_id: TitleId,
        sequence: i64,
        available: i64,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if available < 0 {
            return Err(DomainError::invariant(
                "stored batch has a negative available counter",
            ));
        }
        Ok(Self {
            id,
            title_id,
            sequence,
            available,
            received_at,
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Take `quantity` units out of the batch.
    pub fn draw(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("draw quantity must be positive"));
        }
        if quantity > self.available {
            return Err(DomainError::invariant(format!(
                "draw of {} exceeds available {} in batch {}",
                quantity, self.available, self.id
            )));
        }
        self.available -= quantity;
        Ok(())
    }

    /// Put `quantity` units back into the batch (return or cancel).
    pub fn credit(&mut self, quantity: i64) -> DomainResult<()> {
        if quantity <= 0 {
            return Err(DomainError::validation("credit quantity must be positive"));
        }
        self.available += quantity;
        Ok(())
    }
}
