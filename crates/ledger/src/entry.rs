use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bookstock_core::{
    BatchId, BundleId, DomainError, DomainResult, EntryId, FulfillmentId, SchoolId, SupplierId,
    TitleId,
};

/// Kind of a stock movement. Quantity is always positive; direction is
/// implied by the kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Receipt,
    Reserve,
    ReleaseReserve,
    Withdraw,
    Return,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Receipt => "receipt",
            EntryKind::Reserve => "reserve",
            EntryKind::ReleaseReserve => "release_reserve",
            EntryKind::Withdraw => "withdraw",
            EntryKind::Return => "return",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "receipt" => Ok(EntryKind::Receipt),
            "reserve" => Ok(EntryKind::Reserve),
            "release_reserve" => Ok(EntryKind::ReleaseReserve),
            "withdraw" => Ok(EntryKind::Withdraw),
            "return" => Ok(EntryKind::Return),
            other => Err(DomainError::validation(format!(
                "unknown entry kind '{other}'"
            ))),
        }
    }
}

/// Typed reference to the entity a movement is booked against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConsumerRef {
    School(SchoolId),
    Bundle(BundleId),
    Supplier(SupplierId),
    Fulfillment(FulfillmentId),
    FulfillmentReturn(FulfillmentId),
    FulfillmentCancel(FulfillmentId),
}

impl ConsumerRef {
    pub fn kind_str(&self) -> &'static str {
        match self {
            ConsumerRef::School(_) => "school",
            ConsumerRef::Bundle(_) => "bundle",
            ConsumerRef::Supplier(_) => "supplier",
            ConsumerRef::Fulfillment(_) => "fulfillment",
            ConsumerRef::FulfillmentReturn(_) => "fulfillment_return",
            ConsumerRef::FulfillmentCancel(_) => "fulfillment_cancel",
        }
    }

    pub fn consumer_id(&self) -> Uuid {
        match self {
            ConsumerRef::School(id) => *id.as_uuid(),
            ConsumerRef::Bundle(id) => *id.as_uuid(),
            ConsumerRef::Supplier(id) => *id.as_uuid(),
            ConsumerRef::Fulfillment(id)
            | ConsumerRef::FulfillmentReturn(id)
            | ConsumerRef::FulfillmentCancel(id) => *id.as_uuid(),
        }
    }

    /// Rebuild a reference from its stored (kind, id) pair.
    pub fn from_parts(kind: &str, id: Uuid) -> DomainResult<Self> {
        match kind {
            "school" => Ok(ConsumerRef::School(SchoolId::from_uuid(id))),
            "bundle" => Ok(ConsumerRef::Bundle(BundleId::from_uuid(id))),
            "supplier" => Ok(ConsumerRef::Supplier(SupplierId::from_uuid(id))),
            "fulfillment" => Ok(ConsumerRef::Fulfillment(FulfillmentId::from_uuid(id))),
            "fulfillment_return" => Ok(ConsumerRef::FulfillmentReturn(FulfillmentId::from_uuid(id))),
            "fulfillment_cancel" => Ok(ConsumerRef::FulfillmentCancel(FulfillmentId::from_uuid(id))),
            other => Err(DomainError::validation(format!(
                "unknown consumer kind '{other}'"
            ))),
        }
    }
}

/// Immutable record of a single stock-affecting event.
///
/// Entries are only ever appended, never updated or deleted; compensations
/// (returns, cancellations) are new entries. `batch_id` is absent for pure
/// reservation bookkeeping, present for every physical movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: EntryId,
    kind: EntryKind,
    title_id: TitleId,
    batch_id: Option<BatchId>,
    quantity: i64,
    consumer: ConsumerRef,
    note: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        id: EntryId,
        kind: EntryKind,
        title_id: TitleId,
        batch_id: Option<BatchId>,
        quantity: i64,
        consumer: ConsumerRef,
        note: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation(
                "ledger entry quantity must be positive",
            ));
        }
        if batch_id.is_none() && matches!(kind, EntryKind::Withdraw | EntryKind::Return) {
            return Err(DomainError::validation(format!(
                "{} entries must reference a batch",
                kind.as_str()
            )));
        }
        Ok(Self {
            id,
            kind,
            title_id,
            batch_id,
            quantity,
            consumer,
            note,
            recorded_at,
        })
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn consumer(&self) -> &ConsumerRef {
        &self.consumer
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
