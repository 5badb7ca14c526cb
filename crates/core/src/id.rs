//! Strongly-typed identifiers.
//!
//! Every identifier is a UUIDv7 newtype: time-ordered, so freshly minted ids
//! sort by creation. FIFO age of a batch is still carried by an explicit
//! `sequence` field rather than the id (see `bookstock-ledger::Batch`).

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a book title (the stocked article).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TitleId(Uuid);

/// Identifier of one receiving batch of a title.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

/// Identifier of a ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

/// Identifier of a school (scoping boundary for actors and consumers).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchoolId(Uuid);

/// Identifier of an order bundle owned by a school.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(Uuid);

/// Identifier of a fulfillment record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FulfillmentId(Uuid);

/// Identifier of a supplier (counterparty of plain stock receipts).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(Uuid);

/// Identifier of an acting caller (human or service identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Uuid);

macro_rules! uuid_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Mint a fresh identifier (UUIDv7). Tests that need determinism
            /// should construct ids from fixed UUIDs instead.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(TitleId, "TitleId");
uuid_id!(BatchId, "BatchId");
uuid_id!(EntryId, "EntryId");
uuid_id!(SchoolId, "SchoolId");
uuid_id!(BundleId, "BundleId");
uuid_id!(FulfillmentId, "FulfillmentId");
uuid_id!(SupplierId, "SupplierId");
uuid_id!(ActorId, "ActorId");
