//! Aggregations over ledger entries.
//!
//! Every derived quantity in the system is a sum over entries; these helpers
//! are shared by the workflows, the availability projection and the
//! reconciliation check.

use bookstock_core::{BatchId, FulfillmentId, TitleId};

use crate::entry::{ConsumerRef, EntryKind, LedgerEntry};

/// Ledger-derived balance of one batch: receipts + returns − withdrawals.
///
/// A batch's cached `available` counter must equal this at all times.
pub fn batch_balance<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    batch: BatchId,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| e.batch_id() == Some(batch))
        .map(|e| match e.kind() {
            EntryKind::Receipt | EntryKind::Return => e.quantity(),
            EntryKind::Withdraw => -e.quantity(),
            EntryKind::Reserve | EntryKind::ReleaseReserve => 0,
        })
        .sum()
}

/// Total withdrawn under a fulfillment for one title.
pub fn withdrawn_for<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    fulfillment: FulfillmentId,
    title: TitleId,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| {
            e.kind() == EntryKind::Withdraw
                && e.title_id() == title
                && *e.consumer() == ConsumerRef::Fulfillment(fulfillment)
        })
        .map(LedgerEntry::quantity)
        .sum()
}

/// Total already returned under a fulfillment for one title.
pub fn returned_for<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    fulfillment: FulfillmentId,
    title: TitleId,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| {
            e.kind() == EntryKind::Return
                && e.title_id() == title
                && *e.consumer() == ConsumerRef::FulfillmentReturn(fulfillment)
        })
        .map(LedgerEntry::quantity)
        .sum()
}

/// Returned quantity posted against one specific withdrawal batch.
pub fn returned_for_batch<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    fulfillment: FulfillmentId,
    title: TitleId,
    batch: BatchId,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| {
            e.kind() == EntryKind::Return
                && e.title_id() == title
                && e.batch_id() == Some(batch)
                && *e.consumer() == ConsumerRef::FulfillmentReturn(fulfillment)
        })
        .map(LedgerEntry::quantity)
        .sum()
}

/// Gross reserved quantity booked for a consumer and title.
pub fn reserved_gross<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    consumer: &ConsumerRef,
    title: TitleId,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| {
            e.kind() == EntryKind::Reserve && e.title_id() == title && e.consumer() == consumer
        })
        .map(LedgerEntry::quantity)
        .sum()
}

/// Outstanding reservation for a consumer and title: max(0, reserved − released).
pub fn reserved_outstanding<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    consumer: &ConsumerRef,
    title: TitleId,
) -> i64 {
    let mut net = 0i64;
    for e in entries {
        if e.title_id() != title || e.consumer() != consumer {
            continue;
        }
        match e.kind() {
            EntryKind::Reserve => net += e.quantity(),
            EntryKind::ReleaseReserve => net -= e.quantity(),
            _ => {}
        }
    }
    net.max(0)
}

/// Outstanding reservation for a title across all consumers.
pub fn reserved_outstanding_total<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    title: TitleId,
) -> i64 {
    let mut net = 0i64;
    for e in entries {
        if e.title_id() != title {
            continue;
        }
        match e.kind() {
            EntryKind::Reserve => net += e.quantity(),
            EntryKind::ReleaseReserve => net -= e.quantity(),
            _ => {}
        }
    }
    net.max(0)
}
