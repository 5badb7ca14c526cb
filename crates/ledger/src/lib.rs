//! `bookstock-ledger` — stock batches, the movement ledger, and FIFO allocation.
//!
//! The ledger is the source of truth: every stock movement is an immutable
//! [`LedgerEntry`], and every derived quantity is a sum over entries. The one
//! cached figure, a batch's `available` counter, must always equal
//! `receipts + returns − withdrawals` over that batch's entries — [`sums`]
//! provides the recomputation used to check it.

pub mod allocator;
pub mod batch;
pub mod entry;
pub mod sums;

pub use allocator::{allocate_fifo, Allocation, BatchTake};
pub use batch::Batch;
pub use entry::{ConsumerRef, EntryKind, LedgerEntry};
