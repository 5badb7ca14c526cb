//! Postgres-backed stock store.
//!
//! One [`StockTx`] maps to one database transaction; the `lock_*` reads take
//! pessimistic row locks (`SELECT … FOR UPDATE`) so the read-then-decide step
//! of an allocation and the decrements it leads to happen under the same lock
//! acquisition. FIFO age comes from a database sequence assigned at receipt.
//! Dropping the transaction without commit rolls everything back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use bookstock_core::{BatchId, BundleId, FulfillmentId, SchoolId, TitleId};
use bookstock_fulfillment::{Bundle, BundleStatus, FulfillmentRecord};
use bookstock_ledger::{Batch, ConsumerRef, LedgerEntry};

use super::{StockStore, StockTx, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS titles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS batch_age_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        id UUID PRIMARY KEY,
        title_id UUID NOT NULL REFERENCES titles(id),
        sequence BIGINT NOT NULL UNIQUE,
        available BIGINT NOT NULL CHECK (available >= 0),
        received_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS batches_title_idx ON batches (title_id, sequence)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id UUID PRIMARY KEY,
        position BIGINT GENERATED ALWAYS AS IDENTITY,
        kind TEXT NOT NULL,
        title_id UUID NOT NULL,
        batch_id UUID,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        consumer_kind TEXT NOT NULL,
        consumer_id UUID NOT NULL,
        note TEXT,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_entries_consumer_idx
        ON ledger_entries (consumer_id, consumer_kind, position)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_entries_title_idx
        ON ledger_entries (title_id, position)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fulfillments (
        id UUID PRIMARY KEY,
        consumer_kind TEXT NOT NULL,
        consumer_id UUID NOT NULL,
        status TEXT NOT NULL,
        record JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS fulfillments_consumer_idx
        ON fulfillments (consumer_kind, consumer_id, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bundles (
        id UUID PRIMARY KEY,
        school_id UUID NOT NULL,
        status TEXT NOT NULL
    )
    "#,
];

/// Postgres-backed implementation of [`StockStore`].
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables, indexes and the FIFO sequence. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PostgresTx { tx }))
    }
}

struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{operation}: {err}"))
}

fn decode_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn batch_from_row(row: &PgRow) -> Result<Batch, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let title_id: Uuid = row.try_get("title_id").map_err(decode_err)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode_err)?;
    let available: i64 = row.try_get("available").map_err(decode_err)?;
    let received_at: DateTime<Utc> = row.try_get("received_at").map_err(decode_err)?;
    Batch::from_parts(
        BatchId::from_uuid(id),
        TitleId::from_uuid(title_id),
        sequence,
        available,
        received_at,
    )
    .map_err(decode_err)
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let kind: String = row.try_get("kind").map_err(decode_err)?;
    let title_id: Uuid = row.try_get("title_id").map_err(decode_err)?;
    let batch_id: Option<Uuid> = row.try_get("batch_id").map_err(decode_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_err)?;
    let consumer_kind: String = row.try_get("consumer_kind").map_err(decode_err)?;
    let consumer_id: Uuid = row.try_get("consumer_id").map_err(decode_err)?;
    let note: Option<String> = row.try_get("note").map_err(decode_err)?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(decode_err)?;

    let kind = bookstock_ledger::EntryKind::parse(&kind).map_err(decode_err)?;
    let consumer = ConsumerRef::from_parts(&consumer_kind, consumer_id).map_err(decode_err)?;
    LedgerEntry::new(
        bookstock_core::EntryId::from_uuid(id),
        kind,
        TitleId::from_uuid(title_id),
        batch_id.map(BatchId::from_uuid),
        quantity,
        consumer,
        note,
        recorded_at,
    )
    .map_err(decode_err)
}

fn record_from_row(row: &PgRow) -> Result<FulfillmentRecord, StoreError> {
    let payload: serde_json::Value = row.try_get("record").map_err(decode_err)?;
    serde_json::from_value(payload).map_err(decode_err)
}

fn bundle_from_row(row: &PgRow) -> Result<Bundle, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let school_id: Uuid = row.try_get("school_id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    Ok(Bundle {
        id: BundleId::from_uuid(id),
        school: SchoolId::from_uuid(school_id),
        status: BundleStatus::parse(&status).map_err(decode_err)?,
    })
}

const BATCH_COLUMNS: &str = "id, title_id, sequence, available, received_at";
const ENTRY_COLUMNS: &str =
    "id, kind, title_id, batch_id, quantity, consumer_kind, consumer_id, note, recorded_at";

#[async_trait]
impl StockTx for PostgresTx {
    async fn title_exists(&mut self, title: TitleId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM titles WHERE id = $1")
            .bind(title.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("title_exists", e))?;
        Ok(row.is_some())
    }

    async fn upsert_title(&mut self, title: TitleId, name: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO titles (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(title.as_uuid())
        .bind(name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_title", e))?;
        Ok(())
    }

    async fn next_batch_sequence(&mut self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT nextval('batch_age_seq') AS seq")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("next_batch_sequence", e))?;
        row.try_get("seq").map_err(decode_err)
    }

    async fn insert_batch(&mut self, batch: &Batch) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO batches (id, title_id, sequence, available, received_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(batch.id().as_uuid())
        .bind(batch.title_id().as_uuid())
        .bind(batch.sequence())
        .bind(batch.available())
        .bind(batch.received_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_batch", e))?;
        Ok(())
    }

    async fn lock_title_batches(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches
             WHERE title_id = $1 AND available > 0
             ORDER BY sequence
             FOR UPDATE"
        ))
        .bind(title.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_title_batches", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn lock_batches(&mut self, ids: &[BatchId]) -> Result<Vec<Batch>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches
             WHERE id = ANY($1)
             ORDER BY sequence
             FOR UPDATE"
        ))
        .bind(&uuids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_batches", e))?;
        if rows.len() != ids.len() {
            return Err(StoreError::Backend(format!(
                "lock_batches: expected {} batches, found {}",
                ids.len(),
                rows.len()
            )));
        }
        rows.iter().map(batch_from_row).collect()
    }

    async fn batches_for_title(&mut self, title: TitleId) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches WHERE title_id = $1 ORDER BY sequence"
        ))
        .bind(title.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("batches_for_title", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn set_batch_available(
        &mut self,
        id: BatchId,
        available: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE batches SET available = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(available)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_batch_available", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("batch {id} does not exist")));
        }
        Ok(())
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ledger_entries
                 (id, kind, title_id, batch_id, quantity, consumer_kind, consumer_id, note, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id().as_uuid())
        .bind(entry.kind().as_str())
        .bind(entry.title_id().as_uuid())
        .bind(entry.batch_id().map(|b| *b.as_uuid()))
        .bind(entry.quantity())
        .bind(entry.consumer().kind_str())
        .bind(entry.consumer().consumer_id())
        .bind(entry.note())
        .bind(entry.recorded_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_entry", e))?;
        Ok(())
    }

    async fn entries_for_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE consumer_id = $1
               AND consumer_kind IN ('fulfillment', 'fulfillment_return', 'fulfillment_cancel')
             ORDER BY position"
        ))
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("entries_for_fulfillment", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE consumer_kind = $1 AND consumer_id = $2
             ORDER BY position"
        ))
        .bind(consumer.kind_str())
        .bind(consumer.consumer_id())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("entries_for_consumer", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_title(&mut self, title: TitleId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE title_id = $1 ORDER BY position"
        ))
        .bind(title.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("entries_for_title", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn insert_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_value(record).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO fulfillments (id, consumer_kind, consumer_id, status, record, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id().as_uuid())
        .bind(record.consumer().kind_str())
        .bind(record.consumer().consumer_id())
        .bind(record.status().as_str())
        .bind(payload)
        .bind(record.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_fulfillment", e))?;
        Ok(())
    }

    async fn lock_fulfillment(
        &mut self,
        id: FulfillmentId,
    ) -> Result<Option<FulfillmentRecord>, StoreError> {
        let row = sqlx::query("SELECT record FROM fulfillments WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_fulfillment", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_fulfillment(&mut self, record: &FulfillmentRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_value(record).map_err(decode_err)?;
        let result = sqlx::query(
            "UPDATE fulfillments SET status = $2, record = $3 WHERE id = $1",
        )
        .bind(record.id().as_uuid())
        .bind(record.status().as_str())
        .bind(payload)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_fulfillment", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "fulfillment {} does not exist",
                record.id()
            )));
        }
        Ok(())
    }

    async fn fulfillments_for_bundle(
        &mut self,
        bundle: BundleId,
    ) -> Result<Vec<FulfillmentRecord>, StoreError> {
        self.fulfillments_for_consumer(&ConsumerRef::Bundle(bundle))
            .await
    }

    async fn fulfillments_for_consumer(
        &mut self,
        consumer: &ConsumerRef,
    ) -> Result<Vec<FulfillmentRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM fulfillments
             WHERE consumer_kind = $1 AND consumer_id = $2
             ORDER BY created_at, id",
        )
        .bind(consumer.kind_str())
        .bind(consumer.consumer_id())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("fulfillments_for_consumer", e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn bundle(&mut self, id: BundleId) -> Result<Option<Bundle>, StoreError> {
        let row = sqlx::query("SELECT id, school_id, status FROM bundles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("bundle", e))?;
        row.as_ref().map(bundle_from_row).transpose()
    }

    async fn upsert_bundle(&mut self, bundle: &Bundle) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bundles (id, school_id, status) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET school_id = EXCLUDED.school_id,
                                            status = EXCLUDED.status",
        )
        .bind(bundle.id.as_uuid())
        .bind(bundle.school.as_uuid())
        .bind(bundle.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_bundle", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}
