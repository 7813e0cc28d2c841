use std::{path::Path, str::FromStr, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use rust_decimal::Decimal;

use crate::payment::Payment;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Payment>>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>>;
    /// Writes the outcome of a processing attempt in one row update.
    /// Only applies while the stored row is still PENDING; returns whether it did.
    async fn complete(&self, payment: &Payment) -> Result<bool>;
    /// Ids of payments still waiting for a rate, oldest first.
    async fn pending_ids(&self) -> Result<Vec<String>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS payments (
    id                   TEXT PRIMARY KEY,
    idempotency_key      TEXT UNIQUE,
    sender               TEXT NOT NULL,
    receiver             TEXT NOT NULL,
    amount               TEXT NOT NULL,
    source_currency      TEXT NOT NULL,
    destination_currency TEXT NOT NULL,
    status               TEXT NOT NULL,
    fx_rate              TEXT,
    payout_amount        TEXT,
    error_code           TEXT,
    error_message        TEXT,
    attempt_count        INTEGER NOT NULL DEFAULT 0,
    last_attempt_at      TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payments_status_created ON payments (status, created_at);
";

const COLUMNS: &str = "id, idempotency_key, sender, receiver, amount, source_currency, \
    destination_currency, status, fx_rate, payout_amount, error_code, error_message, \
    attempt_count, last_attempt_at, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// `:memory:` opens a throwaway in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref() == Path::new(":memory:") {
            return Self::in_memory();
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));

        Self::from_pool(Pool::new(manager)?)
    }

    /// Single-connection pool; every pooled connection would otherwise get its own database.
    pub fn in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;

        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;

        tracing::info!("payments schema ready");

        Ok(Self { pool })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || -> Result<T> {
            let conn = pool.get()?;
            Ok(f(&conn)?)
        })
        .await?
    }
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let p = payment.clone();

        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO payments ({COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    p.id,
                    p.idempotency_key,
                    p.sender,
                    p.receiver,
                    p.amount.to_string(),
                    p.source_currency,
                    p.destination_currency,
                    p.status.as_str(),
                    p.fx_rate.map(|d| d.to_string()),
                    p.payout_amount.map(|d| d.to_string()),
                    p.error_code,
                    p.error_message,
                    p.attempt_count,
                    p.last_attempt_at.as_ref().map(to_text),
                    to_text(&p.created_at),
                    to_text(&p.updated_at),
                ],
            )
        })
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Payment>> {
        let id = id.to_string();

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM payments WHERE id = ?1"),
                [id],
                from_row,
            )
            .optional()
        })
        .await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>> {
        let key = key.to_string();

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM payments WHERE idempotency_key = ?1"),
                [key],
                from_row,
            )
            .optional()
        })
        .await
    }

    async fn complete(&self, payment: &Payment) -> Result<bool> {
        let p = payment.clone();

        let changed = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE payments SET status = ?2, fx_rate = ?3, payout_amount = ?4, \
                     error_code = ?5, error_message = ?6, attempt_count = ?7, \
                     last_attempt_at = ?8, updated_at = ?9 \
                     WHERE id = ?1 AND status = 'PENDING'",
                    params![
                        p.id,
                        p.status.as_str(),
                        p.fx_rate.map(|d| d.to_string()),
                        p.payout_amount.map(|d| d.to_string()),
                        p.error_code,
                        p.error_message,
                        p.attempt_count,
                        p.last_attempt_at.as_ref().map(to_text),
                        to_text(&p.updated_at),
                    ],
                )
            })
            .await?;

        Ok(changed == 1)
    }

    async fn pending_ids(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM payments WHERE status = 'PENDING' ORDER BY created_at, rowid",
            )?;

            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;

            Ok(ids)
        })
        .await
    }
}

fn from_row(row: &Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        sender: row.get(2)?,
        receiver: row.get(3)?,
        amount: decimal(row, 4)?,
        source_currency: row.get(5)?,
        destination_currency: row.get(6)?,
        status: parse_column(row, 7)?,
        fx_rate: optional_decimal(row, 8)?,
        payout_amount: optional_decimal(row, 9)?,
        error_code: row.get(10)?,
        error_message: row.get(11)?,
        attempt_count: row.get(12)?,
        last_attempt_at: optional_timestamp(row, 13)?,
        created_at: timestamp(row, 14)?,
        updated_at: timestamp(row, 15)?,
    })
}

fn conversion_err(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;

    raw.parse().map_err(|err: anyhow::Error| conversion_err(idx, err))
}

fn decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;

    Decimal::from_str(&raw).map_err(|err| conversion_err(idx, err))
}

fn optional_decimal(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;

    raw.map(|raw| Decimal::from_str(&raw).map_err(|err| conversion_err(idx, err)))
        .transpose()
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;

    parse_timestamp(idx, &raw)
}

fn optional_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;

    raw.map(|raw| parse_timestamp(idx, &raw)).transpose()
}

/// Fixed-width so `ORDER BY created_at` sorts chronologically.
fn to_text(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| conversion_err(idx, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{NewPayment, PaymentStatus};
    use rust_decimal_macros::dec;

    fn new_payment(source: &str, destination: &str) -> Payment {
        Payment::new(
            NewPayment {
                sender: "alice".into(),
                receiver: "bob".into(),
                amount: dec!(12.345678),
                source_currency: source.into(),
                destination_currency: destination.into(),
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        let payment = new_payment("USD", "EUR");

        store.insert(&payment).await.unwrap();

        let stored = store.get(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored, payment);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique() {
        let store = SqliteStore::in_memory().unwrap();

        let mut first = new_payment("USD", "EUR");
        first.idempotency_key = Some("abc".into());
        let mut second = new_payment("USD", "EUR");
        second.idempotency_key = Some("abc".into());

        store.insert(&first).await.unwrap();
        assert!(store.insert(&second).await.is_err());

        let found = store.find_by_idempotency_key("abc").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(store.find_by_idempotency_key("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_only_applies_to_pending_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let mut payment = new_payment("USD", "EUR");
        store.insert(&payment).await.unwrap();

        payment.begin_attempt();
        payment.succeed(dec!(0.9), dec!(11.111110));
        assert!(store.complete(&payment).await.unwrap());

        let stored = store.get(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Succeeded);
        assert_eq!(stored.fx_rate, Some(dec!(0.9)));
        assert_eq!(stored.payout_amount.unwrap().to_string(), "11.111110");
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.last_attempt_at.is_some());

        let mut late = stored.clone();
        late.fail("FX_TIMEOUT", "late writer");
        assert!(!store.complete(&late).await.unwrap());

        let unchanged = store.get(&payment.id).await.unwrap().unwrap();
        assert_eq!(unchanged, stored);
    }

    #[tokio::test]
    async fn test_pending_ids() {
        let store = SqliteStore::in_memory().unwrap();

        let pending = new_payment("USD", "EUR");
        let settled = new_payment("USD", "USD");
        store.insert(&pending).await.unwrap();
        store.insert(&settled).await.unwrap();

        assert_eq!(store.pending_ids().await.unwrap(), vec![pending.id]);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let path = std::env::temp_dir().join(format!("fxpay-{}.db", uuid::Uuid::new_v4()));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(&new_payment("USD", "EUR")).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.pending_ids().await.unwrap().len(), 1);

        std::fs::remove_file(&path).ok();
    }
}
