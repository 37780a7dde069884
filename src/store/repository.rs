use super::Store;
use crate::error::StoreError;
use chrono::{DateTime, Local, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Mapping between one record type and its table
///
/// Every table has a uniqueness constraint on the columns named by
/// `KEY_PREDICATE`, and a time column used for ordering and range queries.
pub trait TimeSeriesRecord: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + fmt::Debug;

    const TABLE: &'static str;
    /// Select list understood by `from_row`
    const COLUMNS: &'static str;
    /// WHERE clause matching one key, bound by `key_params`
    const KEY_PREDICATE: &'static str;
    const TIME_COLUMN: &'static str;

    fn key(&self) -> Self::Key;
    fn key_params(key: &Self::Key) -> Vec<Value>;

    /// Bind value of an instant against `TIME_COLUMN`
    fn time_param(at: DateTime<Utc>) -> Value {
        Value::Integer(at.timestamp())
    }

    /// Reject records that must never reach the table
    fn validate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn insert(&self, conn: &Connection) -> Result<(), StoreError>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Hydrate rows owned by child tables after a query
    fn load_children(_conn: &Connection, _records: &mut [Self]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Records stored once per (user, day) and replaced in place
pub trait DailyRecord: TimeSeriesRecord {
    /// Whether both rows carry the same computed totals (ignoring bookkeeping fields)
    fn same_totals(&self, other: &Self) -> bool;
    fn upsert(&self, conn: &Connection) -> Result<(), StoreError>;
}

/// Typed access to one table of the store
pub struct TimeSeriesRepository<R> {
    store: Store,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for TimeSeriesRepository<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: TimeSeriesRecord> TimeSeriesRepository<R> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Insert every record whose key is not stored yet, in one transaction
    ///
    /// Returns the number of rows inserted; duplicates (already stored or
    /// repeated within the batch) are skipped silently. A record failing
    /// validation rejects the whole batch before anything is written.
    pub async fn save_batch(&self, batch: Vec<R>) -> Result<usize, StoreError> {
        for record in &batch {
            record.validate()?;
        }
        if batch.is_empty() {
            return Ok(0);
        }

        let total = batch.len();
        let inserted = self
            .store
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing = existing_keys::<R>(&tx, &batch)?;

                let mut seen = HashSet::with_capacity(batch.len());
                let mut inserted = 0;
                for record in &batch {
                    let key = record.key();
                    if existing.contains(&key) || !seen.insert(key) {
                        continue;
                    }
                    record.insert(&tx)?;
                    inserted += 1;
                }

                tx.commit()?;
                Ok(inserted)
            })
            .await?;

        log::debug!(
            "{}: inserted {} of {} ({} duplicates)",
            R::TABLE,
            inserted,
            total,
            total - inserted
        );
        Ok(inserted)
    }

    /// Save a single record; `Ok(false)` when its key already exists
    pub async fn save(&self, record: R) -> Result<bool, StoreError> {
        Ok(self.save_batch(vec![record]).await? == 1)
    }

    /// Every record, newest first
    pub async fn get_all(&self) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} DESC",
            R::COLUMNS,
            R::TABLE,
            R::TIME_COLUMN
        );
        self.query(sql, Vec::new()).await
    }

    pub async fn get_latest(&self) -> Result<Option<R>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} DESC LIMIT 1",
            R::COLUMNS,
            R::TABLE,
            R::TIME_COLUMN
        );
        Ok(self.query(sql, Vec::new()).await?.into_iter().next())
    }

    /// Newest record at or after `since`
    pub async fn get_latest_since(&self, since: DateTime<Utc>) -> Result<Option<R>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} >= ?1 ORDER BY {} DESC LIMIT 1",
            R::COLUMNS,
            R::TABLE,
            R::TIME_COLUMN,
            R::TIME_COLUMN
        );
        Ok(self
            .query(sql, vec![R::time_param(since)])
            .await?
            .into_iter()
            .next())
    }

    /// Newest record since local midnight
    pub async fn get_today_latest(&self) -> Result<Option<R>, StoreError> {
        self.get_latest_since(start_of_local_day()).await
    }

    /// Records with `start <= time <= end`, newest first
    pub async fn get_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} >= ?1 AND {} <= ?2 ORDER BY {} DESC",
            R::COLUMNS,
            R::TABLE,
            R::TIME_COLUMN,
            R::TIME_COLUMN,
            R::TIME_COLUMN
        );
        self.query(sql, vec![R::time_param(start), R::time_param(end)])
            .await
    }

    pub async fn find(&self, key: R::Key) -> Result<Option<R>, StoreError> {
        self.store
            .call(move |conn| find_by_key::<R>(conn, &key))
            .await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", R::TABLE);
        self.store
            .call(move |conn| {
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
    }

    /// Remove every row; returns how many were deleted
    pub async fn delete_all(&self) -> Result<usize, StoreError> {
        let sql = format!("DELETE FROM {}", R::TABLE);
        let deleted = self
            .store
            .call(move |conn| Ok(conn.execute(&sql, [])?))
            .await?;
        log::info!("{}: deleted {} rows", R::TABLE, deleted);
        Ok(deleted)
    }

    pub(crate) async fn query(&self, sql: String, params: Vec<Value>) -> Result<Vec<R>, StoreError> {
        self.store
            .call(move |conn| query_records::<R>(conn, &sql, params))
            .await
    }
}

impl<R: DailyRecord> TimeSeriesRepository<R> {
    /// Insert or update each row, skipping rows whose stored totals are identical
    ///
    /// Returns how many rows were actually written.
    pub async fn upsert_changed(&self, rows: Vec<R>) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let total = rows.len();
        let changed = self
            .store
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut changed = 0;
                for row in &rows {
                    if let Some(existing) = find_by_key::<R>(&tx, &row.key())? {
                        if existing.same_totals(row) {
                            continue;
                        }
                    }
                    row.upsert(&tx)?;
                    changed += 1;
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;

        log::debug!("{}: {} of {} days changed", R::TABLE, changed, total);
        Ok(changed)
    }
}

pub(crate) fn query_records<R: TimeSeriesRecord>(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<R>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut records = stmt
        .query_map(params_from_iter(params), |row| R::from_row(row))?
        .collect::<rusqlite::Result<Vec<R>>>()?;
    R::load_children(conn, &mut records)?;
    Ok(records)
}

fn find_by_key<R: TimeSeriesRecord>(conn: &Connection, key: &R::Key) -> Result<Option<R>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        R::COLUMNS,
        R::TABLE,
        R::KEY_PREDICATE
    );
    Ok(query_records::<R>(conn, &sql, R::key_params(key))?
        .into_iter()
        .next())
}

/// Keys of `batch` already present in the table
fn existing_keys<R: TimeSeriesRecord>(
    conn: &Connection,
    batch: &[R],
) -> Result<HashSet<R::Key>, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", R::TABLE, R::KEY_PREDICATE);
    let mut stmt = conn.prepare_cached(&sql)?;

    let mut existing = HashSet::new();
    for record in batch {
        let key = record.key();
        if existing.contains(&key) {
            continue;
        }
        let count: i64 = stmt.query_row(params_from_iter(R::key_params(&key)), |row| row.get(0))?;
        if count > 0 {
            existing.insert(key);
        }
    }
    Ok(existing)
}

fn start_of_local_day() -> DateTime<Utc> {
    let now = Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}
