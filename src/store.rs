//! Local record store.
//!
//! Named collections of JSON records, each keyed by its identity and carrying
//! a fixed set of secondary index columns derived from the record on every
//! write. All operations are `async`: the blocking SQLite work runs on the
//! tokio blocking pool inside one transaction scoped to a single collection.
//! Cross-collection invariants are the caller's job.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Collections and records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Orders,
    Payments,
    CashSessions,
    Config,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Orders => "orders",
            Collection::Payments => "payments",
            Collection::CashSessions => "cash_sessions",
            Collection::Config => "config",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Collection::Config => "key",
            _ => "id",
        }
    }

    /// Secondary index columns, in the order `Record::index_values` yields them.
    pub fn indexes(&self) -> &'static [&'static str] {
        match self {
            Collection::Orders => &["synchronized"],
            Collection::Payments => &["synchronized", "order_id"],
            Collection::CashSessions => &["status", "synchronized"],
            Collection::Config => &[],
        }
    }

    fn from_table(table: &str) -> Option<Self> {
        match table {
            "orders" => Some(Collection::Orders),
            "payments" => Some(Collection::Payments),
            "cash_sessions" => Some(Collection::CashSessions),
            "config" => Some(Collection::Config),
            _ => None,
        }
    }

    fn index_column(&self, index: &str) -> Result<&'static str, StoreError> {
        self.indexes()
            .iter()
            .copied()
            .find(|column| *column == index)
            .ok_or_else(|| StoreError::UnknownIndex {
                collection: *self,
                index: index.to_string(),
            })
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Value stored in (and matched against) a secondary index column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Text(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Text(v)
    }
}

impl ToSql for IndexValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            IndexValue::Bool(b) => Ok(ToSqlOutput::from(i64::from(*b))),
            IndexValue::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

/// A record type persisted in one collection.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    const COLLECTION: Collection;

    /// Identity. An empty key means "not assigned yet".
    fn key(&self) -> &str;

    fn set_key(&mut self, key: String);

    /// One value per entry of `COLLECTION.indexes()`.
    fn index_values(&self) -> Vec<IndexValue>;

    /// Creation time used for ordering; defaults to the time of first write.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Permanent remote rejection recorded for operator visibility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub collection: Collection,
    pub record_id: String,
    pub http_status: Option<u16>,
    pub message: String,
    /// Record body as it was when rejected.
    #[serde(skip)]
    pub payload: String,
    pub attempts: u32,
    pub rejected_at: DateTime<Utc>,
}

pub(crate) fn sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoreInner {
    conn: Mutex<Connection>,
    path: PathBuf,
}

/// Handle to the local database. Cheap to clone; construct once per
/// application instance and pass it to whoever needs it.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Upsert,
}

impl LocalStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        info!("Opening local store at {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::StorageUnavailable {
                    path: path.clone(),
                    reason: format!("create data dir: {e}"),
                })?;
            }
        }

        let conn = db::open_and_configure(&path).map_err(|e| StoreError::StorageUnavailable {
            path: path.clone(),
            reason: format!("sqlite open: {e}"),
        })?;

        let store = Self::from_connection(conn, path);
        store.initialize().await?;
        Ok(store)
    }

    /// Private in-memory store, migrated and ready.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let path = PathBuf::from(":memory:");
        let conn = db::open_in_memory().map_err(|e| StoreError::StorageUnavailable {
            path: path.clone(),
            reason: format!("sqlite open: {e}"),
        })?;
        let store = Self::from_connection(conn, path);
        store.initialize().await?;
        Ok(store)
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                path,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Create collections and indices if absent. Idempotent.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let path = self.inner.path.clone();
        self.run(move |conn| {
            db::run_migrations(conn).map_err(|e| StoreError::StorageUnavailable {
                path,
                reason: format!("schema migration: {e}"),
            })?;
            let version = db::schema_version(conn)?;
            debug!(version, "Local store initialized");
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner
                .conn
                .lock()
                .map_err(|_| StoreError::Worker("connection mutex poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }

    /// Persist a new record, assigning a generated key when it has none.
    pub async fn insert<R: Record>(&self, mut record: R) -> Result<String, StoreError> {
        if record.key().is_empty() {
            record.set_key(Uuid::new_v4().to_string());
        }
        let key = record.key().to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            write_record(&tx, &record, WriteMode::Insert)?;
            tx.commit()?;
            Ok(key)
        })
        .await
    }

    /// Full-record upsert keyed by identity.
    pub async fn update<R: Record>(&self, mut record: R) -> Result<(), StoreError> {
        if record.key().is_empty() {
            record.set_key(Uuid::new_v4().to_string());
        }
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            write_record(&tx, &record, WriteMode::Upsert)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Atomic read-modify-write of one record.
    ///
    /// Returns `Ok(None)` when the record does not exist. When `f` fails the
    /// transaction is rolled back and the stored record is left as it was.
    pub async fn modify<R, T, E, F>(&self, id: &str, f: F) -> Result<Option<T>, E>
    where
        R: Record,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut R) -> Result<T, E> + Send + 'static,
    {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::from)?;
            let Some(mut record) = read_one::<R>(&tx, &id)? else {
                return Ok(None);
            };
            let out = f(&mut record)?;
            record.set_key(id);
            write_record(&tx, &record, WriteMode::Upsert)?;
            tx.commit().map_err(StoreError::from)?;
            Ok(Some(out))
        })
        .await
    }

    /// Like [`LocalStore::modify`], but `f` also runs when the record is
    /// missing and returns the record to store.
    pub async fn upsert_with<R, T, E, F>(&self, id: &str, f: F) -> Result<T, E>
    where
        R: Record,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(Option<R>) -> Result<(R, T), E> + Send + 'static,
    {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::from)?;
            let current = read_one::<R>(&tx, &id)?;
            let (mut record, out) = f(current)?;
            record.set_key(id);
            write_record(&tx, &record, WriteMode::Upsert)?;
            tx.commit().map_err(StoreError::from)?;
            Ok(out)
        })
        .await
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| read_one::<R>(conn, &id)).await
    }

    /// Every record of the collection, oldest first.
    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        self.run(move |conn| {
            let c = R::COLLECTION;
            let sql = format!(
                "SELECT data FROM {} ORDER BY created_at ASC, rowid ASC",
                c.table()
            );
            read_many::<R>(conn, &sql, &[])
        })
        .await
    }

    /// Records whose index column equals `value`, oldest first.
    pub async fn get_by_index<R: Record>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> Result<Vec<R>, StoreError> {
        let c = R::COLLECTION;
        let column = c.index_column(index)?;
        let value = value.into();
        self.run(move |conn| {
            let sql = format!(
                "SELECT data FROM {} WHERE {column} = ?1 ORDER BY created_at ASC, rowid ASC",
                c.table()
            );
            read_many::<R>(conn, &sql, &[&value])
        })
        .await
    }

    pub async fn count_by_index<R: Record>(
        &self,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> Result<usize, StoreError> {
        let c = R::COLLECTION;
        let column = c.index_column(index)?;
        let value = value.into();
        self.run(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {column} = ?1", c.table());
            let count: i64 = conn.query_row(&sql, params![value], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Delete a record. Returns whether it existed.
    pub async fn remove<R: Record>(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let c = R::COLLECTION;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let deleted = tx.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", c.table(), c.key_column()),
                params![id],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Rejection ledger
    // -----------------------------------------------------------------------

    /// Record (or refresh) a permanent rejection for a record.
    pub async fn record_rejection(
        &self,
        collection: Collection,
        record_id: &str,
        http_status: Option<u16>,
        message: &str,
        payload: &str,
    ) -> Result<(), StoreError> {
        let record_id = record_id.to_string();
        let message = message.to_string();
        let payload = payload.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_rejections
                    (collection, record_id, http_status, message, payload, attempts, rejected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                 ON CONFLICT(collection, record_id) DO UPDATE SET
                    http_status = excluded.http_status,
                    message = excluded.message,
                    payload = excluded.payload,
                    attempts = sync_rejections.attempts + 1,
                    rejected_at = excluded.rejected_at",
                params![
                    collection.table(),
                    record_id,
                    http_status,
                    message,
                    payload,
                    sql_timestamp(Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn rejection_for(
        &self,
        collection: Collection,
        record_id: &str,
    ) -> Result<Option<Rejection>, StoreError> {
        let record_id = record_id.to_string();
        self.run(move |conn| {
            let mut rows = read_rejections(
                conn,
                "WHERE collection = ?1 AND record_id = ?2",
                params![collection.table(), record_id],
            )?;
            Ok(rows.pop())
        })
        .await
    }

    pub async fn clear_rejection(
        &self,
        collection: Collection,
        record_id: &str,
    ) -> Result<bool, StoreError> {
        let record_id = record_id.to_string();
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM sync_rejections WHERE collection = ?1 AND record_id = ?2",
                params![collection.table(), record_id],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    /// All recorded rejections, most recent first.
    pub async fn rejections(&self) -> Result<Vec<Rejection>, StoreError> {
        self.run(move |conn| read_rejections(conn, "", [])).await
    }
}

fn write_record<R: Record>(conn: &Connection, record: &R, mode: WriteMode) -> Result<(), StoreError> {
    let c = R::COLLECTION;
    let indexes = c.indexes();
    let values = record.index_values();
    debug_assert_eq!(indexes.len(), values.len(), "index values for {c}");

    let key = record.key().to_string();
    let data = serde_json::to_string(record)?;
    let now = sql_timestamp(Utc::now());
    let created_at = record
        .created_at()
        .map(sql_timestamp)
        .unwrap_or_else(|| now.clone());

    let mut columns = vec![c.key_column(), "data", "created_at", "updated_at"];
    columns.extend_from_slice(indexes);
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        c.table(),
        columns.join(", "),
        placeholders.join(", ")
    );
    if mode == WriteMode::Upsert {
        let mut updates = vec![
            "data = excluded.data".to_string(),
            "updated_at = excluded.updated_at".to_string(),
        ];
        updates.extend(indexes.iter().map(|col| format!("{col} = excluded.{col}")));
        sql.push_str(&format!(
            " ON CONFLICT({}) DO UPDATE SET {}",
            c.key_column(),
            updates.join(", ")
        ));
    }

    let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(columns.len());
    bound.push(&key);
    bound.push(&data);
    bound.push(&created_at);
    bound.push(&now);
    for value in &values {
        bound.push(value);
    }

    conn.execute(&sql, bound.as_slice())
        .map_err(|e| match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation
                    && matches!(
                        failure.extended_code,
                        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                    ) =>
            {
                StoreError::DuplicateKey {
                    collection: c,
                    key: key.clone(),
                }
            }
            _ => StoreError::Sqlite(e),
        })?;
    Ok(())
}

fn read_one<R: Record>(conn: &Connection, id: &str) -> Result<Option<R>, StoreError> {
    let c = R::COLLECTION;
    let sql = format!("SELECT data FROM {} WHERE {} = ?1", c.table(), c.key_column());
    let data: Option<String> = conn
        .query_row(&sql, params![id], |row| row.get(0))
        .optional()?;
    match data {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn read_many<R: Record>(
    conn: &Connection,
    sql: &str,
    bound: &[&dyn ToSql],
) -> Result<Vec<R>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<String> = stmt
        .query_map(bound, |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    raw.iter()
        .map(|data| serde_json::from_str(data).map_err(StoreError::from))
        .collect()
}

fn read_rejections<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    bound: P,
) -> Result<Vec<Rejection>, StoreError> {
    let sql = format!(
        "SELECT collection, record_id, http_status, message, payload, attempts, rejected_at
         FROM sync_rejections {filter}
         ORDER BY rejected_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(bound, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<u16>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(
            |(table, record_id, http_status, message, payload, attempts, rejected_at)| {
                Some(Rejection {
                    collection: Collection::from_table(&table)?,
                    record_id,
                    http_status,
                    message,
                    payload,
                    attempts,
                    rejected_at: parse_timestamp(&rejected_at),
                })
            },
        )
        .collect())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigEntry, Payment, PaymentMethod};
    use serde_json::json;

    fn payment(order_id: &str) -> Payment {
        Payment {
            id: String::new(),
            order_id: order_id.to_string(),
            method: PaymentMethod::Cash,
            note: None,
            created_at: Utc::now(),
            synchronized: false,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_key_and_get_round_trips() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = store.insert(payment("o-1")).await.unwrap();
        assert!(!id.is_empty());

        let loaded: Payment = store.get(&id).await.unwrap().expect("stored");
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.order_id, "o-1");
    }

    #[tokio::test]
    async fn test_insert_duplicate_key_fails() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut p = payment("o-1");
        p.id = "fixed".into();
        store.insert(p.clone()).await.unwrap();

        let err = store.insert(p).await.unwrap_err();
        assert!(
            matches!(err, StoreError::DuplicateKey { collection: Collection::Payments, ref key } if key == "fixed"),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_missing_records_are_not_errors() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let missing: Option<Payment> = store.get("nope").await.unwrap();
        assert!(missing.is_none());
        let all: Vec<Payment> = store.get_all().await.unwrap();
        assert!(all.is_empty());
        let none: Vec<Payment> = store.get_by_index("order_id", "nope").await.unwrap();
        assert!(none.is_empty());
        assert!(!store.remove::<Payment>("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_by_index_filters_and_orders_by_creation() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut first = payment("o-1");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = payment("o-1");
        let mut other = payment("o-2");
        other.synchronized = true;

        let second_id = store.insert(second).await.unwrap();
        let first_id = store.insert(first).await.unwrap();
        store.insert(other).await.unwrap();

        let for_order: Vec<Payment> = store.get_by_index("order_id", "o-1").await.unwrap();
        let ids: Vec<&str> = for_order.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![first_id.as_str(), second_id.as_str()]);

        let pending = store
            .count_by_index::<Payment>("synchronized", false)
            .await
            .unwrap();
        assert_eq!(pending, 2);
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = store
            .get_by_index::<Payment>("method", "cash")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownIndex { .. }));
    }

    #[tokio::test]
    async fn test_update_rewrites_body_and_index_columns() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = store.insert(payment("o-1")).await.unwrap();

        let mut loaded: Payment = store.get(&id).await.unwrap().unwrap();
        loaded.synchronized = true;
        loaded.note = Some("checked".into());
        store.update(loaded).await.unwrap();

        let pending: Vec<Payment> = store.get_by_index("synchronized", false).await.unwrap();
        assert!(pending.is_empty());
        let done: Vec<Payment> = store.get_by_index("synchronized", true).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].note.as_deref(), Some("checked"));
    }

    #[tokio::test]
    async fn test_modify_rolls_back_on_error() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let id = store.insert(payment("o-1")).await.unwrap();

        let result: Result<Option<()>, StoreError> = store
            .modify::<Payment, _, _, _>(&id, |p| {
                p.synchronized = true;
                Err(StoreError::Worker("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let loaded: Payment = store.get(&id).await.unwrap().unwrap();
        assert!(!loaded.synchronized);

        let changed = store
            .modify::<Payment, _, StoreError, _>(&id, |p| {
                p.synchronized = true;
                Ok(p.order_id.clone())
            })
            .await
            .unwrap();
        assert_eq!(changed.as_deref(), Some("o-1"));
        let loaded: Payment = store.get(&id).await.unwrap().unwrap();
        assert!(loaded.synchronized);

        let absent = store
            .modify::<Payment, _, StoreError, _>("missing", |_| Ok(()))
            .await
            .unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn test_config_collection_keyed_by_key() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let entry = ConfigEntry {
            key: "printer.width".into(),
            value: json!(48),
            updated_at: Utc::now(),
        };
        store.update(entry.clone()).await.unwrap();
        store
            .update(ConfigEntry {
                value: json!(32),
                ..entry
            })
            .await
            .unwrap();

        let all: Vec<ConfigEntry> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, json!(32));
    }

    #[tokio::test]
    async fn test_rejection_ledger_counts_attempts() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .record_rejection(Collection::Orders, "o-1", Some(422), "bad product", "{}")
            .await
            .unwrap();
        store
            .record_rejection(Collection::Orders, "o-1", Some(422), "bad product", "{}")
            .await
            .unwrap();

        let rejection = store
            .rejection_for(Collection::Orders, "o-1")
            .await
            .unwrap()
            .expect("recorded");
        assert_eq!(rejection.attempts, 2);
        assert_eq!(rejection.http_status, Some(422));
        assert_eq!(store.rejections().await.unwrap().len(), 1);

        assert!(store
            .clear_rejection(Collection::Orders, "o-1")
            .await
            .unwrap());
        assert!(store
            .rejection_for(Collection::Orders, "o-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_file_store_persists_and_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("pos.db");

        let id = {
            let store = LocalStore::open(&path).await.unwrap();
            store.initialize().await.unwrap();
            store.insert(payment("o-9")).await.unwrap()
        };

        let reopened = LocalStore::open(&path).await.unwrap();
        let loaded: Option<Payment> = reopened.get(&id).await.unwrap();
        assert_eq!(loaded.map(|p| p.order_id).as_deref(), Some("o-9"));
    }

    #[tokio::test]
    async fn test_open_reports_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = LocalStore::open(blocker.join("pos.db")).await.err().expect("open fails");
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
    }
}
