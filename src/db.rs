//! SQLite connection setup and schema migrations for the local store.
//!
//! Uses rusqlite with WAL mode. Migrations are additive only: a version bump
//! may add tables, columns and indices but never drops a collection, so data
//! queued offline survives an application upgrade.

use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use tracing::{error, info};

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Open the database file and apply pragmas.
pub fn open_and_configure(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Open a private in-memory database (tests, ephemeral terminals).
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Read the applied schema version (0 for a fresh database).
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
///
/// Safe to call repeatedly: each step is guarded both by the recorded
/// version and by `IF NOT EXISTS` / column checks.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current = schema_version(conn)?;
    if current >= CURRENT_SCHEMA_VERSION {
        info!("Local store schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating local store from v{current} to v{CURRENT_SCHEMA_VERSION}");

    let steps: [(i32, fn(&Connection) -> rusqlite::Result<()>); 3] =
        [(1, migrate_v1), (2, migrate_v2), (3, migrate_v3)];

    for (version, step) in steps {
        if current >= version {
            continue;
        }
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        step(&tx).map_err(|e| {
            error!("Migration v{version} failed: {e}");
            e
        })?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Migration v1: orders, payments and config collections.
fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            synchronized INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_synchronized ON orders(synchronized);
        CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);

        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            synchronized INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_synchronized ON payments(synchronized);

        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;

    info!("Applied migration v1 (orders, payments, config)");
    Ok(())
}

/// Migration v2: cash sessions, plus an `order_id` index on payments.
///
/// Payments written by v1 only carry the order reference inside the JSON
/// body, so the new column is backfilled from it.
fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cash_sessions (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cash_sessions_status ON cash_sessions(status);

        -- At most one open till per store.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_cash_sessions_single_open
            ON cash_sessions(status)
            WHERE status = 'open';
        ",
    )?;

    if !column_exists(conn, "payments", "order_id")? {
        conn.execute_batch("ALTER TABLE payments ADD COLUMN order_id TEXT;")?;
    }

    conn.execute_batch(
        "
        UPDATE payments
           SET order_id = json_extract(data, '$.order_id')
         WHERE order_id IS NULL;
        CREATE INDEX IF NOT EXISTS idx_payments_order_id ON payments(order_id);
        ",
    )?;

    info!("Applied migration v2 (cash sessions, payments.order_id)");
    Ok(())
}

/// Migration v3: rejection ledger and cash session sync flag.
fn migrate_v3(conn: &Connection) -> rusqlite::Result<()> {
    if !column_exists(conn, "cash_sessions", "synchronized")? {
        conn.execute_batch(
            "ALTER TABLE cash_sessions ADD COLUMN synchronized INTEGER NOT NULL DEFAULT 0;",
        )?;
    }

    conn.execute_batch(
        "
        UPDATE cash_sessions
           SET synchronized = COALESCE(json_extract(data, '$.synchronized'), 0);
        CREATE INDEX IF NOT EXISTS idx_cash_sessions_synchronized
            ON cash_sessions(synchronized);

        CREATE TABLE IF NOT EXISTS sync_rejections (
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            http_status INTEGER,
            message TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            rejected_at TEXT NOT NULL,
            PRIMARY KEY (collection, record_id)
        );
        ",
    )?;

    info!("Applied migration v3 (sync rejection ledger)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// ===========================================================================
// Tests
// ===========================================================================
