//! Local SQLite database layer for stitchpay.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! connection state used by every ledger operation. All read-modify-write
//! sequences (advance merging, settlement) run under this single connection
//! inside `BEGIN IMMEDIATE` transactions, so concurrent callers cannot lose
//! updates to the same staff member's balance.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Initialize the database at `{data_dir}/stitchpay.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("stitchpay.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Migration v1: staff directory and the ledger core.
///
/// `advance_transactions` is the append-only source of truth for
/// `staff.pending_balance`; `pending_advances` is the separately-tracked
/// open tab that the settlement processor pays down; `paid_records` is the
/// immutable receipt trail of settlement events.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- staff (directory + cached pending balance)
        CREATE TABLE IF NOT EXISTS staff (
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            aadhar_number TEXT,
            pan_number TEXT,
            mobile_number TEXT,
            pending_balance REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- advance_transactions (append-only ledger)
        CREATE TABLE IF NOT EXISTS advance_transactions (
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('advance', 'deduction')),
            amount REAL NOT NULL CHECK (amount > 0),
            created_at TEXT NOT NULL,
            FOREIGN KEY(staff_id) REFERENCES staff(id)
        );

        -- pending_advances (open, unsettled advance per staff member)
        CREATE TABLE IF NOT EXISTS pending_advances (
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            staff_name TEXT NOT NULL,
            aadhar_number TEXT,
            pan_number TEXT,
            mobile_number TEXT,
            amount REAL NOT NULL CHECK (amount >= 0),
            payment_method TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(staff_id) REFERENCES staff(id)
        );

        -- paid_records (immutable settlement receipts)
        CREATE TABLE IF NOT EXISTS paid_records (
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            staff_name TEXT NOT NULL,
            aadhar_number TEXT,
            pan_number TEXT,
            mobile_number TEXT,
            amount_paid REAL NOT NULL CHECK (amount_paid > 0),
            payment_method TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_staff_branch_id ON staff(branch_id);
        CREATE INDEX IF NOT EXISTS idx_staff_branch_name ON staff(branch_id, full_name);
        CREATE INDEX IF NOT EXISTS idx_advance_txn_staff_id ON advance_transactions(staff_id);
        CREATE INDEX IF NOT EXISTS idx_pending_advances_branch ON pending_advances(branch_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_paid_records_branch ON paid_records(branch_id, created_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1 (staff + ledger tables)");
    Ok(())
}

/// Migration v2: enforce at most one open advance per (staff, branch).
///
/// The merge path in advance intake relies on this; the legacy schema only
/// assumed it from the lookup pattern.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_advances_staff_branch_unique
            ON pending_advances(staff_id, branch_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (pending advance uniqueness)");
    Ok(())
}

/// Migration v3: piece-work tables (cutting entries and wages).
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- cutting_entries (piece-work output records)
        CREATE TABLE IF NOT EXISTS cutting_entries (
            id TEXT PRIMARY KEY,
            inward_number TEXT NOT NULL,
            cutting_master TEXT NOT NULL,
            product_name TEXT NOT NULL,
            fabric_type TEXT NOT NULL,
            weight_of_fabric REAL NOT NULL,
            size_wise_entry TEXT NOT NULL DEFAULT '{}',
            total_pcs INTEGER NOT NULL,
            gross_amount REAL NOT NULL,
            deduct_advance_pay REAL NOT NULL DEFAULT 0,
            payable_amount REAL NOT NULL,
            payment_type TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- wages (per-operation wage payouts)
        CREATE TABLE IF NOT EXISTS wages (
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            product_name TEXT,
            operation_name TEXT,
            staff_name TEXT,
            overlock_operator TEXT,
            flatlock_operator TEXT,
            size_wise_entry TEXT NOT NULL DEFAULT '{}',
            extra_pieces INTEGER NOT NULL DEFAULT 0,
            total_pieces INTEGER NOT NULL DEFAULT 0,
            gross_amount REAL NOT NULL DEFAULT 0,
            deduct_advance_pay REAL NOT NULL DEFAULT 0,
            payable_amount REAL NOT NULL DEFAULT 0,
            overlock_gross_amount REAL NOT NULL DEFAULT 0,
            overlock_deduct_advance REAL NOT NULL DEFAULT 0,
            overlock_payable_amount REAL NOT NULL DEFAULT 0,
            flatlock_gross_amount REAL NOT NULL DEFAULT 0,
            flatlock_deduct_advance REAL NOT NULL DEFAULT 0,
            flatlock_payable_amount REAL NOT NULL DEFAULT 0,
            payment_type TEXT,
            created_at TEXT NOT NULL
        );

        -- Indexes for branch-scoped listing
        CREATE INDEX IF NOT EXISTS idx_cutting_entries_branch ON cutting_entries(branch_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_cutting_entries_master ON cutting_entries(branch_id, cutting_master);
        CREATE INDEX IF NOT EXISTS idx_wages_branch_operation ON wages(branch_id, operation_name);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        e
    })?;

    info!("Applied migration v3 (cutting_entries + wages tables)");
    Ok(())
}

/// Migration v4: retry queue for failed deduction posts.
///
/// A deduction that fails after its triggering piece-work record committed
/// lands here instead of vanishing into a log line. `retry_pending` drains
/// the queue until rows apply or exhaust `max_retries`.
fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- deduction_retry_queue (reconciliation channel)
        CREATE TABLE IF NOT EXISTS deduction_retry_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            staff_name TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            amount REAL NOT NULL,
            source TEXT NOT NULL CHECK (source IN ('cutting', 'wage')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'applied', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_deduction_retry_status
            ON deduction_retry_queue(status);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| {
        error!("Migration v4 failed: {e}");
        e
    })?;

    info!("Applied migration v4 (deduction_retry_queue table)");
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
