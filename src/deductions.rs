//! Automatic advance deductions triggered by piece-work output.
//!
//! When a cutting or wage entry carries a `deduct_advance_pay` amount, the
//! named operator's advance balance is reduced here. The triggering record
//! is the primary write and has already committed; posting is secondary and
//! best-effort. An unresolvable operator name is a silent no-op. A storage
//! failure lands in `deduction_retry_queue` so it can be re-applied later
//! instead of disappearing into a log line.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::DbState;
use crate::error::{LedgerError, Result};
use crate::ledger::{self, TxnKind};
use crate::staff;

/// Where a queued deduction came from.
#[derive(Debug, Clone, Copy)]
pub enum DeductionSource {
    Cutting,
    Wage,
}

impl DeductionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeductionSource::Cutting => "cutting",
            DeductionSource::Wage => "wage",
        }
    }
}

/// Post a deduction against a staff member resolved by name within a branch.
///
/// Returns `Ok(true)` when a ledger entry was appended and the balance
/// refreshed, `Ok(false)` when the name did not resolve and nothing was
/// written (the triggering entry still succeeds). Runs its own
/// transaction; the caller must not hold one open.
pub fn post_deduction(
    conn: &Connection,
    staff_name: &str,
    branch_id: &str,
    amount: f64,
) -> Result<bool> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::validation(format!(
            "deduction amount must be positive, got {amount}"
        )));
    }

    let staff_id = match staff::resolve_staff_by_name(conn, staff_name, branch_id)? {
        Some(id) => id,
        None => {
            debug!(staff_name = %staff_name, branch_id = %branch_id, "No staff match for deduction, skipping");
            return Ok(false);
        }
    };

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<()> {
        ledger::append_transaction(conn, &staff_id, branch_id, TxnKind::Deduction, amount)?;
        ledger::recompute_balance(conn, &staff_id)?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(staff_id = %staff_id, branch_id = %branch_id, amount = %amount, "Advance deduction posted");

    Ok(true)
}

/// Queue a deduction whose post failed after the primary write committed.
pub fn enqueue_failed(
    conn: &Connection,
    staff_name: &str,
    branch_id: &str,
    amount: f64,
    source: DeductionSource,
    error: &str,
) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO deduction_retry_queue (
            staff_name, branch_id, amount, source, status,
            retry_count, last_error, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)",
        params![staff_name, branch_id, amount, source.as_str(), error, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Re-attempt every pending queued deduction.
///
/// Successful posts are marked `applied`; failures bump `retry_count` and
/// flip to `failed` once `max_retries` is exhausted. Returns a summary the
/// reconciliation caller can report.
pub fn retry_pending(db: &DbState) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    type QueueRow = (i64, String, String, f64, i64, i64);
    let rows: Vec<QueueRow> = {
        let mut stmt = conn.prepare(
            "SELECT id, staff_name, branch_id, amount, retry_count, max_retries
             FROM deduction_retry_queue
             WHERE status = 'pending'
             ORDER BY created_at ASC",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?;
        mapped.filter_map(|r| r.ok()).collect()
    };

    let mut applied = 0usize;
    let mut failed = 0usize;
    let now = Utc::now().to_rfc3339();

    for (id, staff_name, branch_id, amount, retry_count, max_retries) in &rows {
        let outcome = post_deduction(&conn, staff_name, branch_id, *amount);
        match outcome {
            Ok(true) => {
                conn.execute(
                    "UPDATE deduction_retry_queue
                     SET status = 'applied', updated_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )?;
                applied += 1;
            }
            Ok(false) => {
                // Name still does not resolve; count the attempt
                record_attempt(&conn, *id, *retry_count, *max_retries, "staff name not resolvable", &now)?;
                failed += 1;
            }
            Err(e) => {
                warn!(queue_id = %id, staff_name = %staff_name, "Deduction retry failed: {e}");
                record_attempt(&conn, *id, *retry_count, *max_retries, &e.to_string(), &now)?;
                failed += 1;
            }
        }
    }

    if !rows.is_empty() {
        info!(attempted = rows.len(), applied, failed, "Deduction retry pass completed");
    }

    Ok(serde_json::json!({
        "success": true,
        "attempted": rows.len(),
        "applied": applied,
        "failed": failed,
    }))
}

fn record_attempt(
    conn: &Connection,
    id: i64,
    retry_count: i64,
    max_retries: i64,
    error: &str,
    now: &str,
) -> Result<()> {
    let next_count = retry_count + 1;
    let status = if next_count >= max_retries {
        "failed"
    } else {
        "pending"
    };
    conn.execute(
        "UPDATE deduction_retry_queue
         SET retry_count = ?1, status = ?2, last_error = ?3, updated_at = ?4
         WHERE id = ?5",
        params![next_count, status, error, now, id],
    )?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
