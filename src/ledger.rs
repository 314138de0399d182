//! Append-only transaction ledger and balance aggregation.
//!
//! `advance_transactions` is the source of truth for a staff member's
//! pending balance: advances contribute +amount, deductions contribute
//! -amount. The cached `staff.pending_balance` is always recomputed from
//! the full history, never patched incrementally, so it cannot drift.
//!
//! Functions here take a `&Connection` rather than `&DbState` so callers
//! can compose an append and the matching balance recompute inside one
//! SQLite transaction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, Result};

/// Kind of ledger entry. Sign is derived from the kind at aggregation time;
/// the stored amount is always a positive magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Advance,
    Deduction,
}

impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnKind::Advance => "advance",
            TxnKind::Deduction => "deduction",
        }
    }
}

/// Append one immutable transaction row for a staff member.
///
/// Fails with `Validation` if the amount is not a positive finite number,
/// and with `NotFound` if the (staff, branch) pair does not exist. Returns
/// the new transaction id.
pub fn append_transaction(
    conn: &Connection,
    staff_id: &str,
    branch_id: &str,
    kind: TxnKind,
    amount: f64,
) -> Result<String> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::validation(format!(
            "transaction amount must be positive, got {amount}"
        )));
    }

    let exists = conn
        .query_row(
            "SELECT 1 FROM staff WHERE id = ?1 AND branch_id = ?2",
            params![staff_id, branch_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(LedgerError::not_found(format!(
            "Staff {staff_id} in branch {branch_id}"
        )));
    }

    let txn_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO advance_transactions (id, staff_id, branch_id, kind, amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![txn_id, staff_id, branch_id, kind.as_str(), amount, now],
    )?;

    debug!(txn_id = %txn_id, staff_id = %staff_id, kind = kind.as_str(), amount = %amount, "Ledger entry appended");

    Ok(txn_id)
}

/// Signed sum over all transactions for a staff member.
///
/// Returns 0 for a staff member with no transactions; never fails on an
/// empty history.
pub fn sum_for_staff(conn: &Connection, staff_id: &str) -> Result<f64> {
    let sum: f64 = conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN kind = 'advance' THEN amount ELSE -amount END), 0.0)
         FROM advance_transactions
         WHERE staff_id = ?1",
        params![staff_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// Recompute and persist `staff.pending_balance` from the ledger.
///
/// Must be called synchronously after every append that affects the staff
/// member, inside the same transaction. Idempotent. Returns the new balance.
pub fn recompute_balance(conn: &Connection, staff_id: &str) -> Result<f64> {
    let balance = sum_for_staff(conn, staff_id)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE staff SET pending_balance = ?1, updated_at = ?2 WHERE id = ?3",
        params![balance, now, staff_id],
    )?;

    Ok(balance)
}

// ===========================================================================
// Tests
// ===========================================================================
