//! Advance intake and settlement for staff members.
//!
//! An advance is money handed to a staff member ahead of work. Each staff
//! member carries at most one open advance per branch (`pending_advances`);
//! granting again merges into it. Settling pays the tab down: a
//! `paid_records` receipt is written and the pending row shrinks or goes
//! away. Every grant also appends to the transaction ledger and refreshes
//! the cached staff balance in the same SQLite transaction.
//!
//! **Rules:**
//! - Amounts must be positive; numeric strings from the transport are parsed
//! - A grant merges into the existing open advance (created_at unchanged)
//! - Settlement inserts the receipt and mutates the tab atomically
//! - Overpayment is accepted and the excess absorbed (legacy contract)

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{LedgerError, Result};
use crate::ledger::{self, TxnKind};
use crate::{value_f64, value_str};

// ---------------------------------------------------------------------------
// Grant advance
// ---------------------------------------------------------------------------

/// Record a new advance for a staff member, merging into any open one.
///
/// Appends an `advance` ledger transaction, refreshes the cached balance,
/// and creates or tops up the `pending_advances` row, all in one
/// transaction. The `merged` flag in the response distinguishes top-up from
/// creation; callers use it for messaging only.
pub fn grant_advance(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let staff_id = value_str(payload, &["staffId", "staff_id"])
        .ok_or_else(|| LedgerError::validation("Missing staffId"))?;
    let staff_name = value_str(payload, &["staffName", "staff_name"])
        .ok_or_else(|| LedgerError::validation("Missing staffName"))?;
    let amount = value_f64(payload, &["amount"])
        .ok_or_else(|| LedgerError::validation("Missing amount"))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::validation("Amount must be positive"));
    }
    let payment_method = value_str(payload, &["paymentMethod", "payment_method"])
        .ok_or_else(|| LedgerError::validation("Missing paymentMethod"))?;
    let payment_date = value_str(payload, &["paymentDate", "payment_date"])
        .ok_or_else(|| LedgerError::validation("Missing paymentDate"))?;
    let branch_id = value_str(payload, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;
    let aadhar_number = value_str(payload, &["aadharNumber", "aadhar_number"]);
    let pan_number = value_str(payload, &["panNumber", "pan_number"]);
    let mobile_number = value_str(payload, &["mobileNumber", "mobile_number"]);

    let now = Utc::now().to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(bool, String)> {
        // Check for an open advance to merge into
        let existing: Option<(String, f64)> = conn
            .query_row(
                "SELECT id, amount FROM pending_advances WHERE staff_id = ?1 AND branch_id = ?2",
                params![staff_id, branch_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (merged, pending_id) = match existing {
            Some((pending_id, existing_amount)) => {
                // Decimal addition on parsed numbers; created_at stays as-is
                let new_amount = existing_amount + amount;
                conn.execute(
                    "UPDATE pending_advances SET amount = ?1 WHERE id = ?2",
                    params![new_amount, pending_id],
                )?;
                (true, pending_id)
            }
            None => {
                let pending_id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO pending_advances (
                        id, staff_id, branch_id, staff_name, aadhar_number,
                        pan_number, mobile_number, amount, payment_method,
                        payment_date, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        pending_id,
                        staff_id,
                        branch_id,
                        staff_name,
                        aadhar_number,
                        pan_number,
                        mobile_number,
                        amount,
                        payment_method,
                        payment_date,
                        now,
                    ],
                )?;
                (false, pending_id)
            }
        };

        // Ledger is the source of truth for the balance; append + recompute
        // ride in the same transaction as the tab update.
        ledger::append_transaction(&conn, &staff_id, &branch_id, TxnKind::Advance, amount)?;
        ledger::recompute_balance(&conn, &staff_id)?;

        Ok((merged, pending_id))
    })();

    let (merged, pending_id) = match result {
        Ok(v) => {
            conn.execute_batch("COMMIT")?;
            v
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        staff_id = %staff_id,
        branch_id = %branch_id,
        amount = %amount,
        merged = merged,
        "Advance granted"
    );

    let message = if merged {
        "Advance payment updated successfully!"
    } else {
        "Advance payment recorded successfully!"
    };

    Ok(serde_json::json!({
        "success": true,
        "message": message,
        "merged": merged,
        "pendingAdvanceId": pending_id,
    }))
}

// ---------------------------------------------------------------------------
// Settle
// ---------------------------------------------------------------------------

/// Apply a payment against an open advance.
///
/// Writes an immutable `paid_records` receipt and reduces the pending
/// amount, deleting the row when it reaches zero. Both writes commit in one
/// transaction, so a failure can never leave a receipt without the matching
/// reduction.
pub fn settle(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let payment_id = value_str(payload, &["paymentId", "payment_id"])
        .ok_or_else(|| LedgerError::validation("Missing paymentId"))?;
    let amount_paid = value_f64(payload, &["amountPaid", "amount_paid"])
        .ok_or_else(|| LedgerError::validation("Missing amountPaid"))?;
    if !amount_paid.is_finite() || amount_paid <= 0.0 {
        return Err(LedgerError::validation("amountPaid must be positive"));
    }
    let branch_id = value_str(payload, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;

    let now = Utc::now().to_rfc3339();
    let paid_id = Uuid::new_v4().to_string();

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(f64, bool)> {
        // Row is read inside the transaction so two settlements against the
        // same advance cannot race on the same outstanding amount.
        type PendingRow = (
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            f64,
            String,
        );
        let row: Option<PendingRow> = conn
            .query_row(
                "SELECT staff_id, staff_name, aadhar_number, pan_number,
                        mobile_number, amount, payment_method
                 FROM pending_advances
                 WHERE id = ?1 AND branch_id = ?2",
                params![payment_id, branch_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        let (staff_id, staff_name, aadhar, pan, mobile, outstanding, method) =
            row.ok_or_else(|| LedgerError::not_found("Pending payment"))?;

        let remaining = outstanding - amount_paid;

        conn.execute(
            "INSERT INTO paid_records (
                id, staff_id, branch_id, staff_name, aadhar_number,
                pan_number, mobile_number, amount_paid, payment_method,
                payment_date, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                paid_id,
                staff_id,
                branch_id,
                staff_name,
                aadhar,
                pan,
                mobile,
                amount_paid,
                method,
                now,
            ],
        )?;

        // Epsilon only absorbs binary-fraction dust from f64 subtraction;
        // any real residual, however small, keeps the tab open.
        let fully_settled = remaining <= 1e-9;
        if fully_settled {
            if remaining < -1e-9 {
                warn!(
                    payment_id = %payment_id,
                    outstanding = %outstanding,
                    amount_paid = %amount_paid,
                    "Overpayment accepted, excess absorbed"
                );
            }
            conn.execute(
                "DELETE FROM pending_advances WHERE id = ?1",
                params![payment_id],
            )?;
        } else {
            conn.execute(
                "UPDATE pending_advances SET amount = ?1 WHERE id = ?2",
                params![remaining, payment_id],
            )?;
        }

        Ok((remaining, fully_settled))
    })();

    let (remaining, fully_settled) = match result {
        Ok(v) => {
            conn.execute_batch("COMMIT")?;
            v
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        payment_id = %payment_id,
        amount_paid = %amount_paid,
        fully_settled = fully_settled,
        "Settlement recorded"
    );

    Ok(serde_json::json!({
        "success": true,
        "message": "Payment successfully recorded.",
        "paidRecordId": paid_id,
        "fullySettled": fully_settled,
        "remainingAmount": if fully_settled { 0.0 } else { remaining },
    }))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// All open advances for a branch, newest first.
pub fn list_pending(db: &DbState, branch_id: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let mut stmt = conn.prepare(
        "SELECT id, staff_id, staff_name, aadhar_number, pan_number,
                mobile_number, amount, payment_method, payment_date, created_at
         FROM pending_advances
         WHERE branch_id = ?1
         ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![branch_id], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "staffId": row.get::<_, String>(1)?,
            "staffName": row.get::<_, String>(2)?,
            "aadharNumber": row.get::<_, Option<String>>(3)?,
            "panNumber": row.get::<_, Option<String>>(4)?,
            "mobileNumber": row.get::<_, Option<String>>(5)?,
            "amount": row.get::<_, f64>(6)?,
            "paymentMethod": row.get::<_, String>(7)?,
            "paymentDate": row.get::<_, String>(8)?,
            "createdAt": row.get::<_, String>(9)?,
        }))
    })?;

    let pending: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(pending))
}

/// All settlement receipts for a branch, newest first.
pub fn list_paid(db: &DbState, branch_id: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let mut stmt = conn.prepare(
        "SELECT id, staff_id, staff_name, aadhar_number, pan_number,
                mobile_number, amount_paid, payment_method, payment_date, created_at
         FROM paid_records
         WHERE branch_id = ?1
         ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![branch_id], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "staffId": row.get::<_, String>(1)?,
            "staffName": row.get::<_, String>(2)?,
            "aadharNumber": row.get::<_, Option<String>>(3)?,
            "panNumber": row.get::<_, Option<String>>(4)?,
            "mobileNumber": row.get::<_, Option<String>>(5)?,
            "amountPaid": row.get::<_, f64>(6)?,
            "paymentMethod": row.get::<_, String>(7)?,
            "paymentDate": row.get::<_, String>(8)?,
            "createdAt": row.get::<_, String>(9)?,
        }))
    })?;

    let paid: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(paid))
}

/// One open advance by id within a branch.
pub fn get_advance(db: &DbState, payment_id: &str, branch_id: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    conn.query_row(
        "SELECT id, staff_id, staff_name, aadhar_number, pan_number,
                mobile_number, amount, payment_method, payment_date, created_at
         FROM pending_advances
         WHERE id = ?1 AND branch_id = ?2",
        params![payment_id, branch_id],
        |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "staffId": row.get::<_, String>(1)?,
                "staffName": row.get::<_, String>(2)?,
                "aadharNumber": row.get::<_, Option<String>>(3)?,
                "panNumber": row.get::<_, Option<String>>(4)?,
                "mobileNumber": row.get::<_, Option<String>>(5)?,
                "amount": row.get::<_, f64>(6)?,
                "paymentMethod": row.get::<_, String>(7)?,
                "paymentDate": row.get::<_, String>(8)?,
                "createdAt": row.get::<_, String>(9)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("Payment record"))
}

/// Current pending balance for one staff member.
///
/// Computed from the transaction ledger (not the open tab), so the figure
/// cannot drift from the source of truth. 0 when no transactions exist.
pub fn get_pending_balance(db: &DbState, staff_id: &str, branch_id: &str) -> Result<Value> {
    if staff_id.trim().is_empty() {
        return Err(LedgerError::validation("staff_id is required"));
    }
    if branch_id.trim().is_empty() {
        return Err(LedgerError::validation("branch_id is required"));
    }

    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
    let balance = ledger::sum_for_staff(&conn, staff_id)?;

    Ok(serde_json::json!({
        "success": true,
        "pendingBalance": balance,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::staff;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn seed_staff(db: &DbState, branch: &str, name: &str) -> String {
        let created = staff::create_staff(
            db,
            &serde_json::json!({ "branchId": branch, "fullName": name }),
        )
        .expect("create staff");
        created["staffId"].as_str().unwrap().to_string()
    }

    fn grant(db: &DbState, staff_id: &str, branch: &str, amount: f64) -> Value {
        grant_advance(
            db,
            &serde_json::json!({
                "staffId": staff_id,
                "staffName": "Ravi Kumar",
                "amount": amount,
                "paymentMethod": "cash",
                "paymentDate": "2026-08-15",
                "branchId": branch,
            }),
        )
        .expect("grant_advance")
    }

    #[test]
    fn test_grant_creates_single_pending_advance() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        let result = grant(&db, &staff_id, "b1", 500.0);
        assert_eq!(result["success"], true);
        assert_eq!(result["merged"], false);

        let pending = list_pending(&db, "b1").unwrap();
        let arr = pending.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["amount"], 500.0);
    }

    #[test]
    fn test_second_grant_merges_not_duplicates() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        let first = grant(&db, &staff_id, "b1", 500.0);
        let second = grant(&db, &staff_id, "b1", 200.0);
        assert_eq!(second["merged"], true);
        assert_eq!(second["pendingAdvanceId"], first["pendingAdvanceId"]);

        let pending = list_pending(&db, "b1").unwrap();
        let arr = pending.as_array().unwrap();
        assert_eq!(arr.len(), 1, "no second row should be created");
        assert_eq!(arr[0]["amount"], 700.0);
    }

    #[test]
    fn test_grant_accepts_amount_as_numeric_string() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        grant(&db, &staff_id, "b1", 500.0);
        // String amount from the transport must be added, not concatenated
        grant_advance(
            &db,
            &serde_json::json!({
                "staffId": staff_id,
                "staffName": "Ravi Kumar",
                "amount": "200",
                "paymentMethod": "cash",
                "paymentDate": "2026-08-16",
                "branchId": "b1",
            }),
        )
        .unwrap();

        let pending = list_pending(&db, "b1").unwrap();
        assert_eq!(pending[0]["amount"], 700.0);
    }

    #[test]
    fn test_grant_validation_errors() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        let missing_method = grant_advance(
            &db,
            &serde_json::json!({
                "staffId": staff_id,
                "staffName": "Ravi Kumar",
                "amount": 100.0,
                "paymentDate": "2026-08-15",
                "branchId": "b1",
            }),
        );
        assert!(matches!(missing_method, Err(LedgerError::Validation(_))));

        let negative = grant_advance(
            &db,
            &serde_json::json!({
                "staffId": staff_id,
                "staffName": "Ravi Kumar",
                "amount": -5.0,
                "paymentMethod": "cash",
                "paymentDate": "2026-08-15",
                "branchId": "b1",
            }),
        );
        assert!(matches!(negative, Err(LedgerError::Validation(_))));

        // No partial state left behind
        let pending = list_pending(&db, "b1").unwrap();
        assert_eq!(pending.as_array().unwrap().len(), 0);
        assert_eq!(get_pending_balance(&db, &staff_id, "b1").unwrap()["pendingBalance"], 0.0);
    }

    #[test]
    fn test_grant_unknown_staff_leaves_no_partial_state() {
        let db = test_db();

        let result = grant_advance(
            &db,
            &serde_json::json!({
                "staffId": "st-ghost",
                "staffName": "Ghost",
                "amount": 100.0,
                "paymentMethod": "cash",
                "paymentDate": "2026-08-15",
                "branchId": "b1",
            }),
        );
        assert!(matches!(result, Err(LedgerError::NotFound(_))));

        // The pending insert rolled back with the failed ledger append
        let pending = list_pending(&db, "b1").unwrap();
        assert_eq!(pending.as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_grant_updates_ledger_and_balance() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        grant(&db, &staff_id, "b1", 500.0);
        grant(&db, &staff_id, "b1", 200.0);

        let balance = get_pending_balance(&db, &staff_id, "b1").unwrap();
        assert_eq!(balance["pendingBalance"], 700.0);

        let conn = db.conn.lock().unwrap();
        let cached: f64 = conn
            .query_row(
                "SELECT pending_balance FROM staff WHERE id = ?1",
                params![staff_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(cached, 700.0);

        let txn_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM advance_transactions WHERE staff_id = ?1 AND kind = 'advance'",
                params![staff_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(txn_count, 2, "each grant appends one ledger entry");
    }

    #[test]
    fn test_partial_settlement_reduces_outstanding() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        let granted = grant(&db, &staff_id, "b1", 700.0);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let result = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 300.0,
                "branchId": "b1",
            }),
        )
        .expect("settle");
        assert_eq!(result["success"], true);
        assert_eq!(result["fullySettled"], false);
        assert_eq!(result["remainingAmount"], 400.0);

        let pending = get_advance(&db, pending_id, "b1").unwrap();
        assert_eq!(pending["amount"], 400.0);

        let paid = list_paid(&db, "b1").unwrap();
        let arr = paid.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["amountPaid"], 300.0);
    }

    #[test]
    fn test_full_settlement_deletes_pending_row() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        let granted = grant(&db, &staff_id, "b1", 400.0);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let result = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 400.0,
                "branchId": "b1",
            }),
        )
        .unwrap();
        assert_eq!(result["fullySettled"], true);

        let gone = get_advance(&db, pending_id, "b1");
        assert!(matches!(gone, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_sub_cent_residual_keeps_tab_open() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        let granted = grant(&db, &staff_id, "b1", 500.0005);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let result = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 500.0,
                "branchId": "b1",
            }),
        )
        .unwrap();
        assert_eq!(result["fullySettled"], false, "a real residual stays owed");
        assert!(result["remainingAmount"].as_f64().unwrap() > 0.0);

        let open = get_advance(&db, pending_id, "b1").unwrap();
        assert!(open["amount"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_binary_fraction_dust_settles_fully() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        // 0.1 + 0.2 stores 0.30000000000000004; paying 0.3 leaves only dust
        let granted = grant(&db, &staff_id, "b1", 0.1);
        grant(&db, &staff_id, "b1", 0.2);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let result = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 0.3,
                "branchId": "b1",
            }),
        )
        .unwrap();
        assert_eq!(result["fullySettled"], true);
        assert_eq!(result["remainingAmount"], 0.0);

        let gone = get_advance(&db, pending_id, "b1");
        assert!(matches!(gone, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_overpayment_accepted_and_absorbed() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        let granted = grant(&db, &staff_id, "b1", 250.0);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let result = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 300.0,
                "branchId": "b1",
            }),
        )
        .expect("overpayment should not be rejected");
        assert_eq!(result["fullySettled"], true);
        assert_eq!(result["remainingAmount"], 0.0);

        // Receipt records what was actually paid
        let paid = list_paid(&db, "b1").unwrap();
        assert_eq!(paid[0]["amountPaid"], 300.0);

        let gone = get_advance(&db, pending_id, "b1");
        assert!(matches!(gone, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_settle_unknown_or_wrong_branch_is_not_found() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");
        let granted = grant(&db, &staff_id, "b1", 100.0);
        let pending_id = granted["pendingAdvanceId"].as_str().unwrap();

        let unknown = settle(
            &db,
            &serde_json::json!({
                "paymentId": "pa-missing",
                "amountPaid": 50.0,
                "branchId": "b1",
            }),
        );
        assert!(matches!(unknown, Err(LedgerError::NotFound(_))));

        // Tenant isolation: the id exists, but not in that branch
        let wrong_branch = settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id,
                "amountPaid": 50.0,
                "branchId": "b2",
            }),
        );
        assert!(matches!(wrong_branch, Err(LedgerError::NotFound(_))));

        // Failed settlements leave no receipt behind
        let paid = list_paid(&db, "b1").unwrap();
        assert_eq!(paid.as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_pending_balance_zero_without_transactions() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        let balance = get_pending_balance(&db, &staff_id, "b1").unwrap();
        assert_eq!(balance["pendingBalance"], 0.0, "no transactions means 0, not an error");
    }

    #[test]
    fn test_lists_are_branch_scoped() {
        let db = test_db();
        let s1 = seed_staff(&db, "b1", "Ravi Kumar");
        let s2 = seed_staff(&db, "b2", "Meena Devi");

        grant(&db, &s1, "b1", 500.0);
        grant_advance(
            &db,
            &serde_json::json!({
                "staffId": s2,
                "staffName": "Meena Devi",
                "amount": 900.0,
                "paymentMethod": "upi",
                "paymentDate": "2026-08-15",
                "branchId": "b2",
            }),
        )
        .unwrap();

        let b1 = list_pending(&db, "b1").unwrap();
        assert_eq!(b1.as_array().unwrap().len(), 1);
        assert_eq!(b1[0]["amount"], 500.0);

        let b2 = list_pending(&db, "b2").unwrap();
        assert_eq!(b2.as_array().unwrap().len(), 1);
        assert_eq!(b2[0]["amount"], 900.0);
    }

    /// Full lifecycle: grant 500, top up 200, settle 300, settle 400.
    #[test]
    fn test_grant_merge_settle_scenario() {
        let db = test_db();
        let staff_id = seed_staff(&db, "b1", "Ravi Kumar");

        grant(&db, &staff_id, "b1", 500.0);
        let merged = grant(&db, &staff_id, "b1", 200.0);
        let pending_id = merged["pendingAdvanceId"].as_str().unwrap().to_string();

        let pending = get_advance(&db, &pending_id, "b1").unwrap();
        assert_eq!(pending["amount"], 700.0);

        settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id, "amountPaid": 300.0, "branchId": "b1",
            }),
        )
        .unwrap();
        let pending = get_advance(&db, &pending_id, "b1").unwrap();
        assert_eq!(pending["amount"], 400.0);

        settle(
            &db,
            &serde_json::json!({
                "paymentId": pending_id, "amountPaid": 400.0, "branchId": "b1",
            }),
        )
        .unwrap();
        let gone = get_advance(&db, &pending_id, "b1");
        assert!(matches!(gone, Err(LedgerError::NotFound(_))));

        let paid = list_paid(&db, "b1").unwrap();
        let arr = paid.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        let amounts: Vec<f64> = arr.iter().map(|p| p["amountPaid"].as_f64().unwrap()).collect();
        assert!(amounts.contains(&300.0));
        assert!(amounts.contains(&400.0));
    }
}
