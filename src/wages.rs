//! Wage entries (per-operation wage payouts).
//!
//! A `singer` operation row carries up to three operators — the singer
//! plus the overlock and flatlock operators — each with their own gross /
//! deduct / payable triple. Every other operation pays a single staff
//! member. As with cutting entries, the wage row is the primary write;
//! advance deductions for the named operators are posted afterwards,
//! best-effort, and never undo the committed row.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::deductions::{self, DeductionSource};
use crate::error::{LedgerError, Result};
use crate::{value_f64, value_i64, value_str};

// ---------------------------------------------------------------------------
// Record wage entry
// ---------------------------------------------------------------------------

/// Record a wage payout from a `{ "payments": [...] }` payload.
///
/// Only the first element of `payments` is used. After the row commits,
/// a deduction is posted for each named operator with a positive deduct
/// amount; the response reports how many were posted, skipped, or queued.
pub fn record_wage_entry(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let payment = payload
        .get("payments")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| LedgerError::validation("Missing payments array"))?;

    let branch_id = value_str(payment, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;
    let operation_name = value_str(payment, &["operationName", "operation_name"])
        .ok_or_else(|| LedgerError::validation("Missing operation_name"))?;
    let staff_name = value_str(payment, &["staffName", "staff_name"])
        .ok_or_else(|| LedgerError::validation("Missing staff_name"))?;

    let is_singer = operation_name.eq_ignore_ascii_case("singer");

    let product_name = value_str(payment, &["productName", "product_name"]);
    let payment_type = value_str(payment, &["paymentType", "payment_type"]);
    let total_pieces = value_i64(payment, &["totalPieces", "total_pieces"]).unwrap_or(0);
    let extra_pieces = value_i64(payment, &["extraPieces", "extra_pieces"]).unwrap_or(0);
    let gross_amount = value_f64(payment, &["grossAmount", "gross_amount"]).unwrap_or(0.0);
    let deduct_advance_pay =
        value_f64(payment, &["deductAdvancePay", "deduct_advance_pay"]).unwrap_or(0.0);
    let payable_amount = value_f64(payment, &["payableAmount", "payable_amount"]).unwrap_or(0.0);

    // Overlock/flatlock operators only apply to singer-operation rows
    let (overlock_operator, flatlock_operator) = if is_singer {
        (
            value_str(payment, &["overlockOperator", "overlock_operator"]),
            value_str(payment, &["flatlockOperator", "flatlock_operator"]),
        )
    } else {
        (None, None)
    };
    let (overlock_gross, overlock_deduct, overlock_payable) = if is_singer {
        (
            value_f64(payment, &["overlockWages", "overlock_wages"]).unwrap_or(0.0),
            value_f64(payment, &["overlockDeductAdvance", "overlock_deduct_advance"])
                .unwrap_or(0.0),
            value_f64(payment, &["overlockPayableAmount", "overlock_payable_amount"])
                .unwrap_or(0.0),
        )
    } else {
        (0.0, 0.0, 0.0)
    };
    let (flatlock_gross, flatlock_deduct, flatlock_payable) = if is_singer {
        (
            value_f64(payment, &["flatlockWages", "flatlock_wages"]).unwrap_or(0.0),
            value_f64(payment, &["flatlockDeductAdvance", "flatlock_deduct_advance"])
                .unwrap_or(0.0),
            value_f64(payment, &["flatlockPayableAmount", "flatlock_payable_amount"])
                .unwrap_or(0.0),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let size_wise_entry = payment
        .get("sizeWiseEntry")
        .or_else(|| payment.get("size_wise_entry"))
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let wage_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    // Primary write: committed before any deduction is attempted
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let insert = conn.execute(
        "INSERT INTO wages (
            id, branch_id, product_name, operation_name, staff_name,
            overlock_operator, flatlock_operator, size_wise_entry,
            extra_pieces, total_pieces, gross_amount, deduct_advance_pay,
            payable_amount, overlock_gross_amount, overlock_deduct_advance,
            overlock_payable_amount, flatlock_gross_amount,
            flatlock_deduct_advance, flatlock_payable_amount, payment_type,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        rusqlite::params![
            wage_id,
            branch_id,
            product_name,
            operation_name,
            staff_name,
            overlock_operator,
            flatlock_operator,
            size_wise_entry,
            extra_pieces,
            total_pieces,
            gross_amount,
            deduct_advance_pay,
            payable_amount,
            overlock_gross,
            overlock_deduct,
            overlock_payable,
            flatlock_gross,
            flatlock_deduct,
            flatlock_payable,
            payment_type,
            now,
        ],
    );
    if let Err(e) = insert {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(e.into());
    }
    conn.execute_batch("COMMIT")?;

    info!(wage_id = %wage_id, operation = %operation_name, staff = %staff_name, branch_id = %branch_id, "Wage entry recorded");

    // Secondary writes: one deduction per named operator with a positive amount
    let mut targets: Vec<(&str, f64)> = vec![(staff_name.as_str(), deduct_advance_pay)];
    if let Some(ref op) = overlock_operator {
        targets.push((op.as_str(), overlock_deduct));
    }
    if let Some(ref op) = flatlock_operator {
        targets.push((op.as_str(), flatlock_deduct));
    }

    let (mut posted, mut skipped, mut queued) = (0, 0, 0);
    for (name, amount) in targets {
        if amount <= 0.0 {
            continue;
        }
        match deductions::post_deduction(&conn, name, &branch_id, amount) {
            Ok(true) => posted += 1,
            Ok(false) => skipped += 1,
            Err(e) => {
                warn!(
                    wage_id = %wage_id,
                    staff = %name,
                    "Advance deduction failed after wage entry committed: {e}"
                );
                match deductions::enqueue_failed(
                    &conn,
                    name,
                    &branch_id,
                    amount,
                    DeductionSource::Wage,
                    &e.to_string(),
                ) {
                    Ok(_) => queued += 1,
                    Err(qe) => {
                        warn!(wage_id = %wage_id, "Could not queue failed deduction: {qe}");
                    }
                }
            }
        }
    }

    Ok(serde_json::json!({
        "success": true,
        "message": "Wages added successfully",
        "wageId": wage_id,
        "deductionsPosted": posted,
        "deductionsSkipped": skipped,
        "deductionsQueued": queued,
    }))
}

// ---------------------------------------------------------------------------
// List wages
// ---------------------------------------------------------------------------

/// Branch-scoped wage rows for one operation, newest first.
pub fn list_wages_by_operation(db: &DbState, branch_id: &str, operation: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let mut stmt = conn.prepare(
        "SELECT id, product_name, operation_name, staff_name, overlock_operator,
                flatlock_operator, size_wise_entry, extra_pieces, total_pieces,
                gross_amount, deduct_advance_pay, payable_amount,
                overlock_gross_amount, overlock_deduct_advance, overlock_payable_amount,
                flatlock_gross_amount, flatlock_deduct_advance, flatlock_payable_amount,
                payment_type, created_at
         FROM wages
         WHERE branch_id = ?1 AND LOWER(operation_name) = LOWER(?2)
         ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(rusqlite::params![branch_id, operation], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "productName": row.get::<_, Option<String>>(1)?,
            "operationName": row.get::<_, Option<String>>(2)?,
            "staffName": row.get::<_, Option<String>>(3)?,
            "overlockOperator": row.get::<_, Option<String>>(4)?,
            "flatlockOperator": row.get::<_, Option<String>>(5)?,
            "sizeWiseEntry": row.get::<_, String>(6)?,
            "extraPieces": row.get::<_, i64>(7)?,
            "totalPieces": row.get::<_, i64>(8)?,
            "grossAmount": row.get::<_, f64>(9)?,
            "deductAdvancePay": row.get::<_, f64>(10)?,
            "payableAmount": row.get::<_, f64>(11)?,
            "overlockGrossAmount": row.get::<_, f64>(12)?,
            "overlockDeductAdvance": row.get::<_, f64>(13)?,
            "overlockPayableAmount": row.get::<_, f64>(14)?,
            "flatlockGrossAmount": row.get::<_, f64>(15)?,
            "flatlockDeductAdvance": row.get::<_, f64>(16)?,
            "flatlockPayableAmount": row.get::<_, f64>(17)?,
            "paymentType": row.get::<_, Option<String>>(18)?,
            "createdAt": row.get::<_, String>(19)?,
        }))
    })?;

    let wages: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(wages))
}

// ===========================================================================
// Tests
// ===========================================================================
