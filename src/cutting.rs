//! Cutting entries (piece-work output records).
//!
//! Recording a cutting entry is the primary write; when the entry names a
//! `deduct_advance_pay` amount for the cutting master, a deduction is
//! posted against their advance afterwards, best-effort. The entry commits
//! first and stays committed whatever happens to the deduction — a failed
//! post is logged and queued for reconciliation, never rolled back into.

use chrono::Utc;
use rusqlite::params_from_iter;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::deductions::{self, DeductionSource};
use crate::error::{LedgerError, Result};
use crate::{value_f64, value_i64, value_str};

// ---------------------------------------------------------------------------
// Record cutting entry
// ---------------------------------------------------------------------------

/// Record a piece-work cutting entry, then post the advance deduction.
///
/// The response's `deduction` field tells the caller what happened to the
/// secondary write: `posted`, `skipped` (no staff match), `queued`
/// (post failed, parked for retry), or `none` (no deduction requested).
pub fn record_cutting_entry(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let inward_number = value_str(payload, &["inwardNumber", "inward_number"])
        .ok_or_else(|| LedgerError::validation("Missing inward_number"))?;
    let cutting_master = value_str(payload, &["cuttingMaster", "cutting_master"])
        .ok_or_else(|| LedgerError::validation("Missing cutting_master"))?;
    let product_name = value_str(payload, &["productName", "product_name"])
        .ok_or_else(|| LedgerError::validation("Missing product_name"))?;
    let fabric_type = value_str(payload, &["fabricType", "fabric_type"])
        .ok_or_else(|| LedgerError::validation("Missing fabric_type"))?;
    let weight_of_fabric = value_f64(payload, &["weightOfFabric", "weight_of_fabric"])
        .ok_or_else(|| LedgerError::validation("Missing weight_of_fabric"))?;
    let total_pcs = value_i64(payload, &["totalPcs", "total_pcs"])
        .ok_or_else(|| LedgerError::validation("Missing total_pcs"))?;
    let gross_amount = value_f64(payload, &["grossAmount", "gross_amount"])
        .ok_or_else(|| LedgerError::validation("Missing gross_amount"))?;
    let deduct_advance_pay = value_f64(payload, &["deductAdvancePay", "deduct_advance_pay"])
        .ok_or_else(|| LedgerError::validation("Missing deduct_advance_pay"))?;
    let payable_amount = value_f64(payload, &["payableAmount", "payable_amount"])
        .ok_or_else(|| LedgerError::validation("Missing payable_amount"))?;
    let payment_type = value_str(payload, &["paymentType", "payment_type"])
        .ok_or_else(|| LedgerError::validation("Missing payment_type"))?;
    let branch_id = value_str(payload, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;

    let size_wise_entry = payload
        .get("sizeWiseEntry")
        .or_else(|| payload.get("size_wise_entry"))
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());

    let entry_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    // Primary write: committed before any deduction is attempted
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let insert = conn.execute(
        "INSERT INTO cutting_entries (
            id, inward_number, cutting_master, product_name, fabric_type,
            weight_of_fabric, size_wise_entry, total_pcs, gross_amount,
            deduct_advance_pay, payable_amount, payment_type, branch_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            entry_id,
            inward_number,
            cutting_master,
            product_name,
            fabric_type,
            weight_of_fabric,
            size_wise_entry,
            total_pcs,
            gross_amount,
            deduct_advance_pay,
            payable_amount,
            payment_type,
            branch_id,
            now,
        ],
    );
    if let Err(e) = insert {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(e.into());
    }
    conn.execute_batch("COMMIT")?;

    info!(entry_id = %entry_id, cutting_master = %cutting_master, branch_id = %branch_id, "Cutting entry recorded");

    // Secondary write: advisory, never fails the committed entry
    let deduction_outcome = if deduct_advance_pay > 0.0 {
        match deductions::post_deduction(&conn, &cutting_master, &branch_id, deduct_advance_pay) {
            Ok(true) => "posted",
            Ok(false) => "skipped",
            Err(e) => {
                warn!(
                    entry_id = %entry_id,
                    cutting_master = %cutting_master,
                    "Advance deduction failed after cutting entry committed: {e}"
                );
                match deductions::enqueue_failed(
                    &conn,
                    &cutting_master,
                    &branch_id,
                    deduct_advance_pay,
                    DeductionSource::Cutting,
                    &e.to_string(),
                ) {
                    Ok(_) => "queued",
                    Err(qe) => {
                        warn!(entry_id = %entry_id, "Could not queue failed deduction: {qe}");
                        "failed"
                    }
                }
            }
        }
    } else {
        "none"
    };

    Ok(serde_json::json!({
        "success": true,
        "message": "Cutting entry added successfully",
        "entryId": entry_id,
        "deduction": deduction_outcome,
    }))
}

// ---------------------------------------------------------------------------
// List cutting entries
// ---------------------------------------------------------------------------

/// Branch-scoped entry listing with optional filters.
///
/// `masterName` matches as a substring, `date` matches the entry day, and
/// `totalPcs` matches exactly. Newest entries come first; each row carries
/// the computed per-piece `average` weight.
pub fn list_cutting_entries(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let branch_id = value_str(payload, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;

    let mut sql = String::from(
        "SELECT id, cutting_master, inward_number, product_name, fabric_type,
                weight_of_fabric, size_wise_entry, total_pcs, gross_amount,
                deduct_advance_pay, payable_amount, payment_type, created_at
         FROM cutting_entries
         WHERE branch_id = ?",
    );
    let mut args: Vec<rusqlite::types::Value> = vec![branch_id.into()];

    if let Some(master) = value_str(payload, &["masterName", "master_name"]) {
        sql.push_str(" AND cutting_master LIKE ?");
        args.push(format!("%{master}%").into());
    }
    if let Some(date) = value_str(payload, &["date"]) {
        sql.push_str(" AND DATE(created_at) = ?");
        args.push(date.into());
    }
    if let Some(pcs) = value_i64(payload, &["totalPcs", "total_pcs", "amount"]) {
        sql.push_str(" AND total_pcs = ?");
        args.push(pcs.into());
    }

    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| {
        let weight: f64 = row.get(5)?;
        let total_pcs: i64 = row.get(7)?;
        let average = if total_pcs > 0 {
            (weight / total_pcs as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "cuttingMaster": row.get::<_, String>(1)?,
            "inwardNumber": row.get::<_, String>(2)?,
            "productName": row.get::<_, String>(3)?,
            "fabricType": row.get::<_, String>(4)?,
            "weightOfFabric": weight,
            "sizeWiseEntry": row.get::<_, String>(6)?,
            "totalPcs": total_pcs,
            "grossAmount": row.get::<_, f64>(8)?,
            "deductAdvancePay": row.get::<_, f64>(9)?,
            "payableAmount": row.get::<_, f64>(10)?,
            "paymentType": row.get::<_, String>(11)?,
            "createdAt": row.get::<_, String>(12)?,
            "average": average,
        }))
    })?;

    let entries: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(entries))
}

// ===========================================================================
// Tests
// ===========================================================================
