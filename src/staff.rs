//! Staff directory access.
//!
//! The ledger references staff rows by id, and the deduction poster
//! resolves cutting/wage operators by name within a branch. Directory
//! listings back the staff dropdown in the advance entry screen.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{LedgerError, Result};
use crate::value_str;

/// Register a staff member in a branch.
pub fn create_staff(db: &DbState, payload: &Value) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let branch_id = value_str(payload, &["branchId", "branch_id"])
        .ok_or_else(|| LedgerError::validation("Missing branchId"))?;
    let full_name = value_str(payload, &["fullName", "full_name"])
        .ok_or_else(|| LedgerError::validation("Missing fullName"))?;
    let aadhar_number = value_str(payload, &["aadharNumber", "aadhar_number"]);
    let pan_number = value_str(payload, &["panNumber", "pan_number"]);
    let mobile_number = value_str(payload, &["mobileNumber", "mobile_number"]);

    let staff_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO staff (id, branch_id, full_name, aadhar_number, pan_number, mobile_number, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            staff_id,
            branch_id,
            full_name,
            aadhar_number,
            pan_number,
            mobile_number,
            now,
        ],
    )?;

    info!(staff_id = %staff_id, branch_id = %branch_id, "Staff member registered");

    Ok(serde_json::json!({
        "success": true,
        "staffId": staff_id,
        "message": "Staff member registered successfully",
    }))
}

/// List staff for a branch (dropdown shape).
pub fn list_staff(db: &DbState, branch_id: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    let mut stmt = conn.prepare(
        "SELECT id, full_name, aadhar_number, pan_number, mobile_number
         FROM staff
         WHERE branch_id = ?1
         ORDER BY full_name ASC",
    )?;

    let rows = stmt.query_map(params![branch_id], |row| {
        Ok(serde_json::json!({
            "id": row.get::<_, String>(0)?,
            "fullName": row.get::<_, String>(1)?,
            "aadharNumber": row.get::<_, Option<String>>(2)?,
            "panNumber": row.get::<_, Option<String>>(3)?,
            "mobileNumber": row.get::<_, Option<String>>(4)?,
        }))
    })?;

    let staff: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(staff))
}

/// Fetch one staff member's details within a branch.
pub fn get_staff(db: &DbState, staff_id: &str, branch_id: &str) -> Result<Value> {
    let conn = db.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;

    conn.query_row(
        "SELECT full_name, aadhar_number, pan_number, mobile_number, pending_balance
         FROM staff
         WHERE id = ?1 AND branch_id = ?2",
        params![staff_id, branch_id],
        |row| {
            Ok(serde_json::json!({
                "fullName": row.get::<_, String>(0)?,
                "aadharNumber": row.get::<_, Option<String>>(1)?,
                "panNumber": row.get::<_, Option<String>>(2)?,
                "mobileNumber": row.get::<_, Option<String>>(3)?,
                "pendingBalance": row.get::<_, f64>(4)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found(format!("Staff {staff_id}")))
}

/// Resolve a staff name to an id within a branch.
///
/// Names are not unique; the first match wins, matching the legacy lookup.
pub fn resolve_staff_by_name(
    conn: &Connection,
    full_name: &str,
    branch_id: &str,
) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM staff WHERE full_name = ?1 AND branch_id = ?2 LIMIT 1",
            params![full_name, branch_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ===========================================================================
// Tests
// ===========================================================================
