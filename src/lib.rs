//! stitchpay - staff advance ledger and settlement engine.
//!
//! Records cash advances to factory staff, automatic deductions from
//! piece-work (cutting) and wage entries, and partial or full settlements,
//! keeping one authoritative pending balance per staff member. Everything
//! is branch-scoped; the HTTP layer, authentication, and catalog CRUD live
//! in the embedding application and talk to this crate through JSON
//! payloads shaped like the legacy API.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod advances;
pub mod cutting;
pub mod db;
pub mod deductions;
pub mod error;
pub mod ledger;
pub mod staff;
pub mod wages;

pub use db::DbState;
pub use error::{LedgerError, Result};
pub use ledger::TxnKind;

/// Install a fmt tracing subscriber with env-filter support.
///
/// Defaults to `info` when `RUST_LOG` is unset. Call once from the
/// embedding application; a second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Extract a non-empty trimmed string from a payload, trying keys in order.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Extract a number from a payload, trying keys in order.
///
/// Transport layers sometimes deliver amounts as numeric strings; those are
/// parsed rather than concatenated downstream, so `"500" + 200` can never
/// become `500200`.
pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(x) => {
                if let Some(n) = x.as_f64() {
                    return Some(n);
                }
                if let Some(s) = x.as_str() {
                    if let Ok(n) = s.trim().parse::<f64>() {
                        return Some(n);
                    }
                }
            }
            None => continue,
        }
    }
    None
}

/// Extract an integer from a payload, trying keys in order. Accepts numeric
/// strings for the same reason as `value_f64`.
pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(*key) {
            Some(x) => {
                if let Some(n) = x.as_i64() {
                    return Some(n);
                }
                if let Some(s) = x.as_str() {
                    if let Ok(n) = s.trim().parse::<i64>() {
                        return Some(n);
                    }
                }
            }
            None => continue,
        }
    }
    None
}
