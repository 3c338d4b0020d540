//! Pure ledger computation: balance reconciliation and the merged
//! history feed.
//!
//! A customer's balance is never stored; it is recomputed on every query
//! from three append-only sources (order points, manual grants,
//! redemptions). Records are loose JSON and may carry amounts as numbers
//! or strings; anything non-numeric or negative contributes 0 to the sums
//! without the record itself being dropped.
//!
//! Grants historically wrote the join key under either `customerEmail` or
//! `email`, so customer matching checks both. This is a permanent
//! compatibility shim for data already in the wild, not a bug to fix.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::store::Record;
use crate::value_str;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point totals for one customer at one point in time. Derived, never
/// persisted; recompute instead of trusting a stored running total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub total_earned: i64,
    pub total_redeemed: i64,
    pub balance: i64,
}

impl LedgerSnapshot {
    pub fn zero() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Amount and timestamp coercion
// ---------------------------------------------------------------------------

/// Read a point amount from the first present key, coerced to a
/// non-negative integer. Numbers truncate, numeric strings parse,
/// everything else (and negatives) counts as 0.
pub(crate) fn non_negative_points(fields: &Value, keys: &[&str]) -> i64 {
    for key in keys {
        let Some(raw) = fields.get(*key) else {
            continue;
        };
        let parsed = match raw {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            _ => None,
        };
        if let Some(n) = parsed {
            return n.max(0);
        }
    }
    0
}

/// Millisecond timestamp from the first parseable key. Accepts epoch
/// milliseconds, RFC 3339 strings, and bare `YYYY-MM-DD` service dates
/// (taken as midnight UTC). Unparseable records sort to the epoch.
pub(crate) fn event_timestamp_ms(fields: &Value, keys: &[&str]) -> i64 {
    for key in keys {
        match fields.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(ms) = n.as_i64() {
                    return ms;
                }
            }
            Some(Value::String(s)) => {
                let s = s.trim();
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    return dt.timestamp_millis();
                }
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
                    return midnight.and_utc().timestamp_millis();
                }
                if let Ok(ms) = s.parse::<i64>() {
                    return ms;
                }
            }
            _ => {}
        }
    }
    0
}

/// True when the record belongs to `email`, checking both historical
/// spellings of the join key.
pub(crate) fn matches_customer(fields: &Value, email: &str) -> bool {
    for key in ["customerEmail", "email"] {
        if let Some(s) = fields.get(key).and_then(|v| v.as_str()) {
            if s.trim() == email {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Reduce the three per-customer record sets to a [`LedgerSnapshot`].
///
/// Total absence of data is a zero contribution, not a failure. The
/// balance may go negative when redemptions were recorded against
/// earnings that later disappeared; that is reported as-is.
pub fn reconcile(orders: &[Record], grants: &[Record], redemptions: &[Record]) -> LedgerSnapshot {
    let from_orders: i64 = orders
        .iter()
        .map(|r| non_negative_points(&r.fields, &["points"]))
        .sum();
    let from_grants: i64 = grants
        .iter()
        .map(|r| non_negative_points(&r.fields, &["pointsAdded"]))
        .sum();
    let total_redeemed: i64 = redemptions
        .iter()
        .map(|r| non_negative_points(&r.fields, &["pointsUsed"]))
        .sum();

    let total_earned = from_orders + from_grants;
    LedgerSnapshot {
        total_earned,
        total_redeemed,
        balance: total_earned - total_redeemed,
    }
}

/// Points earned from orders alone, as shown on the dashboard profile
/// cards.
pub fn orders_points_total(orders: &[Record]) -> i64 {
    orders
        .iter()
        .map(|r| non_negative_points(&r.fields, &["points"]))
        .sum()
}

// ---------------------------------------------------------------------------
// History feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEventKind {
    Earned,
    Redeemed,
}

/// One entry of the merged ledger feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub timestamp_ms: i64,
    pub description: String,
    pub detail: String,
    pub amount: i64,
    /// Source record reference: `order-{key}`, `manual-{key}` or
    /// `redeemed-{key}`.
    pub source_id: String,
}

/// Merge the three sources into one feed, newest first.
///
/// Unlike [`reconcile`], records with a non-positive or unparsable amount
/// are excluded entirely. Grants and redemptions may arrive unfiltered
/// and are matched against `email` here. Ties on timestamp keep insertion
/// order: orders, then grants, then redemptions.
pub fn merge_history(
    orders: &[Record],
    grants: &[Record],
    redemptions: &[Record],
    email: &str,
) -> Vec<LedgerEvent> {
    let mut events = Vec::new();

    for order in orders {
        let amount = non_negative_points(&order.fields, &["points"]);
        if amount <= 0 {
            continue;
        }
        events.push(LedgerEvent {
            kind: LedgerEventKind::Earned,
            timestamp_ms: event_timestamp_ms(&order.fields, &["date", "createdAt"]),
            description: "Laundry Operation".to_string(),
            detail: value_str(&order.fields, &["items"])
                .unwrap_or_else(|| "Laundry service".to_string()),
            amount,
            source_id: format!("order-{}", order.key),
        });
    }

    for grant in grants {
        if !matches_customer(&grant.fields, email) {
            continue;
        }
        let amount = non_negative_points(&grant.fields, &["pointsAdded"]);
        if amount <= 0 {
            continue;
        }
        let detail = match value_str(&grant.fields, &["addedBy"]) {
            Some(actor) => format!("Granted by: {actor}"),
            None => "System".to_string(),
        };
        events.push(LedgerEvent {
            kind: LedgerEventKind::Earned,
            timestamp_ms: event_timestamp_ms(&grant.fields, &["timestamp"]),
            description: value_str(&grant.fields, &["reason"])
                .unwrap_or_else(|| "Respect Added".to_string()),
            detail,
            amount,
            source_id: format!("manual-{}", grant.key),
        });
    }

    for redemption in redemptions {
        if !matches_customer(&redemption.fields, email) {
            continue;
        }
        let amount = non_negative_points(&redemption.fields, &["pointsUsed"]);
        if amount <= 0 {
            continue;
        }
        events.push(LedgerEvent {
            kind: LedgerEventKind::Redeemed,
            timestamp_ms: event_timestamp_ms(&redemption.fields, &["timestamp"]),
            description: "Respect Spent".to_string(),
            detail: value_str(&redemption.fields, &["reward"])
                .unwrap_or_else(|| "Reward not specified".to_string()),
            amount,
            source_id: format!("redeemed-{}", redemption.key),
        });
    }

    // Stable sort: equal timestamps keep the orders/grants/redemptions
    // insertion order above.
    events.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    events
}

/// Millisecond wall-clock timestamp used for grant/redemption keys and
/// record fields.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Today's service date in `YYYY-MM-DD`, the format order forms submit.
pub(crate) fn today_service_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ===========================================================================
// Tests
// ===========================================================================
