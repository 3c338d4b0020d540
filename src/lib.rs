//! De Supreme Laundry - loyalty ledger and order tracking core.
//!
//! Backend library for the laundromat loyalty system. Customer orders,
//! manual respect grants and redemptions live in a hosted realtime
//! database reached through the [`store::RecordStore`] adapter; the
//! [`engine::LedgerEngine`] reconciles a customer's balance from those
//! three append-only collections and guards the grant/redeem writes.
//!
//! The admin dashboard and customer portal are separate front ends that
//! call into this crate; nothing here renders or authenticates.

pub mod cache;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod orders;
pub mod profiles;
pub mod rest;
pub mod store;
pub mod users;

pub use cache::BalanceMemo;
pub use engine::{GrantRequest, LedgerEngine, RedeemRequest};
pub use error::{LedgerError, StoreError};
pub use ledger::{LedgerEvent, LedgerEventKind, LedgerSnapshot};
pub use store::{Collection, MemoryStore, Record, RecordStore};

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

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> bool {
    for key in keys {
        if let Some(b) = v.get(*key).and_then(|x| x.as_bool()) {
            return b;
        }
    }
    false
}
