//! Caller-owned balance memo.
//!
//! Screens that show the same customer's balance several times in quick
//! succession keep one of these per view and drop it when the view goes
//! away. The memo is deliberately not shared process state: each caller
//! owns its own, so concurrent dashboard loads for different customers
//! cannot contaminate each other, and staleness is bounded by the TTL
//! plus explicit invalidation after a grant or redeem.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::LedgerEngine;
use crate::error::LedgerError;
use crate::ledger::LedgerSnapshot;
use crate::store::RecordStore;

/// Short-lived per-email snapshot cache.
pub struct BalanceMemo {
    ttl: Duration,
    entries: HashMap<String, (LedgerSnapshot, Instant)>,
}

impl BalanceMemo {
    pub fn new(ttl: Duration) -> Self {
        BalanceMemo {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Return the memoized snapshot for `email`, recomputing through the
    /// engine on a miss or after the TTL.
    pub async fn balance<S: RecordStore>(
        &mut self,
        engine: &LedgerEngine<S>,
        email: &str,
    ) -> Result<LedgerSnapshot, LedgerError> {
        if let Some((snapshot, fetched_at)) = self.entries.get(email) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(*snapshot);
            }
        }
        let snapshot = engine.balance(email).await?;
        self.entries
            .insert(email.to_string(), (snapshot, Instant::now()));
        Ok(snapshot)
    }

    /// Drop the cached snapshot for one customer. Call after a grant or
    /// redeem for that customer.
    pub fn invalidate(&mut self, email: &str) -> bool {
        let removed = self.entries.remove(email).is_some();
        if removed {
            debug!(email = %email, "balance memo invalidated");
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached snapshots, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
