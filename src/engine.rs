//! Ledger engine: the one place that reads the three point sources and
//! writes grants and redemptions.
//!
//! Queries are side-effect free and recomputed per call. Mutations
//! validate before writing and report typed failures; presentation is the
//! caller's problem.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{LedgerError, StoreError};
use crate::ledger::{self, LedgerEvent, LedgerSnapshot};
use crate::store::{Collection, Record, RecordStore};

/// Manual respect grant, issued by an admin.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub customer_id: String,
    pub customer_email: String,
    pub amount: i64,
    pub reason: Option<String>,
    /// Email of the granting admin. Defaults to "Don" when the session
    /// has no email, as the dashboard always has.
    pub actor: Option<String>,
}

/// Respect spend against a customer's balance.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub customer_id: String,
    pub customer_email: String,
    pub amount: i64,
    pub reward: String,
    pub actor: Option<String>,
}

/// Facade over the record store for balance queries, the history feed and
/// the two ledger mutations.
pub struct LedgerEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        LedgerEngine {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordStore> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        LedgerEngine { store }
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Fetch the three per-customer sources concurrently.
    ///
    /// Orders and redemptions are indexed by email server-side. Grants
    /// are fetched whole and matched here because legacy records carry
    /// the join key under two different field names, which no single
    /// server-side equality query can cover.
    pub(crate) async fn fetch_sources(
        &self,
        email: &str,
    ) -> Result<(Vec<Record>, Vec<Record>, Vec<Record>), StoreError> {
        let (orders, grants, redemptions) = tokio::join!(
            self.store
                .fetch_by_field(Collection::Orders, "email", email),
            self.store.fetch_all(Collection::Grants),
            self.store
                .fetch_by_field(Collection::Redemptions, "customerEmail", email),
        );
        let mut grants = grants?;
        grants.retain(|r| ledger::matches_customer(&r.fields, email));
        Ok((orders?, grants, redemptions?))
    }

    /// Current totals for one customer. Surfaces adapter failures as
    /// typed errors; use [`balance_or_zero`](Self::balance_or_zero) where
    /// the display must stay up regardless.
    pub async fn balance(&self, email: &str) -> Result<LedgerSnapshot, LedgerError> {
        let (orders, grants, redemptions) = self.fetch_sources(email).await?;
        Ok(ledger::reconcile(&orders, &grants, &redemptions))
    }

    /// Totals for display paths that must not break: any fetch failure
    /// resolves to a zero snapshot, logged at warn.
    pub async fn balance_or_zero(&self, email: &str) -> LedgerSnapshot {
        match self.balance(email).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(email = %email, error = %error, "balance fetch failed, reporting zero snapshot");
                LedgerSnapshot::zero()
            }
        }
    }

    /// Merged history feed for one customer, newest first.
    pub async fn history(&self, email: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
        let (orders, grants, redemptions) = self.fetch_sources(email).await?;
        Ok(ledger::merge_history(&orders, &grants, &redemptions, email))
    }

    /// Record a manual grant. Fails validation before any write; on
    /// success the new grant record is returned.
    pub async fn grant(&self, request: GrantRequest) -> Result<Record, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::validation(
                "amount",
                "respect amount must be a positive integer",
            ));
        }
        if request.customer_id.trim().is_empty() {
            return Err(LedgerError::validation("customer_id", "missing customer id"));
        }
        if request.customer_email.trim().is_empty() {
            return Err(LedgerError::validation(
                "customer_email",
                "missing customer email",
            ));
        }

        let timestamp = ledger::now_ms();
        let key = timestamp.to_string();
        let fields = serde_json::json!({
            "customerId": request.customer_id.as_str(),
            "customerEmail": request.customer_email.as_str(),
            "pointsAdded": request.amount,
            "reason": request.reason.unwrap_or_else(|| "No reason provided".to_string()),
            "addedBy": request.actor.unwrap_or_else(|| "Don".to_string()),
            "timestamp": timestamp,
        });
        self.store.put(Collection::Grants, &key, fields.clone()).await?;

        info!(
            customer_id = %request.customer_id,
            points_added = request.amount,
            "Respect granted"
        );
        Ok(Record::new(key, fields))
    }

    /// Record a redemption after re-checking the balance.
    ///
    /// The balance read and the redemption write are two separate store
    /// operations; two concurrent redemptions can each pass the check
    /// against the same stale balance and jointly overdraw. The adapter
    /// contract offers no conditional write, so this stays an accepted
    /// consistency gap.
    pub async fn redeem(&self, request: RedeemRequest) -> Result<Record, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::validation(
                "amount",
                "respect amount must be a positive integer",
            ));
        }
        let reward = request.reward.trim();
        if reward.is_empty() {
            return Err(LedgerError::validation(
                "reward",
                "a reward description is required",
            ));
        }
        if request.customer_id.trim().is_empty() {
            return Err(LedgerError::validation("customer_id", "missing customer id"));
        }
        if request.customer_email.trim().is_empty() {
            return Err(LedgerError::validation(
                "customer_email",
                "missing customer email",
            ));
        }

        let snapshot = self.balance(&request.customer_email).await?;
        if request.amount > snapshot.balance {
            return Err(LedgerError::InsufficientBalance {
                requested: request.amount,
                available: snapshot.balance,
            });
        }

        let timestamp = ledger::now_ms();
        let key = timestamp.to_string();
        let fields = serde_json::json!({
            "customerId": request.customer_id.as_str(),
            "customerEmail": request.customer_email.as_str(),
            "pointsUsed": request.amount,
            "reward": reward,
            "redeemedBy": request.actor.unwrap_or_else(|| "Don".to_string()),
            "timestamp": timestamp,
        });
        self.store
            .put(Collection::Redemptions, &key, fields.clone())
            .await?;

        info!(
            customer_id = %request.customer_id,
            points_used = request.amount,
            new_balance = snapshot.balance - request.amount,
            "Respect spent"
        );
        Ok(Record::new(key, fields))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
