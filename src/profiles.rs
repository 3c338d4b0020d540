//! Admin dashboard aggregation.
//!
//! One profile card per customer account: order count, points earned
//! from orders, and the reconciled balance. Every customer's numbers are
//! independent, so the per-customer work fans out concurrently and joins
//! once all of it lands. A failure for one customer degrades that card
//! to zeros instead of taking down the whole dashboard load.

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::engine::LedgerEngine;
use crate::error::LedgerError;
use crate::ledger::{self, LedgerEvent, LedgerSnapshot};
use crate::store::{Collection, RecordStore};
use crate::users::Role;
use crate::value_str;

/// Dashboard card for one customer.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerProfile {
    pub user_key: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub total_orders: usize,
    pub points_from_orders: i64,
    pub balance: i64,
}

/// Totals behind the per-customer history modal, split by source.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub total_orders: usize,
    pub earned_from_orders: i64,
    pub earned_from_grants: i64,
    pub snapshot: LedgerSnapshot,
    pub events: Vec<LedgerEvent>,
}

/// Build a profile for every non-admin account, sorted by name.
pub async fn load_customer_profiles<S>(
    engine: &LedgerEngine<S>,
) -> Result<Vec<CustomerProfile>, LedgerError>
where
    S: RecordStore + 'static,
{
    let users = engine.store().fetch_all(Collection::Users).await?;

    let mut tasks: JoinSet<CustomerProfile> = JoinSet::new();
    for user in users {
        if Role::of(&user.fields) == Role::Admin {
            continue;
        }
        let engine = engine.clone();
        tasks.spawn(async move {
            let name = value_str(&user.fields, &["name"]).unwrap_or_else(|| "Unknown".to_string());
            let phone =
                value_str(&user.fields, &["phone"]).unwrap_or_else(|| "No phone".to_string());
            let Some(email) = value_str(&user.fields, &["email"]) else {
                // No join key: the account exists but owns no ledger rows.
                return CustomerProfile {
                    user_key: user.key,
                    name,
                    email: "No email".to_string(),
                    phone,
                    total_orders: 0,
                    points_from_orders: 0,
                    balance: 0,
                };
            };

            let (total_orders, points_from_orders) = match engine
                .store()
                .fetch_by_field(Collection::Orders, "email", &email)
                .await
            {
                Ok(orders) => (orders.len(), ledger::orders_points_total(&orders)),
                Err(error) => {
                    warn!(email = %email, error = %error, "profile order fetch failed, showing zeros");
                    (0, 0)
                }
            };
            let balance = engine.balance_or_zero(&email).await.balance;

            CustomerProfile {
                user_key: user.key,
                name,
                email,
                phone,
                total_orders,
                points_from_orders,
                balance,
            }
        });
    }

    let mut profiles = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(profile) => profiles.push(profile),
            Err(error) => warn!(error = %error, "profile task panicked, skipping card"),
        }
    }
    profiles.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(profiles)
}

/// Full history for one customer with earned totals split by source.
pub async fn customer_history<S: RecordStore>(
    engine: &LedgerEngine<S>,
    email: &str,
) -> Result<HistorySummary, LedgerError> {
    let (orders, grants, redemptions) = engine.fetch_sources(email).await?;

    let earned_from_orders = ledger::orders_points_total(&orders);
    let snapshot = ledger::reconcile(&orders, &grants, &redemptions);
    let events = ledger::merge_history(&orders, &grants, &redemptions, email);

    Ok(HistorySummary {
        total_orders: orders.len(),
        earned_from_orders,
        earned_from_grants: snapshot.total_earned - earned_from_orders,
        snapshot,
        events,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
