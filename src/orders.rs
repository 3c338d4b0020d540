//! Laundry order operations.
//!
//! Orders live in the `customers` collection as loose records. Display
//! status and payment state are derived from stored booleans, never
//! stored as enums themselves: `collected` wins over `ready`, and a
//! confirmed payment wins over a sent one.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{LedgerError, StoreError};
use crate::ledger::{event_timestamp_ms, now_ms, today_service_date};
use crate::store::{Collection, Record, RecordStore};
use crate::{value_bool, value_i64, value_str};

// ---------------------------------------------------------------------------
// Derived display state
// ---------------------------------------------------------------------------

/// Lifecycle position of an order as shown to both sides of the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Completed,
}

impl OrderStatus {
    /// Derive from the stored `ready`/`collected` booleans. Both may be
    /// set on old records; collected takes priority.
    pub fn of(fields: &Value) -> Self {
        if value_bool(fields, &["collected"]) {
            OrderStatus::Completed
        } else if value_bool(fields, &["ready"]) {
            OrderStatus::Ready
        } else {
            OrderStatus::Pending
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "In Progress",
            OrderStatus::Ready => "Ready",
            OrderStatus::Completed => "Completed",
        }
    }

    /// The `(ready, collected)` pair stored for this status.
    fn flags(self) -> (bool, bool) {
        match self {
            OrderStatus::Pending => (false, false),
            OrderStatus::Ready => (true, false),
            OrderStatus::Completed => (false, true),
        }
    }
}

/// Payment handshake state between customer and admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Sent,
    Confirmed,
}

impl PaymentState {
    pub fn of(fields: &Value) -> Self {
        if value_bool(fields, &["paymentConfirmed"]) {
            PaymentState::Confirmed
        } else if value_bool(fields, &["paymentSent"]) {
            PaymentState::Sent
        } else {
            PaymentState::Pending
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaymentState::Pending => "Pending",
            PaymentState::Sent => "Sent - Pending",
            PaymentState::Confirmed => "Confirmed",
        }
    }
}

/// Which side of the counter touched the payment flags last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentActor {
    Customer,
    Admin,
}

impl PaymentActor {
    fn as_str(self) -> &'static str {
        match self {
            PaymentActor::Customer => "customer",
            PaymentActor::Admin => "admin",
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Validated input for a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub name: String,
    pub email: String,
    pub items: String,
    /// Service date, `YYYY-MM-DD`.
    pub date: String,
    pub points: i64,
    pub status: OrderStatus,
}

/// Partial edit of an existing order. Unset fields stay as they are.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub items: Option<String>,
    pub date: Option<String>,
    pub points: Option<i64>,
    pub status: Option<OrderStatus>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Order CRUD over the record store.
pub struct OrderService<S> {
    store: Arc<S>,
}

impl<S> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        OrderService {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        OrderService { store }
    }

    /// Create an order from the admin form. Name, items and service date
    /// are required; points default to zero and never go negative.
    pub async fn create(&self, order: NewOrder) -> Result<Record, LedgerError> {
        if order.name.trim().is_empty() {
            return Err(LedgerError::validation("name", "customer name is required"));
        }
        if order.items.trim().is_empty() {
            return Err(LedgerError::validation("items", "item description is required"));
        }
        if order.date.trim().is_empty() {
            return Err(LedgerError::validation("date", "service date is required"));
        }

        let (ready, collected) = order.status.flags();
        let now = now_ms();
        let fields = json!({
            "name": order.name.trim(),
            "email": order.email.trim(),
            "items": order.items.trim(),
            "date": order.date.trim(),
            "points": order.points.max(0),
            "ready": ready,
            "collected": collected,
            "createdAt": now,
            "updatedAt": now,
        });

        let record = self.store.create(Collection::Orders, fields).await?;
        info!(order = %record.key, email = %order.email, "Laundry order created");
        Ok(record)
    }

    /// Duplicate an existing order's identity fields into a fresh pending
    /// order: same name and email, new items, today's date unless given,
    /// zero points.
    pub async fn quick_add(
        &self,
        source_key: &str,
        items: &str,
        date: Option<String>,
    ) -> Result<Record, LedgerError> {
        let source = self
            .store
            .get(Collection::Orders, source_key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: Collection::Orders.name(),
                key: source_key.to_string(),
            })?;

        self.create(NewOrder {
            name: value_str(&source.fields, &["name"]).unwrap_or_default(),
            email: value_str(&source.fields, &["email"]).unwrap_or_default(),
            items: items.to_string(),
            date: date.unwrap_or_else(today_service_date),
            points: 0,
            status: OrderStatus::Pending,
        })
        .await
    }

    /// Apply an admin edit. Only provided fields change; `updatedAt` is
    /// always bumped.
    pub async fn update(&self, key: &str, update: OrderUpdate) -> Result<(), LedgerError> {
        let mut patch = serde_json::Map::new();
        if let Some(name) = update.name {
            patch.insert("name".into(), json!(name.trim()));
        }
        if let Some(email) = update.email {
            patch.insert("email".into(), json!(email.trim()));
        }
        if let Some(items) = update.items {
            patch.insert("items".into(), json!(items.trim()));
        }
        if let Some(date) = update.date {
            patch.insert("date".into(), json!(date.trim()));
        }
        if let Some(points) = update.points {
            patch.insert("points".into(), json!(points.max(0)));
        }
        if let Some(status) = update.status {
            let (ready, collected) = status.flags();
            patch.insert("ready".into(), json!(ready));
            patch.insert("collected".into(), json!(collected));
        }
        patch.insert("updatedAt".into(), json!(now_ms()));

        self.store
            .update(Collection::Orders, key, Value::Object(patch))
            .await?;
        Ok(())
    }

    /// Remove an order outright. Admin-only in the calling layer.
    pub async fn delete(&self, key: &str) -> Result<(), LedgerError> {
        self.store.delete(Collection::Orders, key).await?;
        info!(order = %key, "Laundry order deleted");
        Ok(())
    }

    /// Customer (or admin) toggles the payment-sent flag. Unchecking
    /// clears the sent timestamp.
    pub async fn set_payment_sent(
        &self,
        key: &str,
        sent: bool,
        by: PaymentActor,
    ) -> Result<(), LedgerError> {
        let sent_at = if sent { json!(now_ms()) } else { Value::Null };
        self.store
            .update(
                Collection::Orders,
                key,
                json!({
                    "paymentSent": sent,
                    "paymentSentAt": sent_at,
                    "updatedBy": by.as_str(),
                }),
            )
            .await?;
        Ok(())
    }

    /// Admin confirms (or revokes confirmation of) a customer-reported
    /// payment.
    pub async fn confirm_payment(&self, key: &str, confirmed: bool) -> Result<(), LedgerError> {
        self.store
            .update(
                Collection::Orders,
                key,
                json!({
                    "paymentConfirmed": confirmed,
                    "updatedBy": PaymentActor::Admin.as_str(),
                }),
            )
            .await?;
        Ok(())
    }

    /// One customer's orders, newest service date first.
    pub async fn list_for_customer(&self, email: &str) -> Result<Vec<Record>, LedgerError> {
        let mut orders = self
            .store
            .fetch_by_field(Collection::Orders, "email", email)
            .await?;
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    /// Every order, newest service date first — the admin orders table.
    pub async fn list_all(&self) -> Result<Vec<Record>, LedgerError> {
        let mut orders = self.store.fetch_all(Collection::Orders).await?;
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    /// Number of orders on file for a customer.
    pub async fn count_for_customer(&self, email: &str) -> Result<usize, LedgerError> {
        Ok(self
            .store
            .fetch_by_field(Collection::Orders, "email", email)
            .await?
            .len())
    }

    /// Direct access to the underlying store, shared with other services.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

fn sort_newest_first(orders: &mut [Record]) {
    orders.sort_by_key(|r| std::cmp::Reverse(event_timestamp_ms(&r.fields, &["date", "createdAt"])));
}

/// Points awarded on an order record, for table badges.
pub fn points_of(fields: &Value) -> i64 {
    value_i64(fields, &["points"]).unwrap_or(0).max(0)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn new_order(email: &str) -> NewOrder {
        NewOrder {
            name: "Paulie".into(),
            email: email.into(),
            items: "3 shirts, 1 suit".into(),
            date: "2024-05-01".into(),
            points: 8,
            status: OrderStatus::Pending,
        }
    }

    #[test]
    fn collected_wins_over_ready() {
        let fields = json!({ "ready": true, "collected": true });
        assert_eq!(OrderStatus::of(&fields), OrderStatus::Completed);
        assert_eq!(OrderStatus::of(&fields).label(), "Completed");
    }

    #[test]
    fn status_defaults_to_pending() {
        assert_eq!(OrderStatus::of(&json!({})), OrderStatus::Pending);
        assert_eq!(
            OrderStatus::of(&json!({ "ready": true })),
            OrderStatus::Ready
        );
    }

    #[test]
    fn confirmed_payment_wins_over_sent() {
        let fields = json!({ "paymentSent": true, "paymentConfirmed": true });
        assert_eq!(PaymentState::of(&fields), PaymentState::Confirmed);
        assert_eq!(
            PaymentState::of(&json!({ "paymentSent": true })),
            PaymentState::Sent
        );
        assert_eq!(PaymentState::of(&json!({})), PaymentState::Pending);
        assert_eq!(PaymentState::Sent.label(), "Sent - Pending");
    }

    #[tokio::test]
    async fn create_requires_name_items_and_date() {
        let service = OrderService::new(MemoryStore::new());

        let mut missing_items = new_order("p@x.com");
        missing_items.items = "  ".into();
        let err = service.create(missing_items).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "items", .. }));

        let mut missing_date = new_order("p@x.com");
        missing_date.date = String::new();
        let err = service.create(missing_date).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "date", .. }));

        assert!(service.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_clamps_negative_points() {
        let service = OrderService::new(MemoryStore::new());
        let mut order = new_order("p@x.com");
        order.points = -4;
        let record = service.create(order).await.unwrap();
        assert_eq!(record.fields["points"], 0);
        assert_eq!(record.fields["ready"], false);
        assert_eq!(record.fields["collected"], false);
    }

    #[tokio::test]
    async fn quick_add_copies_identity_and_resets_the_rest() {
        let service = OrderService::new(MemoryStore::new());
        let source = service.create(new_order("p@x.com")).await.unwrap();

        let dup = service
            .quick_add(&source.key, "2 blankets", Some("2024-06-01".into()))
            .await
            .unwrap();
        assert_eq!(dup.fields["name"], "Paulie");
        assert_eq!(dup.fields["email"], "p@x.com");
        assert_eq!(dup.fields["items"], "2 blankets");
        assert_eq!(dup.fields["points"], 0);
        assert_eq!(OrderStatus::of(&dup.fields), OrderStatus::Pending);
        assert_ne!(dup.key, source.key);
    }

    #[tokio::test]
    async fn quick_add_of_missing_order_is_not_found() {
        let service = OrderService::new(MemoryStore::new());
        let err = service.quick_add("nope", "towels", None).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Store(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_maps_status_onto_stored_flags() {
        let service = OrderService::new(MemoryStore::new());
        let record = service.create(new_order("p@x.com")).await.unwrap();

        service
            .update(
                &record.key,
                OrderUpdate {
                    status: Some(OrderStatus::Completed),
                    points: Some(12),
                    ..OrderUpdate::default()
                },
            )
            .await
            .unwrap();

        let stored = service
            .store()
            .get(Collection::Orders, &record.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields["collected"], true);
        assert_eq!(stored.fields["ready"], false);
        assert_eq!(stored.fields["points"], 12);
        // Untouched fields survive the patch.
        assert_eq!(stored.fields["items"], "3 shirts, 1 suit");
    }

    #[tokio::test]
    async fn payment_sent_toggle_sets_and_clears_the_timestamp() {
        let service = OrderService::new(MemoryStore::new());
        let record = service.create(new_order("p@x.com")).await.unwrap();

        service
            .set_payment_sent(&record.key, true, PaymentActor::Customer)
            .await
            .unwrap();
        let stored = service
            .store()
            .get(Collection::Orders, &record.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PaymentState::of(&stored.fields), PaymentState::Sent);
        assert!(stored.fields["paymentSentAt"].is_i64());
        assert_eq!(stored.fields["updatedBy"], "customer");

        service
            .set_payment_sent(&record.key, false, PaymentActor::Customer)
            .await
            .unwrap();
        let stored = service
            .store()
            .get(Collection::Orders, &record.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PaymentState::of(&stored.fields), PaymentState::Pending);
        assert!(stored.fields.get("paymentSentAt").is_none());
    }

    #[tokio::test]
    async fn confirm_payment_outranks_sent() {
        let service = OrderService::new(MemoryStore::new());
        let record = service.create(new_order("p@x.com")).await.unwrap();
        service
            .set_payment_sent(&record.key, true, PaymentActor::Customer)
            .await
            .unwrap();
        service.confirm_payment(&record.key, true).await.unwrap();

        let stored = service
            .store()
            .get(Collection::Orders, &record.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(PaymentState::of(&stored.fields), PaymentState::Confirmed);
    }

    #[tokio::test]
    async fn listings_sort_by_service_date_newest_first() {
        let service = OrderService::new(MemoryStore::new());
        for (items, date) in [("a", "2024-01-10"), ("b", "2024-03-05"), ("c", "2024-02-01")] {
            let mut order = new_order("p@x.com");
            order.items = items.into();
            order.date = date.into();
            service.create(order).await.unwrap();
        }

        let listed = service.list_for_customer("p@x.com").await.unwrap();
        let items: Vec<_> = listed
            .iter()
            .map(|r| r.fields["items"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(items, vec!["b", "c", "a"]);
        assert_eq!(service.count_for_customer("p@x.com").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_removes_the_order() {
        let service = OrderService::new(MemoryStore::new());
        let record = service.create(new_order("p@x.com")).await.unwrap();
        service.delete(&record.key).await.unwrap();
        assert!(service.list_all().await.unwrap().is_empty());
    }
}
