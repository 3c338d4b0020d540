//! User accounts.
//!
//! Identity records for both sides of the system. The email on a user
//! record is the join key to orders, grants and redemptions — not the
//! record key — so a mismatched or missing email silently orphans that
//! customer's ledger rows. That fragility is inherited from the data
//! already in production and is tolerated, not repaired.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::now_ms;
use crate::store::{Collection, Record, RecordStore};
use crate::value_str;

/// Account role. Anything that is not explicitly `admin` is treated as a
/// customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl Role {
    pub fn of(fields: &Value) -> Self {
        match fields.get("role").and_then(|v| v.as_str()) {
            Some("admin") => Role::Admin,
            _ => Role::Customer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
        }
    }
}

/// Account lookups and creation over the record store.
pub struct UserDirectory<S> {
    store: Arc<S>,
}

impl<S> Clone for UserDirectory<S> {
    fn clone(&self) -> Self {
        UserDirectory {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordStore> UserDirectory<S> {
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<S>) -> Self {
        UserDirectory { store }
    }

    /// First account carrying this email, if any.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Record>, LedgerError> {
        let mut hits = self
            .store
            .fetch_by_field(Collection::Users, "email", email)
            .await?;
        Ok(if hits.is_empty() {
            None
        } else {
            Some(hits.remove(0))
        })
    }

    pub async fn find_by_phone(&self, phone: &str) -> Result<Vec<Record>, LedgerError> {
        Ok(self
            .store
            .fetch_by_field(Collection::Users, "phone", phone)
            .await?)
    }

    /// Create a customer-role account.
    pub async fn create_customer(
        &self,
        name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Record, LedgerError> {
        if email.trim().is_empty() {
            return Err(LedgerError::validation(
                "email",
                "email is required; it is the ledger join key",
            ));
        }
        if name.trim().is_empty() {
            return Err(LedgerError::validation("name", "customer name is required"));
        }

        let record = self
            .store
            .create(
                Collection::Users,
                json!({
                    "name": name.trim(),
                    "email": email.trim(),
                    "phone": phone.trim(),
                    "role": Role::Customer.as_str(),
                    "createdAt": now_ms(),
                }),
            )
            .await?;
        info!(user = %record.key, email = %email.trim(), "Customer account created");
        Ok(record)
    }

    /// Reuse an existing account when one already holds this phone number
    /// with the same email; otherwise create a fresh customer account.
    /// This is the new-member flow of the admin dashboard.
    pub async fn ensure_customer_account(
        &self,
        name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Record, LedgerError> {
        let same_phone = self.find_by_phone(phone).await?;
        for user in same_phone {
            if value_str(&user.fields, &["email"]).as_deref() == Some(email.trim()) {
                return Ok(user);
            }
        }
        self.create_customer(name, email, phone).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn role_parsing_defaults_to_customer() {
        assert_eq!(Role::of(&json!({ "role": "admin" })), Role::Admin);
        assert_eq!(Role::of(&json!({ "role": "customer" })), Role::Customer);
        assert_eq!(Role::of(&json!({ "role": "manager" })), Role::Customer);
        assert_eq!(Role::of(&json!({})), Role::Customer);
    }

    #[tokio::test]
    async fn create_customer_requires_an_email() {
        let directory = UserDirectory::new(MemoryStore::new());
        let err = directory
            .create_customer("Paulie", "  ", "2101234567")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field: "email", .. }));
    }

    #[tokio::test]
    async fn ensure_account_reuses_matching_phone_and_email() {
        let directory = UserDirectory::new(MemoryStore::new());
        let first = directory
            .ensure_customer_account("Paulie", "p@x.com", "2101234567")
            .await
            .unwrap();
        let second = directory
            .ensure_customer_account("Paulie", "p@x.com", "2101234567")
            .await
            .unwrap();
        assert_eq!(first.key, second.key);
    }

    #[tokio::test]
    async fn ensure_account_creates_when_email_differs_on_shared_phone() {
        let directory = UserDirectory::new(MemoryStore::new());
        let first = directory
            .ensure_customer_account("Paulie", "p@x.com", "2101234567")
            .await
            .unwrap();
        let second = directory
            .ensure_customer_account("Carmela", "c@x.com", "2101234567")
            .await
            .unwrap();
        assert_ne!(first.key, second.key);
        assert_eq!(second.fields["role"], "customer");
    }

    #[tokio::test]
    async fn find_by_email_returns_the_account() {
        let directory = UserDirectory::new(MemoryStore::new());
        directory
            .create_customer("Paulie", "p@x.com", "2101234567")
            .await
            .unwrap();
        let found = directory.find_by_email("p@x.com").await.unwrap().unwrap();
        assert_eq!(found.fields["name"], "Paulie");
        assert!(directory.find_by_email("x@x.com").await.unwrap().is_none());
    }
}
