// 💳 Account Entity - where operations are booked
//
// The balance is never stored: it is derived from the opening balance and
// the operations booked on the account (see budget::calculate_account_balance).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    #[default]
    Checking,
    Savings,
    Cash,
    CreditCard,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Checking => "Checking",
            AccountKind::Savings => "Savings",
            AccountKind::Cash => "Cash",
            AccountKind::CreditCard => "Credit card",
        }
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub kind: AccountKind,

    /// Balance before the first recorded operation
    #[serde(default)]
    pub opening_balance: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub archived: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl Account {
    pub fn new(name: impl Into<String>, kind: AccountKind, opening_balance: f64) -> Self {
        Account {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            opening_balance,
            currency: default_currency(),
            archived: false,
            created_at: Utc::now(),
        }
    }

    /// Same as `new` with a caller-chosen id (imports, fixtures)
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, opening_balance: f64) -> Self {
        let mut account = Self::new(name, AccountKind::Checking, opening_balance);
        account.id = id.into();
        account
    }

    pub fn is_active(&self) -> bool {
        !self.archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_creation() {
        let account = Account::new("Compte écurie", AccountKind::Checking, 1500.0);

        assert!(!account.id.is_empty());
        assert_eq!(account.currency, "EUR");
        assert_eq!(account.opening_balance, 1500.0);
        assert!(account.is_active());
    }

    #[test]
    fn test_account_json_defaults() {
        let account: Account =
            serde_json::from_str(r#"{"id":"acc1","name":"Caisse"}"#).unwrap();

        assert_eq!(account.kind, AccountKind::Checking);
        assert_eq!(account.opening_balance, 0.0);
        assert_eq!(account.currency, "EUR");
        assert!(!account.archived);
    }
}
