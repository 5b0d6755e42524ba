use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returns the lookup key used for case-insensitive uniqueness of names and emails.
///
/// Keys are compared in their upper-invariant form, so `a@x.com` and `A@X.COM`
/// refer to the same account.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Named permission group an account can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

impl Role {
    pub fn normalized_name(&self) -> String {
        normalize_key(&self.name)
    }
}

/// Login identity. The credential is write-only and never part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn normalized_email(&self) -> String {
        normalize_key(&self.email)
    }
}

/// Grants one role to one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub account_id: String,
    pub role_id: String,
}
