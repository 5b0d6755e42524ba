//! Store interfaces consumed by the seeder and the identity endpoints.
//!
//! Persistence lives elsewhere; implementations only need to honour the
//! uniqueness of role names and account emails (compared through
//! [`crate::types::normalize_key`]).

use async_trait::async_trait;
use thiserror::Error;

use crate::policy::PolicyViolation;
use crate::types::{Account, Role, RoleAssignment};

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn role_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn create_role(&self, name: &str) -> Result<Role, StoreError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Creates an account whose user name and email are both `email`.
    async fn create_account(&self, email: &str, secret: &str) -> Result<Account, StoreError>;
}

#[async_trait]
pub trait AssignmentService: Send + Sync {
    /// Links the account to the role. Fails with [`StoreError::Reference`] when the role is unknown.
    async fn assign_role(
        &self,
        account: &Account,
        role_name: &str,
    ) -> Result<RoleAssignment, StoreError>;

    async fn is_in_role(&self, account: &Account, role_name: &str) -> Result<bool, StoreError>;
}

/// Failures surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {}", describe(.0))]
    Validation(Vec<PolicyViolation>),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unknown reference: {0}")]
    Reference(String),
    #[error("store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unavailable(Box::new(err))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Reference(_) => "reference",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

fn describe(violations: &[PolicyViolation]) -> String {
    violations
        .iter()
        .map(PolicyViolation::describe)
        .collect::<Vec<_>>()
        .join("; ")
}
