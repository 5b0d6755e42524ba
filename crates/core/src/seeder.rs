use thiserror::Error;
use tracing::{debug, info};

use crate::seed::{SeedAccount, SeedPlan};
use crate::store::{AccountStore, AssignmentService, RoleStore, StoreError};
use crate::types::Account;

/// Behaviour switches for [`Seeder::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedOptions {
    /// When set, accounts that already exist receive their designated role if
    /// they lack it. Off by default: existing accounts are left untouched.
    pub repair_missing_assignments: bool,
}

/// What a seeding pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: usize,
    pub roles_existing: usize,
    pub accounts_created: usize,
    /// Existing accounts left exactly as they were.
    pub accounts_skipped: usize,
    pub assignments_repaired: usize,
}

impl SeedReport {
    /// `true` when the pass created nothing, i.e. the store was already seeded.
    pub fn is_noop(&self) -> bool {
        self.roles_created == 0 && self.accounts_created == 0 && self.assignments_repaired == 0
    }
}

/// Ensures the roles and demo accounts of a [`SeedPlan`] exist.
///
/// Every step is an existence check followed by a create. Nothing is retried:
/// the first store failure aborts the pass and is returned to the caller.
pub struct Seeder<'a> {
    roles: &'a dyn RoleStore,
    accounts: &'a dyn AccountStore,
    assignments: &'a dyn AssignmentService,
    options: SeedOptions,
}

impl<'a> Seeder<'a> {
    pub fn new(
        roles: &'a dyn RoleStore,
        accounts: &'a dyn AccountStore,
        assignments: &'a dyn AssignmentService,
    ) -> Self {
        Self {
            roles,
            accounts,
            assignments,
            options: SeedOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SeedOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(&self, plan: &SeedPlan) -> Result<SeedReport, SeedError> {
        let mut report = SeedReport::default();

        for name in &plan.roles {
            self.ensure_role(name, &mut report).await?;
        }

        for seed in &plan.accounts {
            self.ensure_account(seed, &mut report).await?;
        }

        info!(
            stage = "seed",
            roles_created = report.roles_created,
            roles_existing = report.roles_existing,
            accounts_created = report.accounts_created,
            accounts_skipped = report.accounts_skipped,
            assignments_repaired = report.assignments_repaired,
            "seeding finished"
        );
        Ok(report)
    }

    async fn ensure_role(&self, name: &str, report: &mut SeedReport) -> Result<(), SeedError> {
        let role_err = |source| SeedError::Role {
            name: name.to_string(),
            source,
        };

        if self.roles.role_exists(name).await.map_err(role_err)? {
            report.roles_existing += 1;
            return Ok(());
        }

        self.roles.create_role(name).await.map_err(role_err)?;
        info!(stage = "seed", role = %name, "created role");
        report.roles_created += 1;
        Ok(())
    }

    async fn ensure_account(
        &self,
        seed: &SeedAccount,
        report: &mut SeedReport,
    ) -> Result<(), SeedError> {
        let account_err = |source| SeedError::Account {
            email: seed.email.clone(),
            source,
        };

        let existing = self
            .accounts
            .find_by_email(&seed.email)
            .await
            .map_err(account_err)?;

        if let Some(account) = existing {
            if self.options.repair_missing_assignments
                && self.repair_assignment(&account, seed).await?
            {
                report.assignments_repaired += 1;
            } else {
                debug!(stage = "seed", email = %seed.email, "account exists, skipping");
                report.accounts_skipped += 1;
            }
            return Ok(());
        }

        let account = self
            .accounts
            .create_account(&seed.email, &seed.password)
            .await
            .map_err(account_err)?;
        self.assign(&account, seed).await?;

        info!(stage = "seed", email = %seed.email, role = %seed.role, "created account");
        report.accounts_created += 1;
        Ok(())
    }

    /// Assigns the designated role when the account lacks it. Returns whether anything changed.
    async fn repair_assignment(
        &self,
        account: &Account,
        seed: &SeedAccount,
    ) -> Result<bool, SeedError> {
        let in_role = self
            .assignments
            .is_in_role(account, &seed.role)
            .await
            .map_err(|source| assignment_error(seed, source))?;
        if in_role {
            return Ok(false);
        }

        self.assign(account, seed).await?;
        info!(stage = "seed", email = %seed.email, role = %seed.role, "repaired role assignment");
        Ok(true)
    }

    async fn assign(&self, account: &Account, seed: &SeedAccount) -> Result<(), SeedError> {
        self.assignments
            .assign_role(account, &seed.role)
            .await
            .map(|_| ())
            .map_err(|source| assignment_error(seed, source))
    }
}

fn assignment_error(seed: &SeedAccount, source: StoreError) -> SeedError {
    SeedError::Assignment {
        email: seed.email.clone(),
        role: seed.role.clone(),
        source,
    }
}

/// Seeding failure, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to ensure role '{name}': {source}")]
    Role { name: String, source: StoreError },
    #[error("failed to ensure account '{email}': {source}")]
    Account { email: String, source: StoreError },
    #[error("failed to assign role '{role}' to '{email}': {source}")]
    Assignment {
        email: String,
        role: String,
        source: StoreError,
    },
}

impl SeedError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            Self::Role { source, .. }
            | Self::Account { source, .. }
            | Self::Assignment { source, .. } => source,
        }
    }
}
