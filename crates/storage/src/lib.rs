use std::{str::FromStr, sync::OnceLock, time::Duration};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use rolebase_core::policy::{validate_identity, PasswordPolicy};
use rolebase_core::types::{normalize_key, Account, Role, RoleAssignment};
use rolebase_core::{AccountStore, AssignmentService, RoleStore, StoreError};

const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    password_policy: PasswordPolicy,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// File databases are created when missing.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Options)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self {
            pool,
            password_policy: PasswordPolicy::default(),
        })
    }

    /// Replaces the policy new account secrets are checked against.
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to query and create roles.
    pub fn roles(&self) -> RoleRepository {
        RoleRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to query, create and authenticate accounts.
    pub fn accounts(&self) -> AccountRepository {
        AccountRepository {
            pool: self.pool.clone(),
            policy: self.password_policy.clone(),
        }
    }

    /// Returns a handle for linking accounts to roles.
    pub fn assignments(&self) -> RoleAssignmentRepository {
        RoleAssignmentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid sqlite connection string: {0}")]
    Options(sqlx::Error),
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Maps a failed write onto the store error taxonomy.
fn classify(err: sqlx::Error, conflict: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(SQLITE_CONSTRAINT_UNIQUE) | Some(SQLITE_CONSTRAINT_PRIMARYKEY) => {
                return StoreError::Conflict(conflict());
            }
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
                return StoreError::Reference(db_err.message().to_string());
            }
            _ => {}
        }
    }
    StoreError::unavailable(err)
}

/// Repository for the `roles` table.
#[derive(Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

impl RoleRepository {
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT id, name FROM roles WHERE normalized_name = ?")
            .bind(normalize_key(name))
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(row.map(RoleRow::into_domain))
    }

    /// Lists every role with the number of accounts holding it, ordered by name.
    pub async fn list_with_member_counts(&self) -> Result<Vec<RoleSummary>, StoreError> {
        sqlx::query_as::<_, RoleSummary>(
            "SELECT r.name, COUNT(ar.account_id) AS members \
               FROM roles AS r \
               LEFT JOIN account_roles AS ar ON ar.role_id = r.id \
              GROUP BY r.id, r.name \
              ORDER BY r.name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::unavailable)
    }
}

#[async_trait]
impl RoleStore for RoleRepository {
    async fn role_exists(&self, name: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM roles WHERE normalized_name = ?")
            .bind(normalize_key(name))
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(row.is_some())
    }

    async fn create_role(&self, name: &str) -> Result<Role, StoreError> {
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        sqlx::query(
            "INSERT INTO roles (id, name, normalized_name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(role.normalized_name())
        .bind(to_rfc3339(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|err| classify(err, || format!("role '{name}' already exists")))?;

        debug!(stage = "storage", role = %name, id = %role.id, "inserted role");
        Ok(role)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    id: String,
    name: String,
}

impl RoleRow {
    fn into_domain(self) -> Role {
        Role {
            id: self.id,
            name: self.name,
        }
    }
}

/// Role name with its member count.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct RoleSummary {
    pub name: String,
    pub members: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    user_name: String,
    email: String,
    email_confirmed: bool,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> Account {
        Account {
            id: self.id,
            user_name: self.user_name,
            email: self.email,
            email_confirmed: self.email_confirmed,
            created_at: self.created_at,
        }
    }
}

/// Repository for the `accounts` table.
#[derive(Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
    policy: PasswordPolicy,
}

impl AccountRepository {
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, user_name, email, email_confirmed, created_at FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        Ok(row.map(AccountRow::into_domain))
    }

    /// Returns the account when `password` matches its stored hash.
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM accounts WHERE normalized_email = ?")
                .bind(normalize_key(email))
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::unavailable)?;

        let Some((hash,)) = row else {
            // Unknown emails pay the same hashing cost as a wrong password.
            verify_password(password, dummy_hash());
            return Ok(None);
        };
        if !verify_password(password, &hash) {
            return Ok(None);
        }
        self.find_by_email(email).await
    }

    pub async fn confirm_email(&self, account_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET email_confirmed = 1 WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Reference(format!(
                "account '{account_id}' does not exist"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, user_name, email, email_confirmed, created_at \
               FROM accounts WHERE normalized_email = ?",
        )
        .bind(normalize_key(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        Ok(row.map(AccountRow::into_domain))
    }

    async fn create_account(&self, email: &str, secret: &str) -> Result<Account, StoreError> {
        let mut violations = validate_identity(email, email).err().unwrap_or_default();
        if let Err(password_violations) = self.policy.validate(secret) {
            violations.extend(password_violations);
        }
        if !violations.is_empty() {
            return Err(StoreError::Validation(violations));
        }

        let password_hash = hash_password(secret)?;
        let account = Account {
            id: Uuid::new_v4().to_string(),
            user_name: email.to_string(),
            email: email.to_string(),
            email_confirmed: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO accounts \
             (id, user_name, normalized_user_name, email, normalized_email, email_confirmed, password_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&account.id)
        .bind(&account.user_name)
        .bind(normalize_key(&account.user_name))
        .bind(&account.email)
        .bind(account.normalized_email())
        .bind(&password_hash)
        .bind(to_rfc3339(account.created_at))
        .execute(&self.pool)
        .await
        .map_err(|err| classify(err, || format!("email '{email}' is already taken")))?;

        debug!(stage = "storage", %email, id = %account.id, "inserted account");
        Ok(account)
    }
}

/// Repository for the `account_roles` link table.
#[derive(Clone)]
pub struct RoleAssignmentRepository {
    pool: SqlitePool,
}

impl RoleAssignmentRepository {
    /// Role names held by the account, ordered by name.
    pub async fn roles_for(&self, account_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name FROM account_roles AS ar \
               JOIN roles AS r ON r.id = ar.role_id \
              WHERE ar.account_id = ? \
              ORDER BY r.name",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

#[async_trait]
impl AssignmentService for RoleAssignmentRepository {
    async fn assign_role(
        &self,
        account: &Account,
        role_name: &str,
    ) -> Result<RoleAssignment, StoreError> {
        let role: Option<(String,)> = sqlx::query_as("SELECT id FROM roles WHERE normalized_name = ?")
            .bind(normalize_key(role_name))
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        let Some((role_id,)) = role else {
            return Err(StoreError::Reference(format!(
                "role '{role_name}' does not exist"
            )));
        };

        sqlx::query("INSERT INTO account_roles (account_id, role_id) VALUES (?, ?)")
            .bind(&account.id)
            .bind(&role_id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                classify(err, || {
                    format!("'{}' is already in role '{role_name}'", account.email)
                })
            })?;

        Ok(RoleAssignment {
            account_id: account.id.clone(),
            role_id,
        })
    }

    async fn is_in_role(&self, account: &Account, role_name: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM account_roles AS ar \
               JOIN roles AS r ON r.id = ar.role_id \
              WHERE ar.account_id = ? AND r.normalized_name = ?",
        )
        .bind(&account.id)
        .bind(normalize_key(role_name))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        Ok(row.is_some())
    }
}

fn hash_password(secret: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| StoreError::unavailable(PasswordHashError(err.to_string())))
}

/// Hash of a random secret, checked against when no account matches.
fn dummy_hash() -> &'static str {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    DUMMY_HASH.get_or_init(|| {
        let secret = SaltString::generate(&mut OsRng);
        hash_password(secret.as_str()).unwrap_or_default()
    })
}

fn verify_password(secret: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
struct PasswordHashError(String);

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
