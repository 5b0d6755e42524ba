use serde::{Deserialize, Serialize};

use crate::types::normalize_key;

/// Demo account the seeder guarantees on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
    pub role: String,
}

/// Baseline reference data: the roles and demo accounts that must exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPlan {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

impl SeedPlan {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Role names referenced by accounts but not listed in `roles`.
    ///
    /// The seeder does not reject such plans; assigning them fails at runtime.
    pub fn undeclared_roles(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for account in &self.accounts {
            let wanted = normalize_key(&account.role);
            let declared = self.roles.iter().any(|role| normalize_key(role) == wanted);
            if !declared && !missing.contains(&account.role.as_str()) {
                missing.push(account.role.as_str());
            }
        }
        missing
    }
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            roles: vec![
                "Administrator".to_string(),
                "Manager".to_string(),
                "User".to_string(),
            ],
            accounts: vec![
                SeedAccount {
                    email: "mattias@miun.se".to_string(),
                    password: "Password123!".to_string(),
                    role: "Administrator".to_string(),
                },
                SeedAccount {
                    email: "user@miun.se".to_string(),
                    password: "Password123!".to_string(),
                    role: "User".to_string(),
                },
            ],
        }
    }
}
