use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const ALLOWED_USER_NAME_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._@+";

/// Rules a credential secret must satisfy before an account can be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    #[serde(default = "PasswordPolicy::default_required_length")]
    pub required_length: usize,
    #[serde(default = "PasswordPolicy::default_unique_chars")]
    pub required_unique_chars: usize,
    #[serde(default = "enabled")]
    pub require_digit: bool,
    #[serde(default = "enabled")]
    pub require_lowercase: bool,
    #[serde(default = "enabled")]
    pub require_uppercase: bool,
    #[serde(default = "enabled")]
    pub require_non_alphanumeric: bool,
}

fn enabled() -> bool {
    true
}

impl PasswordPolicy {
    fn default_required_length() -> usize {
        6
    }

    fn default_unique_chars() -> usize {
        1
    }

    /// Checks the secret and returns every rule it breaks.
    pub fn validate(&self, password: &str) -> Result<(), Vec<PolicyViolation>> {
        let mut violations = Vec::new();

        if password.chars().count() < self.required_length {
            violations.push(PolicyViolation::TooShort(self.required_length));
        }
        if self.require_non_alphanumeric && password.chars().all(|c| c.is_ascii_alphanumeric()) {
            violations.push(PolicyViolation::RequiresNonAlphanumeric);
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::RequiresDigit);
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push(PolicyViolation::RequiresLower);
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push(PolicyViolation::RequiresUpper);
        }
        let unique = password.chars().collect::<HashSet<_>>().len();
        if unique < self.required_unique_chars {
            violations.push(PolicyViolation::RequiresUniqueChars(
                self.required_unique_chars,
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            required_length: Self::default_required_length(),
            required_unique_chars: Self::default_unique_chars(),
            require_digit: true,
            require_lowercase: true,
            require_uppercase: true,
            require_non_alphanumeric: true,
        }
    }
}

/// Checks the identifier of a new account. The email doubles as the user name.
pub fn validate_identity(user_name: &str, email: &str) -> Result<(), Vec<PolicyViolation>> {
    let mut violations = Vec::new();

    if user_name.is_empty()
        || !user_name
            .chars()
            .all(|c| ALLOWED_USER_NAME_CHARS.contains(c))
    {
        violations.push(PolicyViolation::InvalidUserName(user_name.to_string()));
    }

    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !valid_email {
        violations.push(PolicyViolation::InvalidEmail(email.to_string()));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// A single broken account rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort(usize),
    RequiresNonAlphanumeric,
    RequiresDigit,
    RequiresLower,
    RequiresUpper,
    RequiresUniqueChars(usize),
    InvalidUserName(String),
    InvalidEmail(String),
}

impl PolicyViolation {
    /// Stable identifier used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooShort(_) => "password_too_short",
            Self::RequiresNonAlphanumeric => "password_requires_non_alphanumeric",
            Self::RequiresDigit => "password_requires_digit",
            Self::RequiresLower => "password_requires_lower",
            Self::RequiresUpper => "password_requires_upper",
            Self::RequiresUniqueChars(_) => "password_requires_unique_chars",
            Self::InvalidUserName(_) => "invalid_user_name",
            Self::InvalidEmail(_) => "invalid_email",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::TooShort(len) => format!("passwords must be at least {len} characters"),
            Self::RequiresNonAlphanumeric => {
                "passwords must have at least one non alphanumeric character".to_string()
            }
            Self::RequiresDigit => "passwords must have at least one digit ('0'-'9')".to_string(),
            Self::RequiresLower => {
                "passwords must have at least one lowercase ('a'-'z')".to_string()
            }
            Self::RequiresUpper => {
                "passwords must have at least one uppercase ('A'-'Z')".to_string()
            }
            Self::RequiresUniqueChars(count) => {
                format!("passwords must use at least {count} different characters")
            }
            Self::InvalidUserName(name) => {
                format!("user name '{name}' is invalid, can only contain letters or digits")
            }
            Self::InvalidEmail(email) => format!("email '{email}' is invalid"),
        }
    }
}
