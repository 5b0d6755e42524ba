use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use rolebase_core::types::{normalize_key, Account};
use rolebase_core::AccountStore;
use rolebase_storage::RoleSummary;

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const ADMINISTRATOR_ROLE: &str = "Administrator";
const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Issues and checks HS256 session tokens.
#[derive(Clone)]
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::seconds(ttl_secs.min(MAX_SESSION_TTL_SECS) as i64),
        }
    }

    pub fn issue(
        &self,
        account: &Account,
        roles: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sub: account.id.clone(),
            email: account.email.clone(),
            roles,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Encode)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Decodes the token and checks its expiry against `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?
            .claims;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Encode(jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
}

/// Authenticated caller resolved from a `Bearer` session token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub account_id: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_in_role(&self, role: &str) -> bool {
        let wanted = normalize_key(role);
        self.roles.iter().any(|held| normalize_key(held) == wanted)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ProblemResponse::unauthorized("missing_token", "authorization header is required")
            })?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ProblemResponse::unauthorized("invalid_token", "expected a Bearer token")
            })?;

        let claims = state
            .sessions()
            .validate(token, state.now())
            .map_err(|err| ProblemResponse::unauthorized("invalid_token", err.to_string()))?;

        Ok(Self {
            account_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: String,
    pub email: String,
    pub user_name: String,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
}

impl AccountView {
    fn new(account: Account, roles: Vec<String>) -> Self {
        Self {
            id: account.id,
            email: account.email,
            user_name: account.user_name,
            email_confirmed: account.email_confirmed,
            roles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub roles: Vec<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, ProblemResponse> {
    let created = state
        .storage()
        .accounts()
        .create_account(credentials.email.trim(), &credentials.password)
        .await;

    match created {
        Ok(account) => {
            counter!("auth_register_total", "result" => "created").increment(1);
            info!(stage = "auth", email = %account.email, "account registered");
            Ok((
                StatusCode::CREATED,
                Json(AccountView::new(account, Vec::new())),
            ))
        }
        Err(err) => {
            counter!("auth_register_total", "result" => err.kind()).increment(1);
            Err(err.into())
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<LoginResponse>, ProblemResponse> {
    let storage = state.storage();
    let account = storage
        .accounts()
        .verify_credentials(credentials.email.trim(), &credentials.password)
        .await?;

    let Some(account) = account else {
        counter!("auth_login_total", "result" => "invalid_credentials").increment(1);
        warn!(stage = "auth", email = %credentials.email, "login rejected");
        return Err(ProblemResponse::unauthorized(
            "invalid_credentials",
            "invalid email or password",
        ));
    };

    if state.require_confirmed_account() && !account.email_confirmed {
        counter!("auth_login_total", "result" => "unconfirmed").increment(1);
        return Err(ProblemResponse::forbidden(
            "email_not_confirmed",
            "the account email must be confirmed before signing in",
        ));
    }

    let roles = storage.assignments().roles_for(&account.id).await?;
    let issued = state
        .sessions()
        .issue(&account, roles.clone(), state.now())
        .map_err(|err| {
            ProblemResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_issue_failed",
                err.to_string(),
            )
        })?;

    counter!("auth_login_total", "result" => "success").increment(1);
    info!(stage = "auth", email = %account.email, "login succeeded");
    Ok(Json(LoginResponse {
        token: issued.token,
        token_type: "Bearer",
        expires_at: issued.expires_at,
        roles,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<AccountView>, ProblemResponse> {
    let storage = state.storage();
    let account = storage
        .accounts()
        .find_by_id(&principal.account_id)
        .await?
        .ok_or_else(|| {
            ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "account_not_found",
                "the signed-in account no longer exists",
            )
        })?;
    let roles = storage.assignments().roles_for(&account.id).await?;
    Ok(Json(AccountView::new(account, roles)))
}

pub async fn admin_roles(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<RoleSummary>>, ProblemResponse> {
    if !principal.is_in_role(ADMINISTRATOR_ROLE) {
        return Err(ProblemResponse::forbidden(
            "forbidden",
            format!("the {ADMINISTRATOR_ROLE} role is required"),
        ));
    }
    let roles = state.storage().roles().list_with_member_counts().await?;
    Ok(Json(roles))
}
