use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use rolebase_storage::Database;
use rolebase_util::Environment;

use crate::auth::{self, SessionTokens};
use crate::home;
use crate::problem::ProblemResponse;
use crate::telemetry;

/// Thirty days, sent on every response in production.
const HSTS_VALUE: &str = "max-age=2592000";

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    sessions: SessionTokens,
    environment: Environment,
    require_confirmed_account: bool,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        sessions: SessionTokens,
        environment: Environment,
        require_confirmed_account: bool,
    ) -> Self {
        Self {
            metrics,
            storage,
            sessions,
            environment,
            require_confirmed_account,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn sessions(&self) -> &SessionTokens {
        &self.sessions
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn require_confirmed_account(&self) -> bool {
        self.require_confirmed_account
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    let production = state.environment().is_production();

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/", get(home::index))
        .route("/home", get(home::index))
        .route("/home/index", get(home::index))
        .route("/home/privacy", get(home::privacy))
        .route("/home/error", get(home::error))
        .route("/account/register", post(auth::register))
        .route("/account/login", post(auth::login))
        .route("/account/me", get(auth::me))
        .route("/admin/roles", get(auth::admin_roles))
        .fallback(not_found)
        .with_state(state);

    if production {
        router.layer(middleware::from_fn(strict_transport_security))
    } else {
        router
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn not_found() -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::NOT_FOUND,
        "not_found",
        "no route matches the requested path",
    )
}

async fn strict_transport_security(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static(HSTS_VALUE),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use rolebase_core::AccountStore;
    use rolebase_core::{SeedOptions, SeedPlan};

    use crate::seed::run_startup_seed;

    const ADMIN_EMAIL: &str = "mattias@miun.se";
    const USER_EMAIL: &str = "user@miun.se";
    const SEED_PASSWORD: &str = "Password123!";

    async fn seeded_database() -> Database {
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        run_startup_seed(&database, &SeedPlan::default(), SeedOptions::default())
            .await
            .expect("seed");
        database
    }

    async fn setup_state_with(environment: Environment, require_confirmed: bool) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        AppState::new(
            metrics,
            seeded_database().await,
            SessionTokens::new(b"test-session-secret", 3600),
            environment,
            require_confirmed,
        )
    }

    async fn setup_state() -> AppState {
        setup_state_with(Environment::Test, false).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("handler should respond");
        let status = response.status();
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let bytes = collected.to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authorized_get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn login(app: &Router, email: &str, password: &str) -> (StatusCode, Value) {
        send(
            app.clone(),
            json_post(
                "/account/login",
                json!({ "email": email, "password": password }),
            ),
        )
        .await
    }

    async fn token_for(app: &Router, email: &str) -> String {
        let (status, body) = login(app, email, SEED_PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().expect("token").to_string()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::STRICT_TRANSPORT_SECURITY)
            .is_none());
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn default_route_renders_home_page() {
        for uri in ["/", "/home", "/home/index", "/home/privacy", "/home/error"] {
            let app = app_router(setup_state().await);
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .expect("handler should respond");

            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            assert!(content_type.starts_with("text/html"), "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_problem_json() {
        let app = app_router(setup_state().await);

        let (status, body) = send(
            app,
            Request::builder()
                .uri("/nowhere")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "not_found");
    }

    #[tokio::test]
    async fn production_adds_hsts_header() {
        let app = app_router(setup_state_with(Environment::Production, false).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(
            response
                .headers()
                .get(header::STRICT_TRANSPORT_SECURITY)
                .and_then(|value| value.to_str().ok()),
            Some(HSTS_VALUE)
        );
    }

    #[tokio::test]
    async fn seeded_admin_can_sign_in() {
        let app = app_router(setup_state().await);

        let (status, body) = login(&app, ADMIN_EMAIL, SEED_PASSWORD).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["roles"], json!(["Administrator"]));
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = app_router(setup_state().await);

        let (status, body) = login(&app, ADMIN_EMAIL, "Password123?").await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "invalid_credentials");
    }

    #[tokio::test]
    async fn unconfirmed_account_is_rejected_when_confirmation_required() {
        let state = setup_state_with(Environment::Test, true).await;
        let accounts = state.storage().accounts();
        let app = app_router(state);

        let (status, body) = login(&app, USER_EMAIL, SEED_PASSWORD).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["type"], "email_not_confirmed");

        let account = accounts
            .find_by_email(USER_EMAIL)
            .await
            .expect("lookup")
            .expect("seeded user");
        accounts.confirm_email(&account.id).await.expect("confirm");

        let (status, _) = login(&app, USER_EMAIL, SEED_PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn me_returns_current_account() {
        let app = app_router(setup_state().await);
        let token = token_for(&app, USER_EMAIL).await;

        let (status, body) = send(app, authorized_get("/account/me", &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], USER_EMAIL);
        assert_eq!(body["user_name"], USER_EMAIL);
        assert_eq!(body["roles"], json!(["User"]));
    }

    #[tokio::test]
    async fn me_requires_token() {
        let app = app_router(setup_state().await);

        let (status, body) = send(
            app.clone(),
            Request::builder()
                .uri("/account/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "missing_token");

        let (status, body) = send(app, authorized_get("/account/me", "not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "invalid_token");
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let state = setup_state().await;
        let later = Utc::now() + Duration::hours(2);
        let app = app_router(state.clone());
        let token = token_for(&app, USER_EMAIL).await;

        let expired_app = app_router(state.with_clock(Arc::new(move || later)));
        let (status, body) = send(expired_app, authorized_get("/account/me", &token)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "invalid_token");
    }

    #[tokio::test]
    async fn admin_roles_lists_member_counts() {
        let app = app_router(setup_state().await);
        let token = token_for(&app, ADMIN_EMAIL).await;

        let (status, body) = send(app, authorized_get("/admin/roles", &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "name": "Administrator", "members": 1 },
                { "name": "Manager", "members": 0 },
                { "name": "User", "members": 1 },
            ])
        );
    }

    #[tokio::test]
    async fn admin_roles_forbidden_for_users() {
        let app = app_router(setup_state().await);
        let token = token_for(&app, USER_EMAIL).await;

        let (status, body) = send(app, authorized_get("/admin/roles", &token)).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["type"], "forbidden");
    }

    #[tokio::test]
    async fn register_creates_account_without_roles() {
        let app = app_router(setup_state().await);

        let (status, body) = send(
            app.clone(),
            json_post(
                "/account/register",
                json!({ "email": "new@miun.se", "password": "Sup3r$ecret" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "new@miun.se");
        assert_eq!(body["roles"], json!([]));

        let (status, body) = login(&app, "new@miun.se", "Sup3r$ecret").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["roles"], json!([]));
    }

    #[tokio::test]
    async fn register_rejects_weak_password() {
        let app = app_router(setup_state().await);

        let (status, body) = send(
            app,
            json_post(
                "/account/register",
                json!({ "email": "new@miun.se", "password": "short" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "validation_failed");
        let errors = body["errors"].as_array().expect("error codes");
        assert!(errors.contains(&json!("password_too_short")));
    }

    #[tokio::test]
    async fn register_conflicts_with_seeded_email() {
        let app = app_router(setup_state().await);

        let (status, body) = send(
            app,
            json_post(
                "/account/register",
                json!({ "email": "USER@miun.se", "password": SEED_PASSWORD }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "conflict");
    }
}
