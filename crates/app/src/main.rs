mod auth;
mod home;
mod problem;
mod router;
mod seed;
mod telemetry;

use std::net::SocketAddr;

use tracing::info;

use rolebase_core::SeedOptions;
use rolebase_storage::Database;
use rolebase_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", "database ready");

    let plan = seed::load_plan(&config.seed)?;
    let report = seed::run_startup_seed(
        &database,
        &plan,
        SeedOptions {
            repair_missing_assignments: config.seed.repair_assignments,
        },
    )
    .await?;
    info!(
        stage = "seed",
        roles_created = report.roles_created,
        roles_existing = report.roles_existing,
        accounts_created = report.accounts_created,
        accounts_skipped = report.accounts_skipped,
        assignments_repaired = report.assignments_repaired,
        "startup seed complete"
    );

    let sessions = auth::SessionTokens::new(&config.session.secret, config.session.ttl_secs);
    let state = router::AppState::new(
        metrics,
        database,
        sessions,
        config.environment,
        config.require_confirmed_account,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
