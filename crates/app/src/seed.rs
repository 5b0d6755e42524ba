use std::{fs, io, path::PathBuf};

use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use rolebase_core::{SeedError, SeedOptions, SeedPlan, SeedReport, Seeder};
use rolebase_storage::Database;
use rolebase_util::SeedSettings;

/// Resolves the seed plan: the JSON file named by the settings, or the built-in demo data.
pub fn load_plan(settings: &SeedSettings) -> Result<SeedPlan, SeedPlanError> {
    let Some(path) = settings.config_path.as_ref() else {
        return Ok(SeedPlan::default());
    };

    let raw = fs::read_to_string(path).map_err(|source| SeedPlanError::Read {
        path: path.clone(),
        source,
    })?;
    let plan = SeedPlan::from_json(&raw).map_err(|source| SeedPlanError::Parse {
        path: path.clone(),
        source,
    })?;

    info!(stage = "seed", path = %path.display(), roles = plan.roles.len(), accounts = plan.accounts.len(), "loaded seed plan");
    Ok(plan)
}

/// Runs the seeder once against the database. Any failure is returned so startup aborts.
pub async fn run_startup_seed(
    database: &Database,
    plan: &SeedPlan,
    options: SeedOptions,
) -> Result<SeedReport, SeedError> {
    for role in plan.undeclared_roles() {
        warn!(stage = "seed", %role, "seed account references a role that is not in the role list");
    }

    let roles = database.roles();
    let accounts = database.accounts();
    let assignments = database.assignments();

    let report = Seeder::new(&roles, &accounts, &assignments)
        .with_options(options)
        .run(plan)
        .await
        .map_err(|err| {
            error!(stage = "seed", kind = err.store_error().kind(), error = %err, "seeding failed");
            err
        })?;

    counter!("seed_roles_created_total").increment(report.roles_created as u64);
    counter!("seed_accounts_created_total").increment(report.accounts_created as u64);
    counter!("seed_accounts_skipped_total").increment(report.accounts_skipped as u64);
    counter!("seed_assignments_repaired_total").increment(report.assignments_repaired as u64);
    Ok(report)
}

#[derive(Debug, Error)]
pub enum SeedPlanError {
    #[error("failed to read seed plan {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse seed plan {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
