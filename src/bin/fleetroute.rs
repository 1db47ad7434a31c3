use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleetroute::config::{AppConfig, RoutingEngine};
use fleetroute::{fixtures, input, orchestrator, summary};

/// Demo size when no customer file is given.
const DEMO_CUSTOMERS: usize = 40;
const DEMO_SEED: u64 = 64;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().compact())
        .init();

    dotenv().ok();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let mut config = AppConfig::default();
    apply_env_overrides(&mut config);

    let customers = match env::args().nth(1) {
        Some(path) => input::load_customers_csv(&PathBuf::from(path))?,
        None => {
            info!("no customer file given, generating {DEMO_CUSTOMERS} demo customers");
            fixtures::generate_customers(DEMO_CUSTOMERS, DEMO_SEED)
        }
    };

    info!(
        "solving for {} customers with {} enabled vehicle classes",
        customers.len(),
        config.enabled_vehicles().len()
    );

    let (solution, allocation) = orchestrator::solve_problem(&customers, &config).await?;

    let start_times = orchestrator::flattened_start_times(&config);
    summary::print_summary(&solution, &allocation, &config.solver, &start_times);

    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(url) = env::var("OSRM_BASE_URL") {
        config.osrm.base_url = url;
    }
    if let Ok(url) = env::var("VALHALLA_BASE_URL") {
        config.valhalla.base_url = url;
        config.routing.engine = RoutingEngine::Valhalla;
    }
    if let Ok(dir) = env::var("FLEETROUTE_CACHE_DIR") {
        config.cache.dir = PathBuf::from(dir);
    }
    if let Ok(limit) = env::var("FLEETROUTE_TIME_LIMIT") {
        if let Ok(seconds) = limit.parse::<u64>() {
            config.solver.time_limit_seconds = seconds;
        }
    }
}
