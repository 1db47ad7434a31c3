use std::sync::Arc;

use tracing::{info, span, Level};

use crate::config::AppConfig;
use crate::distance::obtain_matrix;
use crate::domain::{Customer, Solution, WarehouseAllocation};
use crate::error::SolverError;
use crate::solver::model::{unique_depots, RoutingModel};
use crate::solver::{engine, race};
use crate::warehouse;

/// Drives the full pipeline: warehouse split, one matrix computation,
/// model construction, the parallel solver race, and final assembly.
pub async fn solve_problem(
    customers: &[Customer],
    config: &AppConfig,
) -> Result<(Solution, WarehouseAllocation), SolverError> {
    let allocation = {
        let allocation_span = span!(Level::INFO, "allocation");
        let _guard = allocation_span.enter();
        warehouse::allocate_customers(
            customers,
            &config.vehicles,
            &config.location,
            &config.warehouse,
        )?
    };

    if allocation.vehicle_customers.is_empty() {
        info!("no vehicle-eligible customers, skipping the solve");
        return Ok((Solution::empty(), allocation));
    }

    // The matrix is computed exactly once and shared read-only with every
    // race worker.
    let depots = unique_depots(&config.location, &config.vehicles);
    let mut locations = depots.clone();
    locations.extend(allocation.vehicle_customers.iter().filter_map(|c| c.coords));
    info!(
        "matrix over {} locations ({} depots, {} customers)",
        locations.len(),
        depots.len(),
        allocation.vehicle_customers.len()
    );

    let matrix = {
        let matrix_span = span!(Level::INFO, "matrix");
        let _guard = matrix_span.enter();
        obtain_matrix(
            &locations,
            &config.routing,
            &config.osrm,
            &config.valhalla,
            &config.cache,
        )
        .await?
    };

    let model = RoutingModel::build(
        &allocation,
        &config.vehicles,
        &config.location,
        &config.solver,
        Arc::new(matrix),
    )?;

    let solve_span = span!(Level::INFO, "solve");
    let _guard = solve_span.enter();
    let workers = race::resolve_workers(&config.solver);
    let solution = if workers > 1 {
        race::race(&model, &config.solver)?
    } else {
        engine::solve(&model, &config.solver)?
    };

    info!(
        routes = solution.routes.len(),
        dropped = solution.dropped.len(),
        distance_km = solution.total_distance_km,
        feasible = solution.feasible,
        "pipeline finished"
    );

    Ok((solution, allocation))
}

/// Start times for the flattened vehicle list, aligned with
/// `Route::vehicle_id`.
pub fn flattened_start_times(config: &AppConfig) -> Vec<u32> {
    let mut starts = Vec::new();
    for vehicle in config.vehicles.iter().filter(|v| v.enabled) {
        for _ in 0..vehicle.count {
            starts.push(vehicle.start_time_minutes);
        }
    }
    starts
}
