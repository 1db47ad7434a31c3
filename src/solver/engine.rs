use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, span, warn, Level};

use crate::config::{FirstSolutionStrategy, Metaheuristic, SolverConfig};
use crate::domain::{Route, Solution};
use crate::error::SolverError;
use crate::solver::construct::first_solution;
use crate::solver::evaluation::{objective, Assignment};
use crate::solver::improve::improve;
use crate::solver::model::{RoutingModel, VehicleSpec};
use crate::solver::reconfigure;

/// Runs the two-phase search with the configured strategy pair.
pub fn solve(model: &RoutingModel, cfg: &SolverConfig) -> Result<Solution, SolverError> {
    solve_with(
        model,
        cfg,
        cfg.first_solution_strategy,
        cfg.local_search_metaheuristic,
        cfg.seed,
    )
}

/// Runs the two-phase search: construction, then local-search refinement
/// until the time budget expires, then extraction (with post-solve
/// reconfiguration when enabled).
pub fn solve_with(
    model: &RoutingModel,
    cfg: &SolverConfig,
    strategy: FirstSolutionStrategy,
    metaheuristic: Metaheuristic,
    seed: u64,
) -> Result<Solution, SolverError> {
    let search_span = span!(
        Level::INFO,
        "search",
        strategy = strategy.label(),
        metaheuristic = metaheuristic.label()
    );
    let _guard = search_span.enter();

    let deadline = Instant::now() + Duration::from_secs(cfg.time_limit_seconds.max(1));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let start = first_solution(model, strategy);
    let start_objective = objective(model, &start);
    if cfg.log_search {
        info!(objective = start_objective, "first solution");
    }

    let best = improve(model, cfg, metaheuristic, start, deadline, &mut rng);
    let best_objective = objective(model, &best);
    if cfg.log_search {
        info!(objective = best_objective, "search finished");
    }

    extract(model, cfg, &best, best_objective)
}

/// Walks every vehicle's route, accumulates real matrix distances,
/// recomputes exact per-vehicle times, applies the optional depot
/// reconfiguration, and validates against hard limits.
fn extract(
    model: &RoutingModel,
    cfg: &SolverConfig,
    assignment: &Assignment,
    objective_value: i64,
) -> Result<Solution, SolverError> {
    let skipping = model.skip_penalty.is_some();
    if !skipping && !assignment.unassigned.is_empty() {
        warn!(
            unassigned = assignment.unassigned.len(),
            "required customers could not be placed"
        );
        return Err(SolverError::NoSolution);
    }
    if assignment.routes.iter().all(|r| r.is_empty()) && !model.customers.is_empty() {
        if skipping {
            // Everything skipped is still a (bad) answer.
            debug!("search left every customer unassigned");
        } else {
            return Err(SolverError::NoSolution);
        }
    }

    let mut routes = Vec::new();
    for (vehicle, nodes) in assignment.routes.iter().enumerate() {
        if nodes.is_empty() {
            continue;
        }
        let spec = &model.vehicles[vehicle];

        let customers: Vec<_> = nodes
            .iter()
            .map(|&n| model.customer_for_node(n).clone())
            .collect();
        let volume: f64 = customers.iter().map(|c| c.volume).sum();

        let mut distance_m = 0.0;
        let mut prev = spec.start_node;
        for &node in nodes.iter().chain(std::iter::once(&spec.start_node)) {
            distance_m += model.matrix.distance(prev, node);
            prev = node;
        }

        // Exact time with this vehicle's own service time; the engine's
        // fleet-average time dimension was only for the search.
        let time_secs = reconfigure::exact_route_time_secs(
            model,
            spec.start_node,
            nodes,
            spec.service_time_secs,
        );

        routes.push(Route {
            kind: spec.kind,
            vehicle_id: vehicle,
            customers,
            depot: spec.start_depot,
            distance_km: distance_m / 1000.0,
            time_minutes: time_secs / 60.0,
            volume,
            feasible: true,
        });
    }

    if cfg.enable_final_depot_reconfiguration {
        routes = reconfigure::reconfigure_routes(model, cfg.tsp_time_limit_seconds, routes);
    } else {
        debug!("final depot reconfiguration disabled");
    }

    for route in &mut routes {
        let spec = &model.vehicles[route.vehicle_id];
        route.feasible = validate_route(route, spec);
        if !route.feasible {
            warn!(
                vehicle = route.vehicle_id,
                kind = spec.kind.label(),
                "route violates hard limits after extraction"
            );
            if !skipping {
                return Err(SolverError::InfeasibleRoute {
                    kind: spec.kind.label().to_string(),
                    vehicle_id: route.vehicle_id,
                });
            }
        }
    }

    let dropped: Vec<_> = assignment
        .unassigned
        .iter()
        .map(|&n| model.customer_for_node(n).clone())
        .collect();

    let total_distance_km: f64 = routes.iter().map(|r| r.distance_km).sum();
    let total_time_minutes: f64 = routes.iter().map(|r| r.time_minutes).sum();
    let served_volume: f64 = routes.iter().map(|r| r.volume).sum();
    let feasible = dropped.is_empty() && routes.iter().all(|r| r.feasible);

    info!(
        routes = routes.len(),
        dropped = dropped.len(),
        distance_km = total_distance_km,
        "solution extracted"
    );

    Ok(Solution {
        vehicles_used: routes.len(),
        routes,
        dropped,
        total_distance_km,
        total_time_minutes,
        objective: objective_value,
        feasible,
        served_volume,
    })
}

/// The feasibility decision uses the reconfigured time, with one minute
/// of grace for rounding.
fn validate_route(route: &Route, spec: &VehicleSpec) -> bool {
    if route.volume > spec.capacity_volume + 1e-9 {
        return false;
    }
    if let Some(max_km) = spec.max_distance_km {
        if route.distance_km > max_km {
            return false;
        }
    }
    if route.customers.len() > spec.max_stops {
        return false;
    }
    if route.time_minutes > spec.max_time_hours * 60.0 + 1.0 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleKind;

    #[test]
    fn solve_serves_all_customers_in_the_small_instance() {
        let (model, app) = crate::fixtures::small_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).unwrap();

        assert!(solution.dropped.is_empty());
        assert_eq!(solution.served_customers(), 4);
        assert!(solution.feasible);
        assert!(solution.total_distance_km > 0.0);
    }

    #[test]
    fn partition_invariant_holds() {
        let (model, app) = crate::fixtures::small_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).unwrap();

        let mut seen: Vec<&str> = solution
            .routes
            .iter()
            .flat_map(|r| r.customers.iter().map(|c| c.id.as_str()))
            .chain(solution.dropped.iter().map(|c| c.id.as_str()))
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<&str> = model.customers.iter().map(|c| c.id.as_str()).collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn capacity_invariant_holds_per_route() {
        let (model, app) = crate::fixtures::small_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).unwrap();
        for route in &solution.routes {
            let spec = &model.vehicles[route.vehicle_id];
            assert!(route.volume <= spec.capacity_volume + 1e-9);
        }
    }

    #[test]
    fn overload_without_skipping_is_no_solution() {
        let (model, app) = crate::fixtures::overloaded_model_no_skip();
        let mut cfg = app.solver.clone();
        cfg.allow_customer_skipping = false;
        cfg.time_limit_seconds = 1;
        let result = solve(&model, &cfg);
        assert!(matches!(result, Err(SolverError::NoSolution)));
    }

    #[test]
    fn overload_with_skipping_drops_the_excess() {
        let (model, app) = crate::fixtures::overloaded_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).unwrap();

        // One vehicle of capacity 40, five customers of volume 10 each:
        // exactly four fit.
        assert_eq!(solution.served_customers(), 4);
        assert_eq!(solution.dropped.len(), 1);
        assert!(!solution.feasible);
    }

    #[test]
    fn single_vehicle_single_customer_yields_one_route() {
        let (model, app) = crate::fixtures::single_customer_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 1;
        let solution = solve(&model, &cfg).unwrap();
        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].customers.len(), 1);
        assert!(solution.feasible);
    }

    #[test]
    fn center_customers_prefer_the_center_vehicle() {
        let (model, app) = crate::fixtures::small_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 3;
        let solution = solve(&model, &cfg).unwrap();

        for route in &solution.routes {
            for customer in &route.customers {
                let node = model
                    .customers
                    .iter()
                    .position(|c| c.id == customer.id)
                    .map(|i| i + model.num_depots())
                    .unwrap();
                if model.is_center_customer(node) {
                    assert_eq!(
                        route.kind,
                        VehicleKind::Center,
                        "center-zone customer {} should ride the center vehicle",
                        customer.id
                    );
                }
            }
        }
    }

    #[test]
    fn reconfigured_solution_reports_tsp_depot() {
        let (model, app) = crate::fixtures::split_depot_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).unwrap();
        for route in &solution.routes {
            let spec = &model.vehicles[route.vehicle_id];
            let expected = spec.tsp_depot.unwrap_or(spec.start_depot);
            assert_eq!(route.depot, expected);
        }
    }
}
