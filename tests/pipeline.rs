//! End-to-end scenarios over synthetic matrices. No test talks to a real
//! routing engine: unreachable engine endpoints exercise the failover
//! chain down to haversine synthesis.

use std::sync::Arc;

use fleetroute::config::{
    AppConfig, FirstSolutionStrategy, LocationConfig, Metaheuristic, VehicleConfig, VehicleKind,
};
use fleetroute::distance::{obtain_matrix, DistanceMatrix};
use fleetroute::domain::{Customer, Solution, WarehouseAllocation};
use fleetroute::error::SolverError;
use fleetroute::fixtures;
use fleetroute::solver::engine::solve;
use fleetroute::solver::model::{unique_depots, RoutingModel};
use fleetroute::solver::race::race;
use fleetroute::solver::reconfigure::reconfigure_routes;
use fleetroute::{orchestrator, warehouse};

fn vehicle(kind: VehicleKind, capacity: f64, count: usize, start: (f64, f64)) -> VehicleConfig {
    VehicleConfig {
        kind,
        capacity,
        count,
        max_distance_km: None,
        max_time_hours: 8.0,
        service_time_minutes: 10.0,
        max_customers_per_route: None,
        enabled: true,
        start_depot: start,
        tsp_depot: None,
        start_time_minutes: 480,
    }
}

/// Model construction through the real allocation path, over a synthetic
/// matrix.
fn build_problem(
    app: &AppConfig,
    customers: &[Customer],
) -> (RoutingModel, WarehouseAllocation) {
    let allocation = warehouse::allocate_customers(
        customers,
        &app.vehicles,
        &app.location,
        &app.warehouse,
    )
    .expect("allocation");

    let depots = unique_depots(&app.location, &app.vehicles);
    let mut locations = depots;
    locations.extend(allocation.vehicle_customers.iter().filter_map(|c| c.coords));
    let matrix = Arc::new(DistanceMatrix::synthetic(&locations, 40.0));
    let model = RoutingModel::build(
        &allocation,
        &app.vehicles,
        &app.location,
        &app.solver,
        matrix,
    )
    .expect("model");
    (model, allocation)
}

fn route_ids(solution: &Solution, kind: VehicleKind) -> Vec<String> {
    let mut ids: Vec<String> = solution
        .routes
        .iter()
        .filter(|r| r.kind == kind)
        .flat_map(|r| r.customers.iter().map(|c| c.id.clone()))
        .collect();
    ids.sort();
    ids
}

#[test]
fn s1_center_vehicle_takes_the_center_zone() {
    let (model, _) = fixtures::small_model();
    let (_, app) = fixtures::small_model();
    let mut cfg = app.solver.clone();
    cfg.time_limit_seconds = 3;
    let solution = solve(&model, &cfg).expect("solution");

    assert!(solution.dropped.is_empty());
    assert_eq!(route_ids(&solution, VehicleKind::Center), vec!["C1", "C2"]);
    assert_eq!(route_ids(&solution, VehicleKind::Internal), vec!["C3", "C4"]);
    assert!(solution.feasible);
}

#[test]
fn s2_capacity_overflow_with_skipping_drops_exactly_one() {
    let (model, app) = fixtures::overloaded_model();
    let mut cfg = app.solver.clone();
    cfg.time_limit_seconds = 2;
    let solution = solve(&model, &cfg).expect("solution");

    assert_eq!(solution.served_customers(), 4);
    assert_eq!(solution.dropped.len(), 1);
    // The skip penalty is charged in the objective.
    assert!(solution.objective >= cfg.skip_penalty);
}

#[test]
fn s3_center_penalty_is_soft_without_a_center_vehicle() {
    let location = LocationConfig {
        depot: fixtures::DEPOT_MAIN,
        center: fixtures::DEPOT_CENTER,
        center_zone_radius_km: 1.7,
        ..LocationConfig::default()
    };
    let mut app = AppConfig {
        vehicles: vec![vehicle(VehicleKind::Internal, 100.0, 1, fixtures::DEPOT_MAIN)],
        location,
        ..AppConfig::default()
    };
    app.solver.allow_customer_skipping = false;
    app.solver.time_limit_seconds = 2;
    app.solver.num_workers = 1;

    let customers = vec![
        fixtures::customer("inside", (42.6995, 23.3300), 10.0),
        fixtures::customer("outside", (42.7000, 23.2400), 10.0),
    ];
    let (model, _) = build_problem(&app, &customers);
    let solution = solve(&model, &app.solver).expect("solution");

    // No CENTER vehicle exists, so the internal bus eats the penalty and
    // still serves both.
    assert!(solution.dropped.is_empty());
    assert_eq!(solution.served_customers(), 2);
}

#[test]
fn s4_reconfiguration_resequences_from_the_tsp_depot() {
    let (model, app) = fixtures::split_depot_model();
    let mut cfg = app.solver.clone();
    cfg.time_limit_seconds = 2;
    let solution = solve(&model, &cfg).expect("solution");

    for route in &solution.routes {
        let spec = &model.vehicles[route.vehicle_id];
        assert_eq!(route.depot, spec.tsp_depot.unwrap_or(spec.start_depot));
    }

    // Reconfiguring again must not change any customer sequence.
    let again = reconfigure_routes(&model, cfg.tsp_time_limit_seconds, solution.routes.clone());
    for (before, after) in solution.routes.iter().zip(&again) {
        let b: Vec<&str> = before.customers.iter().map(|c| c.id.as_str()).collect();
        let a: Vec<&str> = after.customers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(b, a);
    }
}

#[test]
fn s5_city_traffic_multiplies_inside_arcs() {
    let location = LocationConfig {
        depot: fixtures::DEPOT_MAIN,
        center: fixtures::DEPOT_CENTER,
        ..LocationConfig::default()
    };
    let mut app = AppConfig {
        vehicles: vec![vehicle(VehicleKind::Internal, 100.0, 1, fixtures::DEPOT_MAIN)],
        location,
        ..AppConfig::default()
    };
    app.solver.time_limit_seconds = 2;

    // Both customers inside the city disc; the depot is inside too.
    let customers = vec![
        fixtures::customer("a", (42.7050, 23.3000), 10.0),
        fixtures::customer("b", (42.7100, 23.3400), 10.0),
    ];
    let (model, _) = build_problem(&app, &customers);
    let solution = solve(&model, &app.solver).expect("solution");
    assert_eq!(solution.routes.len(), 1);

    // Expected time: every arc multiplied by 1.6 (all endpoints are in the
    // city), plus two service stops of ten minutes. The matrix is
    // symmetric, so the visiting order does not change the total.
    let t = |i: usize, j: usize| model.matrix.duration(i, j);
    let travel = (t(0, 1) + t(1, 2) + t(2, 0)) * 1.6;
    let expected_minutes = (travel + 2.0 * 10.0 * 60.0) / 60.0;
    let actual = solution.routes[0].time_minutes;
    assert!(
        (actual - expected_minutes).abs() < 0.5,
        "expected {expected_minutes:.2} min, got {actual:.2}"
    );
}

#[test]
fn s6_race_reruns_pick_the_same_winner() {
    let (model, app) = fixtures::small_model();
    let mut cfg = app.solver.clone();
    cfg.time_limit_seconds = 2;
    cfg.num_workers = 2;
    cfg.race_first_solution_strategies = vec![
        FirstSolutionStrategy::Savings,
        FirstSolutionStrategy::PathCheapestArc,
    ];
    cfg.race_metaheuristics = vec![
        Metaheuristic::GuidedLocalSearch,
        Metaheuristic::GuidedLocalSearch,
    ];

    let first = race(&model, &cfg).expect("first run");
    let second = race(&model, &cfg).expect("second run");

    assert_eq!(first.objective, second.objective);
    let unordered = |s: &Solution| {
        let mut routes: Vec<Vec<String>> = s
            .routes
            .iter()
            .map(|r| r.customers.iter().map(|c| c.id.clone()).collect())
            .collect();
        routes.sort();
        routes
    };
    assert_eq!(unordered(&first), unordered(&second));

    // The winner must not lose to any single-strategy run.
    for (strategy, metaheuristic) in [
        (FirstSolutionStrategy::Savings, Metaheuristic::GuidedLocalSearch),
        (
            FirstSolutionStrategy::PathCheapestArc,
            Metaheuristic::GuidedLocalSearch,
        ),
    ] {
        let single =
            fleetroute::solver::engine::solve_with(&model, &cfg, strategy, metaheuristic, cfg.seed)
                .expect("single run");
        assert!(first.objective <= single.objective);
    }
}

#[test]
fn fleet_too_small_without_skipping_has_no_solution() {
    let (model, app) = fixtures::overloaded_model_no_skip();
    let result = solve(&model, &app.solver);
    assert!(matches!(result, Err(SolverError::NoSolution)));
}

#[tokio::test]
async fn zero_customers_solve_to_an_empty_feasible_solution() {
    let mut app = AppConfig::default();
    app.cache.enabled = false;
    let (solution, allocation) = orchestrator::solve_problem(&[], &app).await.expect("solve");
    assert!(solution.routes.is_empty());
    assert!(solution.dropped.is_empty());
    assert!(solution.feasible);
    assert!(allocation.vehicle_customers.is_empty());
}

#[tokio::test]
async fn orchestrator_survives_unreachable_engines() {
    let mut app = AppConfig::default();
    // Nothing listens here; the matrix must fall back to haversine
    // synthesis without failing the pipeline.
    app.osrm.base_url = "http://127.0.0.1:9".to_string();
    app.osrm.fallback_to_public = false;
    app.osrm.retry_attempts = 1;
    app.osrm.retry_delay_ms = 1;
    app.cache.enabled = false;
    app.solver.time_limit_seconds = 2;
    app.solver.num_workers = 1;

    let customers = fixtures::generate_customers(12, 7);
    let (solution, allocation) = orchestrator::solve_problem(&customers, &app)
        .await
        .expect("pipeline");

    // Partition invariant across the whole pipeline.
    let mut seen: Vec<String> = solution
        .routes
        .iter()
        .flat_map(|r| r.customers.iter().map(|c| c.id.clone()))
        .chain(solution.dropped.iter().map(|c| c.id.clone()))
        .chain(allocation.warehouse_customers.iter().map(|c| c.id.clone()))
        .collect();
    seen.sort();
    let mut expected: Vec<String> = customers.iter().map(|c| c.id.clone()).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn matrix_is_idempotent_for_identical_inputs() {
    let mut app = AppConfig::default();
    app.osrm.base_url = "http://127.0.0.1:9".to_string();
    app.osrm.fallback_to_public = false;
    app.osrm.retry_attempts = 1;
    app.osrm.retry_delay_ms = 1;
    app.cache.enabled = false;

    let locations = vec![
        fixtures::DEPOT_MAIN,
        (42.70, 23.33),
        (42.71, 23.34),
        (42.80, 23.50),
    ];
    let first = obtain_matrix(&locations, &app.routing, &app.osrm, &app.valhalla, &app.cache)
        .await
        .expect("first");
    let second = obtain_matrix(&locations, &app.routing, &app.osrm, &app.valhalla, &app.cache)
        .await
        .expect("second");

    assert_eq!(first.distances, second.distances);
    assert_eq!(first.durations, second.durations);
}

#[test]
fn zone_accounting_matches_the_distance_predicate() {
    let app = AppConfig::default();
    let customers = fixtures::generate_customers(30, 11);
    let allocation = warehouse::allocate_customers(
        &customers,
        &app.vehicles,
        &app.location,
        &app.warehouse,
    )
    .expect("allocation");

    for customer in &allocation.vehicle_customers {
        let inside = fleetroute::geo::in_center_zone(
            customer.coords.unwrap(),
            app.location.center,
            app.location.center_zone_radius_km,
        );
        assert_eq!(
            allocation.center_zone_ids.contains(&customer.id),
            inside,
            "zone tag mismatch for {}",
            customer.id
        );
    }
}

#[test]
fn pipeline_reruns_produce_the_same_route_set() {
    let run = || {
        let (model, app) = fixtures::small_model();
        let mut cfg = app.solver.clone();
        cfg.time_limit_seconds = 2;
        let solution = solve(&model, &cfg).expect("solution");
        let mut routes: Vec<Vec<String>> = solution
            .routes
            .iter()
            .map(|r| r.customers.iter().map(|c| c.id.clone()).collect())
            .collect();
        routes.sort();
        routes
    };
    assert_eq!(run(), run());
}
