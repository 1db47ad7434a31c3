//! Deterministic problem generators shared by the test suite and the CLI
//! demo mode.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{
    AppConfig, LatLon, LocationConfig, VehicleConfig, VehicleKind,
};
use crate::distance::DistanceMatrix;
use crate::domain::{Customer, WarehouseAllocation};
use crate::geo::in_center_zone;
use crate::solver::model::{unique_depots, RoutingModel};

pub const DEPOT_MAIN: LatLon = (42.6958, 23.2317);
pub const DEPOT_CENTER: LatLon = (42.6974, 23.3238);

pub fn customer(id: &str, coords: LatLon, volume: f64) -> Customer {
    Customer {
        id: id.to_string(),
        name: format!("Customer {id}"),
        coords: Some(coords),
        volume,
    }
}

fn vehicle(kind: VehicleKind, capacity: f64, count: usize, start: LatLon) -> VehicleConfig {
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

fn base_location() -> LocationConfig {
    LocationConfig {
        depot: DEPOT_MAIN,
        center: DEPOT_CENTER,
        center_zone_radius_km: 2.0,
        ..LocationConfig::default()
    }
}

/// Builds an allocation directly, preserving customer order, with
/// center-zone tagging derived from the location config.
fn manual_allocation(
    customers: Vec<Customer>,
    location: &LocationConfig,
    total_capacity: f64,
) -> WarehouseAllocation {
    let center_zone_ids: HashSet<String> = customers
        .iter()
        .filter(|c| {
            c.coords.is_some_and(|coords| {
                in_center_zone(coords, location.center, location.center_zone_radius_km)
            })
        })
        .map(|c| c.id.clone())
        .collect();
    let vehicle_volume: f64 = customers.iter().map(|c| c.volume).sum();
    WarehouseAllocation {
        vehicle_customers: customers,
        warehouse_customers: Vec::new(),
        center_zone_ids,
        total_capacity,
        vehicle_volume,
        warehouse_volume: 0.0,
        capacity_utilization: if total_capacity > 0.0 {
            vehicle_volume / total_capacity
        } else {
            0.0
        },
    }
}

fn build_model(allocation: &WarehouseAllocation, app: &AppConfig) -> RoutingModel {
    let depots = unique_depots(&app.location, &app.vehicles);
    let mut locations = depots;
    locations.extend(
        allocation
            .vehicle_customers
            .iter()
            .filter_map(|c| c.coords),
    );
    let matrix = Arc::new(DistanceMatrix::synthetic(&locations, app.osrm.average_speed_kmh));
    RoutingModel::build(allocation, &app.vehicles, &app.location, &app.solver, matrix)
        .expect("fixture model must build")
}

/// Two depots, an INTERNAL (cap 100, from the main depot) and a CENTER
/// vehicle (cap 50, from the center depot), four customers of which the
/// first two sit in the center zone.
pub fn small_model() -> (RoutingModel, AppConfig) {
    let location = base_location();
    let vehicles = vec![
        vehicle(VehicleKind::Internal, 100.0, 1, DEPOT_MAIN),
        vehicle(VehicleKind::Center, 50.0, 1, DEPOT_CENTER),
    ];
    let app = AppConfig {
        location,
        vehicles,
        ..AppConfig::default()
    };

    let customers = vec![
        customer("C1", (42.70, 23.33), 20.0),
        customer("C2", (42.71, 23.34), 15.0),
        customer("C3", (42.80, 23.50), 30.0),
        customer("C4", (42.75, 23.40), 25.0),
    ];
    let allocation = manual_allocation(customers, &app.location, 150.0);
    let model = build_model(&allocation, &app);
    (model, app)
}

/// One INTERNAL vehicle of capacity 40 against five customers of volume
/// 10 each; only four can ride.
pub fn overloaded_model() -> (RoutingModel, AppConfig) {
    overloaded(true)
}

/// The same instance with skipping disabled, so no solution exists.
pub fn overloaded_model_no_skip() -> (RoutingModel, AppConfig) {
    overloaded(false)
}

fn overloaded(allow_skipping: bool) -> (RoutingModel, AppConfig) {
    let location = base_location();
    let vehicles = vec![vehicle(VehicleKind::Internal, 40.0, 1, DEPOT_MAIN)];
    let mut app = AppConfig {
        location,
        vehicles,
        ..AppConfig::default()
    };
    app.solver.allow_customer_skipping = allow_skipping;
    app.solver.skip_penalty = 10_000;

    let customers: Vec<Customer> = (1..=5)
        .map(|i| {
            customer(
                &format!("V{i}"),
                (42.70 + i as f64 * 0.01, 23.30 + i as f64 * 0.01),
                10.0,
            )
        })
        .collect();
    let allocation = manual_allocation(customers, &app.location, 40.0);
    let model = build_model(&allocation, &app);
    (model, app)
}

/// One vehicle, one customer.
pub fn single_customer_model() -> (RoutingModel, AppConfig) {
    let location = base_location();
    let vehicles = vec![vehicle(VehicleKind::Internal, 100.0, 1, DEPOT_MAIN)];
    let app = AppConfig {
        location,
        vehicles,
        ..AppConfig::default()
    };
    let allocation = manual_allocation(
        vec![customer("ONLY", (42.72, 23.35), 12.0)],
        &app.location,
        100.0,
    );
    let model = build_model(&allocation, &app);
    (model, app)
}

/// INTERNAL starts at the main depot but re-sequences from the center
/// depot; the CENTER vehicle keeps its start depot for TSP.
pub fn split_depot_model() -> (RoutingModel, AppConfig) {
    let location = base_location();
    let mut internal = vehicle(VehicleKind::Internal, 100.0, 1, DEPOT_MAIN);
    internal.tsp_depot = Some(DEPOT_CENTER);
    let center = vehicle(VehicleKind::Center, 50.0, 1, DEPOT_CENTER);
    let app = AppConfig {
        location,
        vehicles: vec![internal, center],
        ..AppConfig::default()
    };

    let customers = vec![
        customer("A", (42.71, 23.28), 10.0),
        customer("B", (42.73, 23.36), 10.0),
        customer("C", (42.76, 23.42), 10.0),
        customer("D", (42.69, 23.45), 10.0),
    ];
    let allocation = manual_allocation(customers, &app.location, 150.0);
    let model = build_model(&allocation, &app);
    (model, app)
}

/// Seeded random customers scattered around the main depot, for the CLI
/// demo mode and larger tests.
pub fn generate_customers(count: usize, seed: u64) -> Vec<Customer> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let lat = DEPOT_MAIN.0 + rng.gen_range(-0.08..0.08);
            let lon = DEPOT_MAIN.1 + rng.gen_range(-0.10..0.16);
            let volume = rng.gen_range(1.0..40.0_f64).round();
            customer(&format!("R{:03}", i + 1), (lat, lon), volume)
        })
        .collect()
}
