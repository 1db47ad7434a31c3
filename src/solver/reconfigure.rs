use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::LatLon;
use crate::domain::{Customer, Route};
use crate::geo::haversine_km;
use crate::solver::model::{RoutingModel, VehicleSpec};

/// Coordinate tolerance when locating a TSP depot in the matrix.
const DEPOT_TOLERANCE: f64 = 1e-5;

/// Re-sequences every route as a small TSP from its vehicle's TSP depot
/// and recomputes distance and time exactly: real matrix values, city
/// multiplier, and the vehicle's own service time instead of the fleet
/// average. Customers are never dropped or reassigned here.
pub fn reconfigure_routes(
    model: &RoutingModel,
    tsp_time_limit_seconds: u64,
    routes: Vec<Route>,
) -> Vec<Route> {
    let node_by_id: HashMap<&str, usize> = model
        .customers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), model.num_depots() + i))
        .collect();

    routes
        .into_iter()
        .map(|route| reconfigure_one(model, tsp_time_limit_seconds, &node_by_id, route))
        .collect()
}

fn reconfigure_one(
    model: &RoutingModel,
    tsp_time_limit_seconds: u64,
    node_by_id: &HashMap<&str, usize>,
    route: Route,
) -> Route {
    if route.customers.is_empty() {
        return route;
    }

    let spec = &model.vehicles[route.vehicle_id];
    let tsp_depot = spec.tsp_depot.unwrap_or(spec.start_depot);
    debug!(
        vehicle = route.vehicle_id,
        kind = spec.kind.label(),
        "re-sequencing from tsp depot {tsp_depot:?}"
    );

    let budget = Duration::from_secs(tsp_time_limit_seconds.max(1));
    let ordered = match tsp_order(&route.customers, tsp_depot, budget) {
        Some(ordered) => ordered,
        None => {
            // Customers without coordinates cannot be re-sequenced
            // geometrically; keep matrix-driven greedy order instead.
            warn!(
                vehicle = route.vehicle_id,
                "tsp ordering unavailable, using greedy matrix order"
            );
            greedy_matrix_order(model, node_by_id, spec, &route.customers)
        }
    };

    let depot_node = match depot_node_for(model, tsp_depot) {
        Some(node) => node,
        None => {
            warn!(
                "tsp depot {tsp_depot:?} not in the matrix, metrics anchored at the primary depot"
            );
            0
        }
    };

    let nodes: Vec<usize> = ordered
        .iter()
        .filter_map(|c| node_by_id.get(c.id.as_str()).copied())
        .collect();
    let (distance_km, time_minutes) = if nodes.len() == ordered.len() {
        exact_route_metrics(model, depot_node, &nodes, spec.service_time_secs)
    } else {
        warn!(
            vehicle = route.vehicle_id,
            "some customers missing from the matrix, keeping engine metrics"
        );
        (route.distance_km, route.time_minutes)
    };

    info!(
        vehicle = route.vehicle_id,
        kind = spec.kind.label(),
        "reconfigured: {:.1} km -> {distance_km:.1} km, {:.1} min -> {time_minutes:.1} min",
        route.distance_km,
        route.time_minutes,
    );

    Route {
        customers: ordered,
        depot: tsp_depot,
        distance_km,
        time_minutes,
        feasible: true,
        ..route
    }
}

/// Exact per-route metrics: real matrix distances, durations with the
/// city multiplier on both-endpoint city arcs, and the vehicle's own
/// service time per customer. Returns `(km, minutes)`.
pub fn exact_route_metrics(
    model: &RoutingModel,
    depot_node: usize,
    nodes: &[usize],
    service_time_secs: i64,
) -> (f64, f64) {
    if nodes.is_empty() {
        return (0.0, 0.0);
    }

    let mut distance_m = 0.0;
    let mut time_secs = 0.0;
    let mut prev = depot_node;
    for &node in nodes.iter().chain(std::iter::once(&depot_node)) {
        distance_m += model.matrix.distance(prev, node);
        let mut t = model.matrix.duration(prev, node);
        if model.city_node[prev] && model.city_node[node] {
            t *= model.city_multiplier;
        }
        time_secs += t;
        prev = node;
    }
    time_secs += (service_time_secs * nodes.len() as i64) as f64;

    (distance_m / 1000.0, time_secs / 60.0)
}

/// Exact route time in seconds, for extraction.
pub fn exact_route_time_secs(
    model: &RoutingModel,
    depot_node: usize,
    nodes: &[usize],
    service_time_secs: i64,
) -> f64 {
    exact_route_metrics(model, depot_node, nodes, service_time_secs).1 * 60.0
}

/// Nearest-neighbor tour from the depot followed by best-improvement
/// 2-opt, over haversine costs. Deterministic: ties break on customer id,
/// so re-running on an already ordered route is a no-op. Returns `None`
/// when any customer lacks coordinates.
fn tsp_order(customers: &[Customer], depot: LatLon, budget: Duration) -> Option<Vec<Customer>> {
    if customers.iter().any(|c| c.coords.is_none()) {
        return None;
    }
    let deadline = Instant::now() + budget;

    // Nearest-neighbor construction.
    let mut remaining: Vec<&Customer> = customers.iter().collect();
    remaining.sort_by(|a, b| a.id.cmp(&b.id));
    let mut tour: Vec<&Customer> = Vec::with_capacity(customers.len());
    let mut current = depot;
    while !remaining.is_empty() {
        let (idx, _) = remaining
            .iter()
            .enumerate()
            .map(|(i, c)| (i, haversine_km(current, c.coords.unwrap())))
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(remaining[a.0].id.cmp(&remaining[b.0].id))
            })?;
        let chosen = remaining.remove(idx);
        current = chosen.coords.unwrap();
        tour.push(chosen);
    }

    // Best-improvement 2-opt until converged or out of budget.
    let coords = |c: &Customer| c.coords.unwrap();
    loop {
        if Instant::now() >= deadline {
            break;
        }
        let mut best_gain = 1e-9;
        let mut best_swap: Option<(usize, usize)> = None;
        for i in 0..tour.len() {
            let before_i = if i == 0 { depot } else { coords(tour[i - 1]) };
            for j in (i + 1)..tour.len() {
                let after_j = if j + 1 == tour.len() {
                    depot
                } else {
                    coords(tour[j + 1])
                };
                let current_len = haversine_km(before_i, coords(tour[i]))
                    + haversine_km(coords(tour[j]), after_j);
                let reversed_len = haversine_km(before_i, coords(tour[j]))
                    + haversine_km(coords(tour[i]), after_j);
                let gain = current_len - reversed_len;
                if gain > best_gain {
                    best_gain = gain;
                    best_swap = Some((i, j));
                }
            }
        }
        match best_swap {
            Some((i, j)) => tour[i..=j].reverse(),
            None => break,
        }
    }

    Some(tour.into_iter().cloned().collect())
}

/// Matrix-driven nearest-neighbor order, the fallback when geometric
/// ordering is impossible.
fn greedy_matrix_order(
    model: &RoutingModel,
    node_by_id: &HashMap<&str, usize>,
    spec: &VehicleSpec,
    customers: &[Customer],
) -> Vec<Customer> {
    let mut remaining: Vec<Customer> = customers.to_vec();
    remaining.sort_by(|a, b| a.id.cmp(&b.id));
    let mut ordered = Vec::with_capacity(customers.len());
    let mut current = spec.start_node;

    while !remaining.is_empty() {
        let (idx, node) = remaining
            .iter()
            .enumerate()
            .filter_map(|(i, c)| node_by_id.get(c.id.as_str()).map(|&n| (i, n)))
            .min_by_key(|&(_, n)| (model.distance_m(current, n), n))
            .unwrap_or((0, current));
        current = node;
        ordered.push(remaining.remove(idx));
    }
    ordered
}

fn depot_node_for(model: &RoutingModel, depot: LatLon) -> Option<usize> {
    (0..model.num_depots()).find(|&i| {
        let d = model.depots[i];
        (d.0 - depot.0).abs() < DEPOT_TOLERANCE && (d.1 - depot.1).abs() < DEPOT_TOLERANCE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, coords: LatLon) -> Customer {
        Customer {
            id: id.to_string(),
            name: format!("Customer {id}"),
            coords: Some(coords),
            volume: 10.0,
        }
    }

    #[test]
    fn tsp_order_unscrambles_a_line_of_customers() {
        // Four customers on a line east of the depot, given shuffled.
        let depot = (42.70, 23.20);
        let a = customer("a", (42.70, 23.25));
        let b = customer("b", (42.70, 23.30));
        let c = customer("c", (42.70, 23.35));
        let d = customer("d", (42.70, 23.40));
        let shuffled = vec![c.clone(), a.clone(), d.clone(), b.clone()];

        let ordered = tsp_order(&shuffled, depot, Duration::from_secs(5)).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn tsp_order_is_idempotent() {
        let depot = (42.70, 23.20);
        let customers = vec![
            customer("a", (42.72, 23.31)),
            customer("b", (42.69, 23.26)),
            customer("c", (42.74, 23.36)),
            customer("d", (42.68, 23.41)),
        ];
        let once = tsp_order(&customers, depot, Duration::from_secs(5)).unwrap();
        let twice = tsp_order(&once, depot, Duration::from_secs(5)).unwrap();
        let first: Vec<&str> = once.iter().map(|c| c.id.as_str()).collect();
        let second: Vec<&str> = twice.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn tsp_order_requires_coordinates() {
        let mut c = customer("a", (42.70, 23.25));
        c.coords = None;
        assert!(tsp_order(&[c], (42.70, 23.20), Duration::from_secs(1)).is_none());
    }

    #[test]
    fn exact_metrics_use_the_vehicle_service_time() {
        let (model, _) = crate::fixtures::small_model();
        let nodes = vec![4, 5];
        let (_, minutes_fast) = exact_route_metrics(&model, 0, &nodes, 6 * 60);
        let (_, minutes_slow) = exact_route_metrics(&model, 0, &nodes, 12 * 60);
        // Two customers: six extra minutes each.
        assert!((minutes_slow - minutes_fast - 12.0).abs() < 1e-6);
    }

    #[test]
    fn exact_metrics_apply_the_city_multiplier_on_inside_arcs() {
        let (model, _) = crate::fixtures::small_model();
        // Nodes 2 and 3 (C1, C2) are both inside the city disc.
        let raw: f64 = model.matrix.duration(0, 2)
            + model.matrix.duration(2, 3)
            + model.matrix.duration(3, 0);
        let (_, minutes) = exact_route_metrics(&model, 0, &[2, 3], 0);
        // Depot 0 is inside the city too, so every arc is multiplied.
        assert!(model.city_node[0] && model.city_node[2] && model.city_node[3]);
        assert!((minutes * 60.0 - raw * model.city_multiplier).abs() < 1e-6);
    }
}
