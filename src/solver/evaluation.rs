use std::collections::BTreeSet;

use crate::solver::model::RoutingModel;

/// Virtual cost of leaving a required customer unassigned while the search
/// is still running with skipping disabled. Large enough to dominate any
/// real arc cost, small enough that a handful of them cannot overflow.
pub const REQUIRED_SKIP_COST: i64 = 50_000_000;

/// Search state: one node sequence per vehicle plus the set of customers
/// currently on no route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub routes: Vec<Vec<usize>>,
    pub unassigned: BTreeSet<usize>,
}

impl Assignment {
    pub fn empty(model: &RoutingModel) -> Self {
        Assignment {
            routes: vec![Vec::new(); model.vehicles.len()],
            unassigned: model.customer_nodes().collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unassigned.is_empty()
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|r| r.len()).sum()
    }
}

/// Accumulated dimension values for one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteMetrics {
    pub load: i64,
    pub distance_m: i64,
    pub stops: usize,
    pub time_secs: i64,
    pub shaped_cost: i64,
}

/// Walks `start -> nodes -> start` accumulating every dimension and the
/// vehicle's shaped cost.
pub fn route_metrics(model: &RoutingModel, vehicle: usize, nodes: &[usize]) -> RouteMetrics {
    let mut metrics = RouteMetrics::default();
    if nodes.is_empty() {
        return metrics;
    }

    let start = model.vehicles[vehicle].start_node;
    let mut prev = start;
    for &node in nodes {
        metrics.load += model.demands[node];
        metrics.stops += 1;
        metrics.distance_m += model.distance_m(prev, node);
        metrics.time_secs += model.travel_time_secs(prev, node);
        metrics.shaped_cost += model.arc_cost(vehicle, prev, node);
        prev = node;
    }
    metrics.distance_m += model.distance_m(prev, start);
    metrics.time_secs += model.travel_time_secs(prev, start);
    metrics.shaped_cost += model.arc_cost(vehicle, prev, start);
    metrics
}

/// Hard-dimension check against the vehicle's bounds.
pub fn metrics_feasible(model: &RoutingModel, vehicle: usize, metrics: &RouteMetrics) -> bool {
    let spec = &model.vehicles[vehicle];
    metrics.load <= spec.capacity
        && metrics.distance_m <= spec.max_distance_m
        && metrics.stops <= spec.max_stops
        && metrics.time_secs <= spec.max_time_secs
}

pub fn route_feasible(model: &RoutingModel, vehicle: usize, nodes: &[usize]) -> bool {
    metrics_feasible(model, vehicle, &route_metrics(model, vehicle, nodes))
}

/// Cost of one unassigned customer under the current skipping mode.
pub fn skip_cost(model: &RoutingModel) -> i64 {
    model.skip_penalty.unwrap_or(REQUIRED_SKIP_COST)
}

/// Raw search objective: shaped route costs plus skip penalties.
pub fn objective(model: &RoutingModel, assignment: &Assignment) -> i64 {
    let routes: i64 = assignment
        .routes
        .iter()
        .enumerate()
        .map(|(v, nodes)| route_metrics(model, v, nodes).shaped_cost)
        .sum();
    routes + skip_cost(model) * assignment.unassigned.len() as i64
}

/// Best feasible position for `node` on one vehicle, with its shaped-cost
/// delta. `None` if no position is feasible.
pub fn best_position_on_vehicle(
    model: &RoutingModel,
    vehicle: usize,
    nodes: &[usize],
    node: usize,
) -> Option<(usize, i64)> {
    let spec = &model.vehicles[vehicle];
    let base = route_metrics(model, vehicle, nodes);
    if base.load + model.demands[node] > spec.capacity || base.stops + 1 > spec.max_stops {
        return None;
    }

    let mut best: Option<(usize, i64)> = None;
    let mut candidate = Vec::with_capacity(nodes.len() + 1);
    for pos in 0..=nodes.len() {
        candidate.clear();
        candidate.extend_from_slice(&nodes[..pos]);
        candidate.push(node);
        candidate.extend_from_slice(&nodes[pos..]);

        let metrics = route_metrics(model, vehicle, &candidate);
        if !metrics_feasible(model, vehicle, &metrics) {
            continue;
        }
        let delta = metrics.shaped_cost - base.shaped_cost;
        if best.map_or(true, |(_, d)| delta < d) {
            best = Some((pos, delta));
        }
    }
    best
}

/// Globally cheapest feasible insertion of `node` across all vehicles.
pub fn best_insertion(
    model: &RoutingModel,
    assignment: &Assignment,
    node: usize,
) -> Option<(usize, usize, i64)> {
    let mut best: Option<(usize, usize, i64)> = None;
    for (vehicle, nodes) in assignment.routes.iter().enumerate() {
        if let Some((pos, delta)) = best_position_on_vehicle(model, vehicle, nodes, node) {
            if best.map_or(true, |(_, _, d)| delta < d) {
                best = Some((vehicle, pos, delta));
            }
        }
    }
    best
}

/// Inserts every unassigned node whose cheapest feasible insertion exists.
/// Insertion always beats a skip penalty, so this is applied greedily.
pub fn insert_unassigned(model: &RoutingModel, assignment: &mut Assignment) -> usize {
    let mut inserted = 0;
    loop {
        let pending: Vec<usize> = assignment.unassigned.iter().copied().collect();
        let mut placed_any = false;
        for node in pending {
            if let Some((vehicle, pos, _)) = best_insertion(model, assignment, node) {
                assignment.routes[vehicle].insert(pos, node);
                assignment.unassigned.remove(&node);
                inserted += 1;
                placed_any = true;
            }
        }
        if !placed_any {
            return inserted;
        }
    }
}
