use std::collections::BTreeSet;

use tracing::debug;

use crate::config::FirstSolutionStrategy;
use crate::solver::evaluation::{best_insertion, insert_unassigned, route_feasible, Assignment};
use crate::solver::model::RoutingModel;

/// Builds the first solution with the requested strategy. Every strategy
/// only ever performs feasible insertions; customers that fit nowhere stay
/// unassigned for the improvement phase (and become drops or a
/// `NoSolution` at extraction).
pub fn first_solution(model: &RoutingModel, strategy: FirstSolutionStrategy) -> Assignment {
    let assignment = match strategy {
        FirstSolutionStrategy::Automatic | FirstSolutionStrategy::PathCheapestArc => {
            path_cheapest_arc(model)
        }
        FirstSolutionStrategy::ParallelCheapestInsertion => parallel_cheapest_insertion(model),
        FirstSolutionStrategy::Savings => savings(model),
        FirstSolutionStrategy::Sweep => sweep(model),
        FirstSolutionStrategy::Christofides => christofides(model),
    };
    debug!(
        strategy = strategy.label(),
        assigned = assignment.assigned_count(),
        unassigned = assignment.unassigned.len(),
        "first solution constructed"
    );
    assignment
}

/// Greedy route extension: each vehicle keeps appending the customer with
/// the cheapest shaped arc from its current end until nothing more fits.
fn path_cheapest_arc(model: &RoutingModel) -> Assignment {
    let mut assignment = Assignment::empty(model);

    for vehicle in 0..model.vehicles.len() {
        loop {
            let nodes = assignment.routes[vehicle].clone();
            let last = *nodes.last().unwrap_or(&model.vehicles[vehicle].start_node);

            let mut best: Option<(usize, i64)> = None;
            for &node in &assignment.unassigned {
                let cost = model.arc_cost(vehicle, last, node);
                if best.map_or(true, |(_, c)| cost < c) {
                    let mut candidate = nodes.clone();
                    candidate.push(node);
                    if route_feasible(model, vehicle, &candidate) {
                        best = Some((node, cost));
                    }
                }
            }

            match best {
                Some((node, _)) => {
                    assignment.routes[vehicle].push(node);
                    assignment.unassigned.remove(&node);
                }
                None => break,
            }
        }
    }

    assignment
}

/// Repeatedly applies the globally cheapest feasible insertion across all
/// vehicles and positions.
fn parallel_cheapest_insertion(model: &RoutingModel) -> Assignment {
    let mut assignment = Assignment::empty(model);

    loop {
        let mut best: Option<(usize, usize, usize, i64)> = None;
        for &node in &assignment.unassigned {
            if let Some((vehicle, pos, delta)) = best_insertion(model, &assignment, node) {
                if best.map_or(true, |(_, _, _, d)| delta < d) {
                    best = Some((node, vehicle, pos, delta));
                }
            }
        }
        match best {
            Some((node, vehicle, pos, _)) => {
                assignment.routes[vehicle].insert(pos, node);
                assignment.unassigned.remove(&node);
            }
            None => return assignment,
        }
    }
}

/// Clarke-Wright savings, adapted to a heterogeneous multi-depot fleet:
/// merge clusters by savings against the primary depot, then hand the
/// clusters to vehicles largest-first and sequence each greedily.
fn savings(model: &RoutingModel) -> Assignment {
    let customer_nodes: Vec<usize> = model.customer_nodes().collect();
    if customer_nodes.is_empty() {
        return Assignment::empty(model);
    }

    let max_capacity = model
        .vehicles
        .iter()
        .map(|v| v.capacity)
        .max()
        .unwrap_or(0);

    // Savings of joining i and j relative to separate depot round trips.
    let mut pairs: Vec<(i64, usize, usize)> = Vec::new();
    for (a, &i) in customer_nodes.iter().enumerate() {
        for &j in customer_nodes.iter().skip(a + 1) {
            let s = model.distance_m(0, i) + model.distance_m(0, j) - model.distance_m(i, j);
            pairs.push((s, i, j));
        }
    }
    pairs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    // Union clusters while they stay under the largest vehicle.
    let mut cluster_of: std::collections::HashMap<usize, usize> = customer_nodes
        .iter()
        .enumerate()
        .map(|(idx, &node)| (node, idx))
        .collect();
    let mut clusters: Vec<Vec<usize>> = customer_nodes.iter().map(|&n| vec![n]).collect();
    let mut loads: Vec<i64> = customer_nodes.iter().map(|&n| model.demands[n]).collect();

    for (saving, i, j) in pairs {
        if saving <= 0 {
            break;
        }
        let (ci, cj) = (cluster_of[&i], cluster_of[&j]);
        if ci == cj || loads[ci] + loads[cj] > max_capacity {
            continue;
        }
        let moved = std::mem::take(&mut clusters[cj]);
        for &node in &moved {
            cluster_of.insert(node, ci);
        }
        loads[ci] += loads[cj];
        loads[cj] = 0;
        clusters[ci].extend(moved);
    }

    clusters.retain(|c| !c.is_empty());
    clusters.sort_by_key(|c| std::cmp::Reverse(c.iter().map(|&n| model.demands[n]).sum::<i64>()));

    // Vehicles largest-first take the heaviest clusters they can host.
    let mut vehicle_order: Vec<usize> = (0..model.vehicles.len()).collect();
    vehicle_order.sort_by_key(|&v| std::cmp::Reverse(model.vehicles[v].capacity));

    let mut assignment = Assignment::empty(model);
    let mut used = vec![false; model.vehicles.len()];
    for cluster in clusters {
        let mut placed = false;
        for &vehicle in &vehicle_order {
            if used[vehicle] {
                continue;
            }
            let sequenced = nearest_neighbor_order(model, vehicle, &cluster);
            if route_feasible(model, vehicle, &sequenced) {
                for &node in &sequenced {
                    assignment.unassigned.remove(&node);
                }
                assignment.routes[vehicle] = sequenced;
                used[vehicle] = true;
                placed = true;
                break;
            }
        }
        if !placed {
            // Cluster too big for any remaining vehicle; fall back to
            // per-customer insertion below.
        }
    }

    insert_unassigned(model, &mut assignment);
    assignment
}

/// Polar-angle sweep around the primary depot: fill vehicles in angular
/// order, then sequence each route greedily.
fn sweep(model: &RoutingModel) -> Assignment {
    let depot = model.depots[0];
    let mut by_angle: Vec<(f64, usize)> = model
        .customer_nodes()
        .map(|node| {
            let c = model.node_coords(node);
            let angle = (c.0 - depot.0).atan2(c.1 - depot.1);
            (angle, node)
        })
        .collect();
    by_angle.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut assignment = Assignment::empty(model);
    let mut vehicle = 0usize;
    for &(_, node) in &by_angle {
        let mut placed = false;
        let mut tried = 0;
        let mut v = vehicle;
        while tried < model.vehicles.len() {
            let mut candidate = assignment.routes[v].clone();
            candidate.push(node);
            if route_feasible(model, v, &candidate) {
                assignment.routes[v] = candidate;
                assignment.unassigned.remove(&node);
                vehicle = v;
                placed = true;
                break;
            }
            v = (v + 1) % model.vehicles.len();
            tried += 1;
        }
        if !placed {
            // Stays unassigned; the improvement phase may still place it.
        }
    }

    // Greedy re-sequencing inside each wedge.
    for vehicle in 0..model.vehicles.len() {
        let nodes = assignment.routes[vehicle].clone();
        if nodes.len() > 2 {
            let ordered = nearest_neighbor_order(model, vehicle, &nodes);
            if route_feasible(model, vehicle, &ordered) {
                assignment.routes[vehicle] = ordered;
            }
        }
    }

    insert_unassigned(model, &mut assignment);
    assignment
}

/// Christofides-style route-first / cluster-second: build one giant
/// nearest-neighbor tour over all customers, then split it into feasible
/// vehicle routes in tour order.
fn christofides(model: &RoutingModel) -> Assignment {
    let customer_nodes: Vec<usize> = model.customer_nodes().collect();
    if customer_nodes.is_empty() {
        return Assignment::empty(model);
    }

    // Giant tour from the primary depot.
    let mut remaining: BTreeSet<usize> = customer_nodes.iter().copied().collect();
    let mut tour = Vec::with_capacity(customer_nodes.len());
    let mut current = 0usize;
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .copied()
            .min_by_key(|&n| (model.distance_m(current, n), n))
            .unwrap();
        remaining.remove(&next);
        tour.push(next);
        current = next;
    }

    // Split the tour across vehicles in order, opening the next vehicle
    // when the current one cannot take the next tour node.
    let mut assignment = Assignment::empty(model);
    let mut vehicle_order: Vec<usize> = (0..model.vehicles.len()).collect();
    vehicle_order.sort_by_key(|&v| std::cmp::Reverse(model.vehicles[v].capacity));

    let mut vi = 0usize;
    for node in tour {
        let mut placed = false;
        while vi < vehicle_order.len() {
            let vehicle = vehicle_order[vi];
            let mut candidate = assignment.routes[vehicle].clone();
            candidate.push(node);
            if route_feasible(model, vehicle, &candidate) {
                assignment.routes[vehicle] = candidate;
                assignment.unassigned.remove(&node);
                placed = true;
                break;
            }
            vi += 1;
        }
        if !placed {
            // Every later vehicle is untouched; try generic insertion at
            // the end.
            break;
        }
    }

    insert_unassigned(model, &mut assignment);
    assignment
}

/// Orders `nodes` by repeated nearest neighbor from the vehicle's depot.
/// Ties break on node id so the result does not depend on input order.
fn nearest_neighbor_order(model: &RoutingModel, vehicle: usize, nodes: &[usize]) -> Vec<usize> {
    let mut remaining: BTreeSet<usize> = nodes.iter().copied().collect();
    let mut ordered = Vec::with_capacity(nodes.len());
    let mut current = model.vehicles[vehicle].start_node;
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .copied()
            .min_by_key(|&n| (model.distance_m(current, n), n))
            .unwrap();
        remaining.remove(&next);
        ordered.push(next);
        current = next;
    }
    ordered
}
