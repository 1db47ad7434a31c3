use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::config::{Metaheuristic, SolverConfig};
use crate::solver::evaluation::{
    insert_unassigned, metrics_feasible, objective, route_metrics, Assignment,
};
use crate::solver::model::RoutingModel;

/// Iterations without a new best before the search gives up early. The
/// time budget still caps everything; this keeps small instances
/// deterministic once they converge.
const MAX_STAGNATION: usize = 250;
/// Iterations without improvement before an LNS shake.
const SHAKE_AFTER: usize = 60;
/// Tabu tenure bounds; the tenure is re-rolled inside them periodically.
const TENURE_LOWER: usize = 11;
const TENURE_UPPER: usize = 29;

/// One neighborhood move. Positions refer to the assignment the move was
/// enumerated against; moves are applied immediately after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Relocate {
        from_vehicle: usize,
        from_pos: usize,
        to_vehicle: usize,
        to_pos: usize,
    },
    Swap {
        vehicle_a: usize,
        pos_a: usize,
        vehicle_b: usize,
        pos_b: usize,
    },
    TwoOpt {
        vehicle: usize,
        start: usize,
        end: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    mv: Move,
    /// True objective delta.
    delta: i64,
    /// Delta of the GLS-augmented objective (equals `delta` when no
    /// penalties are active).
    delta_augmented: i64,
    /// Nodes touched, for tabu signatures.
    signature: (usize, usize),
}

/// Refines `start` until the deadline (or convergence) under the chosen
/// metaheuristic, returning the best assignment seen.
pub fn improve(
    model: &RoutingModel,
    cfg: &SolverConfig,
    metaheuristic: Metaheuristic,
    mut current: Assignment,
    deadline: Instant,
    rng: &mut ChaCha8Rng,
) -> Assignment {
    insert_unassigned(model, &mut current);

    let mut best = current.clone();
    let mut best_obj = objective(model, &best);
    let mut current_obj = best_obj;

    // Guided-local-search state.
    let mut penalties: HashMap<(usize, usize), i64> = HashMap::new();
    let penalty_weight = ((cfg.gls_lambda * mean_arc_cost(model)) as i64).max(1);

    // Annealing state.
    let t0 = (best_obj.max(1) as f64) * 0.05;
    let cooling = 0.995_f64;
    let mut temperature = t0;

    // Tabu state.
    let mut tabu: VecDeque<(usize, usize)> = VecDeque::new();
    let mut tenure = 20usize;

    let mut iteration = 0usize;
    let mut stagnation = 0usize;
    let mut since_shake = 0usize;

    while Instant::now() < deadline && stagnation < MAX_STAGNATION {
        iteration += 1;

        if !current.unassigned.is_empty() && insert_unassigned(model, &mut current) > 0 {
            current_obj = objective(model, &current);
        }

        let candidates = enumerate_candidates(model, &current, &penalties, penalty_weight);
        if candidates.is_empty() {
            break;
        }

        let chosen = match metaheuristic {
            Metaheuristic::Automatic | Metaheuristic::GuidedLocalSearch => {
                let best_candidate = candidates
                    .iter()
                    .min_by_key(|c| c.delta_augmented)
                    .copied()
                    .unwrap();
                if best_candidate.delta_augmented < 0 {
                    Some(best_candidate)
                } else {
                    // Local optimum of the augmented landscape: penalize
                    // the most expensive arcs of the incumbent.
                    penalize_arcs(model, &current, &mut penalties);
                    None
                }
            }
            Metaheuristic::SimulatedAnnealing => {
                temperature = (temperature * cooling).max(1e-6);
                let pick = candidates[rng.gen_range(0..candidates.len())];
                if pick.delta < 0
                    || rng.gen::<f64>() < (-(pick.delta as f64) / temperature).exp()
                {
                    Some(pick)
                } else {
                    None
                }
            }
            Metaheuristic::TabuSearch => {
                let mut sorted = candidates.clone();
                sorted.sort_by_key(|c| c.delta);
                let choice = sorted
                    .iter()
                    .find(|c| {
                        let is_tabu = tabu.contains(&c.signature);
                        // Aspiration: a tabu move is fine when it beats the
                        // best solution seen so far.
                        !is_tabu || current_obj + c.delta < best_obj
                    })
                    .or(sorted.first())
                    .copied();
                if let Some(c) = choice {
                    tabu.push_front(c.signature);
                    while tabu.len() > tenure {
                        tabu.pop_back();
                    }
                    if iteration % 20 == 0 {
                        tenure = rng.gen_range(TENURE_LOWER..TENURE_UPPER);
                    }
                }
                choice
            }
        };

        if let Some(candidate) = chosen {
            apply_move(&mut current, candidate.mv);
            current_obj += candidate.delta;
            if cfg.use_full_propagation {
                current_obj = objective(model, &current);
            }
        }

        if current_obj < best_obj {
            best = current.clone();
            best_obj = current_obj;
            stagnation = 0;
            since_shake = 0;
            trace!(iteration, best_obj, "new incumbent");
        } else {
            stagnation += 1;
            since_shake += 1;
        }

        if since_shake >= SHAKE_AFTER {
            let shake_deadline = (Instant::now()
                + Duration::from_secs_f64(cfg.lns_time_limit_seconds))
            .min(deadline);
            lns_shake(model, cfg, &mut current, rng, shake_deadline);
            current_obj = objective(model, &current);
            since_shake = 0;
        }
    }

    debug!(
        iterations = iteration,
        objective = best_obj,
        "improvement finished"
    );
    best
}

/// Mean positive arc cost, the GLS scaling base.
fn mean_arc_cost(model: &RoutingModel) -> f64 {
    let n = model.num_nodes();
    let mut total = 0.0;
    let mut count = 0usize;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                total += model.matrix.distance(i, j);
                count += 1;
            }
        }
    }
    if count == 0 {
        1.0
    } else {
        (total / count as f64).max(1.0)
    }
}

/// Increment penalties on the arcs of the incumbent with the highest
/// utility `cost / (1 + penalty)`.
fn penalize_arcs(
    model: &RoutingModel,
    assignment: &Assignment,
    penalties: &mut HashMap<(usize, usize), i64>,
) {
    let mut best_util = 0_f64;
    let mut targets: Vec<(usize, usize)> = Vec::new();

    for (vehicle, nodes) in assignment.routes.iter().enumerate() {
        if nodes.is_empty() {
            continue;
        }
        let start = model.vehicles[vehicle].start_node;
        let mut prev = start;
        for &node in nodes.iter().chain(std::iter::once(&start)) {
            let arc = (prev, node);
            let cost = model.distance_m(prev, node) as f64;
            let p = *penalties.get(&arc).unwrap_or(&0);
            let util = cost / (1.0 + p as f64);
            if util > best_util + 1e-9 {
                best_util = util;
                targets.clear();
                targets.push(arc);
            } else if (util - best_util).abs() <= 1e-9 {
                targets.push(arc);
            }
            prev = node;
        }
    }

    for arc in targets {
        *penalties.entry(arc).or_insert(0) += 1;
    }
}

/// Shaped route cost with GLS penalties mixed in.
fn penalized_route_cost(
    model: &RoutingModel,
    vehicle: usize,
    nodes: &[usize],
    penalties: &HashMap<(usize, usize), i64>,
    weight: i64,
) -> i64 {
    if nodes.is_empty() {
        return 0;
    }
    let start = model.vehicles[vehicle].start_node;
    let mut cost = 0;
    let mut prev = start;
    for &node in nodes.iter().chain(std::iter::once(&start)) {
        cost += model.arc_cost(vehicle, prev, node);
        if weight > 0 {
            if let Some(p) = penalties.get(&(prev, node)) {
                cost += p * weight;
            }
        }
        prev = node;
    }
    cost
}

/// Enumerates relocate, swap, and 2-opt moves and evaluates each against
/// the full dimension set in parallel. Only feasible moves survive.
fn enumerate_candidates(
    model: &RoutingModel,
    assignment: &Assignment,
    penalties: &HashMap<(usize, usize), i64>,
    penalty_weight: i64,
) -> Vec<Candidate> {
    let mut moves: Vec<Move> = Vec::new();

    for (from_vehicle, nodes) in assignment.routes.iter().enumerate() {
        for from_pos in 0..nodes.len() {
            for to_vehicle in 0..assignment.routes.len() {
                let target_len = if to_vehicle == from_vehicle {
                    nodes.len() - 1
                } else {
                    assignment.routes[to_vehicle].len()
                };
                for to_pos in 0..=target_len {
                    if to_vehicle == from_vehicle && to_pos == from_pos {
                        continue;
                    }
                    moves.push(Move::Relocate {
                        from_vehicle,
                        from_pos,
                        to_vehicle,
                        to_pos,
                    });
                }
            }
        }
    }

    for vehicle_a in 0..assignment.routes.len() {
        for pos_a in 0..assignment.routes[vehicle_a].len() {
            for vehicle_b in vehicle_a..assignment.routes.len() {
                let start_b = if vehicle_a == vehicle_b { pos_a + 1 } else { 0 };
                for pos_b in start_b..assignment.routes[vehicle_b].len() {
                    moves.push(Move::Swap {
                        vehicle_a,
                        pos_a,
                        vehicle_b,
                        pos_b,
                    });
                }
            }
        }
    }

    for (vehicle, nodes) in assignment.routes.iter().enumerate() {
        for start in 0..nodes.len() {
            for end in (start + 1)..nodes.len() {
                moves.push(Move::TwoOpt {
                    vehicle,
                    start,
                    end,
                });
            }
        }
    }

    moves
        .par_iter()
        .filter_map(|mv| evaluate_move(model, assignment, *mv, penalties, penalty_weight))
        .collect()
}

fn evaluate_move(
    model: &RoutingModel,
    assignment: &Assignment,
    mv: Move,
    penalties: &HashMap<(usize, usize), i64>,
    penalty_weight: i64,
) -> Option<Candidate> {
    let affected: Vec<usize> = match mv {
        Move::Relocate {
            from_vehicle,
            to_vehicle,
            ..
        } => {
            if from_vehicle == to_vehicle {
                vec![from_vehicle]
            } else {
                vec![from_vehicle, to_vehicle]
            }
        }
        Move::Swap {
            vehicle_a,
            vehicle_b,
            ..
        } => {
            if vehicle_a == vehicle_b {
                vec![vehicle_a]
            } else {
                vec![vehicle_a, vehicle_b]
            }
        }
        Move::TwoOpt { vehicle, .. } => vec![vehicle],
    };

    let mut new_routes: HashMap<usize, Vec<usize>> = affected
        .iter()
        .map(|&v| (v, assignment.routes[v].clone()))
        .collect();
    let signature = apply_to_routes(&mut new_routes, mv)?;

    let mut delta = 0;
    let mut delta_augmented = 0;
    for &vehicle in &affected {
        let old_nodes = &assignment.routes[vehicle];
        let new_nodes = &new_routes[&vehicle];

        let new_metrics = route_metrics(model, vehicle, new_nodes);
        if !metrics_feasible(model, vehicle, &new_metrics) {
            return None;
        }
        let old_metrics = route_metrics(model, vehicle, old_nodes);
        delta += new_metrics.shaped_cost - old_metrics.shaped_cost;

        if penalty_weight > 0 && !penalties.is_empty() {
            delta_augmented +=
                penalized_route_cost(model, vehicle, new_nodes, penalties, penalty_weight)
                    - penalized_route_cost(model, vehicle, old_nodes, penalties, penalty_weight);
        }
    }
    if penalties.is_empty() {
        delta_augmented = delta;
    }

    Some(Candidate {
        mv,
        delta,
        delta_augmented,
        signature,
    })
}

/// Applies a move to detached route copies, returning the tabu signature.
/// `None` when the move indices no longer make sense.
fn apply_to_routes(routes: &mut HashMap<usize, Vec<usize>>, mv: Move) -> Option<(usize, usize)> {
    match mv {
        Move::Relocate {
            from_vehicle,
            from_pos,
            to_vehicle,
            to_pos,
        } => {
            let node = {
                let from = routes.get_mut(&from_vehicle)?;
                if from_pos >= from.len() {
                    return None;
                }
                from.remove(from_pos)
            };
            let to = routes.get_mut(&to_vehicle)?;
            if to_pos > to.len() {
                return None;
            }
            to.insert(to_pos, node);
            Some((node.min(node), node.max(node)))
        }
        Move::Swap {
            vehicle_a,
            pos_a,
            vehicle_b,
            pos_b,
        } => {
            let a = *routes.get(&vehicle_a)?.get(pos_a)?;
            let b = *routes.get(&vehicle_b)?.get(pos_b)?;
            routes.get_mut(&vehicle_a)?[pos_a] = b;
            routes.get_mut(&vehicle_b)?[pos_b] = a;
            Some((a.min(b), a.max(b)))
        }
        Move::TwoOpt {
            vehicle,
            start,
            end,
        } => {
            let nodes = routes.get_mut(&vehicle)?;
            if end >= nodes.len() {
                return None;
            }
            let (a, b) = (nodes[start], nodes[end]);
            nodes[start..=end].reverse();
            Some((a.min(b), a.max(b)))
        }
    }
}

/// Applies a selected move to the live assignment.
fn apply_move(assignment: &mut Assignment, mv: Move) {
    match mv {
        Move::Relocate {
            from_vehicle,
            from_pos,
            to_vehicle,
            to_pos,
        } => {
            let node = assignment.routes[from_vehicle].remove(from_pos);
            assignment.routes[to_vehicle].insert(to_pos, node);
        }
        Move::Swap {
            vehicle_a,
            pos_a,
            vehicle_b,
            pos_b,
        } => {
            let a = assignment.routes[vehicle_a][pos_a];
            let b = assignment.routes[vehicle_b][pos_b];
            assignment.routes[vehicle_a][pos_a] = b;
            assignment.routes[vehicle_b][pos_b] = a;
        }
        Move::TwoOpt {
            vehicle,
            start,
            end,
        } => {
            assignment.routes[vehicle][start..=end].reverse();
        }
    }
}

/// Destroy-and-recreate perturbation: rip out a geographic cluster of
/// assigned nodes and greedily reinsert, bounded by the LNS budget.
fn lns_shake(
    model: &RoutingModel,
    cfg: &SolverConfig,
    assignment: &mut Assignment,
    rng: &mut ChaCha8Rng,
    deadline: Instant,
) {
    let assigned: Vec<usize> = assignment
        .routes
        .iter()
        .flat_map(|r| r.iter().copied())
        .collect();
    if assigned.len() < 2 {
        return;
    }

    let remove_count = cfg
        .lns_num_nodes
        .min(assigned.len() / 2)
        .max(1);

    let removed: BTreeSet<usize> = if rng.gen_bool(0.5) {
        // Cluster removal: a random seed node and its nearest assigned
        // neighbors.
        let seed = assigned[rng.gen_range(0..assigned.len())];
        let mut by_distance: Vec<usize> = assigned.clone();
        by_distance.sort_by_key(|&n| (model.distance_m(seed, n), n));
        by_distance.into_iter().take(remove_count).collect()
    } else {
        // Expensive-arc removal: endpoints of the costliest arcs currently
        // driven, considering at most `lns_num_arcs` arcs.
        let mut arcs: Vec<(i64, usize, usize)> = Vec::new();
        for (vehicle, nodes) in assignment.routes.iter().enumerate() {
            if nodes.is_empty() {
                continue;
            }
            let start = model.vehicles[vehicle].start_node;
            let mut prev = start;
            for &node in nodes.iter().chain(std::iter::once(&start)) {
                arcs.push((model.arc_cost(vehicle, prev, node), prev, node));
                prev = node;
            }
        }
        arcs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        let mut picked = BTreeSet::new();
        for (_, from, to) in arcs.into_iter().take(cfg.lns_num_arcs.max(1)) {
            for node in [from, to] {
                if !model.is_depot(node) {
                    picked.insert(node);
                }
            }
            if picked.len() >= remove_count {
                break;
            }
        }
        picked
    };
    if removed.is_empty() {
        return;
    }

    for route in &mut assignment.routes {
        route.retain(|n| !removed.contains(n));
    }
    assignment.unassigned.extend(removed.iter().copied());

    if Instant::now() < deadline {
        insert_unassigned(model, assignment);
    }
    trace!(removed = removed.len(), "lns shake applied");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FirstSolutionStrategy;
    use crate::solver::construct::first_solution;
    use crate::solver::evaluation::route_feasible;
    use rand::SeedableRng;

    fn run(metaheuristic: Metaheuristic) -> (i64, Assignment) {
        let (model, app) = crate::fixtures::small_model();
        let start = first_solution(&model, FirstSolutionStrategy::PathCheapestArc);
        let mut rng = ChaCha8Rng::seed_from_u64(app.solver.seed);
        let deadline = Instant::now() + Duration::from_secs(2);
        let improved = improve(&model, &app.solver, metaheuristic, start, deadline, &mut rng);
        let obj = objective(&model, &improved);
        (obj, improved)
    }

    #[test]
    fn improvement_never_worsens_the_start() {
        let (model, app) = crate::fixtures::small_model();
        let start = first_solution(&model, FirstSolutionStrategy::PathCheapestArc);
        let start_obj = objective(&model, &start);
        for metaheuristic in [
            Metaheuristic::GuidedLocalSearch,
            Metaheuristic::SimulatedAnnealing,
            Metaheuristic::TabuSearch,
        ] {
            let mut rng = ChaCha8Rng::seed_from_u64(app.solver.seed);
            let deadline = Instant::now() + Duration::from_secs(1);
            let improved = improve(
                &model,
                &app.solver,
                metaheuristic,
                start.clone(),
                deadline,
                &mut rng,
            );
            assert!(objective(&model, &improved) <= start_obj);
        }
    }

    #[test]
    fn improved_routes_stay_feasible() {
        for metaheuristic in [
            Metaheuristic::GuidedLocalSearch,
            Metaheuristic::SimulatedAnnealing,
            Metaheuristic::TabuSearch,
        ] {
            let (model, _) = crate::fixtures::small_model();
            let (_, improved) = run(metaheuristic);
            for (v, nodes) in improved.routes.iter().enumerate() {
                assert!(route_feasible(&model, v, nodes));
            }
            assert!(improved.is_complete());
        }
    }

    #[test]
    fn seeded_runs_converge_to_the_same_objective() {
        let (a, _) = run(Metaheuristic::GuidedLocalSearch);
        let (b, _) = run(Metaheuristic::GuidedLocalSearch);
        assert_eq!(a, b);
    }

    #[test]
    fn two_opt_reverses_a_segment() {
        let mut routes: HashMap<usize, Vec<usize>> = HashMap::new();
        routes.insert(0, vec![2, 3, 4, 5]);
        apply_to_routes(
            &mut routes,
            Move::TwoOpt {
                vehicle: 0,
                start: 1,
                end: 3,
            },
        )
        .unwrap();
        assert_eq!(routes[&0], vec![2, 5, 4, 3]);
    }
}
