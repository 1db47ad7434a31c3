use std::thread;

use tracing::{info, warn};

use crate::config::{FirstSolutionStrategy, Metaheuristic, SolverConfig};
use crate::domain::Solution;
use crate::error::SolverError;
use crate::solver::engine::solve_with;
use crate::solver::model::RoutingModel;

/// One racer's configuration.
#[derive(Debug, Clone, Copy)]
struct Variant {
    strategy: FirstSolutionStrategy,
    metaheuristic: Metaheuristic,
}

/// Resolves the worker count: `-1` means all cores but one.
pub fn resolve_workers(cfg: &SolverConfig) -> usize {
    if cfg.num_workers < 0 {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.saturating_sub(1).max(1)
    } else {
        (cfg.num_workers as usize).max(1)
    }
}

/// Cycles through the configured strategy and metaheuristic lists in
/// lockstep to produce one variant per worker.
fn variants(cfg: &SolverConfig, workers: usize) -> Vec<Variant> {
    let strategies = if cfg.race_first_solution_strategies.is_empty() {
        vec![cfg.first_solution_strategy]
    } else {
        cfg.race_first_solution_strategies.clone()
    };
    let metaheuristics = if cfg.race_metaheuristics.is_empty() {
        vec![cfg.local_search_metaheuristic]
    } else {
        cfg.race_metaheuristics.clone()
    };

    (0..workers)
        .map(|i| Variant {
            strategy: strategies[i % strategies.len()],
            metaheuristic: metaheuristics[i % metaheuristics.len()],
        })
        .collect()
}

/// Runs W solver instances on OS threads over the same immutable model
/// and returns the solution with the lowest objective. Ties break on the
/// lower worker index. Workers that fail are logged and dropped; the race
/// only fails when every worker does.
pub fn race(model: &RoutingModel, cfg: &SolverConfig) -> Result<Solution, SolverError> {
    let workers = resolve_workers(cfg);
    if workers <= 1 {
        info!("race degenerates to a single worker");
        return solve_with(
            model,
            cfg,
            cfg.first_solution_strategy,
            cfg.local_search_metaheuristic,
            cfg.seed,
        );
    }

    let variants = variants(cfg, workers);
    info!(
        workers,
        strategies = ?variants.iter().map(|v| v.strategy.label()).collect::<Vec<_>>(),
        "starting solver race"
    );

    let results: Vec<(usize, Result<Solution, SolverError>)> = thread::scope(|scope| {
        let handles: Vec<_> = variants
            .iter()
            .enumerate()
            .map(|(index, variant)| {
                let variant = *variant;
                scope.spawn(move || {
                    let result =
                        solve_with(model, cfg, variant.strategy, variant.metaheuristic, cfg.seed);
                    (index, result)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((usize::MAX, Err(SolverError::NoSolution))))
            .collect()
    });

    let mut winner: Option<(usize, Solution)> = None;
    let mut first_error: Option<SolverError> = None;
    for (index, result) in results {
        match result {
            Ok(solution) => {
                info!(
                    worker = index,
                    objective = solution.objective,
                    routes = solution.routes.len(),
                    dropped = solution.dropped.len(),
                    "worker finished"
                );
                let better = match &winner {
                    None => true,
                    Some((best_index, best)) => {
                        solution.objective < best.objective
                            || (solution.objective == best.objective && index < *best_index)
                    }
                };
                if better {
                    winner = Some((index, solution));
                }
            }
            Err(e) => {
                warn!(worker = index, "worker failed: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match winner {
        Some((index, solution)) => {
            info!(
                worker = index,
                objective = solution.objective,
                "race winner selected"
            );
            Ok(solution)
        }
        None => Err(first_error.unwrap_or(SolverError::NoSolution)),
    }
}
