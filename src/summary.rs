use colored::Colorize;

use crate::config::SolverConfig;
use crate::domain::{Solution, WarehouseAllocation};

/// How many of the largest dropped customers are named in the summary.
const DROPPED_PREVIEW: usize = 10;

/// Renders the result summary to stdout: totals, served and dropped
/// counts, and a per-route breakdown with clock times derived from each
/// vehicle's start time.
pub fn print_summary(
    solution: &Solution,
    allocation: &WarehouseAllocation,
    solver: &SolverConfig,
    start_times: &[u32],
) {
    let total_customers =
        allocation.vehicle_customers.len() + allocation.warehouse_customers.len();

    println!("{}", "=".repeat(56));
    println!("ROUTING SUMMARY");
    println!("{}", "=".repeat(56));
    println!(
        "customers: {total_customers} total, {} eligible, {} warehouse",
        allocation.vehicle_customers.len(),
        allocation.warehouse_customers.len()
    );
    println!(
        "capacity:  {:.1} / {:.1} committed ({:.1}%)",
        allocation.vehicle_volume,
        allocation.total_capacity,
        allocation.capacity_utilization * 100.0
    );

    let served_line = format!(
        "served:    {} customers, {:.2} volume, {} vehicles",
        solution.served_customers(),
        solution.served_volume,
        solution.vehicles_used
    );
    if solution.feasible {
        println!("{}", served_line.green());
    } else {
        println!("{}", served_line.yellow());
    }
    println!(
        "distance:  {:.2} km, time: {:.1} min, objective: {}",
        solution.total_distance_km, solution.total_time_minutes, solution.objective
    );

    if !solution.dropped.is_empty() {
        let mut dropped = solution.dropped.clone();
        dropped.sort_by(|a, b| b.volume.partial_cmp(&a.volume).unwrap_or(std::cmp::Ordering::Equal));
        println!(
            "{}",
            format!("dropped:   {} customers", dropped.len()).red()
        );
        for customer in dropped.iter().take(DROPPED_PREVIEW) {
            println!("  - {} ({:.1})", customer.name, customer.volume);
        }
        if dropped.len() > DROPPED_PREVIEW {
            println!("  ... and {} more", dropped.len() - DROPPED_PREVIEW);
        }
    }

    println!("{}", "-".repeat(56));
    for (i, route) in solution.routes.iter().enumerate() {
        let status = if route.feasible {
            "ok".green()
        } else {
            "over limit".red()
        };
        let clock = if solver.enable_start_time_tracking {
            let start = start_times
                .get(route.vehicle_id)
                .copied()
                .unwrap_or(solver.global_start_time_minutes);
            let end = start + route.time_minutes.round() as u32;
            format!(
                " {:02}:{:02}-{:02}:{:02}",
                start / 60,
                start % 60,
                (end / 60) % 24,
                end % 60
            )
        } else {
            String::new()
        };
        println!(
            "route {:>2} [{}] {} stops, {:.1} vol, {:.2} km, {:.1} min{clock} [{status}]",
            i + 1,
            route.kind.label(),
            route.customers.len(),
            route.volume,
            route.distance_km,
            route.time_minutes,
        );
    }
    println!("{}", "=".repeat(56));
}
