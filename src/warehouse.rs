use std::collections::HashSet;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::config::{LocationConfig, VehicleConfig, WarehouseConfig};
use crate::domain::{Customer, WarehouseAllocation};
use crate::error::SolverError;
use crate::geo::{haversine_km, in_center_zone};

/// Partitions customers into the vehicle-eligible set and the
/// warehouse-deferred set, then tags center-zone customers among the
/// eligible ones.
///
/// Customers are admitted smallest-volume first; within equal volume the
/// farthest from the primary depot goes first. A customer is deferred when
/// it would push the running volume past `total_capacity x tolerance`,
/// when it exceeds the largest single vehicle, or when it exceeds the
/// per-customer volume ceiling.
pub fn allocate_customers(
    customers: &[Customer],
    vehicles: &[VehicleConfig],
    location: &LocationConfig,
    warehouse: &WarehouseConfig,
) -> Result<WarehouseAllocation, SolverError> {
    let enabled: Vec<&VehicleConfig> = vehicles.iter().filter(|v| v.enabled).collect();
    if enabled.is_empty() {
        return Err(SolverError::NoEnabledVehicles);
    }

    let max_single_capacity = enabled
        .iter()
        .map(|v| v.capacity)
        .fold(0.0_f64, f64::max);
    let total_capacity: f64 = enabled.iter().map(|v| v.capacity * v.count as f64).sum();
    if max_single_capacity <= 0.0 || total_capacity <= 0.0 {
        return Err(SolverError::NoEnabledVehicles);
    }

    let sorted = sort_customers(customers, location);
    let budget = total_capacity * warehouse.capacity_tolerance;

    let mut vehicle_customers: Vec<Customer> = Vec::new();
    let mut warehouse_customers: Vec<Customer> = Vec::new();
    let mut running_volume = 0.0;

    for customer in sorted {
        if customer.coords.is_none() {
            warn!(
                "customer '{}' has no coordinates, deferring to warehouse",
                customer.name
            );
            warehouse_customers.push(customer);
            continue;
        }
        if customer.volume > max_single_capacity {
            warn!(
                "customer '{}' ({:.2}) exceeds the largest vehicle ({max_single_capacity:.2}), \
                 deferring to warehouse",
                customer.name, customer.volume
            );
            warehouse_customers.push(customer);
            continue;
        }
        if customer.volume > warehouse.max_bus_customer_volume {
            debug!(
                "customer '{}' ({:.2}) is above the per-customer ceiling ({:.2}), \
                 deferring to warehouse",
                customer.name, customer.volume, warehouse.max_bus_customer_volume
            );
            warehouse_customers.push(customer);
            continue;
        }
        if running_volume + customer.volume <= budget {
            running_volume += customer.volume;
            vehicle_customers.push(customer);
        } else {
            warehouse_customers.push(customer);
        }
    }

    let center_zone_ids: HashSet<String> = if location.enable_center_zone_priority {
        let ids: HashSet<String> = vehicle_customers
            .iter()
            .filter(|c| {
                c.coords.is_some_and(|coords| {
                    in_center_zone(coords, location.center, location.center_zone_radius_km)
                })
            })
            .map(|c| c.id.clone())
            .collect();
        info!(
            "{} customers inside the center zone (radius {:.1} km)",
            ids.len(),
            location.center_zone_radius_km
        );
        ids
    } else {
        HashSet::new()
    };

    let warehouse_volume: f64 = warehouse_customers.iter().map(|c| c.volume).sum();
    let utilization = if total_capacity > 0.0 {
        running_volume / total_capacity
    } else {
        0.0
    };

    info!(
        "allocation: {} customers for vehicles ({running_volume:.1} of {total_capacity:.1}, \
         {:.1}%), {} deferred to warehouse",
        vehicle_customers.len(),
        utilization * 100.0,
        warehouse_customers.len()
    );

    let allocation = WarehouseAllocation {
        vehicle_customers,
        warehouse_customers,
        center_zone_ids,
        total_capacity,
        vehicle_volume: running_volume,
        warehouse_volume,
        capacity_utilization: utilization,
    };
    validate_allocation(&allocation, customers)?;
    Ok(allocation)
}

/// Volume ascending; within identical (rounded) volume, distance from the
/// primary depot descending, so far-away small requests are admitted first.
fn sort_customers(customers: &[Customer], location: &LocationConfig) -> Vec<Customer> {
    let depot = location.depot;
    let mut sorted: Vec<Customer> = customers.to_vec();
    sorted.sort_by(|a, b| {
        let va = (a.volume * 100.0).round() as i64;
        let vb = (b.volume * 100.0).round() as i64;
        va.cmp(&vb).then_with(|| {
            let da = a.coords.map(|c| haversine_km(c, depot)).unwrap_or(0.0);
            let db = b.coords.map(|c| haversine_km(c, depot)).unwrap_or(0.0);
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    sorted
}

/// The two lists must partition the input: no duplicates, no losses, and
/// volumes must be conserved.
fn validate_allocation(
    allocation: &WarehouseAllocation,
    input: &[Customer],
) -> Result<(), SolverError> {
    let all_ids: Vec<&String> = allocation
        .vehicle_customers
        .iter()
        .chain(&allocation.warehouse_customers)
        .map(|c| &c.id)
        .collect();
    let unique: HashSet<&&String> = all_ids.iter().collect();
    if unique.len() != all_ids.len() {
        let dupes: Vec<&&String> = all_ids.iter().duplicates().collect();
        return Err(SolverError::InvalidInput(format!(
            "duplicate customer ids in allocation: {dupes:?}"
        )));
    }
    if all_ids.len() != input.len() {
        return Err(SolverError::InvalidInput(format!(
            "allocation lost customers: {} in, {} out",
            input.len(),
            all_ids.len()
        )));
    }

    let in_volume: f64 = input.iter().map(|c| c.volume).sum();
    let out_volume = allocation.vehicle_volume + allocation.warehouse_volume;
    if (in_volume - out_volume).abs() > 0.1 {
        return Err(SolverError::InvalidInput(format!(
            "allocation volume mismatch: {in_volume:.2} in, {out_volume:.2} out"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_fleet, VehicleKind};

    fn customer(id: &str, coords: (f64, f64), volume: f64) -> Customer {
        Customer {
            id: id.to_string(),
            name: format!("Customer {id}"),
            coords: Some(coords),
            volume,
        }
    }

    fn small_fleet(capacity: f64, count: usize) -> Vec<VehicleConfig> {
        let location = LocationConfig::default();
        let mut fleet = default_fleet(&location);
        for v in &mut fleet {
            v.enabled = v.kind == VehicleKind::Internal;
            v.capacity = capacity;
            v.count = count;
        }
        fleet
    }

    #[test]
    fn no_enabled_vehicles_is_an_error() {
        let location = LocationConfig::default();
        let mut fleet = default_fleet(&location);
        for v in &mut fleet {
            v.enabled = false;
        }
        let result = allocate_customers(
            &[customer("1", (42.70, 23.33), 10.0)],
            &fleet,
            &location,
            &WarehouseConfig::default(),
        );
        assert!(matches!(result, Err(SolverError::NoEnabledVehicles)));
    }

    #[test]
    fn partition_covers_input_without_duplicates() {
        let customers: Vec<Customer> = (0..20)
            .map(|i| customer(&i.to_string(), (42.70 + i as f64 * 0.01, 23.33), 30.0))
            .collect();
        let allocation = allocate_customers(
            &customers,
            &small_fleet(100.0, 2),
            &LocationConfig::default(),
            &WarehouseConfig::default(),
        )
        .unwrap();

        let total =
            allocation.vehicle_customers.len() + allocation.warehouse_customers.len();
        assert_eq!(total, customers.len());
    }

    #[test]
    fn oversized_customers_go_to_warehouse() {
        let customers = vec![
            customer("big", (42.70, 23.33), 500.0),
            customer("small", (42.71, 23.34), 10.0),
        ];
        let allocation = allocate_customers(
            &customers,
            &small_fleet(100.0, 3),
            &LocationConfig::default(),
            &WarehouseConfig::default(),
        )
        .unwrap();

        assert_eq!(allocation.warehouse_customers.len(), 1);
        assert_eq!(allocation.warehouse_customers[0].id, "big");
        assert_eq!(allocation.vehicle_customers.len(), 1);
    }

    #[test]
    fn all_too_large_means_everything_deferred() {
        let customers: Vec<Customer> = (0..5)
            .map(|i| customer(&i.to_string(), (42.70, 23.33), 900.0))
            .collect();
        let allocation = allocate_customers(
            &customers,
            &small_fleet(100.0, 5),
            &LocationConfig::default(),
            &WarehouseConfig::default(),
        )
        .unwrap();

        assert!(allocation.vehicle_customers.is_empty());
        assert_eq!(allocation.warehouse_customers.len(), 5);
        assert_eq!(allocation.capacity_utilization, 0.0);
    }

    #[test]
    fn tolerance_keeps_slack_in_the_fleet() {
        // Fleet capacity 100, tolerance 0.9: only 90 units may be admitted.
        let customers: Vec<Customer> = (0..10)
            .map(|i| customer(&i.to_string(), (42.70 + i as f64 * 0.01, 23.33), 10.0))
            .collect();
        let allocation = allocate_customers(
            &customers,
            &small_fleet(100.0, 1),
            &LocationConfig::default(),
            &WarehouseConfig::default(),
        )
        .unwrap();

        assert_eq!(allocation.vehicle_customers.len(), 9);
        assert_eq!(allocation.warehouse_customers.len(), 1);
        assert!((allocation.vehicle_volume - 90.0).abs() < 1e-9);
    }

    #[test]
    fn equal_volume_prefers_farther_customers() {
        let location = LocationConfig::default();
        let near = customer("near", (42.696, 23.232), 50.0);
        let far = customer("far", (42.90, 23.90), 50.0);
        // Budget admits exactly one of the two.
        let allocation = allocate_customers(
            &[near, far],
            &small_fleet(60.0, 1),
            &location,
            &WarehouseConfig::default(),
        )
        .unwrap();

        assert_eq!(allocation.vehicle_customers.len(), 1);
        assert_eq!(allocation.vehicle_customers[0].id, "far");
    }

    #[test]
    fn center_zone_customers_are_tagged() {
        let location = LocationConfig::default();
        let inside = customer("in", (42.698, 23.325), 10.0);
        let outside = customer("out", (42.80, 23.50), 10.0);
        let allocation = allocate_customers(
            &[inside, outside],
            &small_fleet(100.0, 1),
            &location,
            &WarehouseConfig::default(),
        )
        .unwrap();

        assert!(allocation.center_zone_ids.contains("in"));
        assert!(!allocation.center_zone_ids.contains("out"));
    }

    #[test]
    fn customers_without_coordinates_are_deferred() {
        let mut nameless = customer("x", (0.0, 0.0), 10.0);
        nameless.coords = None;
        let allocation = allocate_customers(
            &[nameless],
            &small_fleet(100.0, 1),
            &LocationConfig::default(),
            &WarehouseConfig::default(),
        )
        .unwrap();
        assert_eq!(allocation.warehouse_customers.len(), 1);
    }
}
