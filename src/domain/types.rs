use std::collections::HashSet;

use serde::Deserialize;

use crate::config::{LatLon, VehicleKind};

/// One delivery request. Immutable from ingest through solve.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    /// Missing when the source row carried unparseable coordinates.
    pub coords: Option<LatLon>,
    pub volume: f64,
}

/// A route for one vehicle instance.
#[derive(Debug, Clone)]
pub struct Route {
    pub kind: VehicleKind,
    /// Index of the vehicle instance in the flattened fleet.
    pub vehicle_id: usize,
    /// Customers in service order.
    pub customers: Vec<Customer>,
    /// Depot the route starts and ends at.
    pub depot: LatLon,
    pub distance_km: f64,
    pub time_minutes: f64,
    pub volume: f64,
    pub feasible: bool,
}

impl Route {
    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }
}

/// Complete solver output.
#[derive(Debug, Clone)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub dropped: Vec<Customer>,
    pub total_distance_km: f64,
    pub total_time_minutes: f64,
    pub vehicles_used: usize,
    /// Raw search objective (shaped meters + skip penalties); the race
    /// winner minimizes this.
    pub objective: i64,
    pub feasible: bool,
    pub served_volume: f64,
}

impl Solution {
    pub fn empty() -> Self {
        Solution {
            routes: Vec::new(),
            dropped: Vec::new(),
            total_distance_km: 0.0,
            total_time_minutes: 0.0,
            vehicles_used: 0,
            objective: 0,
            feasible: true,
            served_volume: 0.0,
        }
    }

    pub fn served_customers(&self) -> usize {
        self.routes.iter().map(|r| r.customers.len()).sum()
    }
}

/// Result of the warehouse split: which requests go to vehicles and which
/// stay in the warehouse channel.
#[derive(Debug, Clone)]
pub struct WarehouseAllocation {
    pub vehicle_customers: Vec<Customer>,
    pub warehouse_customers: Vec<Customer>,
    /// Ids of vehicle customers inside the center zone.
    pub center_zone_ids: HashSet<String>,
    pub total_capacity: f64,
    pub vehicle_volume: f64,
    pub warehouse_volume: f64,
    pub capacity_utilization: f64,
}

impl WarehouseAllocation {
    pub fn center_zone_customers(&self) -> Vec<&Customer> {
        self.vehicle_customers
            .iter()
            .filter(|c| self.center_zone_ids.contains(&c.id))
            .collect()
    }
}
