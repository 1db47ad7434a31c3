use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{LatLon, LocationConfig, SolverConfig, VehicleConfig, VehicleKind};
use crate::distance::DistanceMatrix;
use crate::domain::{Customer, WarehouseAllocation};
use crate::error::SolverError;
use crate::geo::{in_center_zone, in_city_zone};

/// Volumes are fixed-point with two decimals.
pub const DEMAND_SCALE: f64 = 100.0;
/// Sentinel for vehicles without a distance limit.
const UNLIMITED_DISTANCE_M: i64 = 999_999_999;
/// Skip penalties are clamped here so a full drop set cannot overflow the
/// objective sum.
const MAX_SKIP_PENALTY: i64 = 1_000_000_000_000;

/// One concrete vehicle instance in the flattened fleet.
#[derive(Debug, Clone)]
pub struct VehicleSpec {
    pub kind: VehicleKind,
    /// Index of this instance within its kind (0..count).
    pub kind_instance: usize,
    /// Depot node the vehicle starts and ends at.
    pub start_node: usize,
    pub start_depot: LatLon,
    pub tsp_depot: Option<LatLon>,
    /// Scaled capacity (volume x 100).
    pub capacity: i64,
    pub capacity_volume: f64,
    pub max_distance_m: i64,
    pub max_distance_km: Option<f64>,
    pub max_stops: usize,
    pub max_time_secs: i64,
    pub max_time_hours: f64,
    pub service_time_secs: i64,
    pub service_time_minutes: f64,
    pub start_time_minutes: u32,
}

/// Per-kind arc-cost shaping parameters.
#[derive(Debug, Clone, Copy)]
pub struct ShapeParams {
    pub discount: f64,
    pub penalty_m: i64,
}

/// A pure arc-cost evaluator: `(model, params, from, to) -> shaped cost`.
/// One evaluator is registered per vehicle kind; none captures state.
pub type ArcEvaluator = fn(&RoutingModel, &ShapeParams, usize, usize) -> i64;

fn baseline_cost(model: &RoutingModel, _params: &ShapeParams, from: usize, to: usize) -> i64 {
    model.distance_m(from, to)
}

/// CENTER vehicles: discounted arcs into the center zone, unchanged arcs
/// elsewhere. No penalty outside the zone; that would keep the vehicle
/// parked at its depot.
fn center_discount_cost(model: &RoutingModel, params: &ShapeParams, from: usize, to: usize) -> i64 {
    if model.is_center_customer(to) {
        (model.matrix.distance(from, to) * params.discount).round() as i64
    } else {
        model.distance_m(from, to)
    }
}

/// Non-CENTER vehicles pay a large additive penalty on arcs into the
/// center zone.
fn center_penalty_cost(model: &RoutingModel, params: &ShapeParams, from: usize, to: usize) -> i64 {
    if model.is_center_customer(to) {
        model.distance_m(from, to) + params.penalty_m
    } else {
        model.distance_m(from, to)
    }
}

#[derive(Clone)]
struct KindCosting {
    evaluator: ArcEvaluator,
    params: ShapeParams,
}

/// Indexed routing problem over `N = |depots| + |vehicle customers|`
/// nodes. Nodes `[0, num_depots)` are depots, the rest are customers in
/// allocation order. All dimension bounds are integer-scaled.
pub struct RoutingModel {
    pub matrix: Arc<DistanceMatrix>,
    pub depots: Vec<LatLon>,
    pub customers: Vec<Customer>,
    /// Scaled demand per node (0 for depots).
    pub demands: Vec<i64>,
    pub vehicles: Vec<VehicleSpec>,
    /// Whether each node is a center-zone customer.
    pub center_node: Vec<bool>,
    /// Whether each node lies inside the city-traffic zone.
    pub city_node: Vec<bool>,
    pub city_multiplier: f64,
    /// Fleet-average service time; the time dimension cannot carry
    /// per-vehicle dwell, the exact value is reapplied after the solve.
    pub avg_service_secs: i64,
    /// `Some(penalty)` when skipping is allowed.
    pub skip_penalty: Option<i64>,
    costing: Vec<KindCosting>,
}

impl RoutingModel {
    pub fn build(
        allocation: &WarehouseAllocation,
        fleet: &[VehicleConfig],
        location: &LocationConfig,
        solver: &SolverConfig,
        matrix: Arc<DistanceMatrix>,
    ) -> Result<Self, SolverError> {
        let enabled: Vec<&VehicleConfig> = fleet.iter().filter(|v| v.enabled).collect();
        if enabled.is_empty() {
            return Err(SolverError::NoEnabledVehicles);
        }

        let depots = unique_depots(location, fleet);
        let customers = allocation.vehicle_customers.clone();
        let num_nodes = depots.len() + customers.len();
        if matrix.len() != num_nodes {
            return Err(SolverError::MatrixUnavailable(format!(
                "matrix covers {} locations but the model needs {num_nodes}",
                matrix.len()
            )));
        }

        let mut demands = vec![0_i64; depots.len()];
        for customer in &customers {
            if customer.coords.is_none() {
                return Err(SolverError::InvalidInput(format!(
                    "vehicle customer '{}' has no coordinates",
                    customer.id
                )));
            }
            demands.push((customer.volume * DEMAND_SCALE).round() as i64);
        }

        let avg_service_secs = {
            let total: f64 = enabled.iter().map(|v| v.service_time_minutes * 60.0).sum();
            (total / enabled.len() as f64).round() as i64
        };

        let mut vehicles = Vec::new();
        for config in &enabled {
            let start_node = depot_index(&depots, config.start_depot).unwrap_or(0);
            for instance in 0..config.count {
                vehicles.push(VehicleSpec {
                    kind: config.kind,
                    kind_instance: instance,
                    start_node,
                    start_depot: depots[start_node],
                    tsp_depot: config.tsp_depot,
                    capacity: (config.capacity * DEMAND_SCALE).round() as i64,
                    capacity_volume: config.capacity,
                    max_distance_m: config
                        .max_distance_km
                        .map(|km| (km * 1000.0).round() as i64)
                        .unwrap_or(UNLIMITED_DISTANCE_M),
                    max_distance_km: config.max_distance_km,
                    max_stops: config
                        .max_customers_per_route
                        .unwrap_or(customers.len() + 1),
                    max_time_secs: (config.max_time_hours * 3600.0).round() as i64,
                    max_time_hours: config.max_time_hours,
                    service_time_secs: (config.service_time_minutes * 60.0).round() as i64,
                    service_time_minutes: config.service_time_minutes,
                    start_time_minutes: config.start_time_minutes,
                });
            }
        }

        let center_node: Vec<bool> = (0..num_nodes)
            .map(|node| {
                if node < depots.len() {
                    false
                } else {
                    allocation
                        .center_zone_ids
                        .contains(&customers[node - depots.len()].id)
                }
            })
            .collect();

        let city_node: Vec<bool> = (0..num_nodes)
            .map(|node| {
                if !location.enable_city_traffic {
                    return false;
                }
                let coords = if node < depots.len() {
                    depots[node]
                } else {
                    customers[node - depots.len()].coords.unwrap_or((0.0, 0.0))
                };
                in_city_zone(coords, location.city_center, location.city_radius_km)
            })
            .collect();

        let costing: Vec<KindCosting> = vehicles
            .iter()
            .map(|spec| costing_for_kind(spec.kind, location))
            .collect();

        let skip_penalty = if solver.allow_customer_skipping {
            Some(solver.skip_penalty.clamp(0, MAX_SKIP_PENALTY))
        } else {
            None
        };

        let total_demand: i64 = demands.iter().sum();
        let total_capacity: i64 = vehicles.iter().map(|v| v.capacity).sum();
        info!(
            "model: {} depots, {} customers, {} vehicles, demand {} / capacity {} ({:.2})",
            depots.len(),
            customers.len(),
            vehicles.len(),
            total_demand,
            total_capacity,
            if total_demand > 0 {
                total_capacity as f64 / total_demand as f64
            } else {
                f64::INFINITY
            }
        );
        if total_capacity < total_demand && skip_penalty.is_none() {
            warn!("total capacity is below total demand and skipping is off");
        }

        let city_count = city_node.iter().filter(|b| **b).count();
        if location.enable_city_traffic {
            info!(
                "city traffic zone: {}/{} locations, multiplier {:.2}",
                city_count, num_nodes, location.city_duration_multiplier
            );
        }

        Ok(RoutingModel {
            matrix,
            depots,
            customers,
            demands,
            vehicles,
            center_node,
            city_node,
            city_multiplier: if location.enable_city_traffic {
                location.city_duration_multiplier
            } else {
                1.0
            },
            avg_service_secs,
            skip_penalty,
            costing,
        })
    }

    pub fn num_depots(&self) -> usize {
        self.depots.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.depots.len() + self.customers.len()
    }

    pub fn is_depot(&self, node: usize) -> bool {
        node < self.depots.len()
    }

    pub fn is_center_customer(&self, node: usize) -> bool {
        !self.is_depot(node) && self.center_node[node]
    }

    /// All customer node ids, in allocation order.
    pub fn customer_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.depots.len()..self.num_nodes()
    }

    pub fn customer_for_node(&self, node: usize) -> &Customer {
        &self.customers[node - self.depots.len()]
    }

    pub fn node_coords(&self, node: usize) -> LatLon {
        if self.is_depot(node) {
            self.depots[node]
        } else {
            self.customer_for_node(node).coords.unwrap_or((0.0, 0.0))
        }
    }

    /// Raw matrix distance in whole meters.
    pub fn distance_m(&self, from: usize, to: usize) -> i64 {
        self.matrix.distance(from, to).round() as i64
    }

    /// Shaped arc cost for one vehicle, via its kind's registered
    /// evaluator.
    pub fn arc_cost(&self, vehicle: usize, from: usize, to: usize) -> i64 {
        let costing = &self.costing[vehicle];
        (costing.evaluator)(self, &costing.params, from, to)
    }

    /// Time-dimension transit: travel time with the city multiplier on
    /// both-endpoint city arcs, plus the fleet-average service time when
    /// departing a customer.
    pub fn travel_time_secs(&self, from: usize, to: usize) -> i64 {
        let mut t = self.matrix.duration(from, to);
        if self.city_node[from] && self.city_node[to] {
            t *= self.city_multiplier;
        }
        let service = if self.is_depot(from) {
            0
        } else {
            self.avg_service_secs
        };
        t.round() as i64 + service
    }

    /// Travel time with the exact per-vehicle service time, used by the
    /// post-solve reconfiguration.
    pub fn travel_time_exact_secs(&self, from: usize, to: usize, service_secs: i64) -> i64 {
        let mut t = self.matrix.duration(from, to);
        if self.city_node[from] && self.city_node[to] {
            t *= self.city_multiplier;
        }
        let service = if self.is_depot(from) { 0 } else { service_secs };
        t.round() as i64 + service
    }
}

fn costing_for_kind(kind: VehicleKind, location: &LocationConfig) -> KindCosting {
    if !location.enable_center_zone_restrictions && !location.enable_center_zone_priority {
        return KindCosting {
            evaluator: baseline_cost,
            params: ShapeParams {
                discount: 1.0,
                penalty_m: 0,
            },
        };
    }

    match kind {
        VehicleKind::Center => {
            if location.enable_center_zone_priority {
                KindCosting {
                    evaluator: center_discount_cost,
                    params: ShapeParams {
                        discount: location.center_discount,
                        penalty_m: 0,
                    },
                }
            } else {
                KindCosting {
                    evaluator: baseline_cost,
                    params: ShapeParams {
                        discount: 1.0,
                        penalty_m: 0,
                    },
                }
            }
        }
        other => {
            if location.enable_center_zone_restrictions {
                KindCosting {
                    evaluator: center_penalty_cost,
                    params: ShapeParams {
                        discount: 1.0,
                        penalty_m: location.center_penalty_for(other).round() as i64,
                    },
                }
            } else {
                KindCosting {
                    evaluator: baseline_cost,
                    params: ShapeParams {
                        discount: 1.0,
                        penalty_m: 0,
                    },
                }
            }
        }
    }
}

/// Distinct depot list for matrix and model construction. The primary
/// depot is always index 0; the remaining start depots follow in (lat,
/// lon) order.
pub fn unique_depots(location: &LocationConfig, fleet: &[VehicleConfig]) -> Vec<LatLon> {
    let mut others: Vec<LatLon> = Vec::new();
    for vehicle in fleet.iter().filter(|v| v.enabled) {
        let depot = vehicle.start_depot;
        if depot != location.depot && !others.contains(&depot) {
            others.push(depot);
        }
    }
    others.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut depots = vec![location.depot];
    depots.extend(others);
    depots
}

fn depot_index(depots: &[LatLon], depot: LatLon) -> Option<usize> {
    depots.iter().position(|d| *d == depot)
}

/// Whether a customer sits inside the configured center zone. Exposed for
/// the zone-accounting invariant tests.
pub fn customer_in_center(customer: &Customer, location: &LocationConfig) -> bool {
    customer
        .coords
        .is_some_and(|c| in_center_zone(c, location.center, location.center_zone_radius_km))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn nodes_are_depots_then_customers() {
        let (model, _) = fixtures::small_model();
        assert_eq!(model.num_depots(), 2);
        assert!(model.is_depot(0));
        assert!(model.is_depot(1));
        assert!(!model.is_depot(2));
        assert_eq!(model.demands[0], 0);
        assert_eq!(model.demands[2], 2000); // volume 20 scaled x100
    }

    #[test]
    fn vehicle_limits_are_scaled() {
        let (model, _) = fixtures::small_model();
        let internal = &model.vehicles[0];
        assert_eq!(internal.capacity, 10_000); // 100 stacks
        assert_eq!(internal.max_time_secs, 8 * 3600);
        assert_eq!(internal.max_stops, model.customers.len() + 1);
    }

    #[test]
    fn center_vehicle_gets_discounted_center_arcs() {
        let (model, _) = fixtures::small_model();
        let center_vehicle = model
            .vehicles
            .iter()
            .position(|v| v.kind == VehicleKind::Center)
            .unwrap();
        // Node 2 is C1, inside the center zone.
        assert!(model.is_center_customer(2));
        let raw = model.distance_m(0, 2);
        let shaped = model.arc_cost(center_vehicle, 0, 2);
        assert_eq!(shaped, (model.matrix.distance(0, 2) * 0.5).round() as i64);
        assert!(shaped < raw);
        // Arcs to non-center customers are unchanged, not penalized.
        assert!(!model.is_center_customer(4));
        assert_eq!(model.arc_cost(center_vehicle, 0, 4), model.distance_m(0, 4));
    }

    #[test]
    fn non_center_vehicle_pays_penalty_into_the_zone() {
        let (model, _) = fixtures::small_model();
        let internal_vehicle = model
            .vehicles
            .iter()
            .position(|v| v.kind == VehicleKind::Internal)
            .unwrap();
        let raw = model.distance_m(0, 2);
        assert_eq!(model.arc_cost(internal_vehicle, 0, 2), raw + 40_000);
        assert_eq!(model.arc_cost(internal_vehicle, 0, 4), model.distance_m(0, 4));
    }

    #[test]
    fn time_transit_adds_average_service_after_customers() {
        let (model, _) = fixtures::small_model();
        // Departing a depot adds no service time.
        let mult = |a: usize, b: usize| {
            if model.city_node[a] && model.city_node[b] {
                model.city_multiplier
            } else {
                1.0
            }
        };
        assert_eq!(
            model.travel_time_secs(0, 2),
            (model.matrix.duration(0, 2) * mult(0, 2)).round() as i64
        );
        // Departing a customer adds the fleet-average service time.
        assert_eq!(
            model.travel_time_secs(2, 3),
            (model.matrix.duration(2, 3) * mult(2, 3)).round() as i64 + model.avg_service_secs
        );
    }

    #[test]
    fn city_arcs_are_multiplied_only_when_both_endpoints_inside() {
        let (model, _) = fixtures::small_model();
        // C3 at (42.80, 23.50) is outside the 10 km city disc; depot 1 and
        // C1 are inside.
        assert!(model.city_node[1]);
        assert!(model.city_node[2]);
        assert!(!model.city_node[4]);

        // Depot-to-customer arc with both endpoints inside: multiplied.
        let inside = model.travel_time_secs(1, 2);
        let expected = (model.matrix.duration(1, 2) * 1.6).round() as i64;
        assert_eq!(inside, expected);

        // Customer-to-outside arc: raw duration plus average service.
        let mixed = model.travel_time_secs(2, 4);
        let expected_mixed = model.matrix.duration(2, 4).round() as i64 + model.avg_service_secs;
        assert_eq!(mixed, expected_mixed);
    }

    #[test]
    fn primary_depot_leads_the_depot_list() {
        let location = LocationConfig::default();
        let fleet = crate::config::default_fleet(&location);
        let depots = unique_depots(&location, &fleet);
        assert_eq!(depots[0], location.depot);
        // Internal and Center both start at the primary depot.
        assert_eq!(depots.len(), 1);
    }
}
