use std::path::PathBuf;

/// (latitude, longitude) pair used for every location in the system.
pub type LatLon = (f64, f64);

/// Vehicle classes in the fleet. The class drives zone treatment: CENTER
/// vehicles get discounted arcs into the center zone, everyone else pays a
/// penalty for entering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleKind {
    Internal,
    Center,
    External,
    Special,
    Regional,
}

impl VehicleKind {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleKind::Internal => "internal",
            VehicleKind::Center => "center",
            VehicleKind::External => "external",
            VehicleKind::Special => "special",
            VehicleKind::Regional => "regional",
        }
    }
}

/// Configuration for one vehicle class.
#[derive(Debug, Clone)]
pub struct VehicleConfig {
    pub kind: VehicleKind,
    /// Capacity in stack units.
    pub capacity: f64,
    /// How many identical units of this class exist.
    pub count: usize,
    /// Hard route-length limit; `None` means unlimited.
    pub max_distance_km: Option<f64>,
    /// Hard working-time limit per route (travel + service).
    pub max_time_hours: f64,
    /// Dwell time per served customer.
    pub service_time_minutes: f64,
    /// Hard stop-count limit; `None` means unlimited.
    pub max_customers_per_route: Option<usize>,
    pub enabled: bool,
    /// Operational depot the vehicle starts and ends at.
    pub start_depot: LatLon,
    /// Depot the post-solve TSP re-sequencing runs from. Falls back to
    /// `start_depot`, then the primary depot.
    pub tsp_depot: Option<LatLon>,
    /// Shift start, minutes from 00:00.
    pub start_time_minutes: u32,
}

/// Geographic business rules: depots, center zone, city-traffic zone.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    /// Primary depot; always matrix index 0.
    pub depot: LatLon,
    /// Anchor of the center zone.
    pub center: LatLon,
    pub center_zone_radius_km: f64,
    pub enable_center_zone_priority: bool,
    pub enable_center_zone_restrictions: bool,
    /// Arc-cost discount for CENTER vehicles on arcs into the zone.
    pub center_discount: f64,
    /// Additive arc penalties (meters) per non-CENTER kind for arcs into
    /// the zone.
    pub internal_center_penalty_m: f64,
    pub external_center_penalty_m: f64,
    pub special_center_penalty_m: f64,
    pub regional_center_penalty_m: f64,
    /// City-traffic zone: both-endpoint arcs get their duration multiplied.
    pub city_center: LatLon,
    pub city_radius_km: f64,
    pub city_duration_multiplier: f64,
    pub enable_city_traffic: bool,
}

impl LocationConfig {
    pub fn center_penalty_for(&self, kind: VehicleKind) -> f64 {
        match kind {
            VehicleKind::Center => 0.0,
            VehicleKind::Internal => self.internal_center_penalty_m,
            VehicleKind::External => self.external_center_penalty_m,
            VehicleKind::Special => self.special_center_penalty_m,
            VehicleKind::Regional => self.regional_center_penalty_m,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            depot: (42.695785029219415, 23.23165887245312),
            center: (42.69735652560932, 23.323809998750914),
            center_zone_radius_km: 1.7,
            enable_center_zone_priority: true,
            enable_center_zone_restrictions: true,
            center_discount: 0.5,
            internal_center_penalty_m: 40_000.0,
            external_center_penalty_m: 40_000.0,
            special_center_penalty_m: 40_000.0,
            regional_center_penalty_m: 40_000.0,
            city_center: (42.6977, 23.3219),
            city_radius_km: 10.0,
            city_duration_multiplier: 1.6,
            enable_city_traffic: true,
        }
    }
}

/// Routing engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingEngine {
    Osrm,
    Valhalla,
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub engine: RoutingEngine,
    /// Time-dependent routing (Valhalla only).
    pub enable_time_dependent: bool,
    /// Departure time "HH:MM" for time-dependent requests.
    pub departure_time: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            engine: RoutingEngine::Osrm,
            enable_time_dependent: true,
            departure_time: "08:00".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    /// Square batch edge for tiled matrix assembly.
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Fallback speed when the engine returns no duration, and for
    /// synthesized matrices.
    pub average_speed_kmh: f64,
    pub fallback_to_public: bool,
    pub public_url: String,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        OsrmConfig {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            batch_size: 50,
            timeout_seconds: 45,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            average_speed_kmh: 40.0,
            fallback_to_public: true,
            public_url: "http://router.project-osrm.org".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    pub base_url: String,
    /// Costing profile: "auto" or "truck".
    pub costing: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub batch_size: usize,
    /// Truck dimensions, used only when `costing == "truck"`.
    pub truck_height_m: f64,
    pub truck_width_m: f64,
    pub truck_weight_t: f64,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        ValhallaConfig {
            base_url: "http://localhost:8002".to_string(),
            costing: "auto".to_string(),
            timeout_seconds: 60,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            batch_size: 50,
            truck_height_m: 3.5,
            truck_width_m: 2.5,
            truck_weight_t: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub enabled: bool,
    /// Customers above this volume go straight to the warehouse channel.
    pub max_bus_customer_volume: f64,
    /// Fraction of the fleet capacity the splitter is allowed to commit.
    pub capacity_tolerance: f64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            enabled: true,
            max_bus_customer_volume: 120.0,
            capacity_tolerance: 0.90,
        }
    }
}

/// First-solution strategies available to the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSolutionStrategy {
    Automatic,
    PathCheapestArc,
    ParallelCheapestInsertion,
    Savings,
    Sweep,
    Christofides,
}

impl FirstSolutionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            FirstSolutionStrategy::Automatic => "AUTOMATIC",
            FirstSolutionStrategy::PathCheapestArc => "PATH_CHEAPEST_ARC",
            FirstSolutionStrategy::ParallelCheapestInsertion => "PARALLEL_CHEAPEST_INSERTION",
            FirstSolutionStrategy::Savings => "SAVINGS",
            FirstSolutionStrategy::Sweep => "SWEEP",
            FirstSolutionStrategy::Christofides => "CHRISTOFIDES",
        }
    }
}

/// Local-search metaheuristics refining the incumbent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metaheuristic {
    Automatic,
    GuidedLocalSearch,
    SimulatedAnnealing,
    TabuSearch,
}

impl Metaheuristic {
    pub fn label(&self) -> &'static str {
        match self {
            Metaheuristic::Automatic => "AUTOMATIC",
            Metaheuristic::GuidedLocalSearch => "GUIDED_LOCAL_SEARCH",
            Metaheuristic::SimulatedAnnealing => "SIMULATED_ANNEALING",
            Metaheuristic::TabuSearch => "TABU_SEARCH",
        }
    }
}

/// Solver knobs.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub time_limit_seconds: u64,
    /// When true, every customer node gets a disjunction with `skip_penalty`.
    /// When false, all customers are required.
    pub allow_customer_skipping: bool,
    /// Flat penalty (meters) for skipping one customer.
    pub skip_penalty: i64,
    pub first_solution_strategy: FirstSolutionStrategy,
    pub local_search_metaheuristic: Metaheuristic,
    pub lns_time_limit_seconds: f64,
    pub lns_num_nodes: usize,
    pub lns_num_arcs: usize,
    pub use_full_propagation: bool,
    pub log_search: bool,
    pub gls_lambda: f64,
    /// RNG seed shared by all race workers.
    pub seed: u64,
    /// `-1` means `cores - 1`.
    pub num_workers: i32,
    pub race_first_solution_strategies: Vec<FirstSolutionStrategy>,
    pub race_metaheuristics: Vec<Metaheuristic>,
    pub enable_final_depot_reconfiguration: bool,
    pub enable_start_time_tracking: bool,
    pub global_start_time_minutes: u32,
    /// Time budget for each per-route TSP in the reconfiguration step.
    pub tsp_time_limit_seconds: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            time_limit_seconds: 30,
            allow_customer_skipping: true,
            skip_penalty: 45_000,
            first_solution_strategy: FirstSolutionStrategy::Christofides,
            local_search_metaheuristic: Metaheuristic::GuidedLocalSearch,
            lns_time_limit_seconds: 15.0,
            lns_num_nodes: 120,
            lns_num_arcs: 110,
            use_full_propagation: true,
            log_search: false,
            gls_lambda: 0.8,
            seed: 64,
            num_workers: -1,
            race_first_solution_strategies: vec![
                FirstSolutionStrategy::ParallelCheapestInsertion,
                FirstSolutionStrategy::Savings,
                FirstSolutionStrategy::ParallelCheapestInsertion,
                FirstSolutionStrategy::PathCheapestArc,
                FirstSolutionStrategy::Savings,
                FirstSolutionStrategy::ParallelCheapestInsertion,
                FirstSolutionStrategy::ParallelCheapestInsertion,
            ],
            race_metaheuristics: vec![
                Metaheuristic::GuidedLocalSearch,
                Metaheuristic::GuidedLocalSearch,
                Metaheuristic::GuidedLocalSearch,
                Metaheuristic::GuidedLocalSearch,
                Metaheuristic::SimulatedAnnealing,
                Metaheuristic::GuidedLocalSearch,
                Metaheuristic::GuidedLocalSearch,
            ],
            enable_final_depot_reconfiguration: true,
            enable_start_time_tracking: true,
            global_start_time_minutes: 480,
            tsp_time_limit_seconds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub matrix_file: String,
    pub expiry_hours: i64,
}

impl CacheConfig {
    pub fn matrix_path(&self) -> PathBuf {
        self.dir.join(&self.matrix_file)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            dir: PathBuf::from("cache"),
            matrix_file: "matrix_cache.json".to_string(),
            expiry_hours: 24,
        }
    }
}

/// Aggregate configuration threaded through the orchestrator. All solve
/// paths receive read-only references; nothing mutates a config after
/// construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub location: LocationConfig,
    pub vehicles: Vec<VehicleConfig>,
    pub routing: RoutingConfig,
    pub osrm: OsrmConfig,
    pub valhalla: ValhallaConfig,
    pub warehouse: WarehouseConfig,
    pub solver: SolverConfig,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let location = LocationConfig::default();
        let vehicles = default_fleet(&location);
        AppConfig {
            location,
            vehicles,
            routing: RoutingConfig::default(),
            osrm: OsrmConfig::default(),
            valhalla: ValhallaConfig::default(),
            warehouse: WarehouseConfig::default(),
            solver: SolverConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn enabled_vehicles(&self) -> Vec<&VehicleConfig> {
        self.vehicles.iter().filter(|v| v.enabled).collect()
    }

    /// Total fleet capacity over enabled classes (capacity x count).
    pub fn total_vehicle_capacity(&self) -> f64 {
        self.vehicles
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.capacity * v.count as f64)
            .sum()
    }
}

/// The standard fleet used when the caller does not supply one.
pub fn default_fleet(location: &LocationConfig) -> Vec<VehicleConfig> {
    let depot_main = location.depot;
    let depot_center = location.center;
    let depot_regional = (43.221042895146915, 23.5344026186417);

    vec![
        VehicleConfig {
            kind: VehicleKind::Internal,
            capacity: 385.0,
            count: 7,
            max_distance_km: None,
            max_time_hours: 8.0,
            service_time_minutes: 7.0,
            max_customers_per_route: None,
            enabled: true,
            start_depot: depot_main,
            tsp_depot: Some(depot_main),
            start_time_minutes: 480,
        },
        VehicleConfig {
            kind: VehicleKind::Center,
            capacity: 320.0,
            count: 1,
            max_distance_km: None,
            max_time_hours: 8.0,
            service_time_minutes: 9.0,
            max_customers_per_route: None,
            enabled: true,
            start_depot: depot_main,
            tsp_depot: Some(depot_main),
            start_time_minutes: 510,
        },
        VehicleConfig {
            kind: VehicleKind::External,
            capacity: 385.0,
            count: 3,
            max_distance_km: None,
            max_time_hours: 20.0,
            service_time_minutes: 7.0,
            max_customers_per_route: None,
            enabled: false,
            start_depot: depot_center,
            tsp_depot: Some(depot_main),
            start_time_minutes: 450,
        },
        VehicleConfig {
            kind: VehicleKind::Special,
            capacity: 300.0,
            count: 2,
            max_distance_km: None,
            max_time_hours: 8.0,
            service_time_minutes: 6.0,
            max_customers_per_route: None,
            enabled: false,
            start_depot: depot_center,
            tsp_depot: Some(depot_main),
            start_time_minutes: 480,
        },
        VehicleConfig {
            kind: VehicleKind::Regional,
            capacity: 385.0,
            count: 3,
            max_distance_km: None,
            max_time_hours: 8.0,
            service_time_minutes: 7.0,
            max_customers_per_route: Some(40),
            enabled: false,
            start_depot: depot_regional,
            tsp_depot: Some(depot_regional),
            start_time_minutes: 480,
        },
    ]
}
