use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{CacheConfig, LatLon, OsrmConfig, RoutingConfig, RoutingEngine, ValhallaConfig};
use crate::distance::cache::MatrixCache;
use crate::distance::providers::{osrm, valhalla};
use crate::error::SolverError;
use crate::geo::haversine_m;

/// Factor applied to straight-line distances when synthesizing road
/// distances without an engine.
pub const ROAD_SHAPE_FACTOR: f64 = 1.3;

/// Square distance/duration matrix over an ordered location list
/// (`depots ++ eligible customers`). Distances are meters, durations
/// seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceMatrix {
    pub distances: Vec<Vec<f64>>,
    pub durations: Vec<Vec<f64>>,
    pub locations: Vec<LatLon>,
    pub sources: Vec<usize>,
    pub destinations: Vec<usize>,
}

impl DistanceMatrix {
    pub fn new(
        distances: Vec<Vec<f64>>,
        durations: Vec<Vec<f64>>,
        locations: Vec<LatLon>,
    ) -> Self {
        let n = locations.len();
        DistanceMatrix {
            distances,
            durations,
            locations,
            sources: (0..n).collect(),
            destinations: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.distances[from][to]
    }

    pub fn duration(&self, from: usize, to: usize) -> f64 {
        self.durations[from][to]
    }

    /// Straight-line synthesis: haversine x 1.3 for distance, distance at
    /// `average_speed_kmh` for duration. Last resort when every engine
    /// failed, and the deterministic backbone for tests.
    pub fn synthetic(locations: &[LatLon], average_speed_kmh: f64) -> Self {
        let n = locations.len();
        let mut distances = vec![vec![0.0; n]; n];
        let mut durations = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let d = haversine_m(locations[i], locations[j]) * ROAD_SHAPE_FACTOR;
                distances[i][j] = d;
                durations[i][j] = (d / 1000.0) / average_speed_kmh * 3600.0;
            }
        }

        DistanceMatrix::new(distances, durations, locations.to_vec())
    }

    /// Structural invariants: square shape, zero diagonal, no negative
    /// values.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.locations.len();
        if self.distances.len() != n || self.durations.len() != n {
            return Err(format!(
                "matrix rows ({}/{}) do not match locations ({})",
                self.distances.len(),
                self.durations.len(),
                n
            ));
        }
        for (i, (drow, trow)) in self.distances.iter().zip(&self.durations).enumerate() {
            if drow.len() != n || trow.len() != n {
                return Err(format!("row {i} is not of width {n}"));
            }
            if drow[i] != 0.0 || trow[i] != 0.0 {
                return Err(format!("diagonal not zero at {i}"));
            }
            if drow.iter().chain(trow.iter()).any(|v| *v < 0.0 || !v.is_finite()) {
                return Err(format!("negative or non-finite value in row {i}"));
            }
        }
        Ok(())
    }
}

/// Produces the matrix for an ordered location list, computed once per
/// solve: cache lookup (exact entry, then central-matrix submatrix), then
/// the configured engine with failover, then haversine synthesis. Never
/// fails once at least two locations are known.
pub async fn obtain_matrix(
    locations: &[LatLon],
    routing: &RoutingConfig,
    osrm_cfg: &OsrmConfig,
    valhalla_cfg: &ValhallaConfig,
    cache_cfg: &CacheConfig,
) -> Result<DistanceMatrix, SolverError> {
    if locations.len() < 2 {
        return Err(SolverError::MatrixUnavailable(format!(
            "need at least 2 locations, got {}",
            locations.len()
        )));
    }

    let mut cache = if cache_cfg.enabled {
        Some(MatrixCache::open(cache_cfg.matrix_path(), cache_cfg.expiry_hours))
    } else {
        None
    };

    if let Some(cache) = cache.as_ref() {
        if let Some(matrix) = cache.lookup(locations) {
            info!(locations = locations.len(), "matrix served from cache");
            return Ok(matrix);
        }
    }

    let matrix = fetch_from_engines(locations, routing, osrm_cfg, valhalla_cfg).await;

    match matrix {
        Some(matrix) => {
            if let Err(reason) = matrix.validate() {
                warn!("engine matrix failed validation ({reason}), synthesizing instead");
                return Ok(DistanceMatrix::synthetic(locations, osrm_cfg.average_speed_kmh));
            }
            if let Some(cache) = cache.as_mut() {
                cache.insert(&matrix);
            }
            Ok(matrix)
        }
        None => {
            warn!(
                locations = locations.len(),
                "all routing engines failed, synthesizing matrix from haversine"
            );
            Ok(DistanceMatrix::synthetic(locations, osrm_cfg.average_speed_kmh))
        }
    }
}

async fn fetch_from_engines(
    locations: &[LatLon],
    routing: &RoutingConfig,
    osrm_cfg: &OsrmConfig,
    valhalla_cfg: &ValhallaConfig,
) -> Option<DistanceMatrix> {
    if routing.engine == RoutingEngine::Valhalla {
        if valhalla::check_server_status(valhalla_cfg).await {
            match valhalla::build_matrix(valhalla_cfg, routing, locations).await {
                Ok(matrix) => {
                    info!(locations = locations.len(), "matrix retrieved from valhalla");
                    return Some(matrix);
                }
                Err(e) => {
                    error!("valhalla matrix request failed: {e}");
                    info!("falling back to osrm");
                }
            }
        } else {
            warn!("valhalla server unreachable, falling back to osrm");
        }
    }

    match osrm::build_matrix(osrm_cfg, locations).await {
        Ok(matrix) => {
            info!(locations = locations.len(), "matrix retrieved from osrm");
            Some(matrix)
        }
        Err(e) => {
            error!("osrm matrix request failed: {e}");
            None
        }
    }
}
