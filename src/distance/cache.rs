use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::LatLon;
use crate::distance::matrix::DistanceMatrix;

/// Coordinate-equality tolerance when locating points in the central
/// matrix.
const COORD_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    locations: Vec<LatLon>,
    sources: Vec<usize>,
    destinations: Vec<usize>,
    distances: Vec<Vec<f64>>,
    durations: Vec<Vec<f64>>,
    timestamp: String,
}

#[derive(Serialize)]
struct KeyPayload<'a> {
    locations: &'a [LatLon],
    sources: &'a [usize],
    destinations: &'a [usize],
}

/// Summary of cache state, for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheInfo {
    pub entries: usize,
    pub central_locations: usize,
}

/// Persistent JSON matrix cache. Entries are content-addressed by a SHA-256
/// of `(locations, sources, destinations)`; the largest entry doubles as
/// the "central matrix" smaller requests extract submatrices from. Writes
/// are atomic (temp file + rename), and concurrent last-writer-wins races
/// are tolerated because conflicting writers agree on entry content.
pub struct MatrixCache {
    path: PathBuf,
    expiry_hours: i64,
    entries: BTreeMap<String, CacheEntry>,
}

impl MatrixCache {
    /// Loads the cache, dropping expired and malformed entries.
    pub fn open(path: PathBuf, expiry_hours: i64) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&raw) {
                Ok(all) => {
                    let now = Utc::now();
                    let total = all.len();
                    let fresh: BTreeMap<_, _> = all
                        .into_iter()
                        .filter(|(key, entry)| match entry_age(entry, now) {
                            Some(age) => {
                                let keep = age < Duration::hours(expiry_hours);
                                if !keep {
                                    debug!("dropping expired cache entry {key}");
                                }
                                keep
                            }
                            None => {
                                warn!("dropping cache entry {key} with unreadable timestamp");
                                false
                            }
                        })
                        .collect();
                    info!(
                        "matrix cache loaded: {} entries ({} expired/dropped)",
                        fresh.len(),
                        total - fresh.len()
                    );
                    fresh
                }
                Err(e) => {
                    warn!("matrix cache file unreadable ({e}), starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        MatrixCache {
            path,
            expiry_hours,
            entries,
        }
    }

    fn key(locations: &[LatLon], sources: &[usize], destinations: &[usize]) -> String {
        let payload = KeyPayload {
            locations,
            sources,
            destinations,
        };
        let encoded = serde_json::to_string(&payload).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Exact lookup for a full square matrix over `locations`.
    pub fn get(&self, locations: &[LatLon]) -> Option<DistanceMatrix> {
        let identity: Vec<usize> = (0..locations.len()).collect();
        let key = Self::key(locations, &identity, &identity);
        self.entries.get(&key).map(|entry| DistanceMatrix {
            distances: entry.distances.clone(),
            durations: entry.durations.clone(),
            locations: entry.locations.clone(),
            sources: entry.sources.clone(),
            destinations: entry.destinations.clone(),
        })
    }

    /// Exact lookup first, then submatrix extraction from the central
    /// matrix.
    pub fn lookup(&self, locations: &[LatLon]) -> Option<DistanceMatrix> {
        if let Some(matrix) = self.get(locations) {
            debug!("exact cache hit for {} locations", locations.len());
            return Some(matrix);
        }
        let central = self.central_matrix()?;
        let sub = extract_submatrix(&central, locations);
        if sub.is_some() {
            info!(
                "extracted {}x{} submatrix from central matrix of {} locations",
                locations.len(),
                locations.len(),
                central.len()
            );
        }
        sub
    }

    /// Stores a matrix and persists the file.
    pub fn insert(&mut self, matrix: &DistanceMatrix) {
        let key = Self::key(&matrix.locations, &matrix.sources, &matrix.destinations);
        self.entries.insert(
            key,
            CacheEntry {
                locations: matrix.locations.clone(),
                sources: matrix.sources.clone(),
                destinations: matrix.destinations.clone(),
                distances: matrix.distances.clone(),
                durations: matrix.durations.clone(),
                timestamp: Utc::now().to_rfc3339(),
            },
        );
        if let Err(e) = self.save() {
            warn!("matrix cache write failed: {e}");
        }
    }

    /// The largest matrix ever cached.
    pub fn central_matrix(&self) -> Option<DistanceMatrix> {
        self.entries
            .values()
            .max_by_key(|entry| entry.locations.len())
            .map(|entry| DistanceMatrix {
                distances: entry.distances.clone(),
                durations: entry.durations.clone(),
                locations: entry.locations.clone(),
                sources: entry.sources.clone(),
                destinations: entry.destinations.clone(),
            })
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            entries: self.entries.len(),
            central_locations: self
                .entries
                .values()
                .map(|e| e.locations.len())
                .max()
                .unwrap_or(0),
        }
    }

    pub fn expiry_hours(&self) -> i64 {
        self.expiry_hours
    }

    fn save(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)
    }
}

fn entry_age(entry: &CacheEntry, now: DateTime<Utc>) -> Option<Duration> {
    let stamp = DateTime::parse_from_rfc3339(&entry.timestamp).ok()?;
    Some(now.signed_duration_since(stamp.with_timezone(&Utc)))
}

/// Extracts the submatrix of `central` covering exactly `required`
/// locations, matching coordinates within 1e-5. Returns `None` when any
/// required location is missing.
pub fn extract_submatrix(
    central: &DistanceMatrix,
    required: &[LatLon],
) -> Option<DistanceMatrix> {
    if central.is_empty() || required.is_empty() {
        return None;
    }

    let mut indices = Vec::with_capacity(required.len());
    for req in required {
        let found = central.locations.iter().position(|loc| {
            (loc.0 - req.0).abs() < COORD_TOLERANCE && (loc.1 - req.1).abs() < COORD_TOLERANCE
        });
        match found {
            Some(i) => indices.push(i),
            None => {
                debug!("coordinate {req:?} not present in central matrix");
                return None;
            }
        }
    }

    let n = indices.len();
    let mut distances = vec![vec![0.0; n]; n];
    let mut durations = vec![vec![0.0; n]; n];
    for (i, &ci) in indices.iter().enumerate() {
        for (j, &cj) in indices.iter().enumerate() {
            distances[i][j] = central.distances[ci][cj];
            durations[i][j] = central.durations[ci][cj];
        }
    }

    Some(DistanceMatrix::new(distances, durations, required.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central() -> DistanceMatrix {
        let locations = vec![
            (42.6958, 23.2317),
            (42.6974, 23.3238),
            (42.70, 23.33),
            (42.80, 23.50),
            (42.75, 23.40),
        ];
        DistanceMatrix::synthetic(&locations, 40.0)
    }

    fn temp_cache_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fleetroute-cache-test-{}-{tag}.json",
            std::process::id()
        ))
    }

    #[test]
    fn submatrix_matches_direct_values() {
        let central = central();
        let required = vec![central.locations[1], central.locations[3]];
        let sub = extract_submatrix(&central, &required).expect("all coords present");

        assert_eq!(sub.len(), 2);
        assert_eq!(sub.distance(0, 1), central.distance(1, 3));
        assert_eq!(sub.duration(1, 0), central.duration(3, 1));
        assert_eq!(sub.distance(0, 0), 0.0);
    }

    #[test]
    fn submatrix_tolerates_small_coordinate_jitter() {
        let central = central();
        let jittered = (central.locations[2].0 + 4e-6, central.locations[2].1 - 4e-6);
        let required = vec![central.locations[0], jittered];
        assert!(extract_submatrix(&central, &required).is_some());
    }

    #[test]
    fn submatrix_fails_on_unknown_coordinate() {
        let central = central();
        let required = vec![central.locations[0], (41.0, 22.0)];
        assert!(extract_submatrix(&central, &required).is_none());
    }

    #[test]
    fn cache_round_trip_and_central_lookup() {
        let path = temp_cache_path("roundtrip");
        let _ = fs::remove_file(&path);

        let central_matrix = central();
        {
            let mut cache = MatrixCache::open(path.clone(), 24);
            cache.insert(&central_matrix);
        }

        let cache = MatrixCache::open(path.clone(), 24);
        let exact = cache.get(&central_matrix.locations).expect("exact hit");
        assert_eq!(exact.distances, central_matrix.distances);

        // A strict subset should come back via central-matrix extraction.
        let subset = vec![central_matrix.locations[0], central_matrix.locations[4]];
        let sub = cache.lookup(&subset).expect("submatrix hit");
        assert_eq!(sub.distance(0, 1), central_matrix.distance(0, 4));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn expired_entries_are_dropped_on_load() {
        let path = temp_cache_path("expiry");
        let _ = fs::remove_file(&path);

        let matrix = central();
        {
            let mut cache = MatrixCache::open(path.clone(), 24);
            cache.insert(&matrix);
        }

        // Rewrite the stored timestamp two days into the past.
        let raw = fs::read_to_string(&path).unwrap();
        let mut entries: BTreeMap<String, CacheEntry> = serde_json::from_str(&raw).unwrap();
        for entry in entries.values_mut() {
            entry.timestamp = (Utc::now() - Duration::hours(48)).to_rfc3339();
        }
        fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let cache = MatrixCache::open(path.clone(), 24);
        assert_eq!(cache.info().entries, 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let m = central();
        let a = MatrixCache::key(&m.locations, &m.sources, &m.destinations);
        let b = MatrixCache::key(&m.locations, &m.sources, &m.destinations);
        assert_eq!(a, b);

        let shifted: Vec<LatLon> = m.locations.iter().map(|l| (l.0 + 0.1, l.1)).collect();
        let c = MatrixCache::key(&shifted, &m.sources, &m.destinations);
        assert_ne!(a, c);
    }
}
