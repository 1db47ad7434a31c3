use std::time::Duration;

use chrono::Local;
use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::{LatLon, RoutingConfig, ValhallaConfig};
use crate::distance::matrix::{DistanceMatrix, ROAD_SHAPE_FACTOR};
use crate::error::ProviderError;
use crate::geo::haversine_m;

/// Speed used when a failed batch has to be synthesized.
const FALLBACK_SPEED_KMH: f64 = 40.0;

/// Probes `/status` before any matrix traffic.
pub async fn check_server_status(cfg: &ValhallaConfig) -> bool {
    let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    let url = format!("{}/status", cfg.base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            if let Ok(data) = response.json::<Value>().await {
                debug!(
                    "valhalla status ok, version {}",
                    data["version"].as_str().unwrap_or("unknown")
                );
            }
            true
        }
        Ok(response) => {
            warn!("valhalla status returned http {}", response.status());
            false
        }
        Err(e) => {
            warn!("valhalla status probe failed: {e}");
            false
        }
    }
}

/// Builds a full square matrix from `sources_to_targets`, tiled into
/// square batches above `batch_size`. Departure time and truck costing are
/// attached when configured.
pub async fn build_matrix(
    cfg: &ValhallaConfig,
    routing: &RoutingConfig,
    locations: &[LatLon],
) -> Result<DistanceMatrix, ProviderError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .user_agent("fleetroute/1.0")
        .build()?;

    let n = locations.len();
    if routing.enable_time_dependent {
        info!(
            "valhalla: time-dependent matrix for {n} locations, departing {}",
            routing.departure_time
        );
    } else {
        info!("valhalla: static matrix for {n} locations");
    }

    if n <= cfg.batch_size {
        let (distances, durations) =
            sources_to_targets(&client, cfg, routing, locations, locations).await?;
        return Ok(DistanceMatrix::new(distances, durations, locations.to_vec()));
    }

    build_tiled(client, cfg, routing, locations).await
}

async fn build_tiled(
    client: Client,
    cfg: &ValhallaConfig,
    routing: &RoutingConfig,
    locations: &[LatLon],
) -> Result<DistanceMatrix, ProviderError> {
    let n = locations.len();
    let step = cfg.batch_size;
    let blocks: Vec<(usize, usize)> = (0..n)
        .step_by(step)
        .map(|start| (start, (start + step).min(n)))
        .collect();

    let mut tasks = Vec::new();
    for &(si, ei) in &blocks {
        for &(sj, ej) in &blocks {
            let client = client.clone();
            let cfg = cfg.clone();
            let routing = routing.clone();
            let sources: Vec<LatLon> = locations[si..ei].to_vec();
            let targets: Vec<LatLon> = locations[sj..ej].to_vec();
            tasks.push(task::spawn(async move {
                let result = sources_to_targets(&client, &cfg, &routing, &sources, &targets).await;
                (si, sj, sources, targets, result)
            }));
        }
    }

    let mut distances = vec![vec![0.0; n]; n];
    let mut durations = vec![vec![0.0; n]; n];
    let mut failed = 0usize;

    for joined in join_all(tasks).await {
        let (si, sj, sources, targets, result) =
            joined.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        match result {
            Ok((bd, bt)) => {
                for (i, row) in bd.iter().enumerate() {
                    for (j, v) in row.iter().enumerate() {
                        distances[si + i][sj + j] = *v;
                    }
                }
                for (i, row) in bt.iter().enumerate() {
                    for (j, v) in row.iter().enumerate() {
                        durations[si + i][sj + j] = *v;
                    }
                }
            }
            Err(e) => {
                failed += 1;
                warn!("valhalla block ({si},{sj}) failed: {e}, synthesizing");
                for (i, src) in sources.iter().enumerate() {
                    for (j, tgt) in targets.iter().enumerate() {
                        if si + i == sj + j {
                            continue;
                        }
                        let d = haversine_m(*src, *tgt) * ROAD_SHAPE_FACTOR;
                        distances[si + i][sj + j] = d;
                        durations[si + i][sj + j] =
                            (d / 1000.0) / FALLBACK_SPEED_KMH * 3600.0;
                    }
                }
            }
        }
    }

    if failed > 0 {
        warn!("valhalla: {failed} blocks synthesized");
    }

    Ok(DistanceMatrix::new(distances, durations, locations.to_vec()))
}

async fn sources_to_targets(
    client: &Client,
    cfg: &ValhallaConfig,
    routing: &RoutingConfig,
    sources: &[LatLon],
    targets: &[LatLon],
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>), ProviderError> {
    let url = format!("{}/sources_to_targets", cfg.base_url.trim_end_matches('/'));
    let body = request_body(cfg, routing, sources, targets);

    let mut last_err = ProviderError::Unavailable("no attempts made".to_string());
    for attempt in 0..cfg.retry_attempts.max(1) {
        if attempt > 0 {
            let backoff = cfg.retry_delay_ms * (1 << (attempt - 1)) as u64;
            debug!("valhalla retry {attempt} after {backoff}ms");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        match client.post(&url).json(&body).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    last_err = ProviderError::Rejected(format!("http {status}"));
                    continue;
                }
                match response.json::<Value>().await {
                    Ok(data) => return parse_matrix(&data, sources, targets),
                    Err(e) => last_err = ProviderError::Http(e),
                }
            }
            Err(e) => last_err = ProviderError::Http(e),
        }
    }

    Err(last_err)
}

fn request_body(
    cfg: &ValhallaConfig,
    routing: &RoutingConfig,
    sources: &[LatLon],
    targets: &[LatLon],
) -> Value {
    let to_points = |points: &[LatLon]| -> Vec<Value> {
        points
            .iter()
            .map(|(lat, lon)| json!({ "lat": lat, "lon": lon }))
            .collect()
    };

    let mut body = Map::new();
    body.insert("sources".to_string(), Value::Array(to_points(sources)));
    body.insert("targets".to_string(), Value::Array(to_points(targets)));
    body.insert("costing".to_string(), Value::String(cfg.costing.clone()));

    if routing.enable_time_dependent {
        // type 1 is depart-at.
        let today = Local::now().format("%Y-%m-%d");
        body.insert(
            "date_time".to_string(),
            json!({ "type": 1, "value": format!("{today}T{}", routing.departure_time) }),
        );
    }

    if cfg.costing == "truck" {
        body.insert(
            "costing_options".to_string(),
            json!({
                "truck": {
                    "height": cfg.truck_height_m,
                    "width": cfg.truck_width_m,
                    "weight": cfg.truck_weight_t,
                }
            }),
        );
    }

    Value::Object(body)
}

/// Valhalla reports distance in kilometers and time in seconds; unroutable
/// cells come back null and are patched from haversine.
fn parse_matrix(
    data: &Value,
    sources: &[LatLon],
    targets: &[LatLon],
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>), ProviderError> {
    let rows = data["sources_to_targets"]
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("missing sources_to_targets".to_string()))?;

    let ns = sources.len();
    let nt = targets.len();
    let mut distances = vec![vec![0.0; nt]; ns];
    let mut durations = vec![vec![0.0; nt]; ns];

    for (i, row) in rows.iter().enumerate().take(ns) {
        let cells = row
            .as_array()
            .ok_or_else(|| ProviderError::Malformed(format!("row {i} is not an array")))?;
        for (j, cell) in cells.iter().enumerate().take(nt) {
            if sources[i] == targets[j] {
                continue;
            }
            let dist_km = cell["distance"].as_f64();
            let time_s = cell["time"].as_f64();
            match (dist_km, time_s) {
                (Some(d), Some(t)) => {
                    distances[i][j] = d * 1000.0;
                    durations[i][j] = t;
                }
                _ => {
                    let d = haversine_m(sources[i], targets[j]) * ROAD_SHAPE_FACTOR;
                    distances[i][j] = d;
                    durations[i][j] = (d / 1000.0) / FALLBACK_SPEED_KMH * 3600.0;
                }
            }
        }
    }

    Ok((distances, durations))
}
