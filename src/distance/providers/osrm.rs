use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::{LatLon, OsrmConfig};
use crate::distance::matrix::{DistanceMatrix, ROAD_SHAPE_FACTOR};
use crate::error::ProviderError;
use crate::geo::haversine_m;

/// GET URLs longer than this switch to POST.
const MAX_GET_URL_LEN: usize = 4000;
/// Above this many cells a failed block is synthesized instead of walked
/// pair-by-pair through the route service.
const MAX_ROUTE_FALLBACK_CELLS: usize = 400;
/// Road distances derived from durations get this shape correction.
const DURATION_DERIVED_CORRECTION: f64 = 1.1;

/// Builds a full square matrix from the OSRM `table` service. Small inputs
/// go out as one request; larger ones tile into square batches issued
/// concurrently.
pub async fn build_matrix(
    cfg: &OsrmConfig,
    locations: &[LatLon],
) -> Result<DistanceMatrix, ProviderError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .user_agent("fleetroute/1.0")
        .build()?;

    let n = locations.len();
    if n <= cfg.batch_size {
        info!("osrm: single table request for {n} locations");
        let (distances, durations) = fetch_block(&client, cfg, locations, locations, true).await?;
        return Ok(DistanceMatrix::new(distances, durations, locations.to_vec()));
    }

    info!(
        "osrm: tiling {n} locations into {} x {} blocks of {}",
        n.div_ceil(cfg.batch_size),
        n.div_ceil(cfg.batch_size),
        cfg.batch_size
    );
    build_tiled(client, cfg, locations).await
}

async fn build_tiled(
    client: Client,
    cfg: &OsrmConfig,
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
            let sources: Vec<LatLon> = locations[si..ei].to_vec();
            let targets: Vec<LatLon> = locations[sj..ej].to_vec();
            tasks.push(task::spawn(async move {
                let same = si == sj;
                let result = fetch_block(&client, &cfg, &sources, &targets, same).await;
                (si, sj, sources, targets, result)
            }));
        }
    }

    let mut distances = vec![vec![0.0; n]; n];
    let mut durations = vec![vec![0.0; n]; n];
    let mut failed_blocks = 0usize;

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
                failed_blocks += 1;
                warn!("osrm block ({si},{sj}) failed: {e}, filling via route service");
                fill_block_fallback(
                    &client,
                    cfg,
                    si,
                    sj,
                    &sources,
                    &targets,
                    &mut distances,
                    &mut durations,
                )
                .await;
            }
        }
    }

    if failed_blocks > 0 {
        warn!("osrm: {failed_blocks} blocks needed fallback values");
    }

    Ok(DistanceMatrix::new(distances, durations, locations.to_vec()))
}

/// One rectangular table request: `sources` x `targets`. When `same` both
/// slices refer to the same block and the coordinate list is not doubled.
async fn fetch_block(
    client: &Client,
    cfg: &OsrmConfig,
    sources: &[LatLon],
    targets: &[LatLon],
    same: bool,
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>), ProviderError> {
    let mut coords: Vec<LatLon> = sources.to_vec();
    let (source_idx, target_idx): (Vec<usize>, Vec<usize>) = if same {
        ((0..sources.len()).collect(), (0..sources.len()).collect())
    } else {
        coords.extend_from_slice(targets);
        (
            (0..sources.len()).collect(),
            (sources.len()..coords.len()).collect(),
        )
    };

    let data = table_request_with_failover(client, cfg, &coords, &source_idx, &target_idx).await?;
    parse_table(&data, sources, targets, cfg.average_speed_kmh)
}

/// Tries the configured server with retries, then the public one.
async fn table_request_with_failover(
    client: &Client,
    cfg: &OsrmConfig,
    coords: &[LatLon],
    sources: &[usize],
    targets: &[usize],
) -> Result<Value, ProviderError> {
    match table_request(client, cfg, &cfg.base_url, coords, sources, targets).await {
        Ok(data) => Ok(data),
        Err(e) => {
            if cfg.fallback_to_public && cfg.base_url != cfg.public_url {
                warn!("osrm at {} failed ({e}), trying public server", cfg.base_url);
                table_request(client, cfg, &cfg.public_url, coords, sources, targets).await
            } else {
                Err(e)
            }
        }
    }
}

async fn table_request(
    client: &Client,
    cfg: &OsrmConfig,
    base_url: &str,
    coords: &[LatLon],
    sources: &[usize],
    targets: &[usize],
) -> Result<Value, ProviderError> {
    let base = base_url.trim_end_matches('/');
    let coord_str = coords
        .iter()
        .map(|(lat, lon)| format!("{lon:.6},{lat:.6}"))
        .collect::<Vec<_>>()
        .join(";");
    let idx_str = |idx: &[usize]| {
        idx.iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";")
    };
    let url = format!(
        "{base}/table/v1/{}/{coord_str}?annotations=distance,duration&sources={}&destinations={}",
        cfg.profile,
        idx_str(sources),
        idx_str(targets),
    );

    let mut last_err = ProviderError::Unavailable("no attempts made".to_string());
    for attempt in 0..cfg.retry_attempts.max(1) {
        if attempt > 0 {
            let backoff = cfg.retry_delay_ms * (1 << (attempt - 1)) as u64;
            debug!("osrm retry {attempt} after {backoff}ms");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        let outcome = if url.len() <= MAX_GET_URL_LEN {
            client.get(&url).send().await
        } else {
            let body = json!({
                "coordinates": coords.iter().map(|(lat, lon)| vec![*lon, *lat]).collect::<Vec<_>>(),
                "annotations": ["distance", "duration"],
                "sources": sources,
                "destinations": targets,
            });
            client
                .post(format!("{base}/table/v1/{}", cfg.profile))
                .json(&body)
                .send()
                .await
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    last_err = ProviderError::Rejected(format!("http {status}"));
                    continue;
                }
                match response.json::<Value>().await {
                    Ok(data) => {
                        if data["code"].as_str() == Some("Ok") {
                            return Ok(data);
                        }
                        last_err = ProviderError::Rejected(format!(
                            "engine code {:?}: {:?}",
                            data["code"].as_str().unwrap_or("unknown"),
                            data["message"].as_str().unwrap_or("")
                        ));
                    }
                    Err(e) => last_err = ProviderError::Http(e),
                }
            }
            Err(e) => last_err = ProviderError::Http(e),
        }
    }

    Err(last_err)
}

/// Turns a table response into dense rows, deriving the missing annotation
/// when the engine returned only one of distances/durations and patching
/// unroutable cells from haversine.
fn parse_table(
    data: &Value,
    sources: &[LatLon],
    targets: &[LatLon],
    average_speed_kmh: f64,
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>), ProviderError> {
    let dist_rows = data["distances"].as_array();
    let dur_rows = data["durations"].as_array();
    if dist_rows.is_none() && dur_rows.is_none() {
        return Err(ProviderError::Malformed(
            "response has neither distances nor durations".to_string(),
        ));
    }

    let speed_mps = average_speed_kmh * 1000.0 / 3600.0;
    let ns = sources.len();
    let nt = targets.len();
    let mut distances = vec![vec![0.0; nt]; ns];
    let mut durations = vec![vec![0.0; nt]; ns];

    let cell = |rows: Option<&Vec<Value>>, i: usize, j: usize| -> Option<f64> {
        rows?.get(i)?.as_array()?.get(j)?.as_f64()
    };

    for i in 0..ns {
        for j in 0..nt {
            let dist = cell(dist_rows, i, j);
            let dur = cell(dur_rows, i, j);
            let (d, t) = match (dist, dur) {
                (Some(d), Some(t)) => (d, t),
                (Some(d), None) => (d, (d / 1000.0) / average_speed_kmh * 3600.0),
                (None, Some(t)) => (t * speed_mps * DURATION_DERIVED_CORRECTION, t),
                (None, None) => {
                    let d = haversine_m(sources[i], targets[j]) * ROAD_SHAPE_FACTOR;
                    (d, (d / 1000.0) / average_speed_kmh * 3600.0)
                }
            };
            if sources[i] == targets[j] {
                continue;
            }
            distances[i][j] = d;
            durations[i][j] = t;
        }
    }

    Ok((distances, durations))
}

/// One `route` request, the per-pair fallback for cells a table batch could
/// not fill.
pub async fn route_pair(
    client: &Client,
    cfg: &OsrmConfig,
    from: LatLon,
    to: LatLon,
) -> Result<(f64, f64), ProviderError> {
    let base = cfg.base_url.trim_end_matches('/');
    let url = format!(
        "{base}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=false&steps=false",
        cfg.profile, from.1, from.0, to.1, to.0
    );

    let response = client.get(&url).send().await?;
    let data: Value = response.json().await?;
    if data["code"].as_str() != Some("Ok") {
        return Err(ProviderError::Rejected(format!(
            "route code {:?}",
            data["code"].as_str().unwrap_or("unknown")
        )));
    }
    let route = data["routes"]
        .as_array()
        .and_then(|r| r.first())
        .ok_or_else(|| ProviderError::Malformed("route response has no routes".to_string()))?;
    let distance = route["distance"]
        .as_f64()
        .ok_or_else(|| ProviderError::Malformed("route has no distance".to_string()))?;
    let duration = route["duration"]
        .as_f64()
        .ok_or_else(|| ProviderError::Malformed("route has no duration".to_string()))?;
    Ok((distance, duration))
}

#[allow(clippy::too_many_arguments)]
async fn fill_block_fallback(
    client: &Client,
    cfg: &OsrmConfig,
    si: usize,
    sj: usize,
    sources: &[LatLon],
    targets: &[LatLon],
    distances: &mut [Vec<f64>],
    durations: &mut [Vec<f64>],
) {
    let use_route_service = sources.len() * targets.len() <= MAX_ROUTE_FALLBACK_CELLS;

    for (i, src) in sources.iter().enumerate() {
        for (j, tgt) in targets.iter().enumerate() {
            if si + i == sj + j {
                continue;
            }
            let pair = if use_route_service {
                route_pair(client, cfg, *src, *tgt).await.ok()
            } else {
                None
            };
            let (d, t) = pair.unwrap_or_else(|| {
                let d = haversine_m(*src, *tgt) * ROAD_SHAPE_FACTOR;
                (d, (d / 1000.0) / cfg.average_speed_kmh * 3600.0)
            });
            distances[si + i][sj + j] = d;
            durations[si + i][sj + j] = t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const A: LatLon = (42.6958, 23.2317);
    const B: LatLon = (42.6974, 23.3238);

    #[test]
    fn parse_table_reads_both_annotations() {
        let data = json!({
            "code": "Ok",
            "distances": [[0.0, 1200.0], [1210.0, 0.0]],
            "durations": [[0.0, 180.0], [182.0, 0.0]],
        });
        let (d, t) = parse_table(&data, &[A, B], &[A, B], 40.0).unwrap();
        assert_eq!(d[0][1], 1200.0);
        assert_eq!(t[1][0], 182.0);
        assert_eq!(d[0][0], 0.0);
    }

    #[test]
    fn parse_table_derives_distances_from_durations() {
        let data = json!({
            "code": "Ok",
            "durations": [[0.0, 360.0], [360.0, 0.0]],
        });
        let (d, _) = parse_table(&data, &[A, B], &[A, B], 40.0).unwrap();
        // 360 s at 40 km/h is 4 km, times the 1.1 shape correction.
        assert!((d[0][1] - 4_400.0).abs() < 1.0, "got {}", d[0][1]);
    }

    #[test]
    fn parse_table_patches_null_cells_from_haversine() {
        let data = json!({
            "code": "Ok",
            "distances": [[0.0, null], [1210.0, 0.0]],
            "durations": [[0.0, null], [182.0, 0.0]],
        });
        let (d, t) = parse_table(&data, &[A, B], &[A, B], 40.0).unwrap();
        let expected = haversine_m(A, B) * ROAD_SHAPE_FACTOR;
        assert!((d[0][1] - expected).abs() < 1.0);
        assert!(t[0][1] > 0.0);
    }

    #[test]
    fn parse_table_rejects_empty_payload() {
        let data = json!({ "code": "Ok" });
        assert!(parse_table(&data, &[A], &[A], 40.0).is_err());
    }
}
