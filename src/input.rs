use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::Customer;
use crate::error::SolverError;

#[derive(Debug, Deserialize)]
struct CustomerRow {
    id: String,
    name: String,
    lat: String,
    lon: String,
    volume: String,
}

/// Loads customer records from a CSV file with an
/// `id,name,lat,lon,volume` header. Rows with unparseable coordinates or
/// volume are logged and skipped; duplicate ids keep the first
/// occurrence.
pub fn load_customers_csv(path: &Path) -> Result<Vec<Customer>, SolverError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SolverError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;

    let mut customers: Vec<Customer> = Vec::new();
    let mut skipped = 0usize;

    for (line, record) in reader.deserialize::<CustomerRow>().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                warn!("row {}: unreadable record ({e}), skipped", line + 2);
                skipped += 1;
                continue;
            }
        };

        let volume = match row.volume.trim().parse::<f64>() {
            Ok(v) if v >= 0.0 => v,
            _ => {
                warn!(
                    "row {}: customer '{}' has invalid volume '{}', skipped",
                    line + 2,
                    row.id,
                    row.volume
                );
                skipped += 1;
                continue;
            }
        };

        let coords = match (row.lat.trim().parse::<f64>(), row.lon.trim().parse::<f64>()) {
            (Ok(lat), Ok(lon)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) => {
                Some((lat, lon))
            }
            _ => {
                warn!(
                    "row {}: customer '{}' has unparseable coordinates '{} / {}', skipped",
                    line + 2,
                    row.id,
                    row.lat,
                    row.lon
                );
                skipped += 1;
                continue;
            }
        };

        if customers.iter().any(|c| c.id == row.id) {
            warn!("row {}: duplicate customer id '{}', skipped", line + 2, row.id);
            skipped += 1;
            continue;
        }

        customers.push(Customer {
            id: row.id,
            name: row.name,
            coords,
            volume,
        });
    }

    if customers.is_empty() {
        return Err(SolverError::InvalidInput(format!(
            "{} contains no usable customer rows",
            path.display()
        )));
    }

    info!(
        "loaded {} customers from {} ({skipped} rows skipped)",
        customers.len(),
        path.display()
    );
    Ok(customers)
}
