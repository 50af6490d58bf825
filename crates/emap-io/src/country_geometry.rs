//! Reads country/EEZ boundary polygons for the coverage builder. Each
//! row is one country's exterior ring, encoded as a semicolon-
//! separated list of `x,y` vertex pairs in the run's projected CRS —
//! avoids pulling in a full vector-format stack for a single ring per
//! country.

use std::path::Path;

use csv::ReaderBuilder;
use geo_types::{Coord, LineString, Polygon};
use serde::Deserialize;

use emap_core::country::CountryRegistry;
use emap_core::coverage::CountryGeometry;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct GeometryRow {
    iso_code: String,
    ring: String,
}

fn parse_ring(text: &str) -> Option<LineString<f64>> {
    let mut coords = Vec::new();
    for pair in text.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (x, y) = pair.split_once(',')?;
        coords.push(Coord {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        });
    }

    if coords.len() < 3 {
        return None;
    }
    if coords.first() != coords.last() {
        coords.push(coords[0]);
    }
    Some(LineString::from(coords))
}

pub fn read_country_geometries(path: &Path, countries: &CountryRegistry) -> Result<Vec<CountryGeometry>> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').has_headers(true).from_path(path)?;
    let mut result = Vec::new();

    for row in reader.deserialize::<GeometryRow>() {
        let row = row?;
        let Some(country) = countries.id_for_code(&row.iso_code) else {
            log::warn!("unknown country code {} in {}", row.iso_code, path.display());
            continue;
        };

        let Some(ring) = parse_ring(&row.ring) else {
            return Err(Error::MalformedRow {
                file: path.display().to_string(),
                reason: format!("invalid ring for country {}", row.iso_code),
            });
        };

        result.push(CountryGeometry {
            country,
            polygon: Polygon::new(ring, Vec::new()),
        });
    }

    Ok(result)
}
