//! Tabular input readers: the `05_model_parameters` reference tables
//! plus NFR/GNFR totals, point sources, scalings, and spatial-pattern
//! exceptions. All formats are tab-separated per the directory layout
//! convention; malformed rows are logged and skipped, a fully
//! unreadable file is fatal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde::Deserialize;

use emap_core::country::{CountryId, CountryRegistry, LandOrSea};
use emap_core::emissions::{Coordinate, EmissionEntry, StackParameters};
use emap_core::ids::EmissionKey;
use emap_core::inventory::{ScalingFactors, SingleEmissions};
use emap_core::pattern::{PatternIndex, PatternSourceId, PatternSourceKind};
use emap_core::pollutant::PollutantRegistry;
use emap_core::sector::{Destination, SectorId, SectorRegistry};

use crate::error::{Error, Result};
use crate::raster::{PatternFile, PatternFileExtractor};

fn tab_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(ReaderBuilder::new().delimiter(b'\t').has_headers(true).from_path(path)?)
}

fn parse_land_or_sea(value: &str) -> LandOrSea {
    if value.eq_ignore_ascii_case("sea") {
        LandOrSea::Sea
    } else {
        LandOrSea::Land
    }
}

fn parse_destination(value: &str) -> Destination {
    match value.to_ascii_lowercase().as_str() {
        "sea" => Destination::Sea,
        "eez" => Destination::Eez,
        _ => Destination::Land,
    }
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    iso_code: String,
    name: String,
    land_or_sea: String,
}

pub fn read_country_table(path: &Path) -> Result<CountryRegistry> {
    let mut registry = CountryRegistry::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<CountryRow>() {
        match row {
            Ok(row) => {
                registry.register(&row.iso_code, &row.name, parse_land_or_sea(&row.land_or_sea));
            }
            Err(e) => log::warn!("skipping malformed country row in {}: {e}", path.display()),
        }
    }

    Ok(registry)
}

#[derive(Debug, Deserialize)]
struct SectorRow {
    nfr_code: String,
    nfr_name: String,
    gnfr_code: String,
    gnfr_name: String,
    destination: String,
}

pub fn read_sector_table(path: &Path) -> Result<SectorRegistry> {
    let mut registry = SectorRegistry::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<SectorRow>() {
        match row {
            Ok(row) => {
                let destination = parse_destination(&row.destination);
                let gnfr = registry.register_gnfr(&row.gnfr_code, &row.gnfr_name, destination);
                registry.register_nfr(&row.nfr_code, &row.nfr_name, gnfr, destination);
            }
            Err(e) => log::warn!("skipping malformed sector row in {}: {e}", path.display()),
        }
    }

    Ok(registry)
}

#[derive(Debug, Deserialize)]
struct PollutantRow {
    code: String,
    #[serde(default)]
    fallback_code: Option<String>,
}

pub fn read_pollutant_table(path: &Path) -> Result<PollutantRegistry> {
    let mut registry = PollutantRegistry::new();
    let mut reader = tab_reader(path)?;
    let mut pending_fallbacks = Vec::new();

    for row in reader.deserialize::<PollutantRow>() {
        match row {
            Ok(row) => {
                let id = registry.register(&row.code);
                if let Some(fallback_code) = row.fallback_code {
                    pending_fallbacks.push((id, fallback_code));
                }
            }
            Err(e) => log::warn!("skipping malformed pollutant row in {}: {e}", path.display()),
        }
    }

    for (id, fallback_code) in pending_fallbacks {
        let fallback = registry.register(&fallback_code);
        registry.set_fallback(id, fallback);
    }

    Ok(registry)
}

fn resolve_sector(sectors: &SectorRegistry, code: &str, gnfr_level: bool) -> Result<SectorId> {
    if gnfr_level {
        sectors
            .gnfr_id_for_code(code)
            .map(SectorId::Gnfr)
            .ok_or_else(|| Error::UnknownCode { kind: "GNFR sector", code: code.to_string() })
    } else {
        sectors
            .nfr_id_for_code(code)
            .map(SectorId::Nfr)
            .ok_or_else(|| Error::UnknownCode { kind: "NFR sector", code: code.to_string() })
    }
}

#[derive(Debug, Deserialize)]
struct TotalsRow {
    country: String,
    sector: String,
    pollutant: String,
    #[allow(dead_code)]
    year: i32,
    value: f64,
    #[allow(dead_code)]
    unit: String,
}

/// Reads an NFR or GNFR totals table, registering emissions against
/// already-populated country/sector/pollutant registries.
pub fn read_totals(
    path: &Path,
    gnfr_level: bool,
    countries: &CountryRegistry,
    sectors: &SectorRegistry,
    pollutants: &mut PollutantRegistry,
) -> Result<SingleEmissions> {
    let mut entries = Vec::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<TotalsRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping malformed totals row in {}: {e}", path.display());
                continue;
            }
        };

        let Some(country) = countries.id_for_code(&row.country) else {
            log::warn!("unknown country code {} in {}", row.country, path.display());
            continue;
        };

        let sector = match resolve_sector(sectors, &row.sector, gnfr_level) {
            Ok(sector) => sector,
            Err(e) => {
                log::warn!("{e} in {}", path.display());
                continue;
            }
        };

        let pollutant = pollutants.register(&row.pollutant);
        let key = EmissionKey::new(country, sector, pollutant);
        entries.push(EmissionEntry::diffuse(key, Some(row.value)));
    }

    Ok(SingleEmissions::from_items(entries))
}

#[derive(Debug, Deserialize)]
struct PointSourceRow {
    country: String,
    sector: String,
    pollutant: String,
    value: f64,
    #[allow(dead_code)]
    unit: String,
    x: f64,
    y: f64,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    diameter: Option<f64>,
    #[serde(default)]
    warmth: Option<f64>,
    #[serde(default)]
    flow: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
}

pub fn read_point_sources(path: &Path, countries: &CountryRegistry, sectors: &SectorRegistry, pollutants: &mut PollutantRegistry) -> Result<SingleEmissions> {
    let mut entries = Vec::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<PointSourceRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping malformed point source row in {}: {e}", path.display());
                continue;
            }
        };

        let Some(country) = countries.id_for_code(&row.country) else {
            log::warn!("unknown country code {} in {}", row.country, path.display());
            continue;
        };

        let sector = match resolve_sector(sectors, &row.sector, false) {
            Ok(sector) => sector,
            Err(e) => {
                log::warn!("{e} in {}", path.display());
                continue;
            }
        };

        let pollutant = pollutants.register(&row.pollutant);
        let key = EmissionKey::new(country, sector, pollutant);
        let stack = StackParameters {
            height: row.height,
            diameter: row.diameter,
            warmth: row.warmth,
            flow: row.flow,
            temperature: row.temperature,
        };

        entries.push(EmissionEntry::point(key, Some(row.value), Coordinate { x: row.x, y: row.y }, stack));
    }

    Ok(SingleEmissions::from_items(entries))
}

#[derive(Debug, Deserialize)]
struct ScalingRow {
    country: String,
    sector: String,
    pollutant: String,
    factor: f64,
    kind: String,
}

pub fn read_scalings(path: &Path, countries: &CountryRegistry, sectors: &SectorRegistry, pollutants: &PollutantRegistry) -> Result<ScalingFactors> {
    let mut scalings = ScalingFactors::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<ScalingRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping malformed scaling row in {}: {e}", path.display());
                continue;
            }
        };

        let (Some(country), Some(pollutant)) = (countries.id_for_code(&row.country), pollutants.id_for_code(&row.pollutant)) else {
            log::warn!("unknown country/pollutant code in {}", path.display());
            continue;
        };

        let sector = match resolve_sector(sectors, &row.sector, false) {
            Ok(sector) => sector,
            Err(e) => {
                log::warn!("{e} in {}", path.display());
                continue;
            }
        };

        let key = EmissionKey::new(country, sector, pollutant);
        match row.kind.to_ascii_lowercase().as_str() {
            "point" => scalings.set_point_scaling(key, row.factor),
            _ => scalings.set_diffuse_scaling(key, row.factor),
        }
    }

    Ok(scalings)
}

#[derive(Debug, Deserialize)]
struct IgnoreRow {
    sector: String,
    country: String,
}

/// Reads a `(sector, country)` exception table: a sector emitted for
/// every country except the ones listed here, per country. One row per
/// exception pair.
pub fn read_sector_ignore_list(path: &Path, countries: &CountryRegistry, sectors: &SectorRegistry) -> Result<HashSet<(SectorId, CountryId)>> {
    let mut ignored = HashSet::new();
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<IgnoreRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping malformed ignore row in {}: {e}", path.display());
                continue;
            }
        };

        let Some(country) = countries.id_for_code(&row.country) else {
            log::warn!("unknown country code {} in {}", row.country, path.display());
            continue;
        };

        let sector = match sectors.nfr_id_for_code(&row.sector).map(SectorId::Nfr).or_else(|| sectors.gnfr_id_for_code(&row.sector).map(SectorId::Gnfr)) {
            Some(sector) => sector,
            None => {
                log::warn!("unknown sector code {} in {}", row.sector, path.display());
                continue;
            }
        };

        ignored.insert((sector, country));
    }

    Ok(ignored)
}

/// `"2015-2020"`, `"2019"`, or `"*"`/blank for every year.
fn year_in_range(year_range: &str, year: i32) -> bool {
    let year_range = year_range.trim();
    if year_range.is_empty() || year_range == "*" {
        return true;
    }
    match year_range.split_once('-') {
        Some((from, to)) => match (from.trim().parse::<i32>(), to.trim().parse::<i32>()) {
            (Ok(from), Ok(to)) => (from..=to).contains(&year),
            _ => false,
        },
        None => year_range.parse::<i32>().map(|y| y == year).unwrap_or(false),
    }
}

#[derive(Debug, Deserialize)]
struct ExceptionRow {
    year_range: String,
    country: String,
    pollutant: String,
    #[serde(default)]
    gnfr: String,
    #[serde(default)]
    nfr: String,
    #[serde(default)]
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    via_gnfr: String,
    #[serde(default)]
    via_nfr: String,
}

fn exception_row_sector(sectors: &SectorRegistry, row: &ExceptionRow) -> Option<SectorId> {
    if !row.nfr.is_empty() {
        sectors.nfr_id_for_code(&row.nfr).map(SectorId::Nfr)
    } else if !row.gnfr.is_empty() {
        sectors.gnfr_id_for_code(&row.gnfr).map(SectorId::Gnfr)
    } else {
        None
    }
}

fn exception_row_via_sector(sectors: &SectorRegistry, row: &ExceptionRow) -> Option<SectorId> {
    if !row.via_nfr.is_empty() {
        sectors.nfr_id_for_code(&row.via_nfr).map(SectorId::Nfr)
    } else if !row.via_gnfr.is_empty() {
        sectors.gnfr_id_for_code(&row.via_gnfr).map(SectorId::Gnfr)
    } else {
        None
    }
}

fn pattern_file_for_type(kind: &str, path: PathBuf) -> Option<PatternFile> {
    match kind.to_ascii_lowercase().as_str() {
        "tif" | "cams" => Some(PatternFile::GeoTiff(path)),
        "ceip" => Some(PatternFile::AsciiGrid(path)),
        "bef" => Some(PatternFile::FlandersTable(path)),
        _ => None,
    }
}

/// Reads the spatial-pattern exceptions table (selection protocol
/// steps 1-2: explicit raster overrides and sector redirects), only
/// keeping rows whose `yearRange` covers `run_year`, and registers them
/// directly into `index`/`extractor`. `next_source_id` continues the
/// id sequence `pattern_scan::scan` left off at, so ids stay unique
/// within the shared extractor.
pub fn read_exceptions(
    path: &Path,
    run_year: i32,
    countries: &CountryRegistry,
    sectors: &SectorRegistry,
    pollutants: &mut PollutantRegistry,
    index: &mut PatternIndex,
    extractor: &mut PatternFileExtractor,
    next_source_id: &mut u32,
) -> Result<()> {
    let mut reader = tab_reader(path)?;

    for row in reader.deserialize::<ExceptionRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::warn!("skipping malformed exception row in {}: {e}", path.display());
                continue;
            }
        };

        if !year_in_range(&row.year_range, run_year) {
            continue;
        }

        let country = if row.country.trim().is_empty() {
            None
        } else {
            match countries.id_for_code(&row.country) {
                Some(country) => Some(country),
                None => {
                    log::warn!("unknown country code {} in {}", row.country, path.display());
                    continue;
                }
            }
        };

        let Some(sector) = exception_row_sector(sectors, &row) else {
            log::warn!("exception row names no known gnfr/nfr sector in {}", path.display());
            continue;
        };

        let pollutant = pollutants.register(&row.pollutant);

        if let Some(via_sector) = exception_row_via_sector(sectors, &row) {
            index.add_sector_redirect(country, pollutant, sector, via_sector);
            continue;
        }

        if row.path.is_empty() {
            log::warn!("exception row has neither a path nor a via-sector redirect in {}", path.display());
            continue;
        }

        let Some(file) = pattern_file_for_type(&row.kind, PathBuf::from(&row.path)) else {
            log::warn!("unknown exception type '{}' in {}", row.kind, path.display());
            continue;
        };

        let source_id = PatternSourceId(*next_source_id);
        *next_source_id += 1;
        extractor.register(source_id, PatternSourceKind::Exception, file);
        index.add_explicit_exception(country, pollutant, sector, PatternSourceKind::Exception, source_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_totals_table_skipping_unknown_country() {
        let mut countries = CountryRegistry::new();
        countries.register("NL", "Netherlands", LandOrSea::Land);
        let mut sectors = SectorRegistry::new();
        let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
        sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
        let mut pollutants = PollutantRegistry::new();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "country\tsector\tpollutant\tyear\tvalue\tunit").unwrap();
        writeln!(file, "NL\t1A3bi\tNOx\t2019\t123.5\tton").unwrap();
        writeln!(file, "ZZ\t1A3bi\tNOx\t2019\t1.0\tton").unwrap();

        let totals = read_totals(file.path(), false, &countries, &sectors, &mut pollutants).unwrap();
        assert_eq!(totals.len(), 1);
    }

    #[test]
    fn year_in_range_covers_ranges_single_years_and_wildcard() {
        assert!(year_in_range("2015-2020", 2018));
        assert!(!year_in_range("2015-2020", 2021));
        assert!(year_in_range("2019", 2019));
        assert!(!year_in_range("2019", 2020));
        assert!(year_in_range("*", 1999));
        assert!(year_in_range("", 1999));
    }

    #[test]
    fn read_exceptions_registers_explicit_raster_and_sector_redirect_rows() {
        use emap_core::coverage::{CellInfo, CountryCoverage};
        use emap_core::geometry::{Cell, Rect};
        use emap_core::pattern::RasterExtractor;

        let mut countries = CountryRegistry::new();
        let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
        let mut sectors = SectorRegistry::new();
        let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
        let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
        let other_nfr = sectors.register_nfr("1A3bii", "Light duty vehicles", gnfr, Destination::Land);
        let mut pollutants = PollutantRegistry::new();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "year_range\tcountry\tpollutant\tgnfr\tnfr\tpath\ttype\tvia_gnfr\tvia_nfr").unwrap();
        writeln!(file, "2015-2020\tNL\tNOx\t\t1A3bi\t/patterns/nl_nox.tif\ttif\t\t").unwrap();
        writeln!(file, "2015-2020\tNL\tNOx\t\t1A3bii\t\t\t\t1A3bi").unwrap();
        writeln!(file, "2021-2022\tNL\tNOx\t\t1A3bi\t/patterns/stale.tif\ttif\t\t").unwrap();

        let mut index = PatternIndex::new(2019);
        let mut extractor = PatternFileExtractor::new();
        let mut next_id = 0u32;

        read_exceptions(file.path(), 2019, &countries, &sectors, &mut pollutants, &mut index, &mut extractor, &mut next_id).unwrap();

        assert_eq!(next_id, 1);

        let nox = pollutants.id_for_code("NOx").unwrap();
        let coverage = CountryCoverage {
            country: nl,
            subgrid_origin: Cell::from_row_col(0, 0),
            cells: vec![CellInfo { cell: Cell::from_row_col(0, 0), coverage: 1.0, rect: Rect::from_xy_size(0.0, 0.0, 1.0, 1.0) }],
        };

        struct FlatRaster;
        impl RasterExtractor for FlatRaster {
            fn extract_raw(&self, _source: PatternSourceId, coverage: &CountryCoverage) -> emap_core::Result<Vec<f64>> {
                Ok(vec![1.0; coverage.cells.len()])
            }
        }

        let direct_key = EmissionKey::new(nl, SectorId::Nfr(nfr), nox);
        let pattern = index.get_pattern(direct_key, &coverage, &FlatRaster, &sectors, &pollutants).unwrap();
        assert_eq!(pattern.source, PatternSourceKind::Exception);

        let redirected_key = EmissionKey::new(nl, SectorId::Nfr(other_nfr), nox);
        let pattern = index.get_pattern(redirected_key, &coverage, &FlatRaster, &sectors, &pollutants).unwrap();
        assert_eq!(pattern.source, PatternSourceKind::Exception);
    }
}
