//! Spatial-pattern inventory: selects the best available raster for a
//! `(country, sector, pollutant)` tuple. Grounded on
//! `spatialpatterninventory.cpp`'s `get_spatial_pattern_impl` and
//! `create_years_sequence`.

use std::collections::{HashMap, HashSet};

use crate::coverage::CountryCoverage;
use crate::country::CountryId;
use crate::error::Result;
use crate::ids::EmissionKey;
use crate::pollutant::PollutantRegistry;
use crate::sector::{SectorId, SectorRegistry};

/// Opaque handle into wherever the raster bytes actually live; owned
/// and resolved by the I/O collaborator (tabular/raster readers), core
/// only needs it as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternSourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSourceKind {
    Cams,
    Ceip,
    Flanders,
    Exception,
    UniformFallback,
}

/// A selected, country-extracted, L1-normalized pattern. `weights` is
/// aligned index-for-index with the `CountryCoverage` it was extracted
/// against; empty means "uniform over coverage cells".
#[derive(Debug, Clone)]
pub struct SpatialPattern {
    pub source: PatternSourceKind,
    pub weights: Vec<f64>,
    pub available_but_without_data: bool,
}

impl SpatialPattern {
    pub fn uniform() -> Self {
        Self {
            source: PatternSourceKind::UniformFallback,
            weights: Vec::new(),
            available_but_without_data: false,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Extracts raw (un-normalized) per-cell values for `source` against a
/// country's coverage cells. Implemented by the I/O layer (raster
/// reading is out of core's scope); core only normalizes the result.
pub trait RasterExtractor: Sync {
    fn extract_raw(&self, source: PatternSourceId, coverage: &CountryCoverage) -> Result<Vec<f64>>;
}

fn normalize(raw: Vec<f64>) -> (Vec<f64>, bool) {
    let sum: f64 = raw.iter().filter(|v| **v > 0.0).sum();
    if sum <= 0.0 {
        (Vec::new(), true)
    } else {
        (raw.into_iter().map(|v| v.max(0.0) / sum).collect(), false)
    }
}

#[derive(Debug, Clone, Copy)]
enum ExceptionAction {
    ExplicitSource(PatternSourceId, PatternSourceKind),
    RedirectSector(SectorId),
}

#[derive(Debug, Clone, Copy)]
struct ExceptionRule {
    country: Option<CountryId>,
    sector: SectorId,
    pollutant: crate::pollutant::PollutantId,
    action: ExceptionAction,
}

impl ExceptionRule {
    fn matches(&self, key: EmissionKey) -> bool {
        self.sector == key.sector && self.pollutant == key.pollutant && self.country.map_or(true, |c| c == key.country)
    }
}

/// One directory scan result: a raster available for `(year,
/// pollutant, sector)`, keyed for the preferred-year search.
#[derive(Debug, Clone, Copy)]
struct ScannedEntry {
    source: PatternSourceId,
    kind: PatternSourceKind,
}

#[derive(Debug, Default)]
pub struct PatternIndex {
    entries: HashMap<(i32, crate::pollutant::PollutantId, SectorId), ScannedEntry>,
    /// Country-specific patterns (Flanders' own Excel tables), keyed
    /// without a sector: one pattern per pollutant covers every
    /// sector for that country. A country present here is searched
    /// exclusively — it never falls through to `entries`, mirroring
    /// the original's per-country pattern vector replacing, not
    /// supplementing, the shared "rest" library.
    country_entries: HashMap<(CountryId, i32, crate::pollutant::PollutantId), ScannedEntry>,
    country_specific_countries: HashSet<CountryId>,
    available_years: HashSet<i32>,
    exceptions: Vec<ExceptionRule>,
    start_year: i32,
}

impl PatternIndex {
    pub fn new(start_year: i32) -> Self {
        Self {
            start_year,
            ..Self::default()
        }
    }

    /// Registers one scanned raster file. Called by the I/O layer's
    /// directory scan for every recognized file name.
    pub fn register(&mut self, year: i32, pollutant: crate::pollutant::PollutantId, sector: SectorId, kind: PatternSourceKind, source: PatternSourceId) {
        self.available_years.insert(year);
        self.entries.insert((year, pollutant, sector), ScannedEntry { source, kind });
    }

    /// Registers one scanned Flanders pattern table, covering every
    /// sector for `country` and `pollutant` in `year`.
    pub fn register_country_specific(&mut self, country: CountryId, year: i32, pollutant: crate::pollutant::PollutantId, kind: PatternSourceKind, source: PatternSourceId) {
        self.available_years.insert(year);
        self.country_specific_countries.insert(country);
        self.country_entries.insert((country, year, pollutant), ScannedEntry { source, kind });
    }

    pub fn add_explicit_exception(&mut self, country: Option<CountryId>, pollutant: crate::pollutant::PollutantId, sector: SectorId, kind: PatternSourceKind, source: PatternSourceId) {
        self.exceptions.push(ExceptionRule {
            country,
            sector,
            pollutant,
            action: ExceptionAction::ExplicitSource(source, kind),
        });
    }

    pub fn add_sector_redirect(&mut self, country: Option<CountryId>, pollutant: crate::pollutant::PollutantId, sector: SectorId, via_sector: SectorId) {
        self.exceptions.push(ExceptionRule {
            country,
            sector,
            pollutant,
            action: ExceptionAction::RedirectSector(via_sector),
        });
    }

    /// The preferred-year search order: `start`, `start-1`, `start+1`,
    /// `start-2`, `start+2`, ... restricted to years actually present.
    fn years_sequence(&self) -> Vec<i32> {
        let mut remaining = self.available_years.clone();
        let mut years = Vec::new();

        if remaining.remove(&self.start_year) {
            years.push(self.start_year);
        }

        let mut offset: i32 = -1;
        while !remaining.is_empty() {
            let candidate = self.start_year + offset;
            if remaining.remove(&candidate) {
                years.push(candidate);
            }

            offset = -offset;
            if offset < 0 {
                offset -= 1;
            }
        }

        years
    }

    fn find_sector_redirect(&self, key: EmissionKey) -> Option<SectorId> {
        self.exceptions.iter().find_map(|rule| match rule.action {
            ExceptionAction::RedirectSector(via) if rule.matches(key) => Some(via),
            _ => None,
        })
    }

    fn find_explicit_exception(&self, key: EmissionKey) -> Option<(PatternSourceId, PatternSourceKind)> {
        self.exceptions.iter().find_map(|rule| match rule.action {
            ExceptionAction::ExplicitSource(source, kind) if rule.matches(key) => Some((source, kind)),
            _ => None,
        })
    }

    fn scan_for_key(&self, key: EmissionKey, sectors: &SectorRegistry) -> Option<ScannedEntry> {
        if self.country_specific_countries.contains(&key.country) {
            for year in self.years_sequence() {
                if let Some(entry) = self.country_entries.get(&(key.country, year, key.pollutant)) {
                    return Some(*entry);
                }
            }
            return None;
        }

        for year in self.years_sequence() {
            if let Some(entry) = self.entries.get(&(year, key.pollutant, key.sector)) {
                return Some(*entry);
            }

            let gnfr = sectors.to_gnfr(key.sector);
            if gnfr != key.sector {
                if let Some(entry) = self.entries.get(&(year, key.pollutant, gnfr)) {
                    return Some(*entry);
                }
            }
        }

        None
    }

    /// Returns the resolved pattern if one was found, plus whether any
    /// candidate along the way matched by key but extracted to an
    /// empty raster. That flag survives even when the candidate is
    /// rejected, so a caller that exhausts every candidate and falls
    /// back to uniform spread can still report the country had a
    /// pattern registered, just without usable data.
    fn resolve(&self, key: EmissionKey, coverage: &CountryCoverage, check_contents: bool, extractor: &dyn RasterExtractor, sectors: &SectorRegistry) -> Result<(Option<SpatialPattern>, bool)> {
        let key = match self.find_sector_redirect(key) {
            Some(via) => key.with_sector(via),
            None => key,
        };

        let mut available_but_without_data = false;

        if let Some((source, kind)) = self.find_explicit_exception(key) {
            let raw = extractor.extract_raw(source, coverage)?;
            let (weights, empty) = normalize(raw);
            if !empty || !check_contents {
                return Ok((
                    Some(SpatialPattern {
                        source: kind,
                        weights,
                        available_but_without_data: empty,
                    }),
                    empty,
                ));
            }
            available_but_without_data = true;
        }

        if let Some(entry) = self.scan_for_key(key, sectors) {
            let raw = extractor.extract_raw(entry.source, coverage)?;
            let (weights, empty) = normalize(raw);
            if !empty || !check_contents {
                return Ok((
                    Some(SpatialPattern {
                        source: entry.kind,
                        weights,
                        available_but_without_data: empty,
                    }),
                    empty,
                ));
            }
            available_but_without_data = true;
        }

        Ok((None, available_but_without_data))
    }

    fn resolve_with_fallback_pollutant(
        &self,
        key: EmissionKey,
        coverage: &CountryCoverage,
        check_contents: bool,
        extractor: &dyn RasterExtractor,
        sectors: &SectorRegistry,
        pollutants: &PollutantRegistry,
    ) -> Result<SpatialPattern> {
        let (found, mut available_but_without_data) = self.resolve(key, coverage, check_contents, extractor, sectors)?;
        if let Some(pattern) = found {
            return Ok(pattern);
        }

        if let Some(fallback) = pollutants.fallback_of(key.pollutant) {
            let fallback_key = key.with_pollutant(fallback);
            let (found, fallback_empty) = self.resolve(fallback_key, coverage, check_contents, extractor, sectors)?;
            if let Some(pattern) = found {
                return Ok(pattern);
            }
            available_but_without_data |= fallback_empty;
        }

        Ok(SpatialPattern {
            available_but_without_data,
            ..SpatialPattern::uniform()
        })
    }

    /// Used during the coarsest grid: verifies the extracted pattern
    /// actually has data for the country before accepting it.
    pub fn get_pattern_checked(
        &self,
        key: EmissionKey,
        coverage: &CountryCoverage,
        extractor: &dyn RasterExtractor,
        sectors: &SectorRegistry,
        pollutants: &PollutantRegistry,
    ) -> Result<SpatialPattern> {
        self.resolve_with_fallback_pollutant(key, coverage, true, extractor, sectors, pollutants)
    }

    /// Used during finer grids: skips the data-contents check, since
    /// the coarse pass already committed to a source (or uniform).
    pub fn get_pattern(
        &self,
        key: EmissionKey,
        coverage: &CountryCoverage,
        extractor: &dyn RasterExtractor,
        sectors: &SectorRegistry,
        pollutants: &PollutantRegistry,
    ) -> Result<SpatialPattern> {
        self.resolve_with_fallback_pollutant(key, coverage, false, extractor, sectors, pollutants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn years_sequence_alternates_around_start_year() {
        let mut index = PatternIndex::new(2020);
        for year in [2016, 2017, 2018, 2019, 2020, 2021, 2022] {
            index.available_years.insert(year);
        }
        assert_eq!(index.years_sequence(), vec![2020, 2019, 2021, 2018, 2022, 2017, 2016]);
    }

    #[test]
    fn years_sequence_skips_missing_years() {
        let mut index = PatternIndex::new(2020);
        for year in [2018, 2020, 2023] {
            index.available_years.insert(year);
        }
        assert_eq!(index.years_sequence(), vec![2020, 2018, 2023]);
    }

    #[test]
    fn normalize_empty_raster_flags_available_but_without_data() {
        let (weights, empty) = normalize(vec![0.0, 0.0, 0.0]);
        assert!(weights.is_empty());
        assert!(empty);
    }

    #[test]
    fn normalize_sums_to_one() {
        let (weights, empty) = normalize(vec![1.0, 0.0, 3.0]);
        assert!(!empty);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    struct EmptyRaster;

    impl RasterExtractor for EmptyRaster {
        fn extract_raw(&self, _source: PatternSourceId, coverage: &CountryCoverage) -> Result<Vec<f64>> {
            Ok(vec![0.0; coverage.cells.len()])
        }
    }

    fn test_coverage(country: crate::country::CountryId) -> CountryCoverage {
        use crate::coverage::CellInfo;
        use crate::geometry::{Cell, Rect};
        CountryCoverage {
            country,
            subgrid_origin: Cell::from_row_col(0, 0),
            cells: vec![CellInfo {
                cell: Cell::from_row_col(0, 0),
                coverage: 1.0,
                rect: Rect::from_xy_size(0.0, 0.0, 1.0, 1.0),
            }],
        }
    }

    /// A registered pattern whose raster turns out empty still falls
    /// back to uniform spread, but must carry `available_but_without_data`
    /// so the caller knows to pin every finer level to the same fallback.
    #[test]
    fn checked_lookup_reports_available_but_without_data_when_registered_raster_is_empty() {
        use crate::pollutant::PollutantRegistry;
        use crate::sector::{Destination, SectorRegistry};

        let mut countries = crate::country::CountryRegistry::new();
        let nl = countries.register("NL", "Netherlands", crate::country::LandOrSea::Land);
        let mut sectors = SectorRegistry::new();
        let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
        let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
        let mut pollutants = PollutantRegistry::new();
        let nox = pollutants.register("NOx");
        let key = EmissionKey::new(nl, SectorId::Nfr(nfr), nox);

        let mut index = PatternIndex::new(2020);
        index.add_explicit_exception(None, nox, SectorId::Nfr(nfr), PatternSourceKind::Cams, PatternSourceId(1));

        let coverage = test_coverage(nl);
        let pattern = index.get_pattern_checked(key, &coverage, &EmptyRaster, &sectors, &pollutants).unwrap();

        assert!(pattern.is_uniform());
        assert_eq!(pattern.source, PatternSourceKind::UniformFallback);
        assert!(pattern.available_but_without_data);
    }
}
