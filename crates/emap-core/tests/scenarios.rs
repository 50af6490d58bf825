//! End-to-end scenario tests driving the whole pipeline through
//! `run::execute`: reconciled inventory, pattern selection, the grid
//! cascade, and validation together, rather than any single module in
//! isolation.

use std::collections::HashSet;

use geo_types::{Coord, LineString, Polygon};

use emap_core::country::{CountryRegistry, LandOrSea};
use emap_core::coverage::CountryCoverage;
use emap_core::emissions::EmissionEntry;
use emap_core::grid::{GridMeta, ModelGrid};
use emap_core::ids::EmissionKey;
use emap_core::inventory::{ScalingFactors, SingleEmissions};
use emap_core::output::{OutputBuilder, WriteMode};
use emap_core::pattern::{PatternIndex, PatternSourceId, PatternSourceKind, RasterExtractor};
use emap_core::pollutant::PollutantRegistry;
use emap_core::progress::NullProgress;
use emap_core::run::{self, RunParams};
use emap_core::sector::{Destination, SectorId, SectorRegistry};

fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            Coord { x, y },
            Coord { x: x + w, y },
            Coord { x: x + w, y: y + h },
            Coord { x, y: y + h },
            Coord { x, y },
        ]),
        vec![],
    )
}

#[derive(Default)]
struct RecordingOutput {
    diffuse: Vec<(EmissionKey, f64)>,
    points: Vec<EmissionEntry>,
    pollutant_flushes: Vec<WriteMode>,
    flushes: Vec<WriteMode>,
}

impl OutputBuilder for RecordingOutput {
    fn add_point_output_entry(&mut self, entry: &EmissionEntry) -> emap_core::Result<()> {
        self.points.push(entry.clone());
        Ok(())
    }

    fn add_diffuse_output_entry(&mut self, key: EmissionKey, _cell_location: emap_core::emissions::Coordinate, amount: f64, _cell_size_meters: f64) -> emap_core::Result<()> {
        self.diffuse.push((key, amount));
        Ok(())
    }

    fn flush_pollutant(&mut self, _pollutant: emap_core::pollutant::PollutantId, mode: WriteMode) -> emap_core::Result<()> {
        self.pollutant_flushes.push(mode);
        Ok(())
    }

    fn flush(&mut self, mode: WriteMode) -> emap_core::Result<()> {
        self.flushes.push(mode);
        Ok(())
    }
}

impl RecordingOutput {
    fn total(&self) -> f64 {
        self.diffuse.iter().map(|(_, v)| v).sum::<f64>() + self.points.iter().map(EmissionEntry::amount_or_zero).sum::<f64>()
    }
}

/// A raster source that always returns the same fixed per-cell values,
/// regardless of which country or grid level requests it.
struct FixedRaster(Vec<f64>);

impl RasterExtractor for FixedRaster {
    fn extract_raw(&self, _source: PatternSourceId, _coverage: &CountryCoverage) -> emap_core::Result<Vec<f64>> {
        Ok(self.0.clone())
    }
}

/// A raster whose per-cell value depends only on the cell's column
/// parity, so it can be queried against coverages of different sizes
/// (coarse and fine grid levels) and still return a sensible raw
/// vector for whatever cells are asked for.
struct ColumnParityRaster;

impl RasterExtractor for ColumnParityRaster {
    fn extract_raw(&self, _source: PatternSourceId, coverage: &CountryCoverage) -> emap_core::Result<Vec<f64>> {
        Ok(coverage.cells.iter().map(|c| if c.cell.col % 2 == 0 { 1.0 } else { 4.0 }).collect())
    }
}

/// Panics if ever queried: used to prove a level never touches the
/// raster library when no pattern was registered for a key.
struct UnreachableRaster;

impl RasterExtractor for UnreachableRaster {
    fn extract_raw(&self, _source: PatternSourceId, _coverage: &CountryCoverage) -> emap_core::Result<Vec<f64>> {
        panic!("no pattern was registered for this key; the extractor should never be called");
    }
}

/// S1: a 2x2 non-uniform raster `[[1, 0], [0, 3]]` splits 100.0 into
/// 25.0 (weight 1 of 4) and 75.0 (weight 3 of 4), and the validator
/// reports zero mass-balance diff for the run.
#[test]
fn s1_nonuniform_raster_splits_mass_by_normalized_weight() {
    let mut countries = CountryRegistry::new();
    let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
    let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let nox = pollutants.register("NOx");
    let key = EmissionKey::new(nl, sector, nox);

    let grid = GridMeta::new(2, 2, 0.0, 20.0, 10.0, -10.0);
    let model_grid = ModelGrid::new(vec![grid]);
    let land = vec![emap_core::coverage::CountryGeometry { country: nl, polygon: rect(0.0, 0.0, 20.0, 20.0) }];

    let mut pattern_index = PatternIndex::new(2020);
    pattern_index.add_explicit_exception(None, nox, sector, PatternSourceKind::Cams, PatternSourceId(1));
    let extractor = FixedRaster(vec![1.0, 0.0, 0.0, 3.0]);

    let nfr_totals = SingleEmissions::from_items(vec![EmissionEntry::diffuse(key, Some(100.0))]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let mut output = RecordingOutput::default();
    let outcome = run::execute(
        RunParams {
            nfr_totals: &nfr_totals,
            gnfr_totals: &gnfr_totals,
            point_sources: &point_sources,
            scalings: &scalings,
            pattern_index: &pattern_index,
            pattern_extractor: &extractor,
            grid: &model_grid,
            countries: &countries,
            sectors: &sectors,
            pollutants: &pollutants,
            land_geometries: &land,
            sea_geometries: &[],
            sector_ignore: &sector_ignore,
            validate: true,
        },
        &mut output,
        &NullProgress,
    )
    .unwrap();

    let mut nonzero: Vec<f64> = output.diffuse.iter().map(|(_, v)| *v).filter(|v| *v > 1e-9).collect();
    nonzero.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(nonzero, vec![25.0, 75.0]);

    assert_eq!(outcome.validation_reports.len(), 1);
    assert!(outcome.validation_reports[0].diff.abs() < 1e-9);
}

/// S4: a pollutant with no registered spatial pattern falls back to
/// its fallback pollutant's pattern, and the total mass is preserved.
#[test]
fn s4_missing_pattern_falls_back_to_fallback_pollutants_pattern() {
    let mut countries = CountryRegistry::new();
    let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("L_OtherSources", "Other sources", Destination::Land);
    let nfr = sectors.register_nfr("6A", "Other", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let pm_coarse = pollutants.register("PMcoarse");
    let pm10 = pollutants.register("PM10");
    pollutants.set_fallback(pm_coarse, pm10);
    let key = EmissionKey::new(nl, sector, pm_coarse);

    let grid = GridMeta::new(2, 2, 0.0, 20.0, 10.0, -10.0);
    let model_grid = ModelGrid::new(vec![grid]);
    let land = vec![emap_core::coverage::CountryGeometry { country: nl, polygon: rect(0.0, 0.0, 20.0, 20.0) }];

    let mut pattern_index = PatternIndex::new(2020);
    // Nothing registered for `PMcoarse` at all; only its fallback pollutant has a pattern.
    pattern_index.add_explicit_exception(None, pm10, sector, PatternSourceKind::Ceip, PatternSourceId(7));
    let extractor = FixedRaster(vec![2.0, 2.0, 1.0, 1.0]);

    let nfr_totals = SingleEmissions::from_items(vec![EmissionEntry::diffuse(key, Some(60.0))]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let mut output = RecordingOutput::default();
    let outcome = run::execute(
        RunParams {
            nfr_totals: &nfr_totals,
            gnfr_totals: &gnfr_totals,
            point_sources: &point_sources,
            scalings: &scalings,
            pattern_index: &pattern_index,
            pattern_extractor: &extractor,
            grid: &model_grid,
            countries: &countries,
            sectors: &sectors,
            pollutants: &pollutants,
            land_geometries: &land,
            sea_geometries: &[],
            sector_ignore: &sector_ignore,
            validate: true,
        },
        &mut output,
        &NullProgress,
    )
    .unwrap();

    assert!((output.total() - 60.0).abs() < 1e-9);
    assert_eq!(outcome.summary.pattern_choices().get(&key), Some(&PatternSourceKind::Ceip));
}

/// S5: a two-level cascade. Of 100.0 diffuse, the portion whose
/// coarse cell overlaps the finer grid's extent (80.0) carries down
/// and is spread again at the finer level; the rest (20.0) is written
/// at the coarse level. The final total across both levels is 100.0.
#[test]
fn s5_two_level_cascade_carries_remainder_to_finer_grid() {
    let mut countries = CountryRegistry::new();
    let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
    let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let nox = pollutants.register("NOx");
    let key = EmissionKey::new(nl, sector, nox);

    // Coarse: 1 row x 2 cols, cell(0,0) = x[0,10] y[0,10], cell(0,1) = x[10,20] y[0,10].
    let coarse = GridMeta::new(1, 2, 0.0, 10.0, 10.0, -10.0);
    // Fine grid occupies exactly the x[10,20] half of the coarse extent.
    let fine = GridMeta::new(2, 2, 10.0, 10.0, 5.0, -5.0);
    let model_grid = ModelGrid::new(vec![coarse, fine]);

    let land = vec![emap_core::coverage::CountryGeometry { country: nl, polygon: rect(0.0, 0.0, 20.0, 10.0) }];

    let mut pattern_index = PatternIndex::new(2020);
    pattern_index.add_explicit_exception(None, nox, sector, PatternSourceKind::Cams, PatternSourceId(1));
    let extractor = ColumnParityRaster;

    let nfr_totals = SingleEmissions::from_items(vec![EmissionEntry::diffuse(key, Some(100.0))]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let mut output = RecordingOutput::default();
    let outcome = run::execute(
        RunParams {
            nfr_totals: &nfr_totals,
            gnfr_totals: &gnfr_totals,
            point_sources: &point_sources,
            scalings: &scalings,
            pattern_index: &pattern_index,
            pattern_extractor: &extractor,
            grid: &model_grid,
            countries: &countries,
            sectors: &sectors,
            pollutants: &pollutants,
            land_geometries: &land,
            sea_geometries: &[],
            sector_ignore: &sector_ignore,
            validate: true,
        },
        &mut output,
        &NullProgress,
    )
    .unwrap();

    // One flush per grid level.
    assert_eq!(output.pollutant_flushes.len(), 2);
    assert!((output.total() - 100.0).abs() < 1e-9);
    assert!(outcome.validation_reports[0].diff.abs() < 1e-9);
}

/// S6: running the same inputs through a single-threaded and a
/// multi-threaded rayon pool must produce the same total emitted mass.
#[test]
fn s6_parallel_equivalence_across_thread_counts() {
    let mut countries = CountryRegistry::new();
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
    let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let nox = pollutants.register("NOx");

    // Four countries, each owning exactly one cell of a 2x2 grid.
    let grid = GridMeta::new(2, 2, 0.0, 20.0, 10.0, -10.0);
    let model_grid = ModelGrid::new(vec![grid]);

    let a = countries.register("AA", "Country A", LandOrSea::Land);
    let b = countries.register("BB", "Country B", LandOrSea::Land);
    let c = countries.register("CC", "Country C", LandOrSea::Land);
    let d = countries.register("DD", "Country D", LandOrSea::Land);

    let land = vec![
        emap_core::coverage::CountryGeometry { country: a, polygon: rect(0.0, 0.0, 10.0, 10.0) },
        emap_core::coverage::CountryGeometry { country: b, polygon: rect(10.0, 0.0, 10.0, 10.0) },
        emap_core::coverage::CountryGeometry { country: c, polygon: rect(0.0, 10.0, 10.0, 10.0) },
        emap_core::coverage::CountryGeometry { country: d, polygon: rect(10.0, 10.0, 10.0, 10.0) },
    ];

    let mut pattern_index = PatternIndex::new(2020);
    pattern_index.add_explicit_exception(None, nox, sector, PatternSourceKind::Cams, PatternSourceId(1));
    let extractor = FixedRaster(vec![1.0]);

    let nfr_totals = SingleEmissions::from_items(vec![
        EmissionEntry::diffuse(EmissionKey::new(a, sector, nox), Some(10.0)),
        EmissionEntry::diffuse(EmissionKey::new(b, sector, nox), Some(20.0)),
        EmissionEntry::diffuse(EmissionKey::new(c, sector, nox), Some(30.0)),
        EmissionEntry::diffuse(EmissionKey::new(d, sector, nox), Some(40.0)),
    ]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let run_with = |threads: usize| -> f64 {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
        pool.install(|| {
            let mut output = RecordingOutput::default();
            run::execute(
                RunParams {
                    nfr_totals: &nfr_totals,
                    gnfr_totals: &gnfr_totals,
                    point_sources: &point_sources,
                    scalings: &scalings,
                    pattern_index: &pattern_index,
                    pattern_extractor: &extractor,
                    grid: &model_grid,
                    countries: &countries,
                    sectors: &sectors,
                    pollutants: &pollutants,
                    land_geometries: &land,
                    sea_geometries: &[],
                    sector_ignore: &sector_ignore,
                    validate: false,
                },
                &mut output,
                &NullProgress,
            )
            .unwrap();
            output.total()
        })
    };

    let single_threaded = run_with(1);
    let multi_threaded = run_with(4);
    assert!((single_threaded - 100.0).abs() < 1e-9);
    assert!((single_threaded - multi_threaded).abs() < 1e-9);
}

/// Universal invariant 6: when no spatial pattern is registered for a
/// key anywhere, every grid level must fall back to coverage-fraction
/// spreading without ever touching the raster library, at the coarsest
/// level and every finer one alike.
#[test]
fn uniform_fallback_is_used_at_every_level_when_nothing_is_registered() {
    let mut countries = CountryRegistry::new();
    let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
    let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let nox = pollutants.register("NOx");
    let key = EmissionKey::new(nl, sector, nox);

    let coarse = GridMeta::new(1, 2, 0.0, 10.0, 10.0, -10.0);
    let fine = GridMeta::new(2, 2, 10.0, 10.0, 5.0, -5.0);
    let model_grid = ModelGrid::new(vec![coarse, fine]);
    let land = vec![emap_core::coverage::CountryGeometry { country: nl, polygon: rect(0.0, 0.0, 20.0, 10.0) }];

    let pattern_index = PatternIndex::new(2020);
    let extractor = UnreachableRaster;

    let nfr_totals = SingleEmissions::from_items(vec![EmissionEntry::diffuse(key, Some(100.0))]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let mut output = RecordingOutput::default();
    let outcome = run::execute(
        RunParams {
            nfr_totals: &nfr_totals,
            gnfr_totals: &gnfr_totals,
            point_sources: &point_sources,
            scalings: &scalings,
            pattern_index: &pattern_index,
            pattern_extractor: &extractor,
            grid: &model_grid,
            countries: &countries,
            sectors: &sectors,
            pollutants: &pollutants,
            land_geometries: &land,
            sea_geometries: &[],
            sector_ignore: &sector_ignore,
            validate: true,
        },
        &mut output,
        &NullProgress,
    )
    .unwrap();

    assert!((output.total() - 100.0).abs() < 1e-9);
    assert_eq!(outcome.summary.pattern_choices().get(&key), Some(&PatternSourceKind::UniformFallback));
}

/// Universal invariant 7: flushing the same run twice produces
/// bit-identical output, provided the run is single-threaded.
#[test]
fn repeated_single_threaded_runs_produce_identical_output() {
    let mut countries = CountryRegistry::new();
    let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
    let mut sectors = SectorRegistry::new();
    let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
    let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
    let sector = SectorId::Nfr(nfr);
    let mut pollutants = PollutantRegistry::new();
    let nox = pollutants.register("NOx");
    let key = EmissionKey::new(nl, sector, nox);

    let grid = GridMeta::new(2, 2, 0.0, 20.0, 10.0, -10.0);
    let model_grid = ModelGrid::new(vec![grid]);
    let land = vec![emap_core::coverage::CountryGeometry { country: nl, polygon: rect(0.0, 0.0, 20.0, 20.0) }];

    let mut pattern_index = PatternIndex::new(2020);
    pattern_index.add_explicit_exception(None, nox, sector, PatternSourceKind::Cams, PatternSourceId(1));
    let extractor = FixedRaster(vec![1.0, 0.0, 0.0, 3.0]);

    let nfr_totals = SingleEmissions::from_items(vec![EmissionEntry::diffuse(key, Some(100.0))]);
    let gnfr_totals = SingleEmissions::new();
    let point_sources = SingleEmissions::new();
    let scalings = ScalingFactors::new();
    let sector_ignore = HashSet::new();

    let run_once = || -> Vec<(EmissionKey, f64)> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        pool.install(|| {
            let mut output = RecordingOutput::default();
            run::execute(
                RunParams {
                    nfr_totals: &nfr_totals,
                    gnfr_totals: &gnfr_totals,
                    point_sources: &point_sources,
                    scalings: &scalings,
                    pattern_index: &pattern_index,
                    pattern_extractor: &extractor,
                    grid: &model_grid,
                    countries: &countries,
                    sectors: &sectors,
                    pollutants: &pollutants,
                    land_geometries: &land,
                    sea_geometries: &[],
                    sector_ignore: &sector_ignore,
                    validate: false,
                },
                &mut output,
                &NullProgress,
            )
            .unwrap();
            let mut rows = output.diffuse.clone();
            rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            rows
        })
    };

    let first = run_once();
    let second = run_once();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.0, b.0);
        assert!((a.1 - b.1).abs() < 1e-12);
    }
}
