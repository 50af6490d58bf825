//! The disaggregation pipeline: cascades reconciled inventory entries
//! across the nested grid sequence, respecting country coverage,
//! spatial patterns, and point sources. Grounded on
//! `modelrun.cpp::spread_emissions` and `run_model`.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::collector::EmissionCollector;
use crate::country::{CountryId, CountryRegistry};
use crate::coverage::{self, CoverageMode, CountryCoverage, CountryGeometry};
use crate::error::Result;
use crate::geometry::{Cell, Rect};
use crate::grid::{GridMeta, ModelGrid};
use crate::ids::EmissionKey;
use crate::inventory::Inventory;
use crate::output::WriteMode;
use crate::pattern::{PatternIndex, PatternSourceKind, RasterExtractor, SpatialPattern};
use crate::pollutant::{PollutantId, PollutantRegistry};
use crate::progress::ProgressSink;
use crate::sector::{Destination, SectorId, SectorRegistry};
use crate::validation::{RunSummary, Validator};

/// Everything the pipeline needs that isn't mutated during the run:
/// the reconciled inventory, the scanned pattern index, the model's
/// nested grid sequence, and the reference tables.
pub struct DisaggregationInputs<'a> {
    pub inventory: &'a Inventory,
    pub pattern_index: &'a PatternIndex,
    pub pattern_extractor: &'a dyn RasterExtractor,
    pub grid: &'a ModelGrid,
    pub countries: &'a CountryRegistry,
    pub sectors: &'a SectorRegistry,
    pub pollutants: &'a PollutantRegistry,
    pub land_geometries: &'a [CountryGeometry],
    pub sea_geometries: &'a [CountryGeometry],
    /// `(sector, country)` pairs excluded from disaggregation
    /// entirely, e.g. sectors reported only as national totals with
    /// no meaningful spatial pattern.
    pub sector_ignore: &'a HashSet<(SectorId, CountryId)>,
}

struct UnitOutcome {
    country: CountryId,
    inside_cells: Vec<(Cell, f64)>,
    outside_of_grid: f64,
    erased_for_next_level: f64,
    points: Vec<crate::emissions::EmissionEntry>,
    pattern_source: PatternSourceKind,
    became_uniform_fallback: bool,
}

#[allow(clippy::too_many_arguments)]
fn process_unit(
    inputs: &DisaggregationInputs,
    pollutant: PollutantId,
    sector: SectorId,
    coverage: &CountryCoverage,
    grid: &GridMeta,
    is_coarsest: bool,
    next_extent: Option<&Rect>,
    remaining: &HashMap<EmissionKey, f64>,
    coarse_uniform_fallback_keys: &HashSet<EmissionKey>,
) -> Result<Option<UnitOutcome>> {
    if Some(coverage.country) == inputs.countries.flanders() {
        return Ok(None);
    }
    if inputs.sector_ignore.contains(&(sector, coverage.country)) {
        return Ok(None);
    }

    let key = EmissionKey::new(coverage.country, sector, pollutant);
    let Some(entry) = inputs.inventory.get(key) else {
        return Ok(None);
    };

    let to_spread = if is_coarsest { entry.scaled_diffuse() } else { remaining.get(&key).copied().unwrap_or(0.0) };
    let has_points = is_coarsest && !entry.point_entries.is_empty();
    if to_spread == 0.0 && !has_points {
        return Ok(None);
    }

    let (pattern, became_uniform_fallback) = if is_coarsest {
        let pattern = inputs
            .pattern_index
            .get_pattern_checked(key, coverage, inputs.pattern_extractor, inputs.sectors, inputs.pollutants)?;
        if pattern.available_but_without_data {
            (SpatialPattern::uniform(), true)
        } else {
            (pattern, false)
        }
    } else if coarse_uniform_fallback_keys.contains(&key) {
        (SpatialPattern::uniform(), false)
    } else {
        (
            inputs
                .pattern_index
                .get_pattern(key, coverage, inputs.pattern_extractor, inputs.sectors, inputs.pollutants)?,
            false,
        )
    };

    if pattern.source != PatternSourceKind::UniformFallback && pattern.weights.is_empty() {
        return Err(crate::error::Error::InvariantViolation(format!(
            "non-uniform pattern for {key} resolved to an empty raster"
        )));
    }

    let values = spread_value(to_spread, &pattern, coverage);

    let mut inside_cells = Vec::with_capacity(values.len());
    let mut outside_of_grid = 0.0;
    let mut erased_for_next_level = 0.0;

    for (info, &value) in coverage.cells.iter().zip(&values) {
        if !grid.contains_cell(info.cell) {
            outside_of_grid += value;
            continue;
        }
        if let Some(next_extent) = next_extent {
            if info.rect.intersects(next_extent) {
                erased_for_next_level += value;
                continue;
            }
        }
        inside_cells.push((info.cell, value));
    }

    let points = if has_points { entry.scaled_point_entries() } else { Vec::new() };

    Ok(Some(UnitOutcome {
        country: coverage.country,
        inside_cells,
        outside_of_grid,
        erased_for_next_level,
        points,
        pattern_source: pattern.source,
        became_uniform_fallback,
    }))
}

fn spread_value(to_spread: f64, pattern: &SpatialPattern, coverage: &CountryCoverage) -> Vec<f64> {
    if pattern.is_uniform() {
        let total_coverage: f64 = coverage.cells.iter().map(|c| c.coverage).sum();
        if total_coverage <= 0.0 {
            return vec![0.0; coverage.cells.len()];
        }
        coverage.cells.iter().map(|c| to_spread * c.coverage / total_coverage).collect()
    } else {
        pattern.weights.iter().map(|w| w * to_spread).collect()
    }
}

fn coverage_table_for(sector: SectorId, sectors: &SectorRegistry, land: &[CountryCoverage], sea: &[CountryCoverage]) -> Vec<CountryCoverage> {
    match sectors.destination_of(sector) {
        Destination::Land => land.to_vec(),
        Destination::Sea | Destination::Eez => sea.to_vec(),
    }
}

fn run_level(
    inputs: &DisaggregationInputs,
    level: &GridMeta,
    is_coarsest: bool,
    next_extent: Option<&Rect>,
    remaining: &HashMap<EmissionKey, f64>,
    coarse_uniform_fallback_keys: &mut HashSet<EmissionKey>,
    collector: &mut EmissionCollector,
    validator: &mut Validator,
    summary: &mut RunSummary,
    progress: &dyn ProgressSink,
) -> Result<HashMap<EmissionKey, f64>> {
    let mode = if is_coarsest { CoverageMode::AllCells } else { CoverageMode::GridOnly };
    let extent = level.extent();

    let land_coverage = coverage::build(level, &extent, inputs.land_geometries, mode, progress)?;
    let sea_coverage = coverage::build(level, &extent, inputs.sea_geometries, mode, progress)?;

    let mut next_remaining: HashMap<EmissionKey, f64> = HashMap::new();
    let write_mode = if is_coarsest { WriteMode::Create } else { WriteMode::Append };

    for pollutant in inputs.pollutants.iter() {
        for nfr in inputs.sectors.all_nfr() {
            progress.check_cancelled()?;
            let sector = SectorId::Nfr(nfr);
            let table = coverage_table_for(sector, inputs.sectors, &land_coverage, &sea_coverage);

            let outcomes: Vec<Option<UnitOutcome>> = table
                .par_iter()
                .map(|coverage| process_unit(inputs, pollutant, sector, coverage, level, is_coarsest, next_extent, remaining, coarse_uniform_fallback_keys))
                .collect::<Result<Vec<_>>>()?;

            for outcome in outcomes.into_iter().flatten() {
                let key = EmissionKey::new(outcome.country, sector, pollutant);

                collector.add_emissions(outcome.country, sector, pollutant, &outcome.inside_cells, &outcome.points)?;
                validator.record_diffuse(key, outcome.inside_cells.iter().map(|(_, v)| v).sum(), outcome.outside_of_grid);
                if !outcome.points.is_empty() {
                    validator.record_points(key, outcome.points.iter().map(crate::emissions::EmissionEntry::amount_or_zero).sum());
                }
                summary.record_pattern_choice(key, outcome.pattern_source);
                if outcome.became_uniform_fallback {
                    summary.record_uniform_fallback(key);
                    coarse_uniform_fallback_keys.insert(key);
                }
                if outcome.erased_for_next_level > 0.0 {
                    *next_remaining.entry(key).or_insert(0.0) += outcome.erased_for_next_level;
                }
            }
        }

        collector.flush_pollutant(pollutant, level, write_mode)?;
    }

    Ok(next_remaining)
}

fn run_flanders_pass(inputs: &DisaggregationInputs, collector: &mut EmissionCollector, validator: &mut Validator, summary: &mut RunSummary, progress: &dyn ProgressSink) -> Result<()> {
    let Some(flanders) = inputs.countries.flanders() else {
        return Ok(());
    };

    let finest = inputs.grid.finest();
    let extent = finest.extent();

    let land_coverage: Vec<CountryCoverage> = coverage::build(&finest, &extent, inputs.land_geometries, CoverageMode::GridOnly, progress)?
        .into_iter()
        .filter(|c| c.country == flanders)
        .collect();

    if land_coverage.is_empty() {
        return Ok(());
    }

    for pollutant in inputs.pollutants.iter() {
        for nfr in inputs.sectors.all_nfr() {
            progress.check_cancelled()?;
            let sector = SectorId::Nfr(nfr);
            let key = EmissionKey::new(flanders, sector, pollutant);
            let Some(entry) = inputs.inventory.get(key) else {
                continue;
            };

            let coverage = &land_coverage[0];
            let to_spread = entry.scaled_diffuse();
            if to_spread == 0.0 && entry.point_entries.is_empty() {
                continue;
            }

            let pattern = inputs
                .pattern_index
                .get_pattern_checked(key, coverage, inputs.pattern_extractor, inputs.sectors, inputs.pollutants)?;
            let values = spread_value(to_spread, &pattern, coverage);

            let cells: Vec<(Cell, f64)> = coverage
                .cells
                .iter()
                .zip(&values)
                .filter(|(info, _)| finest.contains_cell(info.cell))
                .map(|(info, &v)| (info.cell, v))
                .collect();

            let points = entry.scaled_point_entries();
            collector.add_emissions(flanders, sector, pollutant, &cells, &points)?;
            validator.record_diffuse(key, cells.iter().map(|(_, v)| v).sum(), 0.0);
            if !points.is_empty() {
                validator.record_points(key, points.iter().map(crate::emissions::EmissionEntry::amount_or_zero).sum());
            }
            summary.record_pattern_choice(key, pattern.source);
        }

        collector.flush_pollutant(pollutant, &finest, WriteMode::Append)?;
    }

    Ok(())
}

/// Runs the full cascade: coarsest grid first, then every finer level
/// in sequence, then the dedicated Flanders pass at the finest grid.
pub fn run(inputs: &DisaggregationInputs, collector: &mut EmissionCollector, validator: &mut Validator, summary: &mut RunSummary, progress: &dyn ProgressSink) -> Result<()> {
    let levels = inputs.grid.levels();
    let mut remaining: HashMap<EmissionKey, f64> = HashMap::new();
    let mut coarse_uniform_fallback_keys: HashSet<EmissionKey> = HashSet::new();

    for (index, level) in levels.iter().enumerate() {
        progress.check_cancelled()?;
        let is_coarsest = index == 0;
        let next_extent = levels.get(index + 1).map(GridMeta::extent);

        remaining = run_level(
            inputs,
            level,
            is_coarsest,
            next_extent.as_ref(),
            &remaining,
            &mut coarse_uniform_fallback_keys,
            collector,
            validator,
            summary,
            progress,
        )?;
    }

    run_flanders_pass(inputs, collector, validator, summary, progress)?;

    Ok(())
}
