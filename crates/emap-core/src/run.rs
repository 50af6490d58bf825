//! Run controller: ties the inventory builder, the pattern index, and
//! the disaggregation pipeline together into the single entry point
//! the CLI calls. Grounded on `modelrun.cpp::run_model`'s top-level
//! orchestration, minus the actual file I/O (owned by `emap-io`).

use std::collections::HashSet;

use crate::collector::EmissionCollector;
use crate::country::{CountryId, CountryRegistry};
use crate::coverage::CountryGeometry;
use crate::disaggregate::{self, DisaggregationInputs};
use crate::error::Result;
use crate::grid::ModelGrid;
use crate::inventory::{self, Inventory, ScalingFactors, SingleEmissions};
use crate::output::OutputBuilder;
use crate::pattern::{PatternIndex, RasterExtractor};
use crate::pollutant::PollutantRegistry;
use crate::progress::ProgressSink;
use crate::sector::{SectorId, SectorRegistry};
use crate::validation::{RunSummary, ValidationReport, Validator};

/// Everything a run needs once the I/O layer has finished loading
/// totals, point sources, patterns, and reference tables.
pub struct RunParams<'a> {
    pub nfr_totals: &'a SingleEmissions,
    pub gnfr_totals: &'a SingleEmissions,
    pub point_sources: &'a SingleEmissions,
    pub scalings: &'a ScalingFactors,
    pub pattern_index: &'a PatternIndex,
    pub pattern_extractor: &'a dyn RasterExtractor,
    pub grid: &'a ModelGrid,
    pub countries: &'a CountryRegistry,
    pub sectors: &'a SectorRegistry,
    pub pollutants: &'a PollutantRegistry,
    pub land_geometries: &'a [CountryGeometry],
    pub sea_geometries: &'a [CountryGeometry],
    pub sector_ignore: &'a HashSet<(SectorId, CountryId)>,
    pub validate: bool,
}

pub struct RunOutcome {
    pub summary: RunSummary,
    pub validation_reports: Vec<ValidationReport>,
    pub inventory: Inventory,
}

/// Builds the reconciled inventory, runs the disaggregation cascade,
/// and (if `params.validate`) reconciles totals against the inventory.
pub fn execute(params: RunParams, output: &mut dyn OutputBuilder, progress: &dyn ProgressSink) -> Result<RunOutcome> {
    log::info!("building reconciled emission inventory");
    let (inventory, gnfr_corrections) = inventory::build_inventory(
        params.nfr_totals,
        params.gnfr_totals,
        params.point_sources,
        params.scalings,
        params.countries,
        params.sectors,
    )?;

    let mut summary = RunSummary::new();
    summary.record_gnfr_corrections(gnfr_corrections);

    let mut validator = Validator::new();
    let mut collector = EmissionCollector::new(output);

    let inputs = DisaggregationInputs {
        inventory: &inventory,
        pattern_index: params.pattern_index,
        pattern_extractor: params.pattern_extractor,
        grid: params.grid,
        countries: params.countries,
        sectors: params.sectors,
        pollutants: params.pollutants,
        land_geometries: params.land_geometries,
        sea_geometries: params.sea_geometries,
        sector_ignore: params.sector_ignore,
    };

    log::info!("running disaggregation cascade across {} grid level(s)", params.grid.len());
    disaggregate::run(&inputs, &mut collector, &mut validator, &mut summary, progress)?;
    collector.final_flush(crate::output::WriteMode::Append)?;

    let validation_reports = if params.validate {
        let reports = validator.finalize(&inventory);
        for report in &reports {
            if report.diff.abs() > crate::inventory::MASS_BALANCE_TOLERANCE {
                log::warn!(
                    "mass balance diff for {}: expected {:.6}, got {:.6} (diff {:.6})",
                    report.key,
                    report.expected_total,
                    report.diffuse_inside + report.diffuse_outside + report.point_total,
                    report.diff
                );
            }
        }
        reports
    } else {
        Vec::new()
    };

    Ok(RunOutcome {
        summary,
        validation_reports,
        inventory,
    })
}
