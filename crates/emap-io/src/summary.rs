//! Writes the run summary as two CSV sheets (validation and GNFR
//! corrections) rather than a single spreadsheet workbook: the pack
//! has no maintained xlsx-writing crate, only `calamine` for reading,
//! so a tabular writer in the same idiom as the rest of `emap-io` is
//! the closer fit than vendoring a writer dependency.

use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;

use emap_core::country::CountryRegistry;
use emap_core::pollutant::PollutantRegistry;
use emap_core::sector::{SectorId, SectorRegistry};
use emap_core::validation::{RunSummary, ValidationReport};

use crate::error::Result;

#[derive(Debug, Serialize)]
struct ValidationRow<'a> {
    country: &'a str,
    sector: &'a str,
    pollutant: &'a str,
    pattern_source: String,
    uniform_fallback: bool,
    diffuse_inside: f64,
    diffuse_outside: f64,
    point_total: f64,
    expected_total: f64,
    diff: f64,
}

#[derive(Debug, Serialize)]
struct CorrectionRow<'a> {
    country: &'a str,
    sector: &'a str,
    pollutant: &'a str,
    gnfr_reported: Option<f64>,
    gnfr_from_nfr: f64,
    ratio: f64,
}

fn sector_code(sectors: &SectorRegistry, sector: SectorId) -> &str {
    match sector {
        SectorId::Nfr(id) => sectors.nfr_code(id),
        SectorId::Gnfr(id) => sectors.gnfr_code(id),
    }
}

pub fn write_validation_report(
    path: &Path,
    reports: &[ValidationReport],
    summary: &RunSummary,
    countries: &CountryRegistry,
    sectors: &SectorRegistry,
    pollutants: &PollutantRegistry,
) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    for report in reports {
        let pattern_source = summary.pattern_choices().get(&report.key).map_or_else(|| "n/a".to_string(), |kind| format!("{kind:?}"));

        writer.serialize(ValidationRow {
            country: countries.code(report.key.country),
            sector: sector_code(sectors, report.key.sector),
            pollutant: pollutants.code(report.key.pollutant),
            pattern_source,
            uniform_fallback: summary.uniform_fallback_events().contains(&report.key),
            diffuse_inside: report.diffuse_inside,
            diffuse_outside: report.diffuse_outside,
            point_total: report.point_total,
            expected_total: report.expected_total,
            diff: report.diff,
        })?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_gnfr_corrections(path: &Path, summary: &RunSummary, countries: &CountryRegistry, sectors: &SectorRegistry, pollutants: &PollutantRegistry) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    for correction in summary.gnfr_corrections() {
        writer.serialize(CorrectionRow {
            country: countries.code(correction.key.country),
            sector: sector_code(sectors, correction.key.sector),
            pollutant: pollutants.code(correction.key.pollutant),
            gnfr_reported: correction.gnfr_reported,
            gnfr_from_nfr: correction.gnfr_from_nfr,
            ratio: correction.ratio,
        })?;
    }

    writer.flush()?;
    Ok(())
}
