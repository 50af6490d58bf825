//! Command-line entry point: loads the run configuration and the
//! `05_model_parameters`/`01_data_emissions`/`03_spatial_disaggregation`
//! input tables, then drives `emap_core::run::execute`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use env_logger::{Env, TimestampPrecision};

use emap_core::country::CountryRegistry;
use emap_core::grid::ModelGrid;
use emap_core::inventory::{merge_emissions, ScalingFactors, SingleEmissions};
use emap_core::pollutant::PollutantRegistry;
use emap_core::progress::AtomicProgress;
use emap_core::run::{self, RunParams};
use emap_core::sector::SectorRegistry;
use emap_io::output::{BrnOutputBuilder, DatOutputBuilder};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Brn,
    Dat,
}

#[derive(Parser, Debug)]
#[command(name = "emap", about = "Spatial emission disaggregation engine")]
struct Cli {
    /// Path to the run's TOML configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Output wire format.
    #[arg(long = "format", value_enum, default_value = "brn")]
    format: OutputFormat,

    /// Worker thread count for the disaggregation cascade. Defaults to
    /// the rayon global pool's machine-default sizing.
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,
}

fn model_parameters_dir(data_path: &Path) -> PathBuf {
    data_path.join("05_model_parameters")
}

fn totals_dir(data_path: &Path, report_year: i32) -> PathBuf {
    data_path.join("01_data_emissions").join("inventory").join(format!("reporting_{report_year}")).join("totals")
}

fn pointsources_dir(data_path: &Path, report_year: i32) -> PathBuf {
    data_path.join("01_data_emissions").join("inventory").join(format!("reporting_{report_year}")).join("pointsources")
}

fn pattern_dir(data_path: &Path, report_year: i32) -> PathBuf {
    data_path.join("03_spatial_disaggregation").join("rest").join(format!("reporting_{report_year}"))
}

fn flanders_pattern_dir(data_path: &Path, report_year: i32) -> PathBuf {
    data_path.join("03_spatial_disaggregation").join("bef").join(format!("reporting_{report_year}"))
}

/// Reads every point-source table under `01_data_emissions/.../pointsources/<ISO>/`,
/// merging them into a single collection.
fn read_all_point_sources(dir: &Path, countries: &CountryRegistry, sectors: &SectorRegistry, pollutants: &mut PollutantRegistry) -> emap_io::Result<SingleEmissions> {
    let mut combined = SingleEmissions::new();

    let Ok(country_dirs) = std::fs::read_dir(dir) else {
        log::warn!("no point source directory at {}", dir.display());
        return Ok(combined);
    };

    for entry in country_dirs.flatten() {
        let Ok(files) = std::fs::read_dir(entry.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tsv") {
                continue;
            }
            let entries = emap_io::tabular::read_point_sources(&path, countries, sectors, pollutants)?;
            merge_emissions(&mut combined, entries);
        }
    }

    Ok(combined)
}

fn run() -> emap_io::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).format_timestamp(Some(TimestampPrecision::Millis)).init();

    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global().expect("rayon global pool can only be built once");
    }

    let config = emap_io::config::load_run_config(&cli.config)?;
    let params_dir = model_parameters_dir(&config.model.data_path);

    log::info!("loading reference tables from {}", params_dir.display());
    let countries = emap_io::tabular::read_country_table(&params_dir.join("countries.tsv"))?;
    let sectors = emap_io::tabular::read_sector_table(&params_dir.join("sectors.tsv"))?;
    let mut pollutants = emap_io::tabular::read_pollutant_table(&params_dir.join("pollutants.tsv"))?;

    let sector_ignore = emap_io::tabular::read_sector_ignore_list(&params_dir.join("ignored_sectors.tsv"), &countries, &sectors).unwrap_or_else(|e| {
        log::warn!("no sector ignore table loaded: {e}");
        HashSet::new()
    });

    let land_geometries = emap_io::country_geometry::read_country_geometries(&params_dir.join("country_borders.tsv"), &countries)?;
    let sea_geometries = emap_io::country_geometry::read_country_geometries(&params_dir.join("country_eez.tsv"), &countries).unwrap_or_default();

    let totals_dir = totals_dir(&config.model.data_path, config.model.report_year);
    let gnfr_level = config.output.sector_level.eq_ignore_ascii_case("gnfr");
    let nfr_totals = emap_io::tabular::read_totals(&totals_dir.join("nfr_totals.tsv"), false, &countries, &sectors, &mut pollutants)?;
    let gnfr_totals = emap_io::tabular::read_totals(&totals_dir.join("gnfr_totals.tsv"), true, &countries, &sectors, &mut pollutants)?;

    let point_sources = read_all_point_sources(&pointsources_dir(&config.model.data_path, config.model.report_year), &countries, &sectors, &mut pollutants)?;

    let scalings = match &config.model.emission_scalings {
        Some(path) => emap_io::tabular::read_scalings(path, &countries, &sectors, &pollutants)?,
        None => ScalingFactors::new(),
    };

    log::info!("scanning spatial pattern library under {}", config.model.data_path.display());
    let (mut pattern_index, mut pattern_extractor, mut next_pattern_source_id) = emap_io::pattern_scan::scan(
        &pattern_dir(&config.model.data_path, config.model.report_year),
        &flanders_pattern_dir(&config.model.data_path, config.model.report_year),
        config.model.year,
        countries.flanders(),
        &sectors,
        &mut pollutants,
    )?;

    if let Some(exceptions_path) = &config.model.spatial_pattern_exceptions {
        log::info!("applying spatial pattern exceptions from {}", exceptions_path.display());
        emap_io::tabular::read_exceptions(
            exceptions_path,
            config.model.year,
            &countries,
            &sectors,
            &mut pollutants,
            &mut pattern_index,
            &mut pattern_extractor,
            &mut next_pattern_source_id,
        )?;
    }

    let catalog = emap_io::grids::built_in_catalog();
    let levels = emap_io::grids::cascade_for(&catalog, &config.model.grid).ok_or_else(|| emap_core::Error::ConfigError(format!("unknown grid '{}'", config.model.grid)))?;
    let grid = ModelGrid::new(levels);

    std::fs::create_dir_all(&config.output.output_path)?;

    let progress = AtomicProgress::new();
    let suffix = config.output.filename_suffix.clone();

    let outcome = match cli.format {
        OutputFormat::Brn => {
            let path = BrnOutputBuilder::default_path(&config.output.output_path, suffix.as_deref());
            let mut builder = BrnOutputBuilder::new(path);
            run::execute(
                RunParams {
                    nfr_totals: &nfr_totals,
                    gnfr_totals: &gnfr_totals,
                    point_sources: &point_sources,
                    scalings: &scalings,
                    pattern_index: &pattern_index,
                    pattern_extractor: &pattern_extractor,
                    grid: &grid,
                    countries: &countries,
                    sectors: &sectors,
                    pollutants: &pollutants,
                    land_geometries: &land_geometries,
                    sea_geometries: &sea_geometries,
                    sector_ignore: &sector_ignore,
                    validate: config.options.validation,
                },
                &mut builder,
                &progress,
            )?
        }
        OutputFormat::Dat => {
            let mut builder = DatOutputBuilder::new(config.output.output_path.clone(), suffix.clone(), grid.finest(), &countries, &pollutants, &sectors, gnfr_level);
            builder.write_header()?;
            let outcome = run::execute(
                RunParams {
                    nfr_totals: &nfr_totals,
                    gnfr_totals: &gnfr_totals,
                    point_sources: &point_sources,
                    scalings: &scalings,
                    pattern_index: &pattern_index,
                    pattern_extractor: &pattern_extractor,
                    grid: &grid,
                    countries: &countries,
                    sectors: &sectors,
                    pollutants: &pollutants,
                    land_geometries: &land_geometries,
                    sea_geometries: &sea_geometries,
                    sector_ignore: &sector_ignore,
                    validate: config.options.validation,
                },
                &mut builder,
                &progress,
            )?;
            builder.write_point_sources()?;
            outcome
        }
    };

    log::info!("run complete: {} validation reports, {} gnfr corrections", outcome.validation_reports.len(), outcome.summary.gnfr_corrections().len());

    if config.options.validation {
        let report_path = config.output.output_path.join("validation_report.tsv");
        emap_io::summary::write_validation_report(&report_path, &outcome.validation_reports, &outcome.summary, &countries, &sectors, &pollutants)?;
    }
    let corrections_path = config.output.output_path.join("gnfr_corrections.tsv");
    emap_io::summary::write_gnfr_corrections(&corrections_path, &outcome.summary, &countries, &sectors, &pollutants)?;

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
