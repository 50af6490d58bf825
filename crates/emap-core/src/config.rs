//! Run configuration data shape: the in-memory shape of the single
//! TOML config file. Parsing itself (`toml::from_str` plus path
//! resolution) lives in `emap-io::config`; this module only owns the
//! shape consumed by the rest of the core.

use std::path::PathBuf;

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
#[derive(Debug, Clone)]
pub struct ModelSection {
    pub grid: String,
    pub data_path: PathBuf,
    pub year: i32,
    pub report_year: i32,
    pub scenario: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub included_pollutants: Option<Vec<String>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub point_source_rescale_threshold: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub spatial_pattern_exceptions: Option<PathBuf>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub emission_scalings: Option<PathBuf>,
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
#[derive(Debug, Clone)]
pub struct OutputSection {
    pub output_path: PathBuf,
    pub sector_level: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub filename_suffix: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub per_country_raster_dump: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub per_grid_raster_dump: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub per_pattern_raster_dump: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub separate_point_source_output: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields, default))]
#[derive(Debug, Clone, Default)]
pub struct OptionsSection {
    pub validation: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: ModelSection,
    pub output: OutputSection,
    #[cfg_attr(feature = "serde", serde(default))]
    pub options: OptionsSection,
}

impl RunConfig {
    pub fn included_pollutants(&self) -> Option<&[String]> {
        self.model.included_pollutants.as_deref()
    }
}
