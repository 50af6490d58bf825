//! Directory scan that populates a `PatternIndex` and its matching
//! `PatternFileExtractor` from the `03_spatial_disaggregation` tree.
//! File names are parsed permissively; anything unrecognized is
//! ignored with a debug log, per the source-identification
//! conventions.

use std::path::Path;

use emap_core::country::CountryId;
use emap_core::pattern::{PatternIndex, PatternSourceKind};
use emap_core::pollutant::PollutantRegistry;
use emap_core::sector::{SectorId, SectorRegistry};

use crate::error::Result;
use crate::raster::{PatternFile, PatternFileExtractor};

fn parse_year_token(token: &str) -> Option<i32> {
    token.parse::<i32>().ok()
}

/// Parses `CAMS_emissions_REG-<ver>_<year>_<pollutant>_<sector>`.
fn parse_cams_name(stem: &str) -> Option<(i32, String, String)> {
    let rest = stem.strip_prefix("CAMS_emissions_REG-")?;
    let mut parts = rest.splitn(2, '_');
    let _version = parts.next()?;
    let rest = parts.next()?;
    let mut fields: Vec<&str> = rest.split('_').collect();
    if fields.len() < 3 {
        return None;
    }
    let sector = fields.pop()?.to_string();
    let pollutant = fields.pop()?.to_string();
    let year = parse_year_token(&fields.join("_"))?;
    Some((year, pollutant, sector))
}

/// Parses `<pollutant>_<sector>_<reportYear>_GRID_<year>`.
fn parse_ceip_name(stem: &str) -> Option<(i32, String, String)> {
    let fields: Vec<&str> = stem.split('_').collect();
    let grid_pos = fields.iter().position(|f| *f == "GRID")?;
    if grid_pos < 3 || grid_pos + 1 >= fields.len() {
        return None;
    }
    let pollutant = fields[0].to_string();
    let sector = fields[1..grid_pos - 1].join("_");
    let year = parse_year_token(fields[grid_pos + 1])?;
    Some((year, pollutant, sector))
}

/// Parses `<pollutant>[_...].xlsx`: the Flanders tables cover every
/// sector for a given pollutant, so unlike CAMS/CEIP the stem carries
/// no sector token.
fn parse_flanders_name(stem: &str) -> Option<String> {
    let pollutant = stem.split('_').next()?;
    if pollutant.is_empty() {
        return None;
    }
    Some(pollutant.to_string())
}

fn resolve_sector_code(sectors: &SectorRegistry, code: &str) -> Option<SectorId> {
    sectors
        .nfr_id_for_code(code)
        .map(SectorId::Nfr)
        .or_else(|| sectors.gnfr_id_for_code(code).map(SectorId::Gnfr))
}

/// Scans `root/{CAMS,CEIP}/<year>/*` for the `rest` (non-Belgian)
/// pattern library, plus `bef_root/<year>/*.xlsx` for Flanders' own
/// tables when `flanders` names a registered country. `start_year`
/// seeds the preferred-year search. The returned `u32` is the next
/// unused `PatternSourceId`, for a caller (e.g. the exceptions table
/// reader) that registers further sources against the same extractor.
pub fn scan(root: &Path, bef_root: &Path, start_year: i32, flanders: Option<CountryId>, sectors: &SectorRegistry, pollutants: &mut PollutantRegistry) -> Result<(PatternIndex, PatternFileExtractor, u32)> {
    let mut index = PatternIndex::new(start_year);
    let mut extractor = PatternFileExtractor::new();
    let mut next_id = 0u32;

    for (subdir, kind) in [("CAMS", PatternSourceKind::Cams), ("CEIP", PatternSourceKind::Ceip)] {
        let dir = root.join(subdir);
        let Ok(years) = std::fs::read_dir(&dir) else {
            continue;
        };

        for year_entry in years.flatten() {
            let Ok(year_dir) = year_entry.file_type().map(|t| t.is_dir()) else {
                continue;
            };
            if !year_dir {
                continue;
            }

            let Ok(files) = std::fs::read_dir(year_entry.path()) else {
                continue;
            };

            for file_entry in files.flatten() {
                let path = file_entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                let parsed = match kind {
                    PatternSourceKind::Cams => parse_cams_name(stem),
                    PatternSourceKind::Ceip => parse_ceip_name(stem),
                    _ => None,
                };

                let Some((year, pollutant_code, sector_code)) = parsed else {
                    log::debug!("ignoring unrecognized pattern file: {}", path.display());
                    continue;
                };

                let Some(sector) = resolve_sector_code(sectors, &sector_code) else {
                    log::debug!("ignoring pattern file with unknown sector code {sector_code}: {}", path.display());
                    continue;
                };

                let pollutant = pollutants.register(&pollutant_code);
                let source_id = emap_core::pattern::PatternSourceId(next_id);
                next_id += 1;

                let file = match path.extension().and_then(|e| e.to_str()) {
                    Some("tif") | Some("tiff") => PatternFile::GeoTiff(path.clone()),
                    _ => PatternFile::AsciiGrid(path.clone()),
                };

                extractor.register(source_id, kind, file);
                index.register(year, pollutant, sector, kind, source_id);
            }
        }
    }

    if let Some(flanders) = flanders {
        scan_flanders(bef_root, flanders, &mut index, &mut extractor, &mut next_id, pollutants);
    }

    Ok((index, extractor, next_id))
}

/// Scans `bef_root/<year>/*.xlsx`, registering every table against
/// `flanders` so they are searched in place of the shared "rest"
/// library whenever that country's pattern is resolved.
fn scan_flanders(bef_root: &Path, flanders: CountryId, index: &mut PatternIndex, extractor: &mut PatternFileExtractor, next_id: &mut u32, pollutants: &mut PollutantRegistry) {
    let Ok(years) = std::fs::read_dir(bef_root) else {
        return;
    };

    for year_entry in years.flatten() {
        let Ok(is_dir) = year_entry.file_type().map(|t| t.is_dir()) else {
            continue;
        };
        if !is_dir {
            continue;
        }
        let Some(year) = year_entry.file_name().to_str().and_then(parse_year_token) else {
            continue;
        };

        let Ok(files) = std::fs::read_dir(year_entry.path()) else {
            continue;
        };

        for file_entry in files.flatten() {
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xlsx") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(pollutant_code) = parse_flanders_name(stem) else {
                log::debug!("ignoring unrecognized Flanders pattern file: {}", path.display());
                continue;
            };

            let pollutant = pollutants.register(&pollutant_code);
            let source_id = emap_core::pattern::PatternSourceId(*next_id);
            *next_id += 1;

            extractor.register(source_id, PatternSourceKind::Flanders, PatternFile::FlandersTable(path.clone()));
            index.register_country_specific(flanders, year, pollutant, PatternSourceKind::Flanders, source_id);
        }
    }
}
