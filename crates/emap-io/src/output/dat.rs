//! DAT-style output: one file per pollutant, one row per
//! `(country, cell)` with a fixed column per output sector, plus a
//! shared header file naming the columns and a separate point-source
//! file. Adapted from the grid-output half of the original's Chimere
//! writer; simplified to a single output grid and textual country
//! codes rather than a numeric country-mapping table.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use emap_core::country::{CountryId, CountryRegistry};
use emap_core::emissions::{Coordinate, EmissionEntry};
use emap_core::geometry::Cell;
use emap_core::grid::GridMeta;
use emap_core::ids::EmissionKey;
use emap_core::output::{OutputBuilder, WriteMode};
use emap_core::pollutant::{PollutantId, PollutantRegistry};
use emap_core::sector::{SectorId, SectorRegistry};

struct PointRow {
    country: CountryId,
    coordinate: Coordinate,
    temperature: f64,
    height: f64,
    diameter: f64,
    flow: f64,
    amount: f64,
}

/// Accumulates diffuse emissions into `(country, cell) -> per-sector
/// column` rows for the pollutant currently being flushed, and point
/// sources into a flat list written once at `write_point_sources`.
pub struct DatOutputBuilder<'a> {
    output_dir: PathBuf,
    suffix: Option<String>,
    grid: GridMeta,
    countries: &'a CountryRegistry,
    pollutants: &'a PollutantRegistry,
    sectors: &'a SectorRegistry,
    gnfr_level: bool,
    sector_order: Vec<SectorId>,
    sector_index: HashMap<SectorId, usize>,
    diffuse: HashMap<(CountryId, Cell), Vec<f64>>,
    points: Vec<PointRow>,
    current_pollutant: Option<PollutantId>,
}

impl<'a> DatOutputBuilder<'a> {
    /// `gnfr_level` selects whether output columns are per-GNFR or
    /// per-NFR sector, matching `output.sector_level` in the run
    /// configuration; NFR-level entries roll up to their GNFR column
    /// when `gnfr_level` is set.
    pub fn new(output_dir: impl Into<PathBuf>, suffix: Option<String>, grid: GridMeta, countries: &'a CountryRegistry, pollutants: &'a PollutantRegistry, sectors: &'a SectorRegistry, gnfr_level: bool) -> Self {
        let sector_order: Vec<SectorId> = if gnfr_level {
            sectors.all_gnfr().map(SectorId::Gnfr).collect()
        } else {
            sectors.all_nfr().map(SectorId::Nfr).collect()
        };
        let sector_index = sector_order.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        Self {
            output_dir: output_dir.into(),
            suffix,
            grid,
            countries,
            pollutants,
            sectors,
            gnfr_level,
            sector_order,
            sector_index,
            diffuse: HashMap::new(),
            points: Vec::new(),
            current_pollutant: None,
        }
    }

    fn suffixed(&self, stem: &str) -> String {
        match &self.suffix {
            Some(suffix) => format!("{stem}{suffix}.dat"),
            None => format!("{stem}.dat"),
        }
    }

    pub fn write_header(&self) -> emap_core::Result<()> {
        std::fs::create_dir_all(&self.output_dir).map_err(emap_core::Error::Io)?;
        let mut file = File::create(self.output_dir.join("output_header.dat")).map_err(emap_core::Error::Io)?;
        let names: Vec<&str> = self.sector_order.iter().map(|&s| sector_code(self.sectors, s)).collect();
        writeln!(file, "country row col {}", names.join(" ")).map_err(emap_core::Error::Io)?;
        Ok(())
    }

    pub fn write_point_sources(&mut self) -> emap_core::Result<()> {
        if self.points.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.output_dir).map_err(emap_core::Error::Io)?;
        let path = self.output_dir.join(self.suffixed("output_pointsources"));
        let mut file = File::create(path).map_err(emap_core::Error::Io)?;
        writeln!(file, "Long\tLat\tCountry\ttemp\tHeight\tDiam\tFlow\tEmission").map_err(emap_core::Error::Io)?;
        for point in self.points.drain(..) {
            writeln!(
                file,
                "{:.4}\t{:.4}\t{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.6}",
                point.coordinate.x,
                point.coordinate.y,
                self.countries.code(point.country),
                point.temperature,
                point.height,
                point.diameter,
                point.flow,
                point.amount,
            )
            .map_err(emap_core::Error::Io)?;
        }
        Ok(())
    }
}

fn sector_code(sectors: &SectorRegistry, sector: SectorId) -> &str {
    match sector {
        SectorId::Nfr(id) => sectors.nfr_code(id),
        SectorId::Gnfr(id) => sectors.gnfr_code(id),
    }
}

impl<'a> OutputBuilder for DatOutputBuilder<'a> {
    fn add_point_output_entry(&mut self, entry: &EmissionEntry) -> emap_core::Result<()> {
        let coordinate = entry.coordinate.unwrap_or(Coordinate { x: 0.0, y: 0.0 });
        self.points.push(PointRow {
            country: entry.key.country,
            coordinate,
            temperature: entry.stack.temperature.unwrap_or(0.0),
            height: entry.stack.height.unwrap_or(0.0),
            diameter: entry.stack.diameter.unwrap_or(0.0),
            flow: entry.stack.flow.unwrap_or(0.0),
            amount: entry.amount_or_zero(),
        });
        Ok(())
    }

    fn add_diffuse_output_entry(&mut self, key: EmissionKey, cell_location: Coordinate, amount: f64, _cell_size_meters: f64) -> emap_core::Result<()> {
        if let Some(current) = self.current_pollutant {
            if current != key.pollutant && !self.diffuse.is_empty() {
                return Err(emap_core::Error::InvariantViolation(
                    "DAT output builder received entries for more than one pollutant between flushes".to_string(),
                ));
            }
        }
        self.current_pollutant = Some(key.pollutant);

        let Some(cell) = self.grid.cell_at(cell_location.x, cell_location.y) else {
            return Ok(());
        };
        let column_sector = if self.gnfr_level { self.sectors.to_gnfr(key.sector) } else { key.sector };
        let Some(&index) = self.sector_index.get(&column_sector) else {
            return Ok(());
        };

        let row = self.diffuse.entry((key.country, cell)).or_insert_with(|| vec![0.0; self.sector_order.len()]);
        row[index] += amount;
        Ok(())
    }

    fn flush_pollutant(&mut self, pollutant: PollutantId, _mode: WriteMode) -> emap_core::Result<()> {
        if self.diffuse.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.output_dir).map_err(emap_core::Error::Io)?;

        let mut rows: Vec<((CountryId, Cell), Vec<f64>)> = self.diffuse.drain().collect();
        rows.sort_by_key(|(key, _)| *key);

        let path = self.output_dir.join(self.suffixed(&format!("output_{}", self.pollutants.code(pollutant))));
        let mut file = File::create(path).map_err(emap_core::Error::Io)?;
        for ((country, cell), values) in rows {
            let columns: Vec<String> = values.iter().map(|v| format!("{v:.3e}")).collect();
            writeln!(file, "{}\t{}\t{}\t{}", self.countries.code(country), cell.row, cell.col, columns.join(" ")).map_err(emap_core::Error::Io)?;
        }

        self.current_pollutant = None;
        Ok(())
    }

    fn flush(&mut self, _mode: WriteMode) -> emap_core::Result<()> {
        self.write_point_sources()
    }
}
