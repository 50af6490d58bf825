//! Emission collector: accumulates per-cell diffuse rasters across
//! countries and sectors that map to the same output-sector name, and
//! forwards point sources straight to the output builder.

use std::collections::HashMap;

use crate::country::CountryId;
use crate::geometry::Cell;
use crate::grid::GridMeta;
use crate::output::{OutputBuilder, WriteMode};
use crate::pollutant::PollutantId;
use crate::sector::SectorId;
use crate::{emissions::EmissionEntry, error::Result, ids::EmissionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AggregateKey {
    country: CountryId,
    output_sector: SectorId,
    pollutant: PollutantId,
}

pub struct EmissionCollector<'a> {
    output: &'a mut dyn OutputBuilder,
    aggregates: HashMap<AggregateKey, HashMap<Cell, f64>>,
}

impl<'a> EmissionCollector<'a> {
    pub fn new(output: &'a mut dyn OutputBuilder) -> Self {
        Self {
            output,
            aggregates: HashMap::new(),
        }
    }

    /// Accumulates a country's already-clipped diffuse raster
    /// (`cells`, aligned `(Cell, amount)` pairs) into the aggregate
    /// for `output_sector`, and forwards `points` to the output
    /// builder unchanged.
    pub fn add_emissions(
        &mut self,
        country: CountryId,
        output_sector: SectorId,
        pollutant: PollutantId,
        cells: &[(Cell, f64)],
        points: &[EmissionEntry],
    ) -> Result<()> {
        let key = AggregateKey {
            country,
            output_sector,
            pollutant,
        };
        let map = self.aggregates.entry(key).or_default();
        for &(cell, amount) in cells {
            if amount.is_nan() {
                continue;
            }
            *map.entry(cell).or_insert(0.0) += amount;
        }

        for point in points {
            self.output.add_point_output_entry(point)?;
        }

        Ok(())
    }

    /// Drains every aggregate for `pollutant` into the output builder
    /// and clears them, keyed by `(country, output_sector, pollutant)`.
    pub fn flush_pollutant(&mut self, pollutant: PollutantId, grid: &GridMeta, mode: WriteMode) -> Result<()> {
        let keys: Vec<AggregateKey> = self.aggregates.keys().filter(|k| k.pollutant == pollutant).copied().collect();

        for key in keys {
            if let Some(cells) = self.aggregates.remove(&key) {
                for (cell, amount) in cells {
                    let center = cell_center(grid, cell);
                    let emission_key = EmissionKey::new(key.country, key.output_sector, key.pollutant);
                    self.output.add_diffuse_output_entry(emission_key, center, amount, grid.cell_area().sqrt())?;
                }
            }
        }

        self.output.flush_pollutant(pollutant, mode)
    }

    pub fn final_flush(&mut self, mode: WriteMode) -> Result<()> {
        self.output.flush(mode)
    }
}

fn cell_center(grid: &GridMeta, cell: Cell) -> crate::emissions::Coordinate {
    let rect = grid.cell_rect(cell);
    crate::emissions::Coordinate {
        x: (rect.top_left().x() + rect.bottom_right().x()) / 2.0,
        y: (rect.top_left().y() + rect.bottom_right().y()) / 2.0,
    }
}
