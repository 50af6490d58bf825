//! Country-coverage builder: for every country, the fraction of each
//! grid cell attributable to that country once neighboring countries
//! and sea are accounted for. Grounded on `cutout_country` in the
//! original's `gridprocessing.cpp`.

use geo_types::Polygon;
use rayon::prelude::*;

use crate::country::{CountryId, CountryRegistry};
use crate::geometry::{intersection_area, sum_intersection_area, Cell, Rect};
use crate::grid::GridMeta;
use crate::progress::ProgressSink;

/// Relative tolerance within which a cell is considered fully
/// contained in a country (no neighbor split needed).
const FULL_COVERAGE_RELATIVE_TOLERANCE: f64 = 1.0e-5;

/// Whether cells outside the compute extent but inside a country's
/// subgrid are retained (`AllCells`, used at the coarsest grid level
/// so mass outside the output extent is still tracked) or dropped
/// (`GridOnly`, used at finer levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageMode {
    AllCells,
    GridOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellInfo {
    pub cell: Cell,
    pub coverage: f64,
    /// Projected-coordinate extent of this cell, carried alongside the
    /// index so pattern extraction doesn't need a separate reference
    /// to the grid metadata.
    pub rect: Rect,
}

#[derive(Debug, Clone)]
pub struct CountryCoverage {
    pub country: CountryId,
    pub subgrid_origin: Cell,
    pub cells: Vec<CellInfo>,
}

impl CountryCoverage {
    pub fn total_coverage(&self) -> f64 {
        self.cells.iter().map(|c| c.coverage).sum()
    }
}

/// A country polygon, keyed by its registry id, in the same projected
/// CRS as the target grid.
pub struct CountryGeometry {
    pub country: CountryId,
    pub polygon: Polygon<f64>,
}

/// Exterior plus interior-ring point count, used to schedule the
/// heaviest polygons first so the parallel pass isn't left waiting on
/// one straggler while cheap ones sit idle.
fn polygon_complexity(polygon: &Polygon<f64>) -> usize {
    use geo::CoordsIter;
    polygon.exterior().coords_count() + polygon.interiors().iter().map(|ring| ring.coords_count()).sum::<usize>()
}

/// Builds per-country coverage tables for `grid`. `mode` controls
/// whether cells outside `compute_extent` are retained. Countries are
/// processed in parallel, scheduled by descending geometric complexity
/// so the most expensive polygons start first.
pub fn build(
    grid: &GridMeta,
    compute_extent: &Rect,
    countries: &[CountryGeometry],
    mode: CoverageMode,
    progress: &dyn ProgressSink,
) -> crate::error::Result<Vec<CountryCoverage>> {
    let mut order: Vec<usize> = (0..countries.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(polygon_complexity(&countries[i].polygon)));

    let built: Vec<Option<CountryCoverage>> = order
        .into_par_iter()
        .map(|i| build_one(grid, compute_extent, countries, &countries[i], mode, progress))
        .collect::<crate::error::Result<Vec<_>>>()?;

    Ok(built.into_iter().flatten().collect())
}

fn build_one(
    grid: &GridMeta,
    compute_extent: &Rect,
    countries: &[CountryGeometry],
    geom: &CountryGeometry,
    mode: CoverageMode,
    progress: &dyn ProgressSink,
) -> crate::error::Result<Option<CountryCoverage>> {
    let envelope = polygon_envelope(&geom.polygon);
    let Some(bounds) = grid.subgrid_for_extent(&envelope) else {
        return Ok(None);
    };

    let mut cells = Vec::new();
    for row in bounds.row_start..bounds.row_start + bounds.rows {
        for col in bounds.col_start..bounds.col_start + bounds.cols {
            progress.check_cancelled()?;

            let cell = Cell::from_row_col(row, col);
            let cell_rect = grid.cell_rect(cell);

            if mode == CoverageMode::GridOnly && !cell_rect.intersects(compute_extent) {
                continue;
            }

            let cell_area = cell_rect.area();
            if cell_area <= 0.0 {
                continue;
            }

            let cell_polygon: Polygon<f64> = cell_rect.into();
            let overlap_area = intersection_area(&cell_polygon, &geom.polygon);
            if overlap_area <= 0.0 {
                continue;
            }

            let coverage = if ((overlap_area - cell_area) / cell_area).abs() < FULL_COVERAGE_RELATIVE_TOLERANCE {
                1.0
            } else {
                let neighbor_overlaps = sum_intersection_area(
                    &cell_polygon,
                    countries.iter().filter(|other| other.country != geom.country).map(|other| &other.polygon),
                );

                if neighbor_overlaps <= 0.0 {
                    1.0
                } else {
                    overlap_area / (overlap_area + neighbor_overlaps)
                }
            };

            cells.push(CellInfo { cell, coverage, rect: cell_rect });
        }
    }

    if cells.is_empty() {
        return Ok(None);
    }

    Ok(Some(CountryCoverage {
        country: geom.country,
        subgrid_origin: Cell::from_row_col(bounds.row_start, bounds.col_start),
        cells,
    }))
}

fn polygon_envelope(polygon: &Polygon<f64>) -> Rect {
    use geo::BoundingRect;
    let bbox = polygon.bounding_rect().expect("country polygon must be non-empty");
    Rect::from_xy_size(bbox.min().x, bbox.min().y, bbox.width(), bbox.height())
}
