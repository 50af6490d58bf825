//! Built-in named grid catalog and the coarse-to-fine cascades used by
//! a run. Grounded on `original_source/logic/griddefinition.cpp`'s
//! `s_gridData` table; CRS handling is dropped (coordinates are
//! consumed in whatever projected system the input tables already
//! use) since the core never reprojects.

use emap_core::grid::{GridDefinition, GridMeta};

/// Registers the grids this port actually cascades through: the
/// Flanders Vlops family (60 km -> 5 km -> 1 km -> 250 m) and the
/// Chimere continental families, each a single level. The original
/// table stores each grid's lower-left corner; `GridMeta::origin_y` is
/// the top-left corner instead, so each entry's Y origin here is
/// `yllcorner + rows * cellsize`.
pub fn built_in_catalog() -> GridDefinition {
    let mut catalog = GridDefinition::new();

    catalog.register("vlops60km", GridMeta::new(56, 52, -1_419_000.0, 1_880_000.0, 60_000.0, -60_000.0));
    catalog.register("vlops5km", GridMeta::new(120, 144, -219_000.0, 500_000.0, 5_000.0, -5_000.0));
    catalog.register("vlops1km", GridMeta::new(120, 260, 11_000.0, 260_000.0, 1_000.0, -1_000.0));
    catalog.register("vlops250m", GridMeta::new(480, 1040, 11_000.0, 260_000.0, 250.0, -250.0));

    catalog.register("chimere05deg", GridMeta::new(46, 67, -10.750, 57.75, 0.5, -0.5));
    catalog.register("chimere01deg", GridMeta::new(48, 111, -1.05, 53.55, 0.1, -0.1));
    catalog.register("chimere005deg_large", GridMeta::new(65, 121, 1.225, 51.925, 0.05, -0.05));
    catalog.register("chimere005deg_small", GridMeta::new(53, 103, 2.125, 51.625, 0.05, -0.05));
    catalog.register("chimere0025deg", GridMeta::new(117, 206, 2.1125, 51.9125, 0.025, -0.025));

    catalog
}

/// The coarse-to-fine cascade a named `model.grid` config value maps
/// to. `flanders` cascades through the full Vlops family; continental
/// Chimere grids run as a single level (no nested refinement).
pub fn cascade_for(catalog: &GridDefinition, model_grid: &str) -> Option<Vec<GridMeta>> {
    match model_grid.to_ascii_lowercase().as_str() {
        "flanders" => ["vlops60km", "vlops5km", "vlops1km", "vlops250m"].iter().map(|name| catalog.get(name)).collect(),
        other => catalog.get(other).map(|meta| vec![meta]),
    }
}
