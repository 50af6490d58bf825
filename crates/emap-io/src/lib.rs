//! Collaborator-owned I/O: tabular input readers, raster pattern
//! extraction, pattern directory scanning, run configuration loading,
//! country geometry parsing, and the concrete output-builder wire
//! formats. `emap-core` stays agnostic to all of it.

pub mod config;
pub mod country_geometry;
pub mod error;
pub mod grids;
pub mod output;
pub mod pattern_scan;
pub mod raster;
pub mod summary;
pub mod tabular;

pub use error::{Error, Result};
