//! The output-builder interface the core consumes. Concrete wire
//! formats (BRN-style, DAT-style) are collaborator-owned and live in
//! `emap-io`; core only needs the contract.

use crate::emissions::{Coordinate, EmissionEntry};
use crate::error::Result;
use crate::ids::EmissionKey;
use crate::pollutant::PollutantId;

/// Whether a flush starts a fresh output file/sheet or appends to one
/// already opened for this run (coarsest grid level creates, finer
/// levels append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Append,
}

/// Implemented once per output wire format. The core is agnostic to
/// the exact format; it only requires that writing is idempotent
/// given identical input order and content.
pub trait OutputBuilder {
    fn add_point_output_entry(&mut self, entry: &EmissionEntry) -> Result<()>;

    fn add_diffuse_output_entry(&mut self, key: EmissionKey, cell_location: Coordinate, amount: f64, cell_size_meters: f64) -> Result<()>;

    fn flush_pollutant(&mut self, pollutant: PollutantId, mode: WriteMode) -> Result<()>;

    fn flush(&mut self, mode: WriteMode) -> Result<()>;
}
