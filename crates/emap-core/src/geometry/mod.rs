//! Geometry kernel: rectangles, grid cell addressing, and polygon
//! intersection-area math shared by the coverage builder and grid
//! cascade.

mod cell;
mod polygon;
mod rect;

pub use cell::{Cell, CellIterator};
pub use polygon::{intersection_area, snap, snap_polygon, sum_intersection_area};
pub use rect::Rect;
