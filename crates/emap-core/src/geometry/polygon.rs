//! Polygon intersection-area helpers backing the country-coverage
//! builder. Uses `geo`'s pure-Rust boolean ops rather than the
//! teacher's GDAL/GEOS vector stack, since this exercise never links
//! a system geometry library.

use geo::{BooleanOps, Area};
use geo_types::{MultiPolygon, Polygon};

/// Coordinates are snapped to this resolution before any boolean op so
/// that summing many neighbor-overlap areas in different orders
/// produces bit-identical totals (grid and country data share the
/// same projected CRS, at metre resolution, so a micrometre snap loses
/// nothing meaningful).
const COORD_SCALE: f64 = 1.0e6;

pub fn snap(value: f64) -> f64 {
    (value * COORD_SCALE).round() / COORD_SCALE
}

pub fn snap_polygon(polygon: &Polygon<f64>) -> Polygon<f64> {
    let snap_ring = |ring: &geo_types::LineString<f64>| {
        geo_types::LineString::from(ring.coords().map(|c| geo_types::Coord { x: snap(c.x), y: snap(c.y) }).collect::<Vec<_>>())
    };

    Polygon::new(
        snap_ring(polygon.exterior()),
        polygon.interiors().iter().map(snap_ring).collect(),
    )
}

/// Area of the geometric intersection of two polygons.
pub fn intersection_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    let a = snap_polygon(a);
    let b = snap_polygon(b);
    let clipped: MultiPolygon<f64> = a.intersection(&b);
    clipped.unsigned_area()
}

/// Area of the intersection of a polygon with a set of other
/// polygons, counting overlaps with each separately (used for the
/// `neighborOverlaps` sum in the coverage builder, which deliberately
/// does not dissolve overlapping country polygons first).
pub fn sum_intersection_area<'a>(subject: &Polygon<f64>, others: impl Iterator<Item = &'a Polygon<f64>>) -> f64 {
    others.map(|other| intersection_area(subject, other)).sum()
}
