//! Axis-aligned rectangle used for grid cell extents, adapted from the
//! teacher's generic `Rect<T>` but narrowed to `f64` since every
//! geometry operation here ends up going through `geo`/`geo-types`.

use geo_types::Point;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    top_left: Point<f64>,
    bottom_right: Point<f64>,
}

impl Rect {
    pub fn from_nw_se(top_left: Point<f64>, bottom_right: Point<f64>) -> Self {
        Self { top_left, bottom_right }
    }

    pub fn from_xy_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            top_left: Point::new(x, y + height),
            bottom_right: Point::new(x + width, y),
        }
    }

    pub fn top_left(&self) -> Point<f64> {
        self.top_left
    }

    pub fn top_right(&self) -> Point<f64> {
        Point::new(self.bottom_right.x(), self.top_left.y())
    }

    pub fn bottom_left(&self) -> Point<f64> {
        Point::new(self.top_left.x(), self.bottom_right.y())
    }

    pub fn bottom_right(&self) -> Point<f64> {
        self.bottom_right
    }

    pub fn width(&self) -> f64 {
        (self.bottom_right.x() - self.top_left.x()).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.top_left.y() - self.bottom_right.y()).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.top_left.x() < other.bottom_right.x()
            && self.bottom_right.x() > other.top_left.x()
            && self.top_left.y() > other.bottom_right.y()
            && self.bottom_right.y() < other.top_left.y()
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        if !self.intersects(other) {
            return Rect::from_xy_size(0.0, 0.0, 0.0, 0.0);
        }

        let top_left = Point::new(self.top_left.x().max(other.top_left.x()), self.top_left.y().min(other.top_left.y()));
        let bottom_right = Point::new(
            self.bottom_right.x().min(other.bottom_right.x()),
            self.bottom_right.y().max(other.bottom_right.y()),
        );

        Rect::from_nw_se(top_left, bottom_right)
    }
}

impl From<Rect> for geo_types::Polygon<f64> {
    fn from(rect: Rect) -> geo_types::Polygon<f64> {
        geo_types::Polygon::new(
            geo_types::LineString::from(vec![
                rect.top_left(),
                rect.top_right(),
                rect.bottom_right(),
                rect.bottom_left(),
                rect.top_left(),
            ]),
            Vec::default(),
        )
    }
}
