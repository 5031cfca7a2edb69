use serde::{Deserialize, Serialize};

/// A 2D point in database units. Also used as a displacement vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Displacement between two points.
pub type Vector = Point;

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Component-wise addition, saturating at the i32 range.
    pub fn saturating_add(self, other: Point) -> Point {
        Point::new(self.x.saturating_add(other.x), self.y.saturating_add(other.y))
    }

    /// Component-wise subtraction, saturating at the i32 range.
    pub fn saturating_sub(self, other: Point) -> Point {
        Point::new(self.x.saturating_sub(other.x), self.y.saturating_sub(other.y))
    }

    pub fn scaled(self, factor: i32) -> Point {
        Point::new(self.x.saturating_mul(factor), self.y.saturating_mul(factor))
    }

    pub fn to_dpoint(self) -> DPoint {
        DPoint::new(self.x as f64, self.y as f64)
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        self.saturating_sub(rhs)
    }
}

impl std::ops::Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(self.x.saturating_neg(), self.y.saturating_neg())
    }
}

/// A point with real coordinates, used for transform translations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DPoint {
    pub x: f64,
    pub y: f64,
}

impl DPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Round half away from zero and clamp into the integer coordinate range.
    pub fn round(self) -> Point {
        Point::new(round_coord(self.x), round_coord(self.y))
    }
}

/// Round half away from zero, saturating into i32.
pub fn round_coord(v: f64) -> i32 {
    // `as` saturates for floats, NaN becomes 0
    v.round() as i32
}

/// Axis-aligned box defined by its bottom-left and top-right corners.
///
/// A box with `left >= right` or `bottom >= top` is empty. Empty boxes carry no
/// area and are skipped by [`Rect::union`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub bottom_left: Point,
    pub top_right: Point,
}

impl Default for Rect {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rect {
    /// Build a box from two arbitrary corners.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            bottom_left: Point::new(x1.min(x2), y1.min(y2)),
            top_right: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    /// The canonical empty box.
    pub const fn empty() -> Self {
        Self {
            bottom_left: Point::new(0, 0),
            top_right: Point::new(0, 0),
        }
    }

    /// The smallest box holding every point, or the empty box for no points.
    pub fn from_points<'a, I: IntoIterator<Item = &'a Point>>(points: I) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::empty();
        };
        let (mut min, mut max) = (*first, *first);
        for p in iter {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Self {
            bottom_left: min,
            top_right: max,
        }
    }

    pub fn left(&self) -> i32 {
        self.bottom_left.x
    }

    pub fn bottom(&self) -> i32 {
        self.bottom_left.y
    }

    pub fn right(&self) -> i32 {
        self.top_right.x
    }

    pub fn top(&self) -> i32 {
        self.top_right.y
    }

    pub fn is_empty(&self) -> bool {
        self.left() >= self.right() || self.bottom() >= self.top()
    }

    pub fn width(&self) -> i64 {
        self.right() as i64 - self.left() as i64
    }

    pub fn height(&self) -> i64 {
        self.top() as i64 - self.bottom() as i64
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() * self.height()
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            ((self.left() as i64 + self.right() as i64) / 2) as i32,
            ((self.bottom() as i64 + self.top() as i64) / 2) as i32,
        )
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.bottom() && p.y <= self.top()
    }

    /// Whether `other` lies inside this box, edges included.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.right() <= self.right()
            && other.bottom() >= self.bottom()
            && other.top() <= self.top()
    }

    /// Whether the two boxes share at least one point, edges included.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left() <= other.right()
            && self.right() >= other.left()
            && self.bottom() <= other.top()
            && self.top() >= other.bottom()
    }

    /// Union of two boxes. An empty operand does not contribute.
    pub fn union(&self, other: &Rect) -> Rect {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        Rect {
            bottom_left: Point::new(self.left().min(other.left()), self.bottom().min(other.bottom())),
            top_right: Point::new(self.right().max(other.right()), self.top().max(other.top())),
        }
    }

    /// Overlap of two boxes, or the empty box when they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let r = Rect {
            bottom_left: Point::new(self.left().max(other.left()), self.bottom().max(other.bottom())),
            top_right: Point::new(self.right().min(other.right()), self.top().min(other.top())),
        };
        if r.left() > r.right() || r.bottom() > r.top() {
            Rect::empty()
        } else {
            r
        }
    }

    pub fn translated(&self, v: Vector) -> Rect {
        Rect {
            bottom_left: self.bottom_left + v,
            top_right: self.top_right + v,
        }
    }

    /// Grow by `d` on every side.
    pub fn enlarged(&self, d: i32) -> Rect {
        Rect::new(
            self.left().saturating_sub(d),
            self.bottom().saturating_sub(d),
            self.right().saturating_add(d),
            self.top().saturating_add(d),
        )
    }

    /// The four corners, counter-clockwise from bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            self.bottom_left,
            Point::new(self.right(), self.bottom()),
            self.top_right,
            Point::new(self.left(), self.top()),
        ]
    }
}

/// A simple polygon defined by its vertices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    pub fn bbox(&self) -> Rect {
        Rect::from_points(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Absolute area via the shoelace formula.
    pub fn area(&self) -> i64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0;
        }
        let mut twice = 0i128;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            twice += a.x as i128 * b.y as i128 - b.x as i128 * a.y as i128;
        }
        (twice.abs() / 2) as i64
    }

    pub fn translated(&self, v: Vector) -> Polygon {
        Polygon::new(self.vertices.iter().map(|p| *p + v).collect())
    }

    /// The polygon moved so that its first vertex sits at the origin, plus that vertex.
    pub fn normalized(&self) -> (Point, Polygon) {
        let origin = self.vertices.first().copied().unwrap_or_default();
        (origin, self.translated(-origin))
    }
}

impl From<Rect> for Polygon {
    fn from(r: Rect) -> Self {
        Polygon::new(r.corners().to_vec())
    }
}

/// A wire defined by a centre line and a width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub points: Vec<Point>,
    pub width: u32,
}

impl Path {
    pub fn new(points: Vec<Point>, width: u32) -> Self {
        Self { points, width }
    }

    /// Centre-line box widened by half the width on every side. This also
    /// covers the ends, so it can be larger than [`Path::to_polygon`], whose
    /// ends are flush.
    pub fn bbox(&self) -> Rect {
        if self.points.is_empty() {
            return Rect::empty();
        }
        Rect::from_points(&self.points).enlarged(self.half_width())
    }

    fn half_width(&self) -> i32 {
        (self.width / 2).min(i32::MAX as u32) as i32
    }

    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| {
                let dx = w[1].x as f64 - w[0].x as f64;
                let dy = w[1].y as f64 - w[0].y as f64;
                (dx * dx + dy * dy).sqrt()
            })
            .sum()
    }

    pub fn area(&self) -> i64 {
        (self.length() * self.width as f64).round() as i64
    }

    /// Outline of the path as one polygon.
    ///
    /// Each segment is widened perpendicular to its direction; the outline walks
    /// down the left side and back up the right side. Ends are flush.
    pub fn to_polygon(&self) -> Polygon {
        if self.points.len() < 2 || self.width == 0 {
            return Polygon::new(Vec::new());
        }
        let hw = self.width as f64 / 2.0;
        let mut left = Vec::with_capacity(self.points.len());
        let mut right = Vec::with_capacity(self.points.len());
        let dirs: Vec<(f64, f64)> = self
            .points
            .windows(2)
            .map(|w| {
                let dx = w[1].x as f64 - w[0].x as f64;
                let dy = w[1].y as f64 - w[0].y as f64;
                let len = (dx * dx + dy * dy).sqrt();
                if len == 0.0 {
                    (0.0, 0.0)
                } else {
                    (dx / len, dy / len)
                }
            })
            .collect();
        for (i, p) in self.points.iter().enumerate() {
            let d_in = if i == 0 { dirs[0] } else { dirs[i - 1] };
            let d_out = if i == dirs.len() { dirs[i - 1] } else { dirs[i] };
            // Miter offset: bisector of the two normals scaled to keep the half width.
            let nx = -(d_in.1 + d_out.1);
            let ny = d_in.0 + d_out.0;
            let dot = 1.0 + d_in.0 * d_out.0 + d_in.1 * d_out.1;
            let (ox, oy) = if dot.abs() < 1e-9 {
                (-d_in.1 * hw, d_in.0 * hw)
            } else {
                (nx * hw / dot, ny * hw / dot)
            };
            let (px, py) = (p.x as f64, p.y as f64);
            left.push(DPoint::new(px + ox, py + oy).round());
            right.push(DPoint::new(px - ox, py - oy).round());
        }
        right.reverse();
        left.extend(right);
        Polygon::new(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_empty() {
        assert!(Rect::empty().is_empty());
        assert!(Rect::new(0, 0, 0, 10).is_empty());
        assert!(!Rect::new(0, 0, 1, 1).is_empty());
        assert_eq!(Rect::new(0, 0, 10, 0).area(), 0);
    }

    #[test]
    fn test_rect_union_skips_empty() {
        let a = Rect::new(5, 5, 10, 10);
        let degenerate = Rect::new(-100, -100, -100, 50);
        assert_eq!(a.union(&degenerate), a);
        assert_eq!(degenerate.union(&a), a);
        assert_eq!(a.union(&Rect::new(0, 0, 1, 1)), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn test_rect_intersection_inclusive() {
        let a = Rect::new(0, 0, 10, 10);
        let touching = Rect::new(10, 10, 20, 20);
        let apart = Rect::new(11, 0, 20, 10);
        assert!(a.intersects(&touching));
        assert!(!a.intersects(&apart));
        assert!(a.contains(&Rect::new(0, 0, 10, 10)));
        assert!(!a.contains(&Rect::new(0, 0, 11, 10)));
        assert_eq!(a.intersection(&Rect::new(5, 5, 15, 15)), Rect::new(5, 5, 10, 10));
    }

    #[test]
    fn test_point_saturates() {
        let p = Point::new(i32::MAX, i32::MIN);
        assert_eq!(p + Point::new(1, 0), Point::new(i32::MAX, i32::MIN));
        assert_eq!(p - Point::new(0, 1), Point::new(i32::MAX, i32::MIN));
    }

    #[test]
    fn test_polygon_area() {
        let tri = Polygon::new(vec![Point::new(0, 0), Point::new(10, 0), Point::new(0, 10)]);
        assert_eq!(tri.area(), 50);
        let sq: Polygon = Rect::new(0, 0, 4, 5).into();
        assert_eq!(sq.area(), 20);
        assert_eq!(sq.bbox(), Rect::new(0, 0, 4, 5));
    }

    #[test]
    fn test_path_outline() {
        let path = Path::new(vec![Point::new(0, 0), Point::new(100, 0)], 10);
        assert_eq!(path.bbox(), Rect::new(-5, -5, 105, 5));
        let outline = path.to_polygon();
        assert_eq!(outline.bbox(), Rect::new(0, -5, 100, 5));
        assert!(path.bbox().contains(&outline.bbox()));
        assert_eq!(outline.area(), 1000);
        assert_eq!(path.area(), 1000);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_coord(2.5), 3);
        assert_eq!(round_coord(-2.5), -3);
        assert_eq!(round_coord(1e20), i32::MAX);
    }
}
