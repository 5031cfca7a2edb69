use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Vector};
use crate::transform::Trans;

use super::RepetitionInfo;

/// A regular grid of `rows × cols` offsets spanned by two basis vectors.
///
/// Offset `i` sits at `offset_row * (i / cols) + offset_col * (i % cols)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub rows: u32,
    pub cols: u32,
    pub offset_row: Vector,
    pub offset_col: Vector,
}

/// Closed integer interval, possibly empty (`lo > hi`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    lo: i128,
    hi: i128,
}

impl Span {
    fn new(lo: i128, hi: i128) -> Self {
        Self { lo, hi }
    }

    fn all() -> Self {
        Self::new(i128::MIN, i128::MAX)
    }

    fn none() -> Self {
        Self::new(1, 0)
    }

    fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    fn clamp(self, other: Span) -> Span {
        Span::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    /// All integers `t` with `a <= b * t <= c`.
    fn solve(a: i128, b: i128, c: i128) -> Span {
        if b == 0 {
            return if a <= 0 && 0 <= c { Span::all() } else { Span::none() };
        }
        let (a, b, c) = if b < 0 { (-c, -b, -a) } else { (a, b, c) };
        Span::new(ceil_div(a, b), floor_div(c, b))
    }
}

fn floor_div(n: i128, d: i128) -> i128 {
    n.div_euclid(d)
}

fn ceil_div(n: i128, d: i128) -> i128 {
    -(-n).div_euclid(d)
}

impl ArrayInfo {
    pub fn new(rows: u32, cols: u32, offset_row: Vector, offset_col: Vector) -> Self {
        Self {
            rows,
            cols,
            offset_row,
            offset_col,
        }
    }

    fn at(&self, row: u32, col: u32) -> Vector {
        self.offset_row.scaled(row as i32) + self.offset_col.scaled(col as i32)
    }

    /// Candidate rows for `region`, ignoring the column bound.
    fn row_span(&self, region: &Rect) -> Span {
        let (x0, x1) = (region.left() as i128, region.right() as i128);
        let (y0, y1) = (region.bottom() as i128, region.top() as i128);
        let (rx, ry) = (self.offset_row.x as i128, self.offset_row.y as i128);
        let (cx, cy) = (self.offset_col.x as i128, self.offset_col.y as i128);

        let mut span = Span::new(0, self.rows as i128 - 1);
        if cx == 0 {
            span = span.clamp(Span::solve(x0, rx, x1));
        }
        if cy == 0 {
            span = span.clamp(Span::solve(y0, ry, y1));
        }
        if cx != 0 && cy != 0 {
            // Flip axes so both column components are positive, then require the
            // x- and y-feasible column ranges to overlap (real-valued).
            let (x0, x1, rx, cx) = if cx < 0 { (-x1, -x0, -rx, -cx) } else { (x0, x1, rx, cx) };
            let (y0, y1, ry, cy) = if cy < 0 { (-y1, -y0, -ry, -cy) } else { (y0, y1, ry, cy) };
            let cross = cx * ry - cy * rx;
            span = span.clamp(Span::solve(cx * y0 - cy * x1, cross, cx * y1 - cy * x0));
        }
        span
    }

    /// Columns of `row` whose offset lies in `region`.
    fn col_span(&self, row: i128, region: &Rect) -> Span {
        let (rx, ry) = (self.offset_row.x as i128, self.offset_row.y as i128);
        let (cx, cy) = (self.offset_col.x as i128, self.offset_col.y as i128);
        let bx = row * rx;
        let by = row * ry;
        Span::new(0, self.cols as i128 - 1)
            .clamp(Span::solve(region.left() as i128 - bx, cx, region.right() as i128 - bx))
            .clamp(Span::solve(region.bottom() as i128 - by, cy, region.top() as i128 - by))
    }

    fn for_each_in(&self, region: &Rect, mut f: impl FnMut(u32, u32) -> bool) {
        if self.rows == 0 || self.cols == 0 {
            return;
        }
        let rows = self.row_span(region);
        if rows.is_empty() {
            return;
        }
        for row in rows.lo..=rows.hi {
            let cols = self.col_span(row, region);
            if cols.is_empty() {
                continue;
            }
            for col in cols.lo..=cols.hi {
                if !f(row as u32, col as u32) {
                    return;
                }
            }
        }
    }
}

impl RepetitionInfo for ArrayInfo {
    fn size(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    fn offset(&self, index: usize) -> Vector {
        if index >= self.size() {
            return Point::zero();
        }
        let cols = self.cols as usize;
        self.at((index / cols) as u32, (index % cols) as u32)
    }

    fn bounding_box(&self) -> Rect {
        if self.size() == 0 {
            return Rect::empty();
        }
        let (r, c) = (self.rows - 1, self.cols - 1);
        Rect::from_points(&[self.at(0, 0), self.at(r, 0), self.at(0, c), self.at(r, c)])
    }

    fn region_query(&self, region: &Rect) -> Vec<Vector> {
        let mut out = Vec::new();
        self.for_each_in(region, |row, col| {
            out.push(self.at(row, col));
            true
        });
        out
    }

    fn has_offset_in(&self, region: &Rect) -> bool {
        let mut found = false;
        self.for_each_in(region, |_, _| {
            found = true;
            false
        });
        found
    }

    fn offsets(&self) -> Vec<Vector> {
        (0..self.rows)
            .flat_map(|r| (0..self.cols).map(move |c| (r, c)))
            .map(|(r, c)| self.at(r, c))
            .collect()
    }
}

impl ArrayInfo {
    pub fn transformed_without_translation(&self, trans: &Trans) -> ArrayInfo {
        ArrayInfo::new(
            self.rows,
            self.cols,
            trans.apply_vector(self.offset_row),
            trans.apply_vector(self.offset_col),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DPoint;
    use crate::transform::{FullTrans, Rotation};

    fn brute(array: &ArrayInfo, region: &Rect) -> Vec<Vector> {
        let mut v: Vec<Vector> = array.offsets().into_iter().filter(|p| region.contains_point(p)).collect();
        v.sort();
        v
    }

    fn query(array: &ArrayInfo, region: &Rect) -> Vec<Vector> {
        let mut v = array.region_query(region);
        v.sort();
        v
    }

    #[test]
    fn test_offset_and_size() {
        let a = ArrayInfo::new(3, 4, Point::new(0, 10), Point::new(5, 0));
        assert_eq!(a.size(), 12);
        assert_eq!(a.offset(0), Point::new(0, 0));
        assert_eq!(a.offset(5), Point::new(5, 10));
        assert_eq!(a.offset(11), Point::new(15, 20));
        assert_eq!(a.offset(12), Point::zero());
    }

    #[test]
    fn test_bounding_box_from_corners() {
        let a = ArrayInfo::new(3, 3, Point::new(0, 10), Point::new(10, 0));
        let bb = a.bounding_box();
        assert_eq!(bb.bottom_left, Point::new(0, 0));
        assert_eq!(bb.top_right, Point::new(20, 20));

        let skew = ArrayInfo::new(2, 2, Point::new(-3, 7), Point::new(4, -2));
        let bb = skew.bounding_box();
        assert_eq!(bb.bottom_left, Point::new(-3, -2));
        assert_eq!(bb.top_right, Point::new(4, 7));
    }

    #[test]
    fn test_region_query_axis_aligned() {
        let a = ArrayInfo::new(100, 100, Point::new(0, 10), Point::new(10, 0));
        let region = Rect::new(15, 15, 40, 30);
        let got = query(&a, &region);
        assert_eq!(got, brute(&a, &region));
        assert_eq!(got.len(), 3 * 2);
    }

    #[test]
    fn test_region_query_skewed_matches_enumeration() {
        let arrays = [
            ArrayInfo::new(17, 13, Point::new(3, 11), Point::new(7, -2)),
            ArrayInfo::new(9, 21, Point::new(-5, 4), Point::new(6, 6)),
            ArrayInfo::new(12, 12, Point::new(0, -8), Point::new(-9, 0)),
            ArrayInfo::new(10, 10, Point::new(4, 2), Point::new(8, 4)),
            ArrayInfo::new(8, 5, Point::new(0, 0), Point::new(3, 1)),
        ];
        let regions = [
            Rect::new(0, 0, 30, 30),
            Rect::new(-40, -20, 10, 60),
            Rect::new(11, -7, 12, 90),
            Rect::new(-100, -100, 100, 100),
            Rect::new(5, 5, 5, 5),
        ];
        for a in &arrays {
            for r in &regions {
                assert_eq!(query(a, r), brute(a, r), "{a:?} in {r:?}");
                assert_eq!(a.has_offset_in(r), !brute(a, r).is_empty());
            }
        }
    }

    #[test]
    fn test_transform_rotates_basis() {
        let a = ArrayInfo::new(2, 3, Point::new(0, 10), Point::new(5, 0));
        let t = Trans::Full(FullTrans::new(DPoint::new(100.0, 100.0), Rotation::R90, 1.0));
        let b = a.transformed_without_translation(&t);
        assert_eq!(b.offset_row, Point::new(-10, 0));
        assert_eq!(b.offset_col, Point::new(0, 5));
        assert_eq!(b.size(), 6);
    }
}
