use serde::{Deserialize, Serialize};

use crate::geometry::{DPoint, Point, Rect, Vector};

/// Counter-clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn quarter_turns(self) -> u8 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 1,
            Rotation::R180 => 2,
            Rotation::R270 => 3,
        }
    }

    pub fn from_quarter_turns(n: u8) -> Self {
        match n % 4 {
            0 => Rotation::R0,
            1 => Rotation::R90,
            2 => Rotation::R180,
            _ => Rotation::R270,
        }
    }

    /// Rotation by a multiple of 90 degrees; other angles are rejected.
    pub fn from_degrees(deg: i32) -> Option<Self> {
        if deg % 90 != 0 {
            return None;
        }
        Some(Self::from_quarter_turns(deg.rem_euclid(360).div_euclid(90) as u8))
    }

    /// Whether the rotation swaps the x and y axes.
    pub fn is_odd(self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    pub fn rotate(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Rotation::R0 => (x, y),
            Rotation::R90 => (-y, x),
            Rotation::R180 => (-x, -y),
            Rotation::R270 => (y, -x),
        }
    }

    pub fn rotate_point(self, p: Point) -> Point {
        match self {
            Rotation::R0 => p,
            Rotation::R90 => Point::new(p.y.saturating_neg(), p.x),
            Rotation::R180 => Point::new(p.x.saturating_neg(), p.y.saturating_neg()),
            Rotation::R270 => Point::new(p.y, p.x.saturating_neg()),
        }
    }
}

/// Translation-only transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleTrans {
    pub translation: Vector,
}

impl SimpleTrans {
    pub fn new(translation: Vector) -> Self {
        Self { translation }
    }

    pub fn apply(&self, p: Point) -> Point {
        p + self.translation
    }

    pub fn inverted(&self) -> Self {
        Self::new(-self.translation)
    }
}

/// Transform with rotation, mirroring and magnification.
///
/// A negative `magnification` mirrors about the X axis. Points are mirrored,
/// scaled by `|magnification|`, rotated and then translated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullTrans {
    pub translation: DPoint,
    pub rotation: Rotation,
    pub magnification: f64,
}

impl Default for FullTrans {
    fn default() -> Self {
        Self {
            translation: DPoint::default(),
            rotation: Rotation::R0,
            magnification: 1.0,
        }
    }
}

impl FullTrans {
    pub fn new(translation: DPoint, rotation: Rotation, magnification: f64) -> Self {
        Self {
            translation,
            rotation,
            magnification,
        }
    }

    pub fn with_mirror(translation: DPoint, rotation: Rotation, mirror: bool) -> Self {
        Self::new(translation, rotation, if mirror { -1.0 } else { 1.0 })
    }

    pub fn is_mirror(&self) -> bool {
        self.magnification < 0.0
    }

    pub fn magnitude(&self) -> f64 {
        self.magnification.abs()
    }

    /// Mirror, scale and rotate without translating.
    pub fn apply_linear(&self, x: f64, y: f64) -> (f64, f64) {
        let y = if self.is_mirror() { -y } else { y };
        let m = self.magnitude();
        self.rotation.rotate(x * m, y * m)
    }

    pub fn apply_d(&self, p: DPoint) -> DPoint {
        let (x, y) = self.apply_linear(p.x, p.y);
        DPoint::new(x + self.translation.x, y + self.translation.y)
    }

    pub fn apply(&self, p: Point) -> Point {
        self.apply_d(p.to_dpoint()).round()
    }

    /// Apply to a displacement: the translation is ignored.
    pub fn apply_vector(&self, v: Vector) -> Vector {
        let (x, y) = self.apply_linear(v.x as f64, v.y as f64);
        DPoint::new(x, y).round()
    }

    pub fn inverted(&self) -> Self {
        let rotation = if self.is_mirror() {
            self.rotation
        } else {
            Rotation::from_quarter_turns(4 - self.rotation.quarter_turns())
        };
        let linear = FullTrans::new(DPoint::default(), rotation, 1.0 / self.magnification);
        let (x, y) = linear.apply_linear(-self.translation.x, -self.translation.y);
        FullTrans::new(DPoint::new(x, y), rotation, linear.magnification)
    }
}

/// Either transform kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Trans {
    Simple(SimpleTrans),
    Full(FullTrans),
}

impl Default for Trans {
    fn default() -> Self {
        Trans::Simple(SimpleTrans::default())
    }
}

impl From<SimpleTrans> for Trans {
    fn from(t: SimpleTrans) -> Self {
        Trans::Simple(t)
    }
}

impl From<FullTrans> for Trans {
    fn from(t: FullTrans) -> Self {
        Trans::Full(t)
    }
}

impl Trans {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn translate(x: i32, y: i32) -> Self {
        Trans::Simple(SimpleTrans::new(Point::new(x, y)))
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, Trans::Simple(_))
    }

    pub fn is_identity(&self) -> bool {
        match self {
            Trans::Simple(t) => t.translation == Point::zero(),
            Trans::Full(t) => {
                t.translation == DPoint::default() && t.rotation == Rotation::R0 && t.magnification == 1.0
            }
        }
    }

    /// The translation, rounded when it is real-valued.
    pub fn translation(&self) -> Point {
        match self {
            Trans::Simple(t) => t.translation,
            Trans::Full(t) => t.translation.round(),
        }
    }

    pub fn rotation(&self) -> Rotation {
        match self {
            Trans::Simple(_) => Rotation::R0,
            Trans::Full(t) => t.rotation,
        }
    }

    pub fn magnification(&self) -> f64 {
        match self {
            Trans::Simple(_) => 1.0,
            Trans::Full(t) => t.magnification,
        }
    }

    pub fn to_full(&self) -> FullTrans {
        match self {
            Trans::Simple(t) => FullTrans::new(t.translation.to_dpoint(), Rotation::R0, 1.0),
            Trans::Full(t) => *t,
        }
    }

    /// This transform followed by an extra translation.
    pub fn offset_by(&self, v: Vector) -> Trans {
        match self {
            Trans::Simple(t) => Trans::Simple(SimpleTrans::new(t.translation + v)),
            Trans::Full(t) => {
                let mut t = *t;
                t.translation.x += v.x as f64;
                t.translation.y += v.y as f64;
                Trans::Full(t)
            }
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        match self {
            Trans::Simple(t) => t.apply(p),
            Trans::Full(t) => t.apply(p),
        }
    }

    pub fn apply_vector(&self, v: Vector) -> Vector {
        match self {
            Trans::Simple(_) => v,
            Trans::Full(t) => t.apply_vector(v),
        }
    }

    /// Transform a box by its two corners. Quarter-turn rotations keep it axis-aligned.
    pub fn apply_rect(&self, r: &Rect) -> Rect {
        match self {
            Trans::Simple(t) => r.translated(t.translation),
            Trans::Full(t) => Rect::from_corners(t.apply(r.bottom_left), t.apply(r.top_right)),
        }
    }

    /// `self ∘ inner`: the transform that applies `inner` first and then `self`.
    pub fn compose(&self, inner: &Trans) -> Trans {
        match (self, inner) {
            (Trans::Simple(a), Trans::Simple(b)) => {
                Trans::Simple(SimpleTrans::new(a.translation + b.translation))
            }
            (Trans::Simple(a), Trans::Full(b)) => {
                let mut t = *b;
                t.translation.x += a.translation.x as f64;
                t.translation.y += a.translation.y as f64;
                Trans::Full(t)
            }
            (Trans::Full(a), Trans::Simple(b)) => Trans::Full(FullTrans::new(
                a.apply_d(b.translation.to_dpoint()),
                a.rotation,
                a.magnification,
            )),
            (Trans::Full(a), Trans::Full(b)) => {
                let turns = if a.is_mirror() {
                    4 + a.rotation.quarter_turns() - b.rotation.quarter_turns()
                } else {
                    a.rotation.quarter_turns() + b.rotation.quarter_turns()
                };
                Trans::Full(FullTrans::new(
                    a.apply_d(b.translation),
                    Rotation::from_quarter_turns(turns),
                    a.magnification * b.magnification,
                ))
            }
        }
    }

    pub fn inverted(&self) -> Trans {
        match self {
            Trans::Simple(t) => Trans::Simple(t.inverted()),
            Trans::Full(t) => Trans::Full(t.inverted()),
        }
    }
}
