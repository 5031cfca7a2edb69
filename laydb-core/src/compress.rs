//! Grouping of offset vectors into arrays and offset lists.
//!
//! A [`Compressor`] takes the placement offsets of identical shapes (or cell
//! instances) and finds regular structure in them: runs of equally spaced
//! offsets along a line, stacks of identical runs forming 2D arrays, and long
//! lines of arbitrary spacing. Whatever is left is either returned as plain
//! offsets or bundled into one [`OrdinaryVectorInfo`].
//!
//! Compression never loses or invents an offset: expanding every returned
//! repetition at its base and adding the leftovers yields the input multiset.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Vector};
use crate::options::{MIN_ARRAY_REPETITION_SIZE, MIN_LINE_REPETITION_SIZE};
use crate::repetition::{ArrayInfo, HorizontalVectorInfo, OrdinaryVectorInfo, Repetition, VerticalVectorInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressAlgo {
    None,
    /// Lines and offset lists only.
    Vector,
    /// Arrays first, then lines and offset lists on the remainder.
    Array,
}

impl CompressAlgo {
    pub fn for_boxes(level: u32) -> Self {
        match level {
            0 => CompressAlgo::None,
            1 => CompressAlgo::Vector,
            _ => CompressAlgo::Array,
        }
    }

    pub fn for_polygons(level: u32) -> Self {
        match level {
            0..=2 => CompressAlgo::None,
            3 => CompressAlgo::Vector,
            _ => CompressAlgo::Array,
        }
    }
}

/// Output of a compression run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compressed {
    /// Base offset plus repetition; member `i` sits at `base + repetition.offset(i)`.
    pub repetitions: Vec<(Vector, Repetition)>,
    /// Offsets that did not join any group.
    pub leftovers: Vec<Vector>,
}

/// Count of the one-dimensional run and its stride.
type LineKey = (u32, Vector);

#[derive(Debug, Clone, Default)]
pub struct Compressor {
    vectors: Vec<Vector>,
}

impl Compressor {
    pub fn new(vectors: Vec<Vector>) -> Self {
        Self { vectors }
    }

    pub fn add_vector(&mut self, v: Vector) {
        self.vectors.push(v);
    }

    pub fn vectors(&self) -> &[Vector] {
        &self.vectors
    }

    pub fn compress(self, algo: CompressAlgo) -> Compressed {
        let mut out = Compressed::default();
        let mut vectors = self.vectors;
        match algo {
            CompressAlgo::None => {
                out.leftovers = vectors;
                return out;
            }
            CompressAlgo::Array => {
                vectors = array_pass(vectors, &mut out.repetitions);
            }
            CompressAlgo::Vector => {}
        }
        out.leftovers = vector_pass(vectors, &mut out.repetitions);
        log::debug!(
            "compressed into {} repetitions, {} leftover offsets",
            out.repetitions.len(),
            out.leftovers.len()
        );
        out
    }
}

/// Sort along the axis with more distinct values. Returns `true` when lines run
/// along x (offsets grouped by y, then ordered by x).
fn sort_vectors(vectors: &mut [Vector]) -> bool {
    let xs: HashSet<i32> = vectors.iter().map(|v| v.x).collect();
    let ys: HashSet<i32> = vectors.iter().map(|v| v.y).collect();
    let x_first = xs.len() > ys.len();
    sort_by_axis(vectors, x_first);
    x_first
}

fn sort_by_axis(vectors: &mut [Vector], x_first: bool) {
    if x_first {
        vectors.sort_unstable_by_key(|v| (v.y, v.x));
    } else {
        vectors.sort_unstable_by_key(|v| (v.x, v.y));
    }
}

/// Split sorted offsets into lines sharing y (`x_first`) or x.
fn lines(vectors: &[Vector], x_first: bool) -> impl Iterator<Item = &[Vector]> {
    vectors.chunk_by(move |a, b| if x_first { a.y == b.y } else { a.x == b.x })
}

/// Walk a line and report every maximal run of at least three equally spaced
/// offsets as `(start, len, stride)`; other offsets go to `rest`.
fn runs(line: &[Vector], rest: &mut Vec<Vector>) -> Vec<(Vector, u32, Vector)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if i + 1 == line.len() {
            rest.push(line[i]);
            break;
        }
        let diff = line[i + 1] - line[i];
        let mut n = 2;
        while i + n < line.len() && line[i + n] - line[i + n - 1] == diff {
            n += 1;
        }
        if n == 2 {
            rest.push(line[i]);
            i += 1;
        } else {
            found.push((line[i], n as u32, diff));
            i += n;
        }
    }
    found
}

fn array_pass(mut vectors: Vec<Vector>, result: &mut Vec<(Vector, Repetition)>) -> Vec<Vector> {
    let x_first = sort_vectors(&mut vectors);
    let mut line_reps: BTreeMap<LineKey, Vec<Vector>> = BTreeMap::new();
    let mut leftovers = Vec::new();
    for line in lines(&vectors, x_first) {
        for (base, count, diff) in runs(line, &mut leftovers) {
            line_reps.entry((count, diff)).or_default().push(base);
        }
    }

    // Stack identical runs into 2D arrays, first across lines then along them.
    for second_pass in [false, true] {
        let x_array = x_first == second_pass;
        for (&(count, stride), bases) in line_reps.iter_mut() {
            sort_by_axis(bases, x_array);
            let mut remaining = Vec::new();
            for line in lines(bases, x_array) {
                for (base, rows, row_step) in runs(line, &mut remaining) {
                    result.push((base, ArrayInfo::new(rows, count, row_step, stride).into()));
                }
            }
            *bases = remaining;
        }
    }

    for ((count, stride), bases) in line_reps {
        for base in bases {
            if (count as usize) < MIN_ARRAY_REPETITION_SIZE {
                leftovers.extend((0..count).map(|k| base + stride.scaled(k as i32)));
            } else {
                result.push((base, ArrayInfo::new(1, count, Point::zero(), stride).into()));
            }
        }
    }
    leftovers
}

fn vector_pass(mut vectors: Vec<Vector>, result: &mut Vec<(Vector, Repetition)>) -> Vec<Vector> {
    if vectors.len() <= 1 {
        return vectors;
    }
    let x_first = sort_vectors(&mut vectors);
    let mut remaining = Vec::new();
    for line in lines(&vectors, x_first) {
        if line.len() < MIN_LINE_REPETITION_SIZE {
            remaining.extend_from_slice(line);
            continue;
        }
        let base = line[0];
        let rep: Repetition = if x_first {
            HorizontalVectorInfo::new(line.iter().map(|v| v.x - base.x).collect()).into()
        } else {
            VerticalVectorInfo::new(line.iter().map(|v| v.y - base.y).collect()).into()
        };
        result.push((base, rep));
    }
    if remaining.len() <= 1 {
        return remaining;
    }
    let base = remaining[0];
    let offsets = remaining.iter().map(|&v| v - base).collect();
    result.push((base, OrdinaryVectorInfo::new(offsets).into()));
    Vec::new()
}
