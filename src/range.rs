// Interval lattice (spec.md §3, §4.1, §9).

use std::ops::{Add, BitAnd, BitOr, Div, Mul, Sub};

/// A value is either unconstrained (`Top`), unreachable/contradictory
/// (`Bottom`), or a closed interval `[min, max]` of finite `f64`s.
///
/// Equality is bit-exact on `min`/`max` (spec.md §9: preserved deliberately,
/// not "fixed" — two numerically-equal-up-to-ULP intervals compare unequal).
/// Use [`approx_eq`] in tests that need tolerance; lattice code must never
/// substitute it for `==`.
#[derive(Debug, Clone, Copy)]
pub enum Range {
    Top,
    Bottom,
    Interval { min: f64, max: f64 },
}

impl Range {
    /// A point interval `[v, v]`.
    pub fn point(v: f64) -> Range {
        Range::Interval { min: v, max: v }
    }

    /// Constructing with `min > max` yields `Bottom`, not an error
    /// (spec.md §4.1, last bullet).
    pub fn new(min: f64, max: f64) -> Range {
        if min > max {
            Range::Bottom
        } else {
            Range::Interval { min, max }
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Range::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Range::Bottom)
    }

    pub fn as_interval(&self) -> Option<(f64, f64)> {
        match self {
            Range::Interval { min, max } => Some((*min, *max)),
            _ => None,
        }
    }
}

impl PartialEq for Range {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Range::Top, Range::Top) => true,
            (Range::Bottom, Range::Bottom) => true,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                a == c && b == d
            }
            _ => false,
        }
    }
}

/// ULP/epsilon-tolerant comparison for property tests; never used by lattice
/// operators themselves.
pub fn approx_eq(a: &Range, b: &Range, eps: f64) -> bool {
    match (a, b) {
        (Range::Top, Range::Top) => true,
        (Range::Bottom, Range::Bottom) => true,
        (Range::Interval { min: a0, max: a1 }, Range::Interval { min: b0, max: b1 }) => {
            (a0 - b0).abs() <= eps && (a1 - b1).abs() <= eps
        }
        _ => false,
    }
}

macro_rules! corner_op {
    ($a:expr, $b:expr, $c:expr, $d:expr, $op:tt) => {{
        let corners = [$a $op $c, $a $op $d, $b $op $c, $b $op $d];
        let mut min = corners[0];
        let mut max = corners[0];
        for &v in &corners[1..] {
            if v < min { min = v; }
            if v > max { max = v; }
        }
        (min, max)
    }};
}

impl Add for Range {
    type Output = Range;
    fn add(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                Range::Interval { min: a + c, max: b + d }
            }
        }
    }
}

impl Sub for Range {
    type Output = Range;
    /// spec.md §9: this deliberately computes only `(a-c, b-d)` rather than
    /// the mathematically correct four-corner `[a-d, b-c]`. That is a
    /// narrower-than-correct interval that can under-approximate. Preserved
    /// verbatim per spec; flagged here, not "fixed".
    fn sub(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                let lo = a - c;
                let hi = b - d;
                Range::Interval { min: lo.min(hi), max: lo.max(hi) }
            }
        }
    }
}

impl Mul for Range {
    type Output = Range;
    fn mul(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                let (min, max) = corner_op!(a, b, c, d, *);
                Range::Interval { min, max }
            }
        }
    }
}

impl Div for Range {
    type Output = Range;
    /// spec.md §4.1: division by a range straddling zero is not
    /// special-cased here; the raw corner quotients (possibly `inf`/`NaN`)
    /// are preserved rather than short-circuited to `Top`.
    fn div(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                let (min, max) = corner_op!(a, b, c, d, /);
                Range::Interval { min, max }
            }
        }
    }
}

/// Join (least upper bound / union). `Bottom` is the identity.
impl BitOr for Range {
    type Output = Range;
    fn bitor(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, x) | (x, Range::Bottom) => x,
            (Range::Top, _) | (_, Range::Top) => Range::Top,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                Range::Interval { min: a.min(c), max: b.max(d) }
            }
        }
    }
}

/// Meet (intersection). `Bottom` absorbs.
impl BitAnd for Range {
    type Output = Range;
    fn bitand(self, rhs: Range) -> Range {
        match (self, rhs) {
            (Range::Bottom, _) | (_, Range::Bottom) => Range::Bottom,
            (Range::Top, x) | (x, Range::Top) => x,
            (Range::Interval { min: a, max: b }, Range::Interval { min: c, max: d }) => {
                if b < c || a > d {
                    Range::Bottom
                } else {
                    Range::Interval { min: a.max(c), max: b.min(d) }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_min_gt_max_is_bottom() {
        assert_eq!(Range::new(2.0, 1.0), Range::Bottom);
    }

    #[test]
    fn join_identities() {
        let x = Range::new(1.0, 2.0);
        assert_eq!(x | Range::Bottom, x);
        assert_eq!(x | Range::Top, Range::Top);
        assert_eq!(x | x, x);
    }

    #[test]
    fn meet_identities() {
        let x = Range::new(1.0, 2.0);
        assert_eq!(x & x, x);
        assert_eq!(x & Range::Top, x);
        assert_eq!(x & Range::Bottom, Range::Bottom);
    }

    #[test]
    fn meet_disjoint_is_bottom() {
        let a = Range::new(0.0, 1.0);
        let b = Range::new(2.0, 3.0);
        assert_eq!(a & b, Range::Bottom);
    }

    #[test]
    fn add_is_corner_sum() {
        let a = Range::new(1.0, 2.0);
        let b = Range::new(10.0, 20.0);
        assert_eq!(a + b, Range::new(11.0, 22.0));
    }

    #[test]
    fn sub_uses_narrow_formulation() {
        // a=[0,10], b=[1,2]: correct four-corner is [0-2,10-1]=[-2,9];
        // the spec's narrower rule gives (0-1, 10-2) = (-1, 8).
        let a = Range::new(0.0, 10.0);
        let b = Range::new(1.0, 2.0);
        assert_eq!(a - b, Range::new(-1.0, 8.0));
    }

    #[test]
    fn mul_corner_max() {
        let a = Range::new(-2.0, 3.0);
        let b = Range::new(-1.0, 4.0);
        assert_eq!(a * b, Range::new(-8.0, 12.0));
    }

    #[test]
    fn point_interval_is_literal() {
        assert_eq!(Range::point(5.0), Range::new(5.0, 5.0));
    }

    #[test]
    fn bottom_absorbs_arithmetic() {
        let x = Range::new(1.0, 2.0);
        assert_eq!(x + Range::Bottom, Range::Bottom);
        assert_eq!(Range::Bottom - x, Range::Bottom);
        assert_eq!(x * Range::Bottom, Range::Bottom);
        assert_eq!(Range::Bottom / x, Range::Bottom);
    }

    #[test]
    fn top_is_neutral_but_not_absorbing() {
        let x = Range::new(1.0, 2.0);
        assert_eq!(x + Range::Top, Range::Top);
        assert_eq!(Range::Bottom + Range::Top, Range::Bottom);
    }
}
