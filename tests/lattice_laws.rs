// Property tests for the interval lattice (spec.md §8 "lattice laws").
// proptest brought in per the fuel-vm example in the pack, which is the
// corpus's template for property-testing a numeric domain; luars itself
// has no property tests, so this is an enrichment, not a teacher pattern.

use proptest::prelude::*;
use rangepass::range::Range;

fn finite_bound() -> impl Strategy<Value = f64> {
    -1.0e6..1.0e6
}

fn interval() -> impl Strategy<Value = Range> {
    (finite_bound(), finite_bound()).prop_map(|(a, b)| Range::new(a.min(b), a.max(b)))
}

proptest! {
    #[test]
    fn join_is_commutative(a in interval(), b in interval()) {
        prop_assert_eq!(a | b, b | a);
    }

    #[test]
    fn join_with_bottom_is_identity(a in interval()) {
        prop_assert_eq!(a | Range::Bottom, a);
        prop_assert_eq!(Range::Bottom | a, a);
    }

    #[test]
    fn join_with_top_is_top(a in interval()) {
        prop_assert_eq!(a | Range::Top, Range::Top);
    }

    #[test]
    fn join_is_idempotent(a in interval()) {
        prop_assert_eq!(a | a, a);
    }

    #[test]
    fn meet_is_commutative(a in interval(), b in interval()) {
        prop_assert_eq!(a & b, b & a);
    }

    #[test]
    fn meet_with_top_is_identity(a in interval()) {
        prop_assert_eq!(a & Range::Top, a);
        prop_assert_eq!(Range::Top & a, a);
    }

    #[test]
    fn meet_with_bottom_is_bottom(a in interval()) {
        prop_assert_eq!(a & Range::Bottom, Range::Bottom);
    }

    #[test]
    fn meet_is_idempotent(a in interval()) {
        prop_assert_eq!(a & a, a);
    }

    /// A point interval behaves like ordinary constant-propagation
    /// arithmetic: `[v,v] op [w,w] == [v op w, v op w]`.
    #[test]
    fn point_arithmetic_matches_constant_propagation(v in finite_bound(), w in finite_bound()) {
        let (pv, pw) = (Range::point(v), Range::point(w));
        prop_assert_eq!(pv + pw, Range::point(v + w));
        prop_assert_eq!(pv * pw, Range::point(v * w));
    }

    /// Every corner value of `a op b` lies within the returned interval's
    /// bounds, for `op` in `{+, *}` (containment, spec.md §4.1).
    #[test]
    fn add_result_contains_every_corner(a in interval(), b in interval()) {
        if let (Some((a0, a1)), Some((b0, b1))) = (a.as_interval(), b.as_interval()) {
            if let Some((lo, hi)) = (a + b).as_interval() {
                for x in [a0, a1] {
                    for y in [b0, b1] {
                        prop_assert!(lo <= x + y && x + y <= hi);
                    }
                }
            }
        }
    }

    #[test]
    fn mul_result_contains_every_corner(a in interval(), b in interval()) {
        if let (Some((a0, a1)), Some((b0, b1))) = (a.as_interval(), b.as_interval()) {
            if let Some((lo, hi)) = (a * b).as_interval() {
                for x in [a0, a1] {
                    for y in [b0, b1] {
                        prop_assert!(lo <= x * y && x * y <= hi);
                    }
                }
            }
        }
    }

    /// Meet narrows (or leaves unchanged) whichever operand it doesn't
    /// discard entirely to `Bottom`.
    #[test]
    fn meet_never_widens(a in interval(), b in interval()) {
        if let (Some((a0, a1)), Some((_, _))) = (a.as_interval(), b.as_interval()) {
            if let Some((lo, hi)) = (a & b).as_interval() {
                prop_assert!(lo >= a0 && hi <= a1);
            }
        }
    }
}
