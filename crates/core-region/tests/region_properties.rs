//! Property-based tests for region set-algebra laws.

use core_region::{Rect, Region};
use proptest::prelude::*;

fn arb_rect() -> impl Strategy<Value = Rect> {
    (-64i32..64, -64i32..64, 0i32..48, 0i32..48).prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
}

fn arb_region() -> impl Strategy<Value = Region> {
    prop::collection::vec(arb_rect(), 0..6).prop_map(Region::from_rects)
}

proptest! {
    // Union is commutative and never loses pixels.
    #[test]
    fn union_commutative(a in arb_region(), b in arb_region()) {
        let ab = a.union(&b);
        let ba = b.union(&a);
        prop_assert_eq!(&ab, &ba);
        prop_assert!(ab.contains_region(&a));
        prop_assert!(ab.contains_region(&b));
    }

    // Intersection is contained in both operands.
    #[test]
    fn intersect_contained(a in arb_region(), b in arb_region()) {
        let i = a.intersect(&b);
        prop_assert!(a.contains_region(&i));
        prop_assert!(b.contains_region(&i));
    }

    // a = (a − b) ∪ (a ∩ b), and the two parts are disjoint.
    #[test]
    fn subtract_partitions(a in arb_region(), b in arb_region()) {
        let diff = a.subtract(&b);
        let both = a.intersect(&b);
        prop_assert!(diff.intersect(&both).is_empty());
        let a_area = a.area();
        prop_assert_eq!(diff.union(&both), a);
        prop_assert_eq!(diff.area() + both.area(), a_area);
    }

    // Disjointness invariant survives every operation.
    #[test]
    fn rects_stay_disjoint(a in arb_region(), b in arb_region()) {
        for reg in [a.union(&b), a.intersect(&b), a.subtract(&b)] {
            let total: u64 = reg.rects().iter().map(Rect::area).sum();
            prop_assert_eq!(total, reg.area());
            for (i, x) in reg.rects().iter().enumerate() {
                for y in &reg.rects()[i + 1..] {
                    prop_assert!(x.intersect(y).is_none());
                }
            }
        }
    }

    // Translate round-trips and preserves area.
    #[test]
    fn translate_round_trip(a in arb_region(), dx in -100i32..100, dy in -100i32..100) {
        let moved = a.translate(dx, dy);
        prop_assert_eq!(moved.area(), a.area());
        prop_assert_eq!(moved.translate(-dx, -dy), a);
    }
}
