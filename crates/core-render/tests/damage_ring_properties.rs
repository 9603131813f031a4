//! Property-based tests for the damage ring's buffer-age laws.

use core_region::Rect;
use core_render::DamageRing;
use proptest::prelude::*;

fn arb_rect() -> impl Strategy<Value = Rect> {
    (0i32..256, 0i32..256, 1i32..64, 1i32..64).prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
}

proptest! {
    // Damage added at frame F is visible to any later frame whose buffer age
    // reaches back to F, and invisible once the ring wraps past it.
    #[test]
    fn visibility_window(len in 1usize..6, frames_later in 0usize..8, rect in arb_rect()) {
        let mut ring = DamageRing::new(len);
        ring.add_rect(rect);
        for _ in 0..frames_later {
            ring.rotate();
        }
        let needed_age = frames_later + 1;
        let probe = rect.x1; // any covered point
        let visible = ring.collect(needed_age).contains_point(probe, rect.y1);
        if frames_later < len {
            prop_assert!(visible, "age {needed_age} must reach back {frames_later} frames");
        } else {
            prop_assert!(!visible, "ring of {len} cannot remember {frames_later} frames back");
        }
    }

    // collect(k) is monotone in k: deeper ages only add damage.
    #[test]
    fn collect_monotone(len in 1usize..5, rects in prop::collection::vec(arb_rect(), 1..8)) {
        let mut ring = DamageRing::new(len);
        for r in &rects {
            ring.add_rect(*r);
            ring.rotate();
        }
        for age in 1..len {
            let shallow = ring.collect(age);
            let deep = ring.collect(age + 1);
            prop_assert!(deep.contains_region(&shallow));
        }
    }

    // Age 1 always equals the current slot exactly.
    #[test]
    fn age_one_is_current(rects in prop::collection::vec(arb_rect(), 0..5)) {
        let mut ring = DamageRing::new(3);
        ring.rotate();
        for r in &rects {
            ring.add_rect(*r);
        }
        prop_assert_eq!(&ring.collect(1), ring.current());
    }
}
