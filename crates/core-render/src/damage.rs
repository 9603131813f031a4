//! Buffer-age damage ring.
//!
//! One region per possible buffer age (the backend's `max_buffer_age`, ≥ 1).
//! Damage reported during frame N unions into the slot at `current`. When a
//! frame paints a back buffer of age `k`, it must repaint everything that
//! changed in the last `k` frames: the union of the `k` slots ending at
//! `current`. After each present the ring rotates and the slot that becomes
//! `current` is cleared for the next frame's damage.
//!
//! Invariants:
//! * A region added in some frame is visible to `collect` for exactly the
//!   next `len` frames via ages that reach back far enough.
//! * `collect(1)` is always exactly the current frame's damage.

use core_region::{Rect, Region};

/// Ring of per-buffer-age damage regions.
#[derive(Debug)]
pub struct DamageRing {
    slots: Vec<Region>,
    current: usize,
}

impl DamageRing {
    /// `max_buffer_age` comes from the backend and is clamped to ≥ 1.
    pub fn new(max_buffer_age: usize) -> Self {
        let len = max_buffer_age.max(1);
        Self {
            slots: vec![Region::new(); len],
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Region::is_empty)
    }

    /// Union a damaged rectangle into the current frame's slot.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let slot = &mut self.slots[self.current];
        *slot = slot.union_rect(rect);
    }

    /// Union a damaged region into the current frame's slot.
    pub fn add_region(&mut self, region: &Region) {
        if region.is_empty() {
            return;
        }
        let slot = &mut self.slots[self.current];
        *slot = slot.union(region);
    }

    /// Damage of the current frame alone.
    pub fn current(&self) -> &Region {
        &self.slots[self.current]
    }

    /// Read-back region for a buffer of age `k` (clamped to the ring size):
    /// the union of the `k` most recent slots.
    pub fn collect(&self, buffer_age: usize) -> Region {
        let k = buffer_age.clamp(1, self.slots.len());
        let mut out = Region::new();
        for j in 0..k {
            let idx = (self.current + self.slots.len() - j) % self.slots.len();
            out = out.union(&self.slots[idx]);
        }
        out
    }

    /// Rotate after a present; the new current slot starts empty.
    pub fn rotate(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.slots[self.current] = Region::new();
    }

    /// Drop all recorded damage (root change, redirection restart).
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            *slot = Region::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: i32, h: i32) -> Rect {
        Rect::new(x, y, w, h)
    }

    #[test]
    fn age_one_sees_only_current_frame() {
        let mut ring = DamageRing::new(3);
        ring.add_rect(r(0, 0, 5, 5));
        ring.rotate();
        ring.add_rect(r(10, 0, 5, 5));
        let out = ring.collect(1);
        assert!(out.contains_point(10, 0));
        assert!(!out.contains_point(0, 0), "previous frame excluded at age 1");
    }

    #[test]
    fn older_buffers_accumulate_history() {
        let mut ring = DamageRing::new(3);
        let (r1, r2, r3) = (r(0, 0, 4, 4), r(10, 0, 4, 4), r(20, 0, 4, 4));
        ring.add_rect(r1);
        ring.rotate();
        ring.add_rect(r2);
        ring.rotate();
        ring.add_rect(r3);
        // Age 3 buffer missed the two previous frames as well.
        let out = ring.collect(3);
        assert_eq!(out, Region::from_rects([r1, r2, r3]));
        // Age 2 only missed one.
        assert_eq!(ring.collect(2), Region::from_rects([r2, r3]));
    }

    #[test]
    fn rotation_reclaims_oldest_slot() {
        let mut ring = DamageRing::new(2);
        ring.add_rect(r(0, 0, 4, 4));
        ring.rotate();
        ring.add_rect(r(10, 0, 4, 4));
        ring.rotate(); // reuses the slot that held the first rect
        assert!(
            !ring.collect(2).contains_point(0, 0),
            "damage older than the ring is gone"
        );
        assert!(ring.collect(2).contains_point(10, 0));
    }

    #[test]
    fn visibility_window_matches_ring_length() {
        // A rect added at frame F is collectable while (frame - F) < len.
        let mut ring = DamageRing::new(3);
        ring.add_rect(r(0, 0, 1, 1));
        for age_back in 1..=2 {
            ring.rotate();
            assert!(
                ring.collect(age_back + 1).contains_point(0, 0),
                "visible {age_back} frames later with a deep enough age"
            );
        }
        ring.rotate();
        assert!(!ring.collect(3).contains_point(0, 0), "expired after len frames");
    }

    #[test]
    fn collect_clamps_out_of_range_ages() {
        let mut ring = DamageRing::new(2);
        ring.add_rect(r(0, 0, 1, 1));
        assert_eq!(ring.collect(0), ring.collect(1));
        assert_eq!(ring.collect(99), ring.collect(2));
    }

    #[test]
    fn clear_all_empties_every_slot() {
        let mut ring = DamageRing::new(3);
        ring.add_rect(r(0, 0, 4, 4));
        ring.rotate();
        ring.add_rect(r(5, 5, 4, 4));
        ring.clear_all();
        assert!(ring.is_empty());
        assert!(ring.collect(3).is_empty());
    }
}
