//! Rectangular region algebra.
//!
//! A [`Region`] is a set of screen pixels stored as disjoint half-open
//! rectangles. All set operations (`union`, `intersect`, `subtract`,
//! `translate`) are total over empty operands, and every operation preserves
//! the disjointness invariant, so `area` is always the exact pixel count.
//!
//! Regions that are shared between several windows (the opaque-above cache)
//! are wrapped in [`SharedRegion`] (`Rc<Region>`): cloning the handle is the
//! cheap `ref`, dropping the last handle frees the storage. Regions are
//! immutable once shared; mutation always builds a new `Region`.
//!
//! Invariants:
//! * `rects()` never contains an empty rectangle.
//! * Rectangles in `rects()` are pairwise disjoint.
//! * Two regions covering the same pixel set compare equal via `==`, even
//!   when their rectangle decompositions differ.

use std::rc::Rc;

mod rect;

pub use rect::Rect;

/// Shared, reference-counted region handle.
pub type SharedRegion = Rc<Region>;

/// A set of pixels as disjoint rectangles.
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// The empty region.
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Region covering a single rectangle (empty if the rectangle is empty).
    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            Self::new()
        } else {
            Self { rects: vec![rect] }
        }
    }

    /// Region covering the union of arbitrary (possibly overlapping) rectangles.
    pub fn from_rects<I: IntoIterator<Item = Rect>>(rects: I) -> Self {
        let mut out = Self::new();
        for r in rects {
            out = out.union_rect(r);
        }
        out
    }

    /// True when no pixel is covered.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The disjoint rectangle decomposition.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Exact number of covered pixels.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Smallest rectangle containing the whole region; `None` when empty.
    pub fn extents(&self) -> Option<Rect> {
        let first = self.rects.first()?;
        let mut x1 = first.x1;
        let mut y1 = first.y1;
        let mut x2 = first.x2;
        let mut y2 = first.y2;
        for r in &self.rects[1..] {
            x1 = x1.min(r.x1);
            y1 = y1.min(r.y1);
            x2 = x2.max(r.x2);
            y2 = y2.max(r.y2);
        }
        Some(Rect::from_coords(x1, y1, x2, y2))
    }

    /// Set union.
    pub fn union(&self, other: &Region) -> Region {
        // a ∪ b = a + (b − a): keeps the result disjoint without banding.
        let mut out = self.clone();
        for r in &other.rects {
            out.append_minus_self(*r);
        }
        out
    }

    /// Union with a single rectangle.
    pub fn union_rect(&self, rect: Rect) -> Region {
        let mut out = self.clone();
        if !rect.is_empty() {
            out.append_minus_self(rect);
        }
        out
    }

    /// Set intersection.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut out = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(i) = a.intersect(b) {
                    out.push(i);
                }
            }
        }
        // Intersections of two disjoint families stay pairwise disjoint.
        Region { rects: out }
    }

    /// Intersection with a single rectangle.
    pub fn intersect_rect(&self, rect: Rect) -> Region {
        let rects = self
            .rects
            .iter()
            .filter_map(|a| a.intersect(&rect))
            .collect();
        Region { rects }
    }

    /// Set difference `self − other`.
    pub fn subtract(&self, other: &Region) -> Region {
        let mut current = self.rects.clone();
        for b in &other.rects {
            let mut next = Vec::with_capacity(current.len());
            for a in current {
                a.subtract_into(b, &mut next);
            }
            current = next;
        }
        Region { rects: current }
    }

    /// Difference with a single rectangle.
    pub fn subtract_rect(&self, rect: Rect) -> Region {
        if rect.is_empty() {
            return self.clone();
        }
        let mut out = Vec::with_capacity(self.rects.len());
        for a in &self.rects {
            a.subtract_into(&rect, &mut out);
        }
        Region { rects: out }
    }

    /// Whole-region translation.
    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        let rects = self.rects.iter().map(|r| r.translate(dx, dy)).collect();
        Region { rects }
    }

    /// True when `other` is fully contained in `self`.
    pub fn contains_region(&self, other: &Region) -> bool {
        other.subtract(self).is_empty()
    }

    /// True when the pixel `(x, y)` is covered.
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    /// Append `rect − self` directly into the rectangle list.
    ///
    /// Callers must only use this to build unions; appending anything that
    /// overlaps existing rectangles would break disjointness.
    fn append_minus_self(&mut self, rect: Rect) {
        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for p in pieces {
                p.subtract_into(existing, &mut next);
            }
            if next.is_empty() {
                return;
            }
            pieces = next;
        }
        self.rects.extend(pieces);
    }
}

impl PartialEq for Region {
    /// Pixel-set equality, independent of rectangle decomposition.
    fn eq(&self, other: &Self) -> bool {
        self.subtract(other).is_empty() && other.subtract(self).is_empty()
    }
}

impl Eq for Region {}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: i32, h: i32) -> Rect {
        Rect::new(x, y, w, h)
    }

    #[test]
    fn empty_operands_are_total() {
        let e = Region::new();
        let a = Region::from_rect(r(0, 0, 10, 10));
        assert!(e.is_empty());
        assert_eq!(e.union(&a), a);
        assert_eq!(a.union(&e), a);
        assert!(e.intersect(&a).is_empty());
        assert!(a.intersect(&e).is_empty());
        assert_eq!(a.subtract(&e), a);
        assert!(e.subtract(&a).is_empty());
        assert!(e.translate(5, 5).is_empty());
        assert_eq!(e.extents(), None);
    }

    #[test]
    fn union_overlapping_counts_pixels_once() {
        let a = Region::from_rect(r(0, 0, 10, 10));
        let b = Region::from_rect(r(5, 5, 10, 10));
        let u = a.union(&b);
        assert_eq!(u.area(), 100 + 100 - 25);
        assert!(u.contains_point(0, 0));
        assert!(u.contains_point(14, 14));
        assert!(!u.contains_point(14, 0));
    }

    #[test]
    fn subtract_splits_into_disjoint_pieces() {
        let a = Region::from_rect(r(0, 0, 10, 10));
        let hole = Region::from_rect(r(3, 3, 4, 4));
        let d = a.subtract(&hole);
        assert_eq!(d.area(), 100 - 16);
        assert!(!d.contains_point(4, 4));
        assert!(d.contains_point(0, 0));
        assert!(d.contains_point(9, 9));
        // Disjointness: pairwise intersections are empty.
        for (i, x) in d.rects().iter().enumerate() {
            for y in &d.rects()[i + 1..] {
                assert!(x.intersect(y).is_none(), "{x:?} overlaps {y:?}");
            }
        }
    }

    #[test]
    fn intersect_is_commutative_here() {
        let a = Region::from_rects([r(0, 0, 8, 8), r(20, 0, 8, 8)]);
        let b = Region::from_rect(r(4, 4, 20, 2));
        assert_eq!(a.intersect(&b), b.intersect(&a));
        assert_eq!(a.intersect(&b).area(), 4 * 2 + 4 * 2);
    }

    #[test]
    fn translate_moves_every_pixel() {
        let a = Region::from_rects([r(0, 0, 4, 4), r(10, 10, 4, 4)]);
        let t = a.translate(-2, 3);
        assert_eq!(t.area(), a.area());
        assert!(t.contains_point(-2, 3));
        assert!(t.contains_point(11, 16));
    }

    #[test]
    fn equality_ignores_decomposition() {
        let a = Region::from_rects([r(0, 0, 10, 5), r(0, 5, 10, 5)]);
        let b = Region::from_rect(r(0, 0, 10, 10));
        assert_eq!(a, b);
        assert_ne!(a, b.subtract_rect(r(0, 0, 1, 1)));
    }

    #[test]
    fn shared_region_refcount_semantics() {
        let shared: SharedRegion = Rc::new(Region::from_rect(r(0, 0, 5, 5)));
        let second = Rc::clone(&shared);
        assert_eq!(Rc::strong_count(&shared), 2);
        drop(second);
        assert_eq!(Rc::strong_count(&shared), 1);
        assert_eq!(shared.area(), 25);
    }

    #[test]
    fn contains_region_partial_and_full() {
        let outer = Region::from_rect(r(0, 0, 20, 20));
        let inner = Region::from_rects([r(1, 1, 5, 5), r(10, 10, 5, 5)]);
        assert!(outer.contains_region(&inner));
        assert!(!inner.contains_region(&outer));
        let straddle = Region::from_rect(r(15, 15, 10, 10));
        assert!(!outer.contains_region(&straddle));
    }
}
