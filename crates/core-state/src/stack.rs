//! Window registry: z-ordered stack plus id index.
//!
//! Storage is a slab of windows addressed by stable [`WinKey`]s, an order
//! vector (index 0 = top of stack, last = bottom, matching "bottom of stack
//! is list tail"), and a hash index from window id to key.
//!
//! Invariants:
//! * Every id in the index refers to exactly one slab entry, and that entry
//!   is present in the order vector exactly once.
//! * A DESTROYING window has no index entry; it is reachable only through
//!   the order vector until its fade finishes.
//! * Any stack mutation invalidates the `reg_ignore` cache of the moved
//!   window and of its old and new lower neighbours.

use crate::{WinFlags, Window};
use ahash::AHashMap;
use core_events::Wid;
use tracing::warn;

/// Stable handle into the registry slab. Valid until `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WinKey(usize);

/// The registry.
#[derive(Debug, Default)]
pub struct WinStack {
    slots: Vec<Option<Window>>,
    free: Vec<usize>,
    /// Top-to-bottom stacking order.
    order: Vec<WinKey>,
    index: AHashMap<Wid, WinKey>,
}

impl WinStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn win(&self, key: WinKey) -> &Window {
        self.slots[key.0].as_ref().expect("stale WinKey")
    }

    pub fn win_mut(&mut self, key: WinKey) -> &mut Window {
        self.slots[key.0].as_mut().expect("stale WinKey")
    }

    /// Index lookup. DESTROYING windows are unreachable here.
    pub fn find(&self, wid: Wid) -> Option<WinKey> {
        self.index.get(&wid).copied()
    }

    /// Find the toplevel whose client window is `client`, skipping windows
    /// already past destroy.
    pub fn find_toplevel(&self, client: Wid) -> Option<WinKey> {
        if client.is_none() {
            return None;
        }
        self.order
            .iter()
            .copied()
            .find(|&k| self.win(k).client == client && self.index.contains_key(&self.win(k).id))
    }

    /// Insert a window immediately above `prev` in stack order; `Wid::NONE`
    /// means bottom of the stack. Duplicate ids are a no-op.
    pub fn insert(&mut self, win: Window, prev: Wid) -> Option<WinKey> {
        let wid = win.id;
        if self.index.contains_key(&wid) {
            warn!(target: "stack", %wid, "duplicate_insert_ignored");
            return None;
        }
        let slot = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(win);
                i
            }
            None => {
                self.slots.push(Some(win));
                self.slots.len() - 1
            }
        };
        let key = WinKey(slot);
        let pos = if prev.is_none() {
            self.order.len()
        } else if let Some(p) = self.position_of_wid(prev) {
            // Inserting at p pushes `prev` down one slot, leaving the new
            // window immediately above it.
            p
        } else {
            warn!(target: "stack", %wid, above = %prev, "insert_above_unknown_sibling_placing_on_top");
            0
        };
        self.order.insert(pos, key);
        self.index.insert(wid, key);
        self.invalidate_around(pos);
        Some(key)
    }

    /// Move `wid` immediately above `new_above` (`Wid::NONE` = bottom).
    /// Idempotent when already there; a vanished sibling is reported and the
    /// stack is left untouched.
    pub fn restack(&mut self, wid: Wid, new_above: Wid) {
        let Some(key) = self.find(wid) else {
            return;
        };
        let pos = self
            .position_of(key)
            .expect("indexed window missing from order");

        // Idempotence: already directly above the requested sibling?
        let current_below = self.order.get(pos + 1).map(|&k| self.win(k).id);
        if new_above.is_none() {
            if pos + 1 == self.order.len() {
                return;
            }
        } else if current_below == Some(new_above) {
            return;
        }

        let target = if new_above.is_none() {
            None
        } else {
            match self.position_of_wid(new_above) {
                Some(p) => Some(p),
                None => {
                    warn!(target: "stack", %wid, above = %new_above, "restack_sibling_gone_noop");
                    return;
                }
            }
        };

        self.invalidate_around(pos);
        self.order.remove(pos);
        let new_pos = match target {
            None => self.order.len(),
            Some(_) => self
                .position_of_wid(new_above)
                .expect("sibling vanished mid-restack"),
        };
        self.order.insert(new_pos, key);
        self.invalidate_around(new_pos);
    }

    /// CirculateNotify: move to the very top or very bottom.
    pub fn circulate(&mut self, wid: Wid, place_on_top: bool) {
        let Some(key) = self.find(wid) else {
            return;
        };
        let pos = self.position_of(key).expect("indexed window not in order");
        self.invalidate_around(pos);
        self.order.remove(pos);
        let new_pos = if place_on_top { 0 } else { self.order.len() };
        self.order.insert(new_pos, key);
        self.invalidate_around(new_pos);
    }

    /// Drop the id-index entry (DestroyNotify). The window stays in stack
    /// order until its fade finishes; a new window may reuse the id freely.
    pub fn detach_index(&mut self, wid: Wid) -> Option<WinKey> {
        self.index.remove(&wid)
    }

    /// Remove a window entirely. Returns it for image release.
    pub fn remove(&mut self, key: WinKey) -> Window {
        if let Some(pos) = self.position_of(key) {
            self.invalidate_around(pos);
            self.order.remove(pos);
        }
        let win = self.slots[key.0].take().expect("double remove");
        if self.index.get(&win.id) == Some(&key) {
            self.index.remove(&win.id);
        }
        self.free.push(key.0);
        win
    }

    /// Keys from the top of the stack downward.
    pub fn iter_top_to_bottom(&self) -> impl Iterator<Item = WinKey> + '_ {
        self.order.iter().copied()
    }

    /// Keys from the bottom of the stack upward.
    pub fn iter_bottom_to_top(&self) -> impl Iterator<Item = WinKey> + '_ {
        self.order.iter().rev().copied()
    }

    /// Key of the window directly below `key`, if any.
    pub fn below(&self, key: WinKey) -> Option<WinKey> {
        let pos = self.position_of(key)?;
        self.order.get(pos + 1).copied()
    }

    /// Key of the window directly above `key`, if any.
    pub fn above(&self, key: WinKey) -> Option<WinKey> {
        let pos = self.position_of(key)?;
        pos.checked_sub(1).map(|p| self.order[p])
    }

    /// Mark one window's opaque-above cache unusable.
    pub fn invalidate_reg_ignore(&mut self, key: WinKey) {
        let w = self.win_mut(key);
        w.flags.remove(WinFlags::REG_IGNORE_VALID);
        w.reg_ignore = None;
    }

    /// Consistency check used by tests: index ↔ order agreement and the
    /// DESTROYING-windows-are-unindexed rule.
    pub fn debug_validate(&self) {
        for (wid, key) in &self.index {
            let count = self.order.iter().filter(|k| *k == key).count();
            assert_eq!(count, 1, "{wid} indexed but in order {count} times");
            assert_ne!(
                self.win(*key).state,
                crate::WinState::Destroying,
                "{wid} destroying but still indexed"
            );
        }
        for key in &self.order {
            assert!(self.slots[key.0].is_some(), "order entry without slot");
        }
    }

    fn position_of(&self, key: WinKey) -> Option<usize> {
        self.order.iter().position(|&k| k == key)
    }

    fn position_of_wid(&self, wid: Wid) -> Option<usize> {
        let key = self.find(wid)?;
        self.position_of(key)
    }

    /// Invalidate the window at `pos` and its lower neighbour. Called both
    /// before a removal (old neighbourhood) and after an insert (new one).
    fn invalidate_around(&mut self, pos: usize) {
        if let Some(&key) = self.order.get(pos) {
            self.invalidate_reg_ignore(key);
        }
        if let Some(&key) = self.order.get(pos + 1) {
            self.invalidate_reg_ignore(key);
        }
    }
}
