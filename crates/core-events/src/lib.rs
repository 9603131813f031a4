//! Core event types shared between the X host layer and the dispatcher.
//!
//! The X host translates raw wire notifications into [`XEvent`] values,
//! reading property payloads at translation time so the dispatcher (and its
//! tests) never need a display connection. Everything here is plain data;
//! no x11rb type crosses this boundary.
//!
//! Delivery policy: events are drained in batches at loop-prepare time, never
//! one at a time across awaits, so a burst of ConfigureNotify/DamageNotify
//! collapses into a single frame. The drain is unbounded; X itself is the
//! backpressure (the server queues until we read the socket).

use core_region::{Rect, Region};
use std::fmt;
use std::sync::atomic::AtomicU64;

mod wintype;

pub use wintype::WinType;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Relaxed atomic counters, inspected by tests and periodically logged. Cheap
// enough to keep unconditionally.
pub static EVENTS_TRANSLATED: AtomicU64 = AtomicU64::new(0);
pub static EVENTS_DISCARDED: AtomicU64 = AtomicU64::new(0); // wire events with no compositor meaning
pub static DAMAGE_EVENTS: AtomicU64 = AtomicU64::new(0);
pub static ERRORS_IGNORED: AtomicU64 = AtomicU64::new(0); // X errors matched against the ignore ring
pub static ERRORS_LOGGED: AtomicU64 = AtomicU64::new(0);

/// X window id. `Wid::NONE` stands in for X's `None`/0 resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Wid(pub u32);

impl Wid {
    pub const NONE: Wid = Wid(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Wid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Window geometry as reported by the server (border tracked separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
}

impl Geometry {
    pub fn new(x: i16, y: i16, width: u16, height: u16, border_width: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
            border_width,
        }
    }

    /// Outer width including both border edges.
    pub fn outer_width(&self) -> i32 {
        i32::from(self.width) + 2 * i32::from(self.border_width)
    }

    /// Outer height including both border edges.
    pub fn outer_height(&self) -> i32 {
        i32::from(self.height) + 2 * i32::from(self.border_width)
    }

    pub fn same_size(&self, other: &Geometry) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.border_width == other.border_width
    }
}

/// A tracked client-window property change, payload read by the X host.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    /// `_NET_WM_WINDOW_OPACITY`, scaled to [0, 1]; `None` when deleted.
    Opacity(Option<f64>),
    /// `_NET_WM_WINDOW_TYPE` mapped to the 15-value enum.
    WindowType(WinType),
    /// `_NET_FRAME_EXTENTS`.
    FrameExtents {
        top: u16,
        right: u16,
        bottom: u16,
        left: u16,
    },
    /// `WM_NAME` / `_NET_WM_NAME`.
    Name(Option<String>),
    /// `WM_CLASS` instance and general parts.
    Class {
        instance: Option<String>,
        general: Option<String>,
    },
    /// `WM_WINDOW_ROLE`.
    Role(Option<String>),
    /// `WM_CLIENT_LEADER` (or `WM_TRANSIENT_FOR` fallback).
    Leader(Wid),
    /// `WM_STATE` appeared or vanished (client-window detection).
    WmState { present: bool },
    /// `_COMPTON_SHADOW`-compatible override; `None` when deleted.
    ShadowOverride(Option<bool>),
}

/// A tracked root-window property change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPropertyChange {
    /// `_XROOTPMAP_ID` / `_XSETROOT_ID`: background tile must be re-fetched.
    Background,
    /// `_NET_ACTIVE_WINDOW` moved the focus.
    ActiveWindow(Wid),
}

/// Translated X notification, one-to-one with the dispatch table.
#[derive(Debug, Clone, PartialEq)]
pub enum XEvent {
    /// New top-level child of the root.
    Create {
        wid: Wid,
        geom: Geometry,
        override_redirect: bool,
        input_only: bool,
    },
    /// Root geometry changed (RandR resize or similar).
    ConfigureRoot { width: u16, height: u16 },
    /// Geometry and/or stacking change of a top-level window.
    Configure {
        wid: Wid,
        geom: Geometry,
        above: Wid,
    },
    Map {
        wid: Wid,
        /// Visual carries an alpha channel (depth 32).
        has_alpha: bool,
    },
    Unmap { wid: Wid },
    Destroy { wid: Wid },
    /// Window reparented; `to_root` selects which half of the table applies.
    Reparent { wid: Wid, geom: Geometry, to_root: bool },
    /// CirculateNotify: raised to top or lowered to bottom.
    Circulate { wid: Wid, place_on_top: bool },
    /// Damage report in window-local coordinates.
    Damage { wid: Wid, rect: Rect },
    /// Bounding shape changed; `None` restores the plain rectangle.
    Shape { wid: Wid, bounding: Option<Region> },
    /// Property change on the root window.
    RootProperty(RootPropertyChange),
    /// Property change on a top-level or client window.
    Property { wid: Wid, change: PropertyChange },
    /// Server focus moved (FocusIn on a tracked window).
    FocusIn { wid: Wid },
    FocusOut { wid: Wid },
    /// RandR screen change: new refresh rate in millihertz (0 = unknown).
    ScreenChange { refresh_mhz: u32 },
    /// Our compositor-manager selection was taken away. Fatal.
    SelectionClear,
}

impl XEvent {
    /// Window the event is about, when it is about one.
    pub fn wid(&self) -> Option<Wid> {
        match self {
            XEvent::Create { wid, .. }
            | XEvent::Configure { wid, .. }
            | XEvent::Map { wid, .. }
            | XEvent::Unmap { wid }
            | XEvent::Destroy { wid }
            | XEvent::Reparent { wid, .. }
            | XEvent::Circulate { wid, .. }
            | XEvent::Damage { wid, .. }
            | XEvent::Shape { wid, .. }
            | XEvent::Property { wid, .. }
            | XEvent::FocusIn { wid }
            | XEvent::FocusOut { wid } => Some(*wid),
            XEvent::ConfigureRoot { .. }
            | XEvent::RootProperty(_)
            | XEvent::ScreenChange { .. }
            | XEvent::SelectionClear => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wid_none_and_display() {
        assert!(Wid::NONE.is_none());
        assert!(!Wid(0x1a0_0003).is_none());
        assert_eq!(format!("{}", Wid(0x1a)), "0x1a");
    }

    #[test]
    fn geometry_outer_size_includes_border() {
        let g = Geometry::new(10, 20, 640, 480, 2);
        assert_eq!(g.outer_width(), 644);
        assert_eq!(g.outer_height(), 484);
        assert!(g.same_size(&Geometry::new(0, 0, 640, 480, 2)));
        assert!(!g.same_size(&Geometry::new(10, 20, 640, 481, 2)));
    }

    #[test]
    fn event_wid_extraction() {
        let e = XEvent::Map {
            wid: Wid(7),
            has_alpha: false,
        };
        assert_eq!(e.wid(), Some(Wid(7)));
        assert_eq!(XEvent::SelectionClear.wid(), None);
        assert_eq!(
            XEvent::RootProperty(RootPropertyChange::Background).wid(),
            None
        );
    }

    #[test]
    fn property_change_payloads_compare() {
        let a = PropertyChange::Opacity(Some(0.5));
        assert_ne!(a, PropertyChange::Opacity(None));
        assert_eq!(
            RootPropertyChange::ActiveWindow(Wid(3)),
            RootPropertyChange::ActiveWindow(Wid(3))
        );
    }
}
