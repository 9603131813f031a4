//! Typed reads of the window properties the compositor consumes.
//!
//! Every reader swallows protocol errors into `None`/defaults: a property
//! read racing a window's destruction is routine, not exceptional, and a
//! per-window read failure must never take down more than that window.

use crate::atoms::Atoms;
use core_events::{Wid, WinType};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, GetPropertyReply, Window};

const OPACITY_MAX: f64 = u32::MAX as f64;

fn get_property<C: Connection>(
    conn: &C,
    wid: Window,
    property: Atom,
    type_: impl Into<Atom>,
    length: u32,
) -> Option<GetPropertyReply> {
    let reply = conn
        .get_property(false, wid, property, type_.into(), 0, length)
        .ok()?
        .reply()
        .ok()?;
    if reply.format == 0 {
        None
    } else {
        Some(reply)
    }
}

/// `_NET_WM_WINDOW_OPACITY`, scaled from `[0, 0xFFFFFFFF]` to `[0, 1]`.
pub fn read_opacity<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Option<f64> {
    let reply = get_property(conn, wid.0, atoms._NET_WM_WINDOW_OPACITY, AtomEnum::CARDINAL, 1)?;
    let raw = reply.value32()?.next()?;
    Some(f64::from(raw) / OPACITY_MAX)
}

/// First recognized `_NET_WM_WINDOW_TYPE` entry.
pub fn read_wintype<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Option<WinType> {
    let reply = get_property(conn, wid.0, atoms._NET_WM_WINDOW_TYPE, AtomEnum::ATOM, 32)?;
    for atom in reply.value32()? {
        let wintype = match atom {
            a if a == atoms._NET_WM_WINDOW_TYPE_DESKTOP => WinType::Desktop,
            a if a == atoms._NET_WM_WINDOW_TYPE_DOCK => WinType::Dock,
            a if a == atoms._NET_WM_WINDOW_TYPE_TOOLBAR => WinType::Toolbar,
            a if a == atoms._NET_WM_WINDOW_TYPE_MENU => WinType::Menu,
            a if a == atoms._NET_WM_WINDOW_TYPE_UTILITY => WinType::Utility,
            a if a == atoms._NET_WM_WINDOW_TYPE_SPLASH => WinType::Splash,
            a if a == atoms._NET_WM_WINDOW_TYPE_DIALOG => WinType::Dialog,
            a if a == atoms._NET_WM_WINDOW_TYPE_NORMAL => WinType::Normal,
            a if a == atoms._NET_WM_WINDOW_TYPE_DROPDOWN_MENU => WinType::DropdownMenu,
            a if a == atoms._NET_WM_WINDOW_TYPE_POPUP_MENU => WinType::PopupMenu,
            a if a == atoms._NET_WM_WINDOW_TYPE_TOOLTIP => WinType::Tooltip,
            a if a == atoms._NET_WM_WINDOW_TYPE_NOTIFICATION => WinType::Notification,
            a if a == atoms._NET_WM_WINDOW_TYPE_COMBO => WinType::Combo,
            a if a == atoms._NET_WM_WINDOW_TYPE_DND => WinType::Dnd,
            _ => continue,
        };
        return Some(wintype);
    }
    None
}

/// `_NET_FRAME_EXTENTS` as (top, right, bottom, left).
pub fn read_frame_extents<C: Connection>(
    conn: &C,
    atoms: &Atoms,
    wid: Wid,
) -> Option<(u16, u16, u16, u16)> {
    let reply = get_property(conn, wid.0, atoms._NET_FRAME_EXTENTS, AtomEnum::CARDINAL, 4)?;
    let values: Vec<u32> = reply.value32()?.collect();
    if values.len() < 4 {
        return None;
    }
    // Property order is left, right, top, bottom.
    let clamp = |v: u32| v.min(u32::from(u16::MAX)) as u16;
    Some((clamp(values[2]), clamp(values[1]), clamp(values[3]), clamp(values[0])))
}

fn read_string_property<C: Connection>(conn: &C, wid: Wid, property: Atom) -> Option<String> {
    let reply = get_property(conn, wid.0, property, AtomEnum::ANY, 1024)?;
    if reply.value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&reply.value).into_owned())
}

/// `_NET_WM_NAME`, falling back to `WM_NAME`.
pub fn read_name<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Option<String> {
    read_string_property(conn, wid, atoms._NET_WM_NAME)
        .or_else(|| read_string_property(conn, wid, atoms.WM_NAME))
        .map(|s| s.trim_end_matches('\0').to_string())
}

/// `WM_CLASS` as (instance, general).
pub fn read_class<C: Connection>(
    conn: &C,
    atoms: &Atoms,
    wid: Wid,
) -> (Option<String>, Option<String>) {
    let Some(raw) = read_string_property(conn, wid, atoms.WM_CLASS) else {
        return (None, None);
    };
    let mut parts = raw.split('\0').filter(|s| !s.is_empty());
    (
        parts.next().map(str::to_string),
        parts.next().map(str::to_string),
    )
}

/// `WM_WINDOW_ROLE`.
pub fn read_role<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Option<String> {
    read_string_property(conn, wid, atoms.WM_WINDOW_ROLE)
        .map(|s| s.trim_end_matches('\0').to_string())
}

/// `WM_CLIENT_LEADER`, falling back to `WM_TRANSIENT_FOR`.
pub fn read_leader<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Wid {
    for atom in [atoms.WM_CLIENT_LEADER, atoms.WM_TRANSIENT_FOR] {
        if let Some(reply) = get_property(conn, wid.0, atom, AtomEnum::WINDOW, 1) {
            if let Some(value) = reply.value32().and_then(|mut v| v.next()) {
                if value != 0 {
                    return Wid(value);
                }
            }
        }
    }
    Wid::NONE
}

/// Presence test for `WM_STATE` (marks the client window).
pub fn has_wm_state<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> bool {
    get_property(conn, wid.0, atoms.WM_STATE, AtomEnum::ANY, 2).is_some()
}

/// `_COMPTON_SHADOW`: 0 disables, anything else enables; absent = `None`.
pub fn read_shadow_override<C: Connection>(conn: &C, atoms: &Atoms, wid: Wid) -> Option<bool> {
    let reply = get_property(conn, wid.0, atoms._COMPTON_SHADOW, AtomEnum::CARDINAL, 1)?;
    let raw = reply.value32()?.next()?;
    Some(raw != 0)
}

/// Desktop background pixmap from the root, trying the conventional atoms
/// in order.
pub fn read_root_pixmap<C: Connection>(conn: &C, atoms: &Atoms, root: Window) -> Option<u32> {
    for atom in [atoms._XROOTPMAP_ID, atoms.ESETROOT_PMAP_ID, atoms._XSETROOT_ID] {
        if let Some(reply) = get_property(conn, root, atom, AtomEnum::PIXMAP, 1) {
            if let Some(pixmap) = reply.value32().and_then(|mut v| v.next()) {
                if pixmap != 0 {
                    return Some(pixmap);
                }
            }
        }
    }
    None
}

/// `_NET_ACTIVE_WINDOW` on the root.
pub fn read_active_window<C: Connection>(conn: &C, atoms: &Atoms, root: Window) -> Wid {
    get_property(conn, root, atoms._NET_ACTIVE_WINDOW, AtomEnum::WINDOW, 1)
        .and_then(|r| r.value32().and_then(|mut v| v.next()))
        .map_or(Wid::NONE, Wid)
}
