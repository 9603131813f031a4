//! Wire-event translation: x11rb events in, `core-events` values out.
//!
//! Property payloads are read here, at translation time, so the dispatcher
//! receives complete facts instead of "something changed" pings. Events for
//! windows the compositor never tracks fall out as `None` and count toward
//! the discard telemetry.

use crate::host::XHost;
use crate::props;
use core_events::{
    Geometry, PropertyChange, RootPropertyChange, Wid, XEvent, DAMAGE_EVENTS, ERRORS_IGNORED,
    ERRORS_LOGGED, EVENTS_DISCARDED, EVENTS_TRANSLATED,
};
use core_region::Rect;
use std::sync::atomic::Ordering::Relaxed;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::Event;

impl XHost {
    /// Drain every queued event, translating as we go. The caller batches
    /// the result through the dispatcher before the next frame.
    pub fn poll_events(&mut self) -> Vec<XEvent> {
        let mut out = Vec::new();
        loop {
            match self.conn.poll_for_event() {
                Ok(Some(event)) => {
                    if let Some(translated) = self.translate(event) {
                        EVENTS_TRANSLATED.fetch_add(1, Relaxed);
                        out.push(translated);
                    } else {
                        EVENTS_DISCARDED.fetch_add(1, Relaxed);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(target: "xhost.event", error = %e, "connection_poll_failed");
                    out.push(XEvent::SelectionClear); // treated as fatal by the loop
                    break;
                }
            }
        }
        out
    }

    /// Translate one wire event; `None` for events without compositor
    /// meaning.
    pub fn translate(&mut self, event: Event) -> Option<XEvent> {
        match event {
            Event::CreateNotify(e) => {
                if e.parent != self.root || Some(e.window) == self.overlay() {
                    return None;
                }
                (e.window != self.root).then(|| XEvent::Create {
                    wid: Wid(e.window),
                    geom: Geometry::new(e.x, e.y, e.width, e.height, e.border_width),
                    override_redirect: e.override_redirect,
                    input_only: false,
                })
            }
            Event::ConfigureNotify(e) => {
                if e.window == self.root {
                    self.root_width = e.width;
                    self.root_height = e.height;
                    return Some(XEvent::ConfigureRoot {
                        width: e.width,
                        height: e.height,
                    });
                }
                Some(XEvent::Configure {
                    wid: Wid(e.window),
                    geom: Geometry::new(e.x, e.y, e.width, e.height, e.border_width),
                    above: Wid(e.above_sibling),
                })
            }
            Event::MapNotify(e) => {
                let wid = Wid(e.window);
                // Per-window interests are (re)selected on every map; the
                // damage object drives repaint from here on.
                self.select_window_events(wid);
                self.create_damage(wid);
                let has_alpha = self
                    .window_visual(wid)
                    .map(|v| v.has_alpha)
                    .unwrap_or(false);
                Some(XEvent::Map { wid, has_alpha })
            }
            Event::UnmapNotify(e) => {
                let wid = Wid(e.window);
                self.destroy_damage(wid);
                Some(XEvent::Unmap { wid })
            }
            Event::DestroyNotify(e) => {
                let wid = Wid(e.window);
                self.destroy_damage(wid);
                Some(XEvent::Destroy { wid })
            }
            Event::ReparentNotify(e) => {
                let to_root = e.parent == self.root;
                let geom = if to_root {
                    self.conn
                        .get_geometry(e.window)
                        .ok()
                        .and_then(|c| c.reply().ok())
                        .map(|g| Geometry::new(g.x, g.y, g.width, g.height, g.border_width))
                        .unwrap_or_else(|| Geometry::new(e.x, e.y, 1, 1, 0))
                } else {
                    Geometry::new(e.x, e.y, 1, 1, 0)
                };
                Some(XEvent::Reparent {
                    wid: Wid(e.window),
                    geom,
                    to_root,
                })
            }
            Event::CirculateNotify(e) => Some(XEvent::Circulate {
                wid: Wid(e.window),
                place_on_top: e.place == x11rb::protocol::xproto::Place::ON_TOP,
            }),
            Event::PropertyNotify(e) => self.translate_property(e),
            Event::DamageNotify(e) => {
                DAMAGE_EVENTS.fetch_add(1, Relaxed);
                let wid = Wid(e.drawable);
                self.ack_damage(wid);
                Some(XEvent::Damage {
                    wid,
                    rect: Rect::new(
                        i32::from(e.area.x),
                        i32::from(e.area.y),
                        i32::from(e.area.width),
                        i32::from(e.area.height),
                    ),
                })
            }
            Event::ShapeNotify(e) => {
                if e.shape_kind != x11rb::protocol::shape::SK::BOUNDING {
                    return None;
                }
                let wid = Wid(e.affected_window);
                Some(XEvent::Shape {
                    wid,
                    bounding: self.window_shape(wid),
                })
            }
            Event::FocusIn(e) => Some(XEvent::FocusIn { wid: Wid(e.event) }),
            Event::FocusOut(e) => Some(XEvent::FocusOut { wid: Wid(e.event) }),
            Event::RandrScreenChangeNotify(_) => Some(XEvent::ScreenChange {
                refresh_mhz: self.refresh_rate_mhz(),
            }),
            Event::SelectionClear(e) => {
                (e.selection == self.cm_selection()).then_some(XEvent::SelectionClear)
            }
            Event::Error(e) => {
                let serial = self.widen_serial(e.sequence);
                if self.ignore.should_ignore(serial) {
                    ERRORS_IGNORED.fetch_add(1, Relaxed);
                } else {
                    ERRORS_LOGGED.fetch_add(1, Relaxed);
                    warn!(
                        target: "xhost.event",
                        error_code = e.error_code,
                        major = e.major_opcode,
                        minor = e.minor_opcode,
                        extension = e.extension_name.as_deref(),
                        request = e.request_name,
                        serial,
                        "x_protocol_error"
                    );
                }
                None
            }
            _ => None,
        }
    }

    fn translate_property(
        &mut self,
        e: x11rb::protocol::xproto::PropertyNotifyEvent,
    ) -> Option<XEvent> {
        let atoms = &self.atoms;
        if e.window == self.root {
            if e.atom == atoms._XROOTPMAP_ID
                || e.atom == atoms._XSETROOT_ID
                || e.atom == atoms.ESETROOT_PMAP_ID
            {
                return Some(XEvent::RootProperty(RootPropertyChange::Background));
            }
            if e.atom == atoms._NET_ACTIVE_WINDOW {
                let active = self.active_window();
                return Some(XEvent::RootProperty(RootPropertyChange::ActiveWindow(
                    active,
                )));
            }
            return None;
        }

        let wid = Wid(e.window);
        let deleted = e.state == x11rb::protocol::xproto::Property::DELETE;
        let change = if e.atom == atoms._NET_WM_WINDOW_OPACITY {
            PropertyChange::Opacity(if deleted {
                None
            } else {
                props::read_opacity(&*self.conn, atoms, wid)
            })
        } else if e.atom == atoms._NET_WM_WINDOW_TYPE {
            PropertyChange::WindowType(
                props::read_wintype(&*self.conn, atoms, wid).unwrap_or_default(),
            )
        } else if e.atom == atoms._NET_FRAME_EXTENTS {
            let (top, right, bottom, left) =
                props::read_frame_extents(&*self.conn, atoms, wid).unwrap_or_default();
            PropertyChange::FrameExtents {
                top,
                right,
                bottom,
                left,
            }
        } else if e.atom == atoms._NET_WM_NAME || e.atom == atoms.WM_NAME {
            PropertyChange::Name(props::read_name(&*self.conn, atoms, wid))
        } else if e.atom == atoms.WM_CLASS {
            let (instance, general) = props::read_class(&*self.conn, atoms, wid);
            PropertyChange::Class { instance, general }
        } else if e.atom == atoms.WM_WINDOW_ROLE {
            PropertyChange::Role(props::read_role(&*self.conn, atoms, wid))
        } else if e.atom == atoms.WM_CLIENT_LEADER || e.atom == atoms.WM_TRANSIENT_FOR {
            PropertyChange::Leader(props::read_leader(&*self.conn, atoms, wid))
        } else if e.atom == atoms.WM_STATE {
            PropertyChange::WmState { present: !deleted }
        } else if e.atom == atoms._COMPTON_SHADOW {
            PropertyChange::ShadowOverride(if deleted {
                None
            } else {
                props::read_shadow_override(&*self.conn, atoms, wid)
            })
        } else {
            debug!(target: "xhost.event", %wid, atom = e.atom, "untracked_property_change");
            return None;
        };
        Some(XEvent::Property { wid, change })
    }
}
