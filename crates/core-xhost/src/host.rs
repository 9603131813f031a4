//! The X connection and everything requested over it.
//!
//! `XHost` owns the socket, the atom cache, extension bookkeeping, the
//! compositor-manager selection, the overlay window, per-window damage
//! objects, and the error-ignore ring. The engine never sees any of this;
//! it sees `core-events` values and the `core-backend` trait.

use crate::atoms::Atoms;
use crate::props;
use crate::serial::IgnoreRing;
use crate::XhostError;
use core_backend::PixmapId;
use core_backend::VisualInfo;
use core_events::{Geometry, Wid, WinType};
use core_region::Rect;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::connection::RequestConnection;
use x11rb::protocol::composite::{self, ConnectionExt as _};
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::render::ConnectionExt as _;
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xinerama::ConnectionExt as _;
use x11rb::protocol::xproto::{
    self, ChangeWindowAttributesAux, ConnectionExt as _, CreateWindowAux, EventMask, MapState,
    PropMode, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

/// Optional-extension availability after init.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extensions {
    pub shape: bool,
    pub randr: bool,
    pub xinerama: bool,
    pub present: bool,
    pub sync: bool,
}

/// One window's state as captured by the initial query-tree sweep.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub wid: Wid,
    pub geom: Geometry,
    pub viewable: bool,
    pub override_redirect: bool,
    pub input_only: bool,
    pub has_alpha: bool,
    pub wintype: Option<WinType>,
    pub opacity: Option<f64>,
    pub frame_extents: Option<(u16, u16, u16, u16)>,
    pub name: Option<String>,
    pub class_instance: Option<String>,
    pub class_general: Option<String>,
    pub role: Option<String>,
    pub leader: Wid,
    pub shadow_override: Option<bool>,
    pub is_client: bool,
}

/// The live X connection plus everything keyed to it.
///
/// The connection is reference-counted so the rendering backend can issue
/// requests on the same socket; single-threaded, so `Rc` suffices.
pub struct XHost {
    pub conn: std::rc::Rc<RustConnection>,
    pub screen_num: usize,
    pub root: u32,
    pub root_width: u16,
    pub root_height: u16,
    pub root_depth: u8,
    pub atoms: Atoms,
    pub extensions: Extensions,
    pub ignore: IgnoreRing,
    cm_selection: u32,
    selection_window: u32,
    overlay: Option<u32>,
    damage_objects: HashMap<Wid, u32>,
    /// High bits donor for widening 16-bit error serials.
    last_serial: u32,
}

impl XHost {
    /// Connect, negotiate extensions, and claim the `_NET_WM_CM_Sn`
    /// selection. Fails fast on any required piece.
    pub fn connect(display: Option<&str>) -> Result<Self, XhostError> {
        let (conn, screen_num) = x11rb::connect(display)?;
        let conn = std::rc::Rc::new(conn);
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let root_width = screen.width_in_pixels;
        let root_height = screen.height_in_pixels;
        let root_depth = screen.root_depth;

        let atoms = Atoms::new(conn.as_ref())
            .map_err(XhostError::from)?
            .reply()
            .map_err(XhostError::from)?;

        // Required: Composite >= 0.2 (manual redirection), Damage, XFixes,
        // Render. Each missing one is fatal.
        if conn
            .extension_information(composite::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(XhostError::ExtensionMissing("Composite"));
        }
        let composite_version = conn.composite_query_version(0, 4)?.reply()?;
        if composite_version.major_version == 0 && composite_version.minor_version < 2 {
            return Err(XhostError::ExtensionMissing("Composite >= 0.2"));
        }
        if conn
            .extension_information(damage::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(XhostError::ExtensionMissing("Damage"));
        }
        conn.damage_query_version(1, 1)?.reply()?;
        if conn
            .extension_information(x11rb::protocol::xfixes::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(XhostError::ExtensionMissing("XFixes"));
        }
        conn.xfixes_query_version(4, 0)?.reply()?;
        if conn
            .extension_information(x11rb::protocol::render::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(XhostError::ExtensionMissing("Render"));
        }
        conn.render_query_version(0, 11)?.reply()?;

        let mut extensions = Extensions::default();
        if conn.extension_information(shape::X11_EXTENSION_NAME)?.is_some() {
            conn.shape_query_version()?.reply()?;
            extensions.shape = true;
        } else {
            warn!(target: "xhost", "shape_extension_missing_shaped_windows_degrade");
        }
        if conn.extension_information(randr::X11_EXTENSION_NAME)?.is_some() {
            conn.randr_query_version(1, 2)?.reply()?;
            extensions.randr = true;
        } else {
            warn!(target: "xhost", "randr_extension_missing_refresh_tracking_degrades");
        }
        if conn
            .extension_information(x11rb::protocol::xinerama::X11_EXTENSION_NAME)?
            .is_some()
        {
            extensions.xinerama = conn.xinerama_is_active()?.reply().map(|r| r.state != 0).unwrap_or(false);
        }
        if !extensions.xinerama {
            warn!(target: "xhost", "xinerama_inactive_shadow_monitor_crop_degrades");
        }
        extensions.present = conn
            .extension_information(x11rb::protocol::present::X11_EXTENSION_NAME)?
            .is_some();
        extensions.sync = conn
            .extension_information(x11rb::protocol::sync::X11_EXTENSION_NAME)?
            .is_some();

        let mut host = Self {
            conn,
            screen_num,
            root,
            root_width,
            root_height,
            root_depth,
            atoms,
            extensions,
            ignore: IgnoreRing::new(),
            cm_selection: 0,
            selection_window: 0,
            overlay: None,
            damage_objects: HashMap::new(),
            last_serial: 0,
        };
        host.acquire_cm_selection()?;
        host.select_root_events()?;
        info!(
            target: "xhost",
            screen = screen_num,
            width = root_width,
            height = root_height,
            composite = %format!("{}.{}", composite_version.major_version, composite_version.minor_version),
            shape = host.extensions.shape,
            randr = host.extensions.randr,
            xinerama = host.extensions.xinerama,
            present = host.extensions.present,
            "x_host_ready"
        );
        Ok(host)
    }

    /// Claim `_NET_WM_CM_Sn`; an existing owner aborts startup.
    fn acquire_cm_selection(&mut self) -> Result<(), XhostError> {
        let name = format!("_NET_WM_CM_S{}", self.screen_num);
        let atom = self
            .conn
            .intern_atom(false, name.as_bytes())?
            .reply()?
            .atom;
        let owner = self.conn.get_selection_owner(atom)?.reply()?.owner;
        if owner != x11rb::NONE {
            return Err(XhostError::SelectionOwned(name));
        }

        let wid = self.conn.generate_id()?;
        self.conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            wid,
            self.root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new().override_redirect(1),
        )?;
        self.conn.set_selection_owner(wid, atom, x11rb::CURRENT_TIME)?;
        let owner = self.conn.get_selection_owner(atom)?.reply()?.owner;
        if owner != wid {
            return Err(XhostError::SelectionOwned(name));
        }

        let pid = std::process::id();
        self.conn.change_property32(
            PropMode::REPLACE,
            wid,
            self.atoms._NET_WM_PID,
            xproto::AtomEnum::CARDINAL,
            &[pid],
        )?;
        let version = env!("CARGO_PKG_VERSION");
        self.conn.change_property8(
            PropMode::REPLACE,
            wid,
            self.atoms.COMPTON_VERSION,
            self.atoms.UTF8_STRING,
            version.as_bytes(),
        )?;

        self.cm_selection = atom;
        self.selection_window = wid;
        debug!(target: "xhost", selection = %name, "cm_selection_acquired");
        Ok(())
    }

    /// The atom of our claimed compositor-manager selection.
    pub fn cm_selection(&self) -> u32 {
        self.cm_selection
    }

    /// The hidden window owning the selection (it carries our PID/version
    /// properties).
    pub fn selection_window(&self) -> u32 {
        self.selection_window
    }

    fn select_root_events(&self) -> Result<(), XhostError> {
        self.conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::SUBSTRUCTURE_NOTIFY
                    | EventMask::STRUCTURE_NOTIFY
                    | EventMask::PROPERTY_CHANGE,
            ),
        )?;
        if self.extensions.randr {
            self.conn
                .randr_select_input(self.root, randr::NotifyMask::SCREEN_CHANGE)?;
        }
        self.conn.flush()?;
        Ok(())
    }

    /// Track property changes (and focus) on one top-level window.
    pub fn select_window_events(&mut self, wid: Wid) {
        let cookie = self.conn.change_window_attributes(
            wid.0,
            &ChangeWindowAttributesAux::new()
                .event_mask(EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE),
        );
        self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        if self.extensions.shape {
            let cookie = self.conn.shape_select_input(wid.0, true);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        }
    }

    /// Record a request whose error is expected (target may be destroyed).
    fn ignore_errors_of(&mut self, seq: Result<u64, x11rb::errors::ConnectionError>) {
        if let Ok(seq) = seq {
            let serial = seq as u32;
            self.last_serial = serial;
            self.ignore.push(serial);
        }
    }

    /// Widen a 16-bit wire serial using the most recent full serial.
    pub fn widen_serial(&self, narrow: u16) -> u32 {
        let candidate = (self.last_serial & 0xffff_0000) | u32::from(narrow);
        // The error belongs to a recent request; pick the 64K block closest
        // to the last issued serial.
        if candidate.wrapping_sub(self.last_serial) > 0x8000
            && self.last_serial.wrapping_sub(candidate) > 0x8000
        {
            candidate.wrapping_add(0x1_0000)
        } else {
            candidate
        }
    }

    // ---------------------------------------------------------------------
    // Redirection requests
    // ---------------------------------------------------------------------

    /// Acquire (and implicitly map) the overlay window and make it
    /// click-through.
    pub fn acquire_overlay(&mut self) -> Result<u32, XhostError> {
        let overlay = self
            .conn
            .composite_get_overlay_window(self.root)?
            .reply()?
            .overlay_win;
        if self.extensions.shape {
            // Empty input shape: events fall through to the windows below.
            self.conn.shape_rectangles(
                shape::SO::SET,
                shape::SK::INPUT,
                xproto::ClipOrdering::UNSORTED,
                overlay,
                0,
                0,
                &[],
            )?;
        }
        self.conn.flush()?;
        self.overlay = Some(overlay);
        debug!(target: "xhost", overlay, "overlay_acquired");
        Ok(overlay)
    }

    pub fn overlay(&self) -> Option<u32> {
        self.overlay
    }

    /// Map the overlay for a redirection start.
    pub fn map_overlay(&mut self) {
        if let Some(overlay) = self.overlay {
            let cookie = self.conn.map_window(overlay);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        }
    }

    /// Hide the overlay while unredirected so it cannot occlude the screen.
    pub fn unmap_overlay(&mut self) {
        if let Some(overlay) = self.overlay {
            let cookie = self.conn.unmap_window(overlay);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        }
    }

    pub fn release_overlay(&mut self) {
        if self.overlay.take().is_some() {
            let cookie = self.conn.composite_release_overlay_window(self.root);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
            let _ = self.conn.flush();
        }
    }

    /// Route every child of the root into off-screen pixmaps.
    pub fn redirect_subwindows(&mut self) -> Result<(), XhostError> {
        self.conn
            .composite_redirect_subwindows(self.root, composite::Redirect::MANUAL)?
            .check()
            .map_err(|e| {
                XhostError::Protocol(format!("cannot redirect subwindows (another CM?): {e}"))
            })?;
        Ok(())
    }

    pub fn unredirect_subwindows(&mut self) {
        let cookie = self
            .conn
            .composite_unredirect_subwindows(self.root, composite::Redirect::MANUAL);
        self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        let _ = self.conn.flush();
    }

    // ---------------------------------------------------------------------
    // Per-window resources
    // ---------------------------------------------------------------------

    /// Create the damage object driving repaint for one window.
    pub fn create_damage(&mut self, wid: Wid) {
        if self.damage_objects.contains_key(&wid) {
            return;
        }
        let Ok(id) = self.conn.generate_id() else {
            return;
        };
        let cookie = self
            .conn
            .damage_create(id, wid.0, damage::ReportLevel::NON_EMPTY);
        self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        self.damage_objects.insert(wid, id);
    }

    pub fn destroy_damage(&mut self, wid: Wid) {
        if let Some(id) = self.damage_objects.remove(&wid) {
            let cookie = self.conn.damage_destroy(id);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        }
    }

    /// Acknowledge a damage report so the server keeps sending them.
    pub fn ack_damage(&mut self, wid: Wid) {
        if let Some(&id) = self.damage_objects.get(&wid) {
            let cookie = self.conn.damage_subtract(id, x11rb::NONE, x11rb::NONE);
            self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
        }
    }

    /// Name the window's off-screen pixmap. `None` when the window vanished
    /// or was never viewable (the caller flags an image error).
    pub fn name_window_pixmap(&mut self, wid: Wid) -> Option<PixmapId> {
        let pixmap = self.conn.generate_id().ok()?;
        match self.conn.composite_name_window_pixmap(wid.0, pixmap) {
            Ok(cookie) => match cookie.check() {
                Ok(()) => Some(PixmapId(pixmap)),
                Err(e) => {
                    debug!(target: "xhost", %wid, error = %e, "name_window_pixmap_failed");
                    None
                }
            },
            Err(_) => None,
        }
    }

    /// Visual information needed to bind a window's pixmap.
    pub fn window_visual(&self, wid: Wid) -> Option<VisualInfo> {
        let attrs = self.conn.get_window_attributes(wid.0).ok()?.reply().ok()?;
        let geom = self.conn.get_geometry(wid.0).ok()?.reply().ok()?;
        Some(VisualInfo {
            visual: attrs.visual,
            depth: geom.depth,
            has_alpha: geom.depth == 32,
        })
    }

    /// Current bounding shape, `None` for plain rectangles.
    pub fn window_shape(&self, wid: Wid) -> Option<core_region::Region> {
        if !self.extensions.shape {
            return None;
        }
        let extents = self.conn.shape_query_extents(wid.0).ok()?.reply().ok()?;
        if !extents.bounding_shaped {
            return None;
        }
        let rects = self
            .conn
            .shape_get_rectangles(wid.0, shape::SK::BOUNDING)
            .ok()?
            .reply()
            .ok()?;
        Some(core_region::Region::from_rects(rects.rectangles.iter().map(
            |r| {
                Rect::new(
                    i32::from(r.x),
                    i32::from(r.y),
                    i32::from(r.width),
                    i32::from(r.height),
                )
            },
        )))
    }

    // ---------------------------------------------------------------------
    // Initial sweep and root state
    // ---------------------------------------------------------------------

    /// Capture every current child of the root, bottom-to-top.
    pub fn query_tree_snapshots(&mut self) -> Result<Vec<WindowSnapshot>, XhostError> {
        let tree = self.conn.query_tree(self.root)?.reply()?;
        let mut out = Vec::with_capacity(tree.children.len());
        for child in tree.children {
            let wid = Wid(child);
            let Ok(attrs) = self.conn.get_window_attributes(child)?.reply() else {
                continue;
            };
            let Ok(geom_reply) = self.conn.get_geometry(child)?.reply() else {
                continue;
            };
            let input_only = attrs.class == WindowClass::INPUT_ONLY;
            let (instance, general) = props::read_class(&*self.conn, &self.atoms, wid);
            out.push(WindowSnapshot {
                wid,
                geom: Geometry::new(
                    geom_reply.x,
                    geom_reply.y,
                    geom_reply.width,
                    geom_reply.height,
                    geom_reply.border_width,
                ),
                viewable: attrs.map_state == MapState::VIEWABLE,
                override_redirect: attrs.override_redirect,
                input_only,
                has_alpha: geom_reply.depth == 32,
                wintype: props::read_wintype(&*self.conn, &self.atoms, wid),
                opacity: props::read_opacity(&*self.conn, &self.atoms, wid),
                frame_extents: props::read_frame_extents(&*self.conn, &self.atoms, wid),
                name: props::read_name(&*self.conn, &self.atoms, wid),
                class_instance: instance,
                class_general: general,
                role: props::read_role(&*self.conn, &self.atoms, wid),
                leader: props::read_leader(&*self.conn, &self.atoms, wid),
                shadow_override: props::read_shadow_override(&*self.conn, &self.atoms, wid),
                is_client: props::has_wm_state(&*self.conn, &self.atoms, wid),
            });
        }
        Ok(out)
    }

    /// Monitor rectangles for shadow cropping (empty without Xinerama).
    pub fn monitors(&self) -> Vec<Rect> {
        if !self.extensions.xinerama {
            return Vec::new();
        }
        let Ok(cookie) = self.conn.xinerama_query_screens() else {
            return Vec::new();
        };
        let Ok(reply) = cookie.reply() else {
            return Vec::new();
        };
        reply
            .screen_info
            .iter()
            .map(|s| {
                Rect::new(
                    i32::from(s.x_org),
                    i32::from(s.y_org),
                    i32::from(s.width),
                    i32::from(s.height),
                )
            })
            .collect()
    }

    /// Current refresh rate in millihertz (0 when unknown).
    pub fn refresh_rate_mhz(&self) -> u32 {
        if !self.extensions.randr {
            return 0;
        }
        self.conn
            .randr_get_screen_info(self.root)
            .ok()
            .and_then(|c| c.reply().ok())
            .map(|r| u32::from(r.rate) * 1000)
            .unwrap_or(0)
    }

    /// Root background pixmap, if any is advertised.
    pub fn root_pixmap(&self) -> Option<PixmapId> {
        props::read_root_pixmap(&*self.conn, &self.atoms, self.root).map(PixmapId)
    }

    /// Active window per `_NET_ACTIVE_WINDOW`.
    pub fn active_window(&self) -> Wid {
        props::read_active_window(&*self.conn, &self.atoms, self.root)
    }

    /// Write `_NET_WM_WINDOW_OPACITY` (opacity rules mirror their result).
    pub fn set_opacity_property(&mut self, wid: Wid, opacity: f64) {
        let raw = (opacity.clamp(0.0, 1.0) * u32::MAX as f64) as u32;
        let cookie = self.conn.change_property32(
            PropMode::REPLACE,
            wid.0,
            self.atoms._NET_WM_WINDOW_OPACITY,
            xproto::AtomEnum::CARDINAL,
            &[raw],
        );
        self.ignore_errors_of(cookie.map(|c| c.sequence_number()));
    }

    pub fn flush(&self) {
        let _ = self.conn.flush();
    }

    /// Raw socket fd for readiness integration with the event loop.
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.conn.stream().as_raw_fd()
    }
}
