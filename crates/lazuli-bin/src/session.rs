//! One compositing session against one X server.
//!
//! The session owns every collaborator — X host, backend, window stack,
//! damage ring, focus mirror, redirect controller — and wires them the way
//! the loop expects: events in through `dispatch_batch`, frames out through
//! `frame`, redirection transitions through `decide_redirection`.

use crate::redirect::{RedirAction, RedirectController};
use anyhow::{Context, Result};
use core_backend::{Backend, Image, VisualInfo};
use core_config::Config;
use core_dispatch::{dispatch, DispatchCtx, DispatchOutcome, FocusState};
use core_events::{RootPropertyChange, Wid, XEvent};
use core_region::Rect;
use core_render::{
    paint_all, paint_preprocess, DamageRing, FrameEnv, ImageOps, PaintSetup, PreprocessOutput,
    RenderMetrics, ShadowContext,
};
use core_state::{WinFlags, WinStack, Window};
use core_xhost::{XHost, XRenderBackend};
use std::rc::Rc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Image hooks over the live host + backend pair.
struct SessionImages<'a> {
    host: &'a mut XHost,
    backend: &'a mut dyn Backend,
}

impl ImageOps for SessionImages<'_> {
    fn rebind(&mut self, win: &mut Window) -> bool {
        let Some(pixmap) = self.host.name_window_pixmap(win.id) else {
            return false;
        };
        let Some(visual) = self.host.window_visual(win.id) else {
            return false;
        };
        match self.backend.bind_pixmap(win.id, pixmap, visual, true) {
            Ok(img) => {
                if let Some(old) = win.body_image.take() {
                    self.backend.release_image(old);
                }
                win.body_image = Some(img);
                win.flags.set(WinFlags::HAS_ALPHA, visual.has_alpha);
                true
            }
            Err(e) => {
                warn!(target: "runtime.session", wid = %win.id, error = %e, "pixmap_bind_failed");
                false
            }
        }
    }

    fn release(&mut self, win: &mut Window) {
        for img in [win.body_image.take(), win.shadow_image.take()]
            .into_iter()
            .flatten()
        {
            self.backend.release_image(img);
        }
    }
}

pub struct Session {
    pub host: XHost,
    pub backend: Box<dyn Backend>,
    pub stack: WinStack,
    pub ring: DamageRing,
    pub config: Config,
    pub focus: FocusState,
    pub redirect: RedirectController,
    pub metrics: RenderMetrics,
    shadow: ShadowContext,
    /// Configured screen region shadows never touch.
    shadow_exclude_region: Option<core_region::Region>,
    root_image: Option<Image>,
    monitors: Vec<Rect>,
    start: Instant,
    /// Preprocess verdict of the last frame; arms the fade timer.
    pub fade_running: bool,
    benchmark: Option<u64>,
    painted_frames: u64,
}

impl Session {
    pub fn new(display: Option<&str>, config: Config, benchmark: Option<u64>) -> Result<Self> {
        let mut host = XHost::connect(display)?;
        // Target the overlay when the server grants one; root otherwise.
        let target = match host.acquire_overlay() {
            Ok(overlay) => overlay,
            Err(e) => {
                warn!(target: "runtime.session", error = %e, "overlay_unavailable_painting_root");
                host.root
            }
        };
        let backend = XRenderBackend::new(
            Rc::clone(&host.conn),
            target,
            host.root_width,
            host.root_height,
            host.root_depth,
        )
        .context("rendering backend initialization")?;
        let backend: Box<dyn Backend> = Box::new(backend);

        let shadow = ShadowContext::from_config(&config);
        let shadow_exclude_region = (!config.shadow.exclude_region.is_empty()).then(|| {
            core_region::Region::from_rects(
                config
                    .shadow
                    .exclude_region
                    .iter()
                    .map(|&[x, y, w, h]| Rect::new(x, y, w, h)),
            )
        });
        let ring = DamageRing::new(backend.max_buffer_age());
        let redirect = RedirectController::new(config.unredir_delay_ms);
        let mut session = Self {
            monitors: host.monitors(),
            host,
            backend,
            stack: WinStack::new(),
            ring,
            config,
            focus: FocusState::default(),
            redirect,
            metrics: RenderMetrics::default(),
            shadow,
            shadow_exclude_region,
            root_image: None,
            start: Instant::now(),
            fade_running: false,
            benchmark,
            painted_frames: 0,
        };

        session.populate_initial_windows()?;
        session.redir_start();
        session.refresh_root_tile();
        let active = session.host.active_window();
        if !active.is_none() {
            let out = session.dispatch_one(&XEvent::RootProperty(
                RootPropertyChange::ActiveWindow(active),
            ));
            session.apply_outcome(&out)?;
        }
        info!(
            target: "runtime.session",
            windows = session.stack.len(),
            monitors = session.monitors.len(),
            config = %session.config,
            "session_ready"
        );
        Ok(session)
    }

    /// Milliseconds on the session's monotonic clock.
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn screen_rect(&self) -> Rect {
        Rect::new(
            0,
            0,
            i32::from(self.host.root_width),
            i32::from(self.host.root_height),
        )
    }

    /// Seed the stack from the server's current children, bottom first.
    fn populate_initial_windows(&mut self) -> Result<()> {
        let snapshots = self.host.query_tree_snapshots()?;
        // Children arrive bottom-to-top; inserting top-first at the stack
        // bottom reproduces the order.
        for snap in snapshots.iter().rev() {
            let mut win = Window::new(snap.wid, snap.geom);
            win.override_redirect = snap.override_redirect;
            win.flags.set(WinFlags::INPUT_ONLY, snap.input_only);
            win.flags.set(WinFlags::HAS_ALPHA, snap.has_alpha);
            win.wintype = snap.wintype.unwrap_or_default();
            win.prop_opacity = snap.opacity;
            if let Some((top, right, bottom, left)) = snap.frame_extents {
                win.frame_extents = core_state::FrameExtents {
                    top,
                    right,
                    bottom,
                    left,
                };
            }
            win.name = snap.name.clone();
            win.class_instance = snap.class_instance.clone();
            win.class_general = snap.class_general.clone();
            win.role = snap.role.clone();
            win.leader = snap.leader;
            win.shadow_prop_override = snap.shadow_override;
            if snap.is_client {
                win.client = snap.wid;
            }
            win.bounding_shape = self.host.window_shape(snap.wid);
            self.stack.insert(win, Wid::NONE);
            if snap.viewable {
                self.host.select_window_events(snap.wid);
                self.host.create_damage(snap.wid);
                let out = self.dispatch_one(&XEvent::Map {
                    wid: snap.wid,
                    has_alpha: snap.has_alpha,
                });
                self.apply_outcome(&out)?;
            }
        }
        Ok(())
    }

    fn dispatch_one(&mut self, event: &XEvent) -> DispatchOutcome {
        let mut ctx = DispatchCtx {
            stack: &mut self.stack,
            ring: &mut self.ring,
            config: &self.config,
            focus: &mut self.focus,
            root_width: self.host.root_width,
            root_height: self.host.root_height,
            redirected: self.redirect.redirected(),
        };
        dispatch(event, &mut ctx)
    }

    /// Dispatch a drained event batch; side effects (backend rebuilds, root
    /// tile re-fetch) run once at the end.
    pub fn dispatch_batch(&mut self, events: &[XEvent]) -> Result<DispatchOutcome> {
        let mut total = DispatchOutcome::default();
        for event in events {
            total.absorb(self.dispatch_one(event));
        }
        self.apply_outcome(&total)?;
        Ok(total)
    }

    fn apply_outcome(&mut self, out: &DispatchOutcome) -> Result<()> {
        for img in &out.orphaned_images {
            self.backend.release_image(*img);
        }
        for &(wid, opacity) in &out.opacity_prop_writes {
            self.host.set_opacity_property(wid, opacity);
        }
        if let Some((width, height)) = out.root_resized {
            self.handle_root_resize(width, height)?;
        }
        if out.root_background_changed {
            self.refresh_root_tile();
        }
        if out.refresh_mhz.is_some() {
            self.monitors = self.host.monitors();
        }
        Ok(())
    }

    /// Root geometry changed: rebuild or notify the backend, drop all
    /// damage history, repaint everything.
    fn handle_root_resize(&mut self, width: u16, height: u16) -> Result<()> {
        info!(target: "runtime.session", width, height, "root_geometry_changed");
        self.host.root_width = width;
        self.host.root_height = height;
        if let Some(img) = self.root_image.take() {
            self.backend.release_image(img);
        }
        if !self.backend.root_change(width, height) {
            // Backend cannot adjust in place: full reinit, fatal on failure.
            let target = self.host.overlay().unwrap_or(self.host.root);
            let rebuilt = XRenderBackend::new(
                Rc::clone(&self.host.conn),
                target,
                width,
                height,
                self.host.root_depth,
            )
            .context("backend reinitialization after root change")?;
            self.backend = Box::new(rebuilt);
        }
        self.ring.clear_all();
        self.ring.add_rect(self.screen_rect());
        self.refresh_root_tile();
        self.monitors = self.host.monitors();
        Ok(())
    }

    /// (Re-)bind the desktop background tile.
    fn refresh_root_tile(&mut self) {
        if let Some(old) = self.root_image.take() {
            self.backend.release_image(old);
        }
        if let Some(pixmap) = self.host.root_pixmap() {
            let visual = VisualInfo {
                visual: 0,
                depth: self.host.root_depth,
                has_alpha: false,
            };
            // The root pixmap belongs to whoever set the wallpaper.
            match self.backend.bind_pixmap(Wid::NONE, pixmap, visual, false) {
                Ok(img) => self.root_image = Some(img),
                Err(e) => {
                    warn!(target: "runtime.session", error = %e, "root_tile_bind_failed")
                }
            }
        }
        self.ring.add_rect(self.screen_rect());
    }

    /// Run one frame: preprocess always, paint only while redirected.
    pub fn frame(&mut self) -> PreprocessOutput {
        let env = FrameEnv {
            root_width: self.host.root_width,
            root_height: self.host.root_height,
            now_ms: self.now_ms(),
            redirected: self.redirect.redirected(),
        };
        let pre = {
            let mut images = SessionImages {
                host: &mut self.host,
                backend: self.backend.as_mut(),
            };
            paint_preprocess(
                &mut self.stack,
                &mut self.ring,
                &self.config,
                &env,
                &mut images,
                &mut self.metrics,
            )
        };
        self.fade_running = pre.fade_running;

        if self.redirect.redirected() {
            if self.benchmark.is_some() {
                // Benchmark frames are comparable only when full.
                self.ring.add_rect(env.screen_rect());
            }
            let setup = PaintSetup {
                config: &self.config,
                shadow: &self.shadow,
                root_image: self.root_image,
                shadow_exclude_region: self.shadow_exclude_region.as_ref(),
                monitors: &self.monitors,
            };
            match paint_all(
                &mut self.stack,
                &pre,
                &mut self.ring,
                &env,
                &setup,
                self.backend.as_mut(),
                &mut self.metrics,
            ) {
                Ok(true) => self.painted_frames += 1,
                Ok(false) => {}
                Err(e) => error!(target: "runtime.session", error = %e, "paint_failed"),
            }
            self.host.flush();
        }
        pre
    }

    /// True once benchmark mode has painted its quota.
    pub fn benchmark_done(&self) -> bool {
        self.benchmark
            .is_some_and(|limit| self.painted_frames >= limit)
    }

    pub fn benchmark_active(&self) -> bool {
        self.benchmark.is_some()
    }

    /// Feed the frame's unredirection verdict through the controller and
    /// execute whatever it decides.
    pub fn decide_redirection(&mut self, pre: &PreprocessOutput, now: Instant) {
        match self.redirect.note_decision(pre.unredir_possible, now) {
            RedirAction::Stop => self.redir_stop(),
            RedirAction::Start => self.redir_start(),
            RedirAction::None => {}
        }
    }

    /// Enter compositing: overlay up, subwindows redirected, damage ring
    /// sized to the backend, every viewable window bound, full repaint.
    pub fn redir_start(&mut self) {
        if self.redirect.redirected() {
            return;
        }
        self.host.map_overlay();
        if let Err(e) = self.host.redirect_subwindows() {
            error!(target: "runtime.redirect", error = %e, "redirect_failed");
            self.host.unmap_overlay();
            return;
        }
        self.ring = DamageRing::new(self.backend.max_buffer_age());
        let keys: Vec<_> = self.stack.iter_top_to_bottom().collect();
        {
            let mut images = SessionImages {
                host: &mut self.host,
                backend: self.backend.as_mut(),
            };
            for key in keys {
                let win = self.stack.win_mut(key);
                if !win.flags.contains(WinFlags::VIEWABLE)
                    || win.flags.contains(WinFlags::INPUT_ONLY)
                {
                    continue;
                }
                if images.rebind(win) {
                    win.flags.remove(WinFlags::STALE_IMAGE | WinFlags::IMAGE_ERROR);
                } else {
                    // Bind failures quarantine the window, not the start.
                    win.flags.insert(WinFlags::IMAGE_ERROR);
                }
            }
        }
        self.ring.add_rect(self.screen_rect());
        self.redirect.set_redirected(true);
        info!(target: "runtime.redirect", "redirection_started");
    }

    /// Leave compositing: images released, redirection undone, overlay
    /// hidden, damage history dropped.
    pub fn redir_stop(&mut self) {
        if !self.redirect.redirected() {
            return;
        }
        let keys: Vec<_> = self.stack.iter_top_to_bottom().collect();
        {
            let mut images = SessionImages {
                host: &mut self.host,
                backend: self.backend.as_mut(),
            };
            for key in keys {
                let win = self.stack.win_mut(key);
                images.release(win);
                win.flags.insert(WinFlags::STALE_IMAGE);
            }
        }
        if let Some(img) = self.root_image.take() {
            self.backend.release_image(img);
        }
        self.host.unredirect_subwindows();
        self.host.unmap_overlay();
        self.ring.clear_all();
        self.redirect.set_redirected(false);
        info!(target: "runtime.redirect", "redirection_stopped");
    }

    /// Staged teardown: images first, then redirection, then the windows in
    /// list order.
    pub fn shutdown(&mut self) {
        self.redir_stop();
        let keys: Vec<_> = self.stack.iter_top_to_bottom().collect();
        for key in keys {
            self.stack.remove(key);
        }
        self.host.release_overlay();
        self.host.flush();
        info!(target: "runtime.session", "session_closed");
    }
}
