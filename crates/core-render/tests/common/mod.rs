//! Shared harness for pipeline integration tests: a window stack, a damage
//! ring, and a recording backend wired together the way the session wires
//! the real ones.

use core_backend::recording::RecordingBackend;
use core_backend::{Backend, PixmapId, VisualInfo};
use core_config::Config;
use core_render::{
    paint_all, paint_preprocess, DamageRing, FrameEnv, ImageOps, PaintSetup, PreprocessOutput,
    RenderMetrics, ShadowContext,
};
use core_events::{Geometry, Wid};
use core_state::{WinFlags, WinKey, WinStack, Window};

pub const ROOT_W: u16 = 1280;
pub const ROOT_H: u16 = 720;

/// Session-shaped image hooks over the recording backend.
pub struct TestImages<'a> {
    pub backend: &'a mut RecordingBackend,
}

impl ImageOps for TestImages<'_> {
    fn rebind(&mut self, win: &mut Window) -> bool {
        let visual = VisualInfo {
            visual: 0x21,
            depth: if win.flags.contains(WinFlags::HAS_ALPHA) { 32 } else { 24 },
            has_alpha: win.flags.contains(WinFlags::HAS_ALPHA),
        };
        match self
            .backend
            .bind_pixmap(win.id, PixmapId(win.id.0), visual, true)
        {
            Ok(img) => {
                if let Some(old) = win.body_image.take() {
                    self.backend.release_image(old);
                }
                win.body_image = Some(img);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&mut self, win: &mut Window) {
        if let Some(img) = win.body_image.take() {
            self.backend.release_image(img);
        }
        if let Some(img) = win.shadow_image.take() {
            self.backend.release_image(img);
        }
    }
}

pub struct Harness {
    pub stack: WinStack,
    pub ring: DamageRing,
    pub config: Config,
    pub backend: RecordingBackend,
    pub metrics: RenderMetrics,
    pub redirected: bool,
}

impl Harness {
    pub fn new() -> Self {
        let backend = RecordingBackend::new(3);
        Self {
            stack: WinStack::new(),
            ring: DamageRing::new(backend.max_buffer_age()),
            config: Config::default(),
            backend,
            metrics: RenderMetrics::default(),
            redirected: true,
        }
    }

    pub fn env(&self, now_ms: u64) -> FrameEnv {
        FrameEnv {
            root_width: ROOT_W,
            root_height: ROOT_H,
            now_ms,
            redirected: self.redirected,
        }
    }

    /// Insert a window at the top of the stack and deliver its map + first
    /// damage, the way the dispatcher would.
    pub fn map_window(&mut self, id: u32, geom: Geometry) -> WinKey {
        let win = Window::new(Wid(id), geom);
        let top = self
            .stack
            .iter_top_to_bottom()
            .next()
            .map(|k| self.stack.win(k).id);
        let key = match top {
            // New windows arrive above the current top.
            Some(_) => {
                let key = self.stack.insert(win, Wid::NONE).unwrap();
                self.stack.circulate(Wid(id), true);
                key
            }
            None => self.stack.insert(win, Wid::NONE).unwrap(),
        };
        let w = self.stack.win_mut(key);
        w.mark_mapping();
        let (tgt, src) = core_state::compute_target(w, &self.config);
        w.set_opacity_target(tgt, src, self.redirected);
        w.flags.insert(WinFlags::EVER_DAMAGED);
        let extents = w.extents();
        self.ring.add_rect(extents);
        key
    }

    pub fn preprocess(&mut self, now_ms: u64) -> PreprocessOutput {
        let env = self.env(now_ms);
        let mut images = TestImages {
            backend: &mut self.backend,
        };
        paint_preprocess(
            &mut self.stack,
            &mut self.ring,
            &self.config,
            &env,
            &mut images,
            &mut self.metrics,
        )
    }

    pub fn paint(&mut self, pre: &PreprocessOutput, now_ms: u64) -> bool {
        let env = self.env(now_ms);
        let shadow = ShadowContext::from_config(&self.config);
        let setup = PaintSetup {
            config: &self.config,
            shadow: &shadow,
            root_image: None,
            shadow_exclude_region: None,
            monitors: &[],
        };
        paint_all(
            &mut self.stack,
            pre,
            &mut self.ring,
            &env,
            &setup,
            &mut self.backend,
            &mut self.metrics,
        )
        .expect("paint")
    }

    /// One full frame at `now_ms`; returns the preprocess output.
    pub fn frame(&mut self, now_ms: u64) -> PreprocessOutput {
        let pre = self.preprocess(now_ms);
        self.paint(&pre, now_ms);
        pre
    }

    /// Opacity of a live window by id (panics when gone).
    pub fn opacity_of(&self, id: u32) -> f64 {
        let key = self.stack.find(Wid(id)).expect("window indexed");
        self.stack.win(key).opacity
    }
}

/// Fullscreen geometry for the harness screen.
pub fn fullscreen_geom() -> Geometry {
    Geometry::new(0, 0, ROOT_W, ROOT_H, 0)
}

/// An ordinary mid-screen window.
pub fn small_geom(x: i16, y: i16) -> Geometry {
    Geometry::new(x, y, 200, 150, 0)
}
