//! Preprocess pass: one top-to-bottom stack walk per frame.
//!
//! Responsibilities, in per-window order:
//! 1. Advance the fade machine and resolve finished fades. A window can be
//!    freed right here (destroy fade completed); everything below tolerates
//!    that by skipping to the next key.
//! 2. Recompute `dim` from focus, damaging the window when it flips.
//! 3. Recompute the paint mode (SOLID / FRAME_TRANS / TRANS).
//! 4. Decide `to_paint`; a flip against the previous frame invalidates the
//!    opaque-above cache and damages the window.
//! 5. Refresh the effective shadow opacity.
//! 6. Thread the opaque-above accumulator downward, sharing one region
//!    instance across runs of windows that see the same union.
//! 7. Track whether the topmost painted window would justify unredirection.
//! 8. Rebind stale images; a failed bind flags IMAGE_ERROR and skips the
//!    window without failing the frame.
//! 9. Append survivors to the frame's paint list.
//!
//! The output is owned by the frame: the paint list dies with it, and no
//! window keeps references into it.

use crate::damage::DamageRing;
use crate::RenderMetrics;
use core_config::Config;
use core_region::{Rect, Region, SharedRegion};
use core_state::{
    step_fade, FadeFinish, FadeParams, ForceMode, WinFlags, WinKey, WinMode, WinStack, WinState,
    Window,
};
use std::rc::Rc;
use tracing::{debug, trace};

/// Hooks the session provides for binding and releasing window images.
///
/// Binding needs the X connection (naming a composite pixmap), which this
/// crate must not know about; tests plug in a recording implementation.
pub trait ImageOps {
    /// Rebind `win`'s body image to its current pixmap, replacing
    /// `win.body_image`. Returns false on failure.
    fn rebind(&mut self, win: &mut Window) -> bool;
    /// Release the window's body and shadow images.
    fn release(&mut self, win: &mut Window);
}

/// Immutable per-frame inputs.
#[derive(Debug, Clone, Copy)]
pub struct FrameEnv {
    pub root_width: u16,
    pub root_height: u16,
    /// Monotonic frame time in milliseconds.
    pub now_ms: u64,
    pub redirected: bool,
}

impl FrameEnv {
    pub fn screen_rect(&self) -> Rect {
        Rect::new(0, 0, i32::from(self.root_width), i32::from(self.root_height))
    }
}

/// What a preprocess run produced.
#[derive(Debug, Default)]
pub struct PreprocessOutput {
    /// Paint order, head = topmost painted window. The paint pass walks it
    /// in reverse (bottom-to-top).
    pub paint_list: Vec<WinKey>,
    /// At least one opacity animation still needs ticks.
    pub fade_running: bool,
    /// Topmost painted window is solid, fullscreen, and not excluded.
    pub unredir_possible: bool,
    /// Destroy fades resolved this pass (windows freed).
    pub destroyed: usize,
}

/// Whether this window's transitions may animate at all right now.
///
/// Redirection off skips every fade (redirection-off transitions never animate); force overrides
/// beat wintype policy, which beats the exclude rule list.
pub fn fades_allowed(win: &Window, config: &Config, redirected: bool) -> bool {
    if !redirected {
        return false;
    }
    match win.fade_force {
        ForceMode::On => return true,
        ForceMode::Off => return false,
        ForceMode::Unset => {}
    }
    if config.wintypes.get(win.wintype).fade == Some(false) {
        return false;
    }
    if config.fade.no_fading_openclose
        && matches!(
            win.state,
            WinState::Mapping | WinState::Unmapping | WinState::Destroying
        )
    {
        return false;
    }
    !config.fade_exclude.matches(&win.rule_target(config))
}

/// The once-per-frame walk. See the module docs for the step list.
pub fn paint_preprocess(
    stack: &mut WinStack,
    ring: &mut DamageRing,
    config: &Config,
    env: &FrameEnv,
    images: &mut dyn ImageOps,
    metrics: &mut RenderMetrics,
) -> PreprocessOutput {
    let fade_params = FadeParams::from(config);
    let screen = env.screen_rect();
    let mut out = PreprocessOutput::default();

    // Opaque-above accumulator threaded top-to-bottom. `acc_shared` is the
    // instance handed to windows; it is replaced only when the union grows,
    // so a run of windows under the same opaque cover shares one region.
    let mut acc = Region::new();
    let mut acc_shared: SharedRegion = Rc::new(Region::new());
    let mut saw_painted = false;

    let keys: Vec<WinKey> = stack.iter_top_to_bottom().collect();
    for key in keys {
        // ---- 1. fade step + finish ------------------------------------
        let allowed = fades_allowed(stack.win(key), config, env.redirected);
        {
            let win = stack.win_mut(key);
            if allowed {
                if step_fade(win, env.now_ms, &fade_params) {
                    let extents = win.extents();
                    ring.add_rect(extents);
                }
            } else if win.opacity != win.opacity_tgt {
                win.opacity = win.opacity_tgt;
                let extents = win.extents();
                ring.add_rect(extents);
            }
        }
        match stack.win_mut(key).check_fade_finished() {
            FadeFinish::Destroyed => {
                let mut corpse = stack.remove(key);
                images.release(&mut corpse);
                ring.add_rect(corpse.extents());
                debug!(target: "render.preprocess", wid = %corpse.id, "finish_destroy");
                out.destroyed += 1;
                continue;
            }
            FadeFinish::BecameUnmapped => {
                let win = stack.win_mut(key);
                let extents = win.extents();
                images.release(win);
                win.flags.set(WinFlags::PAINTED, false);
                ring.add_rect(extents);
                trace!(target: "render.preprocess", wid = %win.id, "finish_unmap");
                continue;
            }
            FadeFinish::BecameMapped | FadeFinish::None => {}
        }
        {
            let win = stack.win(key);
            if win.state.is_fading() && win.opacity != win.opacity_tgt {
                out.fade_running = true;
            }
        }

        let win = stack.win_mut(key);

        // ---- 2. dim from focus ----------------------------------------
        let dim_now = config.opacity.inactive_dim > 0.0
            && !win.focused_effective(config)
            && win.state != WinState::Unmapped;
        if dim_now != win.flags.contains(WinFlags::DIM) {
            win.flags.set(WinFlags::DIM, dim_now);
            let extents = win.extents();
            ring.add_rect(extents);
        }

        // ---- 3. paint mode --------------------------------------------
        win.update_mode(config.opacity.frame);

        // ---- 4. to_paint ----------------------------------------------
        let mut to_paint = decide_to_paint(win, screen);
        let was_painted = win.flags.contains(WinFlags::PAINTED);

        // ---- 8 (early half). stale image rebind -----------------------
        // Runs before the flip comparison so a failed bind counts as a
        // visibility change in the same frame.
        if to_paint
            && win.flags.contains(WinFlags::STALE_IMAGE)
            && !win.flags.contains(WinFlags::IMAGE_ERROR)
        {
            if images.rebind(win) {
                win.flags.remove(WinFlags::STALE_IMAGE);
            } else {
                win.flags.insert(WinFlags::IMAGE_ERROR);
                metrics.image_errors += 1;
                to_paint = false;
                debug!(target: "render.preprocess", wid = %win.id, "image_bind_failed");
            }
        }

        if to_paint != was_painted {
            win.flags.remove(WinFlags::REG_IGNORE_VALID);
            win.reg_ignore = None;
            let extents = win.extents();
            ring.add_rect(extents);
            trace!(
                target: "render.preprocess",
                wid = %win.id,
                to_paint,
                "visibility_flip"
            );
        }
        win.flags.set(WinFlags::PAINTED, to_paint);

        // ---- 5. shadow opacity ----------------------------------------
        if to_paint {
            win.shadow_opacity = config.shadow.opacity * win.opacity * config.opacity.frame;
        }

        // ---- 6. opaque-above cache ------------------------------------
        // A cache invalidated by a stack mutation means this window's
        // visibility changed: repaint its whole footprint.
        if !win.flags.contains(WinFlags::REG_IGNORE_VALID) && to_paint {
            let extents = win.extents();
            ring.add_rect(extents);
        }
        win.reg_ignore = Some(Rc::clone(&acc_shared));
        win.flags.insert(WinFlags::REG_IGNORE_VALID);
        if to_paint && win.mode == WinMode::Solid && !config.force_win_blend {
            let opaque = win.shape_on_screen().intersect_rect(screen);
            if !opaque.is_empty() {
                acc = acc.union(&opaque);
                acc_shared = Rc::new(acc.clone());
            }
        }

        // ---- 7. unredirection candidate -------------------------------
        if to_paint && !saw_painted {
            saw_painted = true;
            out.unredir_possible = config.unredir_if_possible
                && win.mode == WinMode::Solid
                && win.is_fullscreen(env.root_width, env.root_height)
                && !win.flags.contains(WinFlags::UNREDIR_EXCLUDED)
                && !config.unredir_exclude.matches(&win.rule_target(config));
        }

        // ---- 9. paint list --------------------------------------------
        if to_paint {
            out.paint_list.push(key);
        }
    }

    if out.fade_running {
        metrics.fade_frames += 1;
    }
    out
}

/// The per-window visibility cull. Pure so the boundary cases are unit-testable.
fn decide_to_paint(win: &Window, screen: Rect) -> bool {
    if win.flags.contains(WinFlags::INPUT_ONLY) {
        return false;
    }
    if !win.flags.contains(WinFlags::EVER_DAMAGED) {
        return false;
    }
    if win.state == WinState::Unmapped {
        return false;
    }
    if win.border_rect().intersect(&screen).is_none() {
        return false;
    }
    if !win.flags.contains(WinFlags::VIEWABLE) && win.body_image.is_none() {
        return false;
    }
    if win.opacity * 255.0 < 1.0 {
        return false;
    }
    if win.flags.contains(WinFlags::PAINT_EXCLUDED) {
        return false;
    }
    if win.flags.contains(WinFlags::IMAGE_ERROR) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::{Geometry, Wid};

    fn screen() -> Rect {
        Rect::new(0, 0, 1280, 720)
    }

    fn paintable() -> Window {
        let mut w = Window::new(Wid(1), Geometry::new(10, 10, 100, 100, 0));
        w.state = WinState::Mapped;
        w.opacity = 1.0;
        w.opacity_tgt = 1.0;
        w.flags
            .insert(WinFlags::EVER_DAMAGED | WinFlags::VIEWABLE);
        w
    }

    #[test]
    fn cull_never_damaged() {
        let mut w = paintable();
        w.flags.remove(WinFlags::EVER_DAMAGED);
        assert!(!decide_to_paint(&w, screen()));
    }

    #[test]
    fn cull_fully_off_screen() {
        let mut w = paintable();
        w.geom.x = 2000;
        assert!(!decide_to_paint(&w, screen()), "off right edge");
        w.geom.x = -200;
        assert!(!decide_to_paint(&w, screen()), "off left edge");
        w.geom.x = -50;
        assert!(decide_to_paint(&w, screen()), "partially visible paints");
    }

    #[test]
    fn cull_nearly_transparent() {
        let mut w = paintable();
        w.opacity = 0.003; // 0.003 * 255 < 1
        assert!(!decide_to_paint(&w, screen()));
        w.opacity = 0.004;
        assert!(decide_to_paint(&w, screen()));
    }

    #[test]
    fn cull_input_only_and_errors() {
        let mut w = paintable();
        w.flags.insert(WinFlags::INPUT_ONLY);
        assert!(!decide_to_paint(&w, screen()));

        let mut w = paintable();
        w.flags.insert(WinFlags::IMAGE_ERROR);
        assert!(!decide_to_paint(&w, screen()));

        let mut w = paintable();
        w.flags.insert(WinFlags::PAINT_EXCLUDED);
        assert!(!decide_to_paint(&w, screen()));
    }

    #[test]
    fn fading_out_window_needs_an_image() {
        let mut w = paintable();
        w.state = WinState::Unmapping;
        w.flags.remove(WinFlags::VIEWABLE);
        w.opacity = 0.5;
        assert!(!decide_to_paint(&w, screen()), "no image to show");
        w.body_image = Some(core_backend::Image(9));
        assert!(decide_to_paint(&w, screen()), "last image keeps it visible");
    }
}
