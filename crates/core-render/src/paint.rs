//! Paint pass: consume the frame's paint list bottom-to-top.
//!
//! Order per frame: root tile, then per window shadow → blur → invert →
//! body → dim, then one `present`. All clipping flows through regions; the
//! backend never decides what is visible.
//!
//! Clipping rules:
//! * `region` is the frame damage intersected with the screen; nothing
//!   outside it is touched.
//! * A window body is clipped against the window's own `reg_ignore` (pixels
//!   known hidden by opaque windows above) and its bounding shape.
//! * A shadow is clipped against the window's own `reg_ignore`, the global
//!   shadow-exclude region, optionally its monitor, and (for non-solid
//!   windows) the window's own shape so the shadow cannot bleed through a
//!   translucent body.

use crate::damage::DamageRing;
use crate::kernel::ShadowContext;
use crate::preprocess::{FrameEnv, PreprocessOutput};
use crate::RenderMetrics;
use core_backend::{Backend, BackendError, BlurPass, Image, ImageOp};
use core_config::Config;
use core_region::{Rect, Region};
use core_state::{FrameExtents, WinFlags, WinMode, WinStack};
use tracing::{trace, warn};

/// Session-owned paint inputs that outlive any single frame.
pub struct PaintSetup<'a> {
    pub config: &'a Config,
    pub shadow: &'a ShadowContext,
    /// Root background tile; `None` paints no root (first frames only).
    pub root_image: Option<Image>,
    /// Screen-space region shadows may never touch.
    pub shadow_exclude_region: Option<&'a Region>,
    /// Monitor rectangles for shadow cropping; empty when Xinerama is absent.
    pub monitors: &'a [Rect],
}

/// Paint one frame. Returns false when the damage region was empty and no
/// present was issued (the ring is rotated only after a real present).
pub fn paint_all(
    stack: &mut WinStack,
    pre: &PreprocessOutput,
    ring: &mut DamageRing,
    env: &FrameEnv,
    setup: &PaintSetup<'_>,
    backend: &mut dyn Backend,
    metrics: &mut RenderMetrics,
) -> Result<bool, BackendError> {
    let screen_region = Region::from_rect(env.screen_rect());

    // 1. Frame damage ∩ screen. An empty or unaged buffer repaints fully.
    let age = backend.buffer_age();
    let region = if age < 1 || !backend.caps().tracks_buffer_age {
        screen_region.clone()
    } else {
        ring.collect(age as usize).intersect(&screen_region)
    };
    if region.is_empty() {
        trace!(target: "render.paint", "no_damage_skip_frame");
        return Ok(false);
    }
    let full = region == screen_region;

    // 2–3. Root tile under everything not known-hidden.
    let reg_paint_root = match pre
        .paint_list
        .last()
        .and_then(|&k| stack.win(k).reg_ignore.clone())
    {
        Some(ignore) => region.subtract(&ignore),
        None => region.clone(),
    };
    if let Some(root_img) = setup.root_image {
        if !reg_paint_root.is_empty() {
            backend.compose(root_img, 0, 0, &reg_paint_root, &screen_region);
        }
    }

    // 4. Windows, bottom of the paint list first.
    for &key in pre.paint_list.iter().rev() {
        paint_shadow(stack, key, &region, &screen_region, setup, backend, metrics);
        paint_body(stack, key, &region, &screen_region, setup, backend, metrics);
    }

    // 5. Present and rotate the damage ring.
    backend.present()?;
    ring.rotate();
    metrics.frames_painted += 1;
    if full {
        metrics.full_paints += 1;
    }
    trace!(
        target: "render.paint",
        windows = pre.paint_list.len(),
        full,
        "frame_presented"
    );
    Ok(true)
}

fn paint_shadow(
    stack: &mut WinStack,
    key: core_state::WinKey,
    region: &Region,
    screen_region: &Region,
    setup: &PaintSetup<'_>,
    backend: &mut dyn Backend,
    metrics: &mut RenderMetrics,
) {
    let win = stack.win_mut(key);
    if !win.flags.contains(WinFlags::SHADOW) || win.shadow_opacity * 255.0 < 1.0 {
        return;
    }

    // Lazy shadow image build, sized to the current body.
    if win.shadow_image.is_none() {
        let body = win.border_rect();
        let (sw, sh) = setup.shadow.image_size(body);
        match backend.render_shadow(sw, sh, &setup.shadow.kernel, setup.shadow.color) {
            Ok(img) => {
                win.shadow_image = Some(img);
                win.shadow_rect = setup.shadow.placement(body);
            }
            Err(e) => {
                warn!(target: "render.paint", wid = %win.id, error = %e, "shadow_render_failed");
                return;
            }
        }
    }
    let Some(shadow_img) = win.shadow_image else {
        return;
    };

    let mut reg = region.intersect_rect(win.extents());
    if let Some(ignore) = &win.reg_ignore {
        reg = reg.subtract(ignore);
    }
    if let Some(exclude) = setup.shadow_exclude_region {
        reg = reg.subtract(exclude);
    }
    if setup.config.shadow.crop_to_monitor {
        if let Some(monitor) = monitor_of(setup.monitors, win.border_rect()) {
            reg = reg.intersect_rect(monitor);
        }
    }
    if win.mode != WinMode::Solid {
        reg = reg.subtract(&win.shape_on_screen());
    }
    if reg.is_empty() {
        return;
    }

    backend.image_op(
        ImageOp::ApplyAlphaAll,
        shadow_img,
        &reg,
        screen_region,
        &[win.shadow_opacity],
    );
    backend.compose(shadow_img, win.shadow_rect.x1, win.shadow_rect.y1, &reg, screen_region);
    metrics.shadows_painted += 1;
}

fn paint_body(
    stack: &mut WinStack,
    key: core_state::WinKey,
    region: &Region,
    screen_region: &Region,
    setup: &PaintSetup<'_>,
    backend: &mut dyn Backend,
    metrics: &mut RenderMetrics,
) {
    let config = setup.config;
    let win = stack.win_mut(key);
    let Some(body_img) = win.body_image else {
        return;
    };

    let shape = win.shape_on_screen();
    let mut reg_body = match &win.reg_ignore {
        Some(ignore) => region.subtract(ignore),
        None => region.clone(),
    };
    reg_body = reg_body.intersect(&shape);
    if reg_body.is_empty() {
        return;
    }

    // Background blur reads back what is already painted beneath.
    let frame_translucent = config.opacity.frame < 1.0 && !win.frame_extents.is_zero();
    if win.flags.contains(WinFlags::BLUR_BACKGROUND)
        && (win.mode != WinMode::Solid || (frame_translucent && config.blur_background_frame))
        && backend.caps().supports_blur
    {
        let passes = blur_passes(config, win.opacity);
        if backend.blur(win.opacity, &reg_body, screen_region, &passes) {
            metrics.blur_passes += passes.len() as u64;
        }
    }

    if win.flags.contains(WinFlags::INVERT_COLOR) {
        backend.image_op(ImageOp::InvertColorAll, body_img, &reg_body, screen_region, &[]);
    }

    if win.flags.contains(WinFlags::DIM) {
        let strength =
            config.opacity.inactive_dim * if config.opacity.dim_fixed { 1.0 } else { win.opacity };
        backend.image_op(ImageOp::DimAll, body_img, &reg_body, screen_region, &[strength]);
    }

    // Body alpha: frame-aware windows split into five bands so a frame can
    // be more translucent than the client area.
    if win.mode == WinMode::FrameTrans && frame_translucent {
        let bands = frame_bands(win.border_rect(), win.frame_extents);
        let frame_alpha = win.opacity * config.opacity.frame;
        for (idx, band) in bands.iter().enumerate() {
            let band_reg = reg_body.intersect_rect(*band);
            if band_reg.is_empty() {
                continue;
            }
            let alpha = if idx == CENTER_BAND { win.opacity } else { frame_alpha };
            if alpha < 1.0 {
                backend.image_op(ImageOp::ApplyAlpha, body_img, &band_reg, screen_region, &[alpha]);
            }
        }
    } else if win.opacity < 1.0 {
        backend.image_op(
            ImageOp::ApplyAlphaAll,
            body_img,
            &reg_body,
            screen_region,
            &[win.opacity],
        );
    }

    let rect = win.border_rect();
    backend.compose(body_img, rect.x1, rect.y1, &reg_body, screen_region);
    metrics.windows_painted += 1;
}

/// Index of the center band in [`frame_bands`]' output.
pub const CENTER_BAND: usize = 4;

/// Split an outer window rectangle into top, bottom, left, right, center
/// bands. Extents are clamped band by band (`min(extent, remaining)`) so a
/// WM reporting `top + bottom > height` still yields disjoint bands.
pub fn frame_bands(outer: Rect, ext: FrameExtents) -> [Rect; 5] {
    let w = outer.width();
    let h = outer.height();
    let top_h = i32::from(ext.top).min(h);
    let bottom_h = i32::from(ext.bottom).min(h - top_h);
    let mid_h = h - top_h - bottom_h;
    let left_w = i32::from(ext.left).min(w);
    let right_w = i32::from(ext.right).min(w - left_w);
    let center_w = w - left_w - right_w;

    let top = Rect::new(outer.x1, outer.y1, w, top_h);
    let bottom = Rect::new(outer.x1, outer.y2 - bottom_h, w, bottom_h);
    let left = Rect::new(outer.x1, outer.y1 + top_h, left_w, mid_h);
    let right = Rect::new(outer.x2 - right_w, outer.y1 + top_h, right_w, mid_h);
    let center = Rect::new(outer.x1 + left_w, outer.y1 + top_h, center_w, mid_h);
    [top, bottom, left, right, center]
}

/// Blur passes with the kernel center re-weighted for the window's opacity
/// (more transparent windows blur harder), unless pinned by config.
fn blur_passes(config: &Config, opacity: f64) -> Vec<BlurPass> {
    config
        .blur_kernels
        .iter()
        .map(|k| {
            let mut weights = k.weights.clone();
            if !config.blur_background_fixed {
                let p = 1.0 - opacity * (1.0 - 1.0 / 9.0);
                weights[k.center_index()] = 8.0 * p / (1.1 - p);
            }
            BlurPass {
                width: k.width,
                height: k.height,
                weights,
            }
        })
        .collect()
}

/// Monitor containing the window's center, if any.
fn monitor_of(monitors: &[Rect], body: Rect) -> Option<Rect> {
    let cx = (body.x1 + body.x2) / 2;
    let cy = (body.y1 + body.y2) / 2;
    monitors.iter().copied().find(|m| m.contains_point(cx, cy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bands_partition_the_rect() {
        let outer = Rect::new(10, 10, 100, 80);
        let ext = FrameExtents {
            top: 20,
            bottom: 10,
            left: 5,
            right: 5,
        };
        let bands = frame_bands(outer, ext);
        let total: u64 = bands.iter().map(Rect::area).sum();
        assert_eq!(total, outer.area(), "bands tile the window exactly");
        for (i, a) in bands.iter().enumerate() {
            for b in &bands[i + 1..] {
                assert!(a.intersect(b).is_none(), "{a:?} overlaps {b:?}");
            }
        }
        assert_eq!(bands[CENTER_BAND], Rect::new(15, 30, 90, 50));
    }

    #[test]
    fn frame_bands_survive_broken_extents() {
        // A misbehaving WM reports top + bottom > height.
        let outer = Rect::new(0, 0, 50, 30);
        let ext = FrameExtents {
            top: 25,
            bottom: 25,
            left: 0,
            right: 0,
        };
        let bands = frame_bands(outer, ext);
        assert_eq!(bands[0].height(), 25, "top gets its full extent");
        assert_eq!(bands[1].height(), 5, "bottom clamps to what remains");
        assert!(bands[CENTER_BAND].is_empty());
        let total: u64 = bands.iter().map(Rect::area).sum();
        assert_eq!(total, outer.area());
    }

    #[test]
    fn monitor_selection_by_center() {
        let monitors = [Rect::new(0, 0, 1280, 720), Rect::new(1280, 0, 1280, 720)];
        assert_eq!(
            monitor_of(&monitors, Rect::new(100, 100, 200, 200)),
            Some(monitors[0])
        );
        assert_eq!(
            monitor_of(&monitors, Rect::new(1300, 0, 400, 400)),
            Some(monitors[1])
        );
        assert_eq!(monitor_of(&[], Rect::new(0, 0, 10, 10)), None);
    }
}
