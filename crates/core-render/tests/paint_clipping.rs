//! Paint-pass clipping and effect dispatch through the backend trait.

mod common;

use common::{small_geom, Harness, ROOT_H, ROOT_W};
use core_backend::recording::Call;
use core_backend::ImageOp;
use core_events::{Geometry, Wid};
use core_state::WinFlags;

#[test]
fn solid_cover_culls_the_window_beneath() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    // Bottom window fully covered by a solid top window.
    h.map_window(2, Geometry::new(100, 100, 200, 200, 0));
    h.map_window(1, Geometry::new(50, 50, 400, 400, 0));
    h.backend.calls.clear();
    h.frame(0);

    let k2 = h.stack.find(Wid(2)).unwrap();
    let img2 = h.stack.win(k2).body_image.unwrap();
    let covered_composes = h.backend.count(|c| {
        matches!(c, Call::Compose { image, paint_area, .. } if *image == img2 && *paint_area > 0)
    });
    assert_eq!(
        covered_composes, 0,
        "fully hidden window composes nothing (reg_ignore cull)"
    );
}

#[test]
fn shadow_drawn_beneath_and_clipped_by_opaque_above() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    h.config.shadow.enabled = true;
    h.config.shadow.radius = 8;
    h.config.shadow.offset_x = -4;
    h.config.shadow.offset_y = -4;

    let key = h.map_window(1, small_geom(300, 300));
    h.stack.win_mut(key).flags.insert(WinFlags::SHADOW);
    h.frame(0);

    assert_eq!(
        h.backend.count(|c| matches!(c, Call::RenderShadow { .. })),
        1,
        "shadow image built lazily once"
    );
    // 200x150 body with radius 8 on each side.
    assert!(h
        .backend
        .calls
        .iter()
        .any(|c| matches!(c, Call::RenderShadow { width: 216, height: 166 })));

    // Second frame reuses the image.
    h.ring.add_rect(core_region::Rect::new(300, 300, 10, 10));
    h.backend.next_buffer_age = 1;
    h.frame(10);
    assert_eq!(
        h.backend.count(|c| matches!(c, Call::RenderShadow { .. })),
        1,
        "no rebuild while geometry is unchanged"
    );
}

#[test]
fn dim_invert_and_alpha_ops_reach_the_backend() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    h.config.opacity.inactive_dim = 0.3;

    let key = h.map_window(1, small_geom(10, 10));
    {
        let w = h.stack.win_mut(key);
        w.flags.insert(WinFlags::INVERT_COLOR);
        w.prop_opacity = Some(0.5);
        let (tgt, src) = core_state::compute_target(w, &h.config);
        // Snap so the first frame already sits at 0.5.
        w.set_opacity_target(tgt, src, false);
    }
    h.frame(0);

    let img = h.stack.win(key).body_image.unwrap();
    let op_count = |op: ImageOp| {
        h.backend
            .count(|c| matches!(c, Call::ImageOp { op: o, image, .. } if *o == op && *image == img))
    };
    assert_eq!(op_count(ImageOp::InvertColorAll), 1);
    assert_eq!(op_count(ImageOp::DimAll), 1, "unfocused window dims");
    assert_eq!(op_count(ImageOp::ApplyAlphaAll), 1, "translucent body alpha");

    // Dim strength scales with opacity unless fixed.
    let dim_args: Vec<f64> = h
        .backend
        .calls
        .iter()
        .find_map(|c| match c {
            Call::ImageOp { op: ImageOp::DimAll, args, .. } => Some(args.clone()),
            _ => None,
        })
        .unwrap();
    assert!((dim_args[0] - 0.3 * 0.5).abs() < 1e-9);
}

#[test]
fn frame_translucent_window_paints_in_bands() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    h.config.opacity.frame = 0.6;

    let key = h.map_window(1, small_geom(50, 50));
    {
        let w = h.stack.win_mut(key);
        w.frame_extents = core_state::FrameExtents {
            top: 20,
            bottom: 5,
            left: 5,
            right: 5,
        };
    }
    h.frame(0);

    let img = h.stack.win(key).body_image.unwrap();
    let banded = h.backend.count(|c| {
        matches!(
            c,
            Call::ImageOp { op: ImageOp::ApplyAlpha, image, args, .. }
                if *image == img && (args[0] - 0.6).abs() < 1e-9
        )
    });
    assert_eq!(banded, 4, "four frame bands at opacity * frame_opacity");
    // Center band at full opacity (1.0) needs no alpha op at all.
    let full_alpha = h.backend.count(|c| {
        matches!(c, Call::ImageOp { op: ImageOp::ApplyAlpha, args, .. } if (args[0] - 1.0).abs() < 1e-9)
    });
    assert_eq!(full_alpha, 0);
}

#[test]
fn blur_only_runs_for_translucent_blur_windows() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    h.config.blur_background = true;
    h.config.blur_kernels = vec![core_config::BlurKernel::default_box()];

    // Solid window with blur flag: mode SOLID suppresses blur.
    let k1 = h.map_window(1, small_geom(10, 10));
    h.stack.win_mut(k1).flags.insert(WinFlags::BLUR_BACKGROUND);
    h.frame(0);
    assert_eq!(h.backend.count(|c| matches!(c, Call::Blur { .. })), 0);

    // Make it translucent: blur fires with the configured pass count.
    {
        let w = h.stack.win_mut(k1);
        w.prop_opacity = Some(0.7);
        let (tgt, src) = core_state::compute_target(w, &h.config);
        w.set_opacity_target(tgt, src, false);
    }
    h.ring.add_rect(h.stack.win(k1).extents());
    h.backend.next_buffer_age = 1;
    h.frame(10);
    assert_eq!(
        h.backend.count(|c| matches!(c, Call::Blur { passes: 1, .. })),
        1
    );
}

#[test]
fn full_screen_region_painted_when_age_unknown() {
    let mut h = Harness::new();
    h.config.fade.no_fading_openclose = true;
    h.map_window(1, Geometry::new(0, 0, ROOT_W, ROOT_H, 0));
    h.frame(0);
    assert_eq!(h.metrics.full_paints, 1);
    assert_eq!(h.metrics.frames_painted, 1);
    assert_eq!(h.metrics.windows_painted, 1);
}
