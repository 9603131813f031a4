//! Destroy during fade-in: the window keeps fading in the stack while its
//! id becomes free immediately.

mod common;

use common::{small_geom, Harness};
use core_events::Wid;
use core_state::{WinState, Window};

#[test]
fn destroy_midfade_keeps_corpse_until_fade_ends() {
    let mut h = Harness::new();
    h.config.fade.in_step = 0.1;
    h.config.fade.out_step = 0.25;
    h.config.fade.delta_ms = 10;

    h.map_window(0x10, small_geom(10, 10));
    h.preprocess(0);
    h.preprocess(50); // opacity 0.5, image bound
    assert!(h.opacity_of(0x10) > 0.0);
    assert_eq!(h.backend.live_image_count(), 1);

    // DestroyNotify: state machine first, then the id index.
    let key = h.stack.find(Wid(0x10)).unwrap();
    h.stack.win_mut(key).mark_destroying();
    h.stack.detach_index(Wid(0x10));

    assert_eq!(h.stack.find(Wid(0x10)), None, "id lookup dead immediately");
    assert_eq!(h.stack.len(), 1, "corpse still stacked");
    assert_eq!(h.stack.win(key).opacity_tgt, 0.0);

    // Fade-out still paints the corpse.
    let pre = h.preprocess(60);
    assert!(pre.fade_running);
    assert_eq!(pre.paint_list.len(), 1, "corpse painted while fading");
    assert_eq!(pre.destroyed, 0);

    // Enough ticks to reach zero: freed, images released.
    let pre = h.preprocess(200);
    assert_eq!(pre.destroyed, 1);
    assert_eq!(h.stack.len(), 0);
    assert_eq!(h.backend.live_image_count(), 0, "images released on free");
    h.stack.debug_validate();
}

#[test]
fn id_reuse_during_destroy_fade_yields_fresh_window() {
    let mut h = Harness::new();
    h.config.fade.in_step = 0.1;
    h.config.fade.out_step = 0.02; // slow fade-out keeps the corpse around
    h.config.fade.delta_ms = 10;

    h.map_window(0x10, small_geom(10, 10));
    h.preprocess(0);
    h.preprocess(30);

    let corpse_key = h.stack.find(Wid(0x10)).unwrap();
    let corpse_opacity = h.opacity_of(0x10);
    h.stack.win_mut(corpse_key).mark_destroying();
    h.stack.detach_index(Wid(0x10));

    // A new window reuses the id while the corpse fades.
    let fresh_key = h.map_window(0x10, small_geom(300, 300));
    assert_ne!(fresh_key, corpse_key);
    assert_eq!(h.stack.len(), 2);
    assert_eq!(
        h.opacity_of(0x10),
        0.0,
        "fresh window starts its own fade from zero"
    );
    assert_eq!(h.stack.win(corpse_key).state, WinState::Destroying);
    assert!(
        h.stack.win(corpse_key).opacity <= corpse_opacity,
        "corpse keeps fading out independently"
    );
    h.stack.debug_validate();

    // Both windows advance independently over the next ticks.
    h.preprocess(40);
    let fresh: &Window = h.stack.win(fresh_key);
    assert!(fresh.opacity >= 0.0 && fresh.state.is_fading() || fresh.state == WinState::Mapped);
}

#[test]
fn destroy_with_redirection_off_frees_immediately() {
    let mut h = Harness::new();
    h.map_window(0x20, small_geom(0, 0));
    h.preprocess(0);
    h.preprocess(1000); // mapped solid by now

    h.redirected = false;
    let key = h.stack.find(Wid(0x20)).unwrap();
    h.stack.win_mut(key).mark_destroying();
    h.stack.detach_index(Wid(0x20));

    let pre = h.preprocess(1010);
    assert_eq!(pre.destroyed, 1, "fade skipped, freed on the next pass");
    assert_eq!(h.stack.len(), 0);
    assert_eq!(h.backend.live_image_count(), 0);
}
