//! Event dispatcher: applies translated X notifications to compositor state.
//!
//! `dispatch` owns the event table from the design: each [`XEvent`] variant
//! maps to one handler that mutates the stack, the damage ring, and the
//! focus bookkeeping, and reports what the frame loop must do next through
//! [`DispatchOutcome`]. Handlers never talk to X or to the backend; anything
//! needing either (root re-fetch, backend reinit, image release) is handed
//! back to the loop as an outcome field.
//!
//! Ordering contract: the loop drains a whole event batch through `dispatch`
//! before running preprocess, so handlers may leave windows in transitional
//! states (fade just started, stale image) that the next preprocess resolves.

use core_backend::Image;
use core_config::Config;
use core_events::{Geometry, PropertyChange, RootPropertyChange, Wid, XEvent};
use core_region::Rect;
use core_render::DamageRing;
use core_state::{compute_target, WinFlags, WinKey, WinStack, Window};
use tracing::{debug, trace, warn};

/// Mirrored server focus: the active window and its resolved group leader.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FocusState {
    pub active_win: Wid,
    pub active_leader: Wid,
}

/// Everything a handler may touch.
pub struct DispatchCtx<'a> {
    pub stack: &'a mut WinStack,
    pub ring: &'a mut DamageRing,
    pub config: &'a Config,
    pub focus: &'a mut FocusState,
    pub root_width: u16,
    pub root_height: u16,
    pub redirected: bool,
}

/// What the loop must do after an event (or a drained batch; outcomes merge
/// with [`DispatchOutcome::absorb`]).
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Schedule a redraw.
    pub needs_frame: bool,
    /// A fade was started or retargeted; arm the fade timer.
    pub fade_started: bool,
    /// Root geometry changed; rebuild screen state and the backend.
    pub root_resized: Option<(u16, u16)>,
    /// RandR reported a refresh rate change (millihertz).
    pub refresh_mhz: Option<u32>,
    /// The desktop background pixmap changed; re-fetch the root tile.
    pub root_background_changed: bool,
    /// Backend images orphaned by handlers (resizes, shadow toggles); the
    /// loop releases them — the dispatcher never holds the backend.
    pub orphaned_images: Vec<Image>,
    /// Opacity-rule results to mirror into `_NET_WM_WINDOW_OPACITY`.
    pub opacity_prop_writes: Vec<(Wid, f64)>,
    /// Fatal event (compositor-manager selection lost).
    pub quit: bool,
}

impl DispatchOutcome {
    fn frame() -> Self {
        Self {
            needs_frame: true,
            ..Default::default()
        }
    }

    /// Merge another outcome into this one.
    pub fn absorb(&mut self, other: DispatchOutcome) {
        self.needs_frame |= other.needs_frame;
        self.fade_started |= other.fade_started;
        self.root_resized = other.root_resized.or(self.root_resized);
        self.refresh_mhz = other.refresh_mhz.or(self.refresh_mhz);
        self.root_background_changed |= other.root_background_changed;
        self.orphaned_images.extend(other.orphaned_images);
        self.opacity_prop_writes.extend(other.opacity_prop_writes);
        self.quit |= other.quit;
    }
}

/// Apply one translated event. See the module docs for the contract.
pub fn dispatch(event: &XEvent, ctx: &mut DispatchCtx<'_>) -> DispatchOutcome {
    trace!(target: "dispatch", ?event, "dispatch_event");
    match event {
        XEvent::Create {
            wid,
            geom,
            override_redirect,
            input_only,
        } => handle_create(ctx, *wid, *geom, *override_redirect, *input_only),
        XEvent::ConfigureRoot { width, height } => DispatchOutcome {
            needs_frame: true,
            root_resized: Some((*width, *height)),
            ..Default::default()
        },
        XEvent::Configure { wid, geom, above } => handle_configure(ctx, *wid, *geom, *above),
        XEvent::Map { wid, has_alpha } => handle_map(ctx, *wid, *has_alpha),
        XEvent::Unmap { wid } => handle_unmap(ctx, *wid),
        XEvent::Destroy { wid } => handle_destroy(ctx, *wid),
        XEvent::Reparent { wid, geom, to_root } => {
            if *to_root {
                handle_create(ctx, *wid, *geom, false, false)
            } else {
                handle_destroy(ctx, *wid)
            }
        }
        XEvent::Circulate { wid, place_on_top } => handle_circulate(ctx, *wid, *place_on_top),
        XEvent::Damage { wid, rect } => handle_damage(ctx, *wid, *rect),
        XEvent::Shape { wid, bounding } => handle_shape(ctx, *wid, bounding.clone()),
        XEvent::RootProperty(RootPropertyChange::Background) => DispatchOutcome {
            needs_frame: true,
            root_background_changed: true,
            ..Default::default()
        },
        XEvent::RootProperty(RootPropertyChange::ActiveWindow(wid)) => set_focus(ctx, *wid),
        XEvent::Property { wid, change } => handle_property(ctx, *wid, change),
        XEvent::FocusIn { wid } => set_focus(ctx, *wid),
        XEvent::FocusOut { wid } => {
            if ctx.focus.active_win == *wid {
                set_focus(ctx, Wid::NONE)
            } else {
                DispatchOutcome::default()
            }
        }
        XEvent::ScreenChange { refresh_mhz } => DispatchOutcome {
            refresh_mhz: Some(*refresh_mhz),
            ..Default::default()
        },
        XEvent::SelectionClear => {
            warn!(target: "dispatch", "cm_selection_lost");
            DispatchOutcome {
                quit: true,
                ..Default::default()
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Window lifecycle
// -------------------------------------------------------------------------------------------------

fn handle_create(
    ctx: &mut DispatchCtx<'_>,
    wid: Wid,
    geom: Geometry,
    override_redirect: bool,
    input_only: bool,
) -> DispatchOutcome {
    let mut win = Window::new(wid, geom);
    win.override_redirect = override_redirect;
    win.flags.set(WinFlags::INPUT_ONLY, input_only);
    // New windows enter at the bottom; the server's ConfigureNotify stream
    // assigns the real position.
    if ctx.stack.insert(win, Wid::NONE).is_some() {
        debug!(target: "dispatch", %wid, input_only, "window_created");
    }
    DispatchOutcome::default()
}

fn handle_configure(
    ctx: &mut DispatchCtx<'_>,
    wid: Wid,
    geom: Geometry,
    above: Wid,
) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    ctx.stack.restack(wid, above);

    let mut out = DispatchOutcome::default();
    let win = ctx.stack.win_mut(key);
    if win.flags.contains(WinFlags::VIEWABLE) {
        let old_extents = win.extents();
        let resized = !win.geom.same_size(&geom);
        win.geom = geom;
        if resized {
            win.flags.insert(WinFlags::STALE_IMAGE);
            // Shadow image is sized to the body; rebuild lazily.
            if let Some(img) = win.shadow_image.take() {
                out.orphaned_images.push(img);
            }
        }
        let new_extents = win.extents();
        ctx.ring.add_rect(old_extents);
        ctx.ring.add_rect(new_extents);
        out.needs_frame = true;
    } else {
        win.geom = geom;
    }
    out
}

fn handle_map(ctx: &mut DispatchCtx<'_>, wid: Wid, has_alpha: bool) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        warn!(target: "dispatch", %wid, "map_for_unknown_window");
        return DispatchOutcome::default();
    };
    let win = ctx.stack.win_mut(key);
    win.mark_mapping();
    win.flags.set(WinFlags::HAS_ALPHA, has_alpha);
    // Shadow/blur/exclusion caches depend on properties read before the map.
    let mut out = refresh_rule_caches(ctx, key);
    out.absorb(retarget_opacity(ctx, key));
    let win = ctx.stack.win_mut(key);
    let extents = win.extents();
    ctx.ring.add_rect(extents);
    out.needs_frame = true;
    out.fade_started = true;
    out
}

fn handle_unmap(ctx: &mut DispatchCtx<'_>, wid: Wid) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    let win = ctx.stack.win_mut(key);
    let extents = win.extents();
    win.mark_unmapping();
    ctx.ring.add_rect(extents);
    DispatchOutcome {
        needs_frame: true,
        fade_started: true,
        ..Default::default()
    }
}

fn handle_destroy(ctx: &mut DispatchCtx<'_>, wid: Wid) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    {
        let win = ctx.stack.win_mut(key);
        let extents = win.extents();
        win.mark_destroying();
        ctx.ring.add_rect(extents);
    }
    // Id becomes reusable immediately; the corpse stays stacked until the
    // destroy fade resolves in preprocess.
    ctx.stack.detach_index(wid);
    debug!(target: "dispatch", %wid, "destroy_begun");
    DispatchOutcome {
        needs_frame: true,
        fade_started: true,
        ..Default::default()
    }
}

fn handle_circulate(ctx: &mut DispatchCtx<'_>, wid: Wid, place_on_top: bool) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    ctx.stack.circulate(wid, place_on_top);
    let extents = ctx.stack.win(key).extents();
    ctx.ring.add_rect(extents);
    DispatchOutcome::frame()
}

// -------------------------------------------------------------------------------------------------
// Damage and shape
// -------------------------------------------------------------------------------------------------

fn handle_damage(ctx: &mut DispatchCtx<'_>, wid: Wid, rect: Rect) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    let win = ctx.stack.win_mut(key);
    if !win.flags.contains(WinFlags::EVER_DAMAGED) {
        // First damage after map: repaint the full footprint, the partial
        // report may predate our image bind.
        win.flags.insert(WinFlags::EVER_DAMAGED);
        let extents = win.extents();
        ctx.ring.add_rect(extents);
    } else {
        let screen_rect =
            rect.translate(i32::from(win.geom.x), i32::from(win.geom.y));
        ctx.ring.add_rect(screen_rect);
    }
    DispatchOutcome::frame()
}

fn handle_shape(
    ctx: &mut DispatchCtx<'_>,
    wid: Wid,
    bounding: Option<core_region::Region>,
) -> DispatchOutcome {
    let Some(key) = ctx.stack.find(wid) else {
        return DispatchOutcome::default();
    };
    let win = ctx.stack.win_mut(key);
    let old_extents = win.extents();
    win.bounding_shape = bounding;
    win.flags.insert(WinFlags::STALE_IMAGE);
    win.flags.remove(WinFlags::REG_IGNORE_VALID);
    win.reg_ignore = None;
    let new_extents = win.extents();
    ctx.ring.add_rect(old_extents);
    ctx.ring.add_rect(new_extents);
    DispatchOutcome::frame()
}

// -------------------------------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------------------------------

fn handle_property(
    ctx: &mut DispatchCtx<'_>,
    wid: Wid,
    change: &PropertyChange,
) -> DispatchOutcome {
    // Opacity may arrive on the client window rather than the frame.
    let key = match ctx.stack.find(wid) {
        Some(k) => k,
        None => match ctx.stack.find_toplevel(wid) {
            Some(k) => k,
            None => return DispatchOutcome::default(),
        },
    };
    match change {
        PropertyChange::Opacity(value) => {
            ctx.stack.win_mut(key).prop_opacity = *value;
            retarget_opacity(ctx, key)
        }
        PropertyChange::WindowType(wintype) => {
            let win = ctx.stack.win_mut(key);
            if win.wintype == *wintype {
                return DispatchOutcome::default();
            }
            win.wintype = *wintype;
            let mut out = refresh_rule_caches(ctx, key);
            out.absorb(retarget_opacity(ctx, key));
            out.needs_frame = true;
            out
        }
        PropertyChange::FrameExtents {
            top,
            right,
            bottom,
            left,
        } => {
            let win = ctx.stack.win_mut(key);
            win.frame_extents = core_state::FrameExtents {
                top: *top,
                right: *right,
                bottom: *bottom,
                left: *left,
            };
            let extents = win.extents();
            ctx.ring.add_rect(extents);
            DispatchOutcome::frame()
        }
        PropertyChange::Name(name) => {
            ctx.stack.win_mut(key).name = name.clone();
            refresh_rule_caches(ctx, key)
        }
        PropertyChange::Class { instance, general } => {
            let win = ctx.stack.win_mut(key);
            win.class_instance = instance.clone();
            win.class_general = general.clone();
            refresh_rule_caches(ctx, key)
        }
        PropertyChange::Role(role) => {
            ctx.stack.win_mut(key).role = role.clone();
            refresh_rule_caches(ctx, key)
        }
        PropertyChange::Leader(leader) => {
            let win = ctx.stack.win_mut(key);
            win.leader = *leader;
            win.cache_leader = Wid::NONE;
            // Group membership feeds focus; re-evaluate against the current
            // active leader.
            let active = ctx.focus.active_win;
            set_focus(ctx, active)
        }
        PropertyChange::WmState { present } => {
            let win = ctx.stack.win_mut(key);
            if *present && win.client.is_none() {
                win.client = wid;
                debug!(target: "dispatch", toplevel = %win.id, client = %wid, "client_window_found");
            } else if !present && win.client == wid {
                win.client = Wid::NONE;
            }
            DispatchOutcome::default()
        }
        PropertyChange::ShadowOverride(value) => {
            ctx.stack.win_mut(key).shadow_prop_override = *value;
            refresh_rule_caches(ctx, key)
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Focus
// -------------------------------------------------------------------------------------------------

/// Group leader used for focus propagation.
fn resolved_leader(win: &Window) -> Wid {
    if !win.cache_leader.is_none() {
        win.cache_leader
    } else if !win.leader.is_none() {
        win.leader
    } else {
        win.id
    }
}

/// Mirror a focus move: toggle `FOCUSED` across the stack (leader groups
/// follow the active window) and retarget opacity where it flipped.
fn set_focus(ctx: &mut DispatchCtx<'_>, new_active: Wid) -> DispatchOutcome {
    ctx.focus.active_win = new_active;
    ctx.focus.active_leader = match ctx.stack.find(new_active) {
        Some(k) => resolved_leader(ctx.stack.win(k)),
        None => Wid::NONE,
    };

    let mut out = DispatchOutcome::default();
    let keys: Vec<WinKey> = ctx.stack.iter_top_to_bottom().collect();
    for key in keys {
        let win = ctx.stack.win(key);
        let in_group = !ctx.focus.active_leader.is_none()
            && resolved_leader(win) == ctx.focus.active_leader;
        let focused = win.id == new_active || in_group;
        if focused == win.flags.contains(WinFlags::FOCUSED) {
            continue;
        }
        let win = ctx.stack.win_mut(key);
        win.flags.set(WinFlags::FOCUSED, focused);
        let extents = win.extents();
        ctx.ring.add_rect(extents);
        out.absorb(retarget_opacity(ctx, key));
        out.needs_frame = true;
    }
    out
}

// -------------------------------------------------------------------------------------------------
// Shared helpers
// -------------------------------------------------------------------------------------------------

/// Recompute and apply the opacity target for one window.
fn retarget_opacity(ctx: &mut DispatchCtx<'_>, key: WinKey) -> DispatchOutcome {
    let win = ctx.stack.win_mut(key);
    let (target, source) = compute_target(win, ctx.config);
    let fades = core_render::preprocess::fades_allowed(win, ctx.config, ctx.redirected);
    let before = win.opacity;
    win.set_opacity_target(target, source, fades);
    let mut out = DispatchOutcome::default();
    if win.opacity != win.opacity_tgt {
        out.fade_started = true;
        out.needs_frame = true;
    } else if win.opacity != before {
        // Snapped: repaint at the new opacity.
        let extents = win.extents();
        ctx.ring.add_rect(extents);
        out.needs_frame = true;
    }
    out
}

/// Re-evaluate every rule-fed cache after a matching factor changed
/// (name, class, role, wintype, shadow override).
fn refresh_rule_caches(ctx: &mut DispatchCtx<'_>, key: WinKey) -> DispatchOutcome {
    let config = ctx.config;
    let win = ctx.stack.win_mut(key);

    let (shadow, invert, blur, paint_excluded, unredir_excluded, rule_opacity) = {
        let target = win.rule_target(config);
        let mut shadow = config.shadow.enabled;
        if let Some(by_type) = config.wintypes.get(win.wintype).shadow {
            shadow = by_type;
        }
        if config.shadow_exclude.matches(&target) {
            shadow = false;
        }
        if let Some(prop) = win.shadow_prop_override {
            shadow = prop;
        }
        (
            win.shadow_force.apply(shadow),
            win.invert_force.apply(config.invert_color_rules.matches(&target)),
            config.blur_background && !config.blur_exclude.matches(&target),
            config.paint_exclude.matches(&target),
            config.unredir_exclude.matches(&target),
            config.opacity_rules.value(&target),
        )
    };

    let mut out = DispatchOutcome::default();
    let visual_flags = WinFlags::SHADOW
        | WinFlags::INVERT_COLOR
        | WinFlags::BLUR_BACKGROUND
        | WinFlags::PAINT_EXCLUDED;
    let before = win.flags & visual_flags;
    win.flags.set(WinFlags::SHADOW, shadow);
    win.flags.set(WinFlags::INVERT_COLOR, invert);
    win.flags.set(WinFlags::BLUR_BACKGROUND, blur);
    win.flags.set(WinFlags::PAINT_EXCLUDED, paint_excluded);
    win.flags.set(WinFlags::UNREDIR_EXCLUDED, unredir_excluded);
    if rule_opacity != win.rule_opacity {
        win.rule_opacity = rule_opacity;
        if let Some(value) = rule_opacity {
            // Mirror the fired rule into the property other tools read.
            out.opacity_prop_writes.push((win.id, value));
        }
    }

    if !shadow {
        if let Some(img) = win.shadow_image.take() {
            out.orphaned_images.push(img);
        }
    }
    if before != (win.flags & visual_flags) {
        let extents = win.extents();
        ctx.ring.add_rect(extents);
        out.needs_frame = true;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::WinType;

    fn ctx_parts() -> (WinStack, DamageRing, Config, FocusState) {
        (
            WinStack::new(),
            DamageRing::new(3),
            Config::default(),
            FocusState::default(),
        )
    }

    fn mk_ctx<'a>(
        stack: &'a mut WinStack,
        ring: &'a mut DamageRing,
        config: &'a Config,
        focus: &'a mut FocusState,
    ) -> DispatchCtx<'a> {
        DispatchCtx {
            stack,
            ring,
            config,
            focus,
            root_width: 1280,
            root_height: 720,
            redirected: true,
        }
    }

    fn geom() -> Geometry {
        Geometry::new(10, 10, 100, 100, 0)
    }

    #[test]
    fn create_then_map_starts_a_fade() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        let out = dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        assert!(out.needs_frame && out.fade_started);
        let k = stack.find(Wid(1)).unwrap();
        assert_eq!(stack.win(k).state, core_state::WinState::Mapping);
        assert_eq!(stack.win(k).opacity_tgt, 1.0);
    }

    #[test]
    fn configure_resize_marks_stale_and_orphans_shadow() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        // Give it a shadow image to orphan.
        let k = ctx.stack.find(Wid(1)).unwrap();
        ctx.stack.win_mut(k).shadow_image = Some(Image(42));

        let out = dispatch(
            &XEvent::Configure {
                wid: Wid(1),
                geom: Geometry::new(10, 10, 200, 150, 0),
                above: Wid::NONE,
            },
            &mut ctx,
        );
        assert!(out.needs_frame);
        assert_eq!(out.orphaned_images, vec![Image(42)]);
        let w = stack.win(stack.find(Wid(1)).unwrap());
        assert!(w.flags.contains(WinFlags::STALE_IMAGE));
        assert_eq!(w.geom.width, 200);
    }

    #[test]
    fn move_without_resize_keeps_image() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        let k = ctx.stack.find(Wid(1)).unwrap();
        ctx.stack.win_mut(k).flags.remove(WinFlags::STALE_IMAGE);

        let out = dispatch(
            &XEvent::Configure {
                wid: Wid(1),
                geom: Geometry::new(300, 5, 100, 100, 0),
                above: Wid::NONE,
            },
            &mut ctx,
        );
        assert!(out.needs_frame);
        assert!(out.orphaned_images.is_empty());
        let w = stack.win(stack.find(Wid(1)).unwrap());
        assert!(!w.flags.contains(WinFlags::STALE_IMAGE), "move keeps pixmap");
        assert_eq!(w.geom.x, 300);
    }

    #[test]
    fn first_damage_fetches_full_extents() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        // Drain map damage for a clean observation.
        ctx.ring.clear_all();

        dispatch(
            &XEvent::Damage {
                wid: Wid(1),
                rect: Rect::new(0, 0, 1, 1),
            },
            &mut ctx,
        );
        let k = stack.find(Wid(1)).unwrap();
        assert!(stack.win(k).flags.contains(WinFlags::EVER_DAMAGED));
        assert!(
            ring.current().contains_point(105, 105),
            "full extents damaged on first report"
        );

        // Second damage is taken literally, translated to screen space.
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        ctx.ring.clear_all();
        dispatch(
            &XEvent::Damage {
                wid: Wid(1),
                rect: Rect::new(5, 5, 2, 2),
            },
            &mut ctx,
        );
        assert!(ring.current().contains_point(15, 15));
        assert!(!ring.current().contains_point(30, 30));
    }

    #[test]
    fn focus_change_retargets_both_windows() {
        let (mut stack, mut ring, mut config, mut focus) = ctx_parts();
        config.opacity.active = 1.0;
        config.opacity.inactive = 0.8;
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        for id in [1u32, 2] {
            dispatch(
                &XEvent::Create {
                    wid: Wid(id),
                    geom: geom(),
                    override_redirect: false,
                    input_only: false,
                },
                &mut ctx,
            );
            dispatch(
                &XEvent::Map {
                    wid: Wid(id),
                    has_alpha: false,
                },
                &mut ctx,
            );
        }
        let out = dispatch(
            &XEvent::RootProperty(RootPropertyChange::ActiveWindow(Wid(1))),
            &mut ctx,
        );
        assert!(out.needs_frame);
        assert_eq!(focus.active_win, Wid(1));
        let k1 = stack.find(Wid(1)).unwrap();
        let k2 = stack.find(Wid(2)).unwrap();
        assert!(stack.win(k1).flags.contains(WinFlags::FOCUSED));
        assert!(!stack.win(k2).flags.contains(WinFlags::FOCUSED));
        assert_eq!(stack.win(k1).opacity_tgt, 1.0);
        assert_eq!(stack.win(k2).opacity_tgt, 0.8);
    }

    #[test]
    fn leader_group_follows_focus() {
        let (mut stack, mut ring, mut config, mut focus) = ctx_parts();
        config.opacity.inactive = 0.5;
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        for id in [1u32, 2, 3] {
            dispatch(
                &XEvent::Create {
                    wid: Wid(id),
                    geom: geom(),
                    override_redirect: false,
                    input_only: false,
                },
                &mut ctx,
            );
            dispatch(
                &XEvent::Map {
                    wid: Wid(id),
                    has_alpha: false,
                },
                &mut ctx,
            );
        }
        // 1 and 2 share a leader; 3 stands alone.
        for id in [1u32, 2] {
            dispatch(
                &XEvent::Property {
                    wid: Wid(id),
                    change: PropertyChange::Leader(Wid(0x99)),
                },
                &mut ctx,
            );
        }
        dispatch(
            &XEvent::RootProperty(RootPropertyChange::ActiveWindow(Wid(1))),
            &mut ctx,
        );
        let focused = |stack: &WinStack, id: u32| {
            stack
                .win(stack.find(Wid(id)).unwrap())
                .flags
                .contains(WinFlags::FOCUSED)
        };
        assert!(focused(&stack, 1));
        assert!(focused(&stack, 2), "leader sibling counts as focused");
        assert!(!focused(&stack, 3));
    }

    #[test]
    fn opacity_property_change_fades_mapped_window() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        // Settle the map fade.
        let k = ctx.stack.find(Wid(1)).unwrap();
        {
            let w = ctx.stack.win_mut(k);
            w.opacity = 1.0;
            w.check_fade_finished();
        }
        let out = dispatch(
            &XEvent::Property {
                wid: Wid(1),
                change: PropertyChange::Opacity(Some(0.25)),
            },
            &mut ctx,
        );
        assert!(out.fade_started);
        let w = stack.win(stack.find(Wid(1)).unwrap());
        assert_eq!(w.state, core_state::WinState::Fading);
        assert_eq!(w.opacity_tgt, 0.25);
    }

    #[test]
    fn selection_clear_is_fatal() {
        let (mut stack, mut ring, config, mut focus) = ctx_parts();
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        let out = dispatch(&XEvent::SelectionClear, &mut ctx);
        assert!(out.quit);
    }

    #[test]
    fn wintype_change_reapplies_type_policy() {
        let (mut stack, mut ring, mut config, mut focus) = ctx_parts();
        config.shadow.enabled = true;
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        dispatch(
            &XEvent::Create {
                wid: Wid(1),
                geom: geom(),
                override_redirect: false,
                input_only: false,
            },
            &mut ctx,
        );
        dispatch(
            &XEvent::Map {
                wid: Wid(1),
                has_alpha: false,
            },
            &mut ctx,
        );
        let out = dispatch(
            &XEvent::Property {
                wid: Wid(1),
                change: PropertyChange::WindowType(WinType::Normal),
            },
            &mut ctx,
        );
        assert!(out.needs_frame);
        let k = stack.find(Wid(1)).unwrap();
        assert!(stack.win(k).flags.contains(WinFlags::SHADOW));

        // Docks carry no shadow by default.
        let mut ctx = mk_ctx(&mut stack, &mut ring, &config, &mut focus);
        ctx.stack.win_mut(k).shadow_image = Some(Image(7));
        let out = dispatch(
            &XEvent::Property {
                wid: Wid(1),
                change: PropertyChange::WindowType(WinType::Dock),
            },
            &mut ctx,
        );
        assert!(!stack.win(k).flags.contains(WinFlags::SHADOW));
        assert_eq!(out.orphaned_images, vec![Image(7)]);
    }
}
