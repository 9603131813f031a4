//! Compositor window state: the per-window record, its lifecycle machine,
//! and the z-ordered registry.
//!
//! A [`Window`] tracks everything the engine knows about one top-level X
//! window. Lifecycle is a closed enum ([`WinState`]) whose only legal
//! transitions are:
//!
//! ```text
//! UNMAPPED ──map──▶ MAPPING ──fade done──▶ MAPPED
//! MAPPED ──opacity target change──▶ FADING ──fade done──▶ MAPPED
//! MAPPED ──unmap──▶ UNMAPPING ──fade done──▶ UNMAPPED
//! *       ──destroy──▶ DESTROYING ──fade done──▶ (freed)
//! ```
//!
//! Invariants:
//! * `Unmapped` ⇒ `opacity == opacity_tgt == 0` and no backend image bound.
//! * `Mapped` ⇒ `opacity == opacity_tgt > 0`.
//! * Any other state ⇒ `opacity != opacity_tgt`, or the terminal transition
//!   fires on the next `check_fade_finished`.
//!
//! Image release and stack removal need collaborators this crate does not
//! hold, so `check_fade_finished` reports what happened as a [`FadeFinish`]
//! and the preprocess pass acts on it.

use core_backend::Image;
use core_config::{Config, RuleTarget};
use core_events::{Geometry, Wid, WinType};
use core_region::{Rect, Region, SharedRegion};

mod fade;
mod opacity;
mod stack;

pub use fade::{step_fade, FadeParams};
pub use opacity::compute_target;
pub use stack::{WinKey, WinStack};

bitflags::bitflags! {
    /// Boolean per-window state, flag names matching what they gate.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct WinFlags: u32 {
        /// Received at least one damage report since mapping.
        const EVER_DAMAGED     = 1 << 0;
        /// Bound image no longer matches the pixmap; rebind before paint.
        const STALE_IMAGE      = 1 << 1;
        /// Last bind failed; window is skipped until the next map.
        const IMAGE_ERROR      = 1 << 2;
        const SHADOW           = 1 << 3;
        const INVERT_COLOR     = 1 << 4;
        const BLUR_BACKGROUND  = 1 << 5;
        const DIM              = 1 << 6;
        /// Focused per the X server (mirrored, never decided here).
        const FOCUSED          = 1 << 7;
        /// Visual has an alpha channel.
        const HAS_ALPHA        = 1 << 8;
        /// Rule cache: painting excluded.
        const PAINT_EXCLUDED   = 1 << 9;
        /// Rule cache: never counts toward unredirection.
        const UNREDIR_EXCLUDED = 1 << 10;
        /// `reg_ignore` can be trusted from the previous frame.
        const REG_IGNORE_VALID = 1 << 11;
        /// Painted in the previous frame (`to_paint` of frame N−1).
        const PAINTED          = 1 << 12;
        /// InputOnly window: ordered but never painted.
        const INPUT_ONLY       = 1 << 13;
        /// Viewable per the server's map state.
        const VIEWABLE         = 1 << 14;
    }
}

/// Lifecycle states; see the module diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinState {
    Unmapped,
    Mapping,
    Mapped,
    Fading,
    Unmapping,
    Destroying,
}

impl WinState {
    /// True while an opacity animation may be in flight.
    pub fn is_fading(self) -> bool {
        matches!(
            self,
            WinState::Mapping | WinState::Fading | WinState::Unmapping | WinState::Destroying
        )
    }
}

/// What `check_fade_finished` did; callers own the follow-up work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeFinish {
    /// Nothing finished; fade still running or no fade at all.
    None,
    /// MAPPING/FADING reached target; window is now `Mapped`.
    BecameMapped,
    /// UNMAPPING reached zero; release images, window is now `Unmapped`.
    BecameUnmapped,
    /// DESTROYING reached zero; release images and free the list node.
    Destroyed,
}

/// Paint mode recomputed each frame in preprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WinMode {
    /// Fully opaque: no alpha, opacity 1, frame opacity 1.
    Solid,
    /// Only the frame band is translucent.
    FrameTrans,
    /// Anything else.
    #[default]
    Trans,
}

/// Where the current opacity target came from (diagnostics + re-match logic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpacitySource {
    Property,
    Rule,
    TypeDefault,
    Active,
    Inactive,
    #[default]
    Fallback,
}

/// Control-surface force override; `Unset` defers to normal computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    #[default]
    Unset,
    On,
    Off,
}

impl ForceMode {
    /// Apply the override on top of a computed value.
    pub fn apply(self, computed: bool) -> bool {
        match self {
            ForceMode::Unset => computed,
            ForceMode::On => true,
            ForceMode::Off => false,
        }
    }
}

/// `_NET_FRAME_EXTENTS`: WM frame border widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameExtents {
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
    pub left: u16,
}

impl FrameExtents {
    pub fn is_zero(&self) -> bool {
        self.top == 0 && self.right == 0 && self.bottom == 0 && self.left == 0
    }
}

/// Everything the compositor tracks about one top-level window.
#[derive(Debug)]
pub struct Window {
    pub id: Wid,
    /// Inner window carrying `WM_STATE`; equals `id` for undecorated clients.
    pub client: Wid,
    pub leader: Wid,
    /// Resolved group leader; `Wid::NONE` when the cache is invalid.
    pub cache_leader: Wid,
    pub geom: Geometry,
    pub state: WinState,
    pub wintype: WinType,
    pub mode: WinMode,
    pub flags: WinFlags,
    pub override_redirect: bool,

    pub opacity: f64,
    pub opacity_tgt: f64,
    pub opacity_source: OpacitySource,
    /// `_NET_WM_WINDOW_OPACITY`, already scaled to [0, 1].
    pub prop_opacity: Option<f64>,
    /// Cached value of the last opacity-rule match.
    pub rule_opacity: Option<f64>,
    /// Effective shadow alpha, refreshed in preprocess step 5.
    pub shadow_opacity: f64,
    /// Wall-clock (ms) of the last fade step; `None` before the first.
    pub fade_last_step_ms: Option<u64>,

    pub frame_extents: FrameExtents,
    /// Bounding shape in window-local coordinates; `None` means the plain
    /// geometry rectangle (the common, unshaped case).
    pub bounding_shape: Option<Region>,

    /// Union of opaque regions of all windows strictly above; shared along
    /// runs of windows seeing the same union.
    pub reg_ignore: Option<SharedRegion>,

    pub body_image: Option<Image>,
    pub shadow_image: Option<Image>,
    /// Screen-space shadow placement; empty until the kernel sizes it.
    pub shadow_rect: Rect,

    pub name: Option<String>,
    pub class_instance: Option<String>,
    pub class_general: Option<String>,
    pub role: Option<String>,

    pub shadow_force: ForceMode,
    pub fade_force: ForceMode,
    pub focus_force: ForceMode,
    pub invert_force: ForceMode,
    /// `_COMPTON_SHADOW`-style per-window property override.
    pub shadow_prop_override: Option<bool>,
}

impl Window {
    pub fn new(id: Wid, geom: Geometry) -> Self {
        Self {
            id,
            client: Wid::NONE,
            leader: Wid::NONE,
            cache_leader: Wid::NONE,
            geom,
            state: WinState::Unmapped,
            wintype: WinType::Unknown,
            mode: WinMode::Trans,
            flags: WinFlags::empty(),
            override_redirect: false,
            opacity: 0.0,
            opacity_tgt: 0.0,
            opacity_source: OpacitySource::Fallback,
            prop_opacity: None,
            rule_opacity: None,
            shadow_opacity: 0.0,
            fade_last_step_ms: None,
            frame_extents: FrameExtents::default(),
            bounding_shape: None,
            reg_ignore: None,
            body_image: None,
            shadow_image: None,
            shadow_rect: Rect::new(0, 0, 0, 0),
            name: None,
            class_instance: None,
            class_general: None,
            role: None,
            shadow_force: ForceMode::Unset,
            fade_force: ForceMode::Unset,
            focus_force: ForceMode::Unset,
            invert_force: ForceMode::Unset,
            shadow_prop_override: None,
        }
    }

    /// Outer rectangle on screen, border included.
    pub fn border_rect(&self) -> Rect {
        Rect::new(
            i32::from(self.geom.x),
            i32::from(self.geom.y),
            self.geom.outer_width(),
            self.geom.outer_height(),
        )
    }

    /// Border rectangle plus shadow, the full damage footprint.
    pub fn extents(&self) -> Rect {
        let body = self.border_rect();
        if self.flags.contains(WinFlags::SHADOW) && !self.shadow_rect.is_empty() {
            let s = &self.shadow_rect;
            Rect::from_coords(
                body.x1.min(s.x1),
                body.y1.min(s.y1),
                body.x2.max(s.x2),
                body.y2.max(s.y2),
            )
        } else {
            body
        }
    }

    /// Bounding shape in screen coordinates.
    pub fn shape_on_screen(&self) -> Region {
        match &self.bounding_shape {
            Some(shape) => shape.translate(i32::from(self.geom.x), i32::from(self.geom.y)),
            None => Region::from_rect(self.border_rect()),
        }
    }

    /// Focus as consulted by opacity/dim logic: force override first, then
    /// the mirrored server focus, per-wintype policy (`Some(true)` counts the
    /// whole type as focused), and finally the focus rule list.
    pub fn focused_effective(&self, config: &Config) -> bool {
        let computed = self.flags.contains(WinFlags::FOCUSED)
            || config.wintypes.get(self.wintype).focus == Some(true)
            || (!config.focus_rules.is_empty()
                && config.focus_rules.matches(&self.rule_target_raw()));
        self.focus_force.apply(computed)
    }

    /// Recompute paint mode from current opacity and alpha state.
    pub fn update_mode(&mut self, frame_opacity: f64) {
        self.mode = if self.flags.contains(WinFlags::HAS_ALPHA) {
            WinMode::Trans
        } else if self.opacity < 1.0 {
            WinMode::Trans
        } else if frame_opacity < 1.0 && !self.frame_extents.is_zero() {
            WinMode::FrameTrans
        } else {
            WinMode::Solid
        };
    }

    /// True when the window covers the whole root and cannot be seen through.
    pub fn is_fullscreen(&self, root_width: u16, root_height: u16) -> bool {
        let r = self.border_rect();
        r.x1 <= 0
            && r.y1 <= 0
            && r.x2 >= i32::from(root_width)
            && r.y2 >= i32::from(root_height)
            && self.bounding_shape.is_none()
    }

    /// Snapshot handed to the opaque rule matcher.
    pub fn rule_target(&self, config: &Config) -> RuleTarget<'_> {
        let mut target = self.rule_target_raw();
        target.focused = self.focused_effective(config);
        target
    }

    /// Rule snapshot with the raw mirrored focus bit. Used by the focus
    /// rules themselves, which must not observe their own result.
    fn rule_target_raw(&self) -> RuleTarget<'_> {
        RuleTarget {
            name: self.name.as_deref(),
            class_general: self.class_general.as_deref(),
            class_instance: self.class_instance.as_deref(),
            role: self.role.as_deref(),
            wintype: self.wintype,
            focused: self.flags.contains(WinFlags::FOCUSED),
            override_redirect: self.override_redirect,
            has_alpha: self.flags.contains(WinFlags::HAS_ALPHA),
            width: self.geom.width,
            height: self.geom.height,
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle transitions
    // ---------------------------------------------------------------------

    /// MapNotify: UNMAPPED → MAPPING. Any other state is left alone (the
    /// server can emit redundant maps during reparenting storms).
    pub fn mark_mapping(&mut self) {
        if self.state == WinState::Unmapped {
            self.state = WinState::Mapping;
            self.flags.insert(WinFlags::VIEWABLE);
            self.flags.remove(WinFlags::IMAGE_ERROR);
            self.flags.insert(WinFlags::STALE_IMAGE);
            self.fade_last_step_ms = None;
        }
    }

    /// UnmapNotify: MAPPED/MAPPING/FADING → UNMAPPING with target zero.
    pub fn mark_unmapping(&mut self) {
        if matches!(
            self.state,
            WinState::Mapped | WinState::Mapping | WinState::Fading
        ) {
            self.state = WinState::Unmapping;
            self.opacity_tgt = 0.0;
            self.flags.remove(WinFlags::VIEWABLE);
        }
    }

    /// DestroyNotify: any state → DESTROYING with target zero.
    pub fn mark_destroying(&mut self) {
        self.state = WinState::Destroying;
        self.opacity_tgt = 0.0;
        self.flags.remove(WinFlags::VIEWABLE);
    }

    /// Retarget opacity. `fades_allowed == false` (redirection off, or the
    /// fade-exclude rule matched) snaps straight to the target.
    pub fn set_opacity_target(&mut self, target: f64, source: OpacitySource, fades_allowed: bool) {
        // Unmapping/destroying windows always head to zero.
        let target = match self.state {
            WinState::Unmapping | WinState::Destroying => 0.0,
            _ => target,
        };
        self.opacity_source = source;
        self.opacity_tgt = target;
        if self.state == WinState::Mapped && self.opacity != target {
            self.state = WinState::Fading;
        }
        if !fades_allowed {
            self.opacity = target;
        }
    }

    /// Resolve a finished fade into its terminal state.
    pub fn check_fade_finished(&mut self) -> FadeFinish {
        if self.opacity != self.opacity_tgt {
            return FadeFinish::None;
        }
        match self.state {
            WinState::Mapping | WinState::Fading => {
                self.state = WinState::Mapped;
                FadeFinish::BecameMapped
            }
            WinState::Unmapping => {
                self.state = WinState::Unmapped;
                self.opacity = 0.0;
                self.opacity_tgt = 0.0;
                self.flags.remove(WinFlags::EVER_DAMAGED);
                FadeFinish::BecameUnmapped
            }
            WinState::Destroying => FadeFinish::Destroyed,
            WinState::Unmapped | WinState::Mapped => FadeFinish::None,
        }
    }
}
