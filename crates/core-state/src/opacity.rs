//! Opacity target computation.
//!
//! Priority order, first match wins:
//! 1. `inactive_override` set and the window is not focused.
//! 2. `_NET_WM_WINDOW_OPACITY` (already scaled, cached on the window).
//! 3. Opacity-rule match (cached on the window by the dispatcher).
//! 4. Per-wintype default opacity.
//! 5. Focused ⇒ `active` opacity.
//! 6. Not focused ⇒ `inactive` opacity.
//! 7. Fallback 1.0 (unreachable while 5/6 are total, kept for clarity).
//!
//! Unmapping/destroying windows are not handled here; their zero target is
//! forced inside `Window::set_opacity_target`.

use crate::{OpacitySource, Window};
use core_config::Config;

/// Compute the target opacity and its source for one window.
pub fn compute_target(win: &Window, config: &Config) -> (f64, OpacitySource) {
    let focused = win.focused_effective(config);

    if config.opacity.inactive_override && !focused {
        return (config.opacity.inactive, OpacitySource::Inactive);
    }
    if let Some(v) = win.prop_opacity {
        return (v, OpacitySource::Property);
    }
    if let Some(v) = win.rule_opacity {
        return (v, OpacitySource::Rule);
    }
    if let Some(v) = config.wintypes.get(win.wintype).opacity {
        if v.is_finite() {
            return (v, OpacitySource::TypeDefault);
        }
    }
    if focused {
        (config.opacity.active, OpacitySource::Active)
    } else {
        (config.opacity.inactive, OpacitySource::Inactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WinFlags;
    use core_config::{Config, WintypeOptions};
    use core_events::{Geometry, Wid, WinType};

    fn win() -> Window {
        Window::new(Wid(1), Geometry::new(0, 0, 10, 10, 0))
    }

    #[test]
    fn property_beats_type_default_and_focus() {
        let mut cfg = Config::default();
        cfg.opacity.active = 0.9;
        cfg.wintypes.set(
            WinType::Normal,
            WintypeOptions {
                opacity: Some(0.5),
                ..Default::default()
            },
        );
        let mut w = win();
        w.wintype = WinType::Normal;
        w.flags.insert(WinFlags::FOCUSED);
        w.prop_opacity = Some(0.3);
        assert_eq!(compute_target(&w, &cfg), (0.3, OpacitySource::Property));
    }

    #[test]
    fn inactive_override_beats_property() {
        let mut cfg = Config::default();
        cfg.opacity.inactive = 0.6;
        cfg.opacity.inactive_override = true;
        let mut w = win();
        w.prop_opacity = Some(0.3);
        assert_eq!(compute_target(&w, &cfg), (0.6, OpacitySource::Inactive));
        // Focused windows are exempt from the override.
        w.flags.insert(WinFlags::FOCUSED);
        assert_eq!(compute_target(&w, &cfg), (0.3, OpacitySource::Property));
    }

    #[test]
    fn rule_beats_type_default() {
        let mut cfg = Config::default();
        cfg.wintypes.set(
            WinType::Dialog,
            WintypeOptions {
                opacity: Some(0.5),
                ..Default::default()
            },
        );
        let mut w = win();
        w.wintype = WinType::Dialog;
        w.rule_opacity = Some(0.7);
        assert_eq!(compute_target(&w, &cfg), (0.7, OpacitySource::Rule));
        w.rule_opacity = None;
        assert_eq!(compute_target(&w, &cfg), (0.5, OpacitySource::TypeDefault));
    }

    #[test]
    fn focus_split_active_inactive() {
        let mut cfg = Config::default();
        cfg.opacity.active = 0.95;
        cfg.opacity.inactive = 0.8;
        let mut w = win();
        assert_eq!(compute_target(&w, &cfg), (0.8, OpacitySource::Inactive));
        w.flags.insert(WinFlags::FOCUSED);
        assert_eq!(compute_target(&w, &cfg), (0.95, OpacitySource::Active));
    }

    #[test]
    fn wintype_focus_policy_feeds_in() {
        // Tooltips default to focused, so they take the active opacity.
        let mut cfg = Config::default();
        cfg.opacity.inactive = 0.7;
        let mut w = win();
        w.wintype = WinType::Tooltip;
        assert_eq!(compute_target(&w, &cfg), (1.0, OpacitySource::Active));
    }

    #[test]
    fn defaults_yield_full_opacity() {
        let cfg = Config::default();
        let w = win();
        let (v, _) = compute_target(&w, &cfg);
        assert_eq!(v, 1.0);
    }
}
