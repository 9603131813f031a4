//! Per-wintype policy table.
//!
//! Each of the 15 EWMH window types can override shadow, fading, default
//! opacity, and focus policy. `None` means "no override"; the opacity engine
//! and preprocess consult the table through [`WintypeTable::get`].

use crate::ConfigError;
use core_events::WinType;
use serde::Deserialize;
use std::collections::HashMap;

/// File-side per-type overrides.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WintypeFileOptions {
    pub shadow: Option<bool>,
    pub fade: Option<bool>,
    pub opacity: Option<f64>,
    /// Treat windows of this type as always/never focused.
    pub focus: Option<bool>,
}

/// Effective per-type overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WintypeOptions {
    pub shadow: Option<bool>,
    pub fade: Option<bool>,
    pub opacity: Option<f64>,
    pub focus: Option<bool>,
}

/// Fixed-size table indexed by [`WinType::index`].
#[derive(Debug, Clone)]
pub struct WintypeTable {
    entries: [WintypeOptions; 15],
}

impl Default for WintypeTable {
    fn default() -> Self {
        let mut entries = [WintypeOptions::default(); 15];
        // Drag-and-drop surfaces and docks carry no shadow unless overridden;
        // tooltips and popup menus count as focused so they never dim.
        entries[WinType::Dnd.index()].shadow = Some(false);
        entries[WinType::Dock.index()].shadow = Some(false);
        entries[WinType::Desktop.index()].shadow = Some(false);
        for t in [
            WinType::Tooltip,
            WinType::DropdownMenu,
            WinType::PopupMenu,
            WinType::Menu,
            WinType::Combo,
            WinType::Dnd,
        ] {
            entries[t.index()].focus = Some(true);
        }
        Self { entries }
    }
}

impl WintypeTable {
    /// Apply file overrides on top of the built-in defaults.
    pub fn from_file(
        file: &HashMap<String, WintypeFileOptions>,
    ) -> Result<WintypeTable, ConfigError> {
        let mut table = WintypeTable::default();
        for (key, opts) in file {
            let Some(wintype) = WinType::from_config_key(key) else {
                return Err(ConfigError::Invalid(format!("unknown wintype '{key}'")));
            };
            if let Some(op) = opts.opacity {
                if !(0.0..=1.0).contains(&op) || !op.is_finite() {
                    return Err(ConfigError::Invalid(format!(
                        "wintypes.{key}.opacity = {op} not in [0, 1]"
                    )));
                }
            }
            let entry = &mut table.entries[wintype.index()];
            if opts.shadow.is_some() {
                entry.shadow = opts.shadow;
            }
            if opts.fade.is_some() {
                entry.fade = opts.fade;
            }
            if opts.opacity.is_some() {
                entry.opacity = opts.opacity;
            }
            if opts.focus.is_some() {
                entry.focus = opts.focus;
            }
        }
        Ok(table)
    }

    pub fn get(&self, wintype: WinType) -> WintypeOptions {
        self.entries[wintype.index()]
    }

    /// Programmatic override, used by the control surface and by tests.
    pub fn set(&mut self, wintype: WinType, options: WintypeOptions) {
        self.entries[wintype.index()] = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_dock_has_no_shadow_tooltip_focused() {
        let t = WintypeTable::default();
        assert_eq!(t.get(WinType::Dock).shadow, Some(false));
        assert_eq!(t.get(WinType::Tooltip).focus, Some(true));
        assert_eq!(t.get(WinType::Normal), WintypeOptions::default());
    }

    #[test]
    fn file_overrides_win_over_defaults() {
        let mut file = HashMap::new();
        file.insert(
            "dock".to_string(),
            WintypeFileOptions {
                shadow: Some(true),
                opacity: Some(0.8),
                ..Default::default()
            },
        );
        let t = WintypeTable::from_file(&file).unwrap();
        assert_eq!(t.get(WinType::Dock).shadow, Some(true));
        assert_eq!(t.get(WinType::Dock).opacity, Some(0.8));
        // Untouched fields keep defaults.
        assert_eq!(t.get(WinType::Dnd).shadow, Some(false));
    }

    #[test]
    fn unknown_type_and_bad_opacity_rejected() {
        let mut file = HashMap::new();
        file.insert("gizmo".to_string(), WintypeFileOptions::default());
        assert!(WintypeTable::from_file(&file).is_err());

        let mut file = HashMap::new();
        file.insert(
            "normal".to_string(),
            WintypeFileOptions {
                opacity: Some(2.0),
                ..Default::default()
            },
        );
        assert!(WintypeTable::from_file(&file).is_err());
    }
}
