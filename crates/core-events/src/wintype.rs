//! EWMH window-type classification.
//!
//! The 15 `_NET_WM_WINDOW_TYPE_*` values plus `Unknown` for windows that set
//! none (or an atom we do not recognize). The property reader maps atom names
//! to this enum once; everything downstream matches on the enum.

/// One of the EWMH window types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WinType {
    #[default]
    Unknown,
    Desktop,
    Dock,
    Toolbar,
    Menu,
    Utility,
    Splash,
    Dialog,
    Normal,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
}

impl WinType {
    /// Every concrete type, `Unknown` first. Order is stable (config tables
    /// and tests index by it).
    pub const ALL: [WinType; 15] = [
        WinType::Unknown,
        WinType::Desktop,
        WinType::Dock,
        WinType::Toolbar,
        WinType::Menu,
        WinType::Utility,
        WinType::Splash,
        WinType::Dialog,
        WinType::Normal,
        WinType::DropdownMenu,
        WinType::PopupMenu,
        WinType::Tooltip,
        WinType::Notification,
        WinType::Combo,
        WinType::Dnd,
    ];

    /// Stable index into [`WinType::ALL`].
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }

    /// Map the suffix of a `_NET_WM_WINDOW_TYPE_*` atom name.
    pub fn from_atom_suffix(suffix: &str) -> Option<WinType> {
        Some(match suffix {
            "DESKTOP" => WinType::Desktop,
            "DOCK" => WinType::Dock,
            "TOOLBAR" => WinType::Toolbar,
            "MENU" => WinType::Menu,
            "UTILITY" => WinType::Utility,
            "SPLASH" => WinType::Splash,
            "DIALOG" => WinType::Dialog,
            "NORMAL" => WinType::Normal,
            "DROPDOWN_MENU" => WinType::DropdownMenu,
            "POPUP_MENU" => WinType::PopupMenu,
            "TOOLTIP" => WinType::Tooltip,
            "NOTIFICATION" => WinType::Notification,
            "COMBO" => WinType::Combo,
            "DND" => WinType::Dnd,
            _ => return None,
        })
    }

    /// Lower-case config-file key for this type.
    pub fn config_key(self) -> &'static str {
        match self {
            WinType::Unknown => "unknown",
            WinType::Desktop => "desktop",
            WinType::Dock => "dock",
            WinType::Toolbar => "toolbar",
            WinType::Menu => "menu",
            WinType::Utility => "utility",
            WinType::Splash => "splash",
            WinType::Dialog => "dialog",
            WinType::Normal => "normal",
            WinType::DropdownMenu => "dropdown_menu",
            WinType::PopupMenu => "popup_menu",
            WinType::Tooltip => "tooltip",
            WinType::Notification => "notification",
            WinType::Combo => "combo",
            WinType::Dnd => "dnd",
        }
    }

    pub fn from_config_key(key: &str) -> Option<WinType> {
        WinType::ALL.iter().copied().find(|t| t.config_key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_every_variant_once() {
        for (i, t) in WinType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
        assert_eq!(WinType::ALL.len(), 15);
    }

    #[test]
    fn atom_suffix_round_trip() {
        assert_eq!(WinType::from_atom_suffix("TOOLTIP"), Some(WinType::Tooltip));
        assert_eq!(
            WinType::from_atom_suffix("DROPDOWN_MENU"),
            Some(WinType::DropdownMenu)
        );
        assert_eq!(WinType::from_atom_suffix("GARBAGE"), None);
    }

    #[test]
    fn config_key_round_trip() {
        for t in WinType::ALL {
            assert_eq!(WinType::from_config_key(t.config_key()), Some(t));
        }
        assert_eq!(WinType::from_config_key("no_such_type"), None);
    }
}
