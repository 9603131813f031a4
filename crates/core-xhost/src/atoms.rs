//! Atom cache, interned once at connect.

use x11rb::atom_manager;

atom_manager! {
    /// All fixed-name atoms the compositor touches. The compositor-manager
    /// selection atom (`_NET_WM_CM_Sn`) is per-screen and interned
    /// separately in `host`.
    pub Atoms:
    AtomsCookie {
        _NET_WM_WINDOW_OPACITY,
        _NET_FRAME_EXTENTS,
        WM_STATE,
        _NET_WM_NAME,
        WM_NAME,
        WM_CLASS,
        WM_WINDOW_ROLE,
        WM_TRANSIENT_FOR,
        WM_CLIENT_LEADER,
        _NET_ACTIVE_WINDOW,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_WINDOW_TYPE_TOOLBAR,
        _NET_WM_WINDOW_TYPE_MENU,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _NET_WM_WINDOW_TYPE_SPLASH,
        _NET_WM_WINDOW_TYPE_DIALOG,
        _NET_WM_WINDOW_TYPE_NORMAL,
        _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
        _NET_WM_WINDOW_TYPE_POPUP_MENU,
        _NET_WM_WINDOW_TYPE_TOOLTIP,
        _NET_WM_WINDOW_TYPE_NOTIFICATION,
        _NET_WM_WINDOW_TYPE_COMBO,
        _NET_WM_WINDOW_TYPE_DND,
        _COMPTON_SHADOW,
        _XROOTPMAP_ID,
        _XSETROOT_ID,
        ESETROOT_PMAP_ID,
        _NET_WM_PID,
        COMPTON_VERSION,
        UTF8_STRING,
    }
}
