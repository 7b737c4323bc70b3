// System tray icon with context menu

use std::cell::Cell;

/// Menu item IDs
pub const IDM_TOGGLE: u32 = 1001;
pub const IDM_COLOR: u32 = 1002;
pub const IDM_EXIT: u32 = 1003;

/// Opacity presets are `IDM_OPACITY_BASE + percent / 10`.
pub const IDM_OPACITY_BASE: u32 = 1100;

/// Opacity submenu entries, top to bottom.
pub const OPACITY_PRESETS: [u8; 10] = [100, 90, 80, 70, 60, 50, 40, 30, 20, 10];

/// Alpha for an opacity percentage, `round(percent * 2.55)`.
pub fn preset_alpha(percent: u8) -> u8 {
    ((u32::from(percent.min(100)) * 255 + 50) / 100) as u8
}

pub fn opacity_command(percent: u8) -> u32 {
    IDM_OPACITY_BASE + u32::from(percent / 10)
}

/// Alpha selected by a menu command, if it is an opacity preset.
pub fn opacity_for_command(id: u32) -> Option<u8> {
    OPACITY_PRESETS
        .iter()
        .find(|&&percent| opacity_command(percent) == id)
        .map(|&percent| preset_alpha(percent))
}

/// Picker default for the 16 custom-color slots: white, as COLORREF.
const CUSTOM_COLOR_DEFAULT: u32 = 0x00FF_FFFF;

thread_local! {
    /// Custom colors of the picker, kept for the session.
    static CUSTOM_COLORS: Cell<[u32; 16]> = const { Cell::new([CUSTOM_COLOR_DEFAULT; 16]) };
}

/// Lend the custom-color slots to `f`. They are copied out for the call and
/// stored back after it, so a picker opened from inside another picker's
/// modal loop works on its own copy instead of a held borrow.
pub fn with_custom_colors<R>(f: impl FnOnce(&mut [u32; 16]) -> R) -> R {
    let mut colors = CUSTOM_COLORS.with(Cell::get);
    let result = f(&mut colors);
    CUSTOM_COLORS.with(|slots| slots.set(colors));
    result
}

#[cfg(windows)]
pub use self::win32::{add_tray_icon, pick_color, remove_tray_icon, show_context_menu, WM_TRAY_ICON};

#[cfg(windows)]
mod win32 {
    use super::{
        opacity_command, preset_alpha, with_custom_colors, IDM_COLOR, IDM_EXIT, IDM_TOGGLE,
        OPACITY_PRESETS,
    };
    use crate::error::Result;
    use crate::settings::{Rgb, Settings};
    use tracing::warn;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{COLORREF, HWND, POINT};
    use windows::Win32::UI::Controls::Dialogs::{
        ChooseColorW, CC_ANYCOLOR, CC_FULLOPEN, CC_RGBINIT, CHOOSECOLORW,
    };
    use windows::Win32::UI::Shell::{
        Shell_NotifyIconW, NIF_ICON, NIF_MESSAGE, NIF_TIP, NIM_ADD, NIM_DELETE, NOTIFYICONDATAW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        AppendMenuW, CreatePopupMenu, DestroyMenu, GetCursorPos, GetSystemMetrics, LoadIconW,
        PostMessageW, SetForegroundWindow, TrackPopupMenu, HMENU, IDI_APPLICATION, MF_CHECKED,
        MF_POPUP, MF_SEPARATOR, MF_STRING, MF_UNCHECKED, SM_MENUDROPALIGNMENT, TPM_BOTTOMALIGN,
        TPM_LEFTALIGN, TPM_RIGHTALIGN, WM_APP, WM_NULL,
    };

    /// Custom message ID for tray icon callbacks
    pub const WM_TRAY_ICON: u32 = WM_APP + 1;

    const TRAY_ICON_ID: u32 = 1;

    fn wide_str(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn icon_data(hwnd: HWND) -> NOTIFYICONDATAW {
        NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: hwnd,
            uID: TRAY_ICON_ID,
            ..Default::default()
        }
    }

    /// Add the system tray icon
    pub fn add_tray_icon(hwnd: HWND) -> bool {
        unsafe {
            let mut nid = NOTIFYICONDATAW {
                uFlags: NIF_ICON | NIF_MESSAGE | NIF_TIP,
                uCallbackMessage: WM_TRAY_ICON,
                ..icon_data(hwnd)
            };

            if let Ok(icon) = LoadIconW(None, IDI_APPLICATION) {
                nid.hIcon = icon;
            }

            let tip = wide_str("Theater");
            let len = tip.len().min(nid.szTip.len());
            nid.szTip[..len].copy_from_slice(&tip[..len]);

            if Shell_NotifyIconW(NIM_ADD, &nid).as_bool() {
                return true;
            }

            // An icon left behind by a crashed instance blocks NIM_ADD.
            remove_tray_icon(hwnd);
            Shell_NotifyIconW(NIM_ADD, &nid).as_bool()
        }
    }

    /// Remove the system tray icon
    pub fn remove_tray_icon(hwnd: HWND) {
        unsafe {
            let _ = Shell_NotifyIconW(NIM_DELETE, &icon_data(hwnd));
        }
    }

    fn append(menu: HMENU, checked: bool, id: u32, label: &str) -> Result<()> {
        let text = wide_str(label);
        let state = if checked { MF_CHECKED } else { MF_UNCHECKED };
        unsafe { AppendMenuW(menu, MF_STRING | state, id as usize, PCWSTR(text.as_ptr()))? };
        Ok(())
    }

    fn build_menu(settings: &Settings) -> Result<HMENU> {
        unsafe {
            let opacity = CreatePopupMenu()?;
            for percent in OPACITY_PRESETS {
                let checked = preset_alpha(percent) == settings.alpha;
                append(opacity, checked, opacity_command(percent), &format!("{percent}%"))?;
            }

            let menu = CreatePopupMenu()?;
            append(menu, settings.enabled, IDM_TOGGLE, "Theater mode")?;
            let opacity_text = wide_str("Opacity");
            AppendMenuW(
                menu,
                MF_STRING | MF_POPUP,
                opacity.0 as usize,
                PCWSTR(opacity_text.as_ptr()),
            )?;
            append(menu, false, IDM_COLOR, "Color\u{2026}")?;
            AppendMenuW(menu, MF_SEPARATOR, 0, PCWSTR::null())?;
            append(menu, false, IDM_EXIT, "Exit")?;
            Ok(menu)
        }
    }

    /// Show the tray context menu. The chosen item arrives as WM_COMMAND.
    pub fn show_context_menu(hwnd: HWND, settings: &Settings) {
        let menu = match build_menu(settings) {
            Ok(menu) => menu,
            Err(e) => {
                warn!("Failed to build tray menu: {e}");
                return;
            }
        };

        unsafe {
            let mut pt = POINT::default();
            let _ = GetCursorPos(&mut pt);

            // Required for TrackPopupMenu to work correctly with tray icons
            let _ = SetForegroundWindow(hwnd);

            let align = if GetSystemMetrics(SM_MENUDROPALIGNMENT) != 0 {
                TPM_RIGHTALIGN
            } else {
                TPM_LEFTALIGN
            };
            let _ = TrackPopupMenu(menu, align | TPM_BOTTOMALIGN, pt.x, pt.y, Some(0), hwnd, None);
            let _ = PostMessageW(Some(hwnd), WM_NULL, Default::default(), Default::default());

            // Destroys the opacity submenu along with it
            let _ = DestroyMenu(menu);
        }
    }

    /// Run the color dialog. `None` if the user cancelled.
    pub fn pick_color(hwnd: HWND, current: Rgb) -> Option<Rgb> {
        with_custom_colors(|custom| {
            let mut slots = custom.map(COLORREF);
            let mut cc = CHOOSECOLORW {
                lStructSize: std::mem::size_of::<CHOOSECOLORW>() as u32,
                hwndOwner: hwnd,
                rgbResult: COLORREF(current.to_bgr()),
                lpCustColors: slots.as_mut_ptr(),
                Flags: CC_RGBINIT | CC_ANYCOLOR | CC_FULLOPEN,
                ..Default::default()
            };

            let chosen = unsafe { ChooseColorW(&mut cc) }.as_bool();
            *custom = slots.map(|slot| slot.0);
            chosen.then(|| Rgb::from_bgr(cc.rgbResult.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_map_to_rounded_alpha() {
        let alphas: Vec<u8> = OPACITY_PRESETS.iter().map(|&p| preset_alpha(p)).collect();
        assert_eq!(alphas, vec![255, 230, 204, 179, 153, 128, 102, 77, 51, 26]);
    }

    #[test]
    fn custom_colors_survive_a_nested_picker() {
        let inner = with_custom_colors(|outer| {
            outer[0] = 0x0000_00FF;
            // A second picker opened from the first one's modal loop.
            with_custom_colors(|nested| {
                assert_eq!(nested[0], CUSTOM_COLOR_DEFAULT);
                nested[1] = 0x0000_FF00;
                nested[1]
            })
        });
        assert_eq!(inner, 0x0000_FF00);

        // The outer picker closes last, so its slots are what remains.
        let stored = with_custom_colors(|colors| *colors);
        assert_eq!(stored[0], 0x0000_00FF);
        assert_eq!(stored[1], CUSTOM_COLOR_DEFAULT);
    }

    #[test]
    fn opacity_commands_round_trip_to_alpha() {
        assert_eq!(opacity_command(100), 1110);
        assert_eq!(opacity_command(10), 1101);
        assert_eq!(opacity_for_command(1105), Some(128));
        assert_eq!(opacity_for_command(IDM_OPACITY_BASE), None);
        assert_eq!(opacity_for_command(IDM_TOGGLE), None);
    }
}
