// Seams between the theater state machine and the OS.

use crate::error::Result;
use crate::settings::Rgb;
use std::time::Duration;

/// Opaque top-level window identity (the HWND value on Windows).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

impl WindowId {
    pub const NULL: WindowId = WindowId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[cfg(windows)]
impl WindowId {
    pub fn hwnd(self) -> windows::Win32::Foundation::HWND {
        windows::Win32::Foundation::HWND(self.0 as *mut std::ffi::c_void)
    }
}

#[cfg(windows)]
impl From<windows::Win32::Foundation::HWND> for WindowId {
    fn from(hwnd: windows::Win32::Foundation::HWND) -> Self {
        WindowId(hwnd.0 as isize)
    }
}

/// Everything the controller needs from the desktop besides the overlays.
pub trait Desktop {
    /// Lowercase executable filename of the process owning `window`.
    fn process_name(&self, window: WindowId) -> Option<String>;

    /// All visible top-level windows, in z-order.
    fn visible_top_level_windows(&self) -> Result<Vec<WindowId>>;

    /// Move `windows` to the bottom of the z-order as one batch, without
    /// activating any of them.
    fn send_to_back(&mut self, windows: &[WindowId]) -> Result<()>;

    fn start_fade_timer(&mut self, interval: Duration) -> Result<()>;
    fn stop_fade_timer(&mut self);

    fn subscribe_focus(&mut self) -> Result<()>;
    fn unsubscribe_focus(&mut self);
}

/// The set of per-display overlay surfaces, addressed as a whole.
pub trait Dimmer {
    fn initialize(&mut self) -> Result<()>;
    fn teardown(&mut self);

    /// Show without activating, or hide.
    fn show(&mut self, visible: bool);
    fn set_alpha(&mut self, alpha: u8);
    fn set_color(&mut self, color: Rgb);
    fn is_dimmer_window(&self, window: WindowId) -> bool;
}
