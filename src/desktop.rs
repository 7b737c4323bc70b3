// Win32 side of the controller: window enumeration, z-order, fade timer,
// foreground hook.

use crate::error::{Result, TheaterError};
use crate::focus::FocusWatcher;
use crate::platform::{Desktop, WindowId};
use crate::process;
use std::time::Duration;
use tracing::{debug, warn};
use windows::core::BOOL;
use windows::Win32::Foundation::{HWND, LPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    BeginDeferWindowPos, DeferWindowPos, EndDeferWindowPos, EnumWindows, IsWindowVisible,
    KillTimer, SetTimer, HWND_BOTTOM, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE,
};

/// WM_TIMER id of the fade-in tick on the message window.
pub const FADE_TIMER_ID: usize = 1;

unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowId>);
    if IsWindowVisible(hwnd).as_bool() {
        windows.push(WindowId::from(hwnd));
    }
    BOOL::from(true)
}

pub struct Win32Desktop {
    message_window: HWND,
    watcher: FocusWatcher,
}

impl Win32Desktop {
    /// `message_window` receives the fade timer's WM_TIMER.
    pub fn new(message_window: HWND, watcher: FocusWatcher) -> Self {
        Self {
            message_window,
            watcher,
        }
    }
}

impl Desktop for Win32Desktop {
    fn process_name(&self, window: WindowId) -> Option<String> {
        process::process_name(window)
    }

    fn visible_top_level_windows(&self) -> Result<Vec<WindowId>> {
        let mut windows: Vec<WindowId> = Vec::with_capacity(256);
        unsafe {
            EnumWindows(
                Some(enum_windows_proc),
                LPARAM(&mut windows as *mut Vec<WindowId> as isize),
            )?;
        }
        Ok(windows)
    }

    fn send_to_back(&mut self, windows: &[WindowId]) -> Result<()> {
        let count = i32::try_from(windows.len())
            .map_err(|_| TheaterError::platform("too many windows to reorder"))?;

        unsafe {
            let mut batch = BeginDeferWindowPos(count)?;
            for window in windows {
                batch = DeferWindowPos(
                    batch,
                    window.hwnd(),
                    Some(HWND_BOTTOM),
                    0,
                    0,
                    0,
                    0,
                    SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
                )?;
            }
            EndDeferWindowPos(batch)?;
        }
        Ok(())
    }

    fn start_fade_timer(&mut self, interval: Duration) -> Result<()> {
        let millis = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        let id = unsafe { SetTimer(Some(self.message_window), FADE_TIMER_ID, millis, None) };
        if id == 0 {
            return Err(windows::core::Error::from_win32().into());
        }
        debug!("Fade timer started ({millis}ms)");
        Ok(())
    }

    fn stop_fade_timer(&mut self) {
        unsafe {
            if let Err(e) = KillTimer(Some(self.message_window), FADE_TIMER_ID) {
                warn!("KillTimer failed: {e}");
            }
        }
    }

    fn subscribe_focus(&mut self) -> Result<()> {
        self.watcher.register()
    }

    fn unsubscribe_focus(&mut self) {
        self.watcher.unregister();
    }
}
