// Win32 overlay surfaces: layered, click-through, non-activating popups.
//
//   • WS_EX_LAYERED + SetLayeredWindowAttributes(LWA_ALPHA) for whole-window alpha
//   • WS_EX_TRANSPARENT so mouse input falls through to the windows beneath
//   • WS_EX_NOACTIVATE + SW_SHOWNOACTIVATE so showing never steals focus
//   • WS_EX_TOOLWINDOW keeps the surfaces out of Alt+Tab and the taskbar
//
// Surfaces are not topmost: the focused window stays above them and every
// other top-level window is pushed below them by the controller.

use super::{OverlayBackend, Rect};
use crate::error::{Result, TheaterError};
use crate::platform::WindowId;
use crate::settings::Rgb;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::warn;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{COLORREF, HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreateSolidBrush, DeleteObject, EndPaint, EnumDisplayMonitors, FillRect,
    GetMonitorInfoW, InvalidateRect, HDC, HGDIOBJ, HMONITOR, MONITORINFO, PAINTSTRUCT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, LoadCursorW, RegisterClassW,
    SetLayeredWindowAttributes, ShowWindow, UnregisterClassW, CS_HREDRAW, CS_VREDRAW, IDC_ARROW,
    LWA_ALPHA, SW_HIDE, SW_SHOWNOACTIVATE, WM_ERASEBKGND, WM_PAINT, WNDCLASSW, WS_EX_LAYERED,
    WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TRANSPARENT, WS_POPUP,
};

const CLASS_NAME: &str = "TheaterDimmerWindow\0";

thread_local! {
    /// Overlay HWND -> fill color of the backend that created it. The window
    /// proc has no other way back to its owner.
    static SURFACES: RefCell<HashMap<isize, Rc<Cell<COLORREF>>>> = RefCell::new(HashMap::new());
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn module_instance() -> HINSTANCE {
    unsafe { GetModuleHandleW(PCWSTR::null()).unwrap_or_default().into() }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_PAINT => {
            let fill = SURFACES.with(|surfaces| {
                surfaces
                    .borrow()
                    .get(&(hwnd.0 as isize))
                    .map(|color| color.get())
            });

            let mut ps = PAINTSTRUCT::default();
            let hdc = BeginPaint(hwnd, &mut ps);
            let brush = CreateSolidBrush(fill.unwrap_or(COLORREF(0)));
            FillRect(hdc, &ps.rcPaint, brush);
            let _ = DeleteObject(HGDIOBJ::from(brush));
            let _ = EndPaint(hwnd, &ps);
            LRESULT(0)
        }

        // Painted in full by WM_PAINT
        WM_ERASEBKGND => LRESULT(1),

        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

unsafe extern "system" fn monitor_enum_proc(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _lprect: *mut RECT,
    lparam: LPARAM,
) -> windows::core::BOOL {
    let displays = &mut *(lparam.0 as *mut Vec<Rect>);

    let mut mi = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if GetMonitorInfoW(hmonitor, &mut mi).as_bool() {
        let rc = mi.rcMonitor;
        displays.push(Rect::new(rc.left, rc.top, rc.right, rc.bottom));
    }

    windows::core::BOOL::from(true)
}

pub struct Win32Overlay {
    fill: Rc<Cell<COLORREF>>,
    class_registered: bool,
}

impl Win32Overlay {
    pub fn new() -> Self {
        Self {
            fill: Rc::new(Cell::new(COLORREF(0))),
            class_registered: false,
        }
    }

    fn register_class(&mut self) -> Result<()> {
        if self.class_registered {
            return Ok(());
        }

        let class_name = wide(CLASS_NAME);
        let wc = WNDCLASSW {
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: Some(window_proc),
            hInstance: module_instance(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            hCursor: unsafe { LoadCursorW(None, IDC_ARROW).unwrap_or_default() },
            ..Default::default()
        };

        if unsafe { RegisterClassW(&wc) } == 0 {
            return Err(windows::core::Error::from_win32().into());
        }
        self.class_registered = true;
        Ok(())
    }
}

impl Default for Win32Overlay {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayBackend for Win32Overlay {
    fn displays(&mut self) -> Result<Vec<Rect>> {
        let mut displays: Vec<Rect> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(monitor_enum_proc),
                LPARAM(&mut displays as *mut Vec<Rect> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(TheaterError::platform("EnumDisplayMonitors failed"));
        }
        Ok(displays)
    }

    fn create_surface(&mut self, bounds: Rect) -> Result<WindowId> {
        self.register_class()?;

        let class_name = wide(CLASS_NAME);
        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_NOACTIVATE | WS_EX_TOOLWINDOW,
                PCWSTR(class_name.as_ptr()),
                PCWSTR(class_name.as_ptr()),
                WS_POPUP,
                bounds.left,
                bounds.top,
                bounds.width(),
                bounds.height(),
                None,
                None,
                Some(module_instance()),
                None,
            )?
        };

        SURFACES.with(|surfaces| {
            surfaces
                .borrow_mut()
                .insert(hwnd.0 as isize, Rc::clone(&self.fill))
        });

        if let Err(e) = unsafe { SetLayeredWindowAttributes(hwnd, COLORREF(0), 0, LWA_ALPHA) } {
            self.destroy_surface(WindowId::from(hwnd));
            return Err(e.into());
        }

        Ok(WindowId::from(hwnd))
    }

    fn destroy_surface(&mut self, id: WindowId) {
        SURFACES.with(|surfaces| surfaces.borrow_mut().remove(&id.0));
        unsafe {
            let _ = ShowWindow(id.hwnd(), SW_HIDE);
            if let Err(e) = DestroyWindow(id.hwnd()) {
                warn!("DestroyWindow({:?}) failed: {e}", id);
            }
        }
    }

    fn show_surface(&mut self, id: WindowId, visible: bool) {
        unsafe {
            let _ = ShowWindow(id.hwnd(), if visible { SW_SHOWNOACTIVATE } else { SW_HIDE });
        }
    }

    fn set_surface_alpha(&mut self, id: WindowId, alpha: u8) {
        unsafe {
            let _ = SetLayeredWindowAttributes(id.hwnd(), COLORREF(0), alpha, LWA_ALPHA);
        }
    }

    fn set_fill(&mut self, color: Rgb) {
        self.fill.set(COLORREF(color.to_bgr()));
    }

    fn redraw_surface(&mut self, id: WindowId) {
        unsafe {
            let _ = InvalidateRect(Some(id.hwnd()), None, false);
        }
    }

    fn release(&mut self) {
        if !self.class_registered {
            return;
        }

        let class_name = wide(CLASS_NAME);
        unsafe {
            if let Err(e) = UnregisterClassW(PCWSTR(class_name.as_ptr()), Some(module_instance())) {
                warn!("UnregisterClassW failed: {e}");
            }
        }
        self.class_registered = false;
    }
}
