// Application shell: the hidden message window, the tray and the event queue
// feeding the controller.
//
// Everything runs on the UI thread. Focus events, fade ticks and settings
// changes all reach the controller through one `Dispatcher`.

use crate::desktop::{Win32Desktop, FADE_TIMER_ID};
use crate::dispatch::{Dispatcher, Handler};
use crate::error::Result;
use crate::focus::{FocusEvent, FocusWatcher};
use crate::overlay::win32::Win32Overlay;
use crate::overlay::OverlayManager;
use crate::settings::{ObserverId, Settings, SettingsStore};
use crate::theater::TheaterController;
use crate::tray;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    PostQuitMessage, RegisterClassW, TranslateMessage, UnregisterClassW, HWND_MESSAGE, MSG,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_COMMAND, WM_CONTEXTMENU, WM_RBUTTONUP, WM_TIMER, WNDCLASSW,
};

const CLASS_NAME: &str = "TheaterWindow\0";

type Controller = TheaterController<Win32Desktop, OverlayManager<Win32Overlay>>;

thread_local! {
    /// Message HWND -> the App it belongs to.
    static WINDOWS: RefCell<HashMap<isize, Weak<App>>> = RefCell::new(HashMap::new());
}

#[derive(Debug)]
enum Input {
    Focus(FocusEvent),
    Tick,
    Settings(Settings),
}

impl Handler<Input> for Controller {
    fn handle(&mut self, input: Input) {
        match input {
            Input::Focus(event) => self.on_focus_changed(event, Instant::now()),
            Input::Tick => self.on_fade_tick(Instant::now()),
            Input::Settings(settings) => {
                if let Err(e) = self.apply_settings(&settings) {
                    warn!("Failed to apply settings: {e}");
                }
                debug!("Controller enabled: {}", self.is_enabled());
            }
        }
    }
}

pub struct App {
    me: Weak<App>,
    message_window: HWND,
    inputs: Dispatcher<Input, Controller>,
    settings: RefCell<SettingsStore>,
    observer: Cell<Option<ObserverId>>,
    closed: Cell<bool>,
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn module_instance() -> HINSTANCE {
    unsafe { GetModuleHandleW(PCWSTR::null()).unwrap_or_default().into() }
}

fn create_message_window() -> Result<HWND> {
    let class_name = wide(CLASS_NAME);

    unsafe {
        let wc = WNDCLASSW {
            lpfnWndProc: Some(wnd_proc),
            hInstance: module_instance(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        if RegisterClassW(&wc) == 0 {
            return Err(windows::core::Error::from_win32().into());
        }

        let created = CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(class_name.as_ptr()),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            Some(HWND_MESSAGE),
            None,
            Some(module_instance()),
            None,
        );
        match created {
            Ok(hwnd) => Ok(hwnd),
            Err(e) => {
                let _ = UnregisterClassW(PCWSTR(class_name.as_ptr()), Some(module_instance()));
                Err(e.into())
            }
        }
    }
}

impl App {
    /// Build the message window and the controller around it. Nothing is
    /// shown and no hook is installed until `init`.
    pub fn create(settings: SettingsStore) -> Result<Rc<App>> {
        let message_window = create_message_window()?;

        let app = Rc::new_cyclic(|me: &Weak<App>| {
            let sink_target = me.clone();
            let watcher = FocusWatcher::new(Rc::new(move |event: FocusEvent| {
                if let Some(app) = sink_target.upgrade() {
                    app.dispatch(Input::Focus(event));
                }
            }));

            let desktop = Win32Desktop::new(message_window, watcher);
            let dimmer = OverlayManager::new(Win32Overlay::new());

            App {
                me: me.clone(),
                message_window,
                inputs: Dispatcher::new(TheaterController::new(desktop, dimmer)),
                settings: RefCell::new(settings),
                observer: Cell::new(None),
                closed: Cell::new(false),
            }
        });

        WINDOWS.with(|windows| {
            windows
                .borrow_mut()
                .insert(message_window.0 as isize, Rc::downgrade(&app))
        });
        Ok(app)
    }

    /// Create the overlays, install the hook, add the tray icon and push the
    /// loaded settings through.
    pub fn init(&self) -> Result<()> {
        self.inputs.handler().initialize()?;

        if !tray::add_tray_icon(self.message_window) {
            warn!("Failed to add tray icon");
        }

        let target = self.me.clone();
        let id = self.settings.borrow_mut().subscribe(move |settings| {
            if let Some(app) = target.upgrade() {
                app.dispatch(Input::Settings(settings.clone()));
            }
        });
        self.observer.set(Some(id));

        let store = self.settings.borrow();
        info!(
            "Theater started, watching {} processes from {}",
            store.process_names().len(),
            store.path().display()
        );
        store.notify_changes();
        Ok(())
    }

    fn dispatch(&self, input: Input) {
        self.inputs.dispatch(input);
    }

    fn on_command(&self, id: u32) {
        match id {
            tray::IDM_TOGGLE => self.update_settings(|store| {
                let enabled = !store.is_theater_enabled();
                store.enable_theater(enabled);
            }),
            tray::IDM_COLOR => {
                let current = self.settings.borrow().color();
                match tray::pick_color(self.message_window, current) {
                    Some(color) => self.update_settings(|store| store.set_color(color)),
                    None => debug!("Color dialog cancelled"),
                }
            }
            tray::IDM_EXIT => unsafe { PostQuitMessage(0) },
            other => match tray::opacity_for_command(other) {
                Some(alpha) => self.update_settings(|store| store.set_alpha(alpha)),
                None => debug!("Ignoring unknown command {other}"),
            },
        }
    }

    fn update_settings(&self, change: impl FnOnce(&mut SettingsStore)) {
        {
            let mut store = self.settings.borrow_mut();
            change(&mut store);
            if let Err(e) = store.save() {
                warn!("Failed to save settings: {e}");
            }
            debug!(
                "Settings now enabled={} alpha={}",
                store.is_theater_enabled(),
                store.alpha()
            );
        }
        self.settings.borrow().notify_changes();
    }

    /// Tear everything down. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }

        if let Some(id) = self.observer.take() {
            self.settings.borrow_mut().unsubscribe(id);
        }
        {
            let mut store = self.settings.borrow_mut();
            if store.is_dirty() {
                debug!("Saving pending settings changes");
            }
            if let Err(e) = store.save() {
                warn!("Failed to save settings: {e}");
            }
        }

        self.inputs.handler().shutdown();
        self.inputs.clear();
        tray::remove_tray_icon(self.message_window);

        WINDOWS.with(|windows| windows.borrow_mut().remove(&(self.message_window.0 as isize)));
        let class_name = wide(CLASS_NAME);
        unsafe {
            if let Err(e) = DestroyWindow(self.message_window) {
                warn!("DestroyWindow failed: {e}");
            }
            let _ = UnregisterClassW(PCWSTR(class_name.as_ptr()), Some(module_instance()));
        }
        info!("Theater stopped");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.close();
    }
}

/// Win32 message loop, until WM_QUIT.
pub fn run_message_loop() {
    unsafe {
        let mut msg = MSG::default();
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

unsafe extern "system" fn wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let app = WINDOWS.with(|windows| {
        windows
            .borrow()
            .get(&(hwnd.0 as isize))
            .and_then(Weak::upgrade)
    });
    let Some(app) = app else {
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    };

    match msg {
        WM_TIMER if wparam.0 == FADE_TIMER_ID => {
            app.dispatch(Input::Tick);
            LRESULT(0)
        }

        tray::WM_TRAY_ICON => {
            let event = (lparam.0 & 0xFFFF) as u32;
            if event == WM_RBUTTONUP || event == WM_CONTEXTMENU {
                let snapshot = app.settings.borrow().snapshot();
                tray::show_context_menu(hwnd, &snapshot);
            }
            LRESULT(0)
        }

        WM_COMMAND => {
            app.on_command((wparam.0 & 0xFFFF) as u32);
            LRESULT(0)
        }

        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
