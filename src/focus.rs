// Foreground-change notifications.
//
// On Windows this is a WinEvent hook on EVENT_SYSTEM_FOREGROUND, installed
// out-of-context so callbacks arrive on the thread that installed it, in the
// middle of its message loop. The callback has no user pointer, so the hook
// handle is looked up in a thread-local registry to find the sink.

use crate::platform::WindowId;

/// WinEvent object/child ids that mean "the window itself".
pub const OBJID_WINDOW: i32 = 0;
pub const CHILDID_SELF: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusEvent {
    pub window: WindowId,
    pub object_id: i32,
    pub child_id: i32,
}

impl FocusEvent {
    #[cfg(test)]
    pub fn whole_window(window: WindowId) -> Self {
        Self {
            window,
            object_id: OBJID_WINDOW,
            child_id: CHILDID_SELF,
        }
    }

    /// Only non-null, whole-window events can trigger theater mode; focus
    /// moving between sub-objects inside a window is ignored.
    pub fn is_top_level(&self) -> bool {
        !self.window.is_null() && self.object_id == OBJID_WINDOW && self.child_id == CHILDID_SELF
    }
}

#[cfg(windows)]
pub use self::win32::FocusWatcher;

#[cfg(windows)]
mod win32 {
    use super::FocusEvent;
    use crate::error::{Result, TheaterError};
    use crate::platform::WindowId;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};

    const EVENT_SYSTEM_FOREGROUND: u32 = 0x0003;
    const WINEVENT_OUTOFCONTEXT: u32 = 0x0000;
    const WINEVENT_SKIPOWNPROCESS: u32 = 0x0002;

    pub type FocusSink = Rc<dyn Fn(FocusEvent)>;

    thread_local! {
        static HOOKS: RefCell<HashMap<isize, FocusSink>> = RefCell::new(HashMap::new());
    }

    unsafe extern "system" fn win_event_proc(
        hook: HWINEVENTHOOK,
        event: u32,
        hwnd: HWND,
        id_object: i32,
        id_child: i32,
        _id_event_thread: u32,
        _event_time: u32,
    ) {
        if event != EVENT_SYSTEM_FOREGROUND {
            return;
        }

        // Clone the sink out so the registry isn't borrowed while it runs.
        let sink = HOOKS.with(|hooks| hooks.borrow().get(&(hook.0 as isize)).cloned());
        if let Some(sink) = sink {
            sink(FocusEvent {
                window: WindowId::from(hwnd),
                object_id: id_object,
                child_id: id_child,
            });
        }
    }

    /// Owns the foreground hook. Dropping it unhooks.
    pub struct FocusWatcher {
        hook: Option<HWINEVENTHOOK>,
        sink: FocusSink,
    }

    impl FocusWatcher {
        pub fn new(sink: FocusSink) -> Self {
            Self { hook: None, sink }
        }

        pub fn register(&mut self) -> Result<()> {
            if self.hook.is_some() {
                return Ok(());
            }

            let hook = unsafe {
                SetWinEventHook(
                    EVENT_SYSTEM_FOREGROUND,
                    EVENT_SYSTEM_FOREGROUND,
                    None,
                    Some(win_event_proc),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
                )
            };
            if hook.is_invalid() {
                return Err(TheaterError::HookInstall);
            }

            HOOKS.with(|hooks| {
                hooks
                    .borrow_mut()
                    .insert(hook.0 as isize, Rc::clone(&self.sink))
            });
            self.hook = Some(hook);
            info!("Foreground hook installed");
            Ok(())
        }

        pub fn unregister(&mut self) {
            let Some(hook) = self.hook.take() else {
                return;
            };

            HOOKS.with(|hooks| hooks.borrow_mut().remove(&(hook.0 as isize)));
            unsafe {
                if !UnhookWinEvent(hook).as_bool() {
                    warn!("Failed to unhook foreground hook {:?}", hook);
                }
            }
            debug!("Foreground hook removed");
        }
    }

    impl Drop for FocusWatcher {
        fn drop(&mut self) {
            self.unregister();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_window_events_are_top_level() {
        assert!(FocusEvent::whole_window(WindowId(0x1234)).is_top_level());
    }

    #[test]
    fn null_window_is_not_top_level() {
        assert!(!FocusEvent::whole_window(WindowId::NULL).is_top_level());
    }

    #[test]
    fn sub_object_focus_is_not_top_level() {
        let client = FocusEvent {
            window: WindowId(0x1234),
            object_id: -4, // OBJID_CLIENT
            child_id: CHILDID_SELF,
        };
        let child = FocusEvent {
            window: WindowId(0x1234),
            object_id: OBJID_WINDOW,
            child_id: 3,
        };
        assert!(!client.is_top_level());
        assert!(!child.is_top_level());
    }
}
