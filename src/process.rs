// Window -> owning executable name ("chrome.exe").

/// Lowercase a process filename for watch-list comparison.
pub fn normalize_process_name(name: &str) -> String {
    name.to_lowercase()
}

/// Extract and normalize the filename component of an executable path.
pub fn executable_name(path: &str) -> Option<String> {
    let name = path.rsplit(['\\', '/']).next()?;
    if name.is_empty() {
        return None;
    }
    Some(normalize_process_name(name))
}

#[cfg(windows)]
pub use self::win32::process_name;

#[cfg(windows)]
mod win32 {
    use super::executable_name;
    use crate::platform::WindowId;
    use tracing::debug;
    use windows::core::PWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
        PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows::Win32::UI::WindowsAndMessaging::GetWindowThreadProcessId;

    struct HandleGuard(HANDLE);

    impl Drop for HandleGuard {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Resolve the lowercase executable filename owning `window`.
    /// `None` when the process exited or can't be opened.
    pub fn process_name(window: WindowId) -> Option<String> {
        let mut process_id = 0u32;
        unsafe {
            GetWindowThreadProcessId(window.hwnd(), Some(&mut process_id));
        }
        if process_id == 0 {
            return None;
        }

        let handle =
            match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id) } {
                Ok(handle) => HandleGuard(handle),
                Err(e) => {
                    debug!("OpenProcess({process_id}) failed: {e}");
                    return None;
                }
            };

        let mut buffer = vec![0u16; 32768];
        let mut len = buffer.len() as u32;
        let queried = unsafe {
            QueryFullProcessImageNameW(
                handle.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )
        };
        if let Err(e) = queried {
            debug!("QueryFullProcessImageNameW({process_id}) failed: {e}");
            return None;
        }

        buffer.truncate(len as usize);
        executable_name(&String::from_utf16_lossy(&buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_filename_from_windows_path() {
        assert_eq!(
            executable_name(r"C:\Program Files\Google\Chrome\Application\chrome.exe").as_deref(),
            Some("chrome.exe")
        );
    }

    #[test]
    fn lowercases_including_extension() {
        assert_eq!(
            executable_name(r"C:\Windows\NOTEPAD.EXE").as_deref(),
            Some("notepad.exe")
        );
        assert_eq!(normalize_process_name("Vlc.Exe"), "vlc.exe");
    }

    #[test]
    fn accepts_bare_names_and_forward_slashes() {
        assert_eq!(executable_name("mpv.exe").as_deref(), Some("mpv.exe"));
        assert_eq!(executable_name("D:/Games/Game.exe").as_deref(), Some("game.exe"));
    }

    #[test]
    fn empty_or_directory_paths_do_not_resolve() {
        assert_eq!(executable_name(""), None);
        assert_eq!(executable_name(r"C:\Windows\"), None);
    }
}
