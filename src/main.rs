// Prevents console window in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
// Only the platform-neutral core is reachable off Windows
#![cfg_attr(not(windows), allow(dead_code))]

#[cfg(windows)]
mod app;
#[cfg(windows)]
mod desktop;
mod dispatch;
mod error;
mod focus;
mod overlay;
mod platform;
mod process;
mod settings;
mod theater;
mod tray;

use error::Result;
use std::fs::{self, File};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Log filter directive, e.g. `THEATER_LOG=theater=debug`.
const LOG_ENV: &str = "THEATER_LOG";

/// Debug builds log to the console. Release builds have none, so they write
/// to `theater.log` beside the settings file.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if cfg!(debug_assertions) {
        subscriber.init();
        return;
    }

    match open_log_file() {
        Ok(file) => subscriber.with_ansi(false).with_writer(file).init(),
        Err(_) => subscriber.init(),
    }
}

fn open_log_file() -> std::io::Result<File> {
    let path = settings::log_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

fn main() -> ExitCode {
    init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Theater failed: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(windows)]
fn run() -> Result<()> {
    use tracing::info;

    // Single-instance check; the guard is held until the loop exits
    let Some(_instance) = SingleInstance::acquire(SINGLE_INSTANCE_MUTEX)? else {
        info!("Theater is already running");
        return Ok(());
    };

    let store = settings::SettingsStore::open(settings::default_path());
    let app = app::App::create(store)?;
    if let Err(e) = app.init() {
        app.close();
        return Err(e);
    }

    app::run_message_loop();

    app.close();
    Ok(())
}

#[cfg(not(windows))]
fn run() -> Result<()> {
    Err(error::TheaterError::Unsupported)
}

#[cfg(windows)]
const SINGLE_INSTANCE_MUTEX: &str = "TheaterMutex";

#[cfg(windows)]
use self::instance::SingleInstance;

#[cfg(windows)]
mod instance {
    use crate::error::Result;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexW;

    /// Owns the named mutex. Dropping it lets the next instance start.
    pub struct SingleInstance(HANDLE);

    impl SingleInstance {
        /// `None` if another process already holds `name`.
        pub fn acquire(name: &str) -> Result<Option<Self>> {
            let name: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

            unsafe {
                let handle = CreateMutexW(None, true, PCWSTR(name.as_ptr()))?;
                if GetLastError() == ERROR_ALREADY_EXISTS {
                    let _ = CloseHandle(handle);
                    return Ok(None);
                }
                Ok(Some(Self(handle)))
            }
        }
    }

    impl Drop for SingleInstance {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

}
