use thiserror::Error;

#[derive(Debug, Error)]
pub enum TheaterError {
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Failed to install focus hook")]
    HookInstall,

    #[error("No displays found")]
    NoDisplays,

    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported settings version {0}")]
    UnsupportedVersion(i64),

    #[error("Watch list is full ({0} entries)")]
    WatchListFull(usize),

    #[error("Theater requires Windows")]
    Unsupported,
}

impl TheaterError {
    pub fn platform<S: ToString>(err: S) -> Self {
        TheaterError::Platform(err.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for TheaterError {
    fn from(value: windows::core::Error) -> Self {
        TheaterError::Platform(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TheaterError>;
