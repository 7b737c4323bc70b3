// Persisted theater settings and the change-notification observer list.
//
// Stored as pretty JSON under the local data directory:
//   %LOCALAPPDATA%\Theater\settings.json

use crate::error::{Result, TheaterError};
use crate::process::normalize_process_name;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SETTINGS_VERSION: i64 = 1;

/// Upper bound on the watch list; anything past it is dropped on load.
pub const MAX_PROCESS_NAMES: usize = 256;

/// An 8-bit RGB fill color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Win32 COLORREF layout: 0x00BBGGRR
    pub const fn to_bgr(self) -> u32 {
        self.r as u32 | (self.g as u32) << 8 | (self.b as u32) << 16
    }

    pub const fn from_bgr(value: u32) -> Self {
        Self {
            r: (value & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: ((value >> 16) & 0xFF) as u8,
        }
    }
}

/// Point-in-time view of the settings handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
    /// Target overlay opacity
    pub alpha: u8,
    pub color: Rgb,
    pub processes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 200,
            color: Rgb::BLACK,
            processes: Vec::new(),
        }
    }
}

/// On-disk layout written by `save`.
#[derive(Debug, Serialize)]
struct SettingsFile<'a> {
    version: i64,
    enabled: bool,
    alpha: u8,
    color: [u8; 3],
    processes: &'a [String],
}

impl<'a> SettingsFile<'a> {
    fn from_settings(settings: &'a Settings) -> Self {
        let Rgb { r, g, b } = settings.color;
        Self {
            version: SETTINGS_VERSION,
            enabled: settings.enabled,
            alpha: settings.alpha,
            color: [r, g, b],
            processes: &settings.processes,
        }
    }
}

fn clamp_byte(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

/// Read a settings document field by field. A field that is missing or has
/// the wrong type keeps its default; the rest of the document still applies.
fn apply_document(doc: &Value, settings: &mut Settings) -> Result<()> {
    let version = doc.get("version").and_then(Value::as_i64).unwrap_or(0);
    if version != SETTINGS_VERSION {
        return Err(TheaterError::UnsupportedVersion(version));
    }

    match doc.get("enabled") {
        Some(Value::Bool(enabled)) => settings.enabled = *enabled,
        Some(other) => warn!("Ignoring non-boolean \"enabled\": {other}"),
        None => {}
    }

    if let Some(value) = doc.get("alpha") {
        match value.as_i64() {
            Some(alpha) => settings.alpha = clamp_byte(alpha),
            None => warn!("Ignoring non-integer \"alpha\": {value}"),
        }
    }

    if let Some(Value::Array(channels)) = doc.get("color") {
        if let [r, g, b] = channels.as_slice() {
            let channel = |value: &Value| value.as_i64().map_or(0, clamp_byte);
            settings.color = Rgb::new(channel(r), channel(g), channel(b));
        } else {
            warn!("Ignoring \"color\" with {} entries", channels.len());
        }
    }

    if let Some(Value::Array(names)) = doc.get("processes") {
        settings.processes = watch_list(names);
    }
    Ok(())
}

/// String entries only, first spelling wins among case-insensitive
/// duplicates, capped at `MAX_PROCESS_NAMES`.
fn watch_list(names: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut processes = Vec::new();
    let mut dropped = 0usize;

    for name in names.iter().filter_map(Value::as_str) {
        if !seen.insert(normalize_process_name(name)) {
            debug!("Dropping duplicate watch-list entry {name}");
            continue;
        }
        if processes.len() >= MAX_PROCESS_NAMES {
            dropped += 1;
            continue;
        }
        processes.push(name.to_owned());
    }

    if dropped > 0 {
        warn!(
            "Watch list has {} entries, keeping the first {}",
            MAX_PROCESS_NAMES + dropped,
            MAX_PROCESS_NAMES
        );
    }
    processes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn Fn(&Settings)>;

/// Owns the settings, their file and the observers that react to changes.
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    dirty: bool,
    observers: BTreeMap<ObserverId, Observer>,
    next_observer: u64,
}

pub fn default_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("Theater").join("settings.json")
}

/// Log file for builds without a console, next to the settings file.
pub fn log_path() -> PathBuf {
    default_path().with_file_name("theater.log")
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: Settings::default(),
            dirty: false,
            observers: BTreeMap::new(),
            next_observer: 0,
        }
    }

    /// Create a store and load it, falling back to defaults on any failure.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        match store.load() {
            Ok(true) => info!("Loaded settings from {}", store.path.display()),
            Ok(false) => info!("No settings at {}, using defaults", store.path.display()),
            Err(e) => warn!("Failed to load {}: {e}, using defaults", store.path.display()),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `Ok(false)` when the file doesn't exist yet.
    pub fn load(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let data = fs::read_to_string(&self.path)?;
        let doc: Value = serde_json::from_str(&data)?;

        let mut settings = Settings::default();
        apply_document(&doc, &mut settings)?;
        self.settings = settings;
        self.dirty = false;
        Ok(true)
    }

    /// Writes only when something changed or the file is missing.
    pub fn save(&mut self) -> Result<()> {
        if self.path.exists() && !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&SettingsFile::from_settings(&self.settings))?;
        fs::write(&self.path, data)?;
        self.dirty = false;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_theater_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn enable_theater(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        self.dirty = true;
    }

    pub fn process_names(&self) -> &[String] {
        &self.settings.processes
    }

    /// Add a watched process. Returns `Ok(false)` if it is already listed.
    #[allow(dead_code)]
    pub fn add_process_name(&mut self, name: &str) -> Result<bool> {
        let normalized = normalize_process_name(name);
        if self
            .settings
            .processes
            .iter()
            .any(|existing| normalize_process_name(existing) == normalized)
        {
            return Ok(false);
        }
        if self.settings.processes.len() >= MAX_PROCESS_NAMES {
            return Err(TheaterError::WatchListFull(MAX_PROCESS_NAMES));
        }

        self.settings.processes.push(name.to_owned());
        self.dirty = true;
        Ok(true)
    }

    /// Remove a watched process, ignoring case. Returns whether it was listed.
    #[allow(dead_code)]
    pub fn remove_process_name(&mut self, name: &str) -> bool {
        let normalized = normalize_process_name(name);
        let Some(index) = self
            .settings
            .processes
            .iter()
            .position(|existing| normalize_process_name(existing) == normalized)
        else {
            return false;
        };

        self.settings.processes.remove(index);
        self.dirty = true;
        true
    }

    pub fn alpha(&self) -> u8 {
        self.settings.alpha
    }

    pub fn set_alpha(&mut self, alpha: u8) {
        self.settings.alpha = alpha;
        self.dirty = true;
    }

    pub fn color(&self) -> Rgb {
        self.settings.color
    }

    pub fn set_color(&mut self, color: Rgb) {
        self.settings.color = color;
        self.dirty = true;
    }

    pub fn snapshot(&self) -> Settings {
        self.settings.clone()
    }

    pub fn subscribe(&mut self, observer: impl Fn(&Settings) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.insert(id, Box::new(observer));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.remove(&id);
    }

    /// Invoke every observer, in subscription order, on the calling thread.
    pub fn notify_changes(&self) {
        for observer in self.observers.values() {
            observer(&self.settings);
        }
    }
}
