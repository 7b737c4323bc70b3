// Theater mode state machine.
//
//   Idle ──watched focus──▶ FadingIn ──500ms──▶ Steady
//     ▲                        │                  │
//     └─────other focus────────┴──────────────────┘
//
// While active, every watched focus event re-pushes the other top-level
// windows behind the overlays; only the Idle -> FadingIn edge starts a fade.

use crate::error::Result;
use crate::focus::FocusEvent;
use crate::platform::{Desktop, Dimmer, WindowId};
use crate::process::normalize_process_name;
use crate::settings::Settings;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const FADE_DURATION: Duration = Duration::from_millis(500);

/// ~60 Hz
pub const FADE_TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheaterState {
    Idle,
    FadingIn,
    Steady,
}

#[derive(Debug, Default)]
struct TheaterSession {
    active: bool,
    /// Set only while a fade-in is running
    fade_start: Option<Instant>,
    timer_running: bool,
}

/// Opacity `elapsed` into the fade, recomputed from the absolute start so
/// late or dropped ticks never accumulate error.
pub fn fade_alpha(target: u8, elapsed: Duration) -> u8 {
    if elapsed >= FADE_DURATION {
        return target;
    }
    let progress = elapsed.as_secs_f64() / FADE_DURATION.as_secs_f64();
    (f64::from(target) * progress.min(1.0)).round() as u8
}

pub struct TheaterController<D, M> {
    desktop: D,
    dimmer: M,
    session: TheaterSession,
    watched: HashSet<String>,
    target_alpha: u8,
    enabled: bool,
}

impl<D: Desktop, M: Dimmer> TheaterController<D, M> {
    pub fn new(desktop: D, dimmer: M) -> Self {
        let defaults = Settings::default();
        Self {
            desktop,
            dimmer,
            session: TheaterSession::default(),
            watched: HashSet::new(),
            target_alpha: defaults.alpha,
            enabled: false,
        }
    }

    /// Create the overlays and start listening for focus changes.
    /// Failure here means the app can't run.
    pub fn initialize(&mut self) -> Result<()> {
        self.dimmer.initialize()?;
        self.desktop.subscribe_focus()?;
        self.enabled = true;
        Ok(())
    }

    pub fn state(&self) -> TheaterState {
        match (self.session.active, self.session.fade_start) {
            (false, _) => TheaterState::Idle,
            (true, Some(_)) => TheaterState::FadingIn,
            (true, None) => TheaterState::Steady,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pull in a fresh settings snapshot.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        self.watched = settings
            .processes
            .iter()
            .map(|name| normalize_process_name(name))
            .collect();
        self.target_alpha = settings.alpha;

        self.dimmer.set_color(settings.color);
        // A running fade picks up the new target on its next tick.
        if self.state() == TheaterState::Steady {
            self.dimmer.set_alpha(self.target_alpha);
        }

        debug!(
            "Settings applied: {} watched, alpha={}, enabled={}",
            self.watched.len(),
            self.target_alpha,
            settings.enabled
        );
        self.set_enabled(settings.enabled)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.desktop.subscribe_focus()?;
            if !self.enabled {
                info!("Theater mode enabled");
            }
        } else {
            self.desktop.unsubscribe_focus();
            self.stop();
            if self.enabled {
                info!("Theater mode disabled");
            }
        }
        self.enabled = enabled;
        Ok(())
    }

    pub fn on_focus_changed(&mut self, event: FocusEvent, now: Instant) {
        if !self.enabled || !event.is_top_level() {
            return;
        }

        let process = self
            .desktop
            .process_name(event.window)
            .map(|name| normalize_process_name(&name));
        match process {
            Some(name) if self.watched.contains(&name) => {
                debug!("Watched process {name} took the foreground");
                self.start(event.window, now);
            }
            Some(name) => {
                debug!("Unwatched process {name} took the foreground");
                self.stop();
            }
            None => {
                debug!("Foreground window {:?} has no resolvable process", event.window);
                self.stop();
            }
        }
    }

    pub fn on_fade_tick(&mut self, now: Instant) {
        // A tick queued before the timer was killed lands here with no fade.
        let Some(fade_start) = self.session.fade_start else {
            return;
        };

        let elapsed = now.saturating_duration_since(fade_start);
        if elapsed >= FADE_DURATION {
            self.cancel_fade();
            self.dimmer.set_alpha(self.target_alpha);
            debug!("Fade complete at alpha {}", self.target_alpha);
        } else {
            self.dimmer.set_alpha(fade_alpha(self.target_alpha, elapsed));
        }
    }

    /// Leave theater mode and release the platform resources. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop();
        self.desktop.unsubscribe_focus();
        self.enabled = false;
        self.dimmer.teardown();
    }

    fn start(&mut self, focused: WindowId, now: Instant) {
        if !self.session.active {
            self.session.active = true;
            self.dimmer.set_alpha(0);
            self.dimmer.show(true);

            match self.desktop.start_fade_timer(FADE_TICK) {
                Ok(()) => {
                    self.session.timer_running = true;
                    self.session.fade_start = Some(now);
                    info!("Theater mode on, fading in");
                }
                Err(e) => {
                    warn!("Fade timer unavailable ({e}), dimming immediately");
                    self.dimmer.set_alpha(self.target_alpha);
                }
            }
        }

        self.push_others_to_back(focused);
    }

    fn stop(&mut self) {
        if !self.session.active {
            return;
        }

        self.cancel_fade();
        self.dimmer.show(false);
        self.session.active = false;
        info!("Theater mode off");
    }

    fn cancel_fade(&mut self) {
        if self.session.timer_running {
            self.desktop.stop_fade_timer();
            self.session.timer_running = false;
        }
        self.session.fade_start = None;
    }

    fn push_others_to_back(&mut self, focused: WindowId) {
        let windows = match self.desktop.visible_top_level_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Window enumeration failed: {e}");
                return;
            }
        };

        let others: Vec<WindowId> = windows
            .into_iter()
            .filter(|&window| window != focused && !self.dimmer.is_dimmer_window(window))
            .collect();
        if others.is_empty() {
            return;
        }

        match self.desktop.send_to_back(&others) {
            Ok(()) => debug!("Pushed {} windows behind the dimmer", others.len()),
            Err(e) => warn!("Z-order push failed: {e}"),
        }
    }

    #[cfg(test)]
    fn desktop(&self) -> &D {
        &self.desktop
    }

    #[cfg(test)]
    fn dimmer(&self) -> &M {
        &self.dimmer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TheaterError;
    use crate::settings::Rgb;
    use std::collections::HashMap;

    const CHROME: WindowId = WindowId(0x100);
    const NOTEPAD: WindowId = WindowId(0x200);
    const EXPLORER: WindowId = WindowId(0x300);
    const VLC: WindowId = WindowId(0x400);
    const ORPHAN: WindowId = WindowId(0x500);
    const OVERLAY_A: WindowId = WindowId(0x9001);
    const OVERLAY_B: WindowId = WindowId(0x9002);

    #[derive(Default)]
    struct FakeDesktop {
        processes: HashMap<WindowId, String>,
        windows: Vec<WindowId>,
        batches: Vec<Vec<WindowId>>,
        timer_starts: usize,
        timer_stops: usize,
        timer_running: bool,
        fail_timer: bool,
        fail_enumeration: bool,
        subscribed: bool,
    }

    impl Desktop for FakeDesktop {
        fn process_name(&self, window: WindowId) -> Option<String> {
            self.processes.get(&window).cloned()
        }

        fn visible_top_level_windows(&self) -> Result<Vec<WindowId>> {
            if self.fail_enumeration {
                return Err(TheaterError::platform("EnumWindows failed"));
            }
            Ok(self.windows.clone())
        }

        fn send_to_back(&mut self, windows: &[WindowId]) -> Result<()> {
            self.batches.push(windows.to_vec());
            Ok(())
        }

        fn start_fade_timer(&mut self, interval: Duration) -> Result<()> {
            assert_eq!(interval, FADE_TICK);
            if self.fail_timer {
                return Err(TheaterError::platform("SetTimer failed"));
            }
            self.timer_starts += 1;
            self.timer_running = true;
            Ok(())
        }

        fn stop_fade_timer(&mut self) {
            self.timer_stops += 1;
            self.timer_running = false;
        }

        fn subscribe_focus(&mut self) -> Result<()> {
            self.subscribed = true;
            Ok(())
        }

        fn unsubscribe_focus(&mut self) {
            self.subscribed = false;
        }
    }

    #[derive(Default)]
    struct FakeDimmer {
        overlays: Vec<WindowId>,
        visible: bool,
        alpha: u8,
        alphas: Vec<u8>,
        color: Rgb,
        show_calls: usize,
        initialized: bool,
    }

    impl Dimmer for FakeDimmer {
        fn initialize(&mut self) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn teardown(&mut self) {
            self.initialized = false;
            self.visible = false;
        }

        fn show(&mut self, visible: bool) {
            self.show_calls += 1;
            self.visible = visible;
        }

        fn set_alpha(&mut self, alpha: u8) {
            self.alpha = alpha;
            self.alphas.push(alpha);
        }

        fn set_color(&mut self, color: Rgb) {
            self.color = color;
        }

        fn is_dimmer_window(&self, window: WindowId) -> bool {
            self.overlays.contains(&window)
        }
    }

    fn settings(processes: &[&str]) -> Settings {
        Settings {
            processes: processes.iter().map(|p| p.to_string()).collect(),
            ..Settings::default()
        }
    }

    fn controller(watch: &[&str]) -> TheaterController<FakeDesktop, FakeDimmer> {
        let desktop = FakeDesktop {
            processes: HashMap::from([
                (CHROME, "chrome.exe".to_string()),
                (NOTEPAD, "notepad.exe".to_string()),
                (EXPLORER, "explorer.exe".to_string()),
                (VLC, "vlc.exe".to_string()),
            ]),
            windows: vec![CHROME, OVERLAY_A, NOTEPAD, EXPLORER, OVERLAY_B, VLC],
            ..FakeDesktop::default()
        };
        let dimmer = FakeDimmer {
            overlays: vec![OVERLAY_A, OVERLAY_B],
            ..FakeDimmer::default()
        };

        let mut controller = TheaterController::new(desktop, dimmer);
        controller.initialize().unwrap();
        controller.apply_settings(&settings(watch)).unwrap();
        controller
    }

    fn focus(window: WindowId) -> FocusEvent {
        FocusEvent::whole_window(window)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn watched_focus_fades_in_then_unwatched_focus_hides() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();

        c.on_focus_changed(focus(CHROME), t0);
        assert_eq!(c.state(), TheaterState::FadingIn);
        assert!(c.dimmer().visible);
        assert_eq!(c.dimmer().alpha, 0);
        assert!(c.desktop().timer_running);
        assert_eq!(c.desktop().batches, vec![vec![NOTEPAD, EXPLORER, VLC]]);

        c.on_fade_tick(t0 + ms(250));
        assert_eq!(c.dimmer().alpha, 100);
        assert_eq!(c.state(), TheaterState::FadingIn);

        c.on_fade_tick(t0 + ms(500));
        assert_eq!(c.dimmer().alpha, 200);
        assert_eq!(c.state(), TheaterState::Steady);
        assert!(!c.desktop().timer_running);

        c.on_focus_changed(focus(NOTEPAD), t0 + ms(900));
        assert_eq!(c.state(), TheaterState::Idle);
        assert!(!c.dimmer().visible);
        assert_eq!(c.dimmer().alpha, 200, "hiding must not ramp down");
        assert_eq!(c.desktop().batches.len(), 1);
    }

    #[test]
    fn fade_is_linear_rounded_and_monotonic() {
        let mut previous = 0;
        for t in 0..500 {
            let alpha = fade_alpha(200, ms(t));
            assert_eq!(alpha, (200.0 * t as f64 / 500.0).round() as u8);
            assert!(alpha >= previous);
            previous = alpha;
        }
        assert_eq!(fade_alpha(200, ms(500)), 200);
        assert_eq!(fade_alpha(200, ms(10_000)), 200);
        assert_eq!(fade_alpha(255, ms(499)), 254);
        assert_eq!(fade_alpha(0, ms(250)), 0);
    }

    #[test]
    fn late_tick_pins_exact_target() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);

        c.on_fade_tick(t0 + ms(733));
        assert_eq!(c.dimmer().alpha, 200);
        assert_eq!(c.state(), TheaterState::Steady);
        assert_eq!(c.desktop().timer_stops, 1);
    }

    #[test]
    fn refocusing_watched_process_only_repushes() {
        let mut c = controller(&["chrome.exe", "vlc.exe"]);
        let t0 = Instant::now();

        c.on_focus_changed(focus(CHROME), t0);
        c.on_fade_tick(t0 + ms(100));
        c.on_focus_changed(focus(CHROME), t0 + ms(120));
        c.on_focus_changed(focus(VLC), t0 + ms(140));

        assert_eq!(c.desktop().timer_starts, 1);
        assert_eq!(c.dimmer().show_calls, 1);
        assert_eq!(c.state(), TheaterState::FadingIn);
        assert_eq!(c.desktop().batches.len(), 3);
        assert_eq!(c.desktop().batches[2], vec![CHROME, NOTEPAD, EXPLORER]);
        // the zero reset happened once, at the start
        assert_eq!(c.dimmer().alphas.iter().filter(|&&a| a == 0).count(), 1);
    }

    #[test]
    fn fade_restarts_only_after_returning_to_idle() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();

        c.on_focus_changed(focus(CHROME), t0);
        c.on_focus_changed(focus(NOTEPAD), t0 + ms(50));
        c.on_focus_changed(focus(CHROME), t0 + ms(60));

        assert_eq!(c.desktop().timer_starts, 2);
        assert_eq!(c.desktop().timer_stops, 1);
        c.on_fade_tick(t0 + ms(310));
        assert_eq!(c.dimmer().alpha, 100, "fade measured from the second start");
    }

    #[test]
    fn matching_ignores_case() {
        let mut c = controller(&["notepad.exe"]);
        c.desktop.processes.insert(NOTEPAD, "NOTEPAD.EXE".into());
        c.on_focus_changed(focus(NOTEPAD), Instant::now());
        assert_eq!(c.state(), TheaterState::FadingIn);

        let mut c = controller(&["Chrome.EXE"]);
        c.on_focus_changed(focus(CHROME), Instant::now());
        assert_eq!(c.state(), TheaterState::FadingIn);
    }

    #[test]
    fn empty_watch_list_never_dims() {
        let mut c = controller(&[]);
        let t0 = Instant::now();

        for (i, window) in [CHROME, NOTEPAD, EXPLORER, VLC, ORPHAN].into_iter().enumerate() {
            c.on_focus_changed(focus(window), t0 + ms(i as u64 * 10));
        }

        assert_eq!(c.state(), TheaterState::Idle);
        assert_eq!(c.dimmer().show_calls, 0);
        assert!(c.desktop().batches.is_empty());
    }

    #[test]
    fn stop_while_idle_has_no_side_effects() {
        let mut c = controller(&["chrome.exe"]);
        let alphas_before = c.dimmer().alphas.len();

        c.on_focus_changed(focus(NOTEPAD), Instant::now());
        c.on_focus_changed(focus(ORPHAN), Instant::now());

        assert_eq!(c.dimmer().show_calls, 0);
        assert_eq!(c.dimmer().alphas.len(), alphas_before);
        assert_eq!(c.desktop().timer_starts, 0);
        assert_eq!(c.desktop().timer_stops, 0);
    }

    #[test]
    fn unresolvable_process_exits_theater_mode() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);

        c.on_focus_changed(focus(ORPHAN), t0 + ms(40));
        assert_eq!(c.state(), TheaterState::Idle);
        assert!(!c.dimmer().visible);
        assert!(!c.desktop().timer_running);
    }

    #[test]
    fn push_excludes_focused_window_and_overlays() {
        let mut c = controller(&["vlc.exe"]);
        c.on_focus_changed(focus(VLC), Instant::now());

        let batch = &c.desktop().batches[0];
        assert!(!batch.contains(&VLC));
        assert!(!batch.contains(&OVERLAY_A));
        assert!(!batch.contains(&OVERLAY_B));
        assert_eq!(batch, &vec![CHROME, NOTEPAD, EXPLORER]);
    }

    #[test]
    fn sub_object_and_null_events_are_ignored() {
        let mut c = controller(&["chrome.exe"]);
        let sub_object = FocusEvent {
            window: CHROME,
            object_id: -4,
            child_id: 0,
        };

        c.on_focus_changed(sub_object, Instant::now());
        c.on_focus_changed(focus(WindowId::NULL), Instant::now());
        assert_eq!(c.state(), TheaterState::Idle);

        // and a sub-object event doesn't end an active session either
        c.on_focus_changed(focus(CHROME), Instant::now());
        c.desktop.processes.insert(CHROME, "other.exe".into());
        c.on_focus_changed(sub_object, Instant::now());
        assert_eq!(c.state(), TheaterState::FadingIn);
    }

    #[test]
    fn tick_after_stop_is_a_no_op() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);
        c.on_focus_changed(focus(NOTEPAD), t0 + ms(30));
        let alphas = c.dimmer().alphas.clone();

        c.on_fade_tick(t0 + ms(46));
        c.on_fade_tick(t0 + ms(600));

        assert_eq!(c.dimmer().alphas, alphas);
        assert_eq!(c.state(), TheaterState::Idle);
        assert_eq!(c.desktop().timer_stops, 1);
    }

    #[test]
    fn disabling_exits_and_unsubscribes() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);

        let mut off = settings(&["chrome.exe"]);
        off.enabled = false;
        c.apply_settings(&off).unwrap();

        assert_eq!(c.state(), TheaterState::Idle);
        assert!(!c.dimmer().visible);
        assert!(!c.desktop().subscribed);
        assert!(!c.desktop().timer_running);

        // a straggler event delivered after unhooking is ignored
        c.on_focus_changed(focus(CHROME), t0 + ms(10));
        assert_eq!(c.state(), TheaterState::Idle);

        c.apply_settings(&settings(&["chrome.exe"])).unwrap();
        assert!(c.desktop().subscribed);
        assert_eq!(c.state(), TheaterState::Idle);
        c.on_focus_changed(focus(CHROME), t0 + ms(20));
        assert_eq!(c.state(), TheaterState::FadingIn);
    }

    #[test]
    fn new_target_applies_immediately_when_steady() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);
        c.on_fade_tick(t0 + ms(520));

        let mut retuned = settings(&["chrome.exe"]);
        retuned.alpha = 77;
        retuned.color = Rgb::new(20, 0, 40);
        c.apply_settings(&retuned).unwrap();

        assert_eq!(c.dimmer().alpha, 77);
        assert_eq!(c.dimmer().color, Rgb::new(20, 0, 40));
        assert_eq!(c.state(), TheaterState::Steady);
    }

    #[test]
    fn new_target_during_fade_is_picked_up_by_next_tick() {
        let mut c = controller(&["chrome.exe"]);
        let t0 = Instant::now();
        c.on_focus_changed(focus(CHROME), t0);

        let mut full = settings(&["chrome.exe"]);
        full.alpha = 255;
        c.apply_settings(&full).unwrap();
        assert_eq!(c.dimmer().alpha, 0);

        c.on_fade_tick(t0 + ms(100));
        assert_eq!(c.dimmer().alpha, 51);
    }

    #[test]
    fn timer_failure_dims_without_fade() {
        let mut c = controller(&["chrome.exe"]);
        c.desktop.fail_timer = true;

        c.on_focus_changed(focus(CHROME), Instant::now());
        assert_eq!(c.state(), TheaterState::Steady);
        assert!(c.dimmer().visible);
        assert_eq!(c.dimmer().alpha, 200);
        assert_eq!(c.desktop().batches.len(), 1);
    }

    #[test]
    fn enumeration_failure_still_dims() {
        let mut c = controller(&["chrome.exe"]);
        c.desktop.fail_enumeration = true;

        c.on_focus_changed(focus(CHROME), Instant::now());
        assert_eq!(c.state(), TheaterState::FadingIn);
        assert!(c.desktop().batches.is_empty());
    }

    #[test]
    fn shutdown_tears_everything_down_once() {
        let mut c = controller(&["chrome.exe"]);
        c.on_focus_changed(focus(CHROME), Instant::now());

        c.shutdown();
        c.shutdown();

        assert_eq!(c.state(), TheaterState::Idle);
        assert!(!c.dimmer().initialized);
        assert!(!c.desktop().subscribed);
        assert_eq!(c.desktop().timer_stops, 1);
        assert!(!c.is_enabled());
    }
}
