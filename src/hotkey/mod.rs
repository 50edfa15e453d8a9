//! Configurable modifier-key monitor used to pause audio during dictation.
//!
//! Grounded on the teacher's `HotkeyListener`: a dedicated `std::thread`
//! running `rdev::listen`, debounced with an `AtomicBool` press latch,
//! posting edges through a channel rather than calling back into async
//! code directly from the OS event callback (the callback must stay fast
//! and non-blocking). Generalized here from the teacher's PTT key/mouse-
//! button matching to the fixed modifier set from the original `hotkey.py`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rdev::{listen, Event, EventType, Key};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// One of the five modifier keys the service can pause on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Fn,
    Ctrl,
    Option,
    Command,
    Shift,
}

impl Modifier {
    /// Parse a hotkey identifier. Unknown values fall back to `Fn` with a
    /// warning, matching `hotkey.py`'s `MODIFIER_FLAGS.get(..., "fn")`.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "fn" => Modifier::Fn,
            "ctrl" => Modifier::Ctrl,
            "option" => Modifier::Option,
            "command" => Modifier::Command,
            "shift" => Modifier::Shift,
            other => {
                warn!(hotkey = other, "Unknown hotkey, defaulting to 'fn'");
                Modifier::Fn
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Fn => "fn",
            Modifier::Ctrl => "ctrl",
            Modifier::Option => "option",
            Modifier::Command => "command",
            Modifier::Shift => "shift",
        }
    }

    fn matches(&self, key: &Key) -> bool {
        use Key::*;
        matches!(
            (self, key),
            (Modifier::Fn, Function)
                | (Modifier::Ctrl, ControlLeft)
                | (Modifier::Ctrl, ControlRight)
                | (Modifier::Option, Alt)
                | (Modifier::Option, AltGr)
                | (Modifier::Command, MetaLeft)
                | (Modifier::Command, MetaRight)
                | (Modifier::Shift, ShiftLeft)
                | (Modifier::Shift, ShiftRight)
        )
    }
}

/// A rising or falling edge of the configured modifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEdge {
    Press,
    Release,
}

/// Well-known lock file kept for compatibility with a legacy in-process
/// dictation monitor that watches for it directly. Off by default; see
/// `HotkeyMonitor::new`'s `legacy_lock_file` argument.
fn dictating_lock_path() -> PathBuf {
    crate::config::data_dir().join("dictating.lock")
}

pub struct HotkeyMonitor {
    modifier: Modifier,
    legacy_lock_file: bool,
    is_pressed: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl HotkeyMonitor {
    pub fn new(hotkey: &str, legacy_lock_file: bool) -> Self {
        let modifier = Modifier::parse(hotkey);
        info!(hotkey = modifier.as_str(), "Hotkey monitor configured");
        Self {
            modifier,
            legacy_lock_file,
            is_pressed: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start monitoring on a dedicated thread. Edges are posted to `tx`;
    /// the receiver (the coordinator) translates them into pause/resume.
    ///
    /// If the platform event tap can't be created (e.g. missing
    /// Accessibility/X11 permissions), this logs an actionable error and
    /// the monitor stays idle — no edges ever fire, and the service
    /// continues without pause-on-dictation.
    pub fn start(&self, tx: UnboundedSender<HotkeyEdge>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Hotkey monitor already running");
            return;
        }

        let modifier = self.modifier;
        let is_pressed = self.is_pressed.clone();
        let running = self.running.clone();
        let legacy_lock_file = self.legacy_lock_file;

        if legacy_lock_file {
            if let Some(parent) = dictating_lock_path().parent() {
                let _ = std::fs::create_dir_all(parent);
            }
        }

        thread::spawn(move || {
            let callback = move |event: Event| {
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                let edge = match event.event_type {
                    EventType::KeyPress(key) if modifier.matches(&key) => {
                        if is_pressed.swap(true, Ordering::SeqCst) {
                            return; // already pressed, suppress the repeat
                        }
                        Some(HotkeyEdge::Press)
                    }
                    EventType::KeyRelease(key) if modifier.matches(&key) => {
                        if !is_pressed.swap(false, Ordering::SeqCst) {
                            return; // wasn't pressed, spurious release
                        }
                        Some(HotkeyEdge::Release)
                    }
                    _ => None,
                };

                if let Some(edge) = edge {
                    if legacy_lock_file {
                        match edge {
                            HotkeyEdge::Press => {
                                let _ = std::fs::write(
                                    dictating_lock_path(),
                                    format!("hotkey:{}", modifier.as_str()),
                                );
                            }
                            HotkeyEdge::Release => {
                                let _ = std::fs::remove_file(dictating_lock_path());
                            }
                        }
                    }
                    debug!(?edge, hotkey = modifier.as_str(), "Hotkey edge");
                    let _ = tx.send(edge);
                }
            };

            if let Err(e) = listen(callback) {
                error!(
                    "Could not start hotkey listener ({:?}). Check Accessibility/input \
                     permissions; pause-on-dictation is disabled for this run.",
                    e
                );
            }
        });

        info!("Hotkey monitor started");
    }

    pub fn is_pressed(&self) -> bool {
        self.is_pressed.load(Ordering::SeqCst)
    }

    pub fn hotkey(&self) -> &'static str {
        self.modifier.as_str()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hotkey_falls_back_to_fn() {
        assert_eq!(Modifier::parse("bogus").as_str(), "fn");
    }

    #[test]
    fn known_hotkeys_round_trip() {
        for name in ["fn", "ctrl", "option", "command", "shift"] {
            assert_eq!(Modifier::parse(name).as_str(), name);
        }
    }

    #[test]
    fn modifier_matches_both_sides() {
        assert!(Modifier::Ctrl.matches(&Key::ControlLeft));
        assert!(Modifier::Ctrl.matches(&Key::ControlRight));
        assert!(!Modifier::Ctrl.matches(&Key::ShiftLeft));
    }
}
