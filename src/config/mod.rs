//! Process-wide paths: the `~/.voicemode` data directory and the PID file
//! inside it, matching `audio_manager/service.py`'s `Path.home() / ".voicemode"`.

use std::path::PathBuf;

/// `~/.voicemode`. The original source pins this path directly rather than
/// resolving a per-OS AppData/Library/XDG base dir, so this does the same.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voicemode")
}

/// `~/.voicemode/audio_manager.pid`, written on start and removed on clean
/// shutdown.
pub fn pid_file() -> PathBuf {
    data_dir().join("audio_manager.pid")
}

/// `~/.voicemode/audio_manager.log`, the file sink `tracing-appender` rolls
/// into when the data directory is writable.
pub fn log_file_name() -> &'static str {
    "audio_manager.log"
}
