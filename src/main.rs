//! Audio Manager — centralized playback coordinator for a multi-window
//! voice assistant.
//!
//! Serializes text-to-speech and chime playback from several independent
//! client processes onto the single shared output device, preserving the
//! order requests were initiated in, pausing during dictation, and rate
//! limiting notification chimes across windows. See `audio_manager/__main__.py`
//! and `audio_manager/service.py` in the original source for the process
//! this mirrors.

mod chime;
mod config;
mod coordinator;
mod error;
mod hotkey;
mod http;
mod playback;
mod queue;
mod registry;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coordinator::ServiceCoordinator;
use playback::PlaybackEngine;

/// Allowed `--hotkey` values, matching `audio_manager/__main__.py`'s
/// `choices=["fn", "ctrl", "option", "command", "shift"]`.
const HOTKEY_CHOICES: &[&str] = &["fn", "ctrl", "option", "command", "shift"];

/// Bounded grace period for an in-flight `play()` to finish once shutdown
/// has been requested, per spec.md §5 "in-flight play is allowed to
/// finish, bounded by a short deadline."
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "audio-manager", about = "VoiceMode Audio Manager Service")]
struct Args {
    /// Port to run the HTTP server on.
    #[arg(short, long, env = "VOICEMODE_AUDIO_MANAGER_PORT", default_value_t = 8881)]
    port: u16,

    /// Modifier key that pauses audio when held.
    #[arg(short = 'k', long, env = "VOICEMODE_PAUSE_HOTKEY", default_value = "fn")]
    hotkey: String,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Keep writing the legacy `dictating.lock` file for compatibility with
    /// an older in-process dictation monitor. Off by default; see
    /// `hotkey::HotkeyMonitor`.
    #[arg(long)]
    legacy_lock_file: bool,

    /// Name of a specific output device to open instead of the system default.
    #[arg(long)]
    output_device: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if !HOTKEY_CHOICES.contains(&args.hotkey.as_str()) {
        bail!(
            "--hotkey must be one of {HOTKEY_CHOICES:?}, got {:?}",
            args.hotkey
        );
    }

    info!(port = args.port, hotkey = %args.hotkey, "Starting Audio Manager");

    let pid_file = config::pid_file();
    write_pid_file(&pid_file)
        .with_context(|| format!("failed to write PID file {}", pid_file.display()))?;
    let _pid_guard = PidFileGuard(pid_file);

    let engine = PlaybackEngine::new(args.output_device.as_deref())
        .context("failed to open audio output device")?;
    let coordinator = ServiceCoordinator::new(engine, &args.hotkey, args.legacy_lock_file);
    let router = http::build_router(coordinator.clone(), Instant::now());

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr} (is another Audio Manager already running?)"))?;
    info!("HTTP server listening on http://{addr}");

    let serve = axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown_signal());
    if let Err(e) = serve.await {
        error!("HTTP server error: {e}");
    }

    info!("Shutting down Audio Manager");
    coordinator.shutdown();
    coordinator.wait_for_worker(SHUTDOWN_DRAIN).await;
    Ok(())
}

/// Removes the PID file when dropped, covering both the graceful shutdown
/// path and any early `?` return from `run`.
struct PidFileGuard(PathBuf);

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = std::fs::remove_file(&self.0) {
                error!("Failed to remove PID file {}: {e}", self.0.display());
            } else {
                info!("PID file removed");
            }
        }
    }
}

/// Initialize `tracing`, writing to a rolling file under the data directory
/// when possible and falling back to stderr (matching
/// `audio_manager/__main__.py`'s `logging.basicConfig(stream=sys.stderr)`,
/// generalized with a file sink the way `voice-core/src/main.rs` does).
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let data_dir = config::data_dir();
    if std::fs::create_dir_all(&data_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&data_dir, config::log_file_name());
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive `main`, and this runs
        // exactly once at startup.
        Box::leak(Box::new(guard));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn write_pid_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, std::process::id().to_string())
}

/// Resolves once SIGINT or (on Unix) SIGTERM is received, so
/// `axum::serve`'s graceful shutdown can stop accepting new connections.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_written_and_removed_by_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audio_manager.pid");

        write_pid_file(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        drop(PidFileGuard(path.clone()));
        assert!(!path.exists());
    }
}
