//! Structured error kinds surfaced by the queue and coordinator.
//!
//! Distinct from the `anyhow::Result` used at the process boundary (device
//! open failures, PID file I/O) — these are matched on by HTTP handlers to
//! build the exact JSON shapes the spec fixes.

use thiserror::Error;

/// Why `fill` could not attach audio to a reservation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FillError {
    #[error("Item not found or expired")]
    NotFound,
}

/// Why `play` could not render a buffer through the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to open audio output device: {0}")]
    DeviceOpen(String),
    #[error("failed to build audio sink: {0}")]
    SinkBuild(String),
}
