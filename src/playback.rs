//! Blocking playback of PCM buffers through the shared output device.
//!
//! Grounded on the teacher's `tts::playback::AudioPlayer`: open the output
//! stream once via `rodio`/`cpal`, keep a single long-lived `Sink`, and let
//! `Sink::pause`/`Sink::play` do the "don't advance the read cursor while
//! paused" work rodio already implements at the sink level, rather than
//! hand-rolling a silence-emitting callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info};

use crate::error::PlaybackError;

/// Owns the exclusive output device. At most one buffer plays at a time;
/// no other component may open the device.
pub struct PlaybackEngine {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
    playing: AtomicBool,
    current_project: Mutex<Option<String>>,
}

// `OutputStream` carries a `PhantomData<*mut ()>` in cpal's platform
// abstraction that makes it `!Send` by default. We only ever touch it from
// the blocking-pool thread the worker confines playback to, one item at a
// time, so moving the whole engine across threads is sound.
unsafe impl Send for PlaybackEngine {}
unsafe impl Sync for PlaybackEngine {}

impl PlaybackEngine {
    /// Open the default (or named) output device and create the sink.
    pub fn new(device_name: Option<&str>) -> Result<Self, PlaybackError> {
        let (stream, stream_handle) = if let Some(name) = device_name {
            let host = cpal::default_host();
            let device = host
                .output_devices()
                .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false));

            match device {
                Some(dev) => {
                    info!(device = %name, "Selected output device");
                    OutputStream::try_from_device(&dev)
                        .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
                }
                None => {
                    info!(requested = %name, "Output device not found, falling back to default");
                    OutputStream::try_default()
                        .map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
                }
            }
        } else {
            OutputStream::try_default().map_err(|e| PlaybackError::DeviceOpen(e.to_string()))?
        };

        let sink =
            Sink::try_new(&stream_handle).map_err(|e| PlaybackError::SinkBuild(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
            playing: AtomicBool::new(false),
            current_project: Mutex::new(None),
        })
    }

    /// Play `pcm` (16-bit signed little-endian mono) and block until the
    /// device has fully consumed it or `stop()` aborts it.
    pub fn play(&self, pcm: &[u8], sample_rate: u32, project: &str) {
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        *self.current_project.lock().unwrap() = Some(project.to_string());
        self.playing.store(true, Ordering::SeqCst);
        debug!(project, samples = samples.len(), sample_rate, "Starting playback");

        let source = rodio::buffer::SamplesBuffer::new(1, sample_rate, samples);
        self.sink.append(source);
        self.sink.sleep_until_end();

        self.playing.store(false, Ordering::SeqCst);
        *self.current_project.lock().unwrap() = None;
        debug!(project, "Playback complete");
    }

    /// Pause playback (or arm pause for audio that arrives later). Always
    /// succeeds, even when nothing is currently playing.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback (or clear an armed pause). Always succeeds.
    pub fn resume(&self) {
        self.sink.play();
    }

    /// Abort the in-flight buffer, returning the engine to idle. Returns
    /// `true` if something was actually playing.
    pub fn stop(&self) -> bool {
        let was_playing = self.playing.swap(false, Ordering::SeqCst);
        if was_playing {
            self.sink.stop();
            self.sink.play(); // clear any armed pause, matching the source's stop()
            *self.current_project.lock().unwrap() = None;
        }
        was_playing
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Rodio tracks its own pause state internally (backed by an atomic),
    /// which is exactly the "single atomic flag on the hot path" the
    /// pause/resume contract calls for — we don't need a second one.
    pub fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }

    pub fn current_project(&self) -> Option<String> {
        self.current_project.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Opening a real output device isn't available in CI/sandboxed test
    // runners, so these exercise only the parts that don't need one.
    #[test]
    fn pcm_decodes_little_endian() {
        let pcm = [0x00u8, 0x01, 0xff, 0x7f];
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![0x0100, 0x7fff]);
    }
}
