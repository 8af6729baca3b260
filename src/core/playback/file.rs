//! WAV file sink for headless runs.
//!
//! Writes happen synchronously on the caller's task, through a `BufWriter`,
//! so an enqueue costs a memory copy and an occasional buffered flush to
//! disk. Meant for local files; a slow or network-mounted path stalls the
//! connection task feeding the sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{
    AudioFrame, AudioSink, DEFAULT_FRAME_SIZE, PlaybackError, PlaybackResult, VolumeCallback,
    VolumeMeter,
};
use crate::utils::audio::f32_to_i16;

/// Writes every enqueued frame straight to a 16-bit mono WAV file.
///
/// Frames are "played" as soon as they are written, so `stop()` has nothing
/// to drop and the queue is always empty.
pub struct WavFileSink {
    path: PathBuf,
    sample_rate: u32,
    writer: Mutex<Option<hound::WavWriter<BufWriter<File>>>>,
    frames_written: AtomicU64,
    meter: VolumeMeter,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> PlaybackResult<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            PlaybackError::OutputFailed(format!("cannot create {}: {e}", path.display()))
        })?;

        Ok(Self {
            path,
            sample_rate,
            writer: Mutex::new(Some(writer)),
            frames_written: AtomicU64::new(0),
            meter: VolumeMeter::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Write the WAV header sizes and close the file. Later enqueues fail
    /// with [`PlaybackError::Closed`].
    pub fn finalize(&self) -> PlaybackResult<()> {
        match self.writer.lock().take() {
            Some(writer) => writer
                .finalize()
                .map_err(|e| PlaybackError::OutputFailed(e.to_string())),
            None => Ok(()),
        }
    }
}

impl AudioSink for WavFileSink {
    fn enqueue(&self, frame: AudioFrame) -> PlaybackResult<()> {
        {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(PlaybackError::Closed)?;
            for sample in &frame {
                writer
                    .write_sample(f32_to_i16(*sample))
                    .map_err(|e| PlaybackError::OutputFailed(e.to_string()))?;
            }
        }
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.meter.publish(&frame);
        Ok(())
    }

    fn stop(&self) {
        self.meter.reset();
    }

    fn on_volume(&self, callback: VolumeCallback) {
        self.meter.subscribe(callback);
    }

    fn queued_frames(&self) -> usize {
        0
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        DEFAULT_FRAME_SIZE
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}
