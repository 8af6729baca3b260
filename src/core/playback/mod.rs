//! Output audio playback.
//!
//! [`AudioStreamer`] turns inbound PCM16 chunks into fixed-size blocks and
//! hands them to an [`AudioSink`]. Sinks decide where the audio goes: a
//! render-pulled queue ([`QueueSink`]), a WAV file ([`WavFileSink`]), or the
//! default output device (`CpalSink`, feature `playback-cpal`).

use std::sync::Arc;

use thiserror::Error;

pub mod file;
pub mod meter;
pub mod sink;
pub mod streamer;

#[cfg(feature = "playback-cpal")]
pub mod device;

pub use file::WavFileSink;
pub use meter::VolumeMeter;
pub use sink::QueueSink;
pub use streamer::AudioStreamer;

#[cfg(feature = "playback-cpal")]
pub use device::CpalSink;

/// Default render block, in samples.
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Errors raised by playback sinks.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Output device could not be acquired
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Stream or file could not be written
    #[error("Audio output failed: {0}")]
    OutputFailed(String),

    /// Sink was closed
    #[error("Audio sink closed")]
    Closed,
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// One block of mono samples at the sink's rate.
pub type AudioFrame = Vec<f32>;

/// Called with the RMS level of each rendered block. Runs on the render side
/// and must return quickly.
pub type VolumeCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Destination for played audio.
pub trait AudioSink: Send + Sync {
    /// Queue `frame` to play after everything already queued.
    fn enqueue(&self, frame: AudioFrame) -> PlaybackResult<()>;

    /// Drop every frame that has not been handed to the output yet.
    fn stop(&self);

    /// Register a volume callback.
    fn on_volume(&self, callback: VolumeCallback);

    /// Frames waiting to be played.
    fn queued_frames(&self) -> usize;

    /// Rate the sink plays at.
    fn sample_rate(&self) -> u32;

    /// Samples per block.
    fn frame_size(&self) -> usize;
}
