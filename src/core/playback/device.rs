//! Default output device playback via cpal.
//!
//! The cpal stream lives on its own thread for its whole life; the device
//! callback pulls blocks from a [`QueueSink`]. Acquisition is lazy and never
//! waits: the first enqueue spawns the playback thread and returns at once,
//! the thread reports back through shared state, and a failed start is
//! retried on a later enqueue. Frames queue up meanwhile.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use super::{AudioFrame, AudioSink, PlaybackError, PlaybackResult, QueueSink, VolumeCallback};

/// Minimum wait between two device acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Output channels opened on the device; mono blocks are duplicated.
const OUTPUT_CHANNELS: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DeviceStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Failed,
}

/// Written by the playback thread, read by enqueue.
#[derive(Default)]
struct DeviceState {
    status: DeviceStatus,
    last_attempt: Option<Instant>,
    last_error: Option<String>,
}

pub struct CpalSink {
    queue: Arc<QueueSink>,
    state: Arc<Mutex<DeviceState>>,
    /// Dropping this ends the playback thread
    end_on_drop: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalSink {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            queue: Arc::new(QueueSink::new(sample_rate, frame_size)),
            state: Arc::new(Mutex::new(DeviceState::default())),
            end_on_drop: Mutex::new(None),
        }
    }

    /// Whether the output stream is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().status == DeviceStatus::Running
    }

    /// Reason of the last failed acquisition.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    fn ensure_started(&self) {
        {
            let mut state = self.state.lock();
            match state.status {
                DeviceStatus::Starting | DeviceStatus::Running => return,
                DeviceStatus::Idle | DeviceStatus::Failed => {}
            }
            if let Some(at) = state.last_attempt
                && at.elapsed() < RETRY_INTERVAL
            {
                return;
            }
            state.last_attempt = Some(Instant::now());
            state.status = DeviceStatus::Starting;
        }

        match spawn_output_thread(self.queue.clone(), self.state.clone()) {
            Ok(end_on_drop) => {
                *self.end_on_drop.lock() = Some(end_on_drop);
            }
            Err(e) => {
                tracing::warn!("Audio output unavailable, will retry: {}", e);
                let mut state = self.state.lock();
                state.status = DeviceStatus::Failed;
                state.last_error = Some(e.to_string());
            }
        }
    }
}

/// Spawn the thread owning the stream. Returns without waiting for the
/// device; the outcome lands in `state`.
fn spawn_output_thread(
    queue: Arc<QueueSink>,
    state: Arc<Mutex<DeviceState>>,
) -> PlaybackResult<mpsc::Sender<()>> {
    let (end_on_drop_tx, end_on_drop_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("live-voice-playback".to_string())
        .spawn(move || {
            let sample_rate = queue.sample_rate();
            let started = build_stream(queue).and_then(|stream| {
                stream
                    .play()
                    .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
                Ok(stream)
            });
            let stream = match started {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Audio output unavailable, will retry: {}", e);
                    let mut state = state.lock();
                    state.status = DeviceStatus::Failed;
                    state.last_error = Some(e.to_string());
                    return;
                }
            };

            tracing::info!("Audio output started at {} Hz", sample_rate);
            {
                let mut state = state.lock();
                state.status = DeviceStatus::Running;
                state.last_error = None;
            }

            // Keep the stream alive until the sink goes away.
            end_on_drop_rx.recv().ok();
            drop(stream);
            state.lock().status = DeviceStatus::Idle;
        })
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

    Ok(end_on_drop_tx)
}

fn output_config(sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: OUTPUT_CHANNELS,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    }
}

fn build_stream(queue: Arc<QueueSink>) -> PlaybackResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::DeviceUnavailable("no default output device".to_string()))?;

    let config = output_config(queue.sample_rate());

    let channels = OUTPUT_CHANNELS as usize;
    let mut mono: Vec<f32> = Vec::with_capacity(queue.frame_size());
    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                queue.render(&mut mono);
                for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(*sample);
                }
            },
            |err| tracing::error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))
}

impl AudioSink for CpalSink {
    fn enqueue(&self, frame: AudioFrame) -> PlaybackResult<()> {
        self.ensure_started();
        // Queued audio waits for the device if it is not up yet.
        self.queue.enqueue(frame)
    }

    fn stop(&self) {
        self.queue.stop();
    }

    fn on_volume(&self, callback: VolumeCallback) {
        self.queue.on_volume(callback);
    }

    fn queued_frames(&self) -> usize {
        self.queue.queued_frames()
    }

    fn sample_rate(&self) -> u32 {
        self.queue.sample_rate()
    }

    fn frame_size(&self) -> usize {
        self.queue.frame_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_config_uses_queue_rate() {
        let config = output_config(24000);
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.channels, OUTPUT_CHANNELS);
    }

    #[test]
    fn test_enqueue_does_not_wait_for_device() {
        let sink = CpalSink::new(24000, 4);

        let started = Instant::now();
        sink.enqueue(vec![0.0; 4]).unwrap();
        sink.enqueue(vec![0.0; 4]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_failed_start_is_retried_after_interval() {
        let sink = CpalSink::new(24000, 4);
        {
            let mut state = sink.state.lock();
            state.status = DeviceStatus::Failed;
            state.last_attempt = Some(Instant::now());
        }

        sink.ensure_started();
        assert_eq!(sink.state.lock().status, DeviceStatus::Failed);

        let stale = Instant::now() - RETRY_INTERVAL;
        sink.state.lock().last_attempt = Some(stale);
        sink.ensure_started();
        assert!(sink.state.lock().last_attempt.unwrap() > stale);
    }
}
